//! Backup manager

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::archive::{self, BackupId, BackupMetadata};
use crate::backup::confirm::Confirm;
use crate::backup::location::{BackupLocation, BackupSummary};
use crate::console;
use crate::errors::OpsError;
use crate::process::{CommandRunner, CommandSpec};
use crate::target::{ItemOutcome, TargetAdapter};
use crate::utils::human_size;

/// Payload entry holding the SQL dump of the application database
pub const DUMP_ENTRY: &str = "database/agro_dump.sql";

/// Backup manager options
#[derive(Debug, Clone)]
pub struct BackupOptions {
    /// Environment label recorded in every manifest
    pub environment: String,

    /// Directory `git rev-parse` runs in to record the source revision
    pub project_root: PathBuf,

    /// Database file path inside the workload
    pub database_path: String,

    /// Dump the database through the workload
    pub dump_database: bool,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            environment: "local".to_string(),
            project_root: PathBuf::from("."),
            database_path: "/app/agro.db".to_string(),
            dump_database: true,
        }
    }
}

/// Outcome of a restore
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub id: BackupId,
    pub applied: Vec<String>,
    pub skipped: Vec<String>,
    pub database_restored: bool,
}

/// Creates and restores archives for one target
pub struct BackupManager {
    adapter: Arc<dyn TargetAdapter>,
    runner: Arc<dyn CommandRunner>,
    options: BackupOptions,
}

impl BackupManager {
    pub fn new(
        adapter: Arc<dyn TargetAdapter>,
        runner: Arc<dyn CommandRunner>,
        options: BackupOptions,
    ) -> Self {
        Self {
            adapter,
            runner,
            options,
        }
    }

    /// Snapshot the target into a new archive in `location`.
    ///
    /// Missing items and a failed database dump are warnings; the archive is
    /// still written and marked partial when something present could not be
    /// captured.
    pub async fn create_backup(&self, location: &BackupLocation) -> Result<BackupSummary, OpsError> {
        let kind = self.adapter.kind();
        console::info(format!("Creating {} backup", kind));

        let report = self.adapter.collect_state().await?;
        let id = BackupId::next_after(Utc::now(), location.newest_id().await?.as_ref());
        let mut metadata = BackupMetadata::new(kind, id, self.options.environment.clone());

        for item in &report.items {
            match &item.outcome {
                ItemOutcome::Present { entries } => {
                    console::info(format!("Collected {} ({} entries)", item.name, entries));
                }
                ItemOutcome::Absent => {
                    console::warning(format!("{} not found, skipping", item.name));
                    metadata.note(format!("{}: not found", item.name));
                }
                ItemOutcome::Failed(reason) => {
                    console::warning(format!("Failed to collect {}: {}", item.name, reason));
                    metadata.mark_partial(format!("{}: {}", item.name, reason));
                }
            }
        }
        metadata.executables = report.executables;
        let mut payload = report.payload;

        if self.options.dump_database {
            match self.dump_database().await {
                Ok(dump) => {
                    console::info(format!(
                        "Database dump captured ({})",
                        human_size(dump.len() as u64)
                    ));
                    payload.insert(DUMP_ENTRY.to_string(), dump);
                }
                Err(reason) => {
                    console::warning(format!("Database dump skipped: {}", reason));
                    metadata.mark_partial(format!("database dump: {}", reason));
                }
            }
        }

        let (commit, branch) = self.source_revision().await;
        metadata.git_commit = commit;
        metadata.git_branch = branch;
        metadata.describe(&payload);

        let bytes = archive::pack(&payload, &metadata)?;
        let summary = location.write_archive(&metadata, &bytes).await?;

        if metadata.partial {
            console::warning(format!(
                "Backup {} is PARTIAL: {}",
                id,
                metadata.warnings.join("; ")
            ));
        }
        console::success(format!(
            "Backup {} written to {} ({})",
            id,
            summary.path.display(),
            human_size(summary.size_bytes)
        ));
        Ok(summary)
    }

    /// Restore the archive with identifier `id` from `location`
    pub async fn restore_backup(
        &self,
        id: &BackupId,
        location: &BackupLocation,
        confirm: &dyn Confirm,
    ) -> Result<RestoreReport, OpsError> {
        let path = location.resolve(id).await?;
        self.restore_file(&path, location, confirm).await
    }

    /// Restore an archive file.
    ///
    /// Kind is checked before the prompt, so a mismatched archive never
    /// touches the target. The apply is not atomic: a failure part way leaves
    /// earlier items applied.
    pub async fn restore_file(
        &self,
        path: &Path,
        location: &BackupLocation,
        confirm: &dyn Confirm,
    ) -> Result<RestoreReport, OpsError> {
        console::info(format!("Reading backup {}", path.display()));
        let bytes = location.read_archive(path).await?;
        let (mut payload, metadata) = archive::unpack(&bytes)?;

        let adapter_kind = self.adapter.kind();
        if metadata.backup_type != adapter_kind {
            return Err(OpsError::KindMismatch {
                archive: metadata.backup_type,
                adapter: adapter_kind,
            });
        }
        if metadata.partial {
            console::warning(format!(
                "Backup {} is partial: {}",
                metadata.timestamp,
                metadata.warnings.join("; ")
            ));
        }

        let prompt = format!(
            "Restore {} backup {} ({} files)? This overwrites current state",
            metadata.backup_type,
            metadata.timestamp,
            payload.len()
        );
        if !confirm.confirm(&prompt).await? {
            return Err(OpsError::Aborted("restore declined".to_string()));
        }

        let dump = payload.remove(DUMP_ENTRY);
        let applied = self.adapter.apply_state(&payload).await?;
        if !metadata.executables.is_empty() {
            self.adapter.mark_executable(&metadata.executables).await?;
        }
        console::info(format!("Applied {} items", applied.applied.len()));
        for skipped in &applied.skipped {
            console::warning(format!("Skipped {}", skipped));
        }

        let database_restored = match dump {
            Some(dump) => {
                self.replay_dump(dump).await?;
                console::info("Database restored from dump");
                true
            }
            None => false,
        };

        console::success(format!("Restore of backup {} completed", metadata.timestamp));
        Ok(RestoreReport {
            id: metadata.timestamp,
            applied: applied.applied,
            skipped: applied.skipped,
            database_restored,
        })
    }

    /// Archives in `location`, newest first
    pub async fn list_backups(&self, location: &BackupLocation) -> Result<Vec<BackupSummary>, OpsError> {
        location.list().await
    }

    /// Keep the `keep` most recent archives, delete the rest
    pub async fn cleanup_old(
        &self,
        location: &BackupLocation,
        keep: usize,
    ) -> Result<Vec<BackupId>, OpsError> {
        let removed = location.cleanup(keep).await?;
        console::success(format!(
            "Removed {} old backups, kept at most {}",
            removed.len(),
            keep
        ));
        Ok(removed)
    }

    async fn dump_database(&self) -> Result<Vec<u8>, String> {
        let output = self
            .adapter
            .exec_in_workload(&["sqlite3", self.options.database_path.as_str(), ".dump"], None)
            .await
            .map_err(|e| e.to_string())?;
        if output.exit_code != 0 {
            return Err(format!("sqlite3 exited with {}", output.exit_code));
        }
        if output.stdout.is_empty() {
            return Err("empty dump".to_string());
        }
        Ok(output.stdout)
    }

    async fn replay_dump(&self, dump: Vec<u8>) -> Result<(), OpsError> {
        info!("Replaying database dump into {}", self.options.database_path);
        // Replay into a fresh file; the dump recreates every table.
        let script = format!(
            "rm -f '{db}' && sqlite3 '{db}'",
            db = self.options.database_path.replace('\'', "")
        );
        let output = self
            .adapter
            .exec_in_workload(&["sh", "-c", script.as_str()], Some(dump))
            .await?;
        if output.exit_code != 0 {
            return Err(OpsError::CommandFailed {
                program: "sqlite3".to_string(),
                code: output.exit_code,
                stderr: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            });
        }
        Ok(())
    }

    async fn source_revision(&self) -> (Option<String>, Option<String>) {
        let commit = self.git(&["rev-parse", "HEAD"]).await;
        let branch = self.git(&["rev-parse", "--abbrev-ref", "HEAD"]).await;
        (commit, branch)
    }

    async fn git(&self, args: &[&str]) -> Option<String> {
        let spec = CommandSpec::new("git", args.iter().copied())
            .current_dir(&self.options.project_root);
        match self.runner.run(spec).await {
            Ok(output) if output.success() => {
                let value = output.stdout_string().trim().to_string();
                (!value.is_empty()).then_some(value)
            }
            Ok(_) => None,
            Err(e) => {
                warn!("git unavailable: {}", e);
                None
            }
        }
    }
}
