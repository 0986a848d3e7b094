//! Local filesystem target

use std::path::{Component, Path};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::archive::codec::validate_entry_path;
use crate::archive::Payload;
use crate::errors::OpsError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::process::{CommandRunner, CommandSpec};
use crate::target::{ApplyReport, CollectReport, ExecOutput, ItemOutcome, TargetAdapter, TargetKind};

/// Project paths captured by a local backup, relative to the project root
pub const WELL_KNOWN_PATHS: &[&str] = &[
    "app.py",
    "database.py",
    "logging_config.py",
    "requirements.txt",
    "agro.db",
    "api",
    "admin",
    "monitoring",
    "templates",
    "static",
    "config",
    "k8s",
    "helm",
    "argocd",
    "docker-compose.yml",
    "Dockerfile",
];

/// Adapter over the project directory and the locally running container
pub struct LocalAdapter {
    root: Dir,
    paths: Vec<String>,
    container: String,
    runner: Arc<dyn CommandRunner>,
}

impl LocalAdapter {
    /// Adapter capturing [`WELL_KNOWN_PATHS`] under `root`
    pub fn new(root: impl Into<std::path::PathBuf>, container: &str, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            root: Dir::new(root),
            paths: WELL_KNOWN_PATHS.iter().map(|p| p.to_string()).collect(),
            container: container.to_string(),
            runner,
        }
    }

    async fn collect_path(&self, relative: &str, report: &mut CollectReport) -> Result<ItemOutcome, OpsError> {
        let absolute = self.root.path().join(relative);
        let meta = match fs::metadata(&absolute).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ItemOutcome::Absent),
            Err(e) => return Err(e.into()),
        };

        if meta.is_file() {
            capture_file(&absolute, relative.to_string(), report).await?;
            return Ok(ItemOutcome::Present { entries: 1 });
        }

        let dir = Dir::new(&absolute);
        let files = dir.list_files_recursive().await?;
        for file in &files {
            let entry = format!("{}/{}", relative, slash_path(file));
            capture_file(&absolute.join(file), entry, report).await?;
        }
        Ok(ItemOutcome::Present {
            entries: files.len(),
        })
    }
}

#[async_trait]
impl TargetAdapter for LocalAdapter {
    fn kind(&self) -> TargetKind {
        TargetKind::Local
    }

    async fn collect_state(&self) -> Result<CollectReport, OpsError> {
        info!("Collecting local state from {}", self.root.path().display());
        let mut report = CollectReport::default();

        for relative in &self.paths {
            let outcome = match self.collect_path(relative, &mut report).await {
                Ok(outcome) => outcome,
                Err(e) => ItemOutcome::Failed(e.to_string()),
            };
            match &outcome {
                ItemOutcome::Present { entries } => debug!("Captured {} ({} files)", relative, entries),
                ItemOutcome::Absent => warn!("{} not found, skipping", relative),
                ItemOutcome::Failed(reason) => warn!("Failed to capture {}: {}", relative, reason),
            }
            report.record(relative.clone(), outcome);
        }

        Ok(report)
    }

    async fn apply_state(&self, payload: &Payload) -> Result<ApplyReport, OpsError> {
        info!("Restoring {} files into {}", payload.len(), self.root.path().display());
        let mut report = ApplyReport::default();

        for (relative, content) in payload {
            validate_entry_path(relative)?;
            File::new(self.root.path().join(relative))
                .write_bytes(content)
                .await?;
            debug!("Restored {}", relative);
            report.applied.push(relative.clone());
        }

        Ok(report)
    }

    async fn mark_executable(&self, paths: &[String]) -> Result<(), OpsError> {
        for relative in paths {
            validate_entry_path(relative)?;
            set_executable(&self.root.path().join(relative)).await?;
        }
        Ok(())
    }

    async fn exec_in_workload(
        &self,
        command: &[&str],
        stdin: Option<Vec<u8>>,
    ) -> Result<ExecOutput, OpsError> {
        let mut args = vec!["exec".to_string()];
        if stdin.is_some() {
            args.push("-i".to_string());
        }
        args.push(self.container.clone());
        args.extend(command.iter().map(|s| s.to_string()));

        let mut spec = CommandSpec::new("docker", args);
        if let Some(input) = stdin {
            spec = spec.stdin(input);
        }
        let output = self.runner.run(spec).await?;
        if !output.success() {
            warn!("docker exec in {} exited with {}: {}", self.container, output.code, output.stderr.trim());
        }
        Ok(ExecOutput {
            stdout: output.stdout,
            exit_code: output.code,
        })
    }
}

async fn capture_file(path: &Path, entry: String, report: &mut CollectReport) -> Result<(), OpsError> {
    let content = File::new(path).read_bytes().await?;
    if is_executable(&fs::metadata(path).await?) {
        report.executables.push(entry.clone());
    }
    report.payload.insert(entry, content);
    Ok(())
}

#[cfg(unix)]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &std::fs::Metadata) -> bool {
    false
}

#[cfg(unix)]
async fn set_executable(path: &Path) -> Result<(), OpsError> {
    use std::os::unix::fs::PermissionsExt;
    let mut permissions = fs::metadata(path).await?.permissions();
    permissions.set_mode(permissions.mode() | 0o111);
    fs::set_permissions(path, permissions).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_executable(_path: &Path) -> Result<(), OpsError> {
    Ok(())
}

/// Join path components with `/` regardless of platform
fn slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
