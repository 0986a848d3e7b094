//! Backup storage location and its retention index
//!
//! Archive files in the directory are the source of truth. `index.json` only
//! carries what cannot be read from a file name (checksum, revision, partial
//! flag), so every listing re-scans the directory and reflects concurrent
//! creation and deletion.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::archive::{BackupId, BackupMetadata};
use crate::errors::OpsError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::target::TargetKind;
use crate::utils::sha256_hash;

const ARCHIVE_PREFIX: &str = "agro-shop-";
const ARCHIVE_SUFFIX: &str = ".tar.gz";
const INDEX_FILE: &str = "index.json";

/// File name of an archive, e.g. `agro-shop-local-20251016_143000_125.tar.gz`
pub fn archive_file_name(kind: TargetKind, id: &BackupId) -> String {
    format!("{}{}-{}{}", ARCHIVE_PREFIX, kind, id, ARCHIVE_SUFFIX)
}

/// Inverse of [`archive_file_name`]; `None` for foreign files
pub fn parse_archive_file_name(name: &str) -> Option<(TargetKind, BackupId)> {
    let stem = name.strip_prefix(ARCHIVE_PREFIX)?.strip_suffix(ARCHIVE_SUFFIX)?;
    let (kind, id) = stem.split_once('-')?;
    Some((kind.parse().ok()?, id.parse().ok()?))
}

/// One archive as recorded in `index.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub id: BackupId,
    pub kind: TargetKind,
    pub file_name: String,
    pub sha256: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub partial: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_commit: Option<String>,
    #[serde(default)]
    pub environment: String,
}

/// The RetentionSet index of one location
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupIndex {
    #[serde(default)]
    pub records: Vec<IndexRecord>,
}

impl BackupIndex {
    pub fn get(&self, id: &BackupId) -> Option<&IndexRecord> {
        self.records.iter().find(|r| &r.id == id)
    }

    pub fn upsert(&mut self, record: IndexRecord) {
        self.records.retain(|r| r.id != record.id);
        self.records.push(record);
        self.records.sort_by(|a, b| b.id.cmp(&a.id));
    }
}

/// Summary of one stored archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupSummary {
    pub id: BackupId,
    pub kind: TargetKind,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub partial: Option<bool>,
    pub git_commit: Option<String>,
    pub sha256: Option<String>,
}

/// A directory of backup archives
#[derive(Debug, Clone)]
pub struct BackupLocation {
    dir: Dir,
}

impl BackupLocation {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            dir: Dir::new(path),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    fn index_file(&self) -> File {
        self.dir.file(INDEX_FILE)
    }

    pub async fn load_index(&self) -> Result<BackupIndex, OpsError> {
        self.index_file().read_json_or_default().await
    }

    async fn save_index(&self, index: &BackupIndex) -> Result<(), OpsError> {
        self.index_file().write_json(index).await
    }

    /// Archives present on disk, newest first
    pub async fn scan(&self) -> Result<Vec<(BackupId, TargetKind, String)>, OpsError> {
        if !self.dir.exists().await {
            return Ok(Vec::new());
        }
        let mut found: Vec<(BackupId, TargetKind, String)> = self
            .dir
            .list_file_names()
            .await?
            .into_iter()
            .filter_map(|name| {
                parse_archive_file_name(&name).map(|(kind, id)| (id, kind, name))
            })
            .collect();
        found.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(found)
    }

    /// Identifier of the most recent archive
    pub async fn newest_id(&self) -> Result<Option<BackupId>, OpsError> {
        Ok(self.scan().await?.first().map(|(id, _, _)| *id))
    }

    /// Store a packed archive and append it to the index
    pub async fn write_archive(
        &self,
        metadata: &BackupMetadata,
        bytes: &[u8],
    ) -> Result<BackupSummary, OpsError> {
        self.dir.create().await?;
        let file_name = archive_file_name(metadata.backup_type, &metadata.timestamp);
        let file = self.dir.file(&file_name);
        file.write_atomic(bytes).await?;

        let record = IndexRecord {
            id: metadata.timestamp,
            kind: metadata.backup_type,
            file_name: file_name.clone(),
            sha256: sha256_hash(bytes),
            size_bytes: bytes.len() as u64,
            partial: metadata.partial,
            git_commit: metadata.git_commit.clone(),
            environment: metadata.environment.clone(),
        };
        let mut index = self.load_index().await?;
        index.upsert(record.clone());
        self.save_index(&index).await?;

        info!("Archive written: {}", file.path().display());
        Ok(summary(
            file.path().to_path_buf(),
            record.size_bytes,
            metadata.backup_type,
            metadata.timestamp,
            Some(&record),
        ))
    }

    /// Archives newest first. Re-reads the directory on every call.
    pub async fn list(&self) -> Result<Vec<BackupSummary>, OpsError> {
        let index = self.load_index().await?;
        let mut summaries = Vec::new();

        for (id, kind, name) in self.scan().await? {
            let file = self.dir.file(&name);
            // Removed between scan and stat: it is simply no longer listed.
            let size = match file.size().await {
                Ok(size) => size,
                Err(OpsError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            summaries.push(summary(file.path().to_path_buf(), size, kind, id, index.get(&id)));
        }

        Ok(summaries)
    }

    /// Path of the archive with this identifier
    pub async fn resolve(&self, id: &BackupId) -> Result<PathBuf, OpsError> {
        self.scan()
            .await?
            .into_iter()
            .find(|(found, _, _)| found == id)
            .map(|(_, _, name)| self.dir.path().join(name))
            .ok_or_else(|| {
                OpsError::NotFound(format!("backup {} in {}", id, self.dir.path().display()))
            })
    }

    /// Read an archive, checking it against the index checksum when the file
    /// belongs to this location
    pub async fn read_archive(&self, path: &Path) -> Result<Vec<u8>, OpsError> {
        let file = File::new(path);
        if !file.exists().await {
            return Err(OpsError::NotFound(format!("backup file {}", path.display())));
        }
        let bytes = file.read_bytes().await?;

        let in_location = self.contains(path).await;
        let known = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_archive_file_name)
            .filter(|_| in_location);
        if let Some((_, id)) = known {
            let index = self.load_index().await?;
            if let Some(record) = index.get(&id) {
                let actual = sha256_hash(&bytes);
                if actual != record.sha256 {
                    return Err(OpsError::CorruptArchive(format!(
                        "checksum mismatch for {}: expected {}, found {}",
                        record.file_name, record.sha256, actual
                    )));
                }
                debug!("Checksum verified for {}", record.file_name);
            }
        }

        Ok(bytes)
    }

    /// Whether `path` names a file directly inside this location, however the
    /// two paths are spelled
    async fn contains(&self, path: &Path) -> bool {
        let Some(parent) = path.parent() else {
            return false;
        };
        let parent = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        };
        match (
            tokio::fs::canonicalize(parent).await,
            tokio::fs::canonicalize(self.dir.path()).await,
        ) {
            (Ok(parent), Ok(dir)) => parent == dir,
            _ => false,
        }
    }

    /// Delete all but the `keep` most recent archives. Returns removed ids,
    /// newest first.
    pub async fn cleanup(&self, keep: usize) -> Result<Vec<BackupId>, OpsError> {
        let archives = self.scan().await?;
        let mut index = self.load_index().await?;
        let recorded = index.records.len();
        let mut removed = Vec::new();

        for (id, _, name) in archives.iter().skip(keep) {
            match self.dir.file(name).delete().await {
                Ok(()) => {}
                Err(OpsError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
            info!("Removed old backup {}", name);
            removed.push(*id);
        }

        // Also drops records whose archive was deleted by hand.
        index
            .records
            .retain(|r| archives.iter().take(keep).any(|(id, _, _)| id == &r.id));
        if index.records.len() != recorded {
            self.save_index(&index).await?;
        }

        if removed.is_empty() {
            warn!(
                "Only {} backups in {}, nothing to clean up",
                archives.len(),
                self.dir.path().display()
            );
        }

        Ok(removed)
    }
}

fn summary(
    path: PathBuf,
    size_bytes: u64,
    kind: TargetKind,
    id: BackupId,
    record: Option<&IndexRecord>,
) -> BackupSummary {
    BackupSummary {
        id,
        kind,
        path,
        size_bytes,
        created_at: id.created_at(),
        partial: record.map(|r| r.partial),
        git_commit: record.and_then(|r| r.git_commit.clone()),
        sha256: record.map(|r| r.sha256.clone()),
    }
}
