//! Archive manifest and backup identifiers

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::archive::codec::Payload;
use crate::errors::OpsError;
use crate::target::TargetKind;

const ID_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";

/// Timestamp-derived backup identifier, e.g. `20251016_143000_125`.
///
/// Identifiers have millisecond resolution and sort in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BackupId(DateTime<Utc>);

impl BackupId {
    /// Identifier for a backup created at `at`
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(at.trunc_subsecs(3))
    }

    /// Identifier for a backup created at `at` that sorts strictly after `newest`
    pub fn next_after(at: DateTime<Utc>, newest: Option<&BackupId>) -> Self {
        let candidate = Self::from_datetime(at);
        match newest {
            Some(newest) if candidate <= *newest => Self(newest.0 + Duration::milliseconds(1)),
            _ => candidate,
        }
    }

    /// Creation time encoded in the identifier
    pub fn created_at(&self) -> DateTime<Utc> {
        self.0
    }
}

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(ID_FORMAT))
    }
}

impl FromStr for BackupId {
    type Err = OpsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDateTime::parse_from_str(s, ID_FORMAT)
            .map(|naive| Self(naive.and_utc()))
            .map_err(|e| OpsError::InvalidBackupId(format!("{}: {}", s, e)))
    }
}

impl Serialize for BackupId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BackupId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Contents of `backup_metadata.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMetadata {
    /// Target the archive was collected from
    pub backup_type: TargetKind,

    /// Backup identifier
    pub timestamp: BackupId,

    /// ISO-8601 creation time
    pub date: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_commit: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,

    /// Environment label, e.g. `local` or `production`
    #[serde(default)]
    pub environment: String,

    /// Total payload size in bytes
    pub backup_size: u64,

    /// Set when an item or the database dump could not be captured
    #[serde(default)]
    pub partial: bool,

    /// What was skipped or failed during collection
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,

    /// Payload paths
    #[serde(default)]
    pub files: Vec<String>,

    /// Payload paths captured with an executable bit set
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub executables: Vec<String>,
}

impl BackupMetadata {
    /// Metadata for a fresh backup; call [`BackupMetadata::describe`] once the
    /// payload is final.
    pub fn new(kind: TargetKind, id: BackupId, environment: impl Into<String>) -> Self {
        Self {
            backup_type: kind,
            timestamp: id,
            date: id.created_at(),
            git_commit: None,
            git_branch: None,
            environment: environment.into(),
            backup_size: 0,
            partial: false,
            warnings: Vec::new(),
            files: Vec::new(),
            executables: Vec::new(),
        }
    }

    /// Record size and file list of the payload
    pub fn describe(&mut self, payload: &Payload) {
        self.backup_size = payload.values().map(|data| data.len() as u64).sum();
        self.files = payload.keys().cloned().collect();
    }

    /// Record a skipped optional item without marking the backup partial
    pub fn note(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Record a collection problem and mark the backup partial
    pub fn mark_partial(&mut self, warning: impl Into<String>) {
        self.partial = true;
        self.warnings.push(warning.into());
    }
}
