//! Error types for agroctl

use thiserror::Error;

use crate::target::TargetKind;

/// Main error type for orchestration operations
#[derive(Error, Debug)]
pub enum OpsError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("{url} answered with HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("Corrupt archive: {0}")]
    CorruptArchive(String),

    #[error("Archive has no backup_metadata.json manifest")]
    MissingManifest,

    #[error("Archive was created for a {archive} target and cannot be restored with the {adapter} adapter")]
    KindMismatch {
        archive: TargetKind,
        adapter: TargetKind,
    },

    #[error("No running workload matches selector {selector}")]
    NoWorkloadAvailable { selector: String },

    #[error("No prior version recorded to roll back to")]
    NoPriorVersion,

    #[error("Health check for version {version} failed after {attempts} attempts")]
    HealthCheckExhausted {
        version: String,
        attempts: u32,
        logs: Option<String>,
    },

    #[error("{program} exited with code {code}: {stderr}")]
    CommandFailed {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("Invalid path in archive payload: {0}")]
    InvalidPath(String),

    #[error("Invalid backup id: {0}")]
    InvalidBackupId(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation aborted: {0}")]
    Aborted(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for OpsError {
    fn from(err: anyhow::Error) -> Self {
        OpsError::Internal(err.to_string())
    }
}
