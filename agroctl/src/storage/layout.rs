//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::OpsError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Environment variable overriding the state directory
pub const HOME_ENV_VAR: &str = "AGROCTL_HOME";

/// Where agroctl keeps its own state
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Get the directory of persisted release states
    pub fn releases_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("releases"))
    }

    /// Release state file of one environment
    pub fn release_file(&self, environment: &str) -> File {
        self.releases_dir().file(&format!("{}.json", environment))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), OpsError> {
        self.releases_dir().create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        let base_dir = std::env::var_os(HOME_ENV_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".agroctl"));
        Self::new(base_dir)
    }
}
