//! Directory operations

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::errors::OpsError;
use crate::filesys::file::File;

/// A directory wrapper with path
#[derive(Debug, Clone)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    /// Create a new directory reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the directory exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Create the directory (and parents)
    pub async fn create(&self) -> Result<(), OpsError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// List file names directly inside the directory
    pub async fn list_file_names(&self) -> Result<Vec<String>, OpsError> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.path).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }

        Ok(names)
    }

    /// List every file below the directory, as paths relative to it.
    ///
    /// Symlinks are not followed. Output is sorted.
    pub async fn list_files_recursive(&self) -> Result<Vec<PathBuf>, OpsError> {
        let mut files = Vec::new();
        let mut pending = vec![PathBuf::new()];

        while let Some(relative) = pending.pop() {
            let mut entries = fs::read_dir(self.path.join(&relative)).await?;
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let child = relative.join(entry.file_name());
                if file_type.is_dir() {
                    pending.push(child);
                } else if file_type.is_file() {
                    files.push(child);
                }
            }
        }

        files.sort();
        Ok(files)
    }

    /// Get a file within this directory
    pub fn file(&self, name: &str) -> File {
        File::new(self.path.join(name))
    }
}
