//! Persisted release state, one file per environment

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::deploy::fsm::ReleaseStatus;
use crate::errors::OpsError;
use crate::filesys::file::File;

/// What is running in an environment and what to roll back to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseState {
    pub environment: String,

    /// Version presently running
    #[serde(default)]
    pub current_version: Option<String>,

    /// Last known-good version before `current_version`
    #[serde(default)]
    pub previous_version: Option<String>,

    #[serde(default)]
    pub status: ReleaseStatus,

    /// Version of the release in flight, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl ReleaseState {
    pub fn new(environment: &str) -> Self {
        Self {
            environment: environment.to_string(),
            current_version: None,
            previous_version: None,
            status: ReleaseStatus::Idle,
            target_version: None,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    /// Record `version` as healthy. Redeploying the running version leaves
    /// the rollback target alone.
    pub fn commit(&mut self, version: &str) {
        if self.current_version.as_deref() != Some(version) {
            self.previous_version = self.current_version.take();
        }
        self.current_version = Some(version.to_string());
    }
}

/// The single accessor for an environment's [`ReleaseState`]
#[derive(Debug, Clone)]
pub struct ReleaseStore {
    file: File,
    environment: String,
}

impl ReleaseStore {
    pub fn new(file: File, environment: &str) -> Self {
        Self {
            file,
            environment: environment.to_string(),
        }
    }

    /// Load the state, or a fresh idle one if nothing was persisted yet
    pub async fn load(&self) -> Result<ReleaseState, OpsError> {
        if !self.file.exists().await {
            debug!("No release state for {}", self.environment);
            return Ok(ReleaseState::new(&self.environment));
        }
        self.file.read_json().await
    }

    pub async fn save(&self, state: &ReleaseState) -> Result<(), OpsError> {
        let mut state = state.clone();
        state.updated_at = Utc::now();
        self.file.write_json(&state).await
    }
}
