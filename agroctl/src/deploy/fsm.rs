//! Finite State Machine for release rollout

use serde::{Deserialize, Serialize};

use crate::errors::OpsError;

/// Release status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseStatus {
    /// Nothing deployed yet
    #[default]
    Idle,

    /// Pulling the artifact and replacing the workload
    Deploying,

    /// Polling the health endpoint
    HealthChecking,

    /// Health check passed
    Healthy,

    /// Rollout or health check failed
    Failed,

    /// A rollback release passed its health check
    RolledBack,
}

impl ReleaseStatus {
    /// A release is in flight in this state
    pub fn is_transient(&self) -> bool {
        matches!(self, ReleaseStatus::Deploying | ReleaseStatus::HealthChecking)
    }
}

impl std::fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ReleaseStatus::Idle => "idle",
            ReleaseStatus::Deploying => "deploying",
            ReleaseStatus::HealthChecking => "healthchecking",
            ReleaseStatus::Healthy => "healthy",
            ReleaseStatus::Failed => "failed",
            ReleaseStatus::RolledBack => "rolledback",
        };
        f.write_str(name)
    }
}

/// Release event
#[derive(Debug, Clone)]
pub enum ReleaseEvent {
    /// Start a release
    Deploy,

    /// New workload started
    Started,

    /// Pull, stop or start failed
    DeployFailed(String),

    /// Health endpoint answered
    HealthPassed,

    /// All health attempts used up
    HealthExhausted(String),

    /// The healthy release was a rollback
    RolledBack,
}

/// Release FSM
#[derive(Debug, Clone, Default)]
pub struct ReleaseFsm {
    status: ReleaseStatus,
    error: Option<String>,
}

impl ReleaseFsm {
    /// Create a new FSM in idle state
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue from a persisted status. A release that was in flight when
    /// the previous invocation ended counts as failed.
    pub fn resume(status: ReleaseStatus, error: Option<String>) -> Self {
        if status.is_transient() {
            return Self {
                status: ReleaseStatus::Failed,
                error: Some(format!("release interrupted while {}", status)),
            };
        }
        Self { status, error }
    }

    pub fn status(&self) -> ReleaseStatus {
        self.status
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: ReleaseEvent) -> Result<ReleaseStatus, OpsError> {
        let new_status = match (self.status, &event) {
            (
                ReleaseStatus::Idle
                | ReleaseStatus::Healthy
                | ReleaseStatus::Failed
                | ReleaseStatus::RolledBack,
                ReleaseEvent::Deploy,
            ) => {
                self.error = None;
                ReleaseStatus::Deploying
            }

            (ReleaseStatus::Deploying, ReleaseEvent::Started) => ReleaseStatus::HealthChecking,
            (ReleaseStatus::Deploying, ReleaseEvent::DeployFailed(err)) => {
                self.error = Some(err.clone());
                ReleaseStatus::Failed
            }

            (ReleaseStatus::HealthChecking, ReleaseEvent::HealthPassed) => ReleaseStatus::Healthy,
            (ReleaseStatus::HealthChecking, ReleaseEvent::HealthExhausted(err)) => {
                self.error = Some(err.clone());
                ReleaseStatus::Failed
            }

            (ReleaseStatus::Healthy, ReleaseEvent::RolledBack) => ReleaseStatus::RolledBack,

            (status, event) => {
                return Err(OpsError::InvalidTransition(format!(
                    "{:?} -> {:?}",
                    status, event
                )));
            }
        };

        self.status = new_status;
        Ok(new_status)
    }
}
