//! Release orchestrator
//!
//! Drives one release through the [`ReleaseFsm`]: pull, stop, start, then
//! poll the health probe. The persisted [`ReleaseState`] is written after every
//! transition; versions are only committed once the health check passes.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::console;
use crate::deploy::fsm::{ReleaseEvent, ReleaseFsm, ReleaseStatus};
use crate::deploy::health::HealthProbe;
use crate::deploy::rollback;
use crate::deploy::runtime::WorkloadRuntime;
use crate::errors::OpsError;
use crate::storage::release::{ReleaseState, ReleaseStore};

/// Lines of workload output captured when a release fails
pub const LOG_TAIL: usize = 100;

/// What happens when the health check is exhausted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Report the failure and leave the workload for manual intervention
    #[default]
    Manual,

    /// Redeploy the last known-good version
    Rollback,
}

/// Health check attempts and the fixed delay between them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReleaseKind {
    Forward,
    Rollback,
}

/// Outcome of a release that reached a healthy workload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseReport {
    /// Version now running
    pub version: String,

    pub status: ReleaseStatus,

    /// Health check attempts used
    pub attempts: u32,

    /// Set when the requested version failed and was rolled back
    pub rolled_back_from: Option<String>,
}

/// Deploys versions of the application through one runtime
pub struct ReleaseOrchestrator {
    runtime: Arc<dyn WorkloadRuntime>,
    probe: Arc<dyn HealthProbe>,
    store: ReleaseStore,
    health: HealthPolicy,
    failure_policy: FailurePolicy,
    cancel: CancellationToken,
}

impl ReleaseOrchestrator {
    pub fn new(
        runtime: Arc<dyn WorkloadRuntime>,
        probe: Arc<dyn HealthProbe>,
        store: ReleaseStore,
    ) -> Self {
        Self {
            runtime,
            probe,
            store,
            health: HealthPolicy::default(),
            failure_policy: FailurePolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_health_policy(mut self, health: HealthPolicy) -> Self {
        self.health = health;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Token checked between health check attempts
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Persisted release state of the environment
    pub async fn state(&self) -> Result<ReleaseState, OpsError> {
        self.store.load().await
    }

    /// Deploy `version`. With [`FailurePolicy::Rollback`] an exhausted health
    /// check redeploys the last known-good version and the report says so.
    pub async fn deploy(&self, version: &str) -> Result<ReleaseReport, OpsError> {
        let before = self.store.load().await?;

        match self.run_release(version, ReleaseKind::Forward).await {
            Err(failure @ OpsError::HealthCheckExhausted { .. })
                if self.failure_policy == FailurePolicy::Rollback =>
            {
                // A failed release never commits, so `current_version` is
                // still the last healthy one unless it was this version.
                let target = if before.current_version.as_deref() == Some(version) {
                    before.previous_version
                } else {
                    before.current_version
                };
                let Some(target) = target else {
                    console::error("No known-good version to roll back to");
                    return Err(failure);
                };

                console::warning(format!(
                    "Version {} failed its health check, rolling back to {}",
                    version, target
                ));
                let mut report = rollback::rollback(self, Some(&target)).await?;
                report.rolled_back_from = Some(version.to_string());
                Ok(report)
            }
            other => other,
        }
    }

    /// Redeploy an earlier version, see [`rollback::rollback`]
    pub async fn rollback(&self, version: Option<&str>) -> Result<ReleaseReport, OpsError> {
        rollback::rollback(self, version).await
    }

    pub(crate) async fn run_release(
        &self,
        version: &str,
        kind: ReleaseKind,
    ) -> Result<ReleaseReport, OpsError> {
        let mut state = self.store.load().await?;
        let mut fsm = ReleaseFsm::resume(state.status, state.last_error.clone());
        if fsm.status() != state.status {
            warn!(
                "Previous release of {} did not finish ({}), treating it as failed",
                state.target_version.as_deref().unwrap_or("unknown version"),
                state.status
            );
        }

        fsm.process(ReleaseEvent::Deploy)?;
        state.target_version = Some(version.to_string());
        self.persist(&mut state, &fsm).await?;
        console::info(format!(
            "Deploying version {} with {}",
            version,
            self.runtime.name()
        ));

        if let Err(e) = self.roll_out(version).await {
            error!("Rollout of {} failed: {}", version, e);
            fsm.process(ReleaseEvent::DeployFailed(e.to_string()))?;
            state.target_version = None;
            self.persist(&mut state, &fsm).await?;
            console::error(format!("Deployment of {} failed: {}", version, e));
            return Err(e);
        }

        fsm.process(ReleaseEvent::Started)?;
        self.persist(&mut state, &fsm).await?;

        match self.wait_healthy(version).await {
            Ok(attempts) => {
                fsm.process(ReleaseEvent::HealthPassed)?;
                state.commit(version);
                if kind == ReleaseKind::Rollback {
                    fsm.process(ReleaseEvent::RolledBack)?;
                }
                state.target_version = None;
                self.persist(&mut state, &fsm).await?;

                console::success(format!(
                    "Version {} is healthy after {} attempt(s)",
                    version, attempts
                ));
                Ok(ReleaseReport {
                    version: version.to_string(),
                    status: fsm.status(),
                    attempts,
                    rolled_back_from: None,
                })
            }
            Err(OpsError::HealthCheckExhausted {
                version: failed,
                attempts,
                ..
            }) => {
                let logs = self.capture_logs().await;
                fsm.process(ReleaseEvent::HealthExhausted(format!(
                    "health check failed after {} attempts",
                    attempts
                )))?;
                state.target_version = None;
                self.persist(&mut state, &fsm).await?;

                console::error(format!(
                    "Version {} failed its health check after {} attempts",
                    failed, attempts
                ));
                if let Some(logs) = &logs {
                    console::block("workload logs", logs);
                }
                Err(OpsError::HealthCheckExhausted {
                    version: failed,
                    attempts,
                    logs,
                })
            }
            Err(e) => {
                fsm.process(ReleaseEvent::HealthExhausted(e.to_string()))?;
                state.target_version = None;
                self.persist(&mut state, &fsm).await?;
                Err(e)
            }
        }
    }

    async fn roll_out(&self, version: &str) -> Result<(), OpsError> {
        self.runtime.pull(version).await?;
        console::info(format!("Artifact {} fetched", version));
        self.runtime.stop().await?;
        self.runtime.start(version).await?;
        console::info(format!("Workload started at {}", version));
        Ok(())
    }

    /// Number of the successful attempt
    async fn wait_healthy(&self, version: &str) -> Result<u32, OpsError> {
        let max_attempts = self.health.max_attempts.max(1);
        info!(
            "Checking health of {} every {:?}, {} attempts",
            self.probe.target(),
            self.health.delay,
            max_attempts
        );

        for attempt in 1..=max_attempts {
            if self.cancel.is_cancelled() {
                return Err(OpsError::Cancelled);
            }
            console::info(format!("Health check attempt {}/{}", attempt, max_attempts));
            match self.probe.check().await {
                Ok(()) => return Ok(attempt),
                Err(e) => debug!("Attempt {} failed: {}", attempt, e),
            }

            if attempt < max_attempts {
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(OpsError::Cancelled),
                    _ = tokio::time::sleep(self.health.delay) => {}
                }
            }
        }

        Err(OpsError::HealthCheckExhausted {
            version: version.to_string(),
            attempts: max_attempts,
            logs: None,
        })
    }

    async fn capture_logs(&self) -> Option<String> {
        match self.runtime.logs(LOG_TAIL).await {
            Ok(logs) if !logs.trim().is_empty() => Some(logs),
            Ok(_) => None,
            Err(e) => {
                warn!("Could not capture workload logs: {}", e);
                None
            }
        }
    }

    async fn persist(&self, state: &mut ReleaseState, fsm: &ReleaseFsm) -> Result<(), OpsError> {
        state.status = fsm.status();
        state.last_error = fsm.error().map(str::to_string);
        self.store.save(state).await
    }
}
