//! Rollback controller
//!
//! A rollback is an ordinary release of an earlier version.

use tracing::info;

use crate::console;
use crate::deploy::orchestrator::{ReleaseKind, ReleaseOrchestrator, ReleaseReport};
use crate::errors::OpsError;

/// Redeploy `explicit`, or the recorded previous version when none is given.
///
/// Fails with [`OpsError::NoPriorVersion`] before touching anything when
/// there is nothing to roll back to.
pub async fn rollback(
    orchestrator: &ReleaseOrchestrator,
    explicit: Option<&str>,
) -> Result<ReleaseReport, OpsError> {
    let target = match explicit {
        Some(version) => version.to_string(),
        None => orchestrator
            .state()
            .await?
            .previous_version
            .ok_or(OpsError::NoPriorVersion)?,
    };

    info!("Rolling back to {}", target);
    console::info(format!("Rolling back to version {}", target));
    orchestrator.run_release(&target, ReleaseKind::Rollback).await
}
