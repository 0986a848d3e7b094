//! Release rollout, health checking and rollback

pub mod fsm;
pub mod health;
pub mod orchestrator;
pub mod rollback;
pub mod runtime;

pub use fsm::{ReleaseEvent, ReleaseFsm, ReleaseStatus};
pub use health::{HealthProbe, HttpHealthProbe};
pub use orchestrator::{FailurePolicy, HealthPolicy, ReleaseOrchestrator, ReleaseReport};
pub use runtime::{DockerRuntime, KubernetesRuntime, WorkloadRuntime};
