//! Target adapters
//!
//! A target is where application state lives: the local project directory or
//! a Kubernetes namespace. Both expose the same three capabilities so the
//! backup manager never branches on which one it is talking to.

pub mod cluster;
pub mod local;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::archive::Payload;
use crate::errors::OpsError;

pub use cluster::{ClusterAdapter, ClusterOptions};
pub use local::LocalAdapter;

/// Which execution environment an adapter or archive belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Local,
    Cluster,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Local => "local",
            TargetKind::Cluster => "cluster",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for TargetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(TargetKind::Local),
            "cluster" | "k8s" | "kubernetes" => Ok(TargetKind::Cluster),
            _ => Err(format!("Invalid target kind: {}", s)),
        }
    }
}

/// What happened to one collected item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Captured; number of payload entries it produced
    Present { entries: usize },
    /// Optional item that does not exist on the target
    Absent,
    /// The item exists but could not be read
    Failed(String),
}

/// Per-item result of a collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemReport {
    pub name: String,
    pub outcome: ItemOutcome,
}

/// Result of [`TargetAdapter::collect_state`]
#[derive(Debug, Clone, Default)]
pub struct CollectReport {
    pub payload: Payload,
    pub items: Vec<ItemReport>,

    /// Payload paths whose source file is executable
    pub executables: Vec<String>,
}

impl CollectReport {
    pub fn record(&mut self, name: impl Into<String>, outcome: ItemOutcome) {
        self.items.push(ItemReport {
            name: name.into(),
            outcome,
        });
    }

    /// Items that exist but could not be captured
    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.items.iter().filter_map(|item| match &item.outcome {
            ItemOutcome::Failed(reason) => Some((item.name.as_str(), reason.as_str())),
            _ => None,
        })
    }
}

/// Result of [`TargetAdapter::apply_state`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: Vec<String>,
    pub skipped: Vec<String>,
}

/// Output of a command run inside the workload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub exit_code: i32,
}

/// Uniform capabilities over one execution environment
#[async_trait]
pub trait TargetAdapter: Send + Sync {
    /// Which kind of target this adapter drives
    fn kind(&self) -> TargetKind;

    /// Snapshot the target's state. Missing optional items are reported, not
    /// raised.
    async fn collect_state(&self) -> Result<CollectReport, OpsError>;

    /// Write a snapshot back. Stops at the first failure; not atomic.
    async fn apply_state(&self, payload: &Payload) -> Result<ApplyReport, OpsError>;

    /// Restore the executable bit on applied paths. Targets without file
    /// modes ignore it.
    async fn mark_executable(&self, _paths: &[String]) -> Result<(), OpsError> {
        Ok(())
    }

    /// Run a command inside the running workload
    async fn exec_in_workload(
        &self,
        command: &[&str],
        stdin: Option<Vec<u8>>,
    ) -> Result<ExecOutput, OpsError>;
}
