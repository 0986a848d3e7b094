//! Kubernetes namespace target
//!
//! Resources are exported with `kubectl get -o json`, stripped of
//! server-managed fields, and re-applied with `kubectl apply` so a restore is
//! create-or-update rather than delete-then-create.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::archive::Payload;
use crate::errors::OpsError;
use crate::process::{CommandRunner, CommandSpec};
use crate::target::{ApplyReport, CollectReport, ExecOutput, ItemOutcome, TargetAdapter, TargetKind};

/// Resource kinds captured from the namespace, in apply order
pub const RESOURCE_KINDS: &[&str] = &[
    "configmaps",
    "secrets",
    "persistentvolumeclaims",
    "services",
    "deployments",
    "horizontalpodautoscalers",
    "ingresses",
];

/// Payload directory holding exported resources
pub const RESOURCE_DIR: &str = "kubernetes";

/// Placeholder written over every secret value
pub const REDACTED: &str = "REDACTED";

const SERVER_MANAGED_METADATA: &[&str] = &[
    "uid",
    "resourceVersion",
    "creationTimestamp",
    "managedFields",
    "generation",
    "selfLink",
];

/// Cluster adapter options
#[derive(Debug, Clone)]
pub struct ClusterOptions {
    /// Namespace holding the application
    pub namespace: String,

    /// Label selector of the application pods
    pub selector: String,

    /// How long to wait for pods to become ready after a restore
    pub ready_timeout: Duration,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            namespace: "agro-shop".to_string(),
            selector: "app=agro-shop".to_string(),
            ready_timeout: Duration::from_secs(300),
        }
    }
}

/// Adapter over one Kubernetes namespace, driven through `kubectl`
pub struct ClusterAdapter {
    options: ClusterOptions,
    runner: Arc<dyn CommandRunner>,
}

impl ClusterAdapter {
    pub fn new(options: ClusterOptions, runner: Arc<dyn CommandRunner>) -> Self {
        Self { options, runner }
    }

    fn kubectl<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut all: Vec<String> = args.into_iter().map(Into::into).collect();
        all.push("-n".to_string());
        all.push(self.options.namespace.clone());
        CommandSpec::new("kubectl", all)
    }

    async fn collect_kind(&self, kind: &str, payload: &mut Payload) -> Result<ItemOutcome, OpsError> {
        let output = self
            .runner
            .run(self.kubectl(["get", kind, "-o", "json"]))
            .await?;

        if !output.success() {
            let stderr = output.stderr.trim();
            if is_not_found(stderr) {
                return Ok(ItemOutcome::Absent);
            }
            return Ok(ItemOutcome::Failed(stderr.to_string()));
        }

        let list: Value = serde_json::from_slice(&output.stdout)?;
        let mut items = list
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if items.is_empty() {
            return Ok(ItemOutcome::Absent);
        }

        for item in items.iter_mut() {
            sanitize_resource(item, kind == "secrets");
        }
        let count = items.len();
        let exported = json!({
            "apiVersion": "v1",
            "kind": "List",
            "items": items,
        });
        payload.insert(resource_entry(kind), serde_json::to_vec_pretty(&exported)?);
        Ok(ItemOutcome::Present { entries: count })
    }

    async fn ensure_namespace(&self) -> Result<(), OpsError> {
        let exists = self
            .runner
            .run(CommandSpec::new(
                "kubectl",
                ["get", "namespace", self.options.namespace.as_str()],
            ))
            .await?
            .success();
        if !exists {
            info!("Creating namespace {}", self.options.namespace);
            self.runner
                .run_checked(CommandSpec::new(
                    "kubectl",
                    ["create", "namespace", self.options.namespace.as_str()],
                ))
                .await?;
        }
        Ok(())
    }

    async fn wait_for_ready(&self) -> Result<(), OpsError> {
        info!(
            "Waiting up to {}s for pods matching {} to become ready",
            self.options.ready_timeout.as_secs(),
            self.options.selector
        );
        self.runner
            .run_checked(self.kubectl([
                "wait".to_string(),
                "--for=condition=ready".to_string(),
                "pod".to_string(),
                "-l".to_string(),
                self.options.selector.clone(),
                format!("--timeout={}s", self.options.ready_timeout.as_secs()),
            ]))
            .await?;
        Ok(())
    }

    async fn first_running_pod(&self) -> Result<String, OpsError> {
        let output = self
            .runner
            .run_checked(self.kubectl([
                "get",
                "pods",
                "-l",
                self.options.selector.as_str(),
                "-o",
                "json",
            ]))
            .await?;
        let pods: Value = serde_json::from_slice(&output.stdout)?;
        select_running_pod(&pods).ok_or_else(|| OpsError::NoWorkloadAvailable {
            selector: self.options.selector.clone(),
        })
    }
}

#[async_trait]
impl TargetAdapter for ClusterAdapter {
    fn kind(&self) -> TargetKind {
        TargetKind::Cluster
    }

    async fn collect_state(&self) -> Result<CollectReport, OpsError> {
        info!("Collecting cluster state from namespace {}", self.options.namespace);
        let mut report = CollectReport::default();

        for kind in RESOURCE_KINDS {
            let outcome = match self.collect_kind(kind, &mut report.payload).await {
                Ok(outcome) => outcome,
                Err(e) => ItemOutcome::Failed(e.to_string()),
            };
            match &outcome {
                ItemOutcome::Present { entries } => debug!("Exported {} {}", entries, kind),
                ItemOutcome::Absent => warn!("No {} in namespace {}", kind, self.options.namespace),
                ItemOutcome::Failed(reason) => warn!("Failed to export {}: {}", kind, reason),
            }
            report.record(*kind, outcome);
        }

        Ok(report)
    }

    async fn apply_state(&self, payload: &Payload) -> Result<ApplyReport, OpsError> {
        self.ensure_namespace().await?;
        let mut report = ApplyReport::default();

        // Known kinds first in dependency order, then anything else exported
        // under the resource directory.
        let mut entries: Vec<&String> = RESOURCE_KINDS
            .iter()
            .map(|kind| resource_entry(kind))
            .filter_map(|name| payload.get_key_value(&name).map(|(k, _)| k))
            .collect();
        for name in payload.keys() {
            if name.starts_with(&format!("{}/", RESOURCE_DIR)) && !entries.contains(&name) {
                entries.push(name);
            }
        }

        for name in entries {
            if name == &resource_entry("secrets") {
                warn!("Skipping {}: secret values were redacted at backup time", name);
                report.skipped.push(name.clone());
                continue;
            }
            info!("Applying {}", name);
            self.runner
                .run_checked(self.kubectl(["apply", "-f", "-"]).stdin(payload[name].clone()))
                .await?;
            report.applied.push(name.clone());
        }

        if report.applied.contains(&resource_entry("deployments")) {
            self.wait_for_ready().await?;
        }

        Ok(report)
    }

    async fn exec_in_workload(
        &self,
        command: &[&str],
        stdin: Option<Vec<u8>>,
    ) -> Result<ExecOutput, OpsError> {
        let pod = self.first_running_pod().await?;
        debug!("Executing in pod {}", pod);

        let mut args = vec!["exec".to_string()];
        if stdin.is_some() {
            args.push("-i".to_string());
        }
        args.push(pod);
        args.push("-n".to_string());
        args.push(self.options.namespace.clone());
        args.push("--".to_string());
        args.extend(command.iter().map(|s| s.to_string()));

        let mut spec = CommandSpec::new("kubectl", args);
        if let Some(input) = stdin {
            spec = spec.stdin(input);
        }
        let output = self.runner.run(spec).await?;
        if !output.success() {
            warn!("kubectl exec exited with {}: {}", output.code, output.stderr.trim());
        }
        Ok(ExecOutput {
            stdout: output.stdout,
            exit_code: output.code,
        })
    }
}

/// Payload entry name for a resource kind
pub fn resource_entry(kind: &str) -> String {
    format!("{}/{}.json", RESOURCE_DIR, kind)
}

/// First `Running` pod by name in a `kubectl get pods -o json` listing
pub fn select_running_pod(pods: &Value) -> Option<String> {
    let mut names: Vec<String> = pods
        .get("items")
        .and_then(Value::as_array)?
        .iter()
        .filter(|pod| pod.pointer("/status/phase").and_then(Value::as_str) == Some("Running"))
        .filter_map(|pod| pod.pointer("/metadata/name").and_then(Value::as_str))
        .map(str::to_string)
        .collect();
    names.sort();
    names.into_iter().next()
}

/// Drop fields the API server owns; blank out secret values
pub fn sanitize_resource(item: &mut Value, redact: bool) {
    let Some(obj) = item.as_object_mut() else {
        return;
    };
    obj.remove("status");

    if let Some(meta) = obj.get_mut("metadata").and_then(Value::as_object_mut) {
        for field in SERVER_MANAGED_METADATA {
            meta.remove(*field);
        }
        // The restore namespace comes from `-n`; kubectl rejects a mismatch.
        meta.remove("namespace");
        if let Some(annotations) = meta.get_mut("annotations").and_then(Value::as_object_mut) {
            annotations.remove("kubectl.kubernetes.io/last-applied-configuration");
        }
    }

    // Allocated by the cluster; re-applying a stale one is rejected.
    if obj.get("kind").and_then(Value::as_str) == Some("Service") {
        if let Some(spec) = obj.get_mut("spec").and_then(Value::as_object_mut) {
            spec.remove("clusterIP");
            spec.remove("clusterIPs");
        }
    }

    if redact {
        for field in ["data", "stringData"] {
            if let Some(values) = obj.get_mut(field).and_then(Value::as_object_mut) {
                for value in values.values_mut() {
                    *value = Value::String(REDACTED.to_string());
                }
            }
        }
    }
}

fn is_not_found(stderr: &str) -> bool {
    stderr.contains("NotFound")
        || stderr.contains("not found")
        || stderr.contains("doesn't have a resource type")
}
