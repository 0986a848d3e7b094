//! Cluster adapter tests against a scripted kubectl

mod common;

use std::sync::Arc;

use serde_json::{json, Value};

use agroctl::archive::Payload;
use agroctl::errors::OpsError;
use agroctl::target::cluster::{resource_entry, REDACTED};
use agroctl::target::{ClusterAdapter, ClusterOptions, ItemOutcome, TargetAdapter};

use common::{fail, ok, FakeRunner};

fn list(items: Value) -> Vec<u8> {
    serde_json::to_vec(&json!({"apiVersion": "v1", "kind": "List", "items": items})).unwrap()
}

fn adapter(runner: Arc<FakeRunner>) -> ClusterAdapter {
    ClusterAdapter::new(ClusterOptions::default(), runner)
}

fn outcome<'a>(report: &'a agroctl::target::CollectReport, name: &str) -> &'a ItemOutcome {
    &report
        .items
        .iter()
        .find(|item| item.name == name)
        .unwrap_or_else(|| panic!("no item {}", name))
        .outcome
}

#[tokio::test]
async fn test_collect_tolerates_missing_kinds() {
    let runner = Arc::new(FakeRunner::new());
    runner
        .on(
            &["kubectl", "get", "configmaps"],
            ok(list(json!([{
                "kind": "ConfigMap",
                "metadata": {"name": "agro-config", "uid": "abc", "resourceVersion": "7"},
                "data": {"FLASK_ENV": "production"}
            }]))),
        )
        .on(
            &["kubectl", "get", "secrets"],
            ok(list(json!([{
                "kind": "Secret",
                "metadata": {"name": "agro-secrets"},
                "data": {"ADMIN_PASSWORD": "YWRtaW4xMjM="}
            }]))),
        )
        .on(
            &["kubectl", "get", "persistentvolumeclaims"],
            fail(1, "No resources found in agro-shop namespace. (NotFound)"),
        )
        .on(&["kubectl", "get", "services"], ok(list(json!([]))))
        .on(
            &["kubectl", "get", "deployments"],
            ok(list(json!([{
                "kind": "Deployment",
                "metadata": {"name": "agro-shop", "generation": 4},
                "spec": {"replicas": 2},
                "status": {"readyReplicas": 2}
            }]))),
        )
        .on(
            &["kubectl", "get", "horizontalpodautoscalers"],
            fail(1, "Error from server (Forbidden): access denied"),
        )
        .on(
            &["kubectl", "get", "ingresses"],
            fail(1, "error: the server doesn't have a resource type \"ingresses\""),
        );

    let report = adapter(runner).collect_state().await.unwrap();

    assert_eq!(outcome(&report, "configmaps"), &ItemOutcome::Present { entries: 1 });
    assert_eq!(outcome(&report, "persistentvolumeclaims"), &ItemOutcome::Absent);
    assert_eq!(outcome(&report, "services"), &ItemOutcome::Absent);
    assert_eq!(outcome(&report, "ingresses"), &ItemOutcome::Absent);
    assert!(matches!(
        outcome(&report, "horizontalpodautoscalers"),
        ItemOutcome::Failed(reason) if reason.contains("Forbidden")
    ));

    let keys: Vec<&str> = report.payload.keys().map(String::as_str).collect();
    assert_eq!(
        keys,
        [
            "kubernetes/configmaps.json",
            "kubernetes/deployments.json",
            "kubernetes/secrets.json"
        ]
    );

    let secrets: Value = serde_json::from_slice(&report.payload[&resource_entry("secrets")]).unwrap();
    assert_eq!(secrets["items"][0]["data"]["ADMIN_PASSWORD"], REDACTED);

    let configmaps: Value =
        serde_json::from_slice(&report.payload[&resource_entry("configmaps")]).unwrap();
    assert!(configmaps["items"][0]["metadata"].get("uid").is_none());
    assert_eq!(configmaps["items"][0]["data"]["FLASK_ENV"], "production");

    let deployments: Value =
        serde_json::from_slice(&report.payload[&resource_entry("deployments")]).unwrap();
    assert!(deployments["items"][0].get("status").is_none());
}

#[tokio::test]
async fn test_apply_in_order_and_skip_secrets() {
    let runner = Arc::new(FakeRunner::new());
    runner
        .on(&["kubectl", "get", "namespace"], ok(""))
        .on(&["kubectl", "apply"], ok("configured"))
        .on(&["kubectl", "wait"], ok("condition met"));

    let mut payload = Payload::new();
    payload.insert(resource_entry("deployments"), b"{\"kind\":\"List\"}".to_vec());
    payload.insert(resource_entry("configmaps"), b"{\"kind\":\"List\"}".to_vec());
    payload.insert(resource_entry("secrets"), b"{\"kind\":\"List\"}".to_vec());

    let report = adapter(runner.clone()).apply_state(&payload).await.unwrap();

    assert_eq!(
        report.applied,
        [resource_entry("configmaps"), resource_entry("deployments")]
    );
    assert_eq!(report.skipped, [resource_entry("secrets")]);

    let lines = runner.lines();
    assert_eq!(lines[0], "kubectl get namespace agro-shop");
    assert_eq!(lines[1], "kubectl apply -f - -n agro-shop");
    assert_eq!(lines[2], "kubectl apply -f - -n agro-shop");
    assert!(lines[3].starts_with("kubectl wait --for=condition=ready pod -l app=agro-shop --timeout=300s"));
    assert_eq!(lines.len(), 4);
}

#[tokio::test]
async fn test_apply_stops_at_first_failure() {
    let runner = Arc::new(FakeRunner::new());
    runner
        .on(&["kubectl", "get", "namespace"], ok(""))
        .on(&["kubectl", "apply"], fail(1, "error validating data"));

    let mut payload = Payload::new();
    payload.insert(resource_entry("configmaps"), b"{}".to_vec());
    payload.insert(resource_entry("services"), b"{}".to_vec());

    let result = adapter(runner.clone()).apply_state(&payload).await;

    assert!(matches!(result, Err(OpsError::CommandFailed { code: 1, .. })));
    let applies = runner
        .lines()
        .into_iter()
        .filter(|l| l.starts_with("kubectl apply"))
        .count();
    assert_eq!(applies, 1);
}

#[tokio::test]
async fn test_missing_namespace_is_created() {
    let runner = Arc::new(FakeRunner::new());
    runner
        .on(&["kubectl", "get", "namespace"], fail(1, "namespaces \"agro-shop\" not found"))
        .on(&["kubectl", "create", "namespace"], ok("created"));

    let report = adapter(runner.clone()).apply_state(&Payload::new()).await.unwrap();

    assert!(report.applied.is_empty());
    assert!(runner.lines().contains(&"kubectl create namespace agro-shop".to_string()));
}

#[tokio::test]
async fn test_exec_uses_first_running_pod_by_name() {
    let runner = Arc::new(FakeRunner::new());
    runner
        .on(
            &["kubectl", "get", "pods"],
            ok(list(json!([
                {"metadata": {"name": "agro-shop-5d8f-xk2"}, "status": {"phase": "Running"}},
                {"metadata": {"name": "agro-shop-5d8f-ab7"}, "status": {"phase": "Running"}},
                {"metadata": {"name": "agro-shop-5d8f-aa1"}, "status": {"phase": "Pending"}}
            ]))),
        )
        .on(&["kubectl", "exec"], ok("BEGIN TRANSACTION;"));

    let output = adapter(runner.clone())
        .exec_in_workload(&["sqlite3", "/app/agro.db", ".dump"], None)
        .await
        .unwrap();

    assert_eq!(output.exit_code, 0);
    assert_eq!(output.stdout, b"BEGIN TRANSACTION;");
    assert!(runner
        .lines()
        .contains(&"kubectl exec agro-shop-5d8f-ab7 -n agro-shop -- sqlite3 /app/agro.db .dump".to_string()));
}

#[tokio::test]
async fn test_exec_without_running_pods() {
    let runner = Arc::new(FakeRunner::new());
    runner.on(
        &["kubectl", "get", "pods"],
        ok(list(json!([
            {"metadata": {"name": "agro-shop-5d8f-aa1"}, "status": {"phase": "Pending"}}
        ]))),
    );

    let result = adapter(runner).exec_in_workload(&["true"], None).await;

    assert!(matches!(
        result,
        Err(OpsError::NoWorkloadAvailable { selector }) if selector == "app=agro-shop"
    ));
}

#[tokio::test]
async fn test_restore_into_other_namespace() {
    let source = Arc::new(FakeRunner::new());
    source.on(
        &["kubectl", "get", "configmaps"],
        ok(list(json!([{
            "kind": "ConfigMap",
            "metadata": {"name": "agro-config", "namespace": "agro-shop"},
            "data": {"FLASK_ENV": "production"}
        }]))),
    );
    let report = adapter(source).collect_state().await.unwrap();

    let target = Arc::new(FakeRunner::new());
    target
        .on(&["kubectl", "get", "namespace"], ok(""))
        .on(&["kubectl", "apply"], ok("created"));
    let staging = ClusterAdapter::new(
        ClusterOptions {
            namespace: "agro-staging".to_string(),
            ..ClusterOptions::default()
        },
        target.clone(),
    );
    staging.apply_state(&report.payload).await.unwrap();

    let apply = target
        .calls()
        .into_iter()
        .find(|c| c.args.first().map(String::as_str) == Some("apply"))
        .unwrap();
    assert_eq!(apply.display(), "kubectl apply -f - -n agro-staging");
    let applied: Value = serde_json::from_slice(apply.stdin.as_deref().unwrap()).unwrap();
    assert_eq!(applied["items"][0]["metadata"]["name"], "agro-config");
    assert!(applied["items"][0]["metadata"].get("namespace").is_none());
}
