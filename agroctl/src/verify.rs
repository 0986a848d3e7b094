//! Post-deployment verification
//!
//! Checks against a running deployment: health, the main API endpoints,
//! database access through the API, a create/read/delete round on products,
//! response time of the home page, the Prometheus metrics, and optionally pod
//! readiness in the namespace. Results are summarised and saved as a JSON
//! report.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::{Serialize, Serializer};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::console;
use crate::errors::OpsError;
use crate::filesys::file::File;
use crate::http::client::HttpClient;
use crate::process::{CommandRunner, CommandSpec};

/// Endpoints expected to answer 200, with display names
pub const API_ENDPOINTS: &[(&str, &str)] = &[
    ("/api/v1/products", "Products API"),
    ("/api/v1/stats", "Statistics API"),
    ("/metrics", "Metrics endpoint"),
];

/// Metric families the application must export
pub const REQUIRED_METRICS: &[&str] = &[
    "api_requests_total",
    "api_request_duration_seconds",
    "python_info",
];

/// Slowest acceptable response of the home page
pub const PERFORMANCE_THRESHOLD: Duration = Duration::from_secs(2);

const PRODUCTS: &str = "/api/v1/products";

/// Result of one check
#[derive(Debug, Clone, Serialize)]
pub struct VerificationResult {
    #[serde(rename = "test_name")]
    pub name: String,
    pub success: bool,
    pub message: String,
    #[serde(rename = "response_time", serialize_with = "as_seconds")]
    pub latency: Option<Duration>,
    pub details: Option<Value>,
}

fn as_seconds<S: Serializer>(latency: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
    match latency {
        Some(latency) => serializer.serialize_some(&latency.as_secs_f64()),
        None => serializer.serialize_none(),
    }
}

impl VerificationResult {
    fn passed(name: &str, message: impl Into<String>, latency: Option<Duration>) -> Self {
        Self {
            name: name.to_string(),
            success: true,
            message: message.into(),
            latency,
            details: None,
        }
    }

    fn failed(name: &str, message: impl Into<String>, latency: Option<Duration>) -> Self {
        Self {
            name: name.to_string(),
            success: false,
            message: message.into(),
            latency,
            details: None,
        }
    }

    fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// One status line, e.g. `[PASS] Health Check (0.012s): Application is healthy`
    pub fn line(&self) -> String {
        let mark = if self.success {
            "[PASS]".green().bold()
        } else {
            "[FAIL]".red().bold()
        };
        let timing = self
            .latency
            .map(|l| format!(" ({:.3}s)", l.as_secs_f64()))
            .unwrap_or_default();
        format!("{} {}{}: {}", mark, self.name, timing, self.message)
    }
}

/// Runs the checks against one base URL
pub struct Verifier {
    client: HttpClient,
}

impl Verifier {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, OpsError> {
        Ok(Self {
            client: HttpClient::new(base_url, timeout)?,
        })
    }

    pub async fn check_health(&self) -> VerificationResult {
        let name = "Health Check";
        match self.client.get("/health").await {
            Ok(response) if response.status == 200 => {
                let result =
                    VerificationResult::passed(name, "Application is healthy", Some(response.latency));
                match response.json() {
                    Some(body) => result.with_details(body),
                    None => result,
                }
            }
            Ok(response) => VerificationResult::failed(
                name,
                format!("Health check failed with status {}", response.status),
                Some(response.latency),
            ),
            Err(e) => VerificationResult::failed(name, format!("Health check failed: {}", e), None),
        }
    }

    pub async fn check_endpoint(&self, path: &str, name: &str) -> VerificationResult {
        match self.client.get(path).await {
            Ok(response) if response.status == 200 => {
                VerificationResult::passed(name, "Endpoint responding correctly", Some(response.latency))
            }
            Ok(response) => VerificationResult::failed(
                name,
                format!("Endpoint returned status {}", response.status),
                Some(response.latency),
            ),
            Err(e) => VerificationResult::failed(name, format!("Endpoint failed: {}", e), None),
        }
    }

    /// The product listing needs the database
    pub async fn check_database(&self) -> VerificationResult {
        let name = "Database Connectivity";
        match self.client.get(PRODUCTS).await {
            Ok(response) if response.status == 200 => match response.json() {
                Some(Value::Array(products)) => VerificationResult::passed(
                    name,
                    format!("Database accessible, {} products found", products.len()),
                    Some(response.latency),
                )
                .with_details(json!({ "product_count": products.len() })),
                _ => VerificationResult::failed(
                    name,
                    "Product listing is not a JSON array",
                    Some(response.latency),
                ),
            },
            Ok(response) => VerificationResult::failed(
                name,
                format!("Database check failed with status {}", response.status),
                Some(response.latency),
            ),
            Err(e) => VerificationResult::failed(name, format!("Database check failed: {}", e), None),
        }
    }

    /// Create a throwaway product, read it back, then delete it
    pub async fn check_api_functionality(&self) -> Vec<VerificationResult> {
        let create = "API Create Product";
        let product = json!({
            "name": "Verification Test Product",
            "price": 99.99,
            "category": "Test",
            "stock": 1
        });

        let response = match self.client.post_json(PRODUCTS, &product).await {
            Ok(response) => response,
            Err(e) => {
                return vec![VerificationResult::failed(
                    create,
                    format!("Product creation failed: {}", e),
                    None,
                )]
            }
        };
        if response.status != 201 {
            return vec![VerificationResult::failed(
                create,
                format!("Product creation failed with status {}", response.status),
                Some(response.latency),
            )];
        }

        let id = response
            .json()
            .and_then(|body| body.get("id").cloned())
            .filter(|id| !id.is_null());
        let mut results = vec![VerificationResult::passed(
            create,
            "Product creation successful",
            Some(response.latency),
        )
        .with_details(json!({ "product_id": id }))];

        let Some(id) = id else {
            return results;
        };
        let id = match id {
            Value::String(s) => s,
            other => other.to_string(),
        };
        let item = format!("{}/{}", PRODUCTS, id);

        let fetch = "API Get Product";
        results.push(match self.client.get(&item).await {
            Ok(response) if response.status == 200 => {
                VerificationResult::passed(fetch, "Product retrieval successful", Some(response.latency))
            }
            Ok(response) => VerificationResult::failed(
                fetch,
                format!("Product retrieval failed with status {}", response.status),
                Some(response.latency),
            ),
            Err(e) => VerificationResult::failed(fetch, format!("Product retrieval failed: {}", e), None),
        });

        // Not a check of its own; a leftover test product is harmless.
        match self.client.delete(&item).await {
            Ok(response) => debug!("Deleted test product {}: {}", id, response.status),
            Err(e) => debug!("Could not delete test product {}: {}", id, e),
        }

        results
    }

    /// The home page must answer within [`PERFORMANCE_THRESHOLD`]
    pub async fn check_performance(&self) -> VerificationResult {
        let name = "Performance Check";
        match self.client.get("/").await {
            Ok(response) if response.status == 200 => {
                if response.latency < PERFORMANCE_THRESHOLD {
                    VerificationResult::passed(name, "Response time acceptable", Some(response.latency))
                } else {
                    VerificationResult::failed(
                        name,
                        format!("Response time too slow ({:.3}s)", response.latency.as_secs_f64()),
                        Some(response.latency),
                    )
                }
            }
            Ok(response) => VerificationResult::failed(
                name,
                format!("Performance check failed with status {}", response.status),
                Some(response.latency),
            ),
            Err(e) => VerificationResult::failed(name, format!("Performance check failed: {}", e), None),
        }
    }

    /// `/metrics` must export every family in [`REQUIRED_METRICS`]
    pub async fn check_metrics(&self) -> VerificationResult {
        let name = "Prometheus Metrics";
        match self.client.get("/metrics").await {
            Ok(response) if response.status == 200 => {
                let missing: Vec<&str> = REQUIRED_METRICS
                    .iter()
                    .copied()
                    .filter(|metric| !response.body.contains(metric))
                    .collect();
                if missing.is_empty() {
                    VerificationResult::passed(name, "All required metrics available", Some(response.latency))
                } else {
                    VerificationResult::failed(
                        name,
                        format!("Missing metrics: {}", missing.join(", ")),
                        Some(response.latency),
                    )
                }
            }
            Ok(response) => VerificationResult::failed(
                name,
                format!("Metrics endpoint failed with status {}", response.status),
                Some(response.latency),
            ),
            Err(e) => VerificationResult::failed(name, format!("Metrics check failed: {}", e), None),
        }
    }

    /// Every HTTP check, in reporting order
    pub async fn run(&self) -> Vec<VerificationResult> {
        let mut results = vec![self.check_health().await];
        for (path, name) in API_ENDPOINTS {
            results.push(self.check_endpoint(path, name).await);
        }
        results.push(self.check_database().await);
        results.extend(self.check_api_functionality().await);
        results.push(self.check_performance().await);
        results.push(self.check_metrics().await);
        results
    }
}

/// Pods matching `selector` in `namespace` must all be ready
pub async fn check_pods(
    runner: &dyn CommandRunner,
    namespace: &str,
    selector: &str,
) -> VerificationResult {
    let name = "Kubernetes Pods";
    let spec = CommandSpec::new(
        "kubectl",
        ["get", "pods", "-n", namespace, "-l", selector, "-o", "json"],
    );
    let output = match runner.run_checked(spec).await {
        Ok(output) => output,
        Err(e) => return VerificationResult::failed(name, format!("kubectl failed: {}", e), None),
    };
    let pods: Value = match serde_json::from_slice(&output.stdout) {
        Ok(pods) => pods,
        Err(e) => return VerificationResult::failed(name, format!("Unreadable pod list: {}", e), None),
    };
    pod_readiness(&pods)
}

/// Summarise a `kubectl get pods -o json` listing
pub fn pod_readiness(pods: &Value) -> VerificationResult {
    let name = "Kubernetes Pods";
    let items = pods
        .get("items")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    if items.is_empty() {
        return VerificationResult::failed(name, "No pods found", None);
    }

    let ready = items.iter().filter(|pod| pod_is_ready(pod)).count();
    let message = format!("{}/{} pods ready", ready, items.len());
    let details = json!({ "total_pods": items.len(), "ready_pods": ready });
    if ready == items.len() {
        VerificationResult::passed(name, message, None).with_details(details)
    } else {
        VerificationResult::failed(name, message, None).with_details(details)
    }
}

fn pod_is_ready(pod: &Value) -> bool {
    pod.pointer("/status/conditions")
        .and_then(Value::as_array)
        .map(|conditions| {
            conditions.iter().any(|c| {
                c.get("type").and_then(Value::as_str) == Some("Ready")
                    && c.get("status").and_then(Value::as_str) == Some("True")
            })
        })
        .unwrap_or(false)
}

/// Totals over a verification run, saved as the JSON report
#[derive(Debug, Clone, Serialize)]
pub struct VerificationSummary {
    pub timestamp: DateTime<Utc>,
    pub total_tests: usize,
    pub passed_tests: usize,
    pub failed_tests: usize,
    pub success_rate: f64,
    pub overall_status: String,
    pub test_results: Vec<VerificationResult>,
}

impl VerificationSummary {
    pub fn new(results: Vec<VerificationResult>) -> Self {
        let total_tests = results.len();
        let passed_tests = results.iter().filter(|r| r.success).count();
        let failed_tests = total_tests - passed_tests;
        Self {
            timestamp: Utc::now(),
            total_tests,
            passed_tests,
            failed_tests,
            success_rate: if total_tests == 0 {
                0.0
            } else {
                passed_tests as f64 / total_tests as f64
            },
            overall_status: if failed_tests == 0 { "PASS" } else { "FAIL" }.to_string(),
            test_results: results,
        }
    }

    pub fn passed(&self) -> bool {
        self.failed_tests == 0
    }

    /// Print totals and the failed checks
    pub fn print(&self) {
        console::info(format!("Total tests: {}", self.total_tests));
        console::info(format!("Passed: {}", self.passed_tests));
        console::info(format!("Failed: {}", self.failed_tests));
        console::info(format!("Success rate: {:.1}%", self.success_rate * 100.0));
        for result in self.test_results.iter().filter(|r| !r.success) {
            console::error(format!("{}: {}", result.name, result.message));
        }
    }

    /// Write `verification_report_<unix time>.json` into `dir`
    pub async fn save(&self, dir: &Path) -> Result<PathBuf, OpsError> {
        let path = dir.join(format!("verification_report_{}.json", self.timestamp.timestamp()));
        File::new(&path).write_json(self).await?;
        info!("Verification report written to {}", path.display());
        Ok(path)
    }
}
