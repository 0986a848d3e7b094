//! Health probe and deployment verification against an in-process HTTP app

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use agroctl::deploy::{HealthProbe, HttpHealthProbe};
use agroctl::errors::OpsError;
use agroctl::verify::{Verifier, VerificationSummary};

type Products = Arc<Mutex<Vec<Value>>>;

const METRICS: &str = "# TYPE api_requests_total counter\n\
api_requests_total{endpoint=\"/health\"} 3\n\
api_request_duration_seconds_sum 0.12\n\
python_info{version=\"3.11.4\"} 1\n";

/// Serve `app` on an ephemeral port and return its base URL
async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn list_products(State(products): State<Products>) -> Json<Value> {
    Json(Value::Array(products.lock().unwrap().clone()))
}

async fn create_product(
    State(products): State<Products>,
    Json(mut product): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let mut products = products.lock().unwrap();
    let id = products.iter().filter_map(|p| p["id"].as_u64()).max().unwrap_or(0) + 1;
    product["id"] = json!(id);
    products.push(product.clone());
    (StatusCode::CREATED, Json(product))
}

async fn get_product(
    State(products): State<Products>,
    Path(id): Path<u64>,
) -> Result<Json<Value>, StatusCode> {
    products
        .lock()
        .unwrap()
        .iter()
        .find(|p| p["id"].as_u64() == Some(id))
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn delete_product(State(products): State<Products>, Path(id): Path<u64>) -> StatusCode {
    products.lock().unwrap().retain(|p| p["id"].as_u64() != Some(id));
    StatusCode::NO_CONTENT
}

fn shop(products: Products) -> Router {
    Router::new()
        .route("/", get(|| async { "<h1>Agro Shop</h1>" }))
        .route("/health", get(|| async { Json(json!({"status": "healthy"})) }))
        .route("/metrics", get(|| async { METRICS }))
        .route("/api/v1/stats", get(|| async { Json(json!({"products": 1})) }))
        .route("/api/v1/products", get(list_products).post(create_product))
        .route(
            "/api/v1/products/{id}",
            get(get_product).delete(delete_product),
        )
        .with_state(products)
}

#[tokio::test]
async fn test_health_probe_accepts_any_2xx() {
    let base = serve(
        Router::new()
            .route("/health", get(|| async { StatusCode::NO_CONTENT }))
            .route("/starting", get(|| async { StatusCode::SERVICE_UNAVAILABLE })),
    )
    .await;

    let healthy = HttpHealthProbe::new(&format!("{}/health", base), Duration::from_secs(5)).unwrap();
    assert!(healthy.check().await.is_ok());

    let starting = HttpHealthProbe::new(&format!("{}/starting", base), Duration::from_secs(5)).unwrap();
    assert!(matches!(
        starting.check().await,
        Err(OpsError::HttpStatus { status: 503, .. })
    ));
}

#[tokio::test]
async fn test_verifier_passes_against_healthy_app() {
    let products: Products = Arc::new(Mutex::new(vec![json!({"id": 1, "name": "Tomato seeds"})]));
    let base = serve(shop(products.clone())).await;

    let verifier = Verifier::new(&base, Duration::from_secs(5)).unwrap();
    let results = verifier.run().await;

    let failures: Vec<String> = results
        .iter()
        .filter(|r| !r.success)
        .map(|r| format!("{}: {}", r.name, r.message))
        .collect();
    assert!(failures.is_empty(), "{:?}", failures);

    let names: Vec<&str> = results.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(
        names,
        [
            "Health Check",
            "Products API",
            "Statistics API",
            "Metrics endpoint",
            "Database Connectivity",
            "API Create Product",
            "API Get Product",
            "Performance Check",
            "Prometheus Metrics",
        ]
    );
    assert_eq!(results[4].message, "Database accessible, 1 products found");
    assert!(results.iter().all(|r| r.latency.is_some()));

    // The test product is removed again
    assert_eq!(products.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_verifier_reports_broken_app() {
    let base = serve(
        Router::new()
            .route("/", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
            .route("/health", get(|| async { StatusCode::SERVICE_UNAVAILABLE }))
            .route("/metrics", get(|| async { "python_info 1\n" })),
    )
    .await;

    let verifier = Verifier::new(&base, Duration::from_secs(5)).unwrap();

    let health = verifier.check_health().await;
    assert!(!health.success);
    assert_eq!(health.message, "Health check failed with status 503");

    let created = verifier.check_api_functionality().await;
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].message, "Product creation failed with status 404");

    assert_eq!(
        verifier.check_performance().await.message,
        "Performance check failed with status 500"
    );
    assert_eq!(
        verifier.check_metrics().await.message,
        "Missing metrics: api_requests_total, api_request_duration_seconds"
    );

    let summary = VerificationSummary::new(verifier.run().await);
    assert!(!summary.passed());
    assert_eq!(summary.overall_status, "FAIL");
    assert_eq!(summary.passed_tests, 1); // the metrics endpoint itself answers

    let dir = tempfile::tempdir().unwrap();
    let path = summary.save(dir.path()).await.unwrap();
    assert!(path
        .file_name()
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("verification_report_"));
    let report: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(report["total_tests"], summary.total_tests);
    assert_eq!(report["overall_status"], "FAIL");
    assert_eq!(report["test_results"][0]["test_name"], "Health Check");
}

#[tokio::test]
async fn test_verifier_reports_unreachable_app() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let verifier = Verifier::new(&base, Duration::from_secs(2)).unwrap();
    let health = verifier.check_health().await;
    assert!(!health.success);
    assert!(health.message.starts_with("Health check failed:"));
    assert!(health.latency.is_none());
}
