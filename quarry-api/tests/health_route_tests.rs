//! HTTP tests for the health endpoints and the metrics scrape.

use std::sync::Arc;

use axum::http::StatusCode;
use quarry_test_utils::fixtures::{station_rows, test_config};
use quarry_test_utils::{AdmissionGuard, FailingBackend, InMemoryCacheBackend, MockGateway};
use serde_json::json;

#[path = "support/app.rs"]
mod app_support;
use app_support::{test_app, test_app_with_backend};

#[tokio::test]
async fn test_ping_and_liveness() {
    let app = test_app(MockGateway::new());

    let ping = app.get("/health/ping").await;
    assert_eq!(ping.status, StatusCode::OK);
    assert_eq!(ping.text, "pong");

    let live = app.get("/health/live").await;
    assert_eq!(live.status, StatusCode::OK);
    assert_eq!(live.body["status"], "healthy");
}

#[tokio::test]
async fn test_ready_when_everything_answers() {
    let app = test_app(MockGateway::new());
    let response = app.get("/health/ready").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "healthy");
    let details = &response.body["details"];
    assert_eq!(details["cache_store"]["status"], "healthy");
    assert_eq!(details["cache_store"]["backend"], "memory");
    assert_eq!(details["warehouse"]["status"], "healthy");
    assert_eq!(details["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_store_outage_degrades_readiness() {
    let app = test_app_with_backend(MockGateway::new(), Arc::new(FailingBackend), test_config());
    let response = app.get("/health/ready").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "degraded");
    assert_eq!(response.body["details"]["cache_store"]["status"], "degraded");
    assert!(response.body["details"]["cache_store"]["error"].is_string());
}

#[tokio::test]
async fn test_warehouse_outage_fails_readiness() {
    let app = test_app_with_backend(
        MockGateway::new().refusing_connections(),
        Arc::new(InMemoryCacheBackend::new(AdmissionGuard::default())),
        test_config(),
    );
    let response = app.get("/health/ready").await;

    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.body["status"], "unhealthy");
    assert_eq!(response.body["details"]["warehouse"]["status"], "unhealthy");
}

#[tokio::test]
async fn test_metrics_scrape_reports_cache_lookups() {
    let app = test_app(MockGateway::new().with_rows("from stations", station_rows(1)));
    app.query(json!({ "sql": "SELECT * FROM stations" })).await;

    let response = app.get("/metrics").await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.text.contains("quarry_cache_lookups_total"));
    assert!(response.text.contains("quarry_http_requests_total"));
}
