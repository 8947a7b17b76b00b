//! HTTP tests for POST /query: cache headers, the 404 empty-result rule,
//! write acknowledgements and error mapping.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use proptest::prelude::*;
use quarry_test_utils::fixtures::{station_rows, test_config};
use quarry_test_utils::generators::{arb_select_sql, arb_spacing_variant};
use quarry_test_utils::{AdmissionGuard, FailingBackend, InMemoryCacheBackend, MockGateway};
use serde_json::json;
use tokio::runtime::Runtime;

#[path = "support/app.rs"]
mod app_support;
use app_support::{quick_timeout_config, test_app, test_app_with_backend};

fn stations_gateway() -> MockGateway {
    MockGateway::new()
        .with_rows("from stations", station_rows(3))
        .with_affected("update stations", 3)
}

#[tokio::test]
async fn test_miss_then_hit_carries_cache_headers() {
    let app = test_app(stations_gateway());
    let body = json!({ "sql": "SELECT * FROM stations" });

    let first = app.query(body.clone()).await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.header("x-cache-status"), Some("MISS"));
    assert_eq!(first.header("x-is-write"), Some("false"));
    assert_eq!(first.header("x-cache-type"), Some("static"));
    assert_eq!(first.header("x-row-count"), Some("3"));
    assert!(first
        .header("x-query-duration")
        .is_some_and(|d| d.ends_with("ms")));
    assert!(first.header("x-stats-hash").is_some());
    let hash = first.header("x-cache-hash").map(str::to_string);
    assert!(hash.is_some());
    assert_eq!(first.body.as_array().map(Vec::len), Some(3));

    let second = app.query(body).await;
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(second.header("x-cache-status"), Some("HIT"));
    assert_eq!(second.header("x-cache-hash").map(str::to_string), hash);
    assert_eq!(second.body, first.body);
    assert_eq!(app.gateway.execution_count(), 1);
}

#[tokio::test]
async fn test_empty_result_is_not_found_and_not_cached() {
    let app = test_app(MockGateway::new());
    let body = json!({ "sql": "SELECT * FROM stations WHERE id = -1" });

    let first = app.query(body.clone()).await;
    assert_eq!(first.status, StatusCode::NOT_FOUND);
    assert_eq!(first.body["code"], "NO_RECORDS");
    assert_eq!(first.body["error"], "No records found");
    assert_eq!(first.header("x-cache-status"), Some("MISS"));
    assert_eq!(first.header("x-row-count"), Some("0"));

    let second = app.query(body).await;
    assert_eq!(second.status, StatusCode::NOT_FOUND);
    assert_eq!(second.header("x-cache-status"), Some("MISS"));
    assert_eq!(app.gateway.execution_count(), 2);
}

#[tokio::test]
async fn test_write_acknowledges_and_invalidates() {
    let app = test_app(stations_gateway());
    let read = json!({ "sql": "SELECT * FROM stations" });

    assert_eq!(app.query(read.clone()).await.header("x-cache-status"), Some("MISS"));
    assert_eq!(app.query(read.clone()).await.header("x-cache-status"), Some("HIT"));

    let write = app
        .query(json!({ "sql": "UPDATE stations SET status = 'retired' WHERE id = 1" }))
        .await;
    assert_eq!(write.status, StatusCode::OK);
    assert_eq!(write.header("x-is-write"), Some("true"));
    assert_eq!(write.header("x-cache-status"), Some("BYPASS"));
    assert!(write.header("x-cache-hash").is_none());
    assert_eq!(
        write.body,
        json!([{
            "success": true,
            "rowsAffected": 3,
            "message": "Operation completed successfully",
        }])
    );

    let after = app.query(read).await;
    assert_eq!(after.header("x-cache-status"), Some("MISS"));
    assert_eq!(app.gateway.execution_count(), 3);
}

#[tokio::test]
async fn test_no_cache_bypasses() {
    let app = test_app(stations_gateway());
    let body = json!({ "sql": "SELECT * FROM stations", "noCache": true });

    for _ in 0..2 {
        let response = app.query(body.clone()).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.header("x-cache-status"), Some("BYPASS"));
        assert!(response.header("x-cache-hash").is_none());
    }
    assert_eq!(app.gateway.execution_count(), 2);
}

#[tokio::test]
async fn test_user_scoped_entries_and_audit_comment() {
    let app = test_app(stations_gateway());

    let alice = app
        .query(json!({ "sql": "SELECT * FROM stations", "userId": "alice" }))
        .await;
    let bob = app
        .query(json!({ "sql": "SELECT * FROM stations", "userId": "bob" }))
        .await;
    assert_eq!(alice.header("x-cache-status"), Some("MISS"));
    assert_eq!(bob.header("x-cache-status"), Some("MISS"));
    assert_ne!(alice.header("x-cache-hash"), bob.header("x-cache-hash"));

    let executed = app.gateway.executed();
    assert_eq!(executed[0].user.as_deref(), Some("alice"));
    assert!(executed[0].sql.starts_with("-- Executed by: alice\n"));
}

#[tokio::test]
async fn test_date_dependent_query_reports_daily_strategy() {
    let app = test_app(stations_gateway());
    let response = app
        .query(json!({ "sql": "SELECT * FROM stations WHERE seen = CURRENT_DATE" }))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("x-cache-type"), Some("daily"));
}

#[tokio::test]
async fn test_invalid_bodies_are_rejected() {
    let app = test_app(stations_gateway());

    let missing = app.query(json!({ "userId": "alice" })).await;
    assert_eq!(missing.status, StatusCode::BAD_REQUEST);
    assert_eq!(missing.body["code"], "MISSING_FIELD");

    let blank = app.query(json!({ "sql": "   " })).await;
    assert_eq!(blank.status, StatusCode::BAD_REQUEST);
    assert_eq!(blank.body["code"], "MISSING_FIELD");

    let wrong_type = app.query(json!({ "sql": 42 })).await;
    assert_eq!(wrong_type.status, StatusCode::BAD_REQUEST);
    assert_eq!(wrong_type.body["code"], "INVALID_INPUT");

    let malformed = app
        .send(
            axum::http::Request::builder()
                .method("POST")
                .uri("/query")
                .header("content-type", "application/json")
                .body(axum::body::Body::from("{\"sql\": "))
                .expect("valid request"),
        )
        .await;
    assert_eq!(malformed.status, StatusCode::BAD_REQUEST);
    assert_eq!(malformed.body["code"], "INVALID_INPUT");

    assert_eq!(app.gateway.execution_count(), 0);
}

#[tokio::test]
async fn test_warehouse_error_is_internal() {
    let gateway = MockGateway::new().with_error("from missing", "relation \"missing\" does not exist");
    let app = test_app(gateway);

    let response = app.query(json!({ "sql": "SELECT * FROM missing" })).await;
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.body["code"], "WAREHOUSE_ERROR");
    assert!(response.body["error"]
        .as_str()
        .is_some_and(|m| m.contains("does not exist")));
}

#[tokio::test]
async fn test_slow_warehouse_times_out() {
    let gateway = stations_gateway().with_delay(Duration::from_millis(500));
    let app = test_app_with_backend(
        gateway,
        Arc::new(InMemoryCacheBackend::new(AdmissionGuard::default())),
        quick_timeout_config(),
    );

    let response = app.query(json!({ "sql": "SELECT * FROM stations" })).await;
    assert_eq!(response.status, StatusCode::REQUEST_TIMEOUT);
    assert_eq!(response.body["code"], "TIMEOUT");
}

#[tokio::test]
async fn test_store_outage_serves_from_warehouse() {
    let app = test_app_with_backend(stations_gateway(), Arc::new(FailingBackend), test_config());
    let body = json!({ "sql": "SELECT * FROM stations" });

    for _ in 0..2 {
        let response = app.query(body.clone()).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.header("x-cache-status"), Some("MISS"));
        assert_eq!(response.body.as_array().map(Vec::len), Some(3));
    }
    assert_eq!(app.gateway.execution_count(), 2);
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

fn test_runtime() -> Result<Runtime, TestCaseError> {
    Runtime::new().map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Case and whitespace differences reuse the cached entry.
    #[test]
    fn prop_spacing_variants_hit(
        (sql, variant) in arb_select_sql()
            .prop_flat_map(|sql| (Just(sql.clone()), arb_spacing_variant(sql)))
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let app = test_app(MockGateway::new().with_rows("select", station_rows(2)));

            let first = app.query(json!({ "sql": sql })).await;
            prop_assert_eq!(first.status, StatusCode::OK);
            prop_assert_eq!(first.header("x-cache-status"), Some("MISS"));

            let second = app.query(json!({ "sql": variant })).await;
            prop_assert_eq!(second.header("x-cache-status"), Some("HIT"));
            prop_assert_eq!(second.header("x-cache-hash"), first.header("x-cache-hash"));
            prop_assert_eq!(app.gateway.execution_count(), 1);
            Ok(())
        })?;
    }
}
