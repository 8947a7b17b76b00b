//! Router wired to in-process mocks for HTTP-level tests.

#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use quarry_api::{create_api_router, ApiConfig, AppState};
use quarry_test_utils::fixtures::{memory_cache, retail_catalog, test_config};
use quarry_test_utils::{
    CacheBackend, InMemoryVersionTracker, MockCatalog, MockGateway, QuarryConfig, QueryCache,
};
use serde_json::Value;
use tower::ServiceExt;

pub struct TestApp {
    pub router: Router,
    pub gateway: MockGateway,
}

/// In-memory cache over `gateway` and the retail catalog.
pub fn test_app(gateway: MockGateway) -> TestApp {
    let parts = memory_cache(gateway);
    let catalog = MockCatalog::new(retail_catalog());
    app_from(parts.cache, parts.gateway, catalog)
}

/// Cache over an arbitrary backend with an in-process version tracker.
pub fn test_app_with_backend(
    gateway: MockGateway,
    backend: Arc<dyn CacheBackend>,
    config: QuarryConfig,
) -> TestApp {
    let cache = QueryCache::new(
        backend,
        Arc::new(InMemoryVersionTracker::new()),
        Arc::new(gateway.clone()),
        config,
    );
    app_from(cache, gateway, MockCatalog::new(retail_catalog()))
}

/// Retail catalog swapped for `catalog`.
pub fn test_app_with_catalog(gateway: MockGateway, catalog: MockCatalog) -> TestApp {
    let parts = memory_cache(gateway);
    app_from(parts.cache, parts.gateway, catalog)
}

/// Default test config with a shorter warehouse deadline.
pub fn quick_timeout_config() -> QuarryConfig {
    test_config().with_warehouse_timeout(std::time::Duration::from_millis(100))
}

fn app_from(cache: QueryCache, gateway: MockGateway, catalog: MockCatalog) -> TestApp {
    let state = AppState::new(cache, Arc::new(gateway.clone()), Arc::new(catalog));
    TestApp {
        router: create_api_router(state, &ApiConfig::default()),
        gateway,
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
    pub text: String,
}

impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let text = String::from_utf8_lossy(&bytes).into_owned();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        TestResponse {
            status,
            headers,
            body,
            text,
        }
    }

    pub async fn json(&self, method: Method, uri: &str, body: Value) -> TestResponse {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("valid request");
        self.send(request).await
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .expect("valid request");
        self.send(request).await
    }

    pub async fn delete(&self, uri: &str) -> TestResponse {
        let request = Request::builder()
            .method(Method::DELETE)
            .uri(uri)
            .body(Body::empty())
            .expect("valid request");
        self.send(request).await
    }

    pub async fn query(&self, body: Value) -> TestResponse {
        self.json(Method::POST, "/query", body).await
    }
}
