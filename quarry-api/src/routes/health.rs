//! Health Check Endpoints
//!
//! - /health/ping - Simple liveness check
//! - /health/live - Process alive check
//! - /health/ready - Cache store and warehouse reachability
//!
//! An unreachable cache store makes the service `degraded`, not unready:
//! queries still run, just uncached. Only an unreachable warehouse fails
//! readiness.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use quarry_core::QuarryResult;
use quarry_storage::{QueryCache, WarehouseGateway};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HealthDetails>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthDetails {
    pub cache_store: ComponentHealth,
    pub warehouse: ComponentHealth,
    pub version: String,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentHealth {
    fn with_backend(mut self, backend: &str) -> Self {
        self.backend = Some(backend.to_string());
        self
    }
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /health/ping
pub async fn ping() -> impl IntoResponse {
    (StatusCode::OK, "pong")
}

/// GET /health/live
pub async fn liveness() -> impl IntoResponse {
    let response = HealthResponse {
        status: HealthStatus::Healthy,
        message: Some("Process is alive".to_string()),
        details: None,
    };
    (StatusCode::OK, Json(response))
}

/// GET /health/ready
pub async fn readiness(
    State(cache): State<QueryCache>,
    State(gateway): State<Arc<dyn WarehouseGateway>>,
    State(start_time): State<Instant>,
) -> impl IntoResponse {
    let store = check_component(cache.ping_store(), HealthStatus::Degraded)
        .await
        .with_backend(cache.backend().name());

    let connect_timeout = cache.config().connect_timeout;
    let warehouse = check_component(
        async {
            match tokio::time::timeout(connect_timeout, gateway.ping()).await {
                Ok(result) => result,
                Err(_) => Err(quarry_core::WarehouseError::Connect {
                    reason: format!("ping timed out after {:?}", connect_timeout),
                }
                .into()),
            }
        },
        HealthStatus::Unhealthy,
    )
    .await;

    let overall_status = overall(store.status, warehouse.status);
    let response = HealthResponse {
        status: overall_status,
        message: None,
        details: Some(HealthDetails {
            cache_store: store,
            warehouse,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: start_time.elapsed().as_secs(),
        }),
    };

    let status_code = if overall_status == HealthStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status_code, Json(response))
}

async fn check_component<F>(check: F, on_failure: HealthStatus) -> ComponentHealth
where
    F: Future<Output = QuarryResult<()>>,
{
    let start = Instant::now();
    match check.await {
        Ok(()) => ComponentHealth {
            status: HealthStatus::Healthy,
            backend: None,
            latency_ms: Some(start.elapsed().as_millis() as u64),
            error: None,
        },
        Err(e) => ComponentHealth {
            status: on_failure,
            backend: None,
            latency_ms: None,
            error: Some(e.to_string()),
        },
    }
}

fn overall(store: HealthStatus, warehouse: HealthStatus) -> HealthStatus {
    if warehouse != HealthStatus::Healthy {
        HealthStatus::Unhealthy
    } else if store != HealthStatus::Healthy {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/ping", get(ping))
        .route("/live", get(liveness))
        .route("/ready", get(readiness))
}
