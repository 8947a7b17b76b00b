//! REST routes.
//!
//! - `/query` - cached statement execution
//! - `/cache/*` - cache maintenance
//! - `/join-plan` - join path planning
//! - `/health/*` - liveness and readiness
//! - `/metrics` - Prometheus scrape

pub mod cache;
pub mod health;
pub mod planner;
pub mod query;

use std::time::Duration;

use axum::{
    http::{header, HeaderValue, Method},
    middleware::from_fn,
    routing::get,
    Router,
};
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::state::AppState;
use crate::telemetry::{metrics_handler, observability_middleware};

pub use cache::create_router as cache_router;
pub use health::create_router as health_router;
pub use planner::create_router as planner_router;
pub use query::create_router as query_router;

fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([
            query::X_CACHE_STATUS,
            query::X_CACHE_HASH,
            query::X_QUERY_DURATION,
            query::X_IS_WRITE,
            query::X_CACHE_TYPE,
            query::X_ROW_COUNT,
            query::X_STATS_HASH,
        ])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if config.cors_origins.is_empty() {
        tracing::info!("CORS: Development mode - allowing all origins");
        cors.allow_origin(Any)
    } else {
        tracing::info!(
            "CORS: Production mode - allowing origins: {:?}",
            config.cors_origins
        );
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        if config.cors_allow_credentials {
            cors.allow_origin(origins).allow_credentials(true)
        } else {
            cors.allow_origin(origins)
        }
    }
}

/// Assemble the full router: every route, CORS, request tracing,
/// metrics middleware and the in-flight request cap.
pub fn create_api_router(state: AppState, config: &ApiConfig) -> Router {
    Router::new()
        .nest("/query", query::create_router())
        .nest("/cache", cache::create_router())
        .nest("/join-plan", planner::create_router())
        .nest("/health", health::create_router())
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(from_fn(observability_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(config))
        .layer(GlobalConcurrencyLimitLayer::new(config.max_concurrent_requests))
}
