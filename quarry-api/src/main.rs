//! QUARRY API Server Entry Point
//!
//! Picks the cache store (shared Redis when `QUARRY_REDIS_URL` is set,
//! local disk otherwise), wires the warehouse pool and starts serving.

use std::sync::Arc;

use axum::Router;
use quarry_planner::CatalogSource;
use quarry_storage::{
    AdmissionGuard, CacheBackend, DiskCacheBackend, DiskVersionTracker, QueryCache,
    RedisCacheBackend, RedisConnector, RedisVersionTracker, VersionTracker, WarehouseGateway,
};

use quarry_api::telemetry::{init_tracer, TelemetryConfig};
use quarry_api::{
    create_api_router, resolve_bind_addr, ApiConfig, ApiError, ApiResult, AppState, PgCatalog,
    PgWarehouse, WarehouseConfig,
};

type Stores = (Arc<dyn CacheBackend>, Arc<dyn VersionTracker>);

fn build_stores(config: &ApiConfig) -> ApiResult<Stores> {
    let guard = AdmissionGuard::from_config(&config.cache);

    match &config.redis_url {
        Some(url) => {
            let connector = Arc::new(RedisConnector::new(url, &config.cache)?);
            tracing::info!("Using shared Redis cache store");
            Ok((
                Arc::new(RedisCacheBackend::new(connector.clone(), guard)),
                Arc::new(RedisVersionTracker::new(connector)),
            ))
        }
        None => {
            // Versions persist beside the records; one instance per directory.
            tracing::warn!(
                root = %config.disk_cache_dir.display(),
                "QUARRY_REDIS_URL not set; using local disk cache and table versions"
            );
            Ok((
                Arc::new(DiskCacheBackend::new(&config.disk_cache_dir).with_admission(guard)),
                Arc::new(DiskVersionTracker::new(&config.disk_cache_dir)),
            ))
        }
    }
}

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_tracer(&telemetry_config)?;

    let api_config = ApiConfig::from_env();
    api_config.cache.validate()?;

    let warehouse_config = WarehouseConfig::from_env();
    let pool = warehouse_config.create_pool()?;
    let gateway: Arc<dyn WarehouseGateway> = Arc::new(PgWarehouse::new(pool.clone()));
    let catalog: Arc<dyn CatalogSource> =
        Arc::new(PgCatalog::new(pool, warehouse_config.schema.clone()));

    let (backend, tracker) = build_stores(&api_config)?;
    let cache = QueryCache::new(backend, tracker, gateway.clone(), api_config.cache.clone());

    let state = AppState::new(cache, gateway, catalog);
    let app: Router = create_api_router(state, &api_config);

    let addr = resolve_bind_addr()?;
    tracing::info!(%addr, "Starting QUARRY API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}
