//! Shared application state for Axum routers.

use std::sync::Arc;
use std::time::Instant;

use quarry_planner::CatalogSource;
use quarry_storage::{QueryCache, WarehouseGateway};

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// Query cache orchestrator. Owns the store, tracker and gateway handles.
    pub cache: QueryCache,
    /// Same gateway the cache executes through, for readiness checks.
    pub gateway: Arc<dyn WarehouseGateway>,
    /// Catalog metadata for join planning.
    pub catalog: Arc<dyn CatalogSource>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        cache: QueryCache,
        gateway: Arc<dyn WarehouseGateway>,
        catalog: Arc<dyn CatalogSource>,
    ) -> Self {
        Self {
            cache,
            gateway,
            catalog,
            start_time: Instant::now(),
        }
    }
}

crate::impl_from_ref!(QueryCache, cache);
crate::impl_from_ref!(Arc<dyn WarehouseGateway>, gateway);
crate::impl_from_ref!(Arc<dyn CatalogSource>, catalog);
crate::impl_from_ref!(Instant, start_time);
