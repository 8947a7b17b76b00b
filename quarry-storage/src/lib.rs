//! QUARRY Storage - Cache Stores, Version Tracking and Orchestration
//!
//! Layers, bottom up:
//! - [`cache`]: the store contract, admission control and the shared
//!   (Redis), disk and in-memory backends
//! - [`versions`]: per-table monotonic version counters
//! - [`gateway`]: the warehouse execution contract
//! - [`orchestrator`]: the request flow tying them together
//! - [`analytics`]: per-pattern statistics and pre-warm scoring
//!
//! Cache-layer failures never escape [`QueryCache::execute`]: they degrade
//! to direct execution. Only warehouse errors and invalid input reach the
//! caller.

pub mod analytics;
pub mod cache;
pub mod connection;
pub mod gateway;
pub mod orchestrator;
pub mod versions;

pub use analytics::{CacheStats, PatternStats};
pub use cache::{
    fingerprint, fingerprint_on, stats_fingerprint, Admission, AdmissionGuard, CacheBackend,
    DiskCacheBackend, InMemoryCacheBackend, RedisCacheBackend, StoreMemory,
};
pub use connection::{bounded, RedisConnector};
pub use gateway::{audited_sql, QueryOutput, WarehouseGateway, WarehouseSession};
pub use orchestrator::{
    Clock, PrewarmOutcome, PrewarmReport, PrewarmStatus, QueryCache, QueryRequest, QueryResponse,
    DEFAULT_PREWARM_LIMIT,
};
pub use versions::{
    version_key, DiskVersionTracker, InMemoryVersionTracker, RedisVersionTracker, VersionTracker,
    TABLE_VERSION_PREFIX, VERSIONS_FILE,
};
