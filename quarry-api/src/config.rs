//! Service configuration loaded from `QUARRY_*` environment variables.
//!
//! Unparseable values fall back to their defaults rather than failing
//! startup; [`QuarryConfig::validate`] catches combinations that make no
//! sense (e.g. a reserve larger than the capacity).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use quarry_core::config::{DEFAULT_CAPACITY_BYTES, DEFAULT_JOIN_WEIGHT_SCALE};
use quarry_core::QuarryConfig;

use crate::error::{ApiError, ApiResult};

/// Default share of the capacity kept free by admission control.
pub const DEFAULT_RESERVE_RATIO: f64 = 1.0 / 6.0;

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

// ============================================================================
// API CONFIGURATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct ApiConfig {
    // ========================================================================
    // Cache Store
    // ========================================================================
    /// Shared store URL. `None` selects the local disk backend.
    pub redis_url: Option<String>,

    /// Root directory for the disk backend.
    pub disk_cache_dir: PathBuf,

    /// Budget, timeouts and TTLs handed to the orchestrator.
    pub cache: QuarryConfig,

    // ========================================================================
    // CORS
    // ========================================================================
    /// Allowed origins. Empty allows all (dev mode).
    pub cors_origins: Vec<String>,

    pub cors_allow_credentials: bool,

    pub cors_max_age_secs: u64,

    // ========================================================================
    // Load shedding
    // ========================================================================
    /// In-flight request cap across the whole router.
    pub max_concurrent_requests: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            disk_cache_dir: PathBuf::from(".quarry-cache"),
            cache: QuarryConfig::default(),
            cors_origins: Vec::new(),
            cors_allow_credentials: false,
            cors_max_age_secs: 86400,
            max_concurrent_requests: 512,
        }
    }
}

impl ApiConfig {
    /// Load from the environment.
    ///
    /// - `QUARRY_REDIS_URL`: shared store; unset or empty uses the disk cache
    /// - `QUARRY_DISK_CACHE_DIR`: disk cache root (default `.quarry-cache`)
    /// - `QUARRY_CACHE_CAPACITY_BYTES`: soft capacity (default 30 MiB)
    /// - `QUARRY_CACHE_RESERVE_RATIO`: reserve share of capacity (default 1/6)
    /// - `QUARRY_STORE_TIMEOUT_MS`: per store call (default 2000)
    /// - `QUARRY_CONNECT_TIMEOUT_MS`: warehouse connect (default 10000)
    /// - `QUARRY_WAREHOUSE_TIMEOUT_MS`: warehouse execute (default 120000)
    /// - `QUARRY_STATIC_TTL_SECS`: expiry of static entries (default 86400;
    ///   0 keeps them until evicted)
    /// - `QUARRY_JOIN_WEIGHT_SCALE`: join edge divisor (default 1000)
    /// - `QUARRY_CORS_ORIGINS`: comma-separated origins (empty = allow all)
    /// - `QUARRY_CORS_ALLOW_CREDENTIALS`: "true" or "false" (default false)
    /// - `QUARRY_CORS_MAX_AGE_SECS`: preflight cache (default 86400)
    /// - `QUARRY_MAX_CONCURRENT_REQUESTS`: in-flight cap (default 512)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let cache_defaults = QuarryConfig::default();

        let capacity = env_parse::<u64>("QUARRY_CACHE_CAPACITY_BYTES")
            .filter(|c| *c > 0)
            .unwrap_or(DEFAULT_CAPACITY_BYTES);
        let reserve_ratio = env_parse::<f64>("QUARRY_CACHE_RESERVE_RATIO")
            .filter(|r| r.is_finite() && (0.0..1.0).contains(r))
            .unwrap_or(DEFAULT_RESERVE_RATIO);
        let millis = |key: &str, default: Duration| {
            env_parse::<u64>(key)
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(default)
        };

        let cache = QuarryConfig::default()
            .with_capacity(capacity)
            .with_reserve_ratio(reserve_ratio)
            .with_store_timeout(millis("QUARRY_STORE_TIMEOUT_MS", cache_defaults.store_timeout))
            .with_connect_timeout(millis(
                "QUARRY_CONNECT_TIMEOUT_MS",
                cache_defaults.connect_timeout,
            ))
            .with_warehouse_timeout(millis(
                "QUARRY_WAREHOUSE_TIMEOUT_MS",
                cache_defaults.warehouse_timeout,
            ))
            .with_static_ttl(match env_parse::<u64>("QUARRY_STATIC_TTL_SECS") {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => cache_defaults.static_ttl,
            })
            .with_join_weight_scale(
                env_parse("QUARRY_JOIN_WEIGHT_SCALE").unwrap_or(DEFAULT_JOIN_WEIGHT_SCALE),
            );

        let cors_origins = std::env::var("QUARRY_CORS_ORIGINS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            redis_url: env_non_empty("QUARRY_REDIS_URL"),
            disk_cache_dir: env_non_empty("QUARRY_DISK_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.disk_cache_dir),
            cache,
            cors_origins,
            cors_allow_credentials: std::env::var("QUARRY_CORS_ALLOW_CREDENTIALS")
                .map(|s| s.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            cors_max_age_secs: env_parse("QUARRY_CORS_MAX_AGE_SECS")
                .unwrap_or(defaults.cors_max_age_secs),
            max_concurrent_requests: env_parse::<usize>("QUARRY_MAX_CONCURRENT_REQUESTS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_concurrent_requests),
        }
    }

    /// Strict CORS is in effect.
    pub fn is_production(&self) -> bool {
        !self.cors_origins.is_empty()
    }

    pub fn with_cache(mut self, cache: QuarryConfig) -> Self {
        self.cache = cache;
        self
    }
}

/// Resolve the listen address from `QUARRY_API_BIND` and `PORT` or
/// `QUARRY_API_PORT`.
pub fn resolve_bind_addr() -> ApiResult<SocketAddr> {
    let host = std::env::var("QUARRY_API_BIND").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("PORT")
        .ok()
        .or_else(|| std::env::var("QUARRY_API_PORT").ok())
        .unwrap_or_else(|| "3000".to_string());
    parse_bind_addr(&host, &port)
}

pub fn parse_bind_addr(host: &str, port: &str) -> ApiResult<SocketAddr> {
    let port = port
        .trim()
        .parse::<u16>()
        .map_err(|_| ApiError::invalid_input(format!("Invalid port value: {}", port)))?;

    let addr = format!("{}:{}", host.trim(), port);
    addr.parse::<SocketAddr>()
        .map_err(|e| ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e)))
}
