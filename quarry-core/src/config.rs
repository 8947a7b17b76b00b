//! Cache budget, timeout and TTL configuration

use crate::{CacheStrategy, ConfigError, QuarryResult, DAILY_TTL_SECS, HOURLY_TTL_SECS};
use std::time::Duration;

/// Default soft capacity of the cache store: 30 MiB.
pub const DEFAULT_CAPACITY_BYTES: u64 = 30 * 1024 * 1024;

/// Default headroom kept free below capacity: 5 MiB (one sixth).
pub const DEFAULT_RESERVE_BYTES: u64 = 5 * 1024 * 1024;

/// Default store-side expiry for static statements: one day.
pub const DEFAULT_STATIC_TTL_SECS: u64 = DAILY_TTL_SECS;

/// Default scaling constant applied to join edge weights.
pub const DEFAULT_JOIN_WEIGHT_SCALE: f64 = 1000.0;

/// Runtime configuration shared by the orchestrator and store adapters.
#[derive(Debug, Clone, PartialEq)]
pub struct QuarryConfig {
    /// Soft capacity of the cache store in bytes.
    pub capacity_bytes: u64,
    /// Headroom that admission control keeps free.
    pub reserve_bytes: u64,
    /// Upper bound on any single store call (connect/get/set/incr).
    pub store_timeout: Duration,
    /// Upper bound on a warehouse execution.
    pub warehouse_timeout: Duration,
    /// Upper bound on establishing a warehouse session.
    pub connect_timeout: Duration,
    /// TTL for statements using time-of-day functions.
    pub hourly_ttl: Duration,
    /// TTL for statements using date functions.
    pub daily_ttl: Duration,
    /// Store-side expiry for static statements. `None` keeps them until
    /// evicted or cleared and must be chosen explicitly.
    pub static_ttl: Option<Duration>,
    /// Divisor applied to summed table weights when building join edges.
    pub join_weight_scale: f64,
}

impl Default for QuarryConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: DEFAULT_CAPACITY_BYTES,
            reserve_bytes: DEFAULT_RESERVE_BYTES,
            store_timeout: Duration::from_secs(2),
            warehouse_timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(10),
            hourly_ttl: Duration::from_secs(HOURLY_TTL_SECS),
            daily_ttl: Duration::from_secs(DAILY_TTL_SECS),
            static_ttl: Some(Duration::from_secs(DEFAULT_STATIC_TTL_SECS)),
            join_weight_scale: DEFAULT_JOIN_WEIGHT_SCALE,
        }
    }
}

impl QuarryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(mut self, bytes: u64) -> Self {
        self.capacity_bytes = bytes;
        self
    }

    pub fn with_reserve(mut self, bytes: u64) -> Self {
        self.reserve_bytes = bytes;
        self
    }

    /// Set the reserve as a fraction of the current capacity.
    pub fn with_reserve_ratio(mut self, ratio: f64) -> Self {
        let ratio = ratio.clamp(0.0, 1.0);
        self.reserve_bytes = (self.capacity_bytes as f64 * ratio).round() as u64;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn with_warehouse_timeout(mut self, timeout: Duration) -> Self {
        self.warehouse_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Expiry for static entries. Pass `None` to persist them.
    pub fn with_static_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.static_ttl = ttl;
        self
    }

    pub fn with_join_weight_scale(mut self, scale: f64) -> Self {
        self.join_weight_scale = scale;
        self
    }

    /// Largest total store size that admission control will allow.
    pub fn admission_limit(&self) -> u64 {
        self.capacity_bytes.saturating_sub(self.reserve_bytes)
    }

    /// TTL for a strategy under this configuration. `None` means no expiry,
    /// which only a static entry with `static_ttl` unset can get.
    pub fn ttl_for(&self, strategy: CacheStrategy) -> Option<Duration> {
        match strategy {
            CacheStrategy::Static => self.static_ttl,
            CacheStrategy::Daily => Some(self.daily_ttl),
            CacheStrategy::Hourly => Some(self.hourly_ttl),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> QuarryResult<()> {
        if self.capacity_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "capacity_bytes".to_string(),
                value: self.capacity_bytes.to_string(),
                reason: "capacity must be greater than 0".to_string(),
            }
            .into());
        }

        if self.reserve_bytes >= self.capacity_bytes {
            return Err(ConfigError::InvalidValue {
                field: "reserve_bytes".to_string(),
                value: self.reserve_bytes.to_string(),
                reason: "reserve must be smaller than capacity".to_string(),
            }
            .into());
        }

        for (field, value) in [
            ("store_timeout", self.store_timeout),
            ("warehouse_timeout", self.warehouse_timeout),
            ("connect_timeout", self.connect_timeout),
            ("static_ttl", self.static_ttl.unwrap_or(Duration::MAX)),
        ] {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: format!("{:?}", value),
                    reason: format!("{} must be positive", field),
                }
                .into());
            }
        }

        if !(self.join_weight_scale.is_finite() && self.join_weight_scale > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "join_weight_scale".to_string(),
                value: self.join_weight_scale.to_string(),
                reason: "scale must be a positive finite number".to_string(),
            }
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::QuarryError;

    #[test]
    fn test_default_config() {
        let config = QuarryConfig::default();
        assert_eq!(config.capacity_bytes, 31_457_280);
        assert_eq!(config.reserve_bytes, 5_242_880);
        assert_eq!(config.admission_limit(), 26_214_400);
        assert_eq!(config.ttl_for(CacheStrategy::Hourly), Some(Duration::from_secs(3600)));
        assert_eq!(config.ttl_for(CacheStrategy::Daily), Some(Duration::from_secs(86_400)));
        assert_eq!(
            config.ttl_for(CacheStrategy::Static),
            Some(Duration::from_secs(86_400))
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_static_entries_persist_only_when_asked() {
        let config = QuarryConfig::new().with_static_ttl(Some(Duration::from_secs(600)));
        assert_eq!(
            config.ttl_for(CacheStrategy::Static),
            Some(Duration::from_secs(600))
        );

        let persistent = QuarryConfig::new().with_static_ttl(None);
        assert_eq!(persistent.ttl_for(CacheStrategy::Static), None);
        assert!(persistent.validate().is_ok());

        let zero = QuarryConfig::new().with_static_ttl(Some(Duration::ZERO));
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_reserve_ratio_matches_default_reserve() {
        let config = QuarryConfig::new().with_reserve_ratio(1.0 / 6.0);
        assert_eq!(config.reserve_bytes, DEFAULT_RESERVE_BYTES);
    }

    #[test]
    fn test_validate_rejects_reserve_above_capacity() {
        let config = QuarryConfig::new().with_capacity(100).with_reserve(100);
        let err = config.validate().expect_err("reserve == capacity should fail");
        assert!(matches!(err, QuarryError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = QuarryConfig::new().with_store_timeout(Duration::ZERO);
        let err = config.validate().expect_err("zero timeout should fail");
        assert!(format!("{}", err).contains("store_timeout"));
    }

    #[test]
    fn test_validate_rejects_bad_scale() {
        let config = QuarryConfig::new().with_join_weight_scale(0.0);
        assert!(config.validate().is_err());
    }
}
