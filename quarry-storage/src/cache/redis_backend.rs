//! Shared-store cache backend over Redis.
//!
//! Entries live under `cache:{fingerprint}` as JSON strings. TTLs use the
//! store's native expiry. Static entries get the configured static TTL
//! too; only an explicit `static_ttl = None` writes them without one. The
//! store enforces no memory limit of its own, so each write first reads
//! `used_memory` from `INFO memory` and applies the [`AdmissionGuard`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quarry_core::{CacheEntry, QuarryResult, Rows, StoreError};
use tracing::{debug, warn};

use super::admission::{payload_size, Admission, AdmissionGuard};
use super::memory_backend::short;
use super::traits::{CacheBackend, StoreMemory};
use crate::connection::{bounded, RedisConnector};

/// Key prefix for cache entries. Version counters use a different prefix
/// so clearing the cache leaves them alone.
pub const CACHE_KEY_PREFIX: &str = "cache:";

const SCAN_BATCH: u32 = 100;

/// Read a numeric field from `INFO` output.
///
/// Matches the field name exactly, so `used_memory` does not pick up
/// `used_memory_peak`.
pub fn parse_info_field(info: &str, field: &str) -> Option<u64> {
    info.lines().find_map(|line| {
        let (key, value) = line.trim().split_once(':')?;
        if key == field {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

/// `SET key value [EX seconds]`. Sub-second TTLs round up to one second.
pub fn set_command(key: &str, json: &str, ttl: Option<Duration>) -> redis::Cmd {
    let mut cmd = redis::cmd("SET");
    cmd.arg(key).arg(json);
    if let Some(ttl) = ttl {
        cmd.arg("EX").arg(ttl.as_secs().max(1));
    }
    cmd
}

/// Redis-backed cache store.
#[derive(Debug, Clone)]
pub struct RedisCacheBackend {
    connector: Arc<RedisConnector>,
    guard: AdmissionGuard,
}

impl RedisCacheBackend {
    pub fn new(connector: Arc<RedisConnector>, guard: AdmissionGuard) -> Self {
        Self { connector, guard }
    }

    pub fn guard(&self) -> AdmissionGuard {
        self.guard
    }

    fn key(fingerprint: &str) -> String {
        format!("{}{}", CACHE_KEY_PREFIX, fingerprint)
    }

    async fn info(&self, section: &str) -> QuarryResult<String> {
        let mut conn = self.connector.connection().await?;
        let info: String = bounded(
            "info",
            self.connector.call_timeout(),
            redis::cmd("INFO").arg(section).query_async(&mut conn),
        )
        .await?;
        Ok(info)
    }

    async fn used_memory(&self) -> QuarryResult<u64> {
        let info = self.info("memory").await?;
        parse_info_field(&info, "used_memory").ok_or_else(|| {
            StoreError::Unavailable {
                reason: "used_memory missing from INFO output".to_string(),
            }
            .into()
        })
    }
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, fingerprint: &str) -> QuarryResult<Option<CacheEntry>> {
        let mut conn = self.connector.connection().await?;
        let raw: Option<String> = bounded(
            "get",
            self.connector.call_timeout(),
            redis::cmd("GET")
                .arg(Self::key(fingerprint))
                .query_async(&mut conn),
        )
        .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };
        match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!(
                    fingerprint = %short(fingerprint),
                    error = %e,
                    "Unreadable cache entry treated as a miss"
                );
                Ok(None)
            }
        }
    }

    async fn set(
        &self,
        fingerprint: &str,
        rows: &Rows,
        ttl: Option<Duration>,
    ) -> QuarryResult<Admission> {
        let entry = CacheEntry::new(fingerprint, rows.clone());
        let (json, size) = payload_size(&entry)?;

        let admission = self.admission_check(size).await?;
        if let Admission::Rejected {
            used,
            payload,
            limit,
        } = admission
        {
            warn!(
                fingerprint = %short(fingerprint),
                used, payload, limit,
                "Cache admission rejected"
            );
            return Ok(admission);
        }

        let cmd = set_command(&Self::key(fingerprint), &json, ttl);

        let mut conn = self.connector.connection().await?;
        let _: () = bounded(
            "set",
            self.connector.call_timeout(),
            cmd.query_async(&mut conn),
        )
        .await?;

        debug!(fingerprint = %short(fingerprint), bytes = size, ttl = ?ttl, "Cache entry stored");
        Ok(Admission::Admitted)
    }

    async fn admission_check(&self, payload_bytes: u64) -> QuarryResult<Admission> {
        let used = self.used_memory().await?;
        Ok(self.guard.check(used, payload_bytes))
    }

    async fn delete(&self, fingerprint: &str) -> QuarryResult<bool> {
        let mut conn = self.connector.connection().await?;
        let removed: u64 = bounded(
            "del",
            self.connector.call_timeout(),
            redis::cmd("DEL")
                .arg(Self::key(fingerprint))
                .query_async(&mut conn),
        )
        .await?;
        Ok(removed > 0)
    }

    async fn clear(&self) -> QuarryResult<u64> {
        let mut conn = self.connector.connection().await?;
        let pattern = format!("{}*", CACHE_KEY_PREFIX);
        let mut cursor = 0u64;
        let mut removed = 0u64;

        loop {
            let (next_cursor, keys): (u64, Vec<String>) = bounded(
                "scan",
                self.connector.call_timeout(),
                redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(SCAN_BATCH)
                    .query_async(&mut conn),
            )
            .await?;

            if !keys.is_empty() {
                let count: u64 = bounded(
                    "del",
                    self.connector.call_timeout(),
                    redis::cmd("DEL").arg(&keys).query_async(&mut conn),
                )
                .await?;
                removed += count;
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        Ok(removed)
    }

    async fn memory(&self) -> QuarryResult<StoreMemory> {
        let memory_info = self.info("memory").await?;
        let stats_info = self.info("stats").await?;

        let mut conn = self.connector.connection().await?;
        let total_keys: u64 = bounded(
            "dbsize",
            self.connector.call_timeout(),
            redis::cmd("DBSIZE").query_async(&mut conn),
        )
        .await?;

        Ok(StoreMemory {
            used_bytes: parse_info_field(&memory_info, "used_memory").unwrap_or(0),
            peak_bytes: parse_info_field(&memory_info, "used_memory_peak"),
            total_keys: Some(total_keys),
            evicted_keys: parse_info_field(&stats_info, "evicted_keys"),
        })
    }

    async fn ping(&self) -> QuarryResult<()> {
        let mut conn = self.connector.connection().await?;
        let _: String = bounded(
            "ping",
            self.connector.call_timeout(),
            redis::cmd("PING").query_async(&mut conn),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::{QuarryConfig, QuarryError};

    const INFO_MEMORY: &str = "# Memory\r\n\
        used_memory:1048576\r\n\
        used_memory_human:1.00M\r\n\
        used_memory_peak:2097152\r\n\
        maxmemory:0\r\n";

    #[test]
    fn test_parse_info_field_exact_match() {
        assert_eq!(parse_info_field(INFO_MEMORY, "used_memory"), Some(1_048_576));
        assert_eq!(
            parse_info_field(INFO_MEMORY, "used_memory_peak"),
            Some(2_097_152)
        );
        assert_eq!(parse_info_field(INFO_MEMORY, "maxmemory"), Some(0));
    }

    #[test]
    fn test_parse_info_field_missing_or_non_numeric() {
        assert_eq!(parse_info_field(INFO_MEMORY, "evicted_keys"), None);
        assert_eq!(parse_info_field(INFO_MEMORY, "used_memory_human"), None);
        assert_eq!(parse_info_field("", "used_memory"), None);
    }

    fn packed(cmd: &redis::Cmd) -> String {
        String::from_utf8_lossy(&cmd.get_packed_command()).into_owned()
    }

    #[test]
    fn test_static_set_carries_expiry_by_default() {
        let config = QuarryConfig::default();
        let ttl = config.ttl_for(quarry_core::CacheStrategy::Static);
        let cmd = packed(&set_command("cache:abc", "[]", ttl));
        assert!(cmd.contains("\r\nEX\r\n"), "{}", cmd);
        assert!(cmd.contains("\r\n86400\r\n"), "{}", cmd);
    }

    #[test]
    fn test_set_without_ttl_has_no_expiry() {
        let persistent = QuarryConfig::default().with_static_ttl(None);
        let ttl = persistent.ttl_for(quarry_core::CacheStrategy::Static);
        let cmd = packed(&set_command("cache:abc", "[]", ttl));
        assert!(!cmd.contains("\r\nEX\r\n"), "{}", cmd);
    }

    #[test]
    fn test_sub_second_ttl_rounds_up() {
        let cmd = packed(&set_command("cache:abc", "[]", Some(Duration::from_millis(10))));
        assert!(cmd.ends_with("\r\nEX\r\n$1\r\n1\r\n"), "{}", cmd);
    }

    #[tokio::test]
    async fn test_admission_check_needs_a_reachable_store() {
        let config = QuarryConfig::default().with_connect_timeout(Duration::from_millis(200));
        let connector = RedisConnector::new("redis://127.0.0.1:1/", &config)
            .expect("url should parse");
        let backend = RedisCacheBackend::new(Arc::new(connector), AdmissionGuard::new(100, 10));

        let err = backend
            .admission_check(10)
            .await
            .expect_err("store is unreachable");
        assert!(err.is_cache_layer());
        assert_eq!(backend.guard().limit(), 90);
    }

    #[test]
    fn test_cache_keys_are_prefixed() {
        assert_eq!(RedisCacheBackend::key("abc"), "cache:abc");
        assert!(!crate::versions::TABLE_VERSION_PREFIX.starts_with(CACHE_KEY_PREFIX));
    }

    #[tokio::test]
    async fn test_unreachable_store_surfaces_cache_layer_error() {
        let config = QuarryConfig::default().with_connect_timeout(Duration::from_millis(200));
        let connector = RedisConnector::new("redis://127.0.0.1:1/", &config)
            .expect("url should parse");
        let backend = RedisCacheBackend::new(Arc::new(connector), AdmissionGuard::default());

        let err = backend.get("abc").await.expect_err("store is unreachable");
        assert!(err.is_cache_layer());
        assert!(matches!(err, QuarryError::Store(_)));
    }
}
