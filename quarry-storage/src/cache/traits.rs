//! Cache backend trait.

use std::time::Duration;

use async_trait::async_trait;
use quarry_core::{CacheEntry, QuarryResult, Rows};
use serde::{Deserialize, Serialize};

use super::admission::Admission;

/// Store-reported memory figures.
///
/// Fields a backend cannot report are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreMemory {
    pub used_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_keys: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evicted_keys: Option<u64>,
}

/// Contract shared by all cache stores.
///
/// Implementations must be safe under concurrent use. Two writers racing on
/// the same fingerprint is expected; the last one wins.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short backend name for logs and health output.
    fn name(&self) -> &'static str;

    /// Look up an entry. Expired or unreadable records are a miss.
    async fn get(&self, fingerprint: &str) -> QuarryResult<Option<CacheEntry>>;

    /// Store `rows` under `fingerprint` unless admission control refuses.
    ///
    /// A refusal is logged and returned as [`Admission::Rejected`]; it is
    /// not an error. `ttl = None` stores without expiry.
    async fn set(
        &self,
        fingerprint: &str,
        rows: &Rows,
        ttl: Option<Duration>,
    ) -> QuarryResult<Admission>;

    /// Decide whether a payload of `payload_bytes` fits the soft budget.
    async fn admission_check(&self, payload_bytes: u64) -> QuarryResult<Admission>;

    /// Remove one entry. Returns whether it existed.
    async fn delete(&self, fingerprint: &str) -> QuarryResult<bool>;

    /// Remove every cache entry. Version counters are untouched.
    async fn clear(&self) -> QuarryResult<u64>;

    /// Current memory usage as the store reports it.
    async fn memory(&self) -> QuarryResult<StoreMemory>;

    /// Cheap reachability check.
    async fn ping(&self) -> QuarryResult<()>;

    /// Housekeeping run at the start of request handling.
    async fn maintain(&self) -> QuarryResult<()> {
        Ok(())
    }
}
