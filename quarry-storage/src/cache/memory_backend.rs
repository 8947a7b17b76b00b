//! In-process cache backend.
//!
//! Used by tests and by single-process deployments that run without a
//! shared store. Honors TTLs and the same admission rule as the shared
//! store. Uses `tokio::sync::RwLock` for async access.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use quarry_core::{now_millis, CacheEntry, QuarryConfig, QuarryResult, Rows};
use tokio::sync::RwLock;
use tracing::warn;

use super::admission::{payload_size, Admission, AdmissionGuard};
use super::traits::{CacheBackend, StoreMemory};

#[derive(Debug, Clone)]
struct StoredEntry {
    entry: CacheEntry,
    size: u64,
}

/// In-memory cache backend.
#[derive(Debug)]
pub struct InMemoryCacheBackend {
    entries: RwLock<HashMap<String, StoredEntry>>,
    guard: AdmissionGuard,
    /// Bytes attributed to other users of the store.
    external_bytes: AtomicU64,
    peak_bytes: AtomicU64,
}

impl InMemoryCacheBackend {
    pub fn new(guard: AdmissionGuard) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            guard,
            external_bytes: AtomicU64::new(0),
            peak_bytes: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &QuarryConfig) -> Self {
        Self::new(AdmissionGuard::from_config(config))
    }

    /// Pretend `bytes` of the store are already taken by something else.
    pub fn set_external_usage(&self, bytes: u64) {
        self.external_bytes.store(bytes, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn used_bytes(&self, entries: &HashMap<String, StoredEntry>) -> u64 {
        let own: u64 = entries.values().map(|e| e.size).sum();
        own + self.external_bytes.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryCacheBackend {
    fn default() -> Self {
        Self::new(AdmissionGuard::default())
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, fingerprint: &str) -> QuarryResult<Option<CacheEntry>> {
        let now = now_millis();
        {
            let entries = self.entries.read().await;
            match entries.get(fingerprint) {
                None => return Ok(None),
                Some(stored) if !stored.entry.is_expired_at(now) => {
                    return Ok(Some(stored.entry.clone()))
                }
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().await;
        if entries
            .get(fingerprint)
            .is_some_and(|stored| stored.entry.is_expired_at(now))
        {
            entries.remove(fingerprint);
        }
        Ok(None)
    }

    async fn set(
        &self,
        fingerprint: &str,
        rows: &Rows,
        ttl: Option<Duration>,
    ) -> QuarryResult<Admission> {
        let entry = CacheEntry::new(fingerprint, rows.clone()).with_ttl(ttl);
        let (_, size) = payload_size(&entry)?;

        let mut entries = self.entries.write().await;
        let replaced = entries.get(fingerprint).map(|e| e.size).unwrap_or(0);
        let used = self.used_bytes(&entries).saturating_sub(replaced);
        let admission = self.guard.check(used, size);
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

        entries.insert(fingerprint.to_string(), StoredEntry { entry, size });
        let now_used = self.used_bytes(&entries);
        self.peak_bytes.fetch_max(now_used, Ordering::SeqCst);
        Ok(Admission::Admitted)
    }

    async fn admission_check(&self, payload_bytes: u64) -> QuarryResult<Admission> {
        let entries = self.entries.read().await;
        Ok(self.guard.check(self.used_bytes(&entries), payload_bytes))
    }

    async fn delete(&self, fingerprint: &str) -> QuarryResult<bool> {
        Ok(self.entries.write().await.remove(fingerprint).is_some())
    }

    async fn clear(&self) -> QuarryResult<u64> {
        let mut entries = self.entries.write().await;
        let count = entries.len() as u64;
        entries.clear();
        Ok(count)
    }

    async fn memory(&self) -> QuarryResult<StoreMemory> {
        let entries = self.entries.read().await;
        Ok(StoreMemory {
            used_bytes: self.used_bytes(&entries),
            peak_bytes: Some(self.peak_bytes.load(Ordering::SeqCst)),
            total_keys: Some(entries.len() as u64),
            evicted_keys: Some(0),
        })
    }

    async fn ping(&self) -> QuarryResult<()> {
        Ok(())
    }
}

/// First 8 characters of a fingerprint, for log lines.
pub(crate) fn short(fingerprint: &str) -> &str {
    fingerprint.get(..8).unwrap_or(fingerprint)
}
