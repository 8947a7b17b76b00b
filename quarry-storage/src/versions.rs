//! Per-table version counters.
//!
//! Each table has a monotonic counter, 0 until the first write. Reads embed
//! the current versions of their tables in the fingerprint; writes bump
//! them, which invalidates every cached read of those tables at once
//! without enumerating keys.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use quarry_core::{QuarryError, QuarryResult, StoreError, TableVersion, VersionVector};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::connection::{bounded, RedisConnector};

/// Key prefix for version counters in the shared store.
pub const TABLE_VERSION_PREFIX: &str = "table_version:";

/// File under a disk cache root holding the persisted counters. It has no
/// `.json` extension so the disk backend never mistakes it for a record.
pub const VERSIONS_FILE: &str = ".table_versions";

/// Store key holding the version of `table`.
pub fn version_key(table: &str) -> String {
    format!("{}{}", TABLE_VERSION_PREFIX, table)
}

/// Source of table versions.
#[async_trait]
pub trait VersionTracker: Send + Sync {
    /// Current version of one table. Unknown tables are at 0.
    async fn get_version(&self, table: &str) -> QuarryResult<u64>;

    /// Versions of `tables`, in the order given.
    async fn get_version_vector(&self, tables: &[String]) -> QuarryResult<VersionVector> {
        let mut entries = Vec::with_capacity(tables.len());
        for table in tables {
            entries.push(TableVersion::new(table.clone(), self.get_version(table).await?));
        }
        Ok(VersionVector::new(entries))
    }

    /// Atomically increment every table in `tables` and return the new
    /// versions. Concurrent bumps never lose an increment.
    async fn bump(&self, tables: &[String]) -> QuarryResult<Vec<TableVersion>>;
}

// ============================================================================
// REDIS
// ============================================================================

/// Version counters stored as integer keys in the shared store.
#[derive(Debug, Clone)]
pub struct RedisVersionTracker {
    connector: Arc<RedisConnector>,
}

impl RedisVersionTracker {
    pub fn new(connector: Arc<RedisConnector>) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl VersionTracker for RedisVersionTracker {
    async fn get_version(&self, table: &str) -> QuarryResult<u64> {
        let mut conn = self.connector.connection().await?;
        let version: Option<u64> = bounded(
            "get version",
            self.connector.call_timeout(),
            redis::cmd("GET").arg(version_key(table)).query_async(&mut conn),
        )
        .await?;
        Ok(version.unwrap_or(0))
    }

    async fn get_version_vector(&self, tables: &[String]) -> QuarryResult<VersionVector> {
        if tables.is_empty() {
            return Ok(VersionVector::default());
        }

        let keys: Vec<String> = tables.iter().map(|t| version_key(t)).collect();
        let mut conn = self.connector.connection().await?;
        let versions: Vec<Option<u64>> = bounded(
            "get versions",
            self.connector.call_timeout(),
            redis::cmd("MGET").arg(&keys).query_async(&mut conn),
        )
        .await?;

        Ok(tables
            .iter()
            .zip(versions)
            .map(|(table, version)| TableVersion::new(table.clone(), version.unwrap_or(0)))
            .collect())
    }

    async fn bump(&self, tables: &[String]) -> QuarryResult<Vec<TableVersion>> {
        if tables.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for table in tables {
            pipe.cmd("INCR").arg(version_key(table));
        }

        let mut conn = self.connector.connection().await?;
        let versions: Vec<u64> = bounded(
            "bump versions",
            self.connector.call_timeout(),
            pipe.query_async(&mut conn),
        )
        .await?;

        let bumped: Vec<TableVersion> = tables
            .iter()
            .zip(versions)
            .map(|(table, version)| TableVersion::new(table.clone(), version))
            .collect();
        debug!(versions = ?bumped, "Table versions bumped");
        Ok(bumped)
    }
}

// ============================================================================
// IN-MEMORY
// ============================================================================

/// Process-local version counters.
#[derive(Debug, Default)]
pub struct InMemoryVersionTracker {
    versions: RwLock<HashMap<String, u64>>,
}

impl InMemoryVersionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every known counter.
    pub async fn snapshot(&self) -> HashMap<String, u64> {
        self.versions.read().await.clone()
    }
}

#[async_trait]
impl VersionTracker for InMemoryVersionTracker {
    async fn get_version(&self, table: &str) -> QuarryResult<u64> {
        Ok(self.versions.read().await.get(table).copied().unwrap_or(0))
    }

    async fn get_version_vector(&self, tables: &[String]) -> QuarryResult<VersionVector> {
        let versions = self.versions.read().await;
        Ok(tables
            .iter()
            .map(|t| TableVersion::new(t.clone(), versions.get(t).copied().unwrap_or(0)))
            .collect())
    }

    async fn bump(&self, tables: &[String]) -> QuarryResult<Vec<TableVersion>> {
        let mut versions = self.versions.write().await;
        Ok(tables
            .iter()
            .map(|table| {
                let version = versions.entry(table.clone()).or_insert(0);
                *version += 1;
                TableVersion::new(table.clone(), *version)
            })
            .collect())
    }
}

// ============================================================================
// DISK
// ============================================================================

/// Version counters persisted in one file beside the disk cache.
///
/// Counters outlive the process, so a restart never rolls a table back to
/// a version that still has cached entries on disk. Every bump rewrites
/// the file through a temporary and a rename. One process per directory.
#[derive(Debug)]
pub struct DiskVersionTracker {
    path: PathBuf,
    versions: Mutex<Option<BTreeMap<String, u64>>>,
}

impl DiskVersionTracker {
    /// Tracker persisting to [`VERSIONS_FILE`] under `root`. Nothing is
    /// read until first use.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            path: root.as_ref().join(VERSIONS_FILE),
            versions: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> QuarryResult<BTreeMap<String, u64>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(self.io_error("read table versions", e)),
        };
        let versions: BTreeMap<String, u64> = serde_json::from_str(&text).map_err(|e| {
            QuarryError::from(StoreError::Serialization {
                reason: format!("{}: {}", self.path.display(), e),
            })
        })?;
        info!(
            path = %self.path.display(),
            tables = versions.len(),
            "Loaded persisted table versions"
        );
        Ok(versions)
    }

    async fn persist(&self, versions: &BTreeMap<String, u64>) -> QuarryResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error("create cache directory", e))?;
        }
        let json = serde_json::to_string(versions).map_err(|e| {
            QuarryError::from(StoreError::Serialization {
                reason: e.to_string(),
            })
        })?;

        let tmp = self
            .path
            .with_file_name(format!("{}.tmp-{}", VERSIONS_FILE, std::process::id()));
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| self.io_error("write table versions", e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(self.io_error("commit table versions", e));
        }
        Ok(())
    }

    fn io_error(&self, operation: &str, e: std::io::Error) -> QuarryError {
        StoreError::Io {
            reason: format!("{} {}: {}", operation, self.path.display(), e),
        }
        .into()
    }
}

#[async_trait]
impl VersionTracker for DiskVersionTracker {
    async fn get_version(&self, table: &str) -> QuarryResult<u64> {
        let vector = self.get_version_vector(&[table.to_string()]).await?;
        Ok(vector.version_of(table).unwrap_or(0))
    }

    async fn get_version_vector(&self, tables: &[String]) -> QuarryResult<VersionVector> {
        let mut guard = self.versions.lock().await;
        if guard.is_none() {
            *guard = Some(self.load().await?);
        }
        let versions = guard.as_ref();
        Ok(tables
            .iter()
            .map(|t| {
                let version = versions.and_then(|v| v.get(t)).copied().unwrap_or(0);
                TableVersion::new(t.clone(), version)
            })
            .collect())
    }

    async fn bump(&self, tables: &[String]) -> QuarryResult<Vec<TableVersion>> {
        if tables.is_empty() {
            return Ok(Vec::new());
        }

        let mut guard = self.versions.lock().await;
        let mut next = match guard.as_ref() {
            Some(current) => current.clone(),
            None => self.load().await?,
        };
        let bumped: Vec<TableVersion> = tables
            .iter()
            .map(|table| {
                let version = next.entry(table.clone()).or_insert(0);
                *version += 1;
                TableVersion::new(table.clone(), *version)
            })
            .collect();

        // In memory only once the file holds the new counters.
        self.persist(&next).await?;
        *guard = Some(next);
        debug!(versions = ?bumped, "Table versions bumped");
        Ok(bumped)
    }
}
