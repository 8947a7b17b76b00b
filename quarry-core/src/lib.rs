//! QUARRY Core - Shared Types
//!
//! Data model shared by the classifier, the cache store adapters, the
//! orchestrator and the HTTP layer. No I/O lives here.

pub mod config;
pub mod error;

pub use config::QuarryConfig;
pub use error::{
    AdmissionError, ConfigError, PlannerError, QuarryError, QuarryResult, StoreError,
    ValidationError, WarehouseError,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;

// ============================================================================
// ROW TYPES
// ============================================================================

/// A single result row: column name to scalar value, in column order.
///
/// Rows have no declared schema. The shape is whatever the warehouse
/// returned for the statement that produced them.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Ordered result set.
pub type Rows = Vec<Row>;

/// Milliseconds since the Unix epoch.
pub type EpochMillis = i64;

/// Current wall-clock time as epoch milliseconds.
pub fn now_millis() -> EpochMillis {
    Utc::now().timestamp_millis()
}

/// Hex-encoded SHA-256 digest of a UTF-8 string.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

// ============================================================================
// CACHE ENTRY
// ============================================================================

/// A cached result set as persisted by a store backend.
///
/// The JSON form is `{ rows, createdAt, fingerprint }` with `createdAt`
/// in epoch milliseconds. Backends without native expiry also record
/// `expiresAt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub rows: Rows,
    pub created_at: EpochMillis,
    pub fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<EpochMillis>,
}

impl CacheEntry {
    /// Create an entry stamped with the current time.
    pub fn new(fingerprint: impl Into<String>, rows: Rows) -> Self {
        Self {
            rows,
            created_at: now_millis(),
            fingerprint: fingerprint.into(),
            expires_at: None,
        }
    }

    /// Stamp an expiry `ttl` after creation. `None` leaves the entry persistent.
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.expires_at = ttl.map(|ttl| {
            let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
            self.created_at.saturating_add(ttl_ms)
        });
        self
    }

    /// True once `now` has reached the recorded expiry.
    pub fn is_expired_at(&self, now: EpochMillis) -> bool {
        self.expires_at.is_some_and(|expires| now >= expires)
    }

    /// Creation time as a UTC datetime, if the stored millis are in range.
    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(self.created_at)
    }
}

// ============================================================================
// TABLE VERSIONS
// ============================================================================

/// Version counter for one table.
///
/// Versions start at 0 and only ever increase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableVersion {
    pub table: String,
    pub version: u64,
}

impl TableVersion {
    pub fn new(table: impl Into<String>, version: u64) -> Self {
        Self {
            table: table.into(),
            version,
        }
    }
}

impl fmt::Display for TableVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table, self.version)
    }
}

/// Snapshot of the versions of every table a statement reads, in the
/// order the tables were extracted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionVector(Vec<TableVersion>);

impl VersionVector {
    pub fn new(entries: Vec<TableVersion>) -> Self {
        Self(entries)
    }

    pub fn entries(&self) -> &[TableVersion] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Version recorded for `table`, if the table is part of the snapshot.
    pub fn version_of(&self, table: &str) -> Option<u64> {
        self.0.iter().find(|tv| tv.table == table).map(|tv| tv.version)
    }

    /// `table:version` strings in snapshot order.
    pub fn to_strings(&self) -> Vec<String> {
        self.0.iter().map(ToString::to_string).collect()
    }
}

impl fmt::Display for VersionVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_strings().join("|"))
    }
}

impl FromIterator<TableVersion> for VersionVector {
    fn from_iter<I: IntoIterator<Item = TableVersion>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ============================================================================
// CACHE STRATEGY
// ============================================================================

/// Seconds in one hour.
pub const HOURLY_TTL_SECS: u64 = 3600;

/// Seconds in one day.
pub const DAILY_TTL_SECS: u64 = 86_400;

/// How long a read result may be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStrategy {
    /// No dynamic date functions; persistent-eligible.
    Static,
    /// Depends on the current date.
    Daily,
    /// Depends on the current time of day.
    Hourly,
}

impl CacheStrategy {
    /// TTL implied by the statement alone. Static statements have none;
    /// the store-side expiry comes from `QuarryConfig::ttl_for`.
    pub fn ttl(&self) -> Option<Duration> {
        match self {
            CacheStrategy::Static => None,
            CacheStrategy::Daily => Some(Duration::from_secs(DAILY_TTL_SECS)),
            CacheStrategy::Hourly => Some(Duration::from_secs(HOURLY_TTL_SECS)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStrategy::Static => "static",
            CacheStrategy::Daily => "daily",
            CacheStrategy::Hourly => "hourly",
        }
    }
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// CACHE STATUS
// ============================================================================

/// How a query response was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheStatus {
    /// Served from the cache store.
    Hit,
    /// Executed against the warehouse; the result may have been admitted.
    Miss,
    /// Cache skipped entirely (write statement or caller opt-out).
    Bypass,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Bypass => "BYPASS",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
