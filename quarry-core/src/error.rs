//! Error types for QUARRY operations

use std::time::Duration;
use thiserror::Error;

/// Cache store failures.
///
/// Every variant is recoverable from the caller's point of view: the read
/// lane treats the store as absent and executes directly.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Cache store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Cache store operation '{operation}' timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("Cache record serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Cache store I/O failed: {reason}")]
    Io { reason: String },
}

/// Soft memory guard refused a cache write.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("Admission rejected: used {used} + payload {payload} exceeds limit {limit}")]
    Rejected { used: u64, payload: u64, limit: u64 },
}

/// Failures from the query execution gateway.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WarehouseError {
    #[error("Warehouse connection failed: {reason}")]
    Connect { reason: String },

    #[error("{message}")]
    Execution { message: String },

    #[error("Warehouse execution timed out after {after:?}")]
    Timeout { after: Duration },
}

/// Malformed caller input.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Join planning failures. Only raised by strict planning; the default
/// planner treats disconnected tables as contributing no joins.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlannerError {
    #[error("No candidate tables given")]
    NoCandidates,

    #[error("Table not in catalog: {table}")]
    UnknownTable { table: String },

    #[error("No join path between {from} and {to}")]
    Unreachable { from: String, to: String },
}

/// Master error type for all QUARRY errors.
#[derive(Debug, Clone, Error)]
pub enum QuarryError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Admission error: {0}")]
    Admission(#[from] AdmissionError),

    #[error("Warehouse error: {0}")]
    Warehouse(#[from] WarehouseError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Planner error: {0}")]
    Planner(#[from] PlannerError),
}

impl QuarryError {
    /// True for failures the cache layer absorbs instead of surfacing.
    pub fn is_cache_layer(&self) -> bool {
        matches!(self, QuarryError::Store(_) | QuarryError::Admission(_))
    }
}

/// Result type alias for QUARRY operations.
pub type QuarryResult<T> = Result<T, QuarryError>;

// =============================================================================
// TESTS
// =============================================================================
