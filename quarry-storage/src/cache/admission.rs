//! Soft memory admission control.
//!
//! The store itself enforces no limit. Before each write the adapter reads
//! the store's used memory and refuses the write when
//! `used + payload > capacity - reserve`.

use quarry_core::{AdmissionError, CacheEntry, QuarryConfig, QuarryResult, StoreError};
use serde::{Deserialize, Serialize};

/// Outcome of an admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum Admission {
    Admitted,
    Rejected { used: u64, payload: u64, limit: u64 },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Admission::Admitted => "admitted",
            Admission::Rejected { .. } => "rejected",
        }
    }

    pub fn into_result(self) -> Result<(), AdmissionError> {
        match self {
            Admission::Admitted => Ok(()),
            Admission::Rejected {
                used,
                payload,
                limit,
            } => Err(AdmissionError::Rejected {
                used,
                payload,
                limit,
            }),
        }
    }
}

/// Capacity and reserve for one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionGuard {
    capacity: u64,
    reserve: u64,
}

impl AdmissionGuard {
    pub fn new(capacity: u64, reserve: u64) -> Self {
        Self { capacity, reserve }
    }

    pub fn from_config(config: &QuarryConfig) -> Self {
        Self::new(config.capacity_bytes, config.reserve_bytes)
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn reserve(&self) -> u64 {
        self.reserve
    }

    /// Largest total size a write may bring the store to.
    pub fn limit(&self) -> u64 {
        self.capacity.saturating_sub(self.reserve)
    }

    pub fn check(&self, used: u64, payload: u64) -> Admission {
        let limit = self.limit();
        if used.saturating_add(payload) > limit {
            Admission::Rejected {
                used,
                payload,
                limit,
            }
        } else {
            Admission::Admitted
        }
    }
}

impl Default for AdmissionGuard {
    fn default() -> Self {
        Self::from_config(&QuarryConfig::default())
    }
}

/// Serialize an entry, returning the JSON text and its byte length.
pub fn payload_size(entry: &CacheEntry) -> QuarryResult<(String, u64)> {
    let json = serde_json::to_string(entry).map_err(|e| StoreError::Serialization {
        reason: e.to_string(),
    })?;
    let len = json.len() as u64;
    Ok((json, len))
}
