//! Warehouse execution contract.
//!
//! The warehouse is the system of record. The cache never talks to it
//! directly: the orchestrator opens a [`WarehouseSession`] through a
//! [`WarehouseGateway`] for each executed statement. Sessions may be
//! scoped to a user, which lets the gateway apply per-user credentials.

use async_trait::async_trait;
use quarry_core::{QuarryResult, Rows};

/// Result of executing one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    pub rows: Rows,
    /// Row count reported by the driver for writes, when it has one.
    pub rows_affected: Option<u64>,
}

impl QueryOutput {
    pub fn from_rows(rows: Rows) -> Self {
        Self {
            rows,
            rows_affected: None,
        }
    }

    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows: Rows::new(),
            rows_affected: Some(rows_affected),
        }
    }
}

/// An open connection to the warehouse.
#[async_trait]
pub trait WarehouseSession: Send + Sync {
    /// Execute `sql` exactly as given.
    async fn execute(&self, sql: &str) -> QuarryResult<QueryOutput>;
}

/// Opens warehouse sessions.
#[async_trait]
pub trait WarehouseGateway: Send + Sync {
    async fn connect(&self, user: Option<&str>) -> QuarryResult<Box<dyn WarehouseSession>>;

    /// Cheap reachability check for health endpoints.
    async fn ping(&self) -> QuarryResult<()> {
        self.connect(None).await?.execute("SELECT 1").await.map(|_| ())
    }
}

/// Prefix `sql` with an audit comment naming the caller.
///
/// Line breaks in the user id are flattened so it cannot end the comment
/// and inject a statement.
pub fn audited_sql(user: Option<&str>, sql: &str) -> String {
    match user {
        Some(user) if !user.trim().is_empty() => {
            let user: String = user
                .chars()
                .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
                .collect();
            format!("-- Executed by: {}\n{}", user.trim(), sql)
        }
        _ => sql.to_string(),
    }
}
