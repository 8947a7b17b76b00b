//! Warehouse catalog metadata consumed by the planner.

use std::collections::HashMap;

use async_trait::async_trait;
use quarry_core::QuarryResult;
use serde::{Deserialize, Serialize};

/// One foreign key: `child_table.child_column -> parent_table.parent_column`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub child_table: String,
    pub child_column: String,
    pub parent_table: String,
    pub parent_column: String,
}

impl Relationship {
    pub fn new(
        child_table: impl Into<String>,
        child_column: impl Into<String>,
        parent_table: impl Into<String>,
        parent_column: impl Into<String>,
    ) -> Self {
        Self {
            child_table: child_table.into(),
            child_column: child_column.into(),
            parent_table: parent_table.into(),
            parent_column: parent_column.into(),
        }
    }
}

/// Read-only view of the warehouse catalog.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Size proxy per table, e.g. row count. Higher means costlier to join.
    async fn table_weights(&self) -> QuarryResult<HashMap<String, f64>>;

    /// Every foreign key relationship in scope.
    async fn relationships(&self) -> QuarryResult<Vec<Relationship>>;
}

/// Catalog held in memory, for tests and fixed deployments.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    weights: HashMap<String, f64>,
    relationships: Vec<Relationship>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: impl Into<String>, weight: f64) -> Self {
        self.weights.insert(table.into(), weight);
        self
    }

    pub fn with_relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.push(relationship);
        self
    }
}

#[async_trait]
impl CatalogSource for StaticCatalog {
    async fn table_weights(&self) -> QuarryResult<HashMap<String, f64>> {
        Ok(self.weights.clone())
    }

    async fn relationships(&self) -> QuarryResult<Vec<Relationship>> {
        Ok(self.relationships.clone())
    }
}
