//! Weighted table relationship graph.

use std::collections::{BTreeMap, HashMap};

use quarry_core::config::DEFAULT_JOIN_WEIGHT_SCALE;
use serde::Serialize;
use tracing::warn;

use crate::catalog::Relationship;

/// Weight used for a table with no usable size proxy.
pub const DEFAULT_TABLE_WEIGHT: f64 = 1.0;

/// Edge between two tables, carrying the join columns of the relationship
/// that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinEdge {
    pub weight: f64,
    pub child_table: String,
    pub child_column: String,
    pub parent_table: String,
    pub parent_column: String,
}

/// Undirected graph of tables joined by foreign keys.
///
/// Adjacency is kept in ordered maps so equal-cost paths resolve the same
/// way on every run. At most one edge exists per table pair; when several
/// relationships connect the same pair the last one wins.
#[derive(Debug, Clone, Default)]
pub struct JoinGraph {
    adjacency: BTreeMap<String, BTreeMap<String, JoinEdge>>,
}

impl JoinGraph {
    /// Build the graph. Edge weight is `(w(child) + w(parent)) / scale`.
    ///
    /// Tables missing from `weights`, or with a negative or non-finite
    /// weight, count as [`DEFAULT_TABLE_WEIGHT`]. A non-positive scale
    /// falls back to the default.
    pub fn build(
        weights: &HashMap<String, f64>,
        relationships: &[Relationship],
        scale: f64,
    ) -> Self {
        let scale = if scale.is_finite() && scale > 0.0 {
            scale
        } else {
            warn!(scale, "Invalid join weight scale, using default");
            DEFAULT_JOIN_WEIGHT_SCALE
        };
        let weight_of = |table: &str| match weights.get(table) {
            Some(w) if w.is_finite() && *w >= 0.0 => *w,
            _ => DEFAULT_TABLE_WEIGHT,
        };

        let mut graph = Self::default();
        for table in weights.keys() {
            graph.adjacency.entry(table.clone()).or_default();
        }

        for rel in relationships {
            let edge = JoinEdge {
                weight: (weight_of(&rel.child_table) + weight_of(&rel.parent_table)) / scale,
                child_table: rel.child_table.clone(),
                child_column: rel.child_column.clone(),
                parent_table: rel.parent_table.clone(),
                parent_column: rel.parent_column.clone(),
            };
            graph
                .adjacency
                .entry(rel.child_table.clone())
                .or_default()
                .insert(rel.parent_table.clone(), edge.clone());
            graph
                .adjacency
                .entry(rel.parent_table.clone())
                .or_default()
                .insert(rel.child_table.clone(), edge);
        }

        graph
    }

    pub fn contains(&self, table: &str) -> bool {
        self.adjacency.contains_key(table)
    }

    /// The graph's own copy of `table`'s name.
    pub fn resolve(&self, table: &str) -> Option<&str> {
        self.adjacency
            .get_key_value(table)
            .map(|(name, _)| name.as_str())
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.adjacency.keys().map(String::as_str)
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    /// Number of undirected edges.
    pub fn edge_count(&self) -> usize {
        let directed: usize = self.adjacency.values().map(BTreeMap::len).sum();
        let self_loops = self
            .adjacency
            .iter()
            .filter(|(table, neighbors)| neighbors.contains_key(*table))
            .count();
        (directed - self_loops) / 2 + self_loops
    }

    pub fn edge(&self, a: &str, b: &str) -> Option<&JoinEdge> {
        self.adjacency.get(a)?.get(b)
    }

    /// Neighbors of `table` with the connecting edge, in name order.
    pub fn neighbors<'a>(&'a self, table: &str) -> impl Iterator<Item = (&'a str, &'a JoinEdge)> {
        self.adjacency
            .get(table)
            .into_iter()
            .flat_map(|neighbors| neighbors.iter().map(|(t, e)| (t.as_str(), e)))
    }
}
