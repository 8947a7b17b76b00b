//! Dijkstra's shortest path over a [`JoinGraph`].
//!
//! Binary-heap implementation: `O((V + E) log V)` per search. The search
//! stops as soon as the target is popped from the heap.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use serde::Serialize;

use crate::graph::JoinGraph;

/// A shortest path between two tables.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightedPath {
    /// Tables from source to target, inclusive.
    pub tables: Vec<String>,
    pub total_weight: f64,
}

impl WeightedPath {
    pub fn source(&self) -> Option<&str> {
        self.tables.first().map(String::as_str)
    }

    pub fn target(&self) -> Option<&str> {
        self.tables.last().map(String::as_str)
    }

    /// Number of edges on the path.
    pub fn hops(&self) -> usize {
        self.tables.len().saturating_sub(1)
    }

    /// Consecutive table pairs along the path.
    pub fn hops_iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tables
            .windows(2)
            .map(|pair| (pair[0].as_str(), pair[1].as_str()))
    }
}

/// Heap entry, ordered so the smallest distance pops first.
#[derive(Debug, Clone)]
struct HeapEntry<'a> {
    table: &'a str,
    distance: f64,
}

impl PartialEq for HeapEntry<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry<'_> {}

impl PartialOrd for HeapEntry<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for a min-heap; ties break on name for determinism.
        other
            .distance
            .partial_cmp(&self.distance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.table.cmp(self.table))
    }
}

/// Cheapest path from `source` to `target`, or `None` when either table is
/// absent or they are not connected.
pub fn shortest_path(graph: &JoinGraph, source: &str, target: &str) -> Option<WeightedPath> {
    let source = graph.resolve(source)?;
    let target = graph.resolve(target)?;
    if source == target {
        return Some(WeightedPath {
            tables: vec![source.to_string()],
            total_weight: 0.0,
        });
    }

    let mut distances: HashMap<&str, f64> = HashMap::new();
    let mut parent: HashMap<&str, &str> = HashMap::new();
    let mut finalized: HashSet<&str> = HashSet::new();
    let mut heap = BinaryHeap::new();

    distances.insert(source, 0.0);
    heap.push(HeapEntry {
        table: source,
        distance: 0.0,
    });

    while let Some(HeapEntry { table, distance }) = heap.pop() {
        if !finalized.insert(table) {
            continue;
        }
        if table == target {
            return Some(reconstruct(&parent, source, table, distance));
        }

        for (neighbor, edge) in graph.neighbors(table) {
            if finalized.contains(neighbor) {
                continue;
            }
            let candidate = distance + edge.weight;
            let better = distances
                .get(neighbor)
                .map_or(true, |&known| candidate < known);
            if better {
                distances.insert(neighbor, candidate);
                parent.insert(neighbor, table);
                heap.push(HeapEntry {
                    table: neighbor,
                    distance: candidate,
                });
            }
        }
    }

    None
}

fn reconstruct(
    parent: &HashMap<&str, &str>,
    source: &str,
    target: &str,
    total: f64,
) -> WeightedPath {
    let mut tables = vec![target.to_string()];
    let mut current = target;
    while current != source {
        match parent.get(current) {
            Some(&previous) => {
                tables.push(previous.to_string());
                current = previous;
            }
            None => break,
        }
    }
    tables.reverse();
    WeightedPath {
        tables,
        total_weight: total,
    }
}
