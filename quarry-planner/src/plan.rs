//! Join plans from pairwise shortest paths.

use std::collections::{BTreeSet, HashSet};

use quarry_core::{PlannerError, QuarryResult};
use serde::Serialize;
use tracing::{debug, warn};

use crate::dijkstra::{shortest_path, WeightedPath};
use crate::graph::JoinGraph;

/// One join along a path.
///
/// `from_table` and `to_table` follow the path direction. The column
/// pair comes from the relationship behind the edge; `child_table` names
/// the side that owns `child_column`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinStep {
    pub from_table: String,
    pub to_table: String,
    pub child_table: String,
    pub child_column: String,
    pub parent_column: String,
}

impl JoinStep {
    /// Unordered table pair.
    pub fn pair(&self) -> (&str, &str) {
        if self.from_table <= self.to_table {
            (&self.from_table, &self.to_table)
        } else {
            (&self.to_table, &self.from_table)
        }
    }
}

/// Result of planning a set of candidate tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPlan {
    /// Every candidate, connected or not, plus every bridge table on a
    /// chosen path.
    pub tables: BTreeSet<String>,
    /// Join steps of every path in pair order. Steps shared by
    /// overlapping paths repeat; see [`JoinPlan::deduplicated_joins`].
    pub joins: Vec<JoinStep>,
    /// The shortest path found for each connected candidate pair.
    pub paths: Vec<WeightedPath>,
    /// Candidate pairs with no connecting path.
    pub unreachable: Vec<(String, String)>,
}

impl JoinPlan {
    /// Tables in the plan that were not requested.
    pub fn bridge_tables<'a>(
        &'a self,
        candidates: &'a [String],
    ) -> impl Iterator<Item = &'a str> {
        self.tables
            .iter()
            .map(String::as_str)
            .filter(move |t| !candidates.iter().any(|c| c == t))
    }

    /// [`joins`](Self::joins) with repeated table pairs dropped, keeping
    /// each pair at its first position.
    pub fn deduplicated_joins(&self) -> Vec<JoinStep> {
        let mut seen: HashSet<(&str, &str)> = HashSet::new();
        self.joins
            .iter()
            .filter(|step| seen.insert(step.pair()))
            .cloned()
            .collect()
    }

    pub fn total_weight(&self) -> f64 {
        self.paths.iter().map(|p| p.total_weight).sum()
    }
}

/// Plan joins for `candidates`.
///
/// Runs a shortest-path search for every unordered candidate pair and
/// unions the results. A pair with no path is logged and recorded in
/// [`JoinPlan::unreachable`]; it never fails the plan. Every path
/// contributes all of its steps, so hops shared by overlapping paths
/// appear once per path.
pub fn plan_joins(graph: &JoinGraph, candidates: &[String]) -> JoinPlan {
    let mut unique: Vec<&str> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if !unique.contains(&candidate.as_str()) {
            unique.push(candidate);
        }
    }

    let mut plan = JoinPlan {
        tables: unique.iter().map(|t| t.to_string()).collect(),
        ..Default::default()
    };

    for (i, from) in unique.iter().enumerate() {
        for to in &unique[i + 1..] {
            let Some(path) = shortest_path(graph, from, to) else {
                warn!(from = %from, to = %to, "No join path between tables");
                plan.unreachable.push((from.to_string(), to.to_string()));
                continue;
            };

            for (a, b) in path.hops_iter() {
                let Some(edge) = graph.edge(a, b) else {
                    continue;
                };
                plan.joins.push(JoinStep {
                    from_table: a.to_string(),
                    to_table: b.to_string(),
                    child_table: edge.child_table.clone(),
                    child_column: edge.child_column.clone(),
                    parent_column: edge.parent_column.clone(),
                });
            }

            plan.tables.extend(path.tables.iter().cloned());
            plan.paths.push(path);
        }
    }

    debug!(
        candidates = unique.len(),
        tables = plan.tables.len(),
        joins = plan.joins.len(),
        unreachable = plan.unreachable.len(),
        "Join plan built"
    );
    plan
}

/// Like [`plan_joins`], but every candidate must exist in the graph and
/// every pair must be connected.
pub fn plan_joins_strict(graph: &JoinGraph, candidates: &[String]) -> QuarryResult<JoinPlan> {
    if candidates.is_empty() {
        return Err(PlannerError::NoCandidates.into());
    }
    if let Some(missing) = candidates.iter().find(|t| !graph.contains(t)) {
        return Err(PlannerError::UnknownTable {
            table: missing.clone(),
        }
        .into());
    }

    let plan = plan_joins(graph, candidates);
    if let Some((from, to)) = plan.unreachable.first() {
        return Err(PlannerError::Unreachable {
            from: from.clone(),
            to: to.clone(),
        }
        .into());
    }
    Ok(plan)
}
