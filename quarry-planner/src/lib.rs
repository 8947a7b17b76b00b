//! QUARRY Planner - Join Path Planning
//!
//! Given the tables a query builder selected and the warehouse's foreign
//! key metadata, find the smallest set of bridge tables and join steps
//! that connects them:
//!
//! 1. [`JoinGraph::build`] turns relationships into an undirected graph,
//!    weighting each edge by the summed size proxy of its two tables.
//! 2. [`shortest_path`] runs Dijkstra between two tables.
//! 3. [`plan_joins`] runs it for every pair of candidates and unions the
//!    results into a [`JoinPlan`].
//!
//! The graph is rebuilt per planning call from a [`CatalogSource`].

pub mod catalog;
pub mod dijkstra;
pub mod graph;
pub mod plan;

pub use catalog::{CatalogSource, Relationship, StaticCatalog};
pub use dijkstra::{shortest_path, WeightedPath};
pub use graph::{JoinEdge, JoinGraph, DEFAULT_TABLE_WEIGHT};
pub use plan::{plan_joins, plan_joins_strict, JoinPlan, JoinStep};
