//! POST /join-plan - minimum-cost join paths between requested tables.
//!
//! The graph is rebuilt from the catalog on every call; catalogs are small
//! and this keeps plans in step with schema changes.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use quarry_planner::{plan_joins, plan_joins_strict, CatalogSource, JoinGraph, JoinPlan};
use quarry_storage::QueryCache;
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPlanRequest {
    pub tables: Vec<String>,
    /// Fail on unknown tables or disconnected pairs instead of skipping them.
    #[serde(default)]
    pub strict: bool,
    /// Drop join steps repeated by overlapping paths.
    #[serde(default)]
    pub dedupe: bool,
}

pub async fn join_plan(
    State(catalog): State<Arc<dyn CatalogSource>>,
    State(cache): State<QueryCache>,
    payload: Result<Json<JoinPlanRequest>, JsonRejection>,
) -> ApiResult<Json<JoinPlan>> {
    let Json(request) = payload.map_err(|e| ApiError::invalid_input(e.body_text()))?;

    let candidates: Vec<String> = request
        .tables
        .iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    if candidates.is_empty() {
        return Err(ApiError::missing_field("tables"));
    }

    let weights = catalog.table_weights().await?;
    let relationships = catalog.relationships().await?;
    let graph = JoinGraph::build(&weights, &relationships, cache.config().join_weight_scale);
    tracing::debug!(
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        candidates = candidates.len(),
        "Join graph built"
    );

    let mut plan = if request.strict {
        plan_joins_strict(&graph, &candidates)?
    } else {
        plan_joins(&graph, &candidates)
    };
    if request.dedupe {
        plan.joins = plan.deduplicated_joins();
    }
    Ok(Json(plan))
}

pub fn create_router() -> Router<AppState> {
    Router::new().route("/", post(join_plan))
}
