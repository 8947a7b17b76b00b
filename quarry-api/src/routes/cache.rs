//! Cache maintenance endpoints.
//!
//! - GET /cache/memory - store usage against the soft budget
//! - GET /cache/stats - hit/miss counters, overall and per statement pattern
//! - GET /cache/versions?tables=a,b - current table versions
//! - DELETE /cache - drop one entry (`hash`, or `sql` + `userId`) or all (`all: true`)
//! - DELETE /cache/entries/:hash - drop one entry by fingerprint
//! - POST /cache/prewarm?limit=n - re-run the top pre-warm candidates
//!
//! Unlike `/query`, these surface store failures as 503: there is no
//! warehouse to fall back to.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    routing::{delete, get, post},
    Json, Router,
};
use quarry_core::TableVersion;
use quarry_storage::{CacheStats, PrewarmReport, QueryCache, DEFAULT_PREWARM_LIMIT};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Usage share at which memory status becomes `warning`.
pub const WARNING_USAGE_PERCENT: f64 = 60.0;

/// Usage share at which memory status becomes `critical`.
pub const CRITICAL_USAGE_PERCENT: f64 = 80.0;

/// Largest `limit` a pre-warm call accepts.
pub const MAX_PREWARM_LIMIT: usize = 50;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryStatus {
    Healthy,
    Warning,
    Critical,
}

impl MemoryStatus {
    pub fn from_usage(percent: f64) -> Self {
        if percent >= CRITICAL_USAGE_PERCENT {
            MemoryStatus::Critical
        } else if percent >= WARNING_USAGE_PERCENT {
            MemoryStatus::Warning
        } else {
            MemoryStatus::Healthy
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryReport {
    pub backend: String,
    pub used_memory: u64,
    pub max_memory: u64,
    pub reserve: u64,
    /// Share of `max_memory` in use, two decimals.
    pub usage_percent: f64,
    pub status: MemoryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak_memory: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_keys: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evicted_keys: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRequest {
    pub hash: Option<String>,
    pub sql: Option<String>,
    pub user_id: Option<String>,
    #[serde(default)]
    pub all: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub deleted: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VersionsQuery {
    pub tables: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionsResponse {
    pub tables: Vec<TableVersion>,
    /// `table:version|table:version`
    pub vector: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrewarmQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: CacheStats,
    pub hit_rate: f64,
}

// ============================================================================
// HANDLERS
// ============================================================================

pub async fn memory(State(cache): State<QueryCache>) -> ApiResult<Json<MemoryReport>> {
    let memory = cache.memory().await?;
    let config = cache.config();

    let usage_percent = if config.capacity_bytes == 0 {
        0.0
    } else {
        let raw = memory.used_bytes as f64 / config.capacity_bytes as f64 * 100.0;
        (raw * 100.0).round() / 100.0
    };

    Ok(Json(MemoryReport {
        backend: cache.backend().name().to_string(),
        used_memory: memory.used_bytes,
        max_memory: config.capacity_bytes,
        reserve: config.reserve_bytes,
        usage_percent,
        status: MemoryStatus::from_usage(usage_percent),
        peak_memory: memory.peak_bytes,
        total_keys: memory.total_keys,
        evicted_keys: memory.evicted_keys,
    }))
}

pub async fn stats(State(cache): State<QueryCache>) -> Json<StatsResponse> {
    let stats = cache.stats();
    let hit_rate = stats.hit_rate();
    Json(StatsResponse { stats, hit_rate })
}

pub async fn prewarm(
    State(cache): State<QueryCache>,
    Query(query): Query<PrewarmQuery>,
) -> ApiResult<Json<PrewarmReport>> {
    let limit = query.limit.unwrap_or(DEFAULT_PREWARM_LIMIT);
    if limit == 0 || limit > MAX_PREWARM_LIMIT {
        return Err(ApiError::invalid_input(format!(
            "limit must be between 1 and {}",
            MAX_PREWARM_LIMIT
        )));
    }
    Ok(Json(cache.prewarm(limit).await))
}

pub async fn versions(
    State(cache): State<QueryCache>,
    Query(query): Query<VersionsQuery>,
) -> ApiResult<Json<VersionsResponse>> {
    let mut tables: Vec<String> = Vec::new();
    for table in query.tables.as_deref().unwrap_or_default().split(',') {
        let table = table.trim().to_ascii_lowercase();
        if !table.is_empty() && !tables.contains(&table) {
            tables.push(table);
        }
    }
    if tables.is_empty() {
        return Err(ApiError::missing_field("tables"));
    }

    let vector = cache.version_vector(&tables).await?;
    Ok(Json(VersionsResponse {
        vector: vector.to_string(),
        tables: vector.entries().to_vec(),
    }))
}

pub async fn delete_entries(
    State(cache): State<QueryCache>,
    payload: Result<Json<DeleteRequest>, JsonRejection>,
) -> ApiResult<Json<DeleteResponse>> {
    let Json(request) = payload.map_err(|e| ApiError::invalid_input(e.body_text()))?;

    if request.all {
        let deleted = cache.clear().await?;
        tracing::info!(deleted, "Cache cleared");
        return Ok(Json(DeleteResponse {
            deleted,
            hash: None,
        }));
    }

    let hash = match (request.hash, request.sql) {
        (Some(hash), _) if !hash.trim().is_empty() => hash.trim().to_string(),
        (_, Some(sql)) if !sql.trim().is_empty() => {
            cache
                .current_fingerprint(&sql, request.user_id.as_deref())
                .await?
        }
        _ => return Err(ApiError::missing_field("hash")),
    };

    delete_one(&cache, hash).await
}

pub async fn delete_by_hash(
    State(cache): State<QueryCache>,
    Path(hash): Path<String>,
) -> ApiResult<Json<DeleteResponse>> {
    delete_one(&cache, hash).await
}

async fn delete_one(cache: &QueryCache, hash: String) -> ApiResult<Json<DeleteResponse>> {
    if !cache.delete_entry(&hash).await? {
        return Err(ApiError::not_found(format!("No cache entry for {}", hash)));
    }
    tracing::info!(hash = %hash, "Cache entry deleted");
    Ok(Json(DeleteResponse {
        deleted: 1,
        hash: Some(hash),
    }))
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", delete(delete_entries))
        .route("/entries/:hash", delete(delete_by_hash))
        .route("/memory", get(memory))
        .route("/stats", get(stats))
        .route("/versions", get(versions))
        .route("/prewarm", post(prewarm))
}
