//! POST /query - run a statement through the cache.
//!
//! The body is `{ sql, userId?, noCache? }`. Successful responses carry the
//! rows as a JSON array plus cache headers describing how they were served.
//! A read returning zero rows answers 404 and is never cached.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use quarry_storage::{QueryCache, QueryRequest, QueryResponse};
use serde_json::Value;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::telemetry::METRICS;

// ============================================================================
// HEADERS
// ============================================================================

pub const X_CACHE_STATUS: HeaderName = HeaderName::from_static("x-cache-status");
pub const X_CACHE_HASH: HeaderName = HeaderName::from_static("x-cache-hash");
pub const X_QUERY_DURATION: HeaderName = HeaderName::from_static("x-query-duration");
pub const X_IS_WRITE: HeaderName = HeaderName::from_static("x-is-write");
pub const X_CACHE_TYPE: HeaderName = HeaderName::from_static("x-cache-type");
pub const X_ROW_COUNT: HeaderName = HeaderName::from_static("x-row-count");
pub const X_STATS_HASH: HeaderName = HeaderName::from_static("x-stats-hash");

fn header_value(value: &str) -> ApiResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| ApiError::internal_error(format!("Invalid header value: {}", e)))
}

fn cache_headers(response: &QueryResponse) -> ApiResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(X_CACHE_STATUS, HeaderValue::from_static(response.status.as_str()));
    if let Some(fingerprint) = &response.fingerprint {
        headers.insert(X_CACHE_HASH, header_value(fingerprint)?);
    }
    headers.insert(
        X_QUERY_DURATION,
        header_value(&format!("{}ms", response.duration.as_millis()))?,
    );
    headers.insert(
        X_IS_WRITE,
        HeaderValue::from_static(if response.is_write() { "true" } else { "false" }),
    );
    headers.insert(
        X_CACHE_TYPE,
        HeaderValue::from_static(response.classification.strategy.as_str()),
    );
    headers.insert(X_ROW_COUNT, HeaderValue::from(response.row_count()));
    headers.insert(X_STATS_HASH, header_value(&response.stats_hash)?);
    Ok(headers)
}

// ============================================================================
// REQUEST PARSING
// ============================================================================

/// Validate the raw body. `sql` must be a non-blank string; `userId` and
/// `noCache` are optional but must have the right type when present.
pub fn parse_query_request(body: &Value) -> ApiResult<QueryRequest> {
    let object = body
        .as_object()
        .ok_or_else(|| ApiError::invalid_input("Request body must be a JSON object"))?;

    let sql = match object.get("sql") {
        None | Some(Value::Null) => return Err(ApiError::missing_field("sql")),
        Some(Value::String(sql)) if sql.trim().is_empty() => {
            return Err(ApiError::missing_field("sql"))
        }
        Some(Value::String(sql)) => sql.clone(),
        Some(_) => return Err(ApiError::invalid_input("Field 'sql' must be a string")),
    };

    let mut request = QueryRequest::new(sql);

    match object.get("userId") {
        None | Some(Value::Null) => {}
        Some(Value::String(user)) => request = request.with_user(user.clone()),
        Some(_) => return Err(ApiError::invalid_input("Field 'userId' must be a string")),
    }

    match object.get("noCache") {
        None | Some(Value::Null) => {}
        Some(Value::Bool(no_cache)) => request = request.with_no_cache(*no_cache),
        Some(_) => return Err(ApiError::invalid_input("Field 'noCache' must be a boolean")),
    }

    Ok(request)
}

// ============================================================================
// HANDLERS
// ============================================================================

pub async fn run_query(
    State(cache): State<QueryCache>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(body) = payload.map_err(|e| ApiError::invalid_input(e.body_text()))?;
    let request = parse_query_request(&body)?;

    let response = cache.execute(request).await?;
    if let Ok(metrics) = METRICS.as_ref() {
        metrics.record_query(&response);
    }

    let headers = cache_headers(&response)?;
    if !response.is_write() && response.rows.is_empty() {
        return Ok((headers, ApiError::no_records()).into_response());
    }
    Ok((headers, Json(response.rows)).into_response())
}

pub fn create_router() -> Router<AppState> {
    Router::new().route("/", post(run_query))
}
