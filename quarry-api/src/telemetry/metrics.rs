//! Prometheus metrics and the `/metrics` endpoint.

use axum::{http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter, CounterVec, Encoder,
    HistogramVec, IntCounter, TextEncoder,
};
use quarry_core::CacheStatus;
use quarry_storage::{Admission, QueryResponse};

use crate::error::{ApiError, ApiResult};

/// HTTP request latency buckets (seconds)
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Warehouse latency buckets (seconds). Analytical queries run long.
const WAREHOUSE_LATENCY_BUCKETS: &[f64] = &[
    0.010, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
];

pub static METRICS: Lazy<ApiResult<QuarryMetrics>> = Lazy::new(QuarryMetrics::new);

fn registration_error(name: &str, e: prometheus::Error) -> ApiError {
    ApiError::internal_error(format!("Failed to register {}: {}", name, e))
}

#[derive(Clone)]
pub struct QuarryMetrics {
    /// labels: method, path, status
    pub http_requests_total: CounterVec,

    /// labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// labels: status (HIT, MISS, BYPASS)
    pub cache_lookups_total: CounterVec,

    /// labels: outcome (admitted, rejected)
    pub cache_admissions_total: CounterVec,

    /// Table version increments issued by the write lane
    pub version_bumps_total: IntCounter,

    /// labels: lane (read, write, bypass)
    pub warehouse_duration_seconds: HistogramVec,
}

impl QuarryMetrics {
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "quarry_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| registration_error("http_requests_total", e))?,

            http_request_duration_seconds: register_histogram_vec!(
                "quarry_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| registration_error("http_request_duration_seconds", e))?,

            cache_lookups_total: register_counter_vec!(
                "quarry_cache_lookups_total",
                "Query cache outcomes",
                &["status"]
            )
            .map_err(|e| registration_error("cache_lookups_total", e))?,

            cache_admissions_total: register_counter_vec!(
                "quarry_cache_admissions_total",
                "Admission control decisions for cache writes",
                &["outcome"]
            )
            .map_err(|e| registration_error("cache_admissions_total", e))?,

            version_bumps_total: register_int_counter!(
                "quarry_version_bumps_total",
                "Table version increments"
            )
            .map_err(|e| registration_error("version_bumps_total", e))?,

            warehouse_duration_seconds: register_histogram_vec!(
                "quarry_warehouse_duration_seconds",
                "Time spent on statements that reached the warehouse",
                &["lane"],
                WAREHOUSE_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| registration_error("warehouse_duration_seconds", e))?,
        })
    }

    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    /// Record the cache outcome of one `/query` call.
    pub fn record_query(&self, response: &QueryResponse) {
        self.cache_lookups_total
            .with_label_values(&[response.status.as_str()])
            .inc();

        if let Some(admission) = &response.admission {
            self.record_admission(admission);
        }

        let lane = if response.is_write() {
            // Invalidation runs before and after execution.
            self.version_bumps_total
                .inc_by(2 * response.versions.len() as u64);
            Some("write")
        } else {
            match response.status {
                CacheStatus::Hit => None,
                CacheStatus::Miss => Some("read"),
                CacheStatus::Bypass => Some("bypass"),
            }
        };
        if let Some(lane) = lane {
            self.warehouse_duration_seconds
                .with_label_values(&[lane])
                .observe(response.duration.as_secs_f64());
        }
    }

    pub fn record_admission(&self, admission: &Admission) {
        self.cache_admissions_total
            .with_label_values(&[admission.as_str()])
            .inc();
    }
}

/// GET /metrics - Prometheus text format.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}
