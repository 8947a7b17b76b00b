//! Observability: tracing subscriber, Prometheus metrics, request middleware.

pub mod metrics;
pub mod middleware;
pub mod tracer;

pub use metrics::{metrics_handler, QuarryMetrics, METRICS};
pub use middleware::observability_middleware;
pub use tracer::{init_tracer, LogFormat, TelemetryConfig};
