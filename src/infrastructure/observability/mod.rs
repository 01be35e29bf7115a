//! Observability infrastructure - Prometheus metrics

mod metrics;

pub use self::metrics::{create_metrics_router, init_metrics, PrometheusMetrics};
