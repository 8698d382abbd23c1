//! Metrics for the chain core.
//!
//! Prometheus-backed counters, gauges, and histograms plus a small HTTP
//! exporter serving the text exposition format.

mod prometheus;

pub use self::prometheus::{run_prometheus_http_server, ChainMetrics, MetricsRegistry};
