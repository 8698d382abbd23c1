//! Prometheus-backed metrics and HTTP exporter.
//!
//! This module defines a [`MetricsRegistry`] that owns a Prometheus
//! registry and a set of strongly-typed chain metrics, and an async HTTP
//! exporter that serves `/metrics` using `hyper`.

use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    body::Incoming, header, server::conn::http1, service::service_fn, Method, Request, Response,
    StatusCode,
};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};

/// Chain-ingestion Prometheus metrics.
///
/// These are registered into a [`Registry`] and updated by the chain
/// service as blocks are connected, rejected, parked, and reorganized.
#[derive(Clone)]
pub struct ChainMetrics {
    /// Latency of connecting one block (verify + execute + index), in
    /// seconds.
    pub block_connect_seconds: Histogram,
    /// Total number of blocks connected to the main chain.
    pub blocks_connected: IntCounter,
    /// Total number of blocks rejected as invalid.
    pub blocks_rejected: IntCounter,
    /// Total number of chain reorganizations.
    pub reorgs: IntCounter,
    /// Current number of parked orphan blocks.
    pub orphan_pool_size: IntGauge,
}

impl ChainMetrics {
    /// Registers chain metrics into the given `Registry`.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let block_connect_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "chain_block_connect_seconds",
                "Time to verify, execute, and index one block in seconds",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
            ]),
        )?;
        registry.register(Box::new(block_connect_seconds.clone()))?;

        let blocks_connected = IntCounter::with_opts(Opts::new(
            "chain_blocks_connected_total",
            "Total number of blocks connected to the main chain",
        ))?;
        registry.register(Box::new(blocks_connected.clone()))?;

        let blocks_rejected = IntCounter::with_opts(Opts::new(
            "chain_blocks_rejected_total",
            "Total number of blocks rejected as invalid",
        ))?;
        registry.register(Box::new(blocks_rejected.clone()))?;

        let reorgs = IntCounter::with_opts(Opts::new(
            "chain_reorgs_total",
            "Total number of chain reorganizations",
        ))?;
        registry.register(Box::new(reorgs.clone()))?;

        let orphan_pool_size = IntGauge::with_opts(Opts::new(
            "chain_orphan_pool_size",
            "Current number of parked orphan blocks",
        ))?;
        registry.register(Box::new(orphan_pool_size.clone()))?;

        Ok(Self {
            block_connect_seconds,
            blocks_connected,
            blocks_rejected,
            reorgs,
            orphan_pool_size,
        })
    }
}

/// Wrapper around a Prometheus registry and the chain metrics.
///
/// This is the main handle passed around in the node. It can be wrapped
/// in an [`Arc`] and shared across threads/tasks.
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Registry,
    pub chain: ChainMetrics,
}

impl MetricsRegistry {
    /// Creates a new `MetricsRegistry` with a fresh underlying `Registry`
    /// and registers the chain metrics.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("chaincore".to_string()), None)?;
        let chain = ChainMetrics::register(&registry)?;
        Ok(Self { registry, chain })
    }

    /// Encodes all metrics in this registry into the Prometheus text
    /// format.
    pub fn gather_text(&self) -> String {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!(error = %e, "failed to encode Prometheus metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Runs an HTTP server that exposes Prometheus metrics.
///
/// The server listens on `addr` and serves `GET /metrics` with the
/// Prometheus text exposition format. All other paths return 404.
///
/// This function is `async` and is intended to be spawned onto a Tokio
/// runtime, e.g.:
///
/// ```ignore
/// let registry = Arc::new(MetricsRegistry::new()?);
/// let addr: SocketAddr = "127.0.0.1:9898".parse()?;
/// tokio::spawn(run_prometheus_http_server(registry.clone(), addr));
/// ```
pub async fn run_prometheus_http_server(
    metrics: Arc<MetricsRegistry>,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let svc = service_fn(move |req| {
                let metrics = metrics.clone();
                handle_request(req, metrics)
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, svc).await {
                tracing::error!(error = %err, "prometheus HTTP server error");
            }
        });
    }
}

async fn handle_request(
    req: Request<Incoming>,
    metrics: Arc<MetricsRegistry>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = metrics.gather_text();
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
                .body(Full::new(Bytes::from(body)))
                .unwrap())
        }
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("not found")))
            .unwrap()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Registry;

    #[test]
    fn chain_metrics_register_and_record() {
        let registry = Registry::new();
        let metrics = ChainMetrics::register(&registry).expect("register metrics");

        metrics.block_connect_seconds.observe(0.042);
        metrics.blocks_connected.inc();
        metrics.blocks_rejected.inc();
        metrics.reorgs.inc();
        metrics.orphan_pool_size.set(3);

        let metric_families = registry.gather();
        assert!(!metric_families.is_empty());
    }

    #[test]
    fn metrics_registry_gather_text_works() {
        let registry = MetricsRegistry::new().expect("create metrics registry");
        registry.chain.block_connect_seconds.observe(0.01);
        let text = registry.gather_text();
        assert!(text.contains("chain_block_connect_seconds"));
    }
}
