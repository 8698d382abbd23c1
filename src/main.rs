// Minimal demo node that wires up the chain-core library:
//
// - RocksDB-backed chain and state databases
// - structural header validity, no-op contract VM and governance
// - Prometheus metrics exporter on /metrics
// - a simple loop that produces signed (currently empty) blocks at a
//   fixed interval and feeds them through the chain service.

use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;

use chain_core::{
    run_prometheus_http_server, BasicHeaderValidity, Block, ChainService, CoreConfig, Genesis,
    MetricsRegistry, NoopGovernance, NoopMempool, NoopRuntime, RocksKv, StateDb,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run_node().await {
        tracing::error!(error = %err, "fatal error");
        std::process::exit(1);
    }
}

async fn run_node() -> Result<(), String> {
    // For now, just use defaults. Later this can load from a file, CLI
    // flags, or environment variables.
    let cfg = CoreConfig::default();

    // ---------------------------
    // Metrics registry + exporter
    // ---------------------------

    let metrics = Arc::new(
        MetricsRegistry::new().map_err(|e| format!("failed to initialise metrics registry: {e}"))?,
    );

    if cfg.metrics.enabled {
        let metrics_clone = metrics.clone();
        let addr = cfg.metrics.listen_addr;
        tokio::spawn(async move {
            if let Err(e) = run_prometheus_http_server(metrics_clone, addr).await {
                tracing::error!(error = %e, "metrics HTTP server error");
            }
        });
        tracing::info!("metrics exporter listening on http://{addr}/metrics");
    }

    // ---------------------------
    // Storage + state DB
    // ---------------------------

    let store = Arc::new(
        RocksKv::open(&cfg.storage)
            .map_err(|e| format!("failed to open RocksDB store at {}: {e}", cfg.storage.path))?,
    );
    let sdb = Arc::new(
        StateDb::new(store.clone()).map_err(|e| format!("failed to open state db: {e}"))?,
    );

    // ---------------------------
    // Chain service
    // ---------------------------

    let validator = BasicHeaderValidity::new(cfg.chain.max_block_size_bytes);
    let (mut service, handle) = ChainService::new(
        &cfg,
        store,
        sdb,
        validator,
        Arc::new(NoopRuntime),
        Arc::new(NoopGovernance),
        Arc::new(NoopMempool),
        Some(metrics),
    );

    // Demo allocation; a real deployment loads this from a genesis file.
    let genesis = Genesis {
        alloc: Vec::new(),
        timestamp: current_unix_timestamp(),
    };
    let best = service
        .bootstrap(&genesis)
        .map_err(|e| format!("bootstrap failed: {e}"))?;
    tracing::info!(best, "chain ready");

    let service_task = tokio::spawn(service.run());

    // ---------------------------
    // Producer identity (demo)
    // ---------------------------

    // In a real node, this comes from the accounts service; here a fresh
    // key per run is enough to exercise signing and verification.
    let producer_key = SigningKey::generate(&mut OsRng);

    // ---------------------------
    // Simple production loop
    // ---------------------------

    let block_interval = cfg.chain.block_interval_secs;
    tracing::info!(block_interval, "starting demo block producer");

    loop {
        if service_task.is_finished() {
            return Err("chain service stopped".to_string());
        }

        let parent = match handle.get_best_block().await {
            Ok(block) => block,
            Err(e) => {
                tracing::error!(error = %e, "failed to fetch best block");
                tokio::time::sleep(Duration::from_secs(block_interval)).await;
                continue;
            }
        };

        let mut block = Block::new_child(Some(&parent), Vec::new(), current_unix_timestamp());
        block.sign(&producer_key);

        match handle.add_block(block, None, None).await {
            Ok(ack) => {
                tracing::info!(
                    block_no = ack.block_no,
                    hash = %hex::encode(ack.block_hash.as_bytes()),
                    "produced block"
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to produce block");
            }
        }

        tokio::time::sleep(Duration::from_secs(block_interval)).await;
    }
}

/// Returns the current wall-clock time as seconds since the Unix epoch.
///
/// On error (system clock before the epoch) this falls back to 0.
fn current_unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs() as i64
}
