//! Top-level configuration for a chain-core node.
//!
//! This module aggregates configuration for:
//!
//! - chain parameters (block size limit, orphan pool bound, demo
//!   producer interval),
//! - storage (RocksDB path and creation flags),
//! - the chain service actor (inbox capacity and request deadlines),
//! - the metrics exporter (enable flag + listen address).
//!
//! The goal is a single [`CoreConfig`] value that binaries can construct
//! from defaults, config files, or environment variables as needed.

use std::net::SocketAddr;
use std::time::Duration;

use crate::storage::RocksDbConfig;

/// Protocol and implementation limits of the chain itself.
#[derive(Clone, Debug)]
pub struct ChainParams {
    /// Hard limit on the serialized size of a block, in bytes.
    pub max_block_size_bytes: usize,
    /// Maximum number of parked orphan blocks before eviction.
    pub max_orphan_blocks: usize,
    /// Target block interval for the demo producer loop, in seconds.
    pub block_interval_secs: u64,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            max_block_size_bytes: 1 << 20,
            max_orphan_blocks: 100,
            block_interval_secs: 5,
        }
    }
}

/// Actor-level configuration of the chain service.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// Bounded inbox capacity; senders back-pressure when full.
    pub inbox_capacity: usize,
    /// Deadline for ordinary requests to the chain service.
    pub request_timeout: Duration,
    /// Deadline for peer-related queries, which can be much slower.
    pub peer_request_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            inbox_capacity: 256,
            request_timeout: Duration::from_secs(3),
            peer_request_timeout: Duration::from_secs(30),
        }
    }
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Clone, Debug)]
pub struct MetricsConfig {
    /// Whether to run a `/metrics` HTTP exporter.
    pub enabled: bool,
    /// Address to bind the metrics HTTP server to.
    pub listen_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        // Safe to unwrap: this is a fixed, valid address literal.
        let addr: SocketAddr = "127.0.0.1:9898"
            .parse()
            .expect("hard-coded metrics listen address should parse");
        Self {
            enabled: true,
            listen_addr: addr,
        }
    }
}

/// Top-level configuration for a chain-core node.
#[derive(Clone, Debug, Default)]
pub struct CoreConfig {
    pub chain: ChainParams,
    pub storage: RocksDbConfig,
    pub service: ServiceConfig,
    pub metrics: MetricsConfig,
}
