//! Chain core library crate.
//!
//! This crate provides the chain core of a blockchain node:
//!
//! - strongly-typed domain types (`types`),
//! - a block store with main-chain indexing (`chaindb`),
//! - a versioned, trie-authenticated account-state store (`statedb`),
//! - block/transaction execution (`executor`),
//! - an orphan pool (`orphan`),
//! - the single-writer ingestion actor with reorg and sync helpers
//!   (`chain`),
//! - block validity predicates (`validation`),
//! - storage backends (`storage`),
//! - Prometheus-based metrics (`metrics`),
//! - and a top-level node configuration (`config`).
//!
//! The RPC façade, mempool, p2p transport, contract VM, and consensus
//! leader election are external collaborators; this crate defines only
//! the seams it consumes them through.

pub mod chain;
pub mod chaindb;
pub mod config;
pub mod contract;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod orphan;
pub mod statedb;
pub mod storage;
pub mod types;
pub mod validation;

// Re-export top-level configuration types.
pub use config::{ChainParams, CoreConfig, MetricsConfig, ServiceConfig};

// Re-export the service surface.
pub use chain::{
    AddBlockAck, ChainEvent, ChainHandle, ChainService, MempoolClient, MissingRange, NoopMempool,
    PeerId,
};

// Re-export core components.
pub use chaindb::ChainDb;
pub use error::CoreError;
pub use executor::{Executor, GovernanceHandler, NoopGovernance, Vote};
pub use orphan::OrphanPool;
pub use statedb::{SparseMerkleTrie, StateDb};

// Re-export the contract-VM seam.
pub use contract::{Abi, CallContext, ContractRuntime, ContractState, NoopRuntime, Receipt};

// Re-export storage backends.
pub use storage::{InMemoryKv, KvStore, RocksDbConfig, RocksKv, StorageError, WriteBatch};

// Re-export validation seams.
pub use validation::{AcceptAllHeaders, BasicHeaderValidity, CombinedValidator, HeaderValidator};

// Re-export metrics registry and exporter.
pub use metrics::{run_prometheus_http_server, ChainMetrics, MetricsRegistry};

// Re-export domain types at the crate root for convenience.
pub use types::*;

/// Type alias for the default storage backend.
pub type DefaultKvStore = RocksKv;

/// Type alias for the default header-validity stack.
pub type DefaultHeaderValidator = BasicHeaderValidity;

/// Type alias for the default chain service stack used by a "typical"
/// node:
///
/// - [`DefaultKvStore`] (RocksDB),
/// - [`DefaultHeaderValidator`] (structural header checks),
/// - [`NoopRuntime`] / [`NoopGovernance`] until a VM and governance
///   module are wired in.
pub type DefaultChainService =
    ChainService<DefaultKvStore, DefaultHeaderValidator, NoopRuntime, NoopGovernance>;
