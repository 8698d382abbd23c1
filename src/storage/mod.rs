//! Storage abstraction used by the chain and state databases.
//!
//! The chain core persists everything into a key-value store partitioned
//! by named column families. The [`KvStore`] trait is intentionally small:
//! point reads plus an atomic [`WriteBatch`]. Batches carry the store
//! transactions required by block ingestion and reorganization — either
//! all staged writes persist or none of them do.

pub mod mem;
pub mod rocksdb;

pub use self::mem::InMemoryKv;
pub use self::rocksdb::{RocksDbConfig, RocksKv};

use std::fmt;

/// Column family holding `block-hash -> block` records.
pub const CF_BLOCKS: &str = "blocks";
/// Column family holding the `block-no -> block-hash` main-chain index.
pub const CF_BLOCK_NO: &str = "blockno";
/// Column family holding `tx-hash -> (block-hash, idx)` records.
pub const CF_TXS: &str = "txs";
/// Column family for chain metadata (the `latest` pointer).
pub const CF_META: &str = "meta";
/// Column family for state-db records (account map, undo, latest).
pub const CF_STATE: &str = "state";
/// Column family for trie nodes and leaf values.
pub const CF_TRIE: &str = "trie";

/// Every column family the chain core uses, in creation order.
pub const ALL_CFS: &[&str] = &[CF_BLOCKS, CF_BLOCK_NO, CF_TXS, CF_META, CF_STATE, CF_TRIE];

/// Storage-level error type.
#[derive(Debug)]
pub enum StorageError {
    /// Error reported by the backing store.
    Backend(String),
    /// Required column family was not found.
    MissingColumnFamily(&'static str),
    /// Corrupted or malformed stored data.
    Corrupted(&'static str),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Backend(msg) => write!(f, "backend error: {msg}"),
            StorageError::MissingColumnFamily(cf) => write!(f, "missing column family: {cf}"),
            StorageError::Corrupted(what) => write!(f, "corrupted record: {what}"),
        }
    }
}

impl std::error::Error for StorageError {}

/// A single staged write.
#[derive(Clone, Debug)]
pub enum WriteOp {
    Put {
        cf: &'static str,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        cf: &'static str,
        key: Vec<u8>,
    },
}

/// An ordered set of writes applied atomically by [`KvStore::write`].
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, cf: &'static str, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(WriteOp::Put { cf, key, value });
    }

    pub fn delete(&mut self, cf: &'static str, key: Vec<u8>) {
        self.ops.push(WriteOp::Delete { cf, key });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Consumes the batch, yielding the staged operations in order.
    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Abstract key-value store with named column families.
///
/// Implementations can be backed by in-memory maps, RocksDB, etc. Writes
/// go through [`WriteBatch`] so multi-key updates commit atomically.
pub trait KvStore: Send + Sync + 'static {
    /// Fetches a value, `Ok(None)` when the key is absent.
    fn get(&self, cf: &'static str, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// Applies a batch of writes atomically.
    fn write(&self, batch: WriteBatch) -> Result<(), StorageError>;

    /// Convenience single-key put, routed through [`KvStore::write`].
    fn put(&self, cf: &'static str, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        let mut batch = WriteBatch::new();
        batch.put(cf, key.to_vec(), value.to_vec());
        self.write(batch)
    }
}
