//! RocksDB-backed key-value store.
//!
//! Persists every chain-core column family in a single RocksDB instance.
//! [`WriteBatch`] maps onto RocksDB's native write batch, which gives the
//! atomicity the block-ingestion and reorg paths require.

use std::{path::Path, sync::Arc};

use rocksdb::{BoundColumnFamily, ColumnFamilyDescriptor, Options, DB};

use super::{KvStore, StorageError, WriteBatch, WriteOp, ALL_CFS};

/// Configuration for [`RocksKv`].
#[derive(Clone, Debug)]
pub struct RocksDbConfig {
    /// Filesystem path to the RocksDB database directory.
    pub path: String,
    /// Whether to create the database and missing column families if they
    /// do not yet exist.
    pub create_if_missing: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            path: "data/chain-db".to_string(),
            create_if_missing: true,
        }
    }
}

impl From<rocksdb::Error> for StorageError {
    fn from(e: rocksdb::Error) -> Self {
        StorageError::Backend(e.to_string())
    }
}

/// RocksDB-backed implementation of [`KvStore`].
pub struct RocksKv {
    db: DB,
}

impl RocksKv {
    /// Opens (or creates) a RocksDB store at the configured path with all
    /// chain-core column families. The `"default"` column family is also
    /// created to keep RocksDB happy, but it is not used.
    pub fn open(cfg: &RocksDbConfig) -> Result<Self, StorageError> {
        let path = Path::new(&cfg.path);

        let mut opts = Options::default();
        opts.create_if_missing(cfg.create_if_missing);
        opts.create_missing_column_families(cfg.create_if_missing);

        let mut cfs = vec![ColumnFamilyDescriptor::new("default", Options::default())];
        for cf in ALL_CFS {
            cfs.push(ColumnFamilyDescriptor::new(*cf, Options::default()));
        }

        let db = DB::open_cf_descriptors(&opts, path, cfs)?;
        Ok(Self { db })
    }

    fn cf(&self, name: &'static str) -> Result<Arc<BoundColumnFamily<'_>>, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or(StorageError::MissingColumnFamily(name))
    }
}

impl KvStore for RocksKv {
    fn get(&self, cf: &'static str, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let handle = self.cf(cf)?;
        Ok(self.db.get_cf(&handle, key)?)
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let mut native = rocksdb::WriteBatch::default();
        for op in batch.into_ops() {
            match op {
                WriteOp::Put { cf, key, value } => {
                    let handle = self.cf(cf)?;
                    native.put_cf(&handle, key, value);
                }
                WriteOp::Delete { cf, key } => {
                    let handle = self.cf(cf)?;
                    native.delete_cf(&handle, key);
                }
            }
        }
        self.db.write(native)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{CF_BLOCKS, CF_META};
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, RocksKv) {
        let tmp = TempDir::new().expect("create temp dir");
        let cfg = RocksDbConfig {
            path: tmp.path().to_string_lossy().to_string(),
            create_if_missing: true,
        };
        let store = RocksKv::open(&cfg).expect("open RocksDB");
        (tmp, store)
    }

    #[test]
    fn rocksdb_roundtrip_across_column_families() {
        let (_tmp, store) = open_temp();

        store.put(CF_BLOCKS, b"hash", b"block-bytes").expect("put");
        store.put(CF_META, b"latest", &7u64.to_le_bytes()).expect("put");

        assert_eq!(
            store.get(CF_BLOCKS, b"hash").expect("get").as_deref(),
            Some(&b"block-bytes"[..])
        );
        assert_eq!(
            store.get(CF_META, b"latest").expect("get").as_deref(),
            Some(&7u64.to_le_bytes()[..])
        );
    }

    #[test]
    fn rocksdb_batch_is_atomic_per_write() {
        let (_tmp, store) = open_temp();

        let mut batch = WriteBatch::new();
        batch.put(CF_BLOCKS, b"a".to_vec(), b"1".to_vec());
        batch.put(CF_BLOCKS, b"b".to_vec(), b"2".to_vec());
        batch.delete(CF_BLOCKS, b"a".to_vec());
        store.write(batch).expect("write");

        assert_eq!(store.get(CF_BLOCKS, b"a").expect("get"), None);
        assert_eq!(
            store.get(CF_BLOCKS, b"b").expect("get").as_deref(),
            Some(&b"2"[..])
        );
    }
}
