//! In-memory key-value store.
//!
//! Useful for unit tests, benchmarks, and small devnets. All column
//! families live in one `RwLock`-guarded map, so a [`WriteBatch`] applies
//! under a single write acquisition and is atomic with respect to readers.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use super::{KvStore, StorageError, WriteBatch, WriteOp, ALL_CFS};

/// In-memory implementation of [`KvStore`].
pub struct InMemoryKv {
    cfs: RwLock<HashMap<&'static str, BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl InMemoryKv {
    /// Creates a store with every chain-core column family present.
    pub fn new() -> Self {
        let mut cfs = HashMap::new();
        for cf in ALL_CFS {
            cfs.insert(*cf, BTreeMap::new());
        }
        InMemoryKv {
            cfs: RwLock::new(cfs),
        }
    }

    /// Number of keys currently stored in `cf`.
    pub fn len(&self, cf: &'static str) -> usize {
        self.cfs
            .read()
            .expect("in-memory kv lock poisoned")
            .get(cf)
            .map(|m| m.len())
            .unwrap_or(0)
    }
}

impl Default for InMemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for InMemoryKv {
    fn get(&self, cf: &'static str, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let cfs = self.cfs.read().expect("in-memory kv lock poisoned");
        let map = cfs.get(cf).ok_or(StorageError::MissingColumnFamily(cf))?;
        Ok(map.get(key).cloned())
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let mut cfs = self.cfs.write().expect("in-memory kv lock poisoned");
        for op in batch.into_ops() {
            match op {
                WriteOp::Put { cf, key, value } => {
                    cfs.get_mut(cf)
                        .ok_or(StorageError::MissingColumnFamily(cf))?
                        .insert(key, value);
                }
                WriteOp::Delete { cf, key } => {
                    cfs.get_mut(cf)
                        .ok_or(StorageError::MissingColumnFamily(cf))?
                        .remove(&key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{CF_BLOCKS, CF_META};

    #[test]
    fn put_and_get_roundtrip() {
        let store = InMemoryKv::new();
        store.put(CF_BLOCKS, b"key", b"value").expect("put");
        let got = store.get(CF_BLOCKS, b"key").expect("get");
        assert_eq!(got.as_deref(), Some(&b"value"[..]));
        assert_eq!(store.get(CF_BLOCKS, b"other").expect("get"), None);
    }

    #[test]
    fn batch_applies_all_operations() {
        let store = InMemoryKv::new();
        let mut batch = WriteBatch::new();
        batch.put(CF_BLOCKS, b"a".to_vec(), b"1".to_vec());
        batch.put(CF_META, b"b".to_vec(), b"2".to_vec());
        batch.delete(CF_BLOCKS, b"a".to_vec());
        store.write(batch).expect("write");

        assert_eq!(store.get(CF_BLOCKS, b"a").expect("get"), None);
        assert_eq!(store.get(CF_META, b"b").expect("get").as_deref(), Some(&b"2"[..]));
    }

    #[test]
    fn column_families_are_isolated() {
        let store = InMemoryKv::new();
        store.put(CF_BLOCKS, b"k", b"blocks").expect("put");
        store.put(CF_META, b"k", b"meta").expect("put");

        assert_eq!(
            store.get(CF_BLOCKS, b"k").expect("get").as_deref(),
            Some(&b"blocks"[..])
        );
        assert_eq!(
            store.get(CF_META, b"k").expect("get").as_deref(),
            Some(&b"meta"[..])
        );
    }
}
