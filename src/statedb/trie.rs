//! Binary sparse Merkle trie over account identifiers.
//!
//! Depth-256 trie keyed by the 32-byte [`AccountId`], valued by the
//! canonical serialization of the account state, hashed with SHA-512/256.
//! Empty subtrees collapse to precomputed default hashes, so an update
//! touches O(depth) nodes per key.
//!
//! The trie is persisted as content-addressed nodes (`hash -> left‖right`)
//! plus leaf values (`leaf-hash -> value bytes`). Historical nodes are
//! never deleted, which is what makes [`SparseMerkleTrie::revert`] to any
//! previously committed root possible; garbage collection is deferred
//! until pruning exists.
//!
//! Updates are submitted as a single batch of lexicographically sorted
//! `(key, value)` pairs. Sorting matters: the batch is split by key bit at
//! each level, and the sorted order guarantees a deterministic root for
//! the same account set regardless of how callers accumulated it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::CoreError;
use crate::storage::{KvStore, WriteBatch, CF_TRIE};
use crate::types::{trie_hash, AccountId, Hash256, HASH_LEN};

/// Number of levels below the root; one per key bit.
pub const TRIE_DEPTH: usize = HASH_LEN * 8;

const NODE_PREFIX: u8 = b'n';
const VALUE_PREFIX: u8 = b'v';

fn node_key(hash: &Hash256) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + HASH_LEN);
    key.push(NODE_PREFIX);
    key.extend_from_slice(hash.as_bytes());
    key
}

fn value_key(hash: &Hash256) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + HASH_LEN);
    key.push(VALUE_PREFIX);
    key.extend_from_slice(hash.as_bytes());
    key
}

/// Returns bit `depth` of `key`, most-significant first.
///
/// MSB-first order makes the bit-split of a lexicographically sorted batch
/// a contiguous partition at every level.
fn key_bit(key: &Hash256, depth: usize) -> bool {
    let byte = key.as_bytes()[depth / 8];
    (byte >> (7 - (depth % 8))) & 1 == 1
}

/// Sparse Merkle trie bound to a [`KvStore`] column family.
pub struct SparseMerkleTrie<S: KvStore> {
    store: Arc<S>,
    root: Hash256,
    /// Default hash of an empty subtree at each depth, root first.
    defaults: Box<[Hash256]>,
    /// Interior nodes by hash; holds both committed and not-yet-committed
    /// nodes. Never shrinks during a session.
    nodes: HashMap<Hash256, (Hash256, Hash256)>,
    values: HashMap<Hash256, Vec<u8>>,
    dirty_nodes: Vec<Hash256>,
    dirty_values: Vec<Hash256>,
}

impl<S: KvStore> SparseMerkleTrie<S> {
    /// Creates an empty trie (root = the depth-0 default hash).
    pub fn new(store: Arc<S>) -> Self {
        let defaults = Self::compute_defaults();
        let root = defaults[0];
        SparseMerkleTrie {
            store,
            root,
            defaults,
            nodes: HashMap::new(),
            values: HashMap::new(),
            dirty_nodes: Vec::new(),
            dirty_values: Vec::new(),
        }
    }

    /// Opens the trie at a previously committed root.
    pub fn with_root(store: Arc<S>, root: Hash256) -> Self {
        let mut trie = Self::new(store);
        trie.root = root;
        trie
    }

    fn compute_defaults() -> Box<[Hash256]> {
        let mut defaults = vec![Hash256::default(); TRIE_DEPTH + 1];
        for depth in (0..TRIE_DEPTH).rev() {
            let child = defaults[depth + 1];
            defaults[depth] = trie_hash(&[child.as_bytes(), child.as_bytes()]);
        }
        defaults.into_boxed_slice()
    }

    /// Current root digest.
    pub fn root(&self) -> Hash256 {
        self.root
    }

    /// Root digest of the empty trie.
    pub fn empty_root(&self) -> Hash256 {
        self.defaults[0]
    }

    /// Resolves the children of `node` at `depth`, loading from the store
    /// on a cache miss. Empty subtrees resolve to the defaults of the next
    /// level without any lookup.
    fn children(&mut self, node: Hash256, depth: usize) -> Result<(Hash256, Hash256), CoreError> {
        if node == self.defaults[depth] {
            let child = self.defaults[depth + 1];
            return Ok((child, child));
        }
        if let Some(children) = self.nodes.get(&node) {
            return Ok(*children);
        }
        let raw = self
            .store
            .get(CF_TRIE, &node_key(&node))?
            .ok_or(CoreError::Store(crate::storage::StorageError::Corrupted(
                "trie node",
            )))?;
        if raw.len() != 2 * HASH_LEN {
            return Err(CoreError::Store(crate::storage::StorageError::Corrupted(
                "trie node",
            )));
        }
        let children = (
            Hash256::from_slice(&raw[..HASH_LEN]),
            Hash256::from_slice(&raw[HASH_LEN..]),
        );
        self.nodes.insert(node, children);
        Ok(children)
    }

    /// Applies a batch of `(key, value)` pairs and returns the new root.
    ///
    /// Keys must be lexicographically sorted and unique; values are the
    /// canonical state encodings. The update is in-memory until
    /// [`SparseMerkleTrie::commit`] persists it.
    pub fn update(&mut self, keys: &[AccountId], values: &[Vec<u8>]) -> Result<Hash256, CoreError> {
        if keys.len() != values.len() {
            return Err(CoreError::InvalidArgument("trie update arity mismatch"));
        }
        if keys.is_empty() {
            return Ok(self.root);
        }
        debug_assert!(keys.windows(2).all(|w| w[0] < w[1]), "keys must be sorted");

        let mut pairs = Vec::with_capacity(keys.len());
        for (key, value) in keys.iter().zip(values) {
            let leaf = trie_hash(&[value.as_slice()]);
            self.values.insert(leaf, value.clone());
            self.dirty_values.push(leaf);
            pairs.push((key.0, leaf));
        }

        let root = self.insert(self.root, 0, &pairs)?;
        self.root = root;
        Ok(root)
    }

    fn insert(
        &mut self,
        node: Hash256,
        depth: usize,
        pairs: &[(Hash256, Hash256)],
    ) -> Result<Hash256, CoreError> {
        if pairs.is_empty() {
            return Ok(node);
        }
        if depth == TRIE_DEPTH {
            // Position fully determined by the key; the leaf is the value
            // hash alone.
            return Ok(pairs[pairs.len() - 1].1);
        }

        let (left, right) = self.children(node, depth)?;
        let split = pairs.partition_point(|(key, _)| !key_bit(key, depth));
        let new_left = self.insert(left, depth + 1, &pairs[..split])?;
        let new_right = self.insert(right, depth + 1, &pairs[split..])?;

        let parent = trie_hash(&[new_left.as_bytes(), new_right.as_bytes()]);
        self.nodes.insert(parent, (new_left, new_right));
        self.dirty_nodes.push(parent);
        Ok(parent)
    }

    /// Fetches the value stored under `key`, if any.
    pub fn get(&mut self, key: &AccountId) -> Result<Option<Vec<u8>>, CoreError> {
        let mut node = self.root;
        for depth in 0..TRIE_DEPTH {
            if node == self.defaults[depth] {
                return Ok(None);
            }
            let (left, right) = self.children(node, depth)?;
            node = if key_bit(&key.0, depth) { right } else { left };
        }
        if node == self.defaults[TRIE_DEPTH] {
            return Ok(None);
        }
        if let Some(value) = self.values.get(&node) {
            return Ok(Some(value.clone()));
        }
        Ok(self.store.get(CF_TRIE, &value_key(&node))?)
    }

    /// Persists all nodes and values created since the last commit in one
    /// atomic batch.
    pub fn commit(&mut self) -> Result<(), CoreError> {
        if self.dirty_nodes.is_empty() && self.dirty_values.is_empty() {
            return Ok(());
        }
        let mut batch = WriteBatch::new();
        for hash in self.dirty_nodes.drain(..) {
            if let Some((left, right)) = self.nodes.get(&hash) {
                let mut raw = Vec::with_capacity(2 * HASH_LEN);
                raw.extend_from_slice(left.as_bytes());
                raw.extend_from_slice(right.as_bytes());
                batch.put(CF_TRIE, node_key(&hash), raw);
            }
        }
        for hash in self.dirty_values.drain(..) {
            if let Some(value) = self.values.get(&hash) {
                batch.put(CF_TRIE, value_key(&hash), value.clone());
            }
        }
        self.store.write(batch)?;
        Ok(())
    }

    /// Moves the trie back to a previously committed root, loading it into
    /// the cache on a miss. Uncommitted work is discarded.
    pub fn revert(&mut self, root: Hash256) -> Result<(), CoreError> {
        self.dirty_nodes.clear();
        self.dirty_values.clear();
        if root == self.root {
            return Ok(());
        }
        if root != self.defaults[0] && !self.nodes.contains_key(&root) {
            // Cache miss: the root must exist in the store or the chain
            // and state databases have diverged.
            let raw = self
                .store
                .get(CF_TRIE, &node_key(&root))?
                .ok_or(CoreError::Store(crate::storage::StorageError::Corrupted(
                    "trie root",
                )))?;
            if raw.len() != 2 * HASH_LEN {
                return Err(CoreError::Store(crate::storage::StorageError::Corrupted(
                    "trie root",
                )));
            }
            self.nodes.insert(
                root,
                (
                    Hash256::from_slice(&raw[..HASH_LEN]),
                    Hash256::from_slice(&raw[HASH_LEN..]),
                ),
            );
        }
        self.root = root;
        Ok(())
    }
}
