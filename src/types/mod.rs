//! Core domain types used by the chain.
//!
//! This module defines strongly-typed hashes and identifiers shared across
//! the chain implementation, together with the block, transaction, and
//! account-state types. The goal is to avoid "naked" byte buffers in public
//! APIs and instead use domain-specific newtypes.
//!
//! Two digest functions appear throughout:
//!
//! - SHA-256 for block and transaction hashes,
//! - SHA-512/256 for account identifiers and the state trie.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512_256};

pub mod account;
pub mod block;
pub mod tx;

pub use account::{BlockInfo, BlockState, State, UndoStates};
pub use block::{Block, BlockBody, BlockHeader, Genesis};
pub use tx::{Tx, TxBody, TxIdx, TxType};

/// Length in bytes of all 256-bit hash types in this module.
pub const HASH_LEN: usize = 32;

/// Block height, starting from 0 at the genesis block.
pub type BlockNo = u64;

/// Serializes a block number into its 8-byte little-endian index key.
pub fn block_no_to_bytes(no: BlockNo) -> [u8; 8] {
    no.to_le_bytes()
}

/// Deserializes a block number from an 8-byte little-endian index key.
pub fn block_no_from_bytes(raw: &[u8]) -> BlockNo {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&raw[..8]);
    BlockNo::from_le_bytes(buf)
}

/// Strongly-typed 256-bit hash wrapper.
///
/// Backing representation for all fixed-size digests in the chain: block
/// identifiers, transaction identifiers, account identifiers, and trie
/// roots. It is always exactly [`HASH_LEN`] bytes long.
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
pub struct Hash256(pub [u8; HASH_LEN]);

impl Hash256 {
    /// Computes the SHA-256 digest of `data`.
    pub fn sha256(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Hash256(hasher.finalize().into())
    }

    /// Copies a hash out of an arbitrary byte slice, zero-padding short
    /// input. Slices longer than [`HASH_LEN`] are truncated.
    pub fn from_slice(raw: &[u8]) -> Self {
        let mut buf = [0u8; HASH_LEN];
        let n = raw.len().min(HASH_LEN);
        buf[..n].copy_from_slice(&raw[..n]);
        Hash256(buf)
    }

    /// Returns the underlying 32-byte digest as a borrowed array.
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Returns `true` if every byte is zero (the "unset" sentinel).
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_LEN]
    }
}

/// Default hash function of the state trie: SHA-512/256 over the
/// concatenation of `parts`.
pub fn trie_hash(parts: &[&[u8]]) -> Hash256 {
    let mut hasher = Sha512_256::new();
    for part in parts {
        hasher.update(part);
    }
    Hash256(hasher.finalize().into())
}

/// Identifier of a block (its header hash).
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
pub struct BlockId(pub Hash256);

impl BlockId {
    /// Copies a block id out of raw hash bytes, zero-padding short input.
    pub fn from_slice(raw: &[u8]) -> Self {
        BlockId(Hash256::from_slice(raw))
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        self.0.as_bytes()
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

/// Identifier of a transaction (its body hash).
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
pub struct TxId(pub Hash256);

impl TxId {
    pub fn from_slice(raw: &[u8]) -> Self {
        TxId(Hash256::from_slice(raw))
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        self.0.as_bytes()
    }
}

/// Content-addressed account identifier: SHA-512/256 of the address bytes.
///
/// Deriving the identifier from the address keeps trie keys fixed-size and
/// opaque while preserving a stable mapping from addresses.
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
pub struct AccountId(pub Hash256);

impl AccountId {
    /// Derives an [`AccountId`] from raw address bytes.
    pub fn from_address(address: &[u8]) -> Self {
        AccountId(trie_hash(&[address]))
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        self.0.as_bytes()
    }

    /// The all-zero identifier; rejected by state-db accessors.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_is_deterministic() {
        let a = Hash256::sha256(b"chain-core");
        let b = Hash256::sha256(b"chain-core");
        assert_eq!(a, b);
        assert_ne!(a, Hash256::sha256(b"chain-corf"));
    }

    #[test]
    fn from_slice_zero_pads_short_input() {
        let h = Hash256::from_slice(&[0xAA, 0xBB]);
        assert_eq!(h.0[0], 0xAA);
        assert_eq!(h.0[1], 0xBB);
        assert_eq!(&h.0[2..], &[0u8; 30][..]);
    }

    #[test]
    fn account_id_uses_sha512_256() {
        let address = b"some-address";
        let expected: [u8; HASH_LEN] = Sha512_256::digest(address).into();
        assert_eq!(AccountId::from_address(address).as_bytes(), &expected);
    }

    #[test]
    fn block_no_roundtrips_little_endian() {
        let raw = block_no_to_bytes(0x0102_0304_0506_0708);
        assert_eq!(raw[0], 0x08);
        assert_eq!(block_no_from_bytes(&raw), 0x0102_0304_0506_0708);
    }

    #[test]
    fn zero_hash_is_the_unset_sentinel() {
        assert!(Hash256::default().is_zero());
        assert!(!Hash256::sha256(b"x").is_zero());
    }
}
