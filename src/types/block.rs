//! Block types, hashing, and signing.
//!
//! The block hash is the SHA-256 digest of the header fields serialized in
//! declaration order through the `sign` field; the producer's signature
//! covers the same serialization up to but excluding `sign`. The header
//! field order is therefore a wire-format contract: changing it changes
//! every block hash on the network.
//!
//! Persistence encoding is **bincode 2** with the `serde` integration and
//! an explicit `standard()` config, used everywhere block bytes are needed.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{AccountId, BlockId, BlockNo, Hash256, State, Tx};
use crate::error::CoreError;

/// Block header: linking, ordering, and producer attribution.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Hash of the parent block. Empty for the genesis block.
    pub prev_hash: Vec<u8>,

    /// Height of this block, starting from 0 at genesis.
    pub block_no: BlockNo,

    /// Wall-clock timestamp in seconds since the Unix epoch.
    pub timestamp: i64,

    /// Root digest over the block's transaction hashes.
    pub txs_root_hash: Vec<u8>,

    /// Number of blocks confirmed by this block (consensus-specific).
    pub confirms: u64,

    /// Producer public key bytes (ed25519, 32 bytes).
    pub pub_key: Vec<u8>,

    /// Producer signature over the header digest (excluding this field).
    pub sign: Vec<u8>,
}

impl BlockHeader {
    /// Serializes the header fields in declaration order. The `sign` field
    /// is included only when `include_sign` is set; everything else is
    /// always written. Integers are little-endian, byte fields are raw.
    fn write_fields(&self, out: &mut Vec<u8>, include_sign: bool) {
        out.extend_from_slice(&self.prev_hash);
        out.extend_from_slice(&self.block_no.to_le_bytes());
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&self.txs_root_hash);
        out.extend_from_slice(&self.confirms.to_le_bytes());
        out.extend_from_slice(&self.pub_key);
        if include_sign {
            out.extend_from_slice(&self.sign);
        }
    }

    /// Returns the byte string the producer signs: the header serialized
    /// through `pub_key`, excluding `sign`.
    pub fn bytes_for_digest(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_fields(&mut buf, false);
        buf
    }
}

/// Block body: the ordered transaction sequence.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct BlockBody {
    pub txs: Vec<Tx>,
}

/// Block = header + body. Immutable once ingested.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub body: BlockBody,
}

impl Block {
    /// Builds an unsigned block on top of `prev` (or as genesis when
    /// `prev` is `None`), computing the transaction root.
    pub fn new_child(prev: Option<&Block>, txs: Vec<Tx>, timestamp: i64) -> Self {
        let (prev_hash, block_no) = match prev {
            Some(p) => (p.id().as_bytes().to_vec(), p.header.block_no + 1),
            None => (Vec::new(), 0),
        };

        let txs_root_hash = calculate_txs_root(&txs).as_bytes().to_vec();
        Block {
            header: BlockHeader {
                prev_hash,
                block_no,
                timestamp,
                txs_root_hash,
                confirms: 0,
                pub_key: Vec::new(),
                sign: Vec::new(),
            },
            body: BlockBody { txs },
        }
    }

    /// Computes the block identifier: SHA-256 over the header fields in
    /// declaration order, `sign` included.
    pub fn id(&self) -> BlockId {
        let mut buf = Vec::new();
        self.header.write_fields(&mut buf, true);
        let mut hasher = Sha256::new();
        hasher.update(&buf);
        BlockId(Hash256(hasher.finalize().into()))
    }

    /// Identifier of the parent block; zero for genesis.
    pub fn prev_id(&self) -> BlockId {
        BlockId::from_slice(&self.header.prev_hash)
    }

    pub fn block_no(&self) -> BlockNo {
        self.header.block_no
    }

    /// Returns the canonical byte representation of this block.
    ///
    /// # Panics
    ///
    /// Panics if encoding fails; all fields are required to be
    /// serializable, so a failure is a programming error.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let cfg = bincode::config::standard();
        bincode::serde::encode_to_vec(self, cfg)
            .expect("Block should always be serializable with bincode 2 + serde")
    }

    /// Sets the producer key and signature on the header. The public key
    /// is written first because the signed digest covers it.
    pub fn sign(&mut self, key: &SigningKey) {
        self.header.pub_key = key.verifying_key().to_bytes().to_vec();
        let digest = self.header.bytes_for_digest();
        self.header.sign = key.sign(&digest).to_bytes().to_vec();
    }

    /// Verifies the producer signature against the header digest.
    pub fn verify_sign(&self) -> Result<(), CoreError> {
        let pub_key: [u8; 32] = self
            .header
            .pub_key
            .as_slice()
            .try_into()
            .map_err(|_| CoreError::InvalidBlock("malformed producer public key".to_string()))?;
        let key = VerifyingKey::from_bytes(&pub_key)
            .map_err(|_| CoreError::InvalidBlock("malformed producer public key".to_string()))?;
        let sig = Signature::from_slice(&self.header.sign)
            .map_err(|_| CoreError::InvalidBlock("malformed block signature".to_string()))?;
        key.verify(&self.header.bytes_for_digest(), &sig)
            .map_err(|_| CoreError::InvalidBlock("block signature verification failed".to_string()))
    }
}

/// Root digest over a block's transactions: SHA-256 of the concatenated
/// transaction hashes, in body order.
pub fn calculate_txs_root(txs: &[Tx]) -> Hash256 {
    let mut hasher = Sha256::new();
    for tx in txs {
        hasher.update(tx.hash.as_bytes());
    }
    Hash256(hasher.finalize().into())
}

/// Genesis description: the initial balance allocation and timestamp.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Genesis {
    /// Initial `(address, balance)` allocation.
    pub alloc: Vec<(Vec<u8>, u64)>,
    pub timestamp: i64,
}

impl Genesis {
    /// Builds block 0: empty `prev_hash`, no transactions, unsigned.
    pub fn build_block(&self) -> Block {
        Block::new_child(None, Vec::new(), self.timestamp)
    }

    /// Returns the allocation keyed by derived account identifier.
    pub fn account_states(&self) -> Vec<(AccountId, State)> {
        self.alloc
            .iter()
            .map(|(address, balance)| {
                let state = State {
                    balance: *balance,
                    ..State::default()
                };
                (AccountId::from_address(address), state)
            })
            .collect()
    }
}
