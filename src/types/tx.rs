//! Transaction types and hashing.
//!
//! A transaction is identified by the SHA-256 digest of its body fields in
//! a fixed declared order; identity within a block body is positional.
//! Serialization for persistence is done with **bincode 2** using the
//! `serde` integration; the hash input below is an explicit wire contract
//! and does not depend on the codec.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{BlockId, TxId};

/// Kind of a transaction.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum TxType {
    /// Balance transfer and/or contract interaction.
    Normal = 0,
    /// Delegated to the governance handler.
    Governance = 1,
}

/// Transaction body: the signed payload of a transaction.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TxBody {
    /// Anti-replay counter relative to the sender account. Nodes accept a
    /// transaction only if its nonce is exactly one above the stored nonce.
    pub nonce: u64,

    /// Address of the sending account.
    pub account: Vec<u8>,

    /// Address of the receiving account. Empty means contract creation;
    /// the contract address is derived from `account` and `nonce`.
    pub recipient: Vec<u8>,

    /// Amount transferred from sender to recipient.
    pub amount: u64,

    /// Contract payload; empty for plain transfers.
    pub payload: Vec<u8>,

    /// Execution resource limit.
    pub limit: u64,

    /// Price per execution unit.
    pub price: u64,

    /// Transaction kind.
    pub tx_type: TxType,

    /// Sender's signature over the canonical body encoding. Verified by
    /// the mempool before a transaction is ever offered for inclusion.
    pub sign: Vec<u8>,
}

impl TxBody {
    /// Computes the transaction hash over the body fields in declared
    /// order: nonce, account, recipient, amount, payload, limit, price,
    /// type, sign. Integers are little-endian; the type is a 4-byte
    /// little-endian discriminant.
    pub fn compute_hash(&self) -> TxId {
        let mut hasher = Sha256::new();
        hasher.update(self.nonce.to_le_bytes());
        hasher.update(&self.account);
        hasher.update(&self.recipient);
        hasher.update(self.amount.to_le_bytes());
        hasher.update(&self.payload);
        hasher.update(self.limit.to_le_bytes());
        hasher.update(self.price.to_le_bytes());
        hasher.update((self.tx_type as i32).to_le_bytes());
        hasher.update(&self.sign);
        TxId(super::Hash256(hasher.finalize().into()))
    }
}

/// Transaction = cached hash + body.
///
/// The hash is computed once at construction; [`Tx::verify_hash`] rechecks
/// it for transactions received from the network.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Tx {
    pub hash: TxId,
    pub body: TxBody,
}

impl Tx {
    /// Wraps a body, computing and caching its hash.
    pub fn new(body: TxBody) -> Self {
        let hash = body.compute_hash();
        Tx { hash, body }
    }

    /// Returns `true` if the cached hash matches the recomputed body hash.
    pub fn verify_hash(&self) -> bool {
        self.hash == self.body.compute_hash()
    }
}

/// Location of a transaction inside a main-chain block.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TxIdx {
    /// Block the transaction was included in.
    pub block_hash: BlockId,
    /// Position within the block body.
    pub idx: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer_body(nonce: u64, amount: u64) -> TxBody {
        TxBody {
            nonce,
            account: vec![1u8; 32],
            recipient: vec![2u8; 32],
            amount,
            payload: Vec::new(),
            limit: 0,
            price: 0,
            tx_type: TxType::Normal,
            sign: vec![7u8; 64],
        }
    }

    #[test]
    fn hash_is_deterministic_and_nonce_sensitive() {
        let a = transfer_body(1, 30).compute_hash();
        let b = transfer_body(1, 30).compute_hash();
        let c = transfer_body(2, 30).compute_hash();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn hash_covers_every_body_field() {
        let base = transfer_body(1, 30);
        let mut other = base.clone();
        other.payload = vec![0xFF];
        assert_ne!(base.compute_hash(), other.compute_hash());

        let mut other = base.clone();
        other.tx_type = TxType::Governance;
        assert_ne!(base.compute_hash(), other.compute_hash());

        let mut other = base.clone();
        other.sign = vec![8u8; 64];
        assert_ne!(base.compute_hash(), other.compute_hash());
    }

    #[test]
    fn verify_hash_detects_tampering() {
        let mut tx = Tx::new(transfer_body(1, 30));
        assert!(tx.verify_hash());
        tx.body.amount = 31;
        assert!(!tx.verify_hash());
    }

    #[test]
    fn tx_roundtrips_with_bincode2() {
        let tx = Tx::new(transfer_body(5, 1_000));

        let cfg = bincode::config::standard();
        let bytes = bincode::serde::encode_to_vec(&tx, cfg).expect("Tx encode");
        let (decoded, _): (Tx, usize) =
            bincode::serde::decode_from_slice(&bytes, cfg).expect("Tx decode");

        assert_eq!(decoded, tx);
        assert!(decoded.verify_hash());
    }
}
