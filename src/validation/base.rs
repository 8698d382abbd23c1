//! Core validity checks owned by the chain itself.
//!
//! [`BasicHeaderValidity`] enforces cheap structural invariants on the
//! header. [`verify_block_body`] is the full verification run on blocks
//! arriving from the network: producer signature, transaction root, and
//! per-transaction hash integrity. Transaction *signatures* are verified
//! by the mempool before a transaction is ever offered for inclusion, so
//! the chain does not re-check them here.
//!
//! [`check_tx_nonces`] enforces nonce monotonicity against committed
//! state at validation time; [`check_tx_nonces_from`] does the same from
//! an explicit nonce base, which is how side-branch blocks and reorg
//! re-execution chain their checks from the fork point instead of the
//! committed tip. The executor later writes nonces through without
//! re-checking.

use std::collections::HashMap;

use crate::error::CoreError;
use crate::statedb::StateDb;
use crate::storage::KvStore;
use crate::types::{block::calculate_txs_root, AccountId, Block, HASH_LEN};
use crate::validation::HeaderValidator;

/// Structural header checks independent of any consensus algorithm.
#[derive(Clone, Debug)]
pub struct BasicHeaderValidity {
    max_block_size_bytes: usize,
}

impl BasicHeaderValidity {
    pub fn new(max_block_size_bytes: usize) -> Self {
        Self {
            max_block_size_bytes,
        }
    }
}

impl HeaderValidator for BasicHeaderValidity {
    fn is_block_valid(&self, block: &Block, best: &Block) -> Result<(), CoreError> {
        if block.block_no() > 0 && block.header.prev_hash.len() != HASH_LEN {
            return Err(CoreError::InvalidBlock(
                "non-genesis block without parent hash".to_string(),
            ));
        }

        let size = block.canonical_bytes().len();
        if size > self.max_block_size_bytes {
            return Err(CoreError::InvalidBlock(format!(
                "block size {size} bytes exceeds limit {}",
                self.max_block_size_bytes
            )));
        }

        // When the candidate claims to extend the best block directly, the
        // linkage must be consistent.
        if block.prev_id() == best.id() {
            if block.block_no() != best.block_no() + 1 {
                return Err(CoreError::InvalidBlock(format!(
                    "block no {} does not follow best {}",
                    block.block_no(),
                    best.block_no()
                )));
            }
            if block.header.timestamp < best.header.timestamp {
                return Err(CoreError::InvalidBlock(
                    "block timestamp precedes its parent".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Full verification of a peer-supplied block: producer signature over
/// the header digest, transaction root, and per-transaction hashes.
pub fn verify_block_body(block: &Block) -> Result<(), CoreError> {
    block.verify_sign()?;

    let expected_root = calculate_txs_root(&block.body.txs);
    if block.header.txs_root_hash != expected_root.as_bytes() {
        return Err(CoreError::InvalidBlock("txs root mismatch".to_string()));
    }

    for (i, tx) in block.body.txs.iter().enumerate() {
        if !tx.verify_hash() {
            return Err(CoreError::InvalidBlock(format!("tx {i} hash mismatch")));
        }
    }

    Ok(())
}

/// Verifies that every transaction's nonce is exactly one above its
/// sender's, chaining within the block: committed nonce `n` admits the
/// sequence `n+1, n+2, …` for that sender.
pub fn check_tx_nonces<S: KvStore>(sdb: &StateDb<S>, block: &Block) -> Result<(), CoreError> {
    check_tx_nonces_from(sdb, block, &mut HashMap::new())
}

/// [`check_tx_nonces`] with an explicit starting point: senders present
/// in `base` chain from those nonces, everyone else from committed state.
/// On success `base` holds the post-block nonces, so threading the same
/// map through consecutive blocks validates a whole chain of them.
pub fn check_tx_nonces_from<S: KvStore>(
    sdb: &StateDb<S>,
    block: &Block,
    base: &mut HashMap<AccountId, u64>,
) -> Result<(), CoreError> {
    for (i, tx) in block.body.txs.iter().enumerate() {
        let aid = AccountId::from_address(&tx.body.account);
        let current = match base.get(&aid) {
            Some(nonce) => *nonce,
            None => sdb.get_account_state_clone(&aid)?.nonce,
        };
        if tx.body.nonce != current + 1 {
            return Err(CoreError::InvalidBlock(format!(
                "tx {i} nonce {} does not follow account nonce {current}",
                tx.body.nonce
            )));
        }
        base.insert(aid, tx.body.nonce);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statedb::StateDb;
    use crate::storage::InMemoryKv;
    use crate::types::{Genesis, Tx, TxBody, TxType};
    use ed25519_dalek::SigningKey;
    use std::sync::Arc;

    const ADDR_A: [u8; 32] = [0xAA; 32];

    fn transfer(nonce: u64) -> Tx {
        Tx::new(TxBody {
            nonce,
            account: ADDR_A.to_vec(),
            recipient: vec![0xBB; 32],
            amount: 1,
            payload: Vec::new(),
            limit: 0,
            price: 0,
            tx_type: TxType::Normal,
            sign: Vec::new(),
        })
    }

    fn signed_block(txs: Vec<Tx>) -> Block {
        let genesis = Block::new_child(None, Vec::new(), 1_700_000_000);
        let mut block = Block::new_child(Some(&genesis), txs, 1_700_000_001);
        block.sign(&SigningKey::from_bytes(&[5; 32]));
        block
    }

    fn genesis_statedb() -> StateDb<InMemoryKv> {
        let sdb = StateDb::new(Arc::new(InMemoryKv::new())).expect("open");
        let genesis = Genesis {
            alloc: vec![(ADDR_A.to_vec(), 100)],
            timestamp: 1_700_000_000,
        };
        let block = genesis.build_block();
        sdb.set_genesis(&genesis, &block).expect("genesis");
        sdb
    }

    #[test]
    fn body_verification_accepts_well_formed_block() {
        let block = signed_block(vec![transfer(1)]);
        verify_block_body(&block).expect("valid body");
    }

    #[test]
    fn body_verification_rejects_tampered_tx() {
        let mut block = signed_block(vec![transfer(1)]);
        block.body.txs[0].body.amount = 999;
        let err = verify_block_body(&block).unwrap_err();
        assert!(matches!(err, CoreError::InvalidBlock(_)));
    }

    #[test]
    fn body_verification_rejects_wrong_txs_root() {
        let mut block = signed_block(vec![transfer(1)]);
        // Swap in a different body; the signed root no longer matches.
        block.body.txs.push(transfer(2));
        let err = verify_block_body(&block).unwrap_err();
        match err {
            CoreError::InvalidBlock(msg) => assert!(msg.contains("txs root"), "{msg}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn body_verification_rejects_unsigned_block() {
        let genesis = Block::new_child(None, Vec::new(), 1_700_000_000);
        let block = Block::new_child(Some(&genesis), vec![], 1_700_000_001);
        assert!(verify_block_body(&block).is_err());
    }

    #[test]
    fn nonce_check_accepts_chained_sequence() {
        let sdb = genesis_statedb();
        let block = signed_block(vec![transfer(1), transfer(2), transfer(3)]);
        check_tx_nonces(&sdb, &block).expect("chained nonces");
    }

    #[test]
    fn nonce_check_threads_base_across_blocks() {
        let sdb = genesis_statedb();
        let first = signed_block(vec![transfer(1), transfer(2)]);
        let second = signed_block(vec![transfer(3)]);

        let mut base = HashMap::new();
        check_tx_nonces_from(&sdb, &first, &mut base).expect("first block");
        check_tx_nonces_from(&sdb, &second, &mut base).expect("chains from first");

        // Without the threaded base the second block does not follow
        // committed state.
        assert!(check_tx_nonces(&sdb, &second).is_err());
    }

    #[test]
    fn nonce_check_rejects_gap_and_replay() {
        let sdb = genesis_statedb();

        let gap = signed_block(vec![transfer(2)]);
        assert!(check_tx_nonces(&sdb, &gap).is_err());

        let replay = signed_block(vec![transfer(1), transfer(1)]);
        assert!(check_tx_nonces(&sdb, &replay).is_err());
    }

    #[test]
    fn header_validity_checks_linkage_to_best() {
        let v = BasicHeaderValidity::new(1 << 20);
        let genesis = Block::new_child(None, Vec::new(), 1_700_000_000);

        let good = Block::new_child(Some(&genesis), vec![], 1_700_000_001);
        v.is_block_valid(&good, &genesis).expect("valid");

        let mut bad_no = good.clone();
        bad_no.header.block_no = 9;
        assert!(v.is_block_valid(&bad_no, &genesis).is_err());

        let mut early = good;
        early.header.timestamp = genesis.header.timestamp - 10;
        assert!(v.is_block_valid(&early, &genesis).is_err());
    }

    #[test]
    fn header_validity_enforces_size_limit() {
        let v = BasicHeaderValidity::new(8);
        let genesis = Block::new_child(None, Vec::new(), 1_700_000_000);
        let block = Block::new_child(Some(&genesis), vec![transfer(1)], 1_700_000_001);
        let err = v.is_block_valid(&block, &genesis).unwrap_err();
        match err {
            CoreError::InvalidBlock(msg) => assert!(msg.contains("block size"), "{msg}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
