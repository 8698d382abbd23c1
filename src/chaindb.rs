//! Block store (chain DB).
//!
//! Persists blocks, the block-number -> hash main-chain index, the
//! transaction -> block index, and the `latest` pointer:
//!
//! - `blocks`:  block hash (32 bytes) -> canonical block bytes,
//! - `blockno`: block number (8 bytes LE) -> block hash (main chain only),
//! - `txs`:     tx hash (32 bytes) -> `TxIdx` bytes,
//! - `meta`:    the `latest` block number under a fixed key.
//!
//! Branch-chain blocks are stored under `blocks` but have no `blockno`
//! entry; the main chain is the only one indexed by number.

use std::sync::Arc;

use crate::error::CoreError;
use crate::storage::{KvStore, WriteBatch, CF_BLOCKS, CF_BLOCK_NO, CF_META, CF_TXS};
use crate::types::{block_no_from_bytes, block_no_to_bytes, Block, BlockId, BlockNo, Tx, TxId, TxIdx};

const LATEST_KEY: &[u8] = b"chain.latest";

/// Block store over a [`KvStore`] backend.
pub struct ChainDb<S: KvStore> {
    store: Arc<S>,
    latest: BlockNo,
}

fn decode<T: serde::de::DeserializeOwned>(
    bytes: &[u8],
    what: &'static str,
) -> Result<T, CoreError> {
    let cfg = bincode::config::standard();
    let (value, _) = bincode::serde::decode_from_slice(bytes, cfg)
        .map_err(|_| CoreError::Store(crate::storage::StorageError::Corrupted(what)))?;
    Ok(value)
}

fn encode<T: serde::Serialize>(value: &T) -> Vec<u8> {
    let cfg = bincode::config::standard();
    bincode::serde::encode_to_vec(value, cfg)
        .expect("chain-db records should always be serializable")
}

impl<S: KvStore> ChainDb<S> {
    pub fn new(store: Arc<S>) -> Self {
        ChainDb { store, latest: 0 }
    }

    /// Restores the `latest` pointer from the store. Returns `None` when
    /// the chain is empty (no genesis yet).
    pub fn load_chain(&mut self) -> Result<Option<BlockNo>, CoreError> {
        match self.store.get(CF_META, LATEST_KEY)? {
            Some(raw) if raw.len() == 8 => {
                self.latest = block_no_from_bytes(&raw);
                Ok(Some(self.latest))
            }
            Some(_) => Err(CoreError::Store(
                crate::storage::StorageError::Corrupted("latest pointer"),
            )),
            None => Ok(None),
        }
    }

    /// Seeds an empty chain with the genesis block: block record, main
    /// index entry 0, and the `latest` pointer, in one atomic batch.
    pub fn add_genesis(&mut self, block: &Block) -> Result<(), CoreError> {
        let mut batch = WriteBatch::new();
        self.add_block(&mut batch, block, true, false)?;
        batch.put(CF_META, LATEST_KEY.to_vec(), block_no_to_bytes(0).to_vec());
        self.store.write(batch)?;
        self.latest = 0;
        Ok(())
    }

    /// Returns the `latest` main-chain block number.
    pub fn best_block_no(&self) -> BlockNo {
        self.latest
    }

    pub fn get_block(&self, id: &BlockId) -> Result<Block, CoreError> {
        match self.store.get(CF_BLOCKS, id.as_bytes())? {
            Some(raw) => decode(&raw, "block"),
            None => Err(CoreError::NotFound("block")),
        }
    }

    pub fn get_hash_by_no(&self, block_no: BlockNo) -> Result<BlockId, CoreError> {
        match self.store.get(CF_BLOCK_NO, &block_no_to_bytes(block_no))? {
            Some(raw) => Ok(BlockId::from_slice(&raw)),
            None => Err(CoreError::NotFound("block hash")),
        }
    }

    /// Resolves a block through the main-chain index.
    pub fn get_block_by_no(&self, block_no: BlockNo) -> Result<Block, CoreError> {
        let hash = self.get_hash_by_no(block_no)?;
        self.get_block(&hash)
    }

    pub fn get_best_block(&self) -> Result<Block, CoreError> {
        self.get_block_by_no(self.latest)
    }

    /// Looks up a transaction and its block position. A transaction whose
    /// containing block is no longer indexed at its height is reported as
    /// off-main-chain: the index entry survives a reorg, the `blockno`
    /// mapping is what decides canonicity.
    pub fn get_tx(&self, id: &TxId) -> Result<(Tx, TxIdx), CoreError> {
        let raw = self
            .store
            .get(CF_TXS, id.as_bytes())?
            .ok_or(CoreError::NotFound("tx"))?;
        let idx: TxIdx = decode(&raw, "tx index")?;

        let block = self.get_block(&idx.block_hash)?;
        let main_hash = self.get_hash_by_no(block.block_no())?;
        if main_hash != idx.block_hash {
            return Err(CoreError::BranchBlock(format!(
                "tx {} is not in the main chain",
                hex::encode(id.as_bytes())
            )));
        }

        let tx = block
            .body
            .txs
            .get(idx.idx as usize)
            .cloned()
            .ok_or(CoreError::NotFound("tx"))?;
        Ok((tx, idx))
    }

    /// A block extends the main chain iff its parent is the current tip.
    pub fn is_main_chain(&self, block: &Block) -> Result<bool, CoreError> {
        let tip = self.get_hash_by_no(self.latest)?;
        Ok(block.prev_id() == tip)
    }

    /// Stages a block into `batch`: the block record, and when it is on
    /// the main chain, its number index and (optionally) one tx index
    /// entry per transaction. The caller commits the batch; either all
    /// writes persist or none.
    pub fn add_block(
        &self,
        batch: &mut WriteBatch,
        block: &Block,
        is_main_chain: bool,
        index_txs: bool,
    ) -> Result<(), CoreError> {
        let id = block.id();
        batch.put(CF_BLOCKS, id.as_bytes().to_vec(), encode(block));

        if is_main_chain {
            batch.put(
                CF_BLOCK_NO,
                block_no_to_bytes(block.block_no()).to_vec(),
                id.as_bytes().to_vec(),
            );
            if index_txs {
                for (i, tx) in block.body.txs.iter().enumerate() {
                    let idx = TxIdx {
                        block_hash: id,
                        idx: i as u32,
                    };
                    batch.put(CF_TXS, tx.hash.as_bytes().to_vec(), encode(&idx));
                }
            }
        }
        Ok(())
    }

    /// Commits a staged batch to the backing store.
    pub fn commit(&self, batch: WriteBatch) -> Result<(), CoreError> {
        self.store.write(batch)?;
        Ok(())
    }

    /// Publishes a new `latest` block number. Called only after the batch
    /// that indexed the block has committed; the ordering is what keeps
    /// observers from seeing a tip without its index.
    pub fn set_latest(&mut self, block_no: BlockNo) -> Result<(), CoreError> {
        self.store
            .put(CF_META, LATEST_KEY, &block_no_to_bytes(block_no))?;
        self.latest = block_no;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryKv;
    use crate::types::{Genesis, TxBody, TxType};

    fn new_chaindb() -> ChainDb<InMemoryKv> {
        ChainDb::new(Arc::new(InMemoryKv::new()))
    }

    fn genesis_block() -> Block {
        Genesis {
            alloc: vec![],
            timestamp: 1_700_000_000,
        }
        .build_block()
    }

    fn transfer_tx(nonce: u64) -> Tx {
        Tx::new(TxBody {
            nonce,
            account: vec![1u8; 32],
            recipient: vec![2u8; 32],
            amount: 10,
            payload: Vec::new(),
            limit: 0,
            price: 0,
            tx_type: TxType::Normal,
            sign: Vec::new(),
        })
    }

    fn extend(db: &mut ChainDb<InMemoryKv>, parent: &Block, txs: Vec<Tx>) -> Block {
        let block = Block::new_child(Some(parent), txs, parent.header.timestamp + 1);
        let mut batch = WriteBatch::new();
        db.add_block(&mut batch, &block, true, true).expect("stage");
        db.commit(batch).expect("commit");
        db.set_latest(block.block_no()).expect("set latest");
        block
    }

    #[test]
    fn empty_chain_loads_as_none() {
        let mut db = new_chaindb();
        assert_eq!(db.load_chain().expect("load"), None);
    }

    #[test]
    fn genesis_seeds_index_and_latest() {
        let mut db = new_chaindb();
        let genesis = genesis_block();
        db.add_genesis(&genesis).expect("genesis");

        assert_eq!(db.best_block_no(), 0);
        assert_eq!(db.get_hash_by_no(0).expect("hash"), genesis.id());
        assert_eq!(db.get_best_block().expect("best").id(), genesis.id());
        assert_eq!(db.load_chain().expect("reload"), Some(0));
    }

    #[test]
    fn extension_keeps_index_consistent() {
        let mut db = new_chaindb();
        let genesis = genesis_block();
        db.add_genesis(&genesis).expect("genesis");

        let b1 = extend(&mut db, &genesis, vec![]);
        let b2 = extend(&mut db, &b1, vec![]);

        // best_height equals the count of non-genesis blocks, and the two
        // lookup paths agree at every height.
        assert_eq!(db.best_block_no(), 2);
        for no in 0..=2 {
            let by_no = db.get_block_by_no(no).expect("block by no");
            let hash = db.get_hash_by_no(no).expect("hash by no");
            assert_eq!(by_no.id(), hash);
            assert_eq!(by_no.block_no(), no);
            if no > 0 {
                assert_eq!(by_no.prev_id(), db.get_hash_by_no(no - 1).expect("prev"));
            }
        }
        assert_eq!(db.get_best_block().expect("best").id(), b2.id());
    }

    #[test]
    fn is_main_chain_requires_parent_to_be_tip() {
        let mut db = new_chaindb();
        let genesis = genesis_block();
        db.add_genesis(&genesis).expect("genesis");
        let b1 = extend(&mut db, &genesis, vec![]);

        let extends_tip = Block::new_child(Some(&b1), vec![], 1_700_000_010);
        assert!(db.is_main_chain(&extends_tip).expect("main"));

        let branch = Block::new_child(Some(&genesis), vec![], 1_700_000_011);
        assert!(!db.is_main_chain(&branch).expect("branch"));
    }

    #[test]
    fn branch_blocks_get_no_number_index() {
        let mut db = new_chaindb();
        let genesis = genesis_block();
        db.add_genesis(&genesis).expect("genesis");
        let _b1 = extend(&mut db, &genesis, vec![]);

        let branch = Block::new_child(Some(&genesis), vec![], 1_700_000_020);
        let mut batch = WriteBatch::new();
        db.add_block(&mut batch, &branch, false, true).expect("stage");
        db.commit(batch).expect("commit");

        // Stored by hash, invisible to the number index.
        assert_eq!(db.get_block(&branch.id()).expect("block").id(), branch.id());
        assert_ne!(db.get_hash_by_no(1).expect("hash"), branch.id());
    }

    #[test]
    fn tx_lookup_returns_position_and_checks_main_chain() {
        let mut db = new_chaindb();
        let genesis = genesis_block();
        db.add_genesis(&genesis).expect("genesis");

        let tx = transfer_tx(1);
        let b1 = extend(&mut db, &genesis, vec![transfer_tx(9), tx.clone()]);

        let (found, idx) = db.get_tx(&tx.hash).expect("tx");
        assert_eq!(found.hash, tx.hash);
        assert_eq!(idx.block_hash, b1.id());
        assert_eq!(idx.idx, 1);

        assert!(matches!(
            db.get_tx(&transfer_tx(42).hash),
            Err(CoreError::NotFound("tx"))
        ));
    }
}
