//! Versioned account-state database.
//!
//! The state DB maintains:
//!
//! - the committed account map `AccountId -> State`,
//! - a binary sparse Merkle trie summarizing that map ([`trie`]),
//! - per-applied-block undo records enabling rollback during reorgs,
//! - the `latest` [`BlockInfo`] the state corresponds to.
//!
//! `apply` moves the state forward by exactly one block; `rollback` walks
//! it back using the stored undo records. All operations take an exclusive
//! writer lock; read-only accessors take a shared lock and hand out deep
//! copies so no caller ever holds a reference into the committed map.

pub mod trie;

pub use trie::SparseMerkleTrie;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::contract::ContractState;
use crate::error::CoreError;
use crate::storage::{KvStore, WriteBatch, CF_STATE};
use crate::types::{AccountId, Block, BlockId, BlockInfo, BlockNo, BlockState, Genesis, Hash256, State};

const LATEST_KEY: &[u8] = b"state.latest";
const ACCOUNTS_KEY: &[u8] = b"state.accounts";
const ROOT_KEY: &[u8] = b"state.root";
const BLOCK_STATE_PREFIX: &[u8] = b"bs.";

fn block_state_key(block_hash: &BlockId) -> Vec<u8> {
    let mut key = BLOCK_STATE_PREFIX.to_vec();
    key.extend_from_slice(block_hash.as_bytes());
    key
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
        .expect("state-db records should always be serializable")
}

struct Inner<S: KvStore> {
    store: Arc<S>,
    accounts: HashMap<AccountId, State>,
    trie: SparseMerkleTrie<S>,
    latest: Option<BlockInfo>,
}

/// The chain's account-state database.
pub struct StateDb<S: KvStore> {
    inner: RwLock<Inner<S>>,
}

impl<S: KvStore> StateDb<S> {
    /// Opens the state DB over `store`, restoring the committed account
    /// map, trie root, and `latest` pointer from persisted records.
    pub fn new(store: Arc<S>) -> Result<Self, CoreError> {
        let latest = match store.get(CF_STATE, LATEST_KEY)? {
            Some(raw) => Some(decode::<BlockInfo>(&raw, "state latest")?),
            None => None,
        };
        let accounts = match store.get(CF_STATE, ACCOUNTS_KEY)? {
            Some(raw) => decode::<Vec<(AccountId, State)>>(&raw, "state accounts")?
                .into_iter()
                .collect(),
            None => HashMap::new(),
        };
        let trie = match store.get(CF_STATE, ROOT_KEY)? {
            Some(raw) => SparseMerkleTrie::with_root(store.clone(), Hash256::from_slice(&raw)),
            None => SparseMerkleTrie::new(store.clone()),
        };

        Ok(StateDb {
            inner: RwLock::new(Inner {
                store,
                accounts,
                trie,
                latest,
            }),
        })
    }

    /// The block the committed state corresponds to; `None` before genesis.
    pub fn latest(&self) -> Option<BlockInfo> {
        self.inner.read().expect("state-db lock poisoned").latest
    }

    /// Current trie root.
    pub fn get_hash(&self) -> Hash256 {
        self.inner
            .read()
            .expect("state-db lock poisoned")
            .trie
            .root()
    }

    /// Seeds the state from the genesis allocation and applies it as
    /// block 0.
    pub fn set_genesis(&self, genesis: &Genesis, genesis_block: &Block) -> Result<(), CoreError> {
        let info = BlockInfo {
            block_no: 0,
            block_hash: genesis_block.id(),
            prev_hash: genesis_block.prev_id(),
        };
        let mut bs = BlockState::new(info);
        for (aid, state) in genesis.account_states() {
            bs.put_account(aid, State::default(), state);
        }
        self.apply(bs)
    }

    /// Returns a deep copy of the committed state for `aid`; missing
    /// accounts read as the default (empty) state.
    pub fn get_account_state_clone(&self, aid: &AccountId) -> Result<State, CoreError> {
        if aid.is_zero() {
            return Err(CoreError::InvalidArgument("empty account id"));
        }
        let inner = self.inner.read().expect("state-db lock poisoned");
        Ok(inner.accounts.get(aid).cloned().unwrap_or_default())
    }

    /// Returns a deep copy of the account as seen by an in-flight block:
    /// the block state's post-image when the block already touched it,
    /// the committed state otherwise. Never a live reference.
    pub fn get_block_account_clone(
        &self,
        bs: &BlockState,
        aid: &AccountId,
    ) -> Result<State, CoreError> {
        if aid.is_zero() {
            return Err(CoreError::InvalidArgument("empty account id"));
        }
        if let Some(state) = bs.get_account(aid) {
            return Ok(state.clone());
        }
        let inner = self.inner.read().expect("state-db lock poisoned");
        Ok(inner.accounts.get(aid).cloned().unwrap_or_default())
    }

    /// Returns the stored block state (account post-images plus undo
    /// record) of an applied block. The undo pre-images are what reorg
    /// validation reads to reconstruct fork-point state without mutating
    /// anything.
    pub fn get_block_state(&self, block_hash: &BlockId) -> Result<BlockState, CoreError> {
        let inner = self.inner.read().expect("state-db lock poisoned");
        inner.load_block_state(block_hash)
    }

    /// Opens a contract-state handle for an account.
    pub fn open_contract_state(&self, state: &State) -> ContractState {
        ContractState::open(state)
    }

    /// Applies a contract-state handle back to an account. An unchanged
    /// contract root must not alter the account's storage root.
    pub fn commit_contract_state(&self, cs: ContractState, state: &mut State) {
        cs.apply_to(state);
    }

    /// Applies one block's state changes.
    ///
    /// Preconditions: `bs.block_no == latest.block_no + 1` and
    /// `bs.prev_hash == latest.block_hash` (block 0 against an empty
    /// state). Violations return [`CoreError::InvalidSequence`] and leave
    /// the state untouched.
    pub fn apply(&self, bs: BlockState) -> Result<(), CoreError> {
        let mut inner = self.inner.write().expect("state-db lock poisoned");

        match inner.latest {
            Some(latest) => {
                if bs.info.block_no != latest.block_no + 1 {
                    return Err(CoreError::InvalidSequence(format!(
                        "apply: latest={} this={}",
                        latest.block_no, bs.info.block_no
                    )));
                }
                if bs.info.prev_hash != latest.block_hash {
                    return Err(CoreError::InvalidSequence(format!(
                        "apply: previous block mismatch at {}",
                        bs.info.block_no
                    )));
                }
            }
            None => {
                if bs.info.block_no != 0 {
                    return Err(CoreError::InvalidSequence(format!(
                        "apply: no genesis, this={}",
                        bs.info.block_no
                    )));
                }
            }
        }

        inner.apply_unchecked(bs)
    }

    /// Rolls the state back until `latest.block_no == target_block_no`,
    /// restoring account pre-images and reverting the trie per block.
    pub fn rollback(&self, target_block_no: BlockNo) -> Result<(), CoreError> {
        let mut inner = self.inner.write().expect("state-db lock poisoned");

        let latest = inner
            .latest
            .ok_or_else(|| CoreError::InvalidSequence("rollback: empty state".to_string()))?;
        if latest.block_no <= target_block_no {
            return Err(CoreError::InvalidSequence(format!(
                "rollback: latest={} target={}",
                latest.block_no, target_block_no
            )));
        }

        while inner.latest.expect("latest present during rollback").block_no > target_block_no {
            let current = inner.latest.expect("latest present during rollback");
            let bs = inner.load_block_state(&current.block_hash)?;

            for (aid, pre_image) in &bs.undo.accounts {
                inner.accounts.insert(*aid, pre_image.clone());
            }
            inner.trie.revert(bs.undo.state_root)?;

            let parent = inner.load_block_state(&bs.info.prev_hash)?;
            inner.latest = Some(parent.info);
        }

        inner.save_meta()
    }
}

impl<S: KvStore> Inner<S> {
    fn load_block_state(&self, block_hash: &BlockId) -> Result<BlockState, CoreError> {
        match self.store.get(CF_STATE, &block_state_key(block_hash))? {
            Some(raw) => decode(&raw, "block state"),
            None => Err(CoreError::NotFound("block state")),
        }
    }

    fn apply_unchecked(&mut self, mut bs: BlockState) -> Result<(), CoreError> {
        // Rollback needs the pre-apply root; capture it unless the
        // producer already did.
        if bs.undo.state_root.is_zero() {
            bs.undo.state_root = self.trie.root();
        }

        self.store
            .put(CF_STATE, &block_state_key(&bs.info.block_hash), &encode(&bs))?;

        for (aid, state) in bs.accounts() {
            self.accounts.insert(*aid, state.clone());
        }

        // Deterministic root: sorted keys, canonical values, one batch.
        let mut touched: Vec<&AccountId> = bs.accounts().keys().collect();
        touched.sort();
        let keys: Vec<AccountId> = touched.iter().map(|aid| **aid).collect();
        let values: Vec<Vec<u8>> = touched
            .iter()
            .map(|aid| bs.accounts()[*aid].canonical_bytes())
            .collect();
        self.trie.update(&keys, &values)?;
        self.trie.commit()?;

        self.latest = Some(bs.info);
        self.save_meta()
    }

    fn save_meta(&mut self) -> Result<(), CoreError> {
        let mut sorted: Vec<(AccountId, State)> = self
            .accounts
            .iter()
            .map(|(aid, state)| (*aid, state.clone()))
            .collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));

        let mut batch = WriteBatch::new();
        batch.put(CF_STATE, ACCOUNTS_KEY.to_vec(), encode(&sorted));
        if let Some(latest) = self.latest {
            batch.put(CF_STATE, LATEST_KEY.to_vec(), encode(&latest));
        }
        batch.put(
            CF_STATE,
            ROOT_KEY.to_vec(),
            self.trie.root().as_bytes().to_vec(),
        );
        self.store.write(batch)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryKv;
    use crate::types::BlockId;

    fn aid(byte: u8) -> AccountId {
        AccountId(Hash256([byte; 32]))
    }

    fn bid(byte: u8) -> BlockId {
        BlockId(Hash256([byte; 32]))
    }

    fn state(nonce: u64, balance: u64) -> State {
        State {
            nonce,
            balance,
            ..State::default()
        }
    }

    fn new_statedb() -> StateDb<InMemoryKv> {
        StateDb::new(Arc::new(InMemoryKv::new())).expect("open state db")
    }

    fn demo_genesis() -> (Genesis, Block) {
        let genesis = Genesis {
            alloc: vec![(vec![0xAA; 32], 100), (vec![0xBB; 32], 0)],
            timestamp: 1_700_000_000,
        };
        let block = genesis.build_block();
        (genesis, block)
    }

    /// Builds a block state linking to `prev` with the given transitions.
    fn make_bs(
        prev: BlockInfo,
        hash_byte: u8,
        changes: Vec<(AccountId, State, State)>,
    ) -> BlockState {
        let info = BlockInfo {
            block_no: prev.block_no + 1,
            block_hash: bid(hash_byte),
            prev_hash: prev.block_hash,
        };
        let mut bs = BlockState::new(info);
        for (aid, before, after) in changes {
            bs.put_account(aid, before, after);
        }
        bs
    }

    #[test]
    fn genesis_boot_seeds_alloc_and_root() {
        let sdb = new_statedb();
        let (genesis, block) = demo_genesis();
        sdb.set_genesis(&genesis, &block).expect("genesis");

        let latest = sdb.latest().expect("latest");
        assert_eq!(latest.block_no, 0);
        assert_eq!(latest.block_hash, block.id());

        let a = AccountId::from_address(&[0xAA; 32]);
        assert_eq!(sdb.get_account_state_clone(&a).expect("A").balance, 100);
        assert!(!sdb.get_hash().is_zero());
    }

    #[test]
    fn empty_account_id_is_rejected() {
        let sdb = new_statedb();
        assert!(matches!(
            sdb.get_account_state_clone(&AccountId::default()),
            Err(CoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn apply_enforces_sequence_preconditions() {
        let sdb = new_statedb();
        let (genesis, block) = demo_genesis();
        sdb.set_genesis(&genesis, &block).expect("genesis");
        let latest = sdb.latest().expect("latest");

        // Wrong height.
        let mut bad_height = make_bs(latest, 2, vec![]);
        bad_height.info.block_no = 5;
        assert!(matches!(
            sdb.apply(bad_height),
            Err(CoreError::InvalidSequence(_))
        ));

        // Wrong parent hash.
        let mut bad_parent = make_bs(latest, 2, vec![]);
        bad_parent.info.prev_hash = bid(0x77);
        assert!(matches!(
            sdb.apply(bad_parent),
            Err(CoreError::InvalidSequence(_))
        ));

        // State untouched by the rejected applies.
        assert_eq!(sdb.latest().expect("latest").block_no, 0);
    }

    #[test]
    fn apply_then_rollback_restores_root() {
        let sdb = new_statedb();
        let (genesis, block) = demo_genesis();
        sdb.set_genesis(&genesis, &block).expect("genesis");

        let r0 = sdb.get_hash();
        let a = AccountId::from_address(&[0xAA; 32]);
        let b = AccountId::from_address(&[0xBB; 32]);

        let l0 = sdb.latest().expect("latest");
        let bs1 = make_bs(
            l0,
            1,
            vec![(a, state(0, 100), state(1, 70)), (b, state(0, 0), state(0, 30))],
        );
        sdb.apply(bs1).expect("apply b1");
        let r1 = sdb.get_hash();
        assert_ne!(r0, r1);

        let l1 = sdb.latest().expect("latest");
        let bs2 = make_bs(l1, 2, vec![(a, state(1, 70), state(2, 40))]);
        sdb.apply(bs2).expect("apply b2");

        sdb.rollback(0).expect("rollback");
        assert_eq!(sdb.get_hash(), r0);
        assert_eq!(sdb.latest().expect("latest").block_no, 0);
        assert_eq!(sdb.get_account_state_clone(&a).expect("A").balance, 100);
        assert_eq!(sdb.get_account_state_clone(&b).expect("B").balance, 0);
    }

    #[test]
    fn rollback_requires_later_latest() {
        let sdb = new_statedb();
        let (genesis, block) = demo_genesis();
        sdb.set_genesis(&genesis, &block).expect("genesis");
        assert!(matches!(
            sdb.rollback(0),
            Err(CoreError::InvalidSequence(_))
        ));
    }

    #[test]
    fn identical_sequences_produce_identical_roots() {
        let run = || {
            let sdb = new_statedb();
            let (genesis, block) = demo_genesis();
            sdb.set_genesis(&genesis, &block).expect("genesis");
            let mut roots = vec![sdb.get_hash()];

            let a = AccountId::from_address(&[0xAA; 32]);
            let l0 = sdb.latest().expect("latest");
            sdb.apply(make_bs(l0, 1, vec![(a, state(0, 100), state(1, 70))]))
                .expect("apply");
            roots.push(sdb.get_hash());

            let l1 = sdb.latest().expect("latest");
            sdb.apply(make_bs(l1, 2, vec![(a, state(1, 70), state(2, 10))]))
                .expect("apply");
            roots.push(sdb.get_hash());
            roots
        };

        assert_eq!(run(), run());
    }

    #[test]
    fn stored_block_states_are_retrievable() {
        let sdb = new_statedb();
        let (genesis, block) = demo_genesis();
        sdb.set_genesis(&genesis, &block).expect("genesis");

        let bs = sdb.get_block_state(&block.id()).expect("block state");
        assert_eq!(bs.info.block_no, 0);
        assert!(!bs.undo.accounts.is_empty());

        assert!(matches!(
            sdb.get_block_state(&bid(0x55)),
            Err(CoreError::NotFound(_))
        ));
    }

    #[test]
    fn block_account_clone_prefers_in_flight_state() {
        let sdb = new_statedb();
        let (genesis, block) = demo_genesis();
        sdb.set_genesis(&genesis, &block).expect("genesis");

        let a = AccountId::from_address(&[0xAA; 32]);
        let l0 = sdb.latest().expect("latest");
        let mut bs = make_bs(l0, 1, vec![]);

        // Untouched: committed value.
        assert_eq!(sdb.get_block_account_clone(&bs, &a).expect("A").balance, 100);

        bs.put_account(a, state(0, 100), state(1, 55));
        assert_eq!(sdb.get_block_account_clone(&bs, &a).expect("A").balance, 55);
    }

    #[test]
    fn reopen_restores_latest_accounts_and_root() {
        let store = Arc::new(InMemoryKv::new());
        let (latest, root) = {
            let sdb = StateDb::new(store.clone()).expect("open");
            let (genesis, block) = demo_genesis();
            sdb.set_genesis(&genesis, &block).expect("genesis");
            (sdb.latest().expect("latest"), sdb.get_hash())
        };

        let reopened = StateDb::new(store).expect("reopen");
        assert_eq!(reopened.latest(), Some(latest));
        assert_eq!(reopened.get_hash(), root);
        let a = AccountId::from_address(&[0xAA; 32]);
        assert_eq!(reopened.get_account_state_clone(&a).expect("A").balance, 100);
    }
}
