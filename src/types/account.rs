//! Account state and per-block state transitions.
//!
//! [`State`] is the persisted per-account record. [`BlockState`] is the
//! in-memory transactional view produced by executing one block: it owns
//! the post-image of every touched account plus an undo record holding
//! the pre-images and the trie root from before the block was applied.
//! The undo record is what makes rollback during a reorg possible.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{AccountId, BlockId, BlockNo, Hash256};

/// Persisted state of a single account.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub nonce: u64,
    pub balance: u64,
    /// Hash of the deployed contract code; empty for plain accounts.
    pub code_hash: Vec<u8>,
    /// Root of the contract storage trie; empty when no storage exists.
    pub storage_root: Vec<u8>,
}

impl State {
    /// An account is empty iff it has never sent a transaction and holds
    /// no balance.
    pub fn is_empty(&self) -> bool {
        self.nonce == 0 && self.balance == 0
    }

    /// Canonical serialization used as the trie value for this state.
    ///
    /// # Panics
    ///
    /// Panics if encoding fails, which would be a programming error since
    /// every field is serializable.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let cfg = bincode::config::standard();
        bincode::serde::encode_to_vec(self, cfg)
            .expect("State should always be serializable with bincode 2 + serde")
    }
}

/// Minimal descriptor of an in-flight or committed block state.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub block_no: BlockNo,
    pub block_hash: BlockId,
    pub prev_hash: BlockId,
}

/// Pre-images captured for one applied block.
///
/// `state_root` is the trie root from before the block was applied; the
/// account map holds the state each touched account had before its first
/// write in the block.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UndoStates {
    /// Trie root prior to applying the block; zero until captured.
    pub state_root: Hash256,
    /// Pre-image per touched account, captured on first write.
    pub accounts: HashMap<AccountId, State>,
}

/// Transactional view of the account changes produced by one block.
///
/// Created per block, mutated only by the executor, then consumed by the
/// state DB's apply. Undo entries are retained keyed by block hash to
/// support rollback during reorganization.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockState {
    pub info: BlockInfo,
    accounts: HashMap<AccountId, State>,
    pub undo: UndoStates,
}

impl BlockState {
    pub fn new(info: BlockInfo) -> Self {
        BlockState {
            info,
            accounts: HashMap::new(),
            undo: UndoStates::default(),
        }
    }

    /// Looks up the post-image of an account touched by this block.
    pub fn get_account(&self, aid: &AccountId) -> Option<&State> {
        self.accounts.get(aid)
    }

    /// All touched accounts with their post-images.
    pub fn accounts(&self) -> &HashMap<AccountId, State> {
        &self.accounts
    }

    /// Records a state change. The pre-image is captured into the undo
    /// record only on the first write for an account; later writes must
    /// not overwrite it, otherwise rollback would restore an intermediate
    /// state instead of the committed one.
    pub fn put_account(&mut self, aid: AccountId, before: State, changed: State) {
        self.undo.accounts.entry(aid).or_insert(before);
        self.accounts.insert(aid, changed);
    }

    pub fn block_no(&self) -> BlockNo {
        self.info.block_no
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aid(byte: u8) -> AccountId {
        AccountId(Hash256([byte; 32]))
    }

    fn state(nonce: u64, balance: u64) -> State {
        State {
            nonce,
            balance,
            ..State::default()
        }
    }

    #[test]
    fn emptiness_ignores_contract_fields() {
        assert!(State::default().is_empty());
        assert!(!state(1, 0).is_empty());
        assert!(!state(0, 5).is_empty());

        let contract_only = State {
            code_hash: vec![1, 2, 3],
            ..State::default()
        };
        assert!(contract_only.is_empty());
    }

    #[test]
    fn undo_keeps_first_pre_image() {
        let info = BlockInfo {
            block_no: 1,
            block_hash: BlockId(Hash256([1; 32])),
            prev_hash: BlockId(Hash256([0; 32])),
        };
        let mut bs = BlockState::new(info);

        bs.put_account(aid(7), state(0, 100), state(1, 70));
        bs.put_account(aid(7), state(1, 70), state(2, 40));

        // The post-image tracks the latest write, the pre-image the first.
        assert_eq!(bs.get_account(&aid(7)), Some(&state(2, 40)));
        assert_eq!(bs.undo.accounts.get(&aid(7)), Some(&state(0, 100)));
    }

    #[test]
    fn undo_covers_every_touched_account() {
        let info = BlockInfo {
            block_no: 1,
            block_hash: BlockId(Hash256([1; 32])),
            prev_hash: BlockId(Hash256([0; 32])),
        };
        let mut bs = BlockState::new(info);
        bs.put_account(aid(1), state(0, 10), state(1, 5));
        bs.put_account(aid(2), State::default(), state(0, 5));

        let touched: std::collections::HashSet<_> = bs.accounts().keys().copied().collect();
        let undone: std::collections::HashSet<_> = bs.undo.accounts.keys().copied().collect();
        assert_eq!(touched, undone);
    }

    #[test]
    fn canonical_state_bytes_are_stable() {
        let a = state(3, 500).canonical_bytes();
        let b = state(3, 500).canonical_bytes();
        assert_eq!(a, b);
        assert_ne!(a, state(3, 501).canonical_bytes());
    }
}
