//! Contract virtual-machine seam.
//!
//! The chain core calls into a contract VM for payload execution but
//! treats it as opaque: this module defines the interface the core
//! consumes and a no-op implementation used by nodes running without a VM
//! and by tests. The real VM lives in its own crate and implements
//! [`ContractRuntime`].

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{BlockNo, State, TxId};

/// Handle on one account's contract storage while a transaction executes.
///
/// Opened from an account state, mutated by the VM, and applied back to
/// the account afterwards. An unchanged root leaves the account's
/// `storage_root` untouched.
#[derive(Clone, Debug)]
pub struct ContractState {
    opened_root: Vec<u8>,
    root: Vec<u8>,
    code_hash: Option<Vec<u8>>,
}

impl ContractState {
    /// Opens a handle on the account's current storage root.
    pub fn open(state: &State) -> Self {
        ContractState {
            opened_root: state.storage_root.clone(),
            root: state.storage_root.clone(),
            code_hash: None,
        }
    }

    /// Current storage root as seen by the VM.
    pub fn root(&self) -> &[u8] {
        &self.root
    }

    /// Called by the VM after mutating contract storage.
    pub fn set_root(&mut self, root: Vec<u8>) {
        self.root = root;
    }

    /// Called by the VM when deploying code to this account.
    pub fn set_code_hash(&mut self, code_hash: Vec<u8>) {
        self.code_hash = Some(code_hash);
    }

    /// Applies the handle back to the account. Only actual changes are
    /// written: an untouched root must not dirty the account.
    pub fn apply_to(self, state: &mut State) {
        if self.root != self.opened_root {
            state.storage_root = self.root;
        }
        if let Some(code_hash) = self.code_hash {
            state.code_hash = code_hash;
        }
    }
}

/// Execution context handed to the VM for a contract call.
#[derive(Clone, Debug)]
pub struct CallContext {
    pub sender: Vec<u8>,
    pub tx_hash: TxId,
    pub block_no: BlockNo,
    pub timestamp: i64,
    pub recipient: Vec<u8>,
}

/// Receipt of a contract execution, looked up by transaction hash.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: TxId,
    pub status: String,
    pub result: Vec<u8>,
}

/// ABI description of a deployed contract.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Abi {
    pub raw: Vec<u8>,
}

/// Interface of the contract virtual machine as consumed by the core.
///
/// `DbTx` is the VM's own database transaction: the executor opens one per
/// block, threads it through every contract invocation, and commits it
/// whether the block succeeds or fails (failed blocks still need the VM's
/// bookkeeping flushed before the error propagates).
pub trait ContractRuntime: Send + Sync + 'static {
    type DbTx: Send;

    fn begin(&self) -> Self::DbTx;

    fn commit(&self, dbtx: Self::DbTx) -> Result<(), CoreError>;

    /// Deploys a contract. Commit semantics of the contract state are
    /// handled inside the VM for creation.
    fn create(
        &self,
        state: &mut ContractState,
        payload: &[u8],
        recipient: &[u8],
        tx_hash: &TxId,
        dbtx: &mut Self::DbTx,
    ) -> Result<(), CoreError>;

    /// Invokes an existing contract with the given context.
    fn call(
        &self,
        state: &mut ContractState,
        payload: &[u8],
        ctx: &CallContext,
        dbtx: &mut Self::DbTx,
    ) -> Result<(), CoreError>;

    fn receipt(&self, _tx_hash: &TxId) -> Result<Receipt, CoreError> {
        Err(CoreError::NotFound("receipt"))
    }

    fn abi(&self, _contract: &[u8]) -> Result<Abi, CoreError> {
        Err(CoreError::NotFound("abi"))
    }

    fn query(&self, _contract: &[u8], _query: &[u8]) -> Result<Vec<u8>, CoreError> {
        Err(CoreError::NotFound("contract"))
    }
}

/// VM stand-in that accepts every payload and changes nothing.
pub struct NoopRuntime;

impl ContractRuntime for NoopRuntime {
    type DbTx = ();

    fn begin(&self) -> Self::DbTx {}

    fn commit(&self, _dbtx: Self::DbTx) -> Result<(), CoreError> {
        Ok(())
    }

    fn create(
        &self,
        _state: &mut ContractState,
        _payload: &[u8],
        _recipient: &[u8],
        _tx_hash: &TxId,
        _dbtx: &mut Self::DbTx,
    ) -> Result<(), CoreError> {
        Ok(())
    }

    fn call(
        &self,
        _state: &mut ContractState,
        _payload: &[u8],
        _ctx: &CallContext,
        _dbtx: &mut Self::DbTx,
    ) -> Result<(), CoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchanged_root_does_not_dirty_the_account() {
        let mut state = State {
            storage_root: vec![1, 2, 3],
            ..State::default()
        };
        let cs = ContractState::open(&state);
        cs.apply_to(&mut state);
        assert_eq!(state.storage_root, vec![1, 2, 3]);
    }

    #[test]
    fn changed_root_and_code_are_applied() {
        let mut state = State::default();
        let mut cs = ContractState::open(&state);
        cs.set_root(vec![9, 9]);
        cs.set_code_hash(vec![7]);
        cs.apply_to(&mut state);
        assert_eq!(state.storage_root, vec![9, 9]);
        assert_eq!(state.code_hash, vec![7]);
    }

    #[test]
    fn noop_runtime_answers_not_found() {
        let vm = NoopRuntime;
        assert!(matches!(
            vm.receipt(&TxId::default()),
            Err(CoreError::NotFound("receipt"))
        ));
        assert!(matches!(vm.abi(b"contract"), Err(CoreError::NotFound("abi"))));
    }
}
