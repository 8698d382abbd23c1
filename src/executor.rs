//! Block execution.
//!
//! The executor applies a block's transactions to a [`BlockState`] and
//! hands the result to the state DB. Blocks arriving from a local
//! producer come with a pre-executed block state and skip transaction
//! replay; blocks from the network are executed from scratch.
//!
//! Transfer semantics (NORMAL transactions) deliberately preserve a known
//! defect of the protocol: a sender with insufficient funds is zeroed
//! while the receiver is still credited with the full amount. Tests pin
//! this behavior; changing it is a consensus-breaking decision.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::contract::{CallContext, ContractRuntime, ContractState};
use crate::error::CoreError;
use crate::statedb::StateDb;
use crate::storage::KvStore;
use crate::types::{AccountId, Block, BlockInfo, BlockNo, BlockState, State, Tx, TxBody, TxType};

/// Address-space tag distinguishing derived contract addresses from
/// account addresses of the same length.
const CONTRACT_ADDRESS_PREFIX: u8 = 0x0C;

/// Derives the address of a contract created by `account` at `nonce`:
/// `0x0C ‖ sha256(account ‖ ascii-decimal(nonce))`, 33 bytes total.
pub fn contract_address(account: &[u8], nonce: u64) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(account);
    hasher.update(nonce.to_string().as_bytes());
    let digest = hasher.finalize();

    let mut address = Vec::with_capacity(1 + digest.len());
    address.push(CONTRACT_ADDRESS_PREFIX);
    address.extend_from_slice(&digest);
    address
}

/// Hook for governance transactions; may mutate either side.
pub trait GovernanceHandler: Send + Sync + 'static {
    fn execute(
        &self,
        body: &TxBody,
        sender: &mut State,
        receiver: &mut State,
        block_no: BlockNo,
    ) -> Result<(), CoreError>;

    /// Current election result, best first.
    fn elected(&self, _n: usize) -> Result<Vec<Vote>, CoreError> {
        Ok(Vec::new())
    }
}

/// One entry of a governance election result.
#[derive(Clone, Debug)]
pub struct Vote {
    pub candidate: Vec<u8>,
    pub amount: u64,
}

/// Governance stand-in that accepts and ignores every governance tx.
pub struct NoopGovernance;

impl GovernanceHandler for NoopGovernance {
    fn execute(
        &self,
        _body: &TxBody,
        _sender: &mut State,
        _receiver: &mut State,
        _block_no: BlockNo,
    ) -> Result<(), CoreError> {
        Ok(())
    }
}

/// Applies blocks to the state DB.
pub struct Executor<S: KvStore, C: ContractRuntime, G: GovernanceHandler> {
    sdb: Arc<StateDb<S>>,
    vm: Arc<C>,
    gov: Arc<G>,
}

impl<S: KvStore, C: ContractRuntime, G: GovernanceHandler> Executor<S, C, G> {
    pub fn new(sdb: Arc<StateDb<S>>, vm: Arc<C>, gov: Arc<G>) -> Self {
        Executor { sdb, vm, gov }
    }

    /// Executes `block` and applies the result to the state DB.
    ///
    /// When `used_bstate` is provided (local producer), the transactions
    /// were already applied during block construction and only the state
    /// DB apply remains. The contract-DB transaction is committed on both
    /// the success and the failure path; on failure the block is not
    /// applied and the error propagates.
    pub fn execute(
        &self,
        used_bstate: Option<BlockState>,
        block: &Block,
    ) -> Result<(), CoreError> {
        let fresh = used_bstate.is_none();
        let mut bs = match used_bstate {
            Some(bs) => bs,
            None => BlockState::new(BlockInfo {
                block_no: block.block_no(),
                block_hash: block.id(),
                prev_hash: block.prev_id(),
            }),
        };

        let mut dbtx = self.vm.begin();
        let mut result = Ok(());
        if fresh {
            for tx in &block.body.txs {
                if let Err(e) = self.execute_tx(
                    &mut bs,
                    tx,
                    &mut dbtx,
                    block.block_no(),
                    block.header.timestamp,
                ) {
                    result = Err(e);
                    break;
                }
            }
        }
        self.vm.commit(dbtx)?;
        result?;

        self.sdb.apply(bs)
    }

    fn execute_tx(
        &self,
        bs: &mut BlockState,
        tx: &Tx,
        dbtx: &mut C::DbTx,
        block_no: BlockNo,
        timestamp: i64,
    ) -> Result<(), CoreError> {
        let body = &tx.body;

        let sender_id = AccountId::from_address(&body.account);
        let sender_state = self.sdb.get_block_account_clone(bs, &sender_id)?;

        let (recipient, create_contract) = if body.recipient.is_empty() {
            (contract_address(&body.account, body.nonce), true)
        } else {
            (body.recipient.clone(), false)
        };
        let receiver_id = AccountId::from_address(&recipient);
        let receiver_state = self.sdb.get_block_account_clone(bs, &receiver_id)?;

        let mut sender_change = sender_state.clone();
        let mut receiver_change = receiver_state.clone();

        match body.tx_type {
            TxType::Normal => {
                if sender_id != receiver_id {
                    if sender_change.balance < body.amount {
                        // FIXME: reject insufficient tx.
                        sender_change.balance = 0;
                    } else {
                        sender_change.balance = sender_state.balance - body.amount;
                    }
                    receiver_change.balance += body.amount;
                }
                if !body.payload.is_empty() {
                    let mut contract_state = self.sdb.open_contract_state(&receiver_change);
                    if create_contract {
                        self.vm.create(
                            &mut contract_state,
                            &body.payload,
                            &recipient,
                            &tx.hash,
                            dbtx,
                        )?;
                    } else {
                        let ctx = CallContext {
                            sender: body.account.clone(),
                            tx_hash: tx.hash,
                            block_no,
                            timestamp,
                            recipient: recipient.clone(),
                        };
                        self.vm
                            .call(&mut contract_state, &body.payload, &ctx, dbtx)?;
                    }
                    self.sdb
                        .commit_contract_state(contract_state, &mut receiver_change);
                }
            }
            TxType::Governance => {
                self.gov
                    .execute(body, &mut sender_change, &mut receiver_change, block_no)?;
            }
        }

        // Monotonicity is enforced before execution — at ingestion for
        // every connecting block and again before reorg re-execution —
        // so the nonce is written through unconditionally here.
        sender_change.nonce = body.nonce;
        bs.put_account(sender_id, sender_state, sender_change);
        if sender_id != receiver_id {
            bs.put_account(receiver_id, receiver_state, receiver_change);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::NoopRuntime;
    use crate::storage::InMemoryKv;
    use crate::types::{Genesis, TxIdx};

    const ADDR_A: [u8; 32] = [0xAA; 32];
    const ADDR_B: [u8; 32] = [0xBB; 32];

    fn setup() -> (
        Arc<StateDb<InMemoryKv>>,
        Executor<InMemoryKv, NoopRuntime, NoopGovernance>,
        Block,
    ) {
        let store = Arc::new(InMemoryKv::new());
        let sdb = Arc::new(StateDb::new(store).expect("open state db"));
        let genesis = Genesis {
            alloc: vec![(ADDR_A.to_vec(), 100), (ADDR_B.to_vec(), 0)],
            timestamp: 1_700_000_000,
        };
        let genesis_block = genesis.build_block();
        sdb.set_genesis(&genesis, &genesis_block).expect("genesis");

        let executor = Executor::new(sdb.clone(), Arc::new(NoopRuntime), Arc::new(NoopGovernance));
        (sdb, executor, genesis_block)
    }

    fn transfer(from: &[u8], to: &[u8], amount: u64, nonce: u64) -> Tx {
        Tx::new(TxBody {
            nonce,
            account: from.to_vec(),
            recipient: to.to_vec(),
            amount,
            payload: Vec::new(),
            limit: 0,
            price: 0,
            tx_type: TxType::Normal,
            sign: Vec::new(),
        })
    }

    fn balance_of(sdb: &StateDb<InMemoryKv>, address: &[u8]) -> u64 {
        sdb.get_account_state_clone(&AccountId::from_address(address))
            .expect("state")
            .balance
    }

    #[test]
    fn single_transfer_moves_balance_and_nonce() {
        let (sdb, executor, genesis_block) = setup();

        let block = Block::new_child(
            Some(&genesis_block),
            vec![transfer(&ADDR_A, &ADDR_B, 30, 1)],
            1_700_000_001,
        );
        executor.execute(None, &block).expect("execute");

        assert_eq!(balance_of(&sdb, &ADDR_A), 70);
        assert_eq!(balance_of(&sdb, &ADDR_B), 30);
        let a = sdb
            .get_account_state_clone(&AccountId::from_address(&ADDR_A))
            .expect("A");
        assert_eq!(a.nonce, 1);
        assert_eq!(sdb.latest().expect("latest").block_no, 1);
    }

    #[test]
    fn insufficient_funds_zeroes_sender_and_credits_receiver() {
        let (sdb, executor, genesis_block) = setup();

        let b1 = Block::new_child(
            Some(&genesis_block),
            vec![transfer(&ADDR_A, &ADDR_B, 30, 1)],
            1_700_000_001,
        );
        executor.execute(None, &b1).expect("execute b1");

        // Pins the documented-but-questionable behavior: the overdraft is
        // not rejected, the sender is zeroed, and the receiver is still
        // credited with the full amount.
        let b2 = Block::new_child(
            Some(&b1),
            vec![transfer(&ADDR_A, &ADDR_B, 999, 2)],
            1_700_000_002,
        );
        executor.execute(None, &b2).expect("execute b2");

        assert_eq!(balance_of(&sdb, &ADDR_A), 0);
        assert_eq!(balance_of(&sdb, &ADDR_B), 30 + 999);
    }

    #[test]
    fn contract_creation_derives_tagged_address() {
        // recipient = 0x0C || sha256(account || "7")
        let mut hasher = Sha256::new();
        hasher.update(ADDR_A);
        hasher.update(b"7");
        let digest: [u8; 32] = hasher.finalize().into();

        let derived = contract_address(&ADDR_A, 7);
        assert_eq!(derived.len(), 33);
        assert_eq!(derived[0], 0x0C);
        assert_eq!(&derived[1..], &digest);
    }

    #[test]
    fn contract_creation_tx_touches_derived_account() {
        let (sdb, executor, genesis_block) = setup();

        let create = Tx::new(TxBody {
            nonce: 1,
            account: ADDR_A.to_vec(),
            recipient: Vec::new(),
            amount: 5,
            payload: vec![0xDE, 0xAD],
            limit: 0,
            price: 0,
            tx_type: TxType::Normal,
            sign: Vec::new(),
        });
        let block = Block::new_child(Some(&genesis_block), vec![create], 1_700_000_001);
        executor.execute(None, &block).expect("execute");

        let contract = contract_address(&ADDR_A, 1);
        assert_eq!(balance_of(&sdb, &contract), 5);
        assert_eq!(balance_of(&sdb, &ADDR_A), 95);
    }

    #[test]
    fn self_transfer_only_advances_nonce() {
        let (sdb, executor, genesis_block) = setup();

        let block = Block::new_child(
            Some(&genesis_block),
            vec![transfer(&ADDR_A, &ADDR_A, 40, 1)],
            1_700_000_001,
        );
        executor.execute(None, &block).expect("execute");

        let a = sdb
            .get_account_state_clone(&AccountId::from_address(&ADDR_A))
            .expect("A");
        assert_eq!(a.balance, 100);
        assert_eq!(a.nonce, 1);
    }

    #[test]
    fn producer_block_state_skips_replay() {
        let (sdb, executor, genesis_block) = setup();

        // The producer already executed the txs; the executor must apply
        // the supplied state as-is instead of replaying the body.
        let block = Block::new_child(
            Some(&genesis_block),
            vec![transfer(&ADDR_A, &ADDR_B, 30, 1)],
            1_700_000_001,
        );
        let info = BlockInfo {
            block_no: 1,
            block_hash: block.id(),
            prev_hash: block.prev_id(),
        };
        let mut bs = BlockState::new(info);
        let a = AccountId::from_address(&ADDR_A);
        bs.put_account(
            a,
            State {
                balance: 100,
                ..State::default()
            },
            State {
                nonce: 1,
                balance: 1, // deliberately different from replay semantics
                ..State::default()
            },
        );

        executor.execute(Some(bs), &block).expect("execute");
        assert_eq!(balance_of(&sdb, &ADDR_A), 1);
        // The receiver was never touched by the supplied state.
        assert_eq!(balance_of(&sdb, &ADDR_B), 0);
    }

    #[test]
    fn tx_idx_encoding_is_used_by_chaindb() {
        // Keep the TxIdx type honest about serde round-trips since the
        // chain DB persists it.
        let idx = TxIdx {
            block_hash: crate::types::BlockId::default(),
            idx: 3,
        };
        let cfg = bincode::config::standard();
        let bytes = bincode::serde::encode_to_vec(idx, cfg).expect("encode");
        let (decoded, _): (TxIdx, usize) =
            bincode::serde::decode_from_slice(&bytes, cfg).expect("decode");
        assert_eq!(decoded, idx);
    }
}
