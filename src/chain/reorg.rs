//! Chain reorganization.
//!
//! Triggered when a newly completed side branch ends higher than the
//! current main chain. The switch is staged so a crash or a bad branch
//! can never leave the two databases disagreeing about the canonical
//! chain:
//!
//! 1. walk back from the branch tip to the common ancestor and
//!    re-validate the branch's transaction nonces against the fork-point
//!    state (reconstructed read-only from undo records) — a branch that
//!    fails here is rejected with nothing mutated and the previous main
//!    chain stays canonical;
//! 2. stage the branch's `blockno` re-index (with tx indexes) into one
//!    store batch and commit it;
//! 3. only after that commit, roll the state DB back to the ancestor and
//!    re-execute the branch in order.
//!
//! A failure after step 2 is fatal: the two databases have diverged and
//! no in-place repair is attempted.

use std::collections::HashMap;

use crate::chaindb::ChainDb;
use crate::contract::ContractRuntime;
use crate::error::CoreError;
use crate::executor::{Executor, GovernanceHandler};
use crate::statedb::StateDb;
use crate::storage::{KvStore, WriteBatch, CF_BLOCK_NO};
use crate::types::{block_no_to_bytes, AccountId, Block, BlockNo};
use crate::validation::base;

/// A completed block that ends above the current main chain wins.
pub(crate) fn need_reorg<S: KvStore>(cdb: &ChainDb<S>, block: &Block) -> bool {
    block.block_no() > cdb.best_block_no()
}

/// Walks a stored side chain from `start` (inclusive) back to the first
/// block the main index agrees on. Returns the fork-point block and the
/// side-chain blocks in ascending order; when `start` itself is on the
/// main chain the branch is empty.
pub(crate) fn collect_branch<S: KvStore>(
    cdb: &ChainDb<S>,
    start: &Block,
) -> Result<(Block, Vec<Block>), CoreError> {
    let mut branch: Vec<Block> = Vec::new();
    let mut cursor = start.clone();
    let ancestor = loop {
        match cdb.get_hash_by_no(cursor.block_no()) {
            Ok(main_hash) if main_hash == cursor.id() => break cursor,
            _ => {
                let parent = cdb.get_block(&cursor.prev_id())?;
                branch.push(cursor);
                cursor = parent;
            }
        }
    };
    branch.reverse();
    Ok((ancestor, branch))
}

/// Reconstructs account nonces as of the fork point without mutating
/// anything: among the main blocks above the ancestor, the earliest undo
/// pre-image per account is its state at the fork. Accounts absent from
/// the returned map were untouched since the fork and keep their
/// committed nonce.
pub(crate) fn fork_point_nonces<S: KvStore>(
    cdb: &ChainDb<S>,
    sdb: &StateDb<S>,
    ancestor_no: BlockNo,
    best_no: BlockNo,
) -> Result<HashMap<AccountId, u64>, CoreError> {
    let mut base = HashMap::new();
    for no in (ancestor_no + 1)..=best_no {
        let hash = cdb.get_hash_by_no(no)?;
        let bs = sdb.get_block_state(&hash)?;
        for (aid, pre_image) in &bs.undo.accounts {
            base.entry(*aid).or_insert(pre_image.nonce);
        }
    }
    Ok(base)
}

/// Switches the main chain to the branch ending at `new_tip`.
///
/// Errors raised before the store batch commits (branch walk, nonce
/// validation) leave both databases untouched and are recoverable; the
/// caller keeps serving the old main chain. Errors raised after the
/// commit come back as [`CoreError::Fatal`].
pub(crate) fn reorg<S, C, G>(
    cdb: &mut ChainDb<S>,
    sdb: &StateDb<S>,
    executor: &Executor<S, C, G>,
    new_tip: &Block,
) -> Result<(), CoreError>
where
    S: KvStore,
    C: ContractRuntime,
    G: GovernanceHandler,
{
    let old_best_no = cdb.best_block_no();
    let (ancestor, branch) = collect_branch(cdb, new_tip)?;

    // The branch must be nonce-coherent from the fork point before any
    // index or state mutation happens; re-execution must never be the
    // first place a bad nonce is noticed.
    let mut expected = fork_point_nonces(cdb, sdb, ancestor.block_no(), old_best_no)?;
    for block in &branch {
        base::check_tx_nonces_from(sdb, block, &mut expected)?;
    }

    tracing::info!(
        ancestor_no = ancestor.block_no(),
        branch_len = branch.len(),
        new_best_no = new_tip.block_no(),
        old_best_no,
        "reorganizing main chain"
    );

    // The new main index becomes durable in a single batch; a failure
    // here aborts atomically and keeps the old index.
    let mut batch = WriteBatch::new();
    for block in &branch {
        cdb.add_block(&mut batch, block, true, true)?;
    }
    for no in (new_tip.block_no() + 1)..=old_best_no {
        batch.delete(CF_BLOCK_NO, block_no_to_bytes(no).to_vec());
    }
    cdb.commit(batch)?;

    // From here on the index describes the new chain; the state DB must
    // follow or the node cannot continue.
    let fatal = |e: CoreError| CoreError::Fatal(format!("reorg failed: {e}"));
    sdb.rollback(ancestor.block_no()).map_err(fatal)?;
    for block in &branch {
        executor.execute(None, block).map_err(fatal)?;
    }
    cdb.set_latest(new_tip.block_no()).map_err(fatal)?;

    Ok(())
}
