//! Sync protocol helpers: anchor generation and missing-range resolution.
//!
//! When a node detects a gap (an orphan arrives, or a peer announces a
//! better chain), it offers the peer a list of *anchors* — block hashes it
//! already has — so the peer can locate the common ancestor cheaply. The
//! anchor list is the seed hash, a dense run of the 10 most recent main
//! hashes, then exponentially spaced older hashes down to genesis.
//!
//! The receiving side resolves the request with [`handle_missing`]: the
//! first anchor that is on its main chain is the common ancestor, and the
//! reply is the consecutive main-chain range from the ancestor up to (but
//! excluding) the stop block.

use super::message::MissingRange;
use crate::chaindb::ChainDb;
use crate::error::CoreError;
use crate::storage::KvStore;
use crate::types::{BlockId, BlockNo};

/// Dense anchors taken from the tip before exponential spacing begins.
const DENSE_ANCHORS: usize = 10;
/// Cap on exponentially spaced anchors.
const EXPONENTIAL_ANCHORS: usize = 10;

/// Produces the anchor list offered to a peer, starting from `seed`.
///
/// Anchor block numbers are non-increasing. A failed hash lookup along
/// the way indicates chain-db corruption; the whole list is abandoned.
pub fn get_anchors_from_hash<S: KvStore>(
    cdb: &ChainDb<S>,
    seed: BlockId,
) -> Result<Vec<BlockId>, CoreError> {
    let mut anchors = Vec::with_capacity(1 + DENSE_ANCHORS + EXPONENTIAL_ANCHORS + 1);
    anchors.push(seed);

    // Dense run: latest, latest-1, …, latest-9.
    let mut no = cdb.best_block_no();
    for _ in 0..DENSE_ANCHORS {
        anchors.push(cdb.get_hash_by_no(no)?);
        if no == 0 {
            return Ok(anchors);
        }
        no -= 1;
    }

    // Exponential run: step starts at 1 and doubles after each emission;
    // clamp to genesis and stop once it is emitted.
    let mut step: BlockNo = 1;
    for _ in 0..EXPONENTIAL_ANCHORS {
        anchors.push(cdb.get_hash_by_no(no)?);
        if no <= step {
            if no == 0 {
                break;
            }
            no = 0;
        } else {
            no -= step;
            step *= 2;
        }
    }

    Ok(anchors)
}

/// Resolves a peer's missing-range request.
///
/// The endpoint is `stop_hash` when given, our best block otherwise; an
/// unknown stop hash yields an empty range. Candidates are scanned in the
/// order received, skipping any that are not on our main chain; the first
/// main-chain member is the common ancestor. The reply covers block
/// numbers `ancestor..stop` (stop excluded), ancestor first.
pub fn handle_missing<S: KvStore>(
    cdb: &ChainDb<S>,
    stop_hash: Option<&BlockId>,
    candidates: &[BlockId],
) -> MissingRange {
    let stop_block = match stop_hash {
        Some(hash) => match cdb.get_block(hash) {
            Ok(block) => block,
            Err(_) => return MissingRange::default(),
        },
        None => match cdb.get_best_block() {
            Ok(block) => block,
            Err(_) => return MissingRange::default(),
        },
    };

    let mut ancestor: Option<(BlockNo, BlockId)> = None;
    for candidate in candidates {
        let block = match cdb.get_block(candidate) {
            Ok(block) => block,
            Err(_) => continue,
        };
        let main_hash = match cdb.get_hash_by_no(block.block_no()) {
            Ok(hash) => hash,
            Err(_) => continue,
        };
        if main_hash == *candidate {
            ancestor = Some((block.block_no(), *candidate));
            break;
        }
    }

    let Some((ancestor_no, _)) = ancestor else {
        return MissingRange::default();
    };
    if stop_block.block_no() < ancestor_no {
        return MissingRange::default();
    }

    let count = stop_block.block_no() - ancestor_no;
    let mut range = MissingRange {
        hashes: Vec::with_capacity(count as usize),
        block_nos: Vec::with_capacity(count as usize),
    };
    for no in ancestor_no..stop_block.block_no() {
        match cdb.get_hash_by_no(no) {
            Ok(hash) => {
                range.hashes.push(hash);
                range.block_nos.push(no);
            }
            Err(_) => return MissingRange::default(),
        }
    }
    range
}
