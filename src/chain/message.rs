//! Chain service request, reply, and event types.
//!
//! Every request the chain service handles arrives on its inbox as a
//! [`ChainRequest`], carrying a oneshot reply channel where a reply is
//! expected. Outbound effects other than replies — new-block notices,
//! status updates, and missing-block requests — are published as
//! [`ChainEvent`]s on a broadcast channel consumed by the peer layer and
//! the consensus module.

use tokio::sync::oneshot;

use crate::contract::{Abi, Receipt};
use crate::error::CoreError;
use crate::executor::Vote;
use crate::types::{Block, BlockId, BlockNo, BlockState, State, Tx, TxId, TxIdx};

/// Identity of a remote peer, as assigned by the p2p layer.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct PeerId(pub String);

/// Reply channel for a request of result type `T`.
pub type Reply<T> = oneshot::Sender<T>;

/// Acknowledgement returned by a successful `AddBlock`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AddBlockAck {
    pub block_no: BlockNo,
    pub block_hash: BlockId,
}

/// Main-chain range returned by `GetMissing`: parallel hash/number lists,
/// ancestor first. Empty when no common ancestor was found.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MissingRange {
    pub hashes: Vec<BlockId>,
    pub block_nos: Vec<BlockNo>,
}

impl MissingRange {
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

/// Requests handled by the chain service, one at a time, in inbox order.
pub enum ChainRequest {
    /// Ingest a candidate block. `bstate` is set only by the local block
    /// producer, whose blocks arrive pre-executed.
    AddBlock {
        block: Box<Block>,
        bstate: Option<BlockState>,
        peer_id: Option<PeerId>,
        reply: Reply<Result<AddBlockAck, CoreError>>,
    },
    GetBlock {
        hash: BlockId,
        reply: Reply<Result<Block, CoreError>>,
    },
    GetBlockByNo {
        block_no: BlockNo,
        reply: Reply<Result<Block, CoreError>>,
    },
    GetBestBlock {
        reply: Reply<Result<Block, CoreError>>,
    },
    GetBestBlockNo {
        reply: Reply<BlockNo>,
    },
    GetHashByNo {
        block_no: BlockNo,
        reply: Reply<Result<BlockId, CoreError>>,
    },
    GetTx {
        hash: TxId,
        reply: Reply<Result<(Tx, TxIdx), CoreError>>,
    },
    GetState {
        account: Vec<u8>,
        reply: Reply<Result<State, CoreError>>,
    },
    /// Anchor list for locating a common ancestor with a peer.
    GetAnchors {
        seed: BlockId,
        reply: Reply<Result<Vec<BlockId>, CoreError>>,
    },
    /// Resolve a peer's missing-range request against our main chain.
    GetMissing {
        hashes: Vec<BlockId>,
        stop_hash: Option<BlockId>,
        reply: Reply<MissingRange>,
    },
    GetReceipt {
        tx_hash: TxId,
        reply: Reply<Result<Receipt, CoreError>>,
    },
    GetAbi {
        contract: Vec<u8>,
        reply: Reply<Result<Abi, CoreError>>,
    },
    GetQuery {
        contract: Vec<u8>,
        query: Vec<u8>,
        reply: Reply<Result<Vec<u8>, CoreError>>,
    },
    GetElected {
        n: usize,
        reply: Reply<Result<Vec<Vote>, CoreError>>,
    },
    /// Peer handshake: a peer announced its best block; sync if we are
    /// behind. Fire-and-forget.
    SyncBlockState {
        peer_id: PeerId,
        best_no: BlockNo,
        best_hash: BlockId,
    },
}

/// Events published by the chain service.
#[derive(Clone, Debug)]
pub enum ChainEvent {
    /// A block became part of the main chain.
    BlockAdded { block_no: BlockNo, block_hash: BlockId },
    /// The best tip advanced (also emitted after a reorg).
    StatusUpdate { best_no: BlockNo, best_hash: BlockId },
    /// Ask `peer` for the blocks between our anchors and `stop_hash`.
    RequestMissing {
        peer: PeerId,
        anchors: Vec<BlockId>,
        stop_hash: Option<BlockId>,
    },
}

/// Mempool seam: the chain tells the mempool which transactions were
/// consumed by a connected block.
///
/// Calls are fire-and-forget; the mempool is authoritative only for
/// inclusion, not persistence, so a lost notification must never block
/// chain advancement.
pub trait MempoolClient: Send + Sync + 'static {
    fn remove_txs(&self, block_no: BlockNo, txs: &[Tx]);
}

/// Mempool stand-in for nodes running without one.
pub struct NoopMempool;

impl MempoolClient for NoopMempool {
    fn remove_txs(&self, _block_no: BlockNo, _txs: &[Tx]) {}
}
