//! Chain service: the block-ingestion orchestrator.
//!
//! The service is a single-consumer actor: it owns the chain DB, the
//! state DB handle, the executor, and the orphan pool, and drains a
//! bounded inbox one request at a time, so at most one request mutates
//! chain state at any moment. Callers talk to it through a cloneable
//! [`ChainHandle`] whose futures carry a bounded deadline and never hold
//! any lock.
//!
//! Within one `AddBlock` the sequence is strictly ordered: execute →
//! store-commit → mempool-del → set-latest → notify. The mempool must
//! observe the removal before the tip advances so that the next mempool
//! fetch by the consensus module sees a state consistent with the new
//! tip; notifications go out last.

pub mod message;
mod reorg;
pub mod sync;

pub use message::{
    AddBlockAck, ChainEvent, ChainRequest, MempoolClient, MissingRange, NoopMempool, PeerId,
};

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, oneshot};

use crate::chaindb::ChainDb;
use crate::config::CoreConfig;
use crate::contract::{Abi, ContractRuntime, Receipt};
use crate::error::CoreError;
use crate::executor::{Executor, GovernanceHandler, Vote};
use crate::metrics::MetricsRegistry;
use crate::orphan::OrphanPool;
use crate::statedb::StateDb;
use crate::storage::{KvStore, WriteBatch};
use crate::types::{
    AccountId, Block, BlockId, BlockNo, BlockState, Genesis, State, Tx, TxId, TxIdx,
};
use crate::validation::{base, HeaderValidator};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// The chain-ingestion actor. Construct with [`ChainService::new`], seed
/// with [`ChainService::bootstrap`], then drive with
/// [`ChainService::run`] on a tokio task.
pub struct ChainService<S, V, C, G>
where
    S: KvStore,
    V: HeaderValidator,
    C: ContractRuntime,
    G: GovernanceHandler,
{
    cdb: ChainDb<S>,
    sdb: Arc<StateDb<S>>,
    executor: Executor<S, C, G>,
    vm: Arc<C>,
    gov: Arc<G>,
    validator: V,
    orphans: OrphanPool,
    mempool: Arc<dyn MempoolClient>,
    events: broadcast::Sender<ChainEvent>,
    inbox: mpsc::Receiver<ChainRequest>,
    metrics: Option<Arc<MetricsRegistry>>,
}

/// Cloneable client of the chain service.
#[derive(Clone)]
pub struct ChainHandle {
    inbox: mpsc::Sender<ChainRequest>,
    events: broadcast::Sender<ChainEvent>,
    request_timeout: Duration,
    peer_request_timeout: Duration,
}

impl<S, V, C, G> ChainService<S, V, C, G>
where
    S: KvStore,
    V: HeaderValidator,
    C: ContractRuntime,
    G: GovernanceHandler,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: &CoreConfig,
        store: Arc<S>,
        sdb: Arc<StateDb<S>>,
        validator: V,
        vm: Arc<C>,
        gov: Arc<G>,
        mempool: Arc<dyn MempoolClient>,
        metrics: Option<Arc<MetricsRegistry>>,
    ) -> (Self, ChainHandle) {
        let (inbox_tx, inbox_rx) = mpsc::channel(cfg.service.inbox_capacity);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let executor = Executor::new(sdb.clone(), vm.clone(), gov.clone());
        let service = ChainService {
            cdb: ChainDb::new(store),
            sdb,
            executor,
            vm,
            gov,
            validator,
            orphans: OrphanPool::new(cfg.chain.max_orphan_blocks),
            mempool,
            events: events.clone(),
            inbox: inbox_rx,
            metrics,
        };
        let handle = ChainHandle {
            inbox: inbox_tx,
            events,
            request_timeout: cfg.service.request_timeout,
            peer_request_timeout: cfg.service.peer_request_timeout,
        };
        (service, handle)
    }

    /// Loads the persisted chain or seeds an empty one from `genesis`.
    /// A chain DB and state DB that disagree about the tip is fatal.
    pub fn bootstrap(&mut self, genesis: &Genesis) -> Result<BlockNo, CoreError> {
        match self.cdb.load_chain()? {
            Some(latest) => {
                let tip = self.cdb.get_hash_by_no(latest)?;
                match self.sdb.latest() {
                    Some(info) if info.block_no == latest && info.block_hash == tip => {
                        tracing::info!(latest, "chain loaded");
                        Ok(latest)
                    }
                    other => Err(CoreError::Fatal(format!(
                        "chain-db at {latest} but state-db at {:?}",
                        other.map(|info| info.block_no)
                    ))),
                }
            }
            None => {
                if self.sdb.latest().is_some() {
                    return Err(CoreError::Fatal(
                        "state-db populated but chain-db empty".to_string(),
                    ));
                }
                let block = genesis.build_block();
                self.cdb.add_genesis(&block)?;
                self.sdb.set_genesis(genesis, &block)?;
                tracing::info!(
                    hash = %hex::encode(block.id().as_bytes()),
                    "genesis block initialized"
                );
                Ok(0)
            }
        }
    }

    /// Drains the inbox until every handle is dropped. Returns an error
    /// only on a fatal condition, after which the node must not continue.
    pub async fn run(mut self) -> Result<(), CoreError> {
        while let Some(request) = self.inbox.recv().await {
            if let Err(e) = self.handle(request) {
                tracing::error!(error = %e, "chain service halting");
                return Err(e);
            }
        }
        Ok(())
    }

    fn handle(&mut self, request: ChainRequest) -> Result<(), CoreError> {
        match request {
            ChainRequest::AddBlock {
                block,
                bstate,
                peer_id,
                reply,
            } => {
                let started = Instant::now();
                let result = self.handle_add_block(*block, bstate, peer_id);

                if let Some(metrics) = &self.metrics {
                    match &result {
                        Ok(_) => metrics
                            .chain
                            .block_connect_seconds
                            .observe(started.elapsed().as_secs_f64()),
                        Err(CoreError::InvalidBlock(_)) => metrics.chain.blocks_rejected.inc(),
                        Err(_) => {}
                    }
                }

                let fatal = match &result {
                    Err(e) if e.is_fatal() => Some(e.to_string()),
                    _ => None,
                };
                let _ = reply.send(result);
                if let Some(msg) = fatal {
                    return Err(CoreError::Fatal(msg));
                }
            }
            ChainRequest::GetBlock { hash, reply } => {
                let _ = reply.send(self.cdb.get_block(&hash));
            }
            ChainRequest::GetBlockByNo { block_no, reply } => {
                let _ = reply.send(self.cdb.get_block_by_no(block_no));
            }
            ChainRequest::GetBestBlock { reply } => {
                let _ = reply.send(self.cdb.get_best_block());
            }
            ChainRequest::GetBestBlockNo { reply } => {
                let _ = reply.send(self.cdb.best_block_no());
            }
            ChainRequest::GetHashByNo { block_no, reply } => {
                let _ = reply.send(self.cdb.get_hash_by_no(block_no));
            }
            ChainRequest::GetTx { hash, reply } => {
                let _ = reply.send(self.cdb.get_tx(&hash));
            }
            ChainRequest::GetState { account, reply } => {
                let aid = AccountId::from_address(&account);
                let _ = reply.send(self.sdb.get_account_state_clone(&aid));
            }
            ChainRequest::GetAnchors { seed, reply } => {
                let _ = reply.send(sync::get_anchors_from_hash(&self.cdb, seed));
            }
            ChainRequest::GetMissing {
                hashes,
                stop_hash,
                reply,
            } => {
                let _ = reply.send(sync::handle_missing(&self.cdb, stop_hash.as_ref(), &hashes));
            }
            ChainRequest::GetReceipt { tx_hash, reply } => {
                let _ = reply.send(self.vm.receipt(&tx_hash));
            }
            ChainRequest::GetAbi { contract, reply } => {
                let _ = reply.send(self.vm.abi(&contract));
            }
            ChainRequest::GetQuery {
                contract,
                query,
                reply,
            } => {
                let _ = reply.send(self.vm.query(&contract, &query));
            }
            ChainRequest::GetElected { n, reply } => {
                let _ = reply.send(self.gov.elected(n));
            }
            ChainRequest::SyncBlockState {
                peer_id,
                best_no,
                best_hash,
            } => {
                self.handle_sync_block_state(peer_id, best_no, best_hash);
            }
        }
        Ok(())
    }

    /// Ingests one candidate block, draining any orphans waiting on it,
    /// and reorganizing when the result outweighs the main chain.
    fn handle_add_block(
        &mut self,
        block: Block,
        bstate: Option<BlockState>,
        peer_id: Option<PeerId>,
    ) -> Result<AddBlockAck, CoreError> {
        let block_id = block.id();
        tracing::debug!(hash = %hex::encode(block_id.as_bytes()), "add block");

        let best = self.cdb.get_best_block()?;
        self.validator.is_block_valid(&block, &best)?;

        if self.is_orphan(&block) {
            if bstate.is_some() {
                return Err(CoreError::InvalidBlock(
                    "block from producer can not be orphan".to_string(),
                ));
            }
            self.handle_orphan(block, peer_id)?;
            return Err(CoreError::OrphanRequired);
        }

        let is_main = self.cdb.is_main_chain(&block)?;
        let ack = AddBlockAck {
            block_no: block.block_no(),
            block_hash: block_id,
        };

        let mut used_bstate = bstate;
        let mut tblock = block;
        loop {
            let block_no = tblock.block_no();

            // Producer blocks were verified while being built; everything
            // else gets the full treatment. Nonces are checked for every
            // connecting block: main-chain blocks against committed
            // state, side-branch blocks against the fork-point state
            // their branch actually descends from.
            if used_bstate.is_none() {
                base::verify_block_body(&tblock)?;
                if is_main {
                    base::check_tx_nonces(&self.sdb, &tblock)?;
                } else {
                    self.check_branch_nonces(&tblock)?;
                }
            }

            if is_main {
                self.executor.execute(used_bstate.take(), &tblock)?;
            }

            let mut batch = WriteBatch::new();
            self.cdb.add_block(&mut batch, &tblock, is_main, true)?;
            self.cdb.commit(batch)?;

            if is_main {
                self.mempool.remove_txs(block_no, &tblock.body.txs);
                self.cdb.set_latest(block_no)?;
                let _ = self.events.send(ChainEvent::StatusUpdate {
                    best_no: block_no,
                    best_hash: tblock.id(),
                });
                let _ = self.events.send(ChainEvent::BlockAdded {
                    block_no,
                    block_hash: tblock.id(),
                });
                if let Some(metrics) = &self.metrics {
                    metrics.chain.blocks_connected.inc();
                }
            }

            tracing::info!(
                is_main,
                block_no,
                latest = self.cdb.best_block_no(),
                hash = %hex::encode(tblock.id().as_bytes()),
                prev_hash = %hex::encode(tblock.prev_id().as_bytes()),
                "block added"
            );

            used_bstate = None;
            match self.connect_orphan(&tblock)? {
                Some(child) => tblock = child,
                None => break,
            }
        }

        if reorg::need_reorg(&self.cdb, &tblock) {
            // Errors before the index switch reject the branch and keep
            // the old chain; errors after it surface as Fatal from the
            // reorg itself.
            reorg::reorg(&mut self.cdb, &self.sdb, &self.executor, &tblock)?;
            if let Some(metrics) = &self.metrics {
                metrics.chain.reorgs.inc();
            }
            let _ = self.events.send(ChainEvent::StatusUpdate {
                best_no: self.cdb.best_block_no(),
                best_hash: tblock.id(),
            });
            let _ = self.events.send(ChainEvent::BlockAdded {
                block_no: tblock.block_no(),
                block_hash: tblock.id(),
            });
        }

        Ok(ack)
    }

    fn is_orphan(&self, block: &Block) -> bool {
        self.cdb.get_block(&block.prev_id()).is_err()
    }

    /// Nonce validation for a side-branch block: reconstruct the nonces
    /// at the fork point, replay the stored branch prefix over them, and
    /// require the new block to chain from there. Committed state is the
    /// wrong baseline for a branch once the main chain has moved past the
    /// fork.
    fn check_branch_nonces(&self, block: &Block) -> Result<(), CoreError> {
        let parent = self.cdb.get_block(&block.prev_id())?;
        let (ancestor, prefix) = reorg::collect_branch(&self.cdb, &parent)?;
        let mut expected = reorg::fork_point_nonces(
            &self.cdb,
            &self.sdb,
            ancestor.block_no(),
            self.cdb.best_block_no(),
        )?;
        for stored in &prefix {
            base::check_tx_nonces_from(&self.sdb, stored, &mut expected)?;
        }
        base::check_tx_nonces_from(&self.sdb, block, &mut expected)
    }

    /// Parks an orphan and asks the sending peer for the missing history,
    /// anchored at our known chain.
    fn handle_orphan(&mut self, block: Block, peer_id: Option<PeerId>) -> Result<(), CoreError> {
        let seed = block.id();
        tracing::debug!(hash = %hex::encode(seed.as_bytes()), "park orphan");
        self.orphans.add(block)?;
        if let Some(metrics) = &self.metrics {
            metrics.chain.orphan_pool_size.set(self.orphans.len() as i64);
        }

        if let Some(peer) = peer_id {
            match sync::get_anchors_from_hash(&self.cdb, seed) {
                Ok(anchors) => {
                    let _ = self.events.send(ChainEvent::RequestMissing {
                        peer,
                        anchors,
                        stop_hash: None,
                    });
                }
                Err(e) => tracing::error!(error = %e, "anchor generation failed"),
            }
        }
        Ok(())
    }

    /// Finds the parked child of `parent`, removing it from the pool. A
    /// parked child whose number does not follow its parent is invalid.
    fn connect_orphan(&mut self, parent: &Block) -> Result<Option<Block>, CoreError> {
        let Some(child) = self.orphans.get_child(&parent.id()) else {
            return Ok(None);
        };
        if child.block_no() != parent.block_no() + 1 {
            return Err(CoreError::InvalidBlock(format!(
                "invalid orphan block no (p={}, c={})",
                parent.block_no(),
                child.block_no()
            )));
        }
        self.orphans.remove(&child.id());
        if let Some(metrics) = &self.metrics {
            metrics.chain.orphan_pool_size.set(self.orphans.len() as i64);
        }
        tracing::debug!(
            parent = %hex::encode(parent.id().as_bytes()),
            orphan = %hex::encode(child.id().as_bytes()),
            "connect orphan"
        );
        Ok(Some(child))
    }

    /// Peer handshake: sync when the peer's announced best is ahead of
    /// ours.
    fn handle_sync_block_state(&mut self, peer: PeerId, best_no: BlockNo, best_hash: BlockId) {
        let my_best = match self.cdb.get_best_block() {
            Ok(block) => block,
            Err(e) => {
                tracing::error!(error = %e, "failed to get best block");
                return;
            }
        };

        if my_best.id() == best_hash {
            tracing::debug!(peer = %peer.0, "peer is in sync");
            return;
        }
        if my_best.block_no() < best_no {
            match sync::get_anchors_from_hash(&self.cdb, my_best.id()) {
                Ok(anchors) => {
                    let _ = self.events.send(ChainEvent::RequestMissing {
                        peer,
                        anchors,
                        stop_hash: Some(best_hash),
                    });
                }
                Err(e) => tracing::error!(error = %e, "anchor generation failed"),
            }
        }
    }
}

impl ChainHandle {
    /// Subscribes to chain events (block notices, status updates, sync
    /// requests).
    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.events.subscribe()
    }

    async fn request<T>(
        &self,
        timeout: Duration,
        make: impl FnOnce(oneshot::Sender<T>) -> ChainRequest,
    ) -> Result<T, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.inbox
            .send(make(reply))
            .await
            .map_err(|_| CoreError::Timeout("chain service inbox closed"))?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(CoreError::Timeout("chain service dropped reply")),
            Err(_) => Err(CoreError::Timeout("chain service request deadline")),
        }
    }

    pub async fn add_block(
        &self,
        block: Block,
        bstate: Option<BlockState>,
        peer_id: Option<PeerId>,
    ) -> Result<AddBlockAck, CoreError> {
        self.request(self.request_timeout, |reply| ChainRequest::AddBlock {
            block: Box::new(block),
            bstate,
            peer_id,
            reply,
        })
        .await?
    }

    pub async fn get_block(&self, hash: BlockId) -> Result<Block, CoreError> {
        self.request(self.request_timeout, |reply| ChainRequest::GetBlock {
            hash,
            reply,
        })
        .await?
    }

    pub async fn get_block_by_no(&self, block_no: BlockNo) -> Result<Block, CoreError> {
        self.request(self.request_timeout, |reply| ChainRequest::GetBlockByNo {
            block_no,
            reply,
        })
        .await?
    }

    pub async fn get_best_block(&self) -> Result<Block, CoreError> {
        self.request(self.request_timeout, |reply| ChainRequest::GetBestBlock {
            reply,
        })
        .await?
    }

    pub async fn get_best_block_no(&self) -> Result<BlockNo, CoreError> {
        self.request(self.request_timeout, |reply| {
            ChainRequest::GetBestBlockNo { reply }
        })
        .await
    }

    pub async fn get_hash_by_no(&self, block_no: BlockNo) -> Result<BlockId, CoreError> {
        self.request(self.request_timeout, |reply| ChainRequest::GetHashByNo {
            block_no,
            reply,
        })
        .await?
    }

    pub async fn get_tx(&self, hash: TxId) -> Result<(Tx, TxIdx), CoreError> {
        self.request(self.request_timeout, |reply| ChainRequest::GetTx {
            hash,
            reply,
        })
        .await?
    }

    pub async fn get_state(&self, account: Vec<u8>) -> Result<State, CoreError> {
        self.request(self.request_timeout, |reply| ChainRequest::GetState {
            account,
            reply,
        })
        .await?
    }

    pub async fn get_anchors(&self, seed: BlockId) -> Result<Vec<BlockId>, CoreError> {
        self.request(self.peer_request_timeout, |reply| {
            ChainRequest::GetAnchors { seed, reply }
        })
        .await?
    }

    pub async fn get_missing(
        &self,
        hashes: Vec<BlockId>,
        stop_hash: Option<BlockId>,
    ) -> Result<MissingRange, CoreError> {
        self.request(self.peer_request_timeout, |reply| {
            ChainRequest::GetMissing {
                hashes,
                stop_hash,
                reply,
            }
        })
        .await
    }

    pub async fn get_receipt(&self, tx_hash: TxId) -> Result<Receipt, CoreError> {
        self.request(self.request_timeout, |reply| ChainRequest::GetReceipt {
            tx_hash,
            reply,
        })
        .await?
    }

    pub async fn get_abi(&self, contract: Vec<u8>) -> Result<Abi, CoreError> {
        self.request(self.request_timeout, |reply| ChainRequest::GetAbi {
            contract,
            reply,
        })
        .await?
    }

    pub async fn query_contract(
        &self,
        contract: Vec<u8>,
        query: Vec<u8>,
    ) -> Result<Vec<u8>, CoreError> {
        self.request(self.request_timeout, |reply| ChainRequest::GetQuery {
            contract,
            query,
            reply,
        })
        .await?
    }

    pub async fn get_elected(&self, n: usize) -> Result<Vec<Vote>, CoreError> {
        self.request(self.request_timeout, |reply| ChainRequest::GetElected {
            n,
            reply,
        })
        .await?
    }

    /// Reports a peer's announced best block; the service decides whether
    /// to sync. Fire-and-forget.
    pub async fn notify_peer_status(
        &self,
        peer_id: PeerId,
        best_no: BlockNo,
        best_hash: BlockId,
    ) -> Result<(), CoreError> {
        self.inbox
            .send(ChainRequest::SyncBlockState {
                peer_id,
                best_no,
                best_hash,
            })
            .await
            .map_err(|_| CoreError::Timeout("chain service inbox closed"))
    }
}
