//! Orphan pool.
//!
//! Parks blocks whose parent has not been ingested yet. Each orphan is
//! indexed by its own hash and discoverable through its parent hash, so
//! the ingestion loop can drain a whole waiting chain in parent-to-child
//! order once the gap closes. The pool is bounded; when full, the oldest
//! parked block is evicted.

use std::collections::{HashMap, VecDeque};

use crate::error::CoreError;
use crate::types::{Block, BlockId};

/// Bounded pool of blocks waiting for their parent.
pub struct OrphanPool {
    max_blocks: usize,
    blocks: HashMap<BlockId, Block>,
    by_parent: HashMap<BlockId, BlockId>,
    arrival: VecDeque<BlockId>,
}

impl OrphanPool {
    pub fn new(max_blocks: usize) -> Self {
        OrphanPool {
            max_blocks,
            blocks: HashMap::new(),
            by_parent: HashMap::new(),
            arrival: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Parks a block. Re-adding a known orphan is an error; a full pool
    /// evicts its oldest entry first.
    pub fn add(&mut self, block: Block) -> Result<(), CoreError> {
        let id = block.id();
        if self.blocks.contains_key(&id) {
            return Err(CoreError::InvalidArgument("orphan already known"));
        }

        while self.blocks.len() >= self.max_blocks {
            if let Some(oldest) = self.arrival.pop_front() {
                self.evict(&oldest);
            } else {
                break;
            }
        }

        self.by_parent.insert(block.prev_id(), id);
        self.arrival.push_back(id);
        self.blocks.insert(id, block);
        Ok(())
    }

    /// Removes a parked block by its hash.
    pub fn remove(&mut self, id: &BlockId) {
        self.evict(id);
        self.arrival.retain(|entry| entry != id);
    }

    /// Looks up the parked child of `parent_hash`, if any.
    pub fn get_child(&self, parent_hash: &BlockId) -> Option<Block> {
        let child_id = self.by_parent.get(parent_hash)?;
        self.blocks.get(child_id).cloned()
    }

    fn evict(&mut self, id: &BlockId) {
        if let Some(block) = self.blocks.remove(id) {
            self.by_parent.remove(&block.prev_id());
        }
    }
}
