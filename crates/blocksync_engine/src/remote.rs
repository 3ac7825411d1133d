//! The local document the sync session reports into.

use crate::error::SyncResult;
use crate::operation::Rollback;
use crate::reconcile::IdResolution;
use blocksync_protocol::{Block, BlockId, CreatePayload, PageId, RemoteChange, TargetId, TempId};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Applies server-side state to the local document.
///
/// Implementations are called from the sync event loop and must not block
/// for long. None of these calls enqueue operations.
pub trait DocumentApplier: Send + Sync {
    /// Applies a change pushed by the server.
    fn apply_remote(&self, change: &RemoteChange) -> SyncResult<()>;

    /// Undoes the local effect of a dropped operation.
    fn apply_rollback(&self, rollback: &Rollback) -> SyncResult<()>;

    /// Replaces a locally created block with its persisted form.
    fn apply_resolution(&self, _resolution: &IdResolution) -> SyncResult<()> {
        Ok(())
    }
}

/// An in-memory document.
///
/// Blocks that were created locally and are not yet acknowledged are kept
/// as drafts under their temporary id.
#[derive(Debug, Default)]
pub struct MemoryDocument {
    blocks: RwLock<HashMap<BlockId, Block>>,
    drafts: RwLock<HashMap<TempId, CreatePayload>>,
}

impl MemoryDocument {
    /// Creates an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a persisted block.
    pub fn insert(&self, block: Block) {
        self.blocks.write().insert(block.id, block);
    }

    /// Records a locally created block.
    pub fn insert_draft(&self, temp: TempId, payload: CreatePayload) {
        self.drafts.write().insert(temp, payload);
    }

    /// Returns a persisted block.
    pub fn get(&self, id: BlockId) -> Option<Block> {
        self.blocks.read().get(&id).cloned()
    }

    /// Returns a draft.
    pub fn draft(&self, temp: &TempId) -> Option<CreatePayload> {
        self.drafts.read().get(temp).cloned()
    }

    /// Returns the blocks of a page ordered by position.
    pub fn page(&self, page_id: PageId) -> Vec<Block> {
        let mut blocks: Vec<Block> = self
            .blocks
            .read()
            .values()
            .filter(|block| block.page_id == page_id)
            .cloned()
            .collect();
        blocks.sort_by_key(|block| (block.position, block.created_at));
        blocks
    }

    /// Returns the number of persisted blocks.
    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    /// Returns true if the document holds no persisted block.
    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }

    /// Returns the number of drafts.
    pub fn draft_count(&self) -> usize {
        self.drafts.read().len()
    }
}

impl DocumentApplier for MemoryDocument {
    fn apply_remote(&self, change: &RemoteChange) -> SyncResult<()> {
        match change {
            RemoteChange::Upsert(block) => self.insert(block.clone()),
            RemoteChange::Delete { id, .. } => {
                self.blocks.write().remove(id);
            }
        }
        Ok(())
    }

    fn apply_rollback(&self, rollback: &Rollback) -> SyncResult<()> {
        match rollback {
            Rollback::Remove(TargetId::Temp(temp)) => {
                self.drafts.write().remove(temp);
            }
            Rollback::Remove(TargetId::Durable(id)) => {
                self.blocks.write().remove(id);
            }
            Rollback::Restore(block) => self.insert(block.clone()),
        }
        Ok(())
    }

    fn apply_resolution(&self, resolution: &IdResolution) -> SyncResult<()> {
        self.drafts.write().remove(&resolution.temp_id);
        self.insert(resolution.block.clone());
        Ok(())
    }
}
