//! Block persistence.

use crate::error::{ServerError, ServerResult};
use blocksync_protocol::{Block, BlockId, BlockType, PageId};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Storage used by the batch processor.
///
/// Deleted blocks are invisible to every read.
pub trait BlockStore: Send + Sync {
    /// Returns true if the page exists.
    fn page_exists(&self, page_id: PageId) -> ServerResult<bool>;

    /// Looks up a block type by name.
    fn block_type(&self, name: &str) -> ServerResult<Option<BlockType>>;

    /// Returns a live block.
    fn get_block(&self, id: BlockId) -> ServerResult<Option<Block>>;

    /// Returns the block a create produced, including a block deleted since.
    fn created_block(&self, key: &CreateKey) -> ServerResult<Option<Block>>;

    /// Persists a new block and returns the stored block.
    ///
    /// If `key` already produced a block, nothing is written and that block
    /// is returned instead.
    fn insert_block(&self, block: Block, key: CreateKey) -> ServerResult<Block>;

    /// Overwrites a live block in a single write.
    fn update_block(&self, block: Block) -> ServerResult<()>;

    /// Soft-deletes a block. Returns the block if it was live.
    fn delete_block(&self, id: BlockId, deleted_at: u64) -> ServerResult<Option<Block>>;

    /// Lists the live blocks of a page ordered by position.
    fn list_by_page(&self, page_id: PageId) -> ServerResult<Vec<Block>>;

    /// Lists the live children of a block ordered by position.
    fn list_by_parent(&self, parent_id: BlockId) -> ServerResult<Vec<Block>>;
}

/// Identifies a create across redeliveries of the same request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CreateKey {
    /// Page the block is created on.
    pub page_id: PageId,
    /// Client temporary id.
    pub temp_id: String,
    /// Client operation id.
    pub operation_id: String,
}

impl CreateKey {
    /// Creates a key.
    pub fn new(page_id: PageId, temp_id: impl Into<String>, operation_id: impl Into<String>) -> Self {
        Self {
            page_id,
            temp_id: temp_id.into(),
            operation_id: operation_id.into(),
        }
    }
}

/// The block types registered by default.
pub fn default_block_types() -> Vec<BlockType> {
    [
        ("text", "basic", "Text"),
        ("heading", "basic", "Heading"),
        ("todo", "basic", "To-do"),
        ("quote", "basic", "Quote"),
        ("divider", "basic", "Divider"),
        ("callout", "basic", "Callout"),
        ("code", "advanced", "Code"),
        ("image", "media", "Image"),
    ]
    .into_iter()
    .map(|(name, category, display)| BlockType::new(name, category, display))
    .collect()
}

#[derive(Debug, Clone)]
struct StoredBlock {
    block: Block,
    deleted_at: Option<u64>,
}

impl StoredBlock {
    fn live(&self) -> Option<&Block> {
        self.deleted_at.is_none().then_some(&self.block)
    }
}

#[derive(Default)]
struct StoreState {
    pages: HashSet<PageId>,
    types: HashMap<String, BlockType>,
    blocks: HashMap<BlockId, StoredBlock>,
    created: HashMap<CreateKey, BlockId>,
}

/// In-memory block store.
///
/// Counts writes so callers can check that an update lands as one write,
/// and can be switched unavailable to exercise store failures.
pub struct MemoryBlockStore {
    state: RwLock<StoreState>,
    writes: AtomicU64,
    unavailable: AtomicBool,
}

impl MemoryBlockStore {
    /// Creates an empty store with no pages and no block types.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            writes: AtomicU64::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Creates an empty store seeded with [`default_block_types`].
    pub fn with_default_types() -> Self {
        let store = Self::new();
        for block_type in default_block_types() {
            store.register_type(block_type);
        }
        store
    }

    /// Registers a page.
    pub fn add_page(&self, page_id: PageId) {
        self.state.write().pages.insert(page_id);
    }

    /// Registers a block type, replacing any type with the same name.
    pub fn register_type(&self, block_type: BlockType) {
        self.state
            .write()
            .types
            .insert(block_type.name.clone(), block_type);
    }

    /// Stores a block directly, registering its page.
    pub fn seed(&self, block: Block) {
        let mut state = self.state.write();
        state.pages.insert(block.page_id);
        state.blocks.insert(
            block.id,
            StoredBlock {
                block,
                deleted_at: None,
            },
        );
    }

    /// Makes every subsequent write fail until re-enabled.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns the number of successful writes.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Returns the number of live blocks.
    pub fn live_count(&self) -> usize {
        self.state
            .read()
            .blocks
            .values()
            .filter(|b| b.deleted_at.is_none())
            .count()
    }

    /// Returns true if the block exists and is soft-deleted.
    pub fn is_deleted(&self, id: BlockId) -> bool {
        self.state
            .read()
            .blocks
            .get(&id)
            .is_some_and(|b| b.deleted_at.is_some())
    }

    fn check_available(&self) -> ServerResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ServerError::Store("store unavailable".into()));
        }
        Ok(())
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }

    fn sorted(mut blocks: Vec<Block>) -> Vec<Block> {
        blocks.sort_by(|a, b| {
            a.position
                .cmp(&b.position)
                .then(a.created_at.cmp(&b.created_at))
        });
        blocks
    }
}

impl Default for MemoryBlockStore {
    fn default() -> Self {
        Self::with_default_types()
    }
}

impl BlockStore for MemoryBlockStore {
    fn page_exists(&self, page_id: PageId) -> ServerResult<bool> {
        Ok(self.state.read().pages.contains(&page_id))
    }

    fn block_type(&self, name: &str) -> ServerResult<Option<BlockType>> {
        Ok(self.state.read().types.get(name).cloned())
    }

    fn get_block(&self, id: BlockId) -> ServerResult<Option<Block>> {
        Ok(self
            .state
            .read()
            .blocks
            .get(&id)
            .and_then(StoredBlock::live)
            .cloned())
    }

    fn created_block(&self, key: &CreateKey) -> ServerResult<Option<Block>> {
        let state = self.state.read();
        Ok(state
            .created
            .get(key)
            .and_then(|id| state.blocks.get(id))
            .map(|stored| stored.block.clone()))
    }

    fn insert_block(&self, block: Block, key: CreateKey) -> ServerResult<Block> {
        self.check_available()?;
        let mut state = self.state.write();
        if let Some(existing) = state.created.get(&key).and_then(|id| state.blocks.get(id)) {
            return Ok(existing.block.clone());
        }
        if state.blocks.contains_key(&block.id) {
            return Err(ServerError::Store(format!("duplicate block id {}", block.id)));
        }
        state.created.insert(key, block.id);
        state.blocks.insert(
            block.id,
            StoredBlock {
                block: block.clone(),
                deleted_at: None,
            },
        );
        self.record_write();
        Ok(block)
    }

    fn update_block(&self, block: Block) -> ServerResult<()> {
        self.check_available()?;
        let mut state = self.state.write();
        match state.blocks.get_mut(&block.id) {
            Some(stored) if stored.deleted_at.is_none() => {
                stored.block = block;
                self.record_write();
                Ok(())
            }
            _ => Err(ServerError::Store(format!("block {} is not live", block.id))),
        }
    }

    fn delete_block(&self, id: BlockId, deleted_at: u64) -> ServerResult<Option<Block>> {
        self.check_available()?;
        let mut state = self.state.write();
        let Some(stored) = state.blocks.get_mut(&id) else {
            return Ok(None);
        };
        if stored.deleted_at.is_some() {
            return Ok(None);
        }
        stored.deleted_at = Some(deleted_at);
        self.record_write();
        Ok(Some(stored.block.clone()))
    }

    fn list_by_page(&self, page_id: PageId) -> ServerResult<Vec<Block>> {
        let blocks = self
            .state
            .read()
            .blocks
            .values()
            .filter_map(StoredBlock::live)
            .filter(|b| b.page_id == page_id)
            .cloned()
            .collect();
        Ok(Self::sorted(blocks))
    }

    fn list_by_parent(&self, parent_id: BlockId) -> ServerResult<Vec<Block>> {
        let blocks = self
            .state
            .read()
            .blocks
            .values()
            .filter_map(StoredBlock::live)
            .filter(|b| b.parent_block_id == Some(parent_id))
            .cloned()
            .collect();
        Ok(Self::sorted(blocks))
    }
}
