//! Batch processing with per-operation partial success.

use crate::cache::{CacheInvalidator, CacheKey, NoopCache};
use crate::error::OperationError;
use crate::store::{BlockStore, CreateKey};
use blocksync_protocol::{
    BatchCreate, BatchDelete, BatchError, BatchSyncRequest, BatchSyncResponse, BatchUpdate, Block,
    BlockId, BlockType, CreatedBlock, OperationKind, PageId, UpdatedBlock,
};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

type OpResult<T> = Result<T, OperationError>;

/// Applies batch sync requests to a block store.
///
/// Creates run first, then updates, then deletes. A failed operation is
/// reported in the response and never aborts the rest of the batch.
pub struct BatchProcessor {
    store: Arc<dyn BlockStore>,
    cache: Arc<dyn CacheInvalidator>,
}

impl BatchProcessor {
    /// Creates a processor without a cache.
    pub fn new(store: Arc<dyn BlockStore>) -> Self {
        Self {
            store,
            cache: Arc::new(NoopCache),
        }
    }

    /// Sets the cache invalidator.
    pub fn with_cache(mut self, cache: Arc<dyn CacheInvalidator>) -> Self {
        self.cache = cache;
        self
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<dyn BlockStore> {
        &self.store
    }

    /// Processes a batch.
    pub fn process(&self, request: &BatchSyncRequest) -> BatchSyncResponse {
        let now = now_millis();
        let mut response = BatchSyncResponse::new();

        for item in &request.creates {
            match self.create(item, now) {
                Ok(block) => response.creates.push(CreatedBlock {
                    temp_id: item.temp_id.clone(),
                    block,
                }),
                Err(e) => push_error(&mut response, &item.operation_id, OperationKind::Create, e),
            }
        }

        for item in &request.updates {
            match self.update(item, now) {
                Ok(block) => response.updates.push(UpdatedBlock {
                    id: item.id.clone(),
                    block,
                }),
                Err(e) => push_error(&mut response, &item.operation_id, OperationKind::Update, e),
            }
        }

        for item in &request.deletes {
            match self.delete(item, now) {
                Ok(()) => response.deletes.push(item.id.clone()),
                Err(e) => push_error(&mut response, &item.operation_id, OperationKind::Delete, e),
            }
        }

        info!(
            creates = response.creates.len(),
            updates = response.updates.len(),
            deletes = response.deletes.len(),
            errors = response.errors.len(),
            "batch_sync processed"
        );
        response
    }

    fn create(&self, item: &BatchCreate, now: u64) -> OpResult<Block> {
        if item.temp_id.trim().is_empty() {
            return Err(OperationError::Validation("missing temp ID".into()));
        }
        let page_id = PageId::parse(&item.page_id)
            .map_err(|e| OperationError::Validation(format!("invalid page ID: {e}")))?;
        if !self.store.page_exists(page_id)? {
            return Err(OperationError::Validation(format!("page not found: {page_id}")));
        }
        let key = CreateKey::new(page_id, item.temp_id.as_str(), item.operation_id.as_str());
        if let Some(existing) = self.store.created_block(&key)? {
            return self.redeliver(item, existing, now);
        }
        let block_type = self.resolve_type(&item.block_type)?;
        let parent_block_id = match &item.parent_block_id {
            Some(raw) => Some(self.resolve_parent(raw, page_id)?),
            None => None,
        };

        let block = Block {
            id: BlockId::new(),
            page_id,
            parent_block_id,
            block_type: block_type.name,
            content: item.content.clone(),
            position: item.position,
            metadata: item.metadata.clone(),
            created_at: now,
            updated_at: now,
        };
        let stored = self.store.insert_block(block, key)?;
        self.invalidate(&stored);
        Ok(stored)
    }

    /// A create seen before, typically resent after its response was lost.
    /// Echoes the block it produced, applying any fields the client changed
    /// since. A block deleted in the meantime stays deleted.
    fn redeliver(&self, item: &BatchCreate, existing: Block, now: u64) -> OpResult<Block> {
        let Some(mut block) = self.store.get_block(existing.id)? else {
            debug!(temp_id = %item.temp_id, block_id = %existing.id, "create redelivered for deleted block");
            return Ok(existing);
        };
        let before = block.clone();
        if item.block_type != block.block_type {
            block.block_type = self.resolve_type(&item.block_type)?.name;
        }
        block.content = item.content.clone();
        block.position = item.position;
        block.metadata = item.metadata.clone();
        if block == before {
            debug!(temp_id = %item.temp_id, block_id = %block.id, "create redelivered");
            return Ok(block);
        }

        block.updated_at = now.max(block.updated_at);
        self.store.update_block(block.clone())?;
        self.invalidate(&block);
        debug!(temp_id = %item.temp_id, block_id = %block.id, "create redelivered with changes");
        Ok(block)
    }

    fn update(&self, item: &BatchUpdate, now: u64) -> OpResult<Block> {
        let id = BlockId::parse(&item.id)
            .map_err(|e| OperationError::Validation(format!("invalid block ID: {e}")))?;
        let mut block = self
            .store
            .get_block(id)?
            .ok_or_else(|| OperationError::NotFound(format!("block not found: {id}")))?;

        if let Some(name) = &item.block_type {
            if *name != block.block_type {
                block.block_type = self.resolve_type(name)?.name;
            }
        }
        if let Some(content) = &item.content {
            block.content = content.clone();
        }
        if let Some(position) = item.position {
            block.position = position;
        }
        if let Some(metadata) = &item.metadata {
            block.metadata = metadata.clone();
        }
        block.updated_at = now.max(block.updated_at);

        self.store.update_block(block.clone())?;
        self.invalidate(&block);
        Ok(block)
    }

    fn delete(&self, item: &BatchDelete, now: u64) -> OpResult<()> {
        let id = BlockId::parse(&item.id)
            .map_err(|e| OperationError::Validation(format!("invalid block ID: {e}")))?;
        match self.store.delete_block(id, now)? {
            Some(block) => self.invalidate(&block),
            None => debug!(block_id = %id, "delete of missing block treated as success"),
        }
        Ok(())
    }

    fn resolve_type(&self, name: &str) -> OpResult<BlockType> {
        self.store
            .block_type(name)?
            .ok_or_else(|| OperationError::Validation(format!("invalid block type: {name}")))
    }

    fn resolve_parent(&self, raw: &str, page_id: PageId) -> OpResult<BlockId> {
        let parent_id = BlockId::parse(raw)
            .map_err(|e| OperationError::Validation(format!("invalid parent block ID: {e}")))?;
        match self.store.get_block(parent_id)? {
            Some(parent) if parent.page_id == page_id => Ok(parent_id),
            Some(_) => Err(OperationError::Validation(format!(
                "parent block {parent_id} is not on page {page_id}"
            ))),
            None => Err(OperationError::Validation(format!(
                "parent block not found: {parent_id}"
            ))),
        }
    }

    fn invalidate(&self, block: &Block) {
        self.cache.invalidate(&CacheKey::Block(block.id));
        self.cache.invalidate(&CacheKey::PageBlocks(block.page_id));
        if let Some(parent) = block.parent_block_id {
            self.cache.invalidate(&CacheKey::ParentBlocks(parent));
        }
    }
}

fn push_error(
    response: &mut BatchSyncResponse,
    operation_id: &str,
    kind: OperationKind,
    error: OperationError,
) {
    debug!(operation_id, %kind, code = ?error.code(), error = %error, "operation failed");
    response
        .errors
        .push(BatchError::new(operation_id, kind, error.code(), error.to_string()));
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RecordingCache;
    use crate::store::MemoryBlockStore;
    use blocksync_protocol::{ErrorCode, Metadata, OpId};

    struct Fixture {
        store: Arc<MemoryBlockStore>,
        cache: Arc<RecordingCache>,
        processor: BatchProcessor,
        page: PageId,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryBlockStore::with_default_types());
        let cache = Arc::new(RecordingCache::new());
        let page = PageId::new();
        store.add_page(page);
        let processor = BatchProcessor::new(store.clone()).with_cache(cache.clone());
        Fixture {
            store,
            cache,
            processor,
            page,
        }
    }

    fn create(page: PageId, temp: &str, block_type: &str) -> BatchCreate {
        BatchCreate {
            operation_id: OpId::new().to_string(),
            temp_id: temp.into(),
            page_id: page.to_string(),
            parent_block_id: None,
            block_type: block_type.into(),
            content: format!("content of {temp}"),
            position: 0,
            metadata: Metadata::new(),
        }
    }

    fn update(id: &str) -> BatchUpdate {
        BatchUpdate {
            operation_id: OpId::new().to_string(),
            id: id.into(),
            block_type: None,
            content: None,
            position: None,
            metadata: None,
        }
    }

    fn delete(id: &str) -> BatchDelete {
        BatchDelete {
            operation_id: OpId::new().to_string(),
            id: id.into(),
        }
    }

    fn seed(f: &Fixture) -> Block {
        let mut request = BatchSyncRequest::new();
        request.creates.push(create(f.page, "seed", "text"));
        let response = f.processor.process(&request);
        f.cache.take();
        response.creates[0].block.clone()
    }

    #[test]
    fn create_assigns_durable_id() {
        let f = fixture();
        let mut request = BatchSyncRequest::new();
        let mut item = create(f.page, "t-1", "todo");
        item.metadata = Metadata::new().with("checked", true);
        item.position = 4;
        request.creates.push(item);

        let response = f.processor.process(&request);
        assert!(response.is_clean());
        assert_eq!(response.creates.len(), 1);

        let created = &response.creates[0];
        assert_eq!(created.temp_id, "t-1");
        assert_eq!(created.block.block_type, "todo");
        assert_eq!(created.block.position, 4);
        assert_eq!(
            created.block.metadata.get("checked"),
            Some(&serde_json::json!(true))
        );
        assert_eq!(f.store.get_block(created.block.id).unwrap(), Some(created.block.clone()));
        assert!(f.cache.contains(&CacheKey::Block(created.block.id)));
        assert!(f.cache.contains(&CacheKey::PageBlocks(f.page)));
    }

    #[test]
    fn same_create_applied_twice_yields_one_block() {
        let f = fixture();
        let mut request = BatchSyncRequest::new();
        request.creates.push(create(f.page, "t-1", "text"));

        let first = f.processor.process(&request);
        let writes = f.store.write_count();
        f.cache.take();
        let second = f.processor.process(&request);

        assert!(second.is_clean());
        assert_eq!(second.creates[0].temp_id, "t-1");
        assert_eq!(second.creates[0].block, first.creates[0].block);
        assert_eq!(f.store.live_count(), 1);
        assert_eq!(f.store.write_count(), writes);
        assert!(f.cache.keys().is_empty());
    }

    #[test]
    fn redelivered_create_carries_later_edits() {
        let f = fixture();
        let mut item = create(f.page, "t-1", "text");
        let mut request = BatchSyncRequest::new();
        request.creates.push(item.clone());
        let first = f.processor.process(&request).creates[0].block.clone();

        item.content = "edited while in flight".into();
        item.block_type = "heading".into();
        let mut request = BatchSyncRequest::new();
        request.creates.push(item);
        let second = f.processor.process(&request);

        let block = &second.creates[0].block;
        assert_eq!(block.id, first.id);
        assert_eq!(block.content, "edited while in flight");
        assert_eq!(block.block_type, "heading");
        assert_eq!(block.created_at, first.created_at);
        assert_eq!(f.store.live_count(), 1);
        assert_eq!(f.store.get_block(first.id).unwrap().as_ref(), Some(block));
        assert!(f.cache.contains(&CacheKey::Block(first.id)));
    }

    #[test]
    fn creates_from_different_operations_stay_distinct() {
        let f = fixture();
        let mut request = BatchSyncRequest::new();
        request.creates.push(create(f.page, "t-1", "text"));
        request.creates.push(create(f.page, "t-1", "text"));

        let response = f.processor.process(&request);
        assert_eq!(response.creates.len(), 2);
        assert_ne!(response.creates[0].block.id, response.creates[1].block.id);
        assert_eq!(f.store.live_count(), 2);
    }

    #[test]
    fn redelivered_create_does_not_revive_deleted_block() {
        let f = fixture();
        let mut request = BatchSyncRequest::new();
        request.creates.push(create(f.page, "t-1", "text"));
        let block = f.processor.process(&request).creates[0].block.clone();

        let mut removal = BatchSyncRequest::new();
        removal.deletes.push(delete(&block.id.to_string()));
        assert!(f.processor.process(&removal).is_clean());

        let response = f.processor.process(&request);
        assert!(response.is_clean());
        assert_eq!(response.creates[0].block.id, block.id);
        assert!(f.store.is_deleted(block.id));
        assert_eq!(f.store.live_count(), 0);
    }

    #[test]
    fn partial_success_reports_each_failure() {
        let f = fixture();
        let mut request = BatchSyncRequest::new();
        request.creates.push(create(f.page, "ok", "text"));
        let bad_type = create(f.page, "bad-type", "hologram");
        let bad_page = create(PageId::new(), "bad-page", "text");
        let mut malformed = create(f.page, "malformed", "text");
        malformed.page_id = "not-a-uuid".into();
        let ids = [
            bad_type.operation_id.clone(),
            bad_page.operation_id.clone(),
            malformed.operation_id.clone(),
        ];
        request.creates.extend([bad_type, bad_page, malformed]);

        let response = f.processor.process(&request);
        assert_eq!(response.creates.len(), 1);
        assert_eq!(response.creates[0].temp_id, "ok");
        assert_eq!(response.errors.len(), 3);
        for id in &ids {
            let err = response.error_for(id).unwrap();
            assert_eq!(err.kind, OperationKind::Create);
            assert_eq!(err.code, ErrorCode::Validation);
        }
        assert!(response.error_for(&ids[0]).unwrap().error.contains("invalid block type"));
        assert!(response.error_for(&ids[2]).unwrap().error.contains("invalid page ID"));
    }

    #[test]
    fn nested_create_validates_parent() {
        let f = fixture();
        let parent = seed(&f);

        let mut child = create(f.page, "child", "text");
        child.parent_block_id = Some(parent.id.to_string());
        let other_page = PageId::new();
        f.store.add_page(other_page);
        let mut stray = create(other_page, "stray", "text");
        stray.parent_block_id = Some(parent.id.to_string());
        let mut orphan = create(f.page, "orphan", "text");
        orphan.parent_block_id = Some(BlockId::new().to_string());

        let mut request = BatchSyncRequest::new();
        request.creates.extend([child, stray, orphan]);
        let response = f.processor.process(&request);

        assert_eq!(response.creates.len(), 1);
        assert_eq!(response.creates[0].block.parent_block_id, Some(parent.id));
        assert_eq!(response.errors.len(), 2);
        assert!(f.cache.contains(&CacheKey::ParentBlocks(parent.id)));
        assert_eq!(f.store.list_by_parent(parent.id).unwrap().len(), 1);
    }

    #[test]
    fn update_is_last_write_wins_in_one_write() {
        let f = fixture();
        let block = seed(&f);
        let writes = f.store.write_count();

        let mut item = update(&block.id.to_string());
        item.content = Some("replaced".into());
        item.block_type = Some("heading".into());
        item.metadata = Some(Metadata::new().with("level", 2));
        let mut request = BatchSyncRequest::new();
        request.updates.push(item);

        let response = f.processor.process(&request);
        assert!(response.is_clean());
        let updated = &response.updates[0].block;
        assert_eq!(updated.content, "replaced");
        assert_eq!(updated.block_type, "heading");
        assert_eq!(updated.position, block.position);
        assert_eq!(updated.created_at, block.created_at);
        assert!(updated.updated_at >= block.updated_at);
        assert_eq!(f.store.write_count(), writes + 1);
        assert_eq!(
            f.cache.keys(),
            vec![CacheKey::Block(block.id), CacheKey::PageBlocks(f.page)]
        );
    }

    #[test]
    fn update_failures_are_classified() {
        let f = fixture();
        let block = seed(&f);

        let missing = update(&BlockId::new().to_string());
        let malformed = update("42");
        let mut bad_type = update(&block.id.to_string());
        bad_type.block_type = Some("hologram".into());
        bad_type.content = Some("never applied".into());
        let ids = [
            missing.operation_id.clone(),
            malformed.operation_id.clone(),
            bad_type.operation_id.clone(),
        ];
        let mut request = BatchSyncRequest::new();
        request.updates.extend([missing, malformed, bad_type]);

        let response = f.processor.process(&request);
        assert!(response.updates.is_empty());
        assert_eq!(response.error_for(&ids[0]).unwrap().code, ErrorCode::NotFound);
        assert_eq!(response.error_for(&ids[1]).unwrap().code, ErrorCode::Validation);
        assert_eq!(response.error_for(&ids[2]).unwrap().code, ErrorCode::Validation);
        assert_eq!(
            f.store.get_block(block.id).unwrap().unwrap().content,
            block.content
        );
    }

    #[test]
    fn delete_is_idempotent() {
        let f = fixture();
        let block = seed(&f);
        let id = block.id.to_string();

        for _ in 0..2 {
            let mut request = BatchSyncRequest::new();
            request.deletes.push(delete(&id));
            let response = f.processor.process(&request);
            assert!(response.is_clean());
            assert_eq!(response.deletes, vec![id.clone()]);
        }
        let mut request = BatchSyncRequest::new();
        request.deletes.push(delete(&BlockId::new().to_string()));
        assert!(f.processor.process(&request).is_clean());

        assert!(f.store.is_deleted(block.id));
        // Only the first delete touched a live block.
        assert_eq!(f.cache.keys().len(), 2);
    }

    #[test]
    fn malformed_delete_is_a_validation_error() {
        let f = fixture();
        let mut request = BatchSyncRequest::new();
        let item = delete("not-a-block");
        let op = item.operation_id.clone();
        request.deletes.push(item);

        let response = f.processor.process(&request);
        assert!(response.deletes.is_empty());
        let err = response.error_for(&op).unwrap();
        assert_eq!(err.kind, OperationKind::Delete);
        assert_eq!(err.code, ErrorCode::Validation);
    }

    #[test]
    fn creates_run_before_deletes() {
        let f = fixture();
        let block = seed(&f);

        // An update and delete of the same block in one batch: the update
        // applies first, then the delete.
        let mut request = BatchSyncRequest::new();
        let mut item = update(&block.id.to_string());
        item.content = Some("last words".into());
        request.updates.push(item);
        request.deletes.push(delete(&block.id.to_string()));
        request.creates.push(create(f.page, "fresh", "quote"));

        let response = f.processor.process(&request);
        assert!(response.is_clean());
        assert_eq!(response.updates[0].block.content, "last words");
        assert_eq!(response.deletes.len(), 1);
        let live = f.store.list_by_page(f.page).unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].block_type, "quote");
    }

    #[test]
    fn store_failures_are_internal() {
        let f = fixture();
        let block = seed(&f);
        f.store.set_unavailable(true);

        let mut request = BatchSyncRequest::new();
        request.creates.push(create(f.page, "t", "text"));
        let mut item = update(&block.id.to_string());
        item.content = Some("x".into());
        request.updates.push(item);
        request.deletes.push(delete(&block.id.to_string()));

        let response = f.processor.process(&request);
        assert_eq!(response.errors.len(), 3);
        assert!(response
            .errors
            .iter()
            .all(|e| e.code == ErrorCode::Internal && e.code.is_retryable()));
        assert!(f.cache.keys().is_empty());
    }
}
