//! Main sync server.

use crate::cache::CacheInvalidator;
use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::handler::{HandlerContext, RequestHandler, ServerStats};
use crate::processor::BatchProcessor;
use crate::store::{BlockStore, MemoryBlockStore};
use blocksync_protocol::{BatchSyncRequest, BatchSyncResponse};
use std::sync::Arc;

/// The batch sync server.
///
/// Transport-agnostic: hosts expose `POST /batch-sync` and forward the path,
/// content type and body to [`SyncServer::handle_post`].
///
/// # Example
///
/// ```
/// use blocksync_server::{ServerConfig, SyncServer};
///
/// let server = SyncServer::new(ServerConfig::default());
/// assert_eq!(server.stats().batches, 0);
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl SyncServer {
    /// Creates a server over an empty in-memory store with the default block
    /// types.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryBlockStore::with_default_types()))
    }

    /// Creates a server over an existing store.
    pub fn with_store(config: ServerConfig, store: Arc<dyn BlockStore>) -> Self {
        Self::with_processor(config, BatchProcessor::new(store))
    }

    /// Creates a server over an existing store with cache invalidation.
    pub fn with_cache(
        config: ServerConfig,
        store: Arc<dyn BlockStore>,
        cache: Arc<dyn CacheInvalidator>,
    ) -> Self {
        Self::with_processor(config, BatchProcessor::new(store).with_cache(cache))
    }

    fn with_processor(config: ServerConfig, processor: BatchProcessor) -> Self {
        let context = Arc::new(HandlerContext::new(config, processor));
        let handler = RequestHandler::new(Arc::clone(&context));

        Self { handler, context }
    }

    /// Handles a decoded batch.
    pub fn handle_batch(&self, request: &BatchSyncRequest) -> Result<BatchSyncResponse, String> {
        self.handler
            .handle_batch(request)
            .map_err(|e| e.to_string())
    }

    /// Handles a raw POST request and returns the encoded response body.
    ///
    /// Hosts answer an error with [`ServerError::status_code`](crate::ServerError::status_code).
    pub fn handle_post(&self, path: &str, content_type: &str, body: &[u8]) -> ServerResult<Vec<u8>> {
        self.handler.handle_post(path, content_type, body)
    }

    /// Returns the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    /// Returns the block store.
    pub fn store(&self) -> &Arc<dyn BlockStore> {
        self.context.processor.store()
    }

    /// Returns request counters.
    pub fn stats(&self) -> ServerStats {
        self.context.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheKey, RecordingCache};
    use blocksync_protocol::{
        BatchCreate, BatchDelete, BatchUpdate, Metadata, OpId, PageId, WireFormat,
        BATCH_SYNC_PATH,
    };

    fn create(page: PageId, temp: &str) -> BatchCreate {
        BatchCreate {
            operation_id: OpId::new().to_string(),
            temp_id: temp.into(),
            page_id: page.to_string(),
            parent_block_id: None,
            block_type: "text".into(),
            content: "hello".into(),
            position: 0,
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn server_lifecycle() {
        let server = SyncServer::new(ServerConfig::default());
        assert_eq!(server.stats(), ServerStats::default());
        assert_eq!(server.config().max_batch_size, 500);
        assert!(server.store().block_type("heading").unwrap().is_some());
    }

    #[test]
    fn full_sync_flow() {
        let store = Arc::new(MemoryBlockStore::with_default_types());
        let page = PageId::new();
        store.add_page(page);
        let server = SyncServer::with_store(ServerConfig::default(), store.clone());

        // 1. Create
        let mut request = BatchSyncRequest::new();
        request.creates.push(create(page, "t-1"));
        let response = server.handle_batch(&request).unwrap();
        let block = response.creates[0].block.clone();

        // 2. Update with the durable id
        let mut request = BatchSyncRequest::new();
        request.updates.push(BatchUpdate {
            operation_id: OpId::new().to_string(),
            id: block.id.to_string(),
            block_type: None,
            content: Some("hello world".into()),
            position: None,
            metadata: None,
        });
        let response = server.handle_batch(&request).unwrap();
        assert_eq!(response.updates[0].block.content, "hello world");

        // 3. Delete
        let mut request = BatchSyncRequest::new();
        request.deletes.push(BatchDelete::new(OpId::new(), block.id));
        let response = server.handle_batch(&request).unwrap();
        assert!(response.is_clean());

        assert!(store.list_by_page(page).unwrap().is_empty());
        assert_eq!(server.stats().batches, 3);
    }

    #[test]
    fn post_errors_carry_a_client_status() {
        let server = SyncServer::new(ServerConfig::new().with_max_batch_size(1));
        let page = PageId::new();
        let mut request = BatchSyncRequest::new();
        request.creates.push(create(page, "a"));
        request.creates.push(create(page, "b"));
        let body = request.encode(WireFormat::Json).unwrap();

        let err = server
            .handle_post(BATCH_SYNC_PATH, "application/json", &body)
            .unwrap_err();
        assert!(err.to_string().contains("too many operations"));
        assert!(err.is_client_error());
        assert_eq!(err.status_code(), 413);

        let err = server
            .handle_post("/pull", "application/json", b"{}")
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn cache_sees_every_write() {
        let store = Arc::new(MemoryBlockStore::with_default_types());
        let cache = Arc::new(RecordingCache::new());
        let page = PageId::new();
        store.add_page(page);
        let server = SyncServer::with_cache(ServerConfig::default(), store, cache.clone());

        let mut request = BatchSyncRequest::new();
        request.creates.push(create(page, "t"));
        let response = server.handle_batch(&request).unwrap();

        assert_eq!(
            cache.keys(),
            vec![
                CacheKey::Block(response.creates[0].block.id),
                CacheKey::PageBlocks(page)
            ]
        );
    }
}
