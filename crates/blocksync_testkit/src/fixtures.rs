//! Test fixtures and server helpers.
//!
//! Provides a seeded in-memory server reachable through the engine's
//! loopback HTTP transport, and builders for blocks and operations.

use blocksync_engine::{HttpError, HttpTransport, LoopbackClient, LoopbackServer, Operation};
use blocksync_protocol::{
    Block, BlockId, CreatePayload, Metadata, PageId, TargetId, TempId, UpdatePayload, WireFormat,
};
use blocksync_server::{
    BlockStore, CacheKey, MemoryBlockStore, RecordingCache, ServerConfig, SyncServer,
};
use std::sync::Arc;

/// Routes loopback requests to an in-process server.
#[derive(Clone)]
pub struct ServerLink(pub Arc<SyncServer>);

impl LoopbackServer for ServerLink {
    fn handle_post(&self, path: &str, content_type: &str, body: &[u8]) -> Result<Vec<u8>, HttpError> {
        self.0
            .handle_post(path, content_type, body)
            .map_err(|e| HttpError::status(e.status_code(), e.to_string()))
    }
}

/// HTTP transport that reaches a [`TestServer`] without a network.
pub type LoopbackTransport = HttpTransport<LoopbackClient<ServerLink>>;

/// A batch sync server over an in-memory store with one page.
pub struct TestServer {
    /// The server.
    pub server: Arc<SyncServer>,
    /// The block store behind it.
    pub store: Arc<MemoryBlockStore>,
    /// Keys invalidated by the server.
    pub cache: Arc<RecordingCache>,
    /// The page blocks are created on.
    pub page: PageId,
}

impl TestServer {
    /// Creates a server with the default configuration.
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// Creates a server with a custom configuration.
    pub fn with_config(config: ServerConfig) -> Self {
        let store = Arc::new(MemoryBlockStore::with_default_types());
        let cache = Arc::new(RecordingCache::new());
        let page = PageId::new();
        store.add_page(page);
        let server = Arc::new(SyncServer::with_cache(
            config,
            store.clone(),
            cache.clone(),
        ));
        Self {
            server,
            store,
            cache,
            page,
        }
    }

    /// Returns a transport to this server.
    pub fn transport(&self, format: WireFormat) -> LoopbackTransport {
        HttpTransport::new(
            "http://blocksync.test",
            LoopbackClient::new(ServerLink(Arc::clone(&self.server))),
        )
        .with_format(format)
    }

    /// Stores a text block on the page directly.
    pub fn seed_block(&self, content: &str) -> Block {
        let block = text_block(self.page, content);
        self.store.seed(block.clone());
        block
    }

    /// Returns the live blocks of the page ordered by position.
    pub fn blocks(&self) -> Vec<Block> {
        self.store
            .list_by_page(self.page)
            .expect("Failed to list page blocks")
    }

    /// Returns a live block.
    pub fn block(&self, id: BlockId) -> Option<Block> {
        self.store.get_block(id).expect("Failed to read block")
    }

    /// Returns true if the server invalidated the block's cache entry.
    pub fn invalidated(&self, id: BlockId) -> bool {
        self.cache.contains(&CacheKey::Block(id))
    }
}

impl Default for TestServer {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a persisted text block.
pub fn text_block(page_id: PageId, content: &str) -> Block {
    Block {
        id: BlockId::new(),
        page_id,
        parent_block_id: None,
        block_type: "text".into(),
        content: content.into(),
        position: 0,
        metadata: Metadata::new(),
        created_at: 1,
        updated_at: 1,
    }
}

/// Returns the temporary id used for a slot's `generation`-th create.
pub fn slot_temp_id(slot: usize, generation: usize) -> TempId {
    TempId::new(format!("slot-{slot}-{generation}")).expect("Invalid temp id")
}

/// Builds a create of a text block.
pub fn create_text(temp: TempId, page_id: PageId, content: &str) -> Operation {
    Operation::create(temp, CreatePayload::new(page_id, "text").with_content(content))
}

/// Builds a content update.
pub fn edit_content(target: impl Into<TargetId>, content: &str) -> Operation {
    Operation::update(target, UpdatePayload::new().content(content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use blocksync_engine::BatchTransport;
    use blocksync_protocol::BatchSyncRequest;

    #[test]
    fn seeded_blocks_are_listed() {
        let server = TestServer::new();
        let block = server.seed_block("hello");

        assert_eq!(server.blocks(), vec![block.clone()]);
        assert_eq!(server.block(block.id), Some(block));
    }

    #[test]
    fn transport_reaches_server() {
        let server = TestServer::new();
        let transport = server.transport(WireFormat::Cbor);

        let response = transport.send(&BatchSyncRequest::new()).unwrap();
        assert!(response.is_clean());
        assert_eq!(server.server.stats().batches, 1);
    }

    #[test]
    fn slot_temp_ids_are_distinct() {
        assert_ne!(slot_temp_id(0, 0), slot_temp_id(0, 1));
        assert_ne!(slot_temp_id(0, 1), slot_temp_id(1, 0));
    }
}
