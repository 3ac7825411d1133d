//! Transport layer abstraction for batch sync.

use crate::error::{SyncError, SyncResult};
use blocksync_protocol::{
    BatchSyncRequest, BatchSyncResponse, Block, BlockId, CreatedBlock, PageId, UpdatedBlock,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Carries batches to the sync server.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, in-process loopback, mock for testing).
/// `send` blocks; the driver calls it off the event loop.
pub trait BatchTransport: Send + Sync {
    /// Sends one batch and waits for its result.
    fn send(&self, request: &BatchSyncRequest) -> SyncResult<BatchSyncResponse>;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;

    /// Closes the transport connection.
    fn close(&self) -> SyncResult<()>;
}

impl<T: BatchTransport + ?Sized> BatchTransport for Arc<T> {
    fn send(&self, request: &BatchSyncRequest) -> SyncResult<BatchSyncResponse> {
        (**self).send(request)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn close(&self) -> SyncResult<()> {
        (**self).close()
    }
}

/// A mock transport for testing.
///
/// Scripted results are returned in order. Once the script is exhausted the
/// mock either acknowledges every operation (see [`MockTransport::auto_ack`])
/// or fails with a protocol error.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    auto_ack: AtomicBool,
    script: Mutex<VecDeque<SyncResult<BatchSyncResponse>>>,
    requests: Mutex<Vec<BatchSyncRequest>>,
}

impl MockTransport {
    /// Creates a new mock transport with an empty script.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            auto_ack: AtomicBool::new(false),
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Creates a mock that acknowledges everything it receives.
    pub fn auto_ack() -> Self {
        let transport = Self::new();
        transport.auto_ack.store(true, Ordering::SeqCst);
        transport
    }

    /// Queues a response.
    pub fn push_response(&self, response: BatchSyncResponse) {
        self.script.lock().push_back(Ok(response));
    }

    /// Queues a failure.
    pub fn push_failure(&self, error: SyncError) {
        self.script.lock().push_back(Err(error));
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Returns every request received so far.
    pub fn requests(&self) -> Vec<BatchSyncRequest> {
        self.requests.lock().clone()
    }

    /// Returns the number of requests received so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    fn acknowledge_all(request: &BatchSyncRequest) -> BatchSyncResponse {
        let mut response = BatchSyncResponse::new();
        for create in &request.creates {
            let page_id = PageId::parse(&create.page_id).unwrap_or_default();
            response.creates.push(CreatedBlock {
                temp_id: create.temp_id.clone(),
                block: Block {
                    id: BlockId::new(),
                    page_id,
                    parent_block_id: create
                        .parent_block_id
                        .as_deref()
                        .and_then(|id| BlockId::parse(id).ok()),
                    block_type: create.block_type.clone(),
                    content: create.content.clone(),
                    position: create.position,
                    metadata: create.metadata.clone(),
                    created_at: 0,
                    updated_at: 0,
                },
            });
        }
        for update in &request.updates {
            let Ok(id) = BlockId::parse(&update.id) else {
                continue;
            };
            response.updates.push(UpdatedBlock {
                id: update.id.clone(),
                block: Block {
                    id,
                    page_id: PageId::default(),
                    parent_block_id: None,
                    block_type: update.block_type.clone().unwrap_or_else(|| "text".into()),
                    content: update.content.clone().unwrap_or_default(),
                    position: update.position.unwrap_or_default(),
                    metadata: update.metadata.clone().unwrap_or_default(),
                    created_at: 0,
                    updated_at: 0,
                },
            });
        }
        response
            .deletes
            .extend(request.deletes.iter().map(|delete| delete.id.clone()));
        response
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchTransport for MockTransport {
    fn send(&self, request: &BatchSyncRequest) -> SyncResult<BatchSyncResponse> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        self.requests.lock().push(request.clone());

        if let Some(result) = self.script.lock().pop_front() {
            return result;
        }
        if self.auto_ack.load(Ordering::SeqCst) {
            return Ok(Self::acknowledge_all(request));
        }
        Err(SyncError::Protocol("No mock response set".into()))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> SyncResult<()> {
        self.set_connected(false);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blocksync_protocol::{BatchCreate, BatchDelete, CreatePayload, OpId, TempId};

    #[test]
    fn mock_transport_scripted() {
        let transport = MockTransport::new();
        assert!(transport.is_connected());

        transport.push_failure(SyncError::Timeout);
        let request = BatchSyncRequest::new();
        assert_eq!(transport.send(&request), Err(SyncError::Timeout));
        assert!(matches!(
            transport.send(&request),
            Err(SyncError::Protocol(_))
        ));
        assert_eq!(transport.request_count(), 2);
    }

    #[test]
    fn mock_transport_disconnected() {
        let transport = MockTransport::auto_ack();
        transport.close().unwrap();
        assert_eq!(
            transport.send(&BatchSyncRequest::new()),
            Err(SyncError::NotConnected)
        );
        assert_eq!(transport.request_count(), 0);
    }

    #[test]
    fn auto_ack_echoes_every_operation() {
        let transport = MockTransport::auto_ack();
        let temp = TempId::new("t-1").unwrap();
        let mut request = BatchSyncRequest::new();
        request.creates.push(BatchCreate::from_payload(
            OpId::new(),
            &temp,
            &CreatePayload::new(PageId::new(), "text").with_content("a"),
        ));
        request.deletes.push(BatchDelete::new(OpId::new(), BlockId::new()));

        let response = transport.send(&request).unwrap();
        assert_eq!(response.creates[0].temp_id, "t-1");
        assert_eq!(response.creates[0].block.content, "a");
        assert_eq!(response.deletes.len(), 1);
        assert_eq!(transport.requests()[0].creates[0].temp_id, temp.as_str());
    }
}
