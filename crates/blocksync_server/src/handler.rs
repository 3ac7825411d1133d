//! Request handling for the batch sync endpoint.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::processor::BatchProcessor;
use blocksync_protocol::{BatchSyncRequest, BatchSyncResponse, WireFormat, BATCH_SYNC_PATH};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};

/// Counters kept across requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Batches processed.
    pub batches: u64,
    /// Operations received in processed batches.
    pub operations: u64,
    /// Operations reported in `errors`.
    pub failed_operations: u64,
    /// Requests rejected as a whole.
    pub rejected_requests: u64,
}

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Batch processor (shared across all handlers).
    pub processor: BatchProcessor,
    stats: RwLock<ServerStats>,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, processor: BatchProcessor) -> Self {
        Self {
            config,
            processor,
            stats: RwLock::new(ServerStats::default()),
        }
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> ServerStats {
        self.stats.read().clone()
    }

    fn record_batch(&self, operations: usize, response: &BatchSyncResponse) {
        let mut stats = self.stats.write();
        stats.batches += 1;
        stats.operations += operations as u64;
        stats.failed_operations += response.errors.len() as u64;
    }

    fn record_rejection(&self) {
        self.stats.write().rejected_requests += 1;
    }
}

/// Handler for batch sync requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Handles a decoded batch.
    pub fn handle_batch(&self, request: &BatchSyncRequest) -> ServerResult<BatchSyncResponse> {
        let size = request.len();
        let max = self.context.config.max_batch_size;
        if size > max {
            self.context.record_rejection();
            warn!(size, max, "rejecting oversized batch");
            return Err(ServerError::BatchTooLarge { size, max });
        }

        let response = self.context.processor.process(request);
        self.context.record_batch(size, &response);
        Ok(response)
    }

    /// Handles a raw POST, answering in the request's encoding.
    ///
    /// An empty content type falls back to the configured format.
    pub fn handle_post(&self, path: &str, content_type: &str, body: &[u8]) -> ServerResult<Vec<u8>> {
        let result = self.dispatch(path, content_type, body);
        if let Err(e) = &result {
            if !matches!(e, ServerError::BatchTooLarge { .. }) {
                self.context.record_rejection();
            }
            debug!(path, error = %e, "request failed");
        }
        result
    }

    fn dispatch(&self, path: &str, content_type: &str, body: &[u8]) -> ServerResult<Vec<u8>> {
        if path.trim_end_matches('/') != BATCH_SYNC_PATH {
            return Err(ServerError::UnknownPath(path.to_string()));
        }
        let format = if content_type.trim().is_empty() {
            self.context.config.wire_format
        } else {
            WireFormat::from_content_type(content_type)?
        };
        let request = BatchSyncRequest::decode(body, format)?;
        let response = self.handle_batch(&request)?;
        Ok(response.encode(format)?)
    }
}
