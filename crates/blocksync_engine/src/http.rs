//! HTTP transport implementation.
//!
//! The actual HTTP client is abstracted via a trait so any HTTP library (or
//! an in-process server, see [`LoopbackClient`]) can carry the batches.

use crate::error::{SyncError, SyncResult};
use crate::transport::BatchTransport;
use blocksync_protocol::{BatchSyncRequest, BatchSyncResponse, WireFormat, BATCH_SYNC_PATH};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, warn};

/// A POST that produced no usable response body.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HttpError {
    /// Response status, or `None` if no response arrived.
    pub status: Option<u16>,
    /// Error message.
    pub message: String,
}

impl HttpError {
    /// An error response with the given status.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    /// A request that never got a response.
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    /// Returns true if the server rejected the request itself (4xx).
    /// Resending the same request cannot succeed.
    pub fn is_client_error(&self) -> bool {
        matches!(self.status, Some(400..=499))
    }
}

/// HTTP client abstraction.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the response body.
    fn post(&self, url: &str, content_type: &str, body: Vec<u8>) -> Result<Vec<u8>, HttpError>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

/// HTTP-based batch transport.
pub struct HttpTransport<C: HttpClient> {
    base_url: String,
    client: C,
    format: WireFormat,
    connected: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport using JSON bodies.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            format: WireFormat::Json,
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Sets the body encoding.
    pub fn with_format(mut self, format: WireFormat) -> Self {
        self.format = format;
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the body encoding.
    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn post_encoded(&self, path: &str, request: &BatchSyncRequest) -> SyncResult<BatchSyncResponse> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }

        let body = request
            .encode(self.format)
            .map_err(|e| SyncError::Protocol(format!("failed to encode request: {e}")))?;

        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, bytes = body.len(), operations = request.len(), "posting batch");
        let response_body = self
            .client
            .post(&url, self.format.content_type(), body)
            .map_err(|e| {
                *self.last_error.write() = Some(e.message.clone());
                match e.status {
                    Some(status) if e.is_client_error() => {
                        warn!(status, error = %e, "batch rejected by server");
                        SyncError::transport_fatal(format!("rejected with status {status}: {e}"))
                    }
                    _ => SyncError::transport_retryable(e.message),
                }
            })?;

        *self.last_error.write() = None;

        BatchSyncResponse::decode(&response_body, self.format)
            .map_err(|e| SyncError::Protocol(format!("failed to decode response: {e}")))
    }
}

impl<C: HttpClient> BatchTransport for HttpTransport<C> {
    fn send(&self, request: &BatchSyncRequest) -> SyncResult<BatchSyncResponse> {
        self.post_encoded(BATCH_SYNC_PATH, request)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer {
    /// Handles a POST request and returns the response body.
    fn handle_post(&self, path: &str, content_type: &str, body: &[u8]) -> Result<Vec<u8>, HttpError>;
}

/// A loopback HTTP client that routes requests directly to a sync server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }

    /// Returns the server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, content_type: &str, body: Vec<u8>) -> Result<Vec<u8>, HttpError> {
        let path = url
            .find(BATCH_SYNC_PATH)
            .map(|i| &url[i..])
            .unwrap_or(url);

        self.server.handle_post(path, content_type, &body)
    }

    fn is_healthy(&self) -> bool {
        true
    }
}
