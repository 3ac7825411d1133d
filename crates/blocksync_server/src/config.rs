//! Server configuration.

use blocksync_protocol::WireFormat;
use serde::Deserialize;
use std::time::Duration;

/// Configuration for the sync server.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Maximum number of operations accepted in one batch.
    pub max_batch_size: usize,
    /// Encoding used when the request does not name one.
    pub wire_format: WireFormat,
    /// Request timeout advertised to hosts embedding the server.
    #[serde(rename = "request_timeout_ms", deserialize_with = "duration_ms")]
    pub request_timeout: Duration,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new() -> Self {
        Self {
            max_batch_size: 500,
            wire_format: WireFormat::Json,
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Sets the maximum batch size.
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Sets the default wire format.
    pub fn with_wire_format(mut self, format: WireFormat) -> Self {
        self.wire_format = format;
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn duration_ms<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}
