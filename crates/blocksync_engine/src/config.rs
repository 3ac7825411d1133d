//! Configuration for the sync engine.

use blocksync_protocol::WireFormat;
use serde::Deserialize;
use std::time::Duration;

/// Configuration for a sync session.
///
/// Durations are read from millisecond fields (`debounce_ms`, ...) when the
/// configuration is deserialized.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Base URL of the sync server.
    pub base_url: String,
    /// Quiet period after the last enqueue before a flush.
    #[serde(rename = "debounce_ms", with = "duration_ms")]
    pub debounce: Duration,
    /// Maximum number of operations per batch.
    pub max_batch_size: usize,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Encoding of request and response bodies.
    pub wire_format: WireFormat,
    /// Request timeout.
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,
}

impl SyncConfig {
    /// Creates a configuration for the given server.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            debounce: Duration::from_millis(500),
            max_batch_size: 50,
            retry: RetryConfig::default(),
            wire_format: WireFormat::Json,
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the debounce window.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Sets the maximum batch size. Zero is treated as one.
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.max(1);
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the wire format.
    pub fn with_wire_format(mut self, format: WireFormat) -> Self {
        self.wire_format = format;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the batch size limit, never zero.
    pub(crate) fn batch_limit(&self) -> usize {
        self.max_batch_size.max(1)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("http://localhost:8080")
    }
}

/// Configuration for retry behavior.
///
/// An operation that has already failed `retry_count` times waits
/// `min(base_delay * 2^retry_count, max_delay)` before its next attempt,
/// and is dropped once `max_retries` attempts have failed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of failed attempts before an operation is dropped.
    pub max_retries: u32,
    /// Delay before the first retry.
    #[serde(rename = "base_delay_ms", with = "duration_ms")]
    pub base_delay: Duration,
    /// Upper bound on the delay.
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
}

impl RetryConfig {
    /// Creates a retry configuration with default delays.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }

    /// Creates a configuration that drops an operation on its first failure.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Returns true if an operation that failed `retry_count` times before
    /// this failure gets another attempt.
    pub fn allows_retry(&self, retry_count: u32) -> bool {
        retry_count.saturating_add(1) < self.max_retries
    }

    /// Calculates the backoff for an operation that failed `retry_count`
    /// times before this failure.
    pub fn delay_for_attempt(&self, retry_count: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_count).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new("https://sync.example.com")
            .with_debounce(Duration::from_millis(250))
            .with_max_batch_size(10)
            .with_wire_format(WireFormat::Cbor)
            .with_timeout(Duration::from_secs(5));

        assert_eq!(config.base_url, "https://sync.example.com");
        assert_eq!(config.debounce, Duration::from_millis(250));
        assert_eq!(config.max_batch_size, 10);
        assert_eq!(config.wire_format, WireFormat::Cbor);
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[test]
    fn zero_batch_size_is_clamped() {
        let config = SyncConfig::default().with_max_batch_size(0);
        assert_eq!(config.batch_limit(), 1);
    }

    #[test]
    fn backoff_doubles_until_cap() {
        let retry = RetryConfig::new(10)
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(1000));

        assert_eq!(retry.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(retry.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(retry.delay_for_attempt(4), Duration::from_millis(1000));
        assert_eq!(retry.delay_for_attempt(40), Duration::from_millis(1000));
    }

    #[test]
    fn retry_budget() {
        let retry = RetryConfig::new(3);
        assert!(retry.allows_retry(0));
        assert!(retry.allows_retry(1));
        assert!(!retry.allows_retry(2));

        assert!(!RetryConfig::no_retry().allows_retry(0));
    }

    #[test]
    fn deserialize_with_defaults() {
        let config: SyncConfig = serde_json::from_str(
            r#"{"base_url": "http://sync", "debounce_ms": 50, "retry": {"max_retries": 2}}"#,
        )
        .unwrap();

        assert_eq!(config.base_url, "http://sync");
        assert_eq!(config.debounce, Duration::from_millis(50));
        assert_eq!(config.max_batch_size, 50);
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.retry.base_delay, Duration::from_secs(1));
        assert_eq!(config.wire_format, WireFormat::Json);
    }
}
