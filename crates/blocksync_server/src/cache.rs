//! Cache invalidation hooks.

use blocksync_protocol::{BlockId, PageId};
use parking_lot::Mutex;
use std::fmt;

/// A cached read invalidated by a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// A single block.
    Block(BlockId),
    /// The block listing of a page.
    PageBlocks(PageId),
    /// The children listing of a block.
    ParentBlocks(BlockId),
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Block(id) => write!(f, "block:id:{id}"),
            CacheKey::PageBlocks(id) => write!(f, "blocks:page:{id}"),
            CacheKey::ParentBlocks(id) => write!(f, "blocks:parent:{id}"),
        }
    }
}

/// Receives the keys made stale by a successful write.
///
/// Invalidation is best effort and cannot fail an operation.
pub trait CacheInvalidator: Send + Sync {
    /// Drops a cached entry.
    fn invalidate(&self, key: &CacheKey);
}

/// Invalidator for deployments without a cache.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

impl CacheInvalidator for NoopCache {
    fn invalidate(&self, _key: &CacheKey) {}
}

/// Invalidator that remembers every key, in order.
#[derive(Debug, Default)]
pub struct RecordingCache {
    keys: Mutex<Vec<CacheKey>>,
}

impl RecordingCache {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the recorded keys.
    pub fn keys(&self) -> Vec<CacheKey> {
        self.keys.lock().clone()
    }

    /// Returns true if the key was invalidated.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.keys.lock().contains(key)
    }

    /// Returns and clears the recorded keys.
    pub fn take(&self) -> Vec<CacheKey> {
        std::mem::take(&mut *self.keys.lock())
    }
}

impl CacheInvalidator for RecordingCache {
    fn invalidate(&self, key: &CacheKey) {
        self.keys.lock().push(*key);
    }
}

impl<C: CacheInvalidator + ?Sized> CacheInvalidator for std::sync::Arc<C> {
    fn invalidate(&self, key: &CacheKey) {
        (**self).invalidate(key)
    }
}
