//! Temporary to durable id resolution.

use blocksync_protocol::{BlockId, TargetId, TempId};
use std::collections::{HashMap, VecDeque};

/// Number of settled resolutions kept by default.
pub const DEFAULT_SETTLED_CAPACITY: usize = 1024;

/// Maps temporary ids to the durable ids the server assigned.
///
/// An entry is *live* while some queued operation still refers to the
/// temporary id. After each reconciliation [`IdentityMap::settle`] moves the
/// other entries to a bounded history, where they keep resolving edits the
/// host addresses to the temporary id until it calls
/// [`IdentityMap::forget`] or newer resolutions evict them.
#[derive(Debug, Clone)]
pub struct IdentityMap {
    live: HashMap<TempId, BlockId>,
    settled: HashMap<TempId, BlockId>,
    settled_order: VecDeque<TempId>,
    capacity: usize,
}

impl IdentityMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SETTLED_CAPACITY)
    }

    /// Creates an empty map keeping at most `capacity` settled entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            live: HashMap::new(),
            settled: HashMap::new(),
            settled_order: VecDeque::new(),
            capacity,
        }
    }

    /// Records a resolution. Returns the previous durable id, if any.
    pub fn insert(&mut self, temp: TempId, durable: BlockId) -> Option<BlockId> {
        let settled = self.forget_settled(&temp);
        self.live.insert(temp, durable).or(settled)
    }

    /// Returns the durable id for a temporary id, live or settled.
    pub fn get(&self, temp: &TempId) -> Option<BlockId> {
        self.live
            .get(temp)
            .or_else(|| self.settled.get(temp))
            .copied()
    }

    /// Rewrites a target to its durable id when one is known.
    pub fn resolve(&self, target: TargetId) -> TargetId {
        if let Some(durable) = target.as_temp().and_then(|temp| self.get(temp)) {
            return TargetId::Durable(durable);
        }
        target
    }

    /// Moves the live entries for which `referenced` returns false to the
    /// settled history. Returns the number of entries moved.
    pub fn settle(&mut self, mut referenced: impl FnMut(&TempId) -> bool) -> usize {
        let done: Vec<TempId> = self
            .live
            .keys()
            .filter(|temp| !referenced(temp))
            .cloned()
            .collect();
        for temp in &done {
            if let Some(durable) = self.live.remove(temp) {
                self.settled.insert(temp.clone(), durable);
                self.settled_order.push_back(temp.clone());
            }
        }
        while self.settled.len() > self.capacity {
            let Some(oldest) = self.settled_order.pop_front() else {
                break;
            };
            self.settled.remove(&oldest);
        }
        done.len()
    }

    /// Drops a resolution the host no longer addresses by temporary id.
    pub fn forget(&mut self, temp: &TempId) -> Option<BlockId> {
        self.live.remove(temp).or_else(|| self.forget_settled(temp))
    }

    fn forget_settled(&mut self, temp: &TempId) -> Option<BlockId> {
        let durable = self.settled.remove(temp)?;
        self.settled_order.retain(|t| t != temp);
        Some(durable)
    }

    /// Returns the number of live entries.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Returns true if no queued operation waits on a resolution.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Returns the number of settled entries.
    pub fn settled_len(&self) -> usize {
        self.settled.len()
    }
}

impl Default for IdentityMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp(id: &str) -> TempId {
        TempId::new(id).unwrap()
    }

    #[test]
    fn settled_entries_keep_resolving() {
        let mut map = IdentityMap::new();
        let d1 = BlockId::new();
        map.insert(temp("t-1"), d1);
        map.insert(temp("t-2"), BlockId::new());

        assert_eq!(map.resolve(TargetId::Temp(temp("t-1"))), TargetId::Durable(d1));
        assert_eq!(
            map.resolve(TargetId::Temp(temp("t-3"))),
            TargetId::Temp(temp("t-3"))
        );

        assert_eq!(map.settle(|t| t == &temp("t-2")), 1);
        assert_eq!(map.len(), 1);
        assert_eq!(map.settled_len(), 1);
        assert_eq!(map.get(&temp("t-1")), Some(d1));
        assert_eq!(map.resolve(TargetId::Temp(temp("t-1"))), TargetId::Durable(d1));
    }

    #[test]
    fn forget_drops_live_and_settled_entries() {
        let mut map = IdentityMap::new();
        let d1 = BlockId::new();
        let d2 = BlockId::new();
        map.insert(temp("t-1"), d1);
        map.insert(temp("t-2"), d2);
        map.settle(|t| t == &temp("t-2"));

        assert_eq!(map.forget(&temp("t-1")), Some(d1));
        assert_eq!(map.forget(&temp("t-2")), Some(d2));
        assert_eq!(map.forget(&temp("t-2")), None);
        assert!(map.is_empty());
        assert_eq!(map.settled_len(), 0);
    }

    #[test]
    fn settled_history_is_bounded() {
        let mut map = IdentityMap::with_capacity(2);
        for i in 0..3 {
            map.insert(temp(&format!("t-{i}")), BlockId::new());
            map.settle(|_| false);
        }

        assert_eq!(map.settled_len(), 2);
        assert_eq!(map.get(&temp("t-0")), None);
        assert!(map.get(&temp("t-1")).is_some());
        assert!(map.get(&temp("t-2")).is_some());
    }
}
