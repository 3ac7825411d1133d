//! The operation queue.
//!
//! Holds at most one pending operation per block. A new operation for a
//! block that already has a pending one is coalesced into it; operations in
//! flight are never touched. Updates and deletes addressed to a temporary id
//! stay pending until the create is acknowledged and they are rewritten to
//! the durable id.

use crate::config::RetryConfig;
use crate::error::{SyncError, SyncResult};
use crate::operation::{Mutation, OpState, Operation};
use crate::schedule::deadline_after;
use blocksync_protocol::{BlockId, OpId, RemoteChange, TargetId, TempId};
use std::collections::{HashMap, HashSet};
use std::time::Instant;

/// Result of an enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Added as a new pending operation.
    Queued(OpId),
    /// Folded into the pending operation with this id.
    Coalesced(OpId),
    /// A delete replaced the pending operations it lists.
    Superseded {
        /// The queued delete.
        queued: OpId,
        /// Pending operations that were removed.
        removed: Vec<OpId>,
    },
    /// A delete of a block whose create was never sent: nothing will be
    /// sent for the block.
    Cancelled {
        /// Pending operations that were removed.
        removed: Vec<OpId>,
    },
    /// The block is already being deleted; the operation was dropped.
    Discarded,
}

/// Result of folding a later operation into an earlier one for the same
/// block. The earlier operation's identity and retry state survive unless
/// a delete replaces it.
enum Merged {
    Folded(Operation),
    Ignored(Operation),
    Replaced(Operation),
    Cancelled,
}

fn coalesce(mut earlier: Operation, mut later: Operation) -> Merged {
    earlier.priority = earlier.priority.max(later.priority);
    if earlier.snapshot.is_none() {
        earlier.snapshot = later.snapshot.take();
    }

    match later.mutation {
        Mutation::Update(update) => {
            match &mut earlier.mutation {
                Mutation::Create(create) => create.merge(update),
                Mutation::Update(existing) => existing.overlay(update),
                Mutation::Delete => {}
            }
            if matches!(earlier.mutation, Mutation::Delete) {
                Merged::Ignored(earlier)
            } else {
                Merged::Folded(earlier)
            }
        }
        Mutation::Delete => match earlier.mutation {
            Mutation::Create(_) => Merged::Cancelled,
            Mutation::Update(_) => {
                later.mutation = Mutation::Delete;
                later.priority = earlier.priority;
                later.snapshot = earlier.snapshot;
                Merged::Replaced(later)
            }
            Mutation::Delete => Merged::Ignored(earlier),
        },
        // Creates are unique per temporary id.
        Mutation::Create(_) => Merged::Ignored(earlier),
    }
}

/// What happened to a failed operation returned to the queue.
#[derive(Debug)]
pub(crate) enum Requeued {
    /// Pending again, possibly merged with edits made while in flight.
    Pending(OpId),
    /// A delete enqueued while in flight replaced it.
    Superseded(OpId),
    /// It was a create and the block was deleted while in flight.
    Cancelled(Vec<OpId>),
}

/// An operation removed from the queue for good, with the operations that
/// could no longer be sent without it.
#[derive(Debug)]
pub(crate) struct Dropped {
    pub(crate) op: Operation,
    pub(crate) dependents: Vec<Operation>,
}

/// Outcome of a transient failure.
#[derive(Debug)]
pub(crate) enum RetryDecision {
    /// Scheduled for another attempt.
    Retry { at: Instant, requeued: Requeued },
    /// Retry budget exhausted.
    Exhausted(Dropped),
}

/// Pending and in-flight operations, keyed by id.
#[derive(Debug, Default)]
pub struct OperationQueue {
    ops: HashMap<OpId, Operation>,
    pending: HashMap<TargetId, OpId>,
    in_flight: HashMap<TargetId, OpId>,
    creates: HashSet<TempId>,
    next_seq: u64,
}

impl OperationQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an operation, coalescing it with the block's pending operation.
    ///
    /// Fails if a create is enqueued twice for one temporary id, or if an
    /// update or delete targets a temporary id with no queued create.
    pub fn enqueue(&mut self, mut op: Operation) -> SyncResult<EnqueueOutcome> {
        match (&op.target, &op.mutation) {
            (TargetId::Temp(temp), Mutation::Create(_)) if self.creates.contains(temp) => {
                return Err(SyncError::DuplicateCreate(temp.clone()));
            }
            (TargetId::Temp(temp), Mutation::Update(_) | Mutation::Delete)
                if !self.creates.contains(temp) =>
            {
                return Err(SyncError::UnknownTempId(temp.clone()));
            }
            _ => {}
        }

        if matches!(op.mutation, Mutation::Update(_)) && self.is_deleting(&op.target) {
            return Ok(EnqueueOutcome::Discarded);
        }

        op.state = OpState::Pending;
        op.retry_count = 0;
        op.next_attempt_at = None;
        op.last_error = None;
        op.enqueued_at = self.next_seq;
        self.next_seq += 1;

        let Some(existing) = self.pending_id(&op.target).and_then(|id| self.remove_entry(id))
        else {
            let id = op.id;
            self.insert(op);
            return Ok(EnqueueOutcome::Queued(id));
        };

        let existing_id = existing.id;
        let target = existing.target.clone();
        Ok(match coalesce(existing, op) {
            Merged::Folded(merged) => {
                let id = merged.id;
                self.insert(merged);
                EnqueueOutcome::Coalesced(id)
            }
            Merged::Ignored(kept) => {
                self.insert(kept);
                EnqueueOutcome::Discarded
            }
            Merged::Replaced(delete) => {
                let queued = delete.id;
                self.insert(delete);
                EnqueueOutcome::Superseded {
                    queued,
                    removed: vec![existing_id],
                }
            }
            Merged::Cancelled => {
                if let TargetId::Temp(temp) = &target {
                    self.creates.remove(temp);
                }
                EnqueueOutcome::Cancelled {
                    removed: vec![existing_id],
                }
            }
        })
    }

    /// Removes a pending operation.
    ///
    /// Removing a create also removes every pending operation addressed to
    /// its temporary id. The requested operation is first in the result.
    pub fn dequeue(&mut self, id: OpId) -> SyncResult<Vec<Operation>> {
        match self.ops.get(&id) {
            None => return Err(SyncError::UnknownOperation(id)),
            Some(op) if op.state == OpState::InFlight => return Err(SyncError::InFlight(id)),
            Some(_) => {}
        }

        let Some(op) = self.remove_entry(id) else {
            return Err(SyncError::UnknownOperation(id));
        };
        let dependents = self.release_create(&op);
        let mut removed = vec![op];
        removed.extend(dependents);
        Ok(removed)
    }

    /// Marks up to `limit` ready operations as in flight and returns their
    /// ids, highest priority first, then in enqueue order.
    pub fn take_batch(&mut self, now: Instant, limit: usize) -> Vec<OpId> {
        let mut ready: Vec<&Operation> =
            self.ops.values().filter(|op| op.is_ready(now)).collect();
        ready.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.enqueued_at.cmp(&b.enqueued_at))
        });
        let ids: Vec<OpId> = ready.into_iter().take(limit).map(|op| op.id).collect();

        for id in &ids {
            if let Some(op) = self.ops.get_mut(id) {
                op.state = OpState::InFlight;
                self.pending.remove(&op.target);
                self.in_flight.insert(op.target.clone(), op.id);
            }
        }
        ids
    }

    /// Returns the number of operations that could be sent at `now`.
    pub fn ready_count(&self, now: Instant) -> usize {
        self.ops.values().filter(|op| op.is_ready(now)).count()
    }

    /// Returns the earliest future retry time among pending operations.
    pub fn next_retry_at(&self, now: Instant) -> Option<Instant> {
        self.ops
            .values()
            .filter(|op| op.state == OpState::Pending)
            .filter_map(|op| op.next_attempt_at)
            .filter(|at| *at > now)
            .min()
    }

    /// Returns an operation by id.
    pub fn get(&self, id: OpId) -> Option<&Operation> {
        self.ops.get(&id)
    }

    /// Returns the pending operation for a block.
    pub fn pending_for(&self, target: &TargetId) -> Option<&Operation> {
        self.pending.get(target).and_then(|id| self.ops.get(id))
    }

    /// Returns all operations in enqueue order.
    pub fn operations(&self) -> Vec<&Operation> {
        let mut ops: Vec<&Operation> = self.ops.values().collect();
        ops.sort_by_key(|op| op.enqueued_at);
        ops
    }

    /// Returns the number of queued operations, in flight included.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Returns the number of pending operations.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Returns the number of in-flight operations.
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Returns true if a queued operation still needs this temporary id.
    pub fn references_temp(&self, temp: &TempId) -> bool {
        self.creates.contains(temp) || self.pending.contains_key(&TargetId::Temp(temp.clone()))
    }

    /// Removes everything, in enqueue order.
    pub fn drain(&mut self) -> Vec<Operation> {
        let mut ops: Vec<Operation> = self.ops.drain().map(|(_, op)| op).collect();
        ops.sort_by_key(|op| op.enqueued_at);
        self.pending.clear();
        self.in_flight.clear();
        self.creates.clear();
        ops
    }

    /// Removes an acknowledged in-flight operation.
    pub(crate) fn acknowledge(&mut self, id: OpId) -> Option<Operation> {
        if self.ops.get(&id)?.state != OpState::InFlight {
            return None;
        }
        let op = self.remove_entry(id)?;
        if let TargetId::Temp(temp) = &op.target {
            self.creates.remove(temp);
        }
        Some(op)
    }

    /// Readdresses the pending operation of a now durable block.
    pub(crate) fn rewrite_target(&mut self, temp: &TempId, durable: BlockId) -> Option<OpId> {
        let id = self.pending_id(&TargetId::Temp(temp.clone()))?;
        let mut op = self.remove_entry(id)?;
        op.target = TargetId::Durable(durable);
        match self.absorb(op) {
            Requeued::Pending(id) | Requeued::Superseded(id) => Some(id),
            Requeued::Cancelled(_) => None,
        }
    }

    /// Returns a transiently failed in-flight operation to the queue with
    /// backoff, or drops it once its retry budget is spent.
    pub(crate) fn fail_transient(
        &mut self,
        id: OpId,
        now: Instant,
        retry: &RetryConfig,
        error: String,
    ) -> Option<RetryDecision> {
        let allowed = retry.allows_retry(self.in_flight_op(id)?.retry_count);
        if !allowed {
            return self.drop_in_flight(id, error).map(RetryDecision::Exhausted);
        }

        let mut op = self.remove_entry(id)?;
        let at = deadline_after(now, retry.delay_for_attempt(op.retry_count));
        op.retry_count += 1;
        op.next_attempt_at = Some(at);
        op.last_error = Some(error);
        op.state = OpState::Pending;
        Some(RetryDecision::Retry {
            at,
            requeued: self.absorb(op),
        })
    }

    /// Removes an in-flight operation that will never succeed.
    pub(crate) fn drop_in_flight(&mut self, id: OpId, error: String) -> Option<Dropped> {
        self.in_flight_op(id)?;
        let mut op = self.remove_entry(id)?;
        op.last_error = Some(error);
        let dependents = self.release_create(&op);
        Some(Dropped { op, dependents })
    }

    /// Points rollback snapshots at the latest server state of a block.
    pub(crate) fn rebase_snapshots(&mut self, change: &RemoteChange) -> usize {
        let target = TargetId::Durable(change.block_id());
        let mut rebased = 0;
        for op in self.ops.values_mut().filter(|op| op.target == target) {
            if op.snapshot.is_none() {
                continue;
            }
            op.snapshot = match change {
                RemoteChange::Upsert(block) => Some(block.clone()),
                RemoteChange::Delete { .. } => None,
            };
            rebased += 1;
        }
        rebased
    }

    fn in_flight_op(&self, id: OpId) -> Option<&Operation> {
        self.ops.get(&id).filter(|op| op.state == OpState::InFlight)
    }

    fn pending_id(&self, target: &TargetId) -> Option<OpId> {
        self.pending.get(target).copied()
    }

    fn is_deleting(&self, target: &TargetId) -> bool {
        [self.pending.get(target), self.in_flight.get(target)]
            .into_iter()
            .flatten()
            .filter_map(|id| self.ops.get(id))
            .any(|op| matches!(op.mutation, Mutation::Delete))
    }

    fn insert(&mut self, op: Operation) {
        match op.state {
            OpState::Pending => self.pending.insert(op.target.clone(), op.id),
            OpState::InFlight => self.in_flight.insert(op.target.clone(), op.id),
        };
        if let (TargetId::Temp(temp), Mutation::Create(_)) = (&op.target, &op.mutation) {
            self.creates.insert(temp.clone());
        }
        self.ops.insert(op.id, op);
    }

    fn remove_entry(&mut self, id: OpId) -> Option<Operation> {
        let op = self.ops.remove(&id)?;
        let index = match op.state {
            OpState::Pending => &mut self.pending,
            OpState::InFlight => &mut self.in_flight,
        };
        if index.get(&op.target) == Some(&id) {
            index.remove(&op.target);
        }
        Some(op)
    }

    /// Forgets a removed create and takes out the operations waiting on it.
    fn release_create(&mut self, op: &Operation) -> Vec<Operation> {
        let (TargetId::Temp(temp), Mutation::Create(_)) = (&op.target, &op.mutation) else {
            return Vec::new();
        };
        self.creates.remove(temp);
        self.pending_id(&op.target)
            .and_then(|id| self.remove_entry(id))
            .into_iter()
            .collect()
    }

    /// Puts an operation back as pending. Any pending operation for the same
    /// block was enqueued later and is folded in.
    fn absorb(&mut self, op: Operation) -> Requeued {
        let Some(later) = self.pending_id(&op.target).and_then(|id| self.remove_entry(id)) else {
            let id = op.id;
            self.insert(op);
            return Requeued::Pending(id);
        };

        let first_seq = op.enqueued_at.min(later.enqueued_at);
        let ids = vec![op.id, later.id];
        let target = op.target.clone();
        match coalesce(op, later) {
            Merged::Folded(mut merged) | Merged::Ignored(mut merged) => {
                merged.enqueued_at = first_seq;
                let id = merged.id;
                self.insert(merged);
                Requeued::Pending(id)
            }
            Merged::Replaced(delete) => {
                let id = delete.id;
                self.insert(delete);
                Requeued::Superseded(id)
            }
            Merged::Cancelled => {
                if let TargetId::Temp(temp) = &target {
                    self.creates.remove(temp);
                }
                Requeued::Cancelled(ids)
            }
        }
    }
}
