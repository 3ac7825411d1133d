//! The sync session state machine.
//!
//! A session never performs I/O and never reads the clock: callers pass
//! `now` into every method. The tokio driver, the tests and the CLI
//! simulator all run the same state machine.

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::identity::IdentityMap;
use crate::operation::{Mutation, Operation};
use crate::queue::{EnqueueOutcome, OperationQueue};
use crate::reconcile::{reconcile, CycleReport};
use crate::remote::DocumentApplier;
use crate::schedule::{deadline_after, Scheduler, TaskHandle, TaskKind};
use crate::transport::BatchTransport;
use blocksync_protocol::{
    BatchCreate, BatchDelete, BatchSyncRequest, BatchSyncResponse, BatchUpdate, BlockId, OpId,
    RemoteChange, TargetId, TempId,
};
use std::fmt;
use std::time::Instant;
use tracing::{debug, info, warn};

/// The current state of a sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Nothing to send.
    Idle,
    /// Waiting for the debounce window to elapse.
    Debouncing,
    /// A batch is in flight.
    Flushing,
    /// Only delayed operations are queued.
    RetryWait,
}

/// Identifies one flush cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId(u64);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A batch ready to be sent.
#[derive(Debug, Clone)]
pub struct OutboundBatch {
    /// Cycle id, passed back to [`SyncSession::complete`].
    pub id: BatchId,
    /// Operations in the batch, in selection order.
    pub operations: Vec<OpId>,
    /// The request body.
    pub request: BatchSyncRequest,
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStats {
    /// Total number of flush cycles completed.
    pub cycles_completed: u64,
    /// Total number of operations sent, retries included.
    pub operations_sent: u64,
    /// Total number of operations acknowledged.
    pub operations_acknowledged: u64,
    /// Total number of retries scheduled.
    pub retries: u64,
    /// Total number of operations dropped.
    pub operations_dropped: u64,
    /// Total number of batches that failed as a whole.
    pub transport_failures: u64,
    /// Total number of remote changes applied.
    pub remote_changes_applied: u64,
    /// Completion time of the last batch that reached the server.
    pub last_sync_time: Option<Instant>,
    /// Last transport error message.
    pub last_error: Option<String>,
}

#[derive(Debug)]
struct InFlightBatch {
    id: BatchId,
    operations: Vec<OpId>,
}

/// Client-side sync state: queue, timers, identity map and the batch in
/// flight.
#[derive(Debug)]
pub struct SyncSession {
    config: SyncConfig,
    queue: OperationQueue,
    identity: IdentityMap,
    scheduler: Scheduler,
    debounce: Option<TaskHandle>,
    retry_wake: Option<TaskHandle>,
    flush_requested: bool,
    in_flight: Option<InFlightBatch>,
    next_batch: u64,
    stats: SyncStats,
}

impl SyncSession {
    /// Creates an idle session.
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            queue: OperationQueue::new(),
            identity: IdentityMap::new(),
            scheduler: Scheduler::new(),
            debounce: None,
            retry_wake: None,
            flush_requested: false,
            in_flight: None,
            next_batch: 1,
            stats: SyncStats::default(),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the statistics.
    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    /// Returns the operation queue.
    pub fn queue(&self) -> &OperationQueue {
        &self.queue
    }

    /// Returns the identity map.
    pub fn identity(&self) -> &IdentityMap {
        &self.identity
    }

    /// Drops the resolution for a temporary id once the host addresses the
    /// block by its durable id. Later edits to `temp` are rejected.
    pub fn forget(&mut self, temp: &TempId) -> Option<BlockId> {
        let durable = self.identity.forget(temp);
        if let Some(durable) = durable {
            debug!(temp_id = %temp, block_id = %durable, "forgot temporary id");
        }
        durable
    }

    /// Returns the batch in flight, if any.
    pub fn in_flight(&self) -> Option<BatchId> {
        self.in_flight.as_ref().map(|batch| batch.id)
    }

    /// Returns the current state.
    pub fn state(&self) -> SyncState {
        if self.in_flight.is_some() {
            SyncState::Flushing
        } else if self.debounce.is_some() {
            SyncState::Debouncing
        } else if self.retry_wake.is_some() {
            SyncState::RetryWait
        } else {
            SyncState::Idle
        }
    }

    /// Adds a local edit to the queue and restarts the debounce window.
    ///
    /// A full batch of ready operations requests an immediate flush.
    pub fn enqueue(&mut self, mut op: Operation, now: Instant) -> SyncResult<EnqueueOutcome> {
        if !matches!(op.mutation, Mutation::Create(_)) {
            op.target = self.identity.resolve(op.target);
        }
        let op_id = op.id;
        let kind = op.kind();
        let outcome = self.queue.enqueue(op)?;
        debug!(op_id = %op_id, kind = %kind, outcome = ?outcome, "enqueued operation");

        self.restart_debounce(now);
        if self.queue.ready_count(now) >= self.config.batch_limit() {
            self.flush_requested = true;
        }
        Ok(outcome)
    }

    /// Removes a pending operation before it is sent.
    pub fn dequeue(&mut self, id: OpId) -> SyncResult<Vec<Operation>> {
        let removed = self.queue.dequeue(id)?;
        debug!(op_id = %id, removed = removed.len(), "dequeued operation");
        Ok(removed)
    }

    /// Requests a flush without waiting for the debounce window.
    ///
    /// Returns false, and does nothing, while a batch is in flight.
    pub fn flush(&mut self) -> bool {
        if self.in_flight.is_some() {
            debug!("flush ignored, batch in flight");
            return false;
        }
        self.flush_requested = true;
        true
    }

    /// Returns the next time [`SyncSession::poll_batch`] should be called.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    /// Fires due timers and, if a flush is due and nothing is in flight,
    /// selects the next batch.
    pub fn poll_batch(&mut self, now: Instant) -> Option<OutboundBatch> {
        for handle in self.scheduler.take_due(now) {
            match handle.kind() {
                TaskKind::Debounce if self.debounce == Some(handle) => self.debounce = None,
                TaskKind::RetryWake if self.retry_wake == Some(handle) => self.retry_wake = None,
                _ => {}
            }
            self.flush_requested = true;
        }

        if self.in_flight.is_some() || !self.flush_requested {
            return None;
        }
        self.flush_requested = false;

        let operations = self.queue.take_batch(now, self.config.batch_limit());
        if operations.is_empty() {
            self.schedule_retry_wake(now);
            return None;
        }
        if let Some(handle) = self.debounce.take() {
            self.scheduler.cancel(handle);
        }

        let request = self.build_request(&operations);
        let id = BatchId(self.next_batch);
        self.next_batch += 1;
        self.stats.operations_sent += operations.len() as u64;
        info!(
            batch = %id,
            creates = request.creates.len(),
            updates = request.updates.len(),
            deletes = request.deletes.len(),
            "flushing batch"
        );

        self.in_flight = Some(InFlightBatch {
            id,
            operations: operations.clone(),
        });
        Some(OutboundBatch {
            id,
            operations,
            request,
        })
    }

    /// Reconciles the result of the batch in flight.
    ///
    /// Results for any other batch are ignored.
    pub fn complete(
        &mut self,
        batch_id: BatchId,
        result: SyncResult<BatchSyncResponse>,
        now: Instant,
    ) -> CycleReport {
        let batch = match self.in_flight.take() {
            Some(batch) if batch.id == batch_id => batch,
            other => {
                self.in_flight = other;
                warn!(batch = %batch_id, "ignoring result for a batch not in flight");
                return CycleReport::default();
            }
        };

        let report = reconcile(
            &mut self.queue,
            &mut self.identity,
            &self.config.retry,
            &batch.operations,
            result,
            now,
        );

        self.stats.cycles_completed += 1;
        self.stats.operations_acknowledged += report.acknowledged() as u64;
        self.stats.retries += report.retrying.len() as u64;
        self.stats.operations_dropped += report.terminal.len() as u64;
        match &report.transport_error {
            Some(err) => {
                self.stats.transport_failures += 1;
                self.stats.last_error = Some(err.to_string());
            }
            None => self.stats.last_sync_time = Some(now),
        }

        if self.queue.ready_count(now) > 0 && self.debounce.is_none() {
            self.flush_requested = true;
        }
        self.schedule_retry_wake(now);
        report
    }

    /// Flushes synchronously over `transport`.
    ///
    /// Returns `None` if a batch is already in flight or nothing is ready.
    pub fn flush_now<T: BatchTransport + ?Sized>(
        &mut self,
        transport: &T,
        now: Instant,
    ) -> Option<CycleReport> {
        if !self.flush() {
            return None;
        }
        let batch = self.poll_batch(now)?;
        let result = transport.send(&batch.request);
        Some(self.complete(batch.id, result, now))
    }

    /// Applies a server-pushed change to the document without queueing
    /// anything, and points rollback snapshots of queued edits at the new
    /// server state.
    pub fn apply_remote<A: DocumentApplier + ?Sized>(
        &mut self,
        applier: &A,
        change: RemoteChange,
    ) -> SyncResult<()> {
        applier.apply_remote(&change)?;
        let rebased = self.queue.rebase_snapshots(&change);
        self.stats.remote_changes_applied += 1;
        debug!(block_id = %change.block_id(), rebased, "applied remote change");
        Ok(())
    }

    /// Stops the session and returns every operation not yet acknowledged,
    /// in enqueue order.
    pub fn close(mut self) -> Vec<Operation> {
        let remaining = self.queue.drain();
        if !remaining.is_empty() {
            warn!(remaining = remaining.len(), "closing session with unsent operations");
        }
        remaining
    }

    fn restart_debounce(&mut self, now: Instant) {
        if let Some(handle) = self.debounce.take() {
            self.scheduler.cancel(handle);
        }
        self.debounce = Some(
            self.scheduler
                .schedule(TaskKind::Debounce, deadline_after(now, self.config.debounce)),
        );
    }

    fn schedule_retry_wake(&mut self, now: Instant) {
        if let Some(handle) = self.retry_wake.take() {
            self.scheduler.cancel(handle);
        }
        if let Some(at) = self.queue.next_retry_at(now) {
            self.retry_wake = Some(self.scheduler.schedule(TaskKind::RetryWake, at));
        }
    }

    fn build_request(&self, operations: &[OpId]) -> BatchSyncRequest {
        let mut request = BatchSyncRequest::new();
        for op in operations.iter().filter_map(|id| self.queue.get(*id)) {
            match (&op.mutation, &op.target) {
                (Mutation::Create(payload), TargetId::Temp(temp)) => {
                    request
                        .creates
                        .push(BatchCreate::from_payload(op.id, temp, payload));
                }
                (Mutation::Update(payload), TargetId::Durable(id)) => {
                    request
                        .updates
                        .push(BatchUpdate::from_payload(op.id, *id, payload));
                }
                (Mutation::Delete, TargetId::Durable(id)) => {
                    request.deletes.push(BatchDelete::new(op.id, *id));
                }
                _ => warn!(op_id = %op.id, target = %op.target, "operation cannot be encoded"),
            }
        }
        request
    }
}
