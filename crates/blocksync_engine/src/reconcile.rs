//! Applying a batch result back onto the queue.
//!
//! Only operations still in flight for the batch are touched, so applying
//! the same result twice changes nothing the second time.

use crate::config::RetryConfig;
use crate::error::{FailureClass, SyncError, SyncResult};
use crate::identity::IdentityMap;
use crate::operation::{OpState, Operation, Rollback};
use crate::queue::{Dropped, OperationQueue, Requeued, RetryDecision};
use blocksync_protocol::{
    Block, BlockId, BatchSyncResponse, OpId, OperationKind, TargetId, TempId,
};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info, warn};

/// A temporary id the server resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct IdResolution {
    /// The acknowledged create.
    pub op_id: OpId,
    /// The client temporary id.
    pub temp_id: TempId,
    /// The persisted block.
    pub block: Block,
}

impl IdResolution {
    /// Returns the durable id assigned by the server.
    pub fn durable_id(&self) -> BlockId {
        self.block.id
    }
}

/// An operation that failed this cycle and will be retried.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationFailure {
    /// Failed operation.
    pub op_id: OpId,
    /// Its kind.
    pub kind: OperationKind,
    /// Its target.
    pub target: TargetId,
    /// Why it failed.
    pub class: FailureClass,
    /// Error message.
    pub error: String,
    /// Failed attempts so far.
    pub retry_count: u32,
    /// When it becomes eligible again.
    pub next_attempt_at: Instant,
}

/// An operation removed from the queue without being applied.
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalFailure {
    /// Dropped operation.
    pub op_id: OpId,
    /// Its kind.
    pub kind: OperationKind,
    /// Its target.
    pub target: TargetId,
    /// Why it was dropped.
    pub class: FailureClass,
    /// Last error message.
    pub error: String,
    /// Failed attempts before it was dropped.
    pub retry_count: u32,
    /// How to undo its optimistic local effect.
    pub rollback: Option<Rollback>,
}

impl TerminalFailure {
    fn new(op: &Operation, class: FailureClass, error: String) -> Self {
        Self {
            op_id: op.id(),
            kind: op.kind(),
            target: op.target().clone(),
            class,
            error,
            retry_count: op.retry_count(),
            rollback: op.rollback(),
        }
    }
}

/// Everything one flush cycle changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// Creates acknowledged, with their durable ids.
    pub created: Vec<IdResolution>,
    /// Blocks as persisted by acknowledged updates.
    pub updated: Vec<Block>,
    /// Blocks whose deletion was acknowledged.
    pub deleted: Vec<BlockId>,
    /// Operations scheduled for another attempt.
    pub retrying: Vec<OperationFailure>,
    /// Operations dropped for good.
    pub terminal: Vec<TerminalFailure>,
    /// Operations made moot by local edits enqueued while they were in
    /// flight, such as a delete of the same block.
    pub cancelled: Vec<OpId>,
    /// The error that failed the whole batch, if any.
    pub transport_error: Option<SyncError>,
}

impl CycleReport {
    /// Returns the number of acknowledged operations.
    pub fn acknowledged(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }

    /// Returns true if every operation of the batch was acknowledged.
    pub fn is_clean(&self) -> bool {
        self.retrying.is_empty() && self.terminal.is_empty() && self.transport_error.is_none()
    }

    /// Returns the durable id resolved for a temporary id this cycle.
    pub fn resolved(&self, temp: &TempId) -> Option<BlockId> {
        self.created
            .iter()
            .find(|r| &r.temp_id == temp)
            .map(IdResolution::durable_id)
    }
}

/// Applies the result of sending `batch` to the queue.
///
/// Acknowledged operations leave the queue and creates record their durable
/// id. Validation and not-found errors drop the operation, and so does a
/// request the server refused outright. Internal errors, any other transport
/// failure and operations the response does not mention are treated as
/// transient and retried with backoff until the retry budget is spent. A
/// dropped create takes the operations waiting on it along.
pub fn reconcile(
    queue: &mut OperationQueue,
    identity: &mut IdentityMap,
    retry: &RetryConfig,
    batch: &[OpId],
    result: SyncResult<BatchSyncResponse>,
    now: Instant,
) -> CycleReport {
    let in_flight: Vec<OpId> = batch
        .iter()
        .copied()
        .filter(|id| is_in_flight(queue, *id))
        .collect();
    let mut report = CycleReport::default();

    match result {
        Ok(response) => {
            apply_response(queue, identity, retry, &in_flight, response, now, &mut report)
        }
        Err(err) => {
            let class = FailureClass::from(&err);
            warn!(error = %err, class = ?class, operations = in_flight.len(), "batch failed");
            for id in &in_flight {
                let error = err.to_string();
                if class.is_retryable() {
                    retry_or_drop(queue, retry, *id, now, class, error, &mut report);
                } else if let Some(dropped) = queue.drop_in_flight(*id, error.clone()) {
                    record_dropped(&mut report, dropped, class, error);
                }
            }
            report.transport_error = Some(err);
        }
    }

    let settled = identity.settle(|temp| queue.references_temp(temp));
    if settled > 0 {
        debug!(settled, live = identity.len(), "settled identity map entries");
    }

    info!(
        created = report.created.len(),
        updated = report.updated.len(),
        deleted = report.deleted.len(),
        retrying = report.retrying.len(),
        dropped = report.terminal.len(),
        "batch reconciled"
    );
    report
}

fn is_in_flight(queue: &OperationQueue, id: OpId) -> bool {
    queue
        .get(id)
        .is_some_and(|op| op.state() == OpState::InFlight)
}

fn matching(
    queue: &OperationQueue,
    targets: &HashMap<TargetId, OpId>,
    target: TargetId,
    kind: OperationKind,
) -> Option<OpId> {
    let id = *targets.get(&target)?;
    let op = queue.get(id)?;
    (op.state() == OpState::InFlight && op.kind() == kind).then_some(id)
}

fn apply_response(
    queue: &mut OperationQueue,
    identity: &mut IdentityMap,
    retry: &RetryConfig,
    in_flight: &[OpId],
    response: BatchSyncResponse,
    now: Instant,
    report: &mut CycleReport,
) {
    let targets: HashMap<TargetId, OpId> = in_flight
        .iter()
        .filter_map(|id| queue.get(*id).map(|op| (op.target().clone(), *id)))
        .collect();

    for created in response.creates {
        let Ok(temp) = TempId::new(created.temp_id.as_str()) else {
            warn!(temp_id = %created.temp_id, "ignoring create with malformed temporary id");
            continue;
        };
        let Some(op_id) = matching(queue, &targets, TargetId::Temp(temp.clone()), OperationKind::Create)
        else {
            debug!(temp_id = %temp, "ignoring unmatched create");
            continue;
        };
        queue.acknowledge(op_id);
        identity.insert(temp.clone(), created.block.id);
        if let Some(rewritten) = queue.rewrite_target(&temp, created.block.id) {
            debug!(temp_id = %temp, durable_id = %created.block.id, op_id = %rewritten, "rewrote pending operation");
        }
        report.created.push(IdResolution {
            op_id,
            temp_id: temp,
            block: created.block,
        });
    }

    for updated in response.updates {
        let Ok(id) = BlockId::parse(&updated.id) else {
            continue;
        };
        if let Some(op_id) = matching(queue, &targets, TargetId::Durable(id), OperationKind::Update) {
            queue.acknowledge(op_id);
            report.updated.push(updated.block);
        }
    }

    for deleted in response.deletes {
        let Ok(id) = BlockId::parse(&deleted) else {
            continue;
        };
        if let Some(op_id) = matching(queue, &targets, TargetId::Durable(id), OperationKind::Delete) {
            queue.acknowledge(op_id);
            report.deleted.push(id);
        }
    }

    let by_op: HashMap<String, OpId> = in_flight.iter().map(|id| (id.to_string(), *id)).collect();
    for error in response.errors {
        let Some(&op_id) = by_op.get(&error.operation_id) else {
            debug!(operation_id = %error.operation_id, "ignoring error for unknown operation");
            continue;
        };
        if !is_in_flight(queue, op_id) {
            continue;
        }
        let class = FailureClass::from(error.code);
        if class.is_retryable() {
            retry_or_drop(queue, retry, op_id, now, class, error.error, report);
        } else if let Some(dropped) = queue.drop_in_flight(op_id, error.error.clone()) {
            record_dropped(report, dropped, class, error.error);
        }
    }

    for id in in_flight {
        if is_in_flight(queue, *id) {
            retry_or_drop(
                queue,
                retry,
                *id,
                now,
                FailureClass::Transient,
                "missing from batch response".to_string(),
                report,
            );
        }
    }
}

fn retry_or_drop(
    queue: &mut OperationQueue,
    retry: &RetryConfig,
    id: OpId,
    now: Instant,
    class: FailureClass,
    error: String,
    report: &mut CycleReport,
) {
    let Some((kind, target)) = queue.get(id).map(|op| (op.kind(), op.target().clone())) else {
        return;
    };

    match queue.fail_transient(id, now, retry, error.clone()) {
        Some(RetryDecision::Retry { at, requeued }) => match requeued {
            Requeued::Pending(pending) => {
                let retry_count = queue.get(pending).map_or(0, Operation::retry_count);
                debug!(op_id = %id, retry_count, "operation scheduled for retry");
                report.retrying.push(OperationFailure {
                    op_id: id,
                    kind,
                    target,
                    class,
                    error,
                    retry_count,
                    next_attempt_at: at,
                });
            }
            Requeued::Superseded(_) => report.cancelled.push(id),
            Requeued::Cancelled(ids) => report.cancelled.extend(ids),
        },
        Some(RetryDecision::Exhausted(dropped)) => record_dropped(report, dropped, class, error),
        None => {}
    }
}

fn record_dropped(report: &mut CycleReport, dropped: Dropped, class: FailureClass, error: String) {
    warn!(
        op_id = %dropped.op.id(),
        kind = %dropped.op.kind(),
        target = %dropped.op.target(),
        error = %error,
        "operation dropped"
    );
    report
        .terminal
        .push(TerminalFailure::new(&dropped.op, class, error));
    for dependent in &dropped.dependents {
        report.terminal.push(TerminalFailure {
            rollback: None,
            ..TerminalFailure::new(
                dependent,
                FailureClass::Dependency,
                format!("create of {} was dropped", dropped.op.target()),
            )
        });
    }
}
