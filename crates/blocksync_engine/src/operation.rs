//! Queued operations.

use blocksync_protocol::{
    Block, CreatePayload, OpId, OperationKind, TargetId, TempId, UpdatePayload,
};
use std::time::Instant;

/// Scheduling priority of an operation. Higher priorities are sent first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    /// Background work.
    Low,
    /// Regular edits.
    #[default]
    Normal,
    /// Edits the user is waiting on.
    High,
    /// Must go out in the next batch.
    Critical,
}

/// The change an operation carries.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Create a block under a temporary id.
    Create(CreatePayload),
    /// Overwrite the fields present in the payload.
    Update(UpdatePayload),
    /// Delete the block.
    Delete,
}

impl Mutation {
    /// Returns the wire kind of the mutation.
    pub fn kind(&self) -> OperationKind {
        match self {
            Mutation::Create(_) => OperationKind::Create,
            Mutation::Update(_) => OperationKind::Update,
            Mutation::Delete => OperationKind::Delete,
        }
    }
}

/// Lifecycle state of a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpState {
    /// Waiting for a flush. May be coalesced.
    Pending,
    /// Part of the batch in flight. Immutable until reconciled.
    InFlight,
}

/// How to undo the optimistic local effect of a dropped operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Rollback {
    /// The block never reached the server; remove it locally.
    Remove(TargetId),
    /// Restore the block to its state before the first local edit.
    Restore(Block),
}

/// A pending mutation against one block.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub(crate) id: OpId,
    pub(crate) target: TargetId,
    pub(crate) mutation: Mutation,
    pub(crate) priority: Priority,
    pub(crate) enqueued_at: u64,
    pub(crate) retry_count: u32,
    pub(crate) next_attempt_at: Option<Instant>,
    pub(crate) snapshot: Option<Block>,
    pub(crate) state: OpState,
    pub(crate) last_error: Option<String>,
}

impl Operation {
    fn with_mutation(target: TargetId, mutation: Mutation) -> Self {
        Self {
            id: OpId::new(),
            target,
            mutation,
            priority: Priority::Normal,
            enqueued_at: 0,
            retry_count: 0,
            next_attempt_at: None,
            snapshot: None,
            state: OpState::Pending,
            last_error: None,
        }
    }

    /// Creates a block creation addressed by a temporary id.
    pub fn create(temp_id: TempId, payload: CreatePayload) -> Self {
        Self::with_mutation(TargetId::Temp(temp_id), Mutation::Create(payload))
    }

    /// Creates an update of an existing block.
    pub fn update(target: impl Into<TargetId>, payload: UpdatePayload) -> Self {
        Self::with_mutation(target.into(), Mutation::Update(payload))
    }

    /// Creates a deletion.
    pub fn delete(target: impl Into<TargetId>) -> Self {
        Self::with_mutation(target.into(), Mutation::Delete)
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Attaches the block state before this edit, used for rollback.
    #[must_use]
    pub fn with_snapshot(mut self, snapshot: Block) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// Returns the operation id.
    pub fn id(&self) -> OpId {
        self.id
    }

    /// Returns the targeted block.
    pub fn target(&self) -> &TargetId {
        &self.target
    }

    /// Returns the mutation.
    pub fn mutation(&self) -> &Mutation {
        &self.mutation
    }

    /// Returns the mutation kind.
    pub fn kind(&self) -> OperationKind {
        self.mutation.kind()
    }

    /// Returns the priority.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Returns the queue sequence number assigned at first enqueue.
    pub fn enqueued_at(&self) -> u64 {
        self.enqueued_at
    }

    /// Returns how many attempts have failed so far.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Returns the earliest time of the next attempt, if delayed.
    pub fn next_attempt_at(&self) -> Option<Instant> {
        self.next_attempt_at
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> OpState {
        self.state
    }

    /// Returns the rollback snapshot.
    pub fn snapshot(&self) -> Option<&Block> {
        self.snapshot.as_ref()
    }

    /// Returns the error of the last failed attempt.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Returns true if the operation may be placed in a batch at `now`.
    ///
    /// Updates and deletes of a block whose create is not acknowledged yet
    /// wait for the durable id.
    pub fn is_ready(&self, now: Instant) -> bool {
        self.state == OpState::Pending
            && self.next_attempt_at.map_or(true, |at| at <= now)
            && !(self.target.is_temp() && !matches!(self.mutation, Mutation::Create(_)))
    }

    /// Returns how to undo this operation locally once it is dropped.
    pub fn rollback(&self) -> Option<Rollback> {
        match self.mutation {
            Mutation::Create(_) => Some(Rollback::Remove(self.target.clone())),
            Mutation::Update(_) | Mutation::Delete => {
                self.snapshot.clone().map(Rollback::Restore)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blocksync_protocol::{BlockId, Metadata, PageId};
    use std::time::Duration;

    fn block(id: BlockId) -> Block {
        Block {
            id,
            page_id: PageId::new(),
            parent_block_id: None,
            block_type: "text".into(),
            content: "before".into(),
            position: 0,
            metadata: Metadata::new(),
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn priority_order() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn readiness() {
        let now = Instant::now();
        let temp = TempId::new("t-1").unwrap();

        let create = Operation::create(temp.clone(), CreatePayload::new(PageId::new(), "text"));
        assert!(create.is_ready(now));

        let blocked = Operation::update(temp, UpdatePayload::new().content("x"));
        assert!(!blocked.is_ready(now));

        let mut delayed = Operation::delete(BlockId::new());
        delayed.next_attempt_at = Some(now + Duration::from_secs(1));
        assert!(!delayed.is_ready(now));
        assert!(delayed.is_ready(now + Duration::from_secs(1)));

        delayed.state = OpState::InFlight;
        assert!(!delayed.is_ready(now + Duration::from_secs(2)));
    }

    #[test]
    fn rollback_by_kind() {
        let temp = TempId::new("t-1").unwrap();
        let create = Operation::create(temp.clone(), CreatePayload::new(PageId::new(), "text"));
        assert_eq!(create.rollback(), Some(Rollback::Remove(TargetId::Temp(temp))));

        let id = BlockId::new();
        let update = Operation::update(id, UpdatePayload::new().content("after"));
        assert_eq!(update.rollback(), None);

        let before = block(id);
        let update = update.with_snapshot(before.clone());
        assert_eq!(update.rollback(), Some(Rollback::Restore(before)));
        assert_eq!(update.kind(), OperationKind::Update);
    }
}
