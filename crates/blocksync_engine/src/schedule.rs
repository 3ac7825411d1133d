//! Deterministic timers for the sync session.
//!
//! The session never sleeps. It registers deadlines here and whoever drives
//! it (the tokio driver, a test, the CLI simulator) asks for the next
//! deadline and hands back the tasks that came due.

use std::time::{Duration, Instant};

/// Longest delay a deadline is placed after `now`.
pub const MAX_DEADLINE_DELAY: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Returns `now + delay`, clamping `delay` to [`MAX_DEADLINE_DELAY`] so that
/// oversized configuration values cannot overflow the clock.
pub fn deadline_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay.min(MAX_DEADLINE_DELAY)).unwrap_or(now)
}

/// What a timer is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Quiet period after the last enqueue elapsed.
    Debounce,
    /// A delayed operation became ready again.
    RetryWake,
}

/// Handle to a scheduled task, used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    id: u64,
    kind: TaskKind,
}

impl TaskHandle {
    /// Returns the task kind.
    pub fn kind(&self) -> TaskKind {
        self.kind
    }
}

#[derive(Debug, Clone)]
struct ScheduledTask {
    handle: TaskHandle,
    due: Instant,
}

/// A set of cancellable one-shot deadlines.
#[derive(Debug, Default)]
pub struct Scheduler {
    tasks: Vec<ScheduledTask>,
    next_id: u64,
}

impl Scheduler {
    /// Creates an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules a task.
    pub fn schedule(&mut self, kind: TaskKind, due: Instant) -> TaskHandle {
        let handle = TaskHandle {
            id: self.next_id,
            kind,
        };
        self.next_id += 1;
        self.tasks.push(ScheduledTask { handle, due });
        handle
    }

    /// Cancels a task. Returns false if it already fired or was cancelled.
    pub fn cancel(&mut self, handle: TaskHandle) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|task| task.handle != handle);
        self.tasks.len() != before
    }

    /// Returns the due time of a task still scheduled.
    pub fn due(&self, handle: TaskHandle) -> Option<Instant> {
        self.tasks
            .iter()
            .find(|task| task.handle == handle)
            .map(|task| task.due)
    }

    /// Returns the earliest deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.tasks.iter().map(|task| task.due).min()
    }

    /// Removes and returns the tasks due at `now`, earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<TaskHandle> {
        let (mut due, pending): (Vec<ScheduledTask>, Vec<ScheduledTask>) =
            self.tasks.drain(..).partition(|task| task.due <= now);
        self.tasks = pending;
        due.sort_by_key(|task| (task.due, task.handle.id));
        due.into_iter().map(|task| task.handle).collect()
    }

    /// Returns the number of scheduled tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if nothing is scheduled.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
