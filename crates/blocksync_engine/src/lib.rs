//! # Blocksync Engine
//!
//! Client-side synchronization of locally edited blocks with the batch sync
//! server.
//!
//! This crate provides:
//! - An operation queue that coalesces edits per block
//! - Debounce and size-triggered batching with a single flush in flight
//! - Per-operation retry with exponential backoff
//! - Reconciliation of temporary ids with server-assigned durable ids
//! - Transport abstraction (HTTP, loopback, mock)
//! - A tokio driver running the session as one cooperative event loop
//!
//! ## Architecture
//!
//! `SyncSession` is a sans-IO state machine: every method takes `now`
//! explicitly and never performs network I/O. `SyncDriver` owns a session,
//! sleeps until its next deadline and runs the transport off the event loop.
//!
//! ## Key Invariants
//!
//! - At most one pending operation per block
//! - At most one batch in flight
//! - Failures are reported per cycle, never thrown from the queue
//! - An operation never targets a temporary id once its block is durable

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod driver;
mod error;
mod http;
mod identity;
mod operation;
mod queue;
mod reconcile;
mod remote;
mod schedule;
mod session;
mod transport;

pub use config::{RetryConfig, SyncConfig};
pub use driver::{NoopObserver, SyncDriver, SyncHandle, SyncObserver};
pub use error::{FailureClass, SyncError, SyncResult};
pub use http::{HttpClient, HttpError, HttpTransport, LoopbackClient, LoopbackServer};
pub use identity::IdentityMap;
pub use operation::{Mutation, OpState, Operation, Priority, Rollback};
pub use queue::{EnqueueOutcome, OperationQueue};
pub use reconcile::{reconcile, CycleReport, IdResolution, OperationFailure, TerminalFailure};
pub use remote::{DocumentApplier, MemoryDocument};
pub use schedule::{deadline_after, Scheduler, TaskHandle, TaskKind, MAX_DEADLINE_DELAY};
pub use session::{BatchId, OutboundBatch, SyncSession, SyncState, SyncStats};
pub use transport::{BatchTransport, MockTransport};
