//! # Blocksync Server
//!
//! Reference batch sync server for block documents.
//!
//! This crate provides:
//! - The `POST /batch-sync` endpoint (JSON or CBOR bodies)
//! - A batch processor with per-operation partial success
//! - An in-memory block store with soft delete and a block type registry
//! - Cache invalidation hooks keyed by block, page and parent
//!
//! # Semantics
//!
//! A batch is applied as creates, then updates, then deletes. Every
//! operation succeeds or fails on its own:
//! - creates validate the page, the parent block and the type name
//! - updates are last-write-wins with no concurrency token
//! - deletes are idempotent
//!
//! Failures are returned in the response `errors` list with a code telling
//! the client whether resending may help.

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod cache;
mod config;
mod error;
mod handler;
mod processor;
mod server;
mod store;

pub use cache::{CacheInvalidator, CacheKey, NoopCache, RecordingCache};
pub use config::ServerConfig;
pub use error::{OperationError, ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler, ServerStats};
pub use processor::BatchProcessor;
pub use server::SyncServer;
pub use store::{default_block_types, BlockStore, CreateKey, MemoryBlockStore};
