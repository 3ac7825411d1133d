//! # Blocksync Protocol
//!
//! Wire types and codecs shared by the block sync client engine and the
//! reference batch sync server.
//!
//! This crate provides:
//! - Identifier types (`BlockId`, `PageId`, `TempId`, `OpId`, `TargetId`)
//! - The shared `Block` representation with opaque `Metadata`
//! - Create/update payloads carried by queued operations
//! - `POST /batch-sync` request and partial-success response messages
//! - JSON and CBOR encodings (`WireFormat`)
//! - The real-time `RemoteChange` contract
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod block;
mod change;
mod codec;
mod error;
mod ids;
mod messages;
mod metadata;
mod payload;

pub use block::{Block, BlockType};
pub use change::RemoteChange;
pub use codec::WireFormat;
pub use error::{ProtocolError, ProtocolResult};
pub use ids::{BlockId, OpId, PageId, TargetId, TempId};
pub use messages::{
    BatchCreate, BatchDelete, BatchError, BatchSyncRequest, BatchSyncResponse, BatchUpdate,
    CreatedBlock, ErrorCode, OperationKind, UpdatedBlock, BATCH_SYNC_PATH,
};
pub use metadata::Metadata;
pub use payload::{CreatePayload, UpdatePayload};
