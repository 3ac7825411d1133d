//! Batch sync messages.
//!
//! A batch carries three ordered lists (creates, updates, deletes). The
//! response mirrors them with the operations that succeeded and lists every
//! failed operation in `errors`; one failure never aborts the others.
//!
//! Identifiers in requests are plain strings so the server can reject a
//! malformed id as a per-operation validation error instead of failing the
//! whole request.

use crate::block::Block;
use crate::codec::WireFormat;
use crate::error::ProtocolResult;
use crate::ids::{BlockId, OpId, TempId};
use crate::metadata::Metadata;
use crate::payload::{CreatePayload, UpdatePayload};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Path of the batch sync endpoint.
pub const BATCH_SYNC_PATH: &str = "/batch-sync";

/// Kind of a queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Block creation.
    Create,
    /// Block update.
    Update,
    /// Block deletion.
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Classification of a per-operation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed id, unknown type, unresolved page or parent.
    Validation,
    /// The target block does not exist.
    NotFound,
    /// The server failed to apply the operation.
    #[default]
    Internal,
}

impl ErrorCode {
    /// Returns true if resending the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::Internal)
    }
}

/// A block creation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCreate {
    /// Queued operation id.
    pub operation_id: String,
    /// Client temporary id, echoed back on success.
    pub temp_id: String,
    /// Containing page.
    pub page_id: String,
    /// Parent block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_block_id: Option<String>,
    /// Block type name.
    #[serde(rename = "type")]
    pub block_type: String,
    /// Text content.
    #[serde(default)]
    pub content: String,
    /// Position within the page.
    #[serde(default)]
    pub position: i64,
    /// Type-specific metadata.
    #[serde(rename = "blockConfig", default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl BatchCreate {
    /// Builds the wire item for a queued create.
    pub fn from_payload(op_id: OpId, temp_id: &TempId, payload: &CreatePayload) -> Self {
        Self {
            operation_id: op_id.to_string(),
            temp_id: temp_id.to_string(),
            page_id: payload.page_id.to_string(),
            parent_block_id: payload.parent_block_id.map(|id| id.to_string()),
            block_type: payload.block_type.clone(),
            content: payload.content.clone(),
            position: payload.position,
            metadata: payload.metadata.clone(),
        }
    }
}

/// A block update request. Absent fields are left untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchUpdate {
    /// Queued operation id.
    pub operation_id: String,
    /// Durable id of the block.
    pub id: String,
    /// New block type name.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub block_type: Option<String>,
    /// New content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// New position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
    /// Replacement metadata.
    #[serde(rename = "blockConfig", default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl BatchUpdate {
    /// Builds the wire item for a queued update.
    pub fn from_payload(op_id: OpId, id: BlockId, payload: &UpdatePayload) -> Self {
        Self {
            operation_id: op_id.to_string(),
            id: id.to_string(),
            block_type: payload.block_type.clone(),
            content: payload.content.clone(),
            position: payload.position,
            metadata: payload.metadata.clone(),
        }
    }
}

/// A block deletion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchDelete {
    /// Queued operation id.
    pub operation_id: String,
    /// Durable id of the block.
    pub id: String,
}

impl BatchDelete {
    /// Builds the wire item for a queued delete.
    pub fn new(op_id: OpId, id: BlockId) -> Self {
        Self {
            operation_id: op_id.to_string(),
            id: id.to_string(),
        }
    }
}

/// Body of `POST /batch-sync`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSyncRequest {
    /// Blocks to create.
    #[serde(default)]
    pub creates: Vec<BatchCreate>,
    /// Blocks to update.
    #[serde(default)]
    pub updates: Vec<BatchUpdate>,
    /// Blocks to delete.
    #[serde(default)]
    pub deletes: Vec<BatchDelete>,
}

impl BatchSyncRequest {
    /// Creates an empty request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of operations.
    pub fn len(&self) -> usize {
        self.creates.len() + self.updates.len() + self.deletes.len()
    }

    /// Returns true if the request carries no operation.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encodes the request.
    pub fn encode(&self, format: WireFormat) -> ProtocolResult<Vec<u8>> {
        format.encode(self)
    }

    /// Decodes a request.
    pub fn decode(bytes: &[u8], format: WireFormat) -> ProtocolResult<Self> {
        format.decode(bytes)
    }
}

/// A successful create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedBlock {
    /// The client temporary id from the request.
    pub temp_id: String,
    /// The persisted block, carrying its durable id.
    pub block: Block,
}

/// A successful update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatedBlock {
    /// The block id from the request.
    pub id: String,
    /// The block after the update.
    pub block: Block,
}

/// A failed operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchError {
    /// Queued operation id from the request.
    pub operation_id: String,
    /// Kind of the failed operation.
    #[serde(rename = "type")]
    pub kind: OperationKind,
    /// Failure classification.
    #[serde(default)]
    pub code: ErrorCode,
    /// Human readable message.
    pub error: String,
}

impl BatchError {
    /// Creates an error entry.
    pub fn new(
        operation_id: impl Into<String>,
        kind: OperationKind,
        code: ErrorCode,
        error: impl Into<String>,
    ) -> Self {
        Self {
            operation_id: operation_id.into(),
            kind,
            code,
            error: error.into(),
        }
    }
}

/// Partial-success response of `POST /batch-sync`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSyncResponse {
    /// Successful creates.
    #[serde(default)]
    pub creates: Vec<CreatedBlock>,
    /// Successful updates.
    #[serde(default)]
    pub updates: Vec<UpdatedBlock>,
    /// Ids of successful deletes.
    #[serde(default)]
    pub deletes: Vec<String>,
    /// Failed operations.
    #[serde(default)]
    pub errors: Vec<BatchError>,
}

impl BatchSyncResponse {
    /// Creates an empty response.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if no operation failed.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the error reported for an operation, if any.
    pub fn error_for(&self, operation_id: &str) -> Option<&BatchError> {
        self.errors.iter().find(|e| e.operation_id == operation_id)
    }

    /// Encodes the response.
    pub fn encode(&self, format: WireFormat) -> ProtocolResult<Vec<u8>> {
        format.encode(self)
    }

    /// Decodes a response.
    pub fn decode(bytes: &[u8], format: WireFormat) -> ProtocolResult<Self> {
        format.decode(bytes)
    }
}
