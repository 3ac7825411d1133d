//! Error types for the sync engine.

use blocksync_protocol::{ErrorCode, OpId, ProtocolError, TempId};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// Transport-level errors fail a whole batch; queue errors are returned
/// synchronously to the caller that misused the queue. Per-operation server
/// failures are never raised as errors, they are reported in a
/// [`CycleReport`](crate::CycleReport).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Malformed request or response body.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Server rejected the whole request.
    #[error("server error: {0}")]
    ServerError(String),

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// Not connected.
    #[error("not connected to server")]
    NotConnected,

    /// No queued operation has this id.
    #[error("unknown operation {0}")]
    UnknownOperation(OpId),

    /// The operation is part of the batch in flight and can no longer change.
    #[error("operation {0} is in flight")]
    InFlight(OpId),

    /// An operation targets a temporary id with no queued create.
    #[error("no create queued for temporary id {0}")]
    UnknownTempId(TempId),

    /// A create was enqueued twice for the same temporary id.
    #[error("create already queued for temporary id {0}")]
    DuplicateCreate(TempId),

    /// The local document rejected a change.
    #[error("document error: {0}")]
    Document(String),

    /// The sync driver has shut down.
    #[error("sync driver closed")]
    Closed,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::ServerError(_) => true,
            SyncError::NotConnected => true,
            _ => false,
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        SyncError::Protocol(err.to_string())
    }
}

/// Why a single operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// The server rejected the operation's input. Never retried.
    Validation,
    /// The target block does not exist on the server. Never retried.
    NotFound,
    /// Transport failure, timeout, missing acknowledgement or server fault.
    Transient,
    /// The operation was dropped because a create it depends on was dropped.
    Dependency,
    /// The server refused the whole request it was sent in. Never retried.
    Rejected,
}

impl FailureClass {
    /// Returns true if the operation may be resent.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureClass::Transient)
    }
}

impl From<&SyncError> for FailureClass {
    fn from(err: &SyncError) -> Self {
        match err {
            SyncError::Transport {
                retryable: false, ..
            } => FailureClass::Rejected,
            _ => FailureClass::Transient,
        }
    }
}

impl From<ErrorCode> for FailureClass {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::Validation => FailureClass::Validation,
            ErrorCode::NotFound => FailureClass::NotFound,
            ErrorCode::Internal => FailureClass::Transient,
        }
    }
}
