//! Error types for the sync server.

use blocksync_protocol::{ErrorCode, ProtocolError};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Request-level errors. These fail a whole request, unlike
/// [`OperationError`], which fails a single operation of a batch.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The batch carries more operations than the server accepts.
    #[error("too many operations: {size} > {max}")]
    BatchTooLarge {
        /// Operations in the request.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The request body uses an unknown encoding.
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    /// No endpoint is registered at the path.
    #[error("no such endpoint: {0}")]
    UnknownPath(String),

    /// The request or response body could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// The block store failed.
    #[error("store error: {0}")]
    Store(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::BatchTooLarge { .. }
                | ServerError::UnsupportedContentType(_)
                | ServerError::UnknownPath(_)
                | ServerError::Codec(_)
        )
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(self, ServerError::Store(_) | ServerError::Internal(_))
    }

    /// Returns the HTTP status a host should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_) | ServerError::Codec(_) => 400,
            ServerError::UnknownPath(_) => 404,
            ServerError::BatchTooLarge { .. } => 413,
            ServerError::UnsupportedContentType(_) => 415,
            ServerError::Store(_) => 503,
            ServerError::Internal(_) => 500,
        }
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::UnsupportedContentType(ct) => ServerError::UnsupportedContentType(ct),
            other => ServerError::Codec(other.to_string()),
        }
    }
}

/// Failure of a single batch operation.
#[derive(Error, Debug)]
pub enum OperationError {
    /// Malformed id, unknown type, unresolved page or parent.
    #[error("{0}")]
    Validation(String),

    /// The target block does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The store failed while applying the operation.
    #[error("{0}")]
    Store(#[from] ServerError),
}

impl OperationError {
    /// Returns the wire code reported to the client.
    pub fn code(&self) -> ErrorCode {
        match self {
            OperationError::Validation(_) => ErrorCode::Validation,
            OperationError::NotFound(_) => ErrorCode::NotFound,
            OperationError::Store(_) => ErrorCode::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidRequest("bad".into()).is_client_error());
        assert!(ServerError::BatchTooLarge { size: 3, max: 2 }.is_client_error());
        assert!(ServerError::Store("down".into()).is_server_error());
        assert!(!ServerError::InvalidRequest("bad".into()).is_server_error());
    }

    #[test]
    fn status_codes_follow_classification() {
        let errors = [
            ServerError::InvalidRequest("bad".into()),
            ServerError::BatchTooLarge { size: 3, max: 2 },
            ServerError::UnsupportedContentType("text/plain".into()),
            ServerError::UnknownPath("/pull".into()),
            ServerError::Codec("eof".into()),
            ServerError::Store("down".into()),
            ServerError::Internal("bug".into()),
        ];
        for err in &errors {
            let status = err.status_code();
            assert_eq!(err.is_client_error(), (400..500).contains(&status), "{err}");
            assert_eq!(err.is_server_error(), status >= 500, "{err}");
        }
        assert_eq!(ServerError::BatchTooLarge { size: 3, max: 2 }.status_code(), 413);
    }

    #[test]
    fn error_display() {
        let msg = ServerError::BatchTooLarge { size: 10, max: 5 }.to_string();
        assert!(msg.contains("10"));
        assert!(msg.contains("5"));
    }

    #[test]
    fn protocol_errors_map_to_client_errors() {
        let err: ServerError = ProtocolError::UnsupportedContentType("text/xml".into()).into();
        assert!(matches!(err, ServerError::UnsupportedContentType(_)));

        let err: ServerError = ProtocolError::CborDecode("eof".into()).into();
        assert!(matches!(err, ServerError::Codec(_)));
        assert!(err.is_client_error());
    }

    #[test]
    fn operation_error_codes() {
        assert_eq!(
            OperationError::Validation("invalid page ID".into()).code(),
            ErrorCode::Validation
        );
        assert_eq!(
            OperationError::NotFound("block not found".into()).code(),
            ErrorCode::NotFound
        );
        let store: OperationError = ServerError::Store("offline".into()).into();
        assert_eq!(store.code(), ErrorCode::Internal);
        assert_eq!(store.to_string(), "store error: offline");
    }
}
