//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding, decoding or validating wire data.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// JSON encoding or decoding failed.
    #[error("json codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// CBOR encoding failed.
    #[error("cbor encode error: {0}")]
    CborEncode(String),

    /// CBOR decoding failed.
    #[error("cbor decode error: {0}")]
    CborDecode(String),

    /// An identifier did not have the expected format.
    #[error("invalid identifier {value:?}: {reason}")]
    InvalidId {
        /// The rejected value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The content type is not one of the supported wire formats.
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),
}

impl ProtocolError {
    /// Creates an invalid identifier error.
    pub fn invalid_id(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidId {
            value: value.into(),
            reason: reason.into(),
        }
    }
}
