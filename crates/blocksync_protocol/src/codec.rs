//! Wire encodings.

use crate::error::{ProtocolError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Body encoding used on the batch sync endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// `application/json`.
    #[default]
    Json,
    /// `application/cbor`.
    Cbor,
}

impl WireFormat {
    /// Returns the HTTP content type.
    pub fn content_type(&self) -> &'static str {
        match self {
            WireFormat::Json => "application/json",
            WireFormat::Cbor => "application/cbor",
        }
    }

    /// Resolves a format from an HTTP content type, ignoring parameters.
    pub fn from_content_type(content_type: &str) -> ProtocolResult<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "application/json" => Ok(WireFormat::Json),
            "application/cbor" => Ok(WireFormat::Cbor),
            _ => Err(ProtocolError::UnsupportedContentType(content_type.to_string())),
        }
    }

    /// Encodes a value.
    pub fn encode<T: Serialize>(&self, value: &T) -> ProtocolResult<Vec<u8>> {
        match self {
            WireFormat::Json => Ok(serde_json::to_vec(value)?),
            WireFormat::Cbor => {
                let mut buf = Vec::new();
                ciborium::into_writer(value, &mut buf)
                    .map_err(|e| ProtocolError::CborEncode(e.to_string()))?;
                Ok(buf)
            }
        }
    }

    /// Decodes a value.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> ProtocolResult<T> {
        match self {
            WireFormat::Json => Ok(serde_json::from_slice(bytes)?),
            WireFormat::Cbor => {
                ciborium::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
            }
        }
    }
}
