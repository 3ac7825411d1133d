//! Identifier types.
//!
//! Durable identifiers are UUIDs assigned by the server. Temporary
//! identifiers are opaque strings minted by the client for blocks that
//! have not been persisted yet.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from a UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Parses an identifier from its hyphenated string form.
            pub fn parse(s: &str) -> ProtocolResult<Self> {
                Uuid::parse_str(s.trim())
                    .map(Self)
                    .map_err(|e| ProtocolError::invalid_id(s, e.to_string()))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl FromStr for $name {
            type Err = ProtocolError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Durable, server-assigned block identifier.
    BlockId
);

uuid_id!(
    /// Identifier of the page (container) a block belongs to.
    PageId
);

uuid_id!(
    /// Identifier of one queued mutation, distinct from the entity it targets.
    OpId
);

/// Client-minted placeholder id for a block not yet persisted.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TempId(String);

impl TempId {
    /// Maximum accepted length of a temporary id.
    pub const MAX_LENGTH: usize = 128;

    /// Creates a temporary id from a client-provided string.
    pub fn new(id: impl Into<String>) -> ProtocolResult<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ProtocolError::invalid_id(id, "temporary id cannot be empty"));
        }
        if id.len() > Self::MAX_LENGTH {
            return Err(ProtocolError::invalid_id(
                id,
                format!("temporary id exceeds {} characters", Self::MAX_LENGTH),
            ));
        }
        Ok(Self(id))
    }

    /// Mints a fresh temporary id.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("temp-{}", Uuid::new_v4()))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TempId({})", self.0)
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The entity an operation mutates.
///
/// A block is addressed by its temporary id until the server acknowledges
/// its creation, and by its durable id afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetId {
    /// Not yet persisted.
    Temp(TempId),
    /// Persisted on the server.
    Durable(BlockId),
}

impl TargetId {
    /// Returns true if the target is still a temporary id.
    pub fn is_temp(&self) -> bool {
        matches!(self, TargetId::Temp(_))
    }

    /// Returns the temporary id, if any.
    pub fn as_temp(&self) -> Option<&TempId> {
        match self {
            TargetId::Temp(id) => Some(id),
            TargetId::Durable(_) => None,
        }
    }

    /// Returns the durable id, if any.
    pub fn as_durable(&self) -> Option<BlockId> {
        match self {
            TargetId::Temp(_) => None,
            TargetId::Durable(id) => Some(*id),
        }
    }
}

impl From<TempId> for TargetId {
    fn from(id: TempId) -> Self {
        TargetId::Temp(id)
    }
}

impl From<BlockId> for TargetId {
    fn from(id: BlockId) -> Self {
        TargetId::Durable(id)
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetId::Temp(id) => write!(f, "{id}"),
            TargetId::Durable(id) => write!(f, "{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_id_parse_and_display() {
        let id = BlockId::new();
        let parsed = BlockId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
        assert!(BlockId::parse("durable-1").is_err());
    }

    #[test]
    fn temp_id_validation() {
        assert!(TempId::new("t-1").is_ok());
        assert!(TempId::new("  ").is_err());
        assert!(TempId::new("x".repeat(TempId::MAX_LENGTH + 1)).is_err());
        assert!(TempId::generate().as_str().starts_with("temp-"));
    }

    #[test]
    fn target_accessors() {
        let temp = TargetId::from(TempId::new("t-1").unwrap());
        assert!(temp.is_temp());
        assert_eq!(temp.as_temp().map(TempId::as_str), Some("t-1"));
        assert_eq!(temp.as_durable(), None);

        let id = BlockId::new();
        let durable = TargetId::from(id);
        assert!(!durable.is_temp());
        assert_eq!(durable.as_durable(), Some(id));
        assert_eq!(durable.to_string(), id.to_string());
    }
}
