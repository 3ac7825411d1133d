//! The shared block representation.

use crate::ids::{BlockId, PageId};
use crate::metadata::Metadata;
use serde::{Deserialize, Serialize};

/// A content block as persisted by the server and echoed in batch responses.
///
/// Timestamps are milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Durable id.
    pub id: BlockId,
    /// Containing page.
    pub page_id: PageId,
    /// Parent block for nested blocks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_block_id: Option<BlockId>,
    /// Block type name (`text`, `heading`, ...).
    #[serde(rename = "type")]
    pub block_type: String,
    /// Text content.
    #[serde(default)]
    pub content: String,
    /// Position (rank) within the page.
    #[serde(default)]
    pub position: i64,
    /// Type-specific metadata.
    #[serde(rename = "blockConfig", default)]
    pub metadata: Metadata,
    /// Creation time.
    pub created_at: u64,
    /// Last modification time.
    pub updated_at: u64,
}

/// A registered block kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockType {
    /// Type id.
    pub id: uuid::Uuid,
    /// Unique lookup name.
    pub name: String,
    /// Grouping category (`basic`, `media`, ...).
    pub category: String,
    /// Human readable name.
    pub display_name: String,
}

impl BlockType {
    /// Creates a block type with a fresh id.
    pub fn new(
        name: impl Into<String>,
        category: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            name: name.into(),
            category: category.into(),
            display_name: display_name.into(),
        }
    }
}
