//! Mutation payloads carried by queued operations.

use crate::ids::{BlockId, PageId};
use crate::metadata::Metadata;
use serde::{Deserialize, Serialize};

/// Fields of a block to be created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePayload {
    /// Containing page.
    pub page_id: PageId,
    /// Parent block, for nested blocks. Must already be durable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_block_id: Option<BlockId>,
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
    #[serde(rename = "blockConfig", default)]
    pub metadata: Metadata,
}

impl CreatePayload {
    /// Creates a payload with empty content at position 0.
    pub fn new(page_id: PageId, block_type: impl Into<String>) -> Self {
        Self {
            page_id,
            parent_block_id: None,
            block_type: block_type.into(),
            content: String::new(),
            position: 0,
            metadata: Metadata::new(),
        }
    }

    /// Sets the content.
    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    /// Sets the position.
    #[must_use]
    pub fn with_position(mut self, position: i64) -> Self {
        self.position = position;
        self
    }

    /// Sets the parent block.
    #[must_use]
    pub fn with_parent(mut self, parent: BlockId) -> Self {
        self.parent_block_id = Some(parent);
        self
    }

    /// Sets the metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Folds an update into this not-yet-sent create.
    ///
    /// Every field present in the update replaces the create's value.
    pub fn merge(&mut self, update: UpdatePayload) {
        if let Some(block_type) = update.block_type {
            self.block_type = block_type;
        }
        if let Some(content) = update.content {
            self.content = content;
        }
        if let Some(position) = update.position {
            self.position = position;
        }
        if let Some(metadata) = update.metadata {
            self.metadata = metadata;
        }
    }
}

/// Fields of a block to overwrite. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePayload {
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

impl UpdatePayload {
    /// Creates an empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the content.
    #[must_use]
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Sets the block type.
    #[must_use]
    pub fn block_type(mut self, block_type: impl Into<String>) -> Self {
        self.block_type = Some(block_type.into());
        self
    }

    /// Sets the position.
    #[must_use]
    pub fn position(mut self, position: i64) -> Self {
        self.position = Some(position);
        self
    }

    /// Sets the metadata.
    #[must_use]
    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Returns true if no field is set.
    pub fn is_empty(&self) -> bool {
        self.block_type.is_none()
            && self.content.is_none()
            && self.position.is_none()
            && self.metadata.is_none()
    }

    /// Overlays a later update on top of this one. The later value wins for
    /// every field it sets.
    pub fn overlay(&mut self, later: UpdatePayload) {
        if later.block_type.is_some() {
            self.block_type = later.block_type;
        }
        if later.content.is_some() {
            self.content = later.content;
        }
        if later.position.is_some() {
            self.position = later.position;
        }
        if later.metadata.is_some() {
            self.metadata = later.metadata;
        }
    }
}
