//! Real-time change notifications.

use crate::block::Block;
use crate::ids::{BlockId, PageId};
use serde::{Deserialize, Serialize};

/// A block change made by another editor, delivered by the real-time
/// broadcast collaborator.
///
/// Remote changes are applied to the local document directly; they are never
/// queued as local operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum RemoteChange {
    /// A block was created or updated.
    Upsert(Block),
    /// A block was deleted.
    Delete {
        /// Deleted block.
        id: BlockId,
        /// Page the block belonged to.
        page_id: PageId,
    },
}

impl RemoteChange {
    /// Returns the id of the changed block.
    pub fn block_id(&self) -> BlockId {
        match self {
            RemoteChange::Upsert(block) => block.id,
            RemoteChange::Delete { id, .. } => *id,
        }
    }

    /// Returns the page of the changed block.
    pub fn page_id(&self) -> PageId {
        match self {
            RemoteChange::Upsert(block) => block.page_id,
            RemoteChange::Delete { page_id, .. } => *page_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn delete_event_shape() {
        let change = RemoteChange::Delete {
            id: BlockId::new(),
            page_id: PageId::new(),
        };
        let value = serde_json::to_value(&change).unwrap();
        assert_eq!(value["event"], json!("delete"));
        assert_eq!(value["data"]["id"], json!(change.block_id().to_string()));

        let back: RemoteChange = serde_json::from_value(value).unwrap();
        assert_eq!(back, change);
    }
}
