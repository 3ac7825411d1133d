//! Property tests for batch outcome accounting.

use blocksync_protocol::{
    BatchCreate, BatchDelete, BatchSyncRequest, BatchUpdate, BlockId, Metadata, OpId, PageId,
};
use blocksync_server::{MemoryBlockStore, ServerConfig, SyncServer};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Item {
    Create { valid_page: bool, block_type: &'static str },
    Update { known: bool, malformed: bool },
    Delete { known: bool, malformed: bool },
}

fn item_strategy() -> impl Strategy<Value = Item> {
    prop_oneof![
        (any::<bool>(), prop::sample::select(vec!["text", "todo", "hologram"]))
            .prop_map(|(valid_page, block_type)| Item::Create { valid_page, block_type }),
        (any::<bool>(), any::<bool>()).prop_map(|(known, malformed)| Item::Update { known, malformed }),
        (any::<bool>(), any::<bool>()).prop_map(|(known, malformed)| Item::Delete { known, malformed }),
    ]
}

fn build(items: &[Item], page: PageId, known: BlockId) -> BatchSyncRequest {
    let mut request = BatchSyncRequest::new();
    for (i, item) in items.iter().enumerate() {
        let operation_id = OpId::new().to_string();
        match item {
            Item::Create { valid_page, block_type } => request.creates.push(BatchCreate {
                operation_id,
                temp_id: format!("t-{i}"),
                page_id: if *valid_page { page } else { PageId::new() }.to_string(),
                parent_block_id: None,
                block_type: (*block_type).into(),
                content: format!("item {i}"),
                position: i as i64,
                metadata: Metadata::new(),
            }),
            Item::Update { known: k, malformed } => request.updates.push(BatchUpdate {
                operation_id,
                id: target(*k, *malformed, known),
                block_type: None,
                content: Some(format!("edit {i}")),
                position: None,
                metadata: None,
            }),
            Item::Delete { known: k, malformed } => request.deletes.push(BatchDelete {
                operation_id,
                id: target(*k, *malformed, known),
            }),
        }
    }
    request
}

fn target(known: bool, malformed: bool, id: BlockId) -> String {
    match (malformed, known) {
        (true, _) => "block-?".into(),
        (false, true) => id.to_string(),
        (false, false) => BlockId::new().to_string(),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn every_operation_is_reported_once(items in prop::collection::vec(item_strategy(), 0..24)) {
        let store = Arc::new(MemoryBlockStore::with_default_types());
        let page = PageId::new();
        store.add_page(page);
        let server = SyncServer::with_store(ServerConfig::default(), store.clone());

        let mut seed = build(&[Item::Create { valid_page: true, block_type: "text" }], page, BlockId::new());
        seed.creates[0].temp_id = "seed".into();
        let known = server.handle_batch(&seed).unwrap().creates[0].block.id;

        let request = build(&items, page, known);
        let response = server.handle_batch(&request).unwrap();

        let reported = response.creates.len()
            + response.updates.len()
            + response.deletes.len()
            + response.errors.len();
        prop_assert_eq!(reported, request.len());

        let failed: HashSet<&str> = response.errors.iter().map(|e| e.operation_id.as_str()).collect();
        prop_assert_eq!(failed.len(), response.errors.len());

        // Deletes never fail on well-formed ids.
        for delete in &request.deletes {
            let errored = failed.contains(delete.operation_id.as_str());
            prop_assert_eq!(errored, BlockId::parse(&delete.id).is_err());
        }

        let created: usize = items
            .iter()
            .filter(|i| matches!(i, Item::Create { valid_page: true, block_type } if *block_type != "hologram"))
            .count();
        prop_assert_eq!(response.creates.len(), created);
        prop_assert!(store.live_count() <= created + 1);
    }
}
