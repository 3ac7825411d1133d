//! Property tests for the wire codecs and temporary ids.

use blocksync_protocol::{
    BatchCreate, BatchDelete, BatchSyncRequest, BatchUpdate, BlockId, Metadata, OpId, PageId,
    TempId, WireFormat,
};
use proptest::prelude::*;
use serde_json::Value;

fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        ".{0,12}".prop_map(Value::from),
        prop::collection::vec(any::<i32>(), 0..4).prop_map(Value::from),
    ]
}

fn metadata_strategy() -> impl Strategy<Value = Metadata> {
    prop::collection::btree_map("[a-z]{1,8}", value_strategy(), 0..4)
        .prop_map(|entries| entries.into_iter().collect())
}

fn create_strategy() -> impl Strategy<Value = BatchCreate> {
    (
        "[a-z0-9-]{1,16}",
        prop::option::of(Just(())),
        "[a-z]{1,10}",
        ".{0,40}",
        any::<i64>(),
        metadata_strategy(),
    )
        .prop_map(|(temp, parent, block_type, content, position, metadata)| BatchCreate {
            operation_id: OpId::new().to_string(),
            temp_id: temp,
            page_id: PageId::new().to_string(),
            parent_block_id: parent.map(|_| BlockId::new().to_string()),
            block_type,
            content,
            position,
            metadata,
        })
}

fn update_strategy() -> impl Strategy<Value = BatchUpdate> {
    (
        prop::option::of("[a-z]{1,10}"),
        prop::option::of(".{0,40}"),
        prop::option::of(any::<i64>()),
        prop::option::of(metadata_strategy()),
    )
        .prop_map(|(block_type, content, position, metadata)| BatchUpdate {
            operation_id: OpId::new().to_string(),
            id: BlockId::new().to_string(),
            block_type,
            content,
            position,
            metadata,
        })
}

fn request_strategy() -> impl Strategy<Value = BatchSyncRequest> {
    (
        prop::collection::vec(create_strategy(), 0..4),
        prop::collection::vec(update_strategy(), 0..4),
        0..4usize,
    )
        .prop_map(|(creates, updates, deletes)| {
            let mut request = BatchSyncRequest::new();
            request.creates = creates;
            request.updates = updates;
            request.deletes = (0..deletes)
                .map(|_| BatchDelete::new(OpId::new(), BlockId::new()))
                .collect();
            request
        })
}

proptest! {
    #[test]
    fn both_formats_decode_to_the_same_request(request in request_strategy()) {
        let json = request.encode(WireFormat::Json).unwrap();
        let cbor = request.encode(WireFormat::Cbor).unwrap();

        let from_json = BatchSyncRequest::decode(&json, WireFormat::Json).unwrap();
        let from_cbor = BatchSyncRequest::decode(&cbor, WireFormat::Cbor).unwrap();
        prop_assert_eq!(&from_json, &request);
        prop_assert_eq!(&from_cbor, &request);
        prop_assert_eq!(from_json.len(), request.len());
    }

    #[test]
    fn absent_update_fields_stay_absent(update in update_strategy()) {
        let json: Value = serde_json::from_slice(&WireFormat::Json.encode(&update).unwrap()).unwrap();
        let object = json.as_object().unwrap();
        prop_assert_eq!(object.contains_key("content"), update.content.is_some());
        prop_assert_eq!(object.contains_key("position"), update.position.is_some());
        prop_assert_eq!(object.contains_key("blockConfig"), update.metadata.is_some());
        prop_assert_eq!(object.contains_key("type"), update.block_type.is_some());
    }

    #[test]
    fn temp_ids_reject_blank_and_overlong_input(id in "[ \t]{0,4}|[a-z]{129,140}|[a-z0-9-]{1,128}") {
        let accepted = TempId::new(id.clone()).is_ok();
        let expected = !id.trim().is_empty() && id.len() <= TempId::MAX_LENGTH;
        prop_assert_eq!(accepted, expected);
    }
}
