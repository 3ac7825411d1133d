//! End-to-end tests: edit scripts through a session against the server.

use blocksync_engine::{FailureClass, Rollback, RetryConfig, SyncConfig};
use blocksync_protocol::{TargetId, WireFormat};
use blocksync_testkit::prelude::*;
use proptest::prelude::*;
use std::time::Duration;

fn config() -> SyncConfig {
    SyncConfig::new("http://blocksync.test").with_debounce(Duration::from_millis(100))
}

fn assert_converged(harness: &SyncHarness, script: &[EditStep]) {
    let expected = expected_contents(script);
    assert!(harness.session.queue().is_empty());
    assert!(harness.session.identity().is_empty());
    assert_eq!(harness.server_contents(), expected);
    assert_eq!(harness.local_contents(), expected);
    assert_eq!(harness.server.blocks().len(), expected.len());
    assert_eq!(harness.document.draft_count(), 0);
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn scripts_converge(script in edit_script_strategy(4, 1, 40)) {
        let mut harness = SyncHarness::with_config(config());
        harness.run_script(&script);
        assert_converged(&harness, &script);
        prop_assert!(harness.reports().iter().all(|r| r.is_clean()));
    }

    #[test]
    fn scripts_converge_with_small_batches(script in edit_script_strategy(6, 1, 40)) {
        let mut harness = SyncHarness::with_config(config().with_max_batch_size(2));
        harness.run_script(&script);
        assert_converged(&harness, &script);
        prop_assert!(harness
            .reports()
            .iter()
            .all(|r| r.acknowledged() + r.cancelled.len() <= 2));
    }
}

#[test]
fn cbor_end_to_end() {
    let mut harness = SyncHarness::with_config(config().with_wire_format(WireFormat::Cbor));
    let script = vec![
        EditStep::Create {
            slot: 0,
            content: "first".into(),
        },
        EditStep::Flush,
        EditStep::Update {
            slot: 0,
            content: "first, edited".into(),
        },
        EditStep::Create {
            slot: 1,
            content: "second".into(),
        },
    ];
    harness.run_script(&script);
    assert_converged(&harness, &script);
    assert_eq!(harness.transport().format(), WireFormat::Cbor);
}

#[test]
fn server_outage_recovers_after_backoff() {
    let mut harness = SyncHarness::with_config(config());
    harness.create(0, "a");
    harness.create(1, "b");
    harness.server.store.set_unavailable(true);

    let report = harness.sync().unwrap();
    assert_eq!(report.retrying.len(), 2);
    assert!(report
        .retrying
        .iter()
        .all(|f| f.class == FailureClass::Transient));
    assert!(harness.sync().is_none(), "backoff has not elapsed");

    harness.server.store.set_unavailable(false);
    harness.sync_until_idle();

    assert_eq!(harness.server_contents().len(), 2);
    assert_eq!(harness.session.stats().retries, 2);
    assert!(harness.session.queue().is_empty());
}

#[test]
fn exhausted_create_is_rolled_back_locally() {
    let mut harness =
        SyncHarness::with_config(config().with_retry(RetryConfig::new(3)));
    harness.create(0, "doomed");
    harness.server.store.set_unavailable(true);

    let started = harness.now();
    assert_eq!(harness.sync_until_idle(), 3);
    // Waited 1s then 2s between attempts.
    assert_eq!(harness.now() - started, Duration::from_secs(3));

    let last = harness.reports().last().unwrap();
    assert_eq!(last.terminal.len(), 1);
    let dropped = &last.terminal[0];
    assert_eq!(dropped.class, FailureClass::Transient);
    assert_eq!(dropped.retry_count, 2);
    assert!(matches!(
        &dropped.rollback,
        Some(Rollback::Remove(TargetId::Temp(_)))
    ));

    assert_eq!(harness.document.draft_count(), 0);
    assert!(harness.server.blocks().is_empty());
    assert_eq!(harness.session.stats().operations_dropped, 1);
}

#[test]
fn server_invalidates_every_synced_block() {
    let mut harness = SyncHarness::with_config(config());
    harness.create(0, "a");
    harness.create(1, "b");
    harness.sync_until_idle();
    let first = harness.durable_id(0).unwrap();
    let second = harness.durable_id(1).unwrap();
    harness.server.cache.take();

    harness.update(0, "a2");
    harness.delete(1);
    harness.sync_until_idle();

    assert!(harness.server.invalidated(first));
    assert!(harness.server.invalidated(second));
    assert!(harness.server.store.is_deleted(second));
}
