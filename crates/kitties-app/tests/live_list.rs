//! End-to-end behaviour of the live list against the in-memory ledger.

#![allow(clippy::unwrap_used)]

use assert_matches::assert_matches;
use kitties_app::{
    create_kitty, transfer_kitty, KittiesPipeline, PipelineConfig, SnapshotPolicy,
};
use kitties_core::{Field, KittiesError, KittyIndex, StoreError, SubscriptionSource};
use kitties_testkit::{dna, init_test_tracing, kitty, owner, MockLedger};
use std::sync::Arc;
use std::time::Duration;

fn start(ledger: &MockLedger, config: PipelineConfig) -> KittiesPipeline {
    init_test_tracing();
    KittiesPipeline::start(Arc::new(ledger.clone()), config).unwrap()
}

/// Let the pipeline task run until it has nothing left to do.
async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_out_of_order_resolution_scenario() {
    let ledger = MockLedger::new();
    ledger.set_count(2);
    let pipeline = start(&ledger, PipelineConfig::default());
    let mut sub = pipeline.subscribe().unwrap();

    assert!(sub.recv().await.unwrap().is_empty());

    ledger.set_owner(KittyIndex(1), Some(owner("bob")));
    settle().await;
    assert!(sub.try_recv().is_none());

    ledger.set_owner(KittyIndex(0), Some(owner("alice")));
    ledger.set_dna(KittyIndex(0), Some(dna(0)));
    let snapshot = sub.recv().await.unwrap();
    assert_eq!(snapshot.kitties().cloned().collect::<Vec<_>>(), vec![kitty(0, "alice", 0)]);

    ledger.set_dna(KittyIndex(1), Some(dna(1)));
    let snapshot = sub.recv().await.unwrap();
    assert_eq!(
        snapshot.kitties().cloned().collect::<Vec<_>>(),
        vec![kitty(0, "alice", 0), kitty(1, "bob", 1)]
    );

    settle().await;
    assert!(sub.try_recv().is_none());
    assert_eq!(pipeline.stats().await.notifications, 3);
}

#[tokio::test]
async fn test_equal_snapshots_notify_once() {
    let ledger = MockLedger::new();
    ledger.push_kitty(owner("alice"), dna(7));
    let pipeline = start(&ledger, PipelineConfig::default());
    let mut sub = pipeline.subscribe().unwrap();
    assert_eq!(sub.recv().await.unwrap().len(), 1);

    // Same answer again: the map does not change
    ledger.set_owner(KittyIndex(0), Some(owner("alice")));
    // Absent DNA for an index beyond the count: ignored
    ledger.set_dna(KittyIndex(5), None);
    settle().await;

    assert!(sub.try_recv().is_none());
}

#[tokio::test]
async fn test_late_subscriber_sees_current_list() {
    let ledger = MockLedger::new();
    ledger.push_kitty(owner("alice"), dna(1));
    let pipeline = start(&ledger, PipelineConfig::default());
    let mut first = pipeline.subscribe().unwrap();
    assert_eq!(first.recv().await.unwrap().len(), 1);

    let mut second = pipeline.subscribe().unwrap();
    assert_eq!(second.recv().await.unwrap().len(), 1);
    assert_eq!(ledger.count_subscriptions(), 1);
}

#[tokio::test]
async fn test_count_failure_keeps_last_snapshot() {
    let ledger = MockLedger::new();
    ledger.push_kitty(owner("alice"), dna(1));
    let pipeline = start(&ledger, PipelineConfig::default());
    let mut errors = pipeline.subscribe_errors();
    let mut sub = pipeline.subscribe().unwrap();
    assert_eq!(sub.recv().await.unwrap().len(), 1);

    ledger.fail_count(StoreError::disconnected("node restarting"));
    let error = errors.recv().await.unwrap();
    assert_matches!(
        error,
        KittiesError::SubscriptionFailure {
            source_kind: SubscriptionSource::Count,
            ..
        }
    );
    assert!(error.is_transient());
    assert!(sub.try_recv().is_none());
    assert_eq!(pipeline.latest().unwrap().len(), 1);

    // The subscription is still alive and growth still flows through
    ledger.push_kitty(owner("bob"), dna(2));
    assert_eq!(sub.recv().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_lookup_failure_and_closed_count_are_reported() {
    let ledger = MockLedger::new();
    ledger.set_count(1);
    let pipeline = start(&ledger, PipelineConfig::default());
    let mut errors = pipeline.subscribe_errors();
    let mut sub = pipeline.subscribe().unwrap();
    sub.recv().await.unwrap();

    ledger.fail_lookup(KittyIndex(0), Field::Dna, StoreError::decode("Kitty", "bad length"));
    assert_matches!(
        errors.recv().await.unwrap(),
        KittiesError::SubscriptionFailure {
            source_kind: SubscriptionSource::Lookup { index: KittyIndex(0), field: Field::Dna },
            ..
        }
    );

    ledger.close_count();
    assert_matches!(
        errors.recv().await.unwrap(),
        KittiesError::SubscriptionFailure {
            source_kind: SubscriptionSource::Count,
            reason,
        } if reason == "stream ended"
    );

    // The index is still looked up and completes normally
    ledger.set_owner(KittyIndex(0), Some(owner("alice")));
    ledger.set_dna(KittyIndex(0), Some(dna(3)));
    assert_eq!(sub.recv().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_count_regression_cancels_trimmed_lookups_once() {
    let ledger = MockLedger::new();
    for seed in 0..3 {
        ledger.push_kitty(owner("alice"), dna(seed));
    }
    let pipeline = start(&ledger, PipelineConfig::default());
    let mut errors = pipeline.subscribe_errors();
    let mut sub = pipeline.subscribe().unwrap();
    while sub.recv().await.unwrap().len() < 3 {}

    ledger.set_count(1);
    assert_eq!(sub.recv().await.unwrap().indices(), vec![KittyIndex(0)]);
    assert_matches!(
        errors.recv().await.unwrap(),
        KittiesError::InconsistentCount {
            observed: 1,
            high_water: 3
        }
    );

    for i in 1..3 {
        for field in Field::ALL {
            assert_eq!(ledger.cancellations(KittyIndex(i), field), 1);
        }
    }
    assert_eq!(ledger.cancellations(KittyIndex(0), Field::Owner), 0);
    // count + two lookups for index 0
    assert_eq!(ledger.live_subscriptions(), 3);

    ledger.set_count(2);
    assert_eq!(sub.recv().await.unwrap().len(), 2);
    assert_eq!(ledger.subscribe_calls(KittyIndex(1), Field::Dna), 2);
    assert_eq!(ledger.subscribe_calls(KittyIndex(2), Field::Dna), 1);
}

#[tokio::test]
async fn test_reset_session_switches_store() {
    let first = MockLedger::new();
    first.push_kitty(owner("alice"), dna(1));
    first.push_kitty(owner("alice"), dna(2));
    let second = MockLedger::new();
    second.push_kitty(owner("carol"), dna(9));

    let pipeline = start(&first, PipelineConfig::default());
    let mut sub = pipeline.subscribe().unwrap();
    while sub.recv().await.unwrap().len() < 2 {}

    pipeline.reset_session(Arc::new(second.clone())).unwrap();
    let snapshot = sub.recv().await.unwrap();
    assert_eq!(snapshot.kitties().cloned().collect::<Vec<_>>(), vec![kitty(0, "carol", 9)]);

    assert_eq!(first.live_subscriptions(), 0);
    for i in 0..2 {
        assert_eq!(first.cancellations(KittyIndex(i), Field::Owner), 1);
    }
    assert_eq!(pipeline.stats().await.sessions, 2);

    // Changes on the old store no longer reach listeners
    first.push_kitty(owner("alice"), dna(3));
    settle().await;
    assert!(sub.try_recv().is_none());
}

#[tokio::test]
async fn test_idle_release_and_resubscribe() {
    let ledger = MockLedger::new();
    ledger.push_kitty(owner("alice"), dna(1));
    let pipeline = start(&ledger, PipelineConfig::default());

    let mut sub = pipeline.subscribe().unwrap();
    sub.recv().await.unwrap();
    assert_eq!(ledger.live_subscriptions(), 3);

    drop(sub);
    settle().await;
    assert_eq!(ledger.live_subscriptions(), 0);

    let mut sub = pipeline.subscribe().unwrap();
    assert_eq!(sub.recv().await.unwrap().len(), 1);
    assert_eq!(ledger.count_subscriptions(), 2);
    assert_eq!(ledger.subscribe_calls(KittyIndex(0), Field::Owner), 2);
}

#[tokio::test]
async fn test_session_kept_when_idle_release_disabled() {
    let ledger = MockLedger::new();
    ledger.push_kitty(owner("alice"), dna(1));
    let config = PipelineConfig {
        release_when_idle: false,
        ..PipelineConfig::default()
    };
    let pipeline = start(&ledger, config);

    let mut sub = pipeline.subscribe().unwrap();
    sub.recv().await.unwrap();
    drop(sub);
    settle().await;
    assert_eq!(ledger.live_subscriptions(), 3);

    let mut sub = pipeline.subscribe().unwrap();
    assert_eq!(sub.recv().await.unwrap().len(), 1);
    assert_eq!(ledger.count_subscriptions(), 1);

    pipeline.dispose().await;
    assert_eq!(ledger.live_subscriptions(), 0);
}

#[tokio::test]
async fn test_placeholder_policy_shows_pending_rows() {
    let ledger = MockLedger::new();
    ledger.set_count(2);
    ledger.set_owner(KittyIndex(1), Some(owner("bob")));
    ledger.set_dna(KittyIndex(1), Some(dna(1)));
    let pipeline = start(
        &ledger,
        PipelineConfig::default().with_policy(SnapshotPolicy::Placeholder),
    );
    let mut sub = pipeline.subscribe().unwrap();

    let mut snapshot = sub.recv().await.unwrap();
    while snapshot.ready_count() < 1 {
        snapshot = sub.recv().await.unwrap();
    }
    assert_eq!(snapshot.len(), 2);
    assert!(snapshot.entries()[0].kitty().is_none());
    assert_eq!(snapshot.get(KittyIndex(1)), Some(&kitty(1, "bob", 1)));
}

#[tokio::test]
async fn test_created_and_transferred_kitties_flow_into_list() {
    let ledger = MockLedger::new();
    let pipeline = start(&ledger, PipelineConfig::default());
    let mut sub = pipeline.subscribe().unwrap();
    assert!(sub.recv().await.unwrap().is_empty());

    let alice = owner("alice");
    let bob = owner("bob");
    create_kitty(&ledger, &alice).await.unwrap();
    let snapshot = sub.recv().await.unwrap();
    assert_eq!(snapshot.owned_by(&alice).count(), 1);

    transfer_kitty(&ledger, &snapshot, &alice, &bob, KittyIndex(0))
        .await
        .unwrap();
    let snapshot = sub.recv().await.unwrap();
    assert_eq!(snapshot.owned_by(&alice).count(), 0);
    assert_eq!(snapshot.owned_by(&bob).count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_lookup_reported_once() {
    let ledger = MockLedger::new();
    ledger.set_count(1);
    ledger.set_owner(KittyIndex(0), Some(owner("alice")));
    let config = PipelineConfig::default().with_stall_timeout(Duration::from_secs(2));
    let pipeline = start(&ledger, config);
    let mut errors = pipeline.subscribe_errors();
    let mut sub = pipeline.subscribe().unwrap();
    assert!(sub.recv().await.unwrap().is_empty());

    let error = errors.recv().await.unwrap();
    assert_matches!(
        &error,
        KittiesError::StalledLookup { index: KittyIndex(0), missing, waited_ms }
            if missing == &vec![Field::Dna] && *waited_ms >= 2000
    );

    let again = tokio::time::timeout(Duration::from_secs(30), errors.recv()).await;
    assert!(again.is_err());

    // A late answer still completes the record
    ledger.set_dna(KittyIndex(0), Some(dna(4)));
    assert_eq!(sub.recv().await.unwrap().len(), 1);
}
