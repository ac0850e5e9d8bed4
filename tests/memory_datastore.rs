//! Garbage collection against the in-memory MVCC datastore.
#![allow(
    clippy::panic,
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::doc_markdown
)]

use chrono::{DateTime, TimeDelta, Utc};
use proptest::prelude::*;
use revgc::datastore::{Clock, ManualClock, MemoryDatastore, Relationship, Revision};
use revgc::gc::{GcMetrics, GcSchedule, GcTarget, start_garbage_collector};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn start() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp")
}

fn datastore() -> (Arc<ManualClock>, MemoryDatastore) {
    let clock = Arc::new(ManualClock::new(start()));
    let datastore = MemoryDatastore::with_clock(Arc::clone(&clock) as Arc<dyn Clock>);
    (clock, datastore)
}

fn member(group: u8, user: u8) -> Relationship {
    Relationship::new(format!("group:{group}"), "member", format!("user:{user}"))
}

#[tokio::test]
async fn window_protects_recent_revisions() {
    let (clock, datastore) = datastore();
    let old = datastore.write_relationships(&[member(1, 1)]).expect("write");
    clock.advance(TimeDelta::hours(1));
    let middle = datastore.delete_relationships(&[member(1, 1)]).expect("delete");
    clock.advance(TimeDelta::hours(1));
    let recent = datastore.write_relationships(&[member(1, 2)]).expect("write");
    clock.advance(TimeDelta::hours(1));

    // The threshold falls between `middle` and `recent`.
    let now = datastore.now().await.expect("now");
    let watermark = datastore
        .tx_id_before(now - TimeDelta::minutes(90))
        .await
        .expect("watermark");
    assert_eq!(watermark, middle);

    datastore.delete_before_tx(&watermark).await.expect("delete");
    assert!(datastore.relationships_at(old).is_err());
    assert!(datastore.relationships_at(middle).expect("readable").is_empty());
    assert_eq!(
        datastore.relationships_at(recent).expect("readable"),
        vec![member(1, 2)]
    );
}

#[tokio::test]
async fn background_collector_drains_history() {
    let (clock, datastore) = datastore();
    for user in 0..10 {
        datastore.write_relationships(&[member(1, user)]).expect("write");
        datastore.delete_relationships(&[member(1, user)]).expect("delete");
    }
    let head = datastore.write_relationships(&[member(2, 0)]).expect("write");
    clock.advance(TimeDelta::days(2));

    let datastore = Arc::new(datastore);
    let metrics = GcMetrics::new();
    let cancel = CancellationToken::new();
    let schedule = GcSchedule::new(
        Duration::from_millis(5),
        Duration::from_secs(24 * 60 * 60),
        Duration::from_secs(5),
    );

    let task = {
        let datastore = Arc::clone(&datastore);
        let metrics = metrics.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            start_garbage_collector(&*datastore, &schedule, &metrics, &cancel).await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();
    let _ = task.await;

    let snapshot = metrics.snapshot();
    assert!(snapshot.successes >= 1);
    assert_eq!(snapshot.failures, 0);
    assert_eq!(snapshot.deleted.relationships, 10);
    assert_eq!(snapshot.deleted.transactions, 20);
    assert_eq!(datastore.gc_floor().expect("floor"), head);
    assert_eq!(
        datastore.relationships_at(head).expect("readable"),
        vec![member(2, 0)]
    );
    assert!(datastore.completion().has_run());
}

#[derive(Debug, Clone)]
enum Op {
    Write(u8, u8),
    Delete(u8, u8),
    Namespace(u8),
    Advance(u16),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..3, 0u8..4).prop_map(|(g, u)| Op::Write(g, u)),
        (0u8..3, 0u8..4).prop_map(|(g, u)| Op::Delete(g, u)),
        (0u8..2).prop_map(Op::Namespace),
        (1u16..180).prop_map(Op::Advance),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn collection_preserves_snapshots_at_and_after_watermark(
        ops in prop::collection::vec(op(), 1..40),
        window_minutes in 0u16..600,
    ) {
        let (clock, datastore) = datastore();
        let mut committed: BTreeMap<Revision, DateTime<Utc>> = BTreeMap::new();

        for op in ops {
            let revision = match op {
                Op::Write(g, u) => {
                    Some(datastore.write_relationships(&[member(g, u)]).expect("write"))
                },
                Op::Delete(g, u) => {
                    Some(datastore.delete_relationships(&[member(g, u)]).expect("delete"))
                },
                Op::Namespace(n) => Some(
                    datastore
                        .write_namespace(&format!("ns{n}"), &format!("at {}", clock.now()))
                        .expect("namespace"),
                ),
                Op::Advance(minutes) => {
                    clock.advance(TimeDelta::minutes(i64::from(minutes)));
                    None
                },
            };
            if let Some(revision) = revision {
                committed.insert(revision, clock.now());
            }
        }

        let before: BTreeMap<Revision, Vec<Relationship>> = committed
            .keys()
            .map(|rev| (*rev, datastore.relationships_at(*rev).expect("readable")))
            .collect();

        let now = clock.now();
        let threshold = now - TimeDelta::minutes(i64::from(window_minutes));
        let watermark = tokio_test::block_on(datastore.tx_id_before(threshold)).expect("watermark");
        if let Some(committed_at) = committed.get(&watermark) {
            prop_assert!(*committed_at <= threshold);
        } else {
            prop_assert_eq!(watermark, Revision(0));
        }

        tokio_test::block_on(datastore.delete_before_tx(&watermark)).expect("delete");

        for (rev, relationships) in before {
            if rev >= watermark {
                prop_assert_eq!(datastore.relationships_at(rev).expect("readable"), relationships);
            } else {
                prop_assert!(datastore.relationships_at(rev).is_err());
            }
        }
    }
}
