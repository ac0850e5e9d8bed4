//! In-memory [`GcTarget`] for exercising the collector.
//!
//! Every call to `tx_id_before` hands out the next revision (`1`, `2`, ...),
//! so each collection attempt sees a fresh watermark. [`FailureMode`] picks
//! which watermarks make `delete_before_tx` fail.
//!
//! Test support only; hidden from the documented API.

use super::completion::GcCompletion;
use super::target::{DeletionCounts, GcTarget, ReadyState};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// When the fake's `delete_before_tx` fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureMode {
    /// Every delete succeeds.
    Never,
    /// Every delete fails.
    Always,
    /// Deletes fail for the listed watermarks only.
    OnRevisions(Vec<u64>),
}

impl FailureMode {
    fn fails_on(&self, revision: u64) -> bool {
        match self {
            Self::Never => false,
            Self::Always => true,
            Self::OnRevisions(revisions) => revisions.contains(&revision),
        }
    }
}

/// Calls observed by a [`FakeGcTarget`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FakeGcStats {
    /// `tx_id_before` calls.
    pub tx_id_before_calls: u64,
    /// `delete_before_tx` calls, failed ones included.
    pub delete_before_tx_calls: u64,
    /// Highest number of deletes that were in flight at the same time.
    pub max_concurrent_deletes: u64,
    /// `mark_gc_completed` calls.
    pub marked_complete: u64,
    /// Thresholds passed to `tx_id_before`, in call order.
    pub thresholds: Vec<DateTime<Utc>>,
}

/// Scriptable [`GcTarget`].
#[derive(Debug)]
pub struct FakeGcTarget {
    failure: FailureMode,
    fixed_now: Option<DateTime<Utc>>,
    deletions: u64,
    delete_delay: Option<Duration>,
    ready: AtomicBool,
    next_revision: AtomicU64,
    in_flight: AtomicU64,
    completion: GcCompletion,
    stats: Mutex<FakeGcStats>,
}

/// Counts one in-flight delete until dropped, including when the delete
/// future is dropped mid-sleep by a timeout or cancellation.
struct InFlight<'a>(&'a AtomicU64);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicU64) -> (Self, u64) {
        let in_flight = counter.fetch_add(1, Ordering::AcqRel) + 1;
        (Self(counter), in_flight)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl FakeGcTarget {
    /// Creates a ready fake that fails per `failure`.
    #[must_use]
    pub fn new(failure: FailureMode) -> Self {
        Self {
            failure,
            fixed_now: None,
            deletions: 0,
            delete_delay: None,
            ready: AtomicBool::new(true),
            next_revision: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
            completion: GcCompletion::new(),
            stats: Mutex::new(FakeGcStats::default()),
        }
    }

    /// Pins the datastore clock instead of following wall time.
    #[must_use]
    pub const fn with_fixed_now(mut self, now: DateTime<Utc>) -> Self {
        self.fixed_now = Some(now);
        self
    }

    /// Relationship rows reported by each successful delete.
    #[must_use]
    pub const fn with_deletions(mut self, relationships: u64) -> Self {
        self.deletions = relationships;
        self
    }

    /// Makes every delete take at least `delay`.
    #[must_use]
    pub const fn with_delete_delay(mut self, delay: Duration) -> Self {
        self.delete_delay = Some(delay);
        self
    }

    /// Flips the readiness probe.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    /// The completion marker backing [`GcTarget::has_gc_run`].
    #[must_use]
    pub fn completion(&self) -> GcCompletion {
        self.completion.clone()
    }

    /// Copies the observed calls.
    #[must_use]
    pub fn stats(&self) -> FakeGcStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn with_stats<R>(&self, f: impl FnOnce(&mut FakeGcStats) -> R) -> R {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut stats)
    }
}

#[async_trait]
impl GcTarget for FakeGcTarget {
    type Revision = u64;

    async fn ready_state(&self) -> Result<ReadyState> {
        if self.ready.load(Ordering::Acquire) {
            Ok(ReadyState::ready())
        } else {
            Ok(ReadyState::not_ready("fake datastore is not ready"))
        }
    }

    async fn now(&self) -> Result<DateTime<Utc>> {
        Ok(self.fixed_now.unwrap_or_else(Utc::now))
    }

    async fn tx_id_before(&self, threshold: DateTime<Utc>) -> Result<u64> {
        self.with_stats(|stats| {
            stats.tx_id_before_calls += 1;
            stats.thresholds.push(threshold);
        });
        Ok(self.next_revision.fetch_add(1, Ordering::AcqRel) + 1)
    }

    async fn delete_before_tx(&self, watermark: &u64) -> Result<DeletionCounts> {
        let (guard, in_flight) = InFlight::enter(&self.in_flight);
        self.with_stats(|stats| {
            stats.delete_before_tx_calls += 1;
            stats.max_concurrent_deletes = stats.max_concurrent_deletes.max(in_flight);
        });

        if let Some(delay) = self.delete_delay {
            tokio::time::sleep(delay).await;
        }
        drop(guard);

        if self.failure.fails_on(*watermark) {
            return Err(Error::backend(
                "delete_before_tx",
                format!("injected failure at revision {watermark}"),
            ));
        }
        Ok(DeletionCounts {
            relationships: self.deletions,
            ..DeletionCounts::default()
        })
    }

    fn has_gc_run(&self) -> bool {
        self.completion.has_run()
    }

    fn mark_gc_completed(&self) {
        self.with_stats(|stats| stats.marked_complete += 1);
        self.completion.mark(Utc::now());
    }

    fn reset_gc_completed(&self) {
        self.completion.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dropped_delete_leaves_no_phantom_in_flight() {
        let target =
            FakeGcTarget::new(FailureMode::Never).with_delete_delay(Duration::from_millis(10));

        let abandoned =
            tokio::time::timeout(Duration::from_millis(1), target.delete_before_tx(&1)).await;
        assert!(abandoned.is_err());

        target.delete_before_tx(&2).await.expect("delete should succeed");
        assert_eq!(target.stats().delete_before_tx_calls, 2);
        assert_eq!(target.stats().max_concurrent_deletes, 1);
    }

    #[tokio::test]
    async fn test_failure_mode_picks_revisions() {
        let target = FakeGcTarget::new(FailureMode::OnRevisions(vec![2]));

        assert!(target.delete_before_tx(&1).await.is_ok());
        let err = target.delete_before_tx(&2).await.err();
        assert!(matches!(
            err,
            Some(Error::Backend { ref cause, .. }) if cause == "injected failure at revision 2"
        ));
    }
}
