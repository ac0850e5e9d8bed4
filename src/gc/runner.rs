//! One-shot collection for operator tooling.

use super::collector::{GcOutcome, RetryMode};
use super::metrics::GcMetrics;
use super::scheduler::run_tick;
use super::target::GcTarget;
use crate::Result;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Runs a single collection, bounded by `timeout`.
///
/// There are no internal retries: the first failure is returned exactly as
/// the datastore produced it, so a CLI can report it and exit non-zero.
/// Metrics and the completion marker are updated the same way the
/// background collector updates them.
///
/// # Errors
///
/// - [`crate::Error::TimedOut`] if the collection does not finish within
///   `timeout`.
/// - [`crate::Error::NotReady`] if the datastore reports it is not ready.
/// - Any datastore error unchanged.
pub async fn run_garbage_collection<T>(
    target: &T,
    window: Duration,
    timeout: Duration,
    metrics: &GcMetrics,
) -> Result<GcOutcome>
where
    T: GcTarget + ?Sized,
{
    run_garbage_collection_until(target, window, timeout, metrics, &CancellationToken::new())
        .await
}

/// [`run_garbage_collection`] that stops early when `cancel` fires.
///
/// # Errors
///
/// As [`run_garbage_collection`], plus [`crate::Error::Cancelled`] once
/// `cancel` fires, even in the middle of a datastore call.
pub async fn run_garbage_collection_until<T>(
    target: &T,
    window: Duration,
    timeout: Duration,
    metrics: &GcMetrics,
    cancel: &CancellationToken,
) -> Result<GcOutcome>
where
    T: GcTarget + ?Sized,
{
    info!(window = ?window, timeout = ?timeout, "running one-shot garbage collection");
    run_tick(target, window, timeout, &RetryMode::Never, metrics, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::gc::testing::{FailureMode, FakeGcTarget};

    #[tokio::test]
    async fn test_success_reports_outcome() {
        let target = FakeGcTarget::new(FailureMode::Never).with_deletions(4);
        let metrics = GcMetrics::new();

        let outcome = run_garbage_collection(
            &target,
            Duration::from_secs(1),
            Duration::from_secs(5),
            &metrics,
        )
        .await
        .expect("one-shot collection should succeed");

        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.counts.relationships, 4);
        assert!(target.has_gc_run());
        assert_eq!(metrics.snapshot().deleted.relationships, 4);
    }

    #[tokio::test]
    async fn test_failure_is_returned_unchanged() {
        let target = FakeGcTarget::new(FailureMode::Always);
        let metrics = GcMetrics::new();

        let err = run_garbage_collection(
            &target,
            Duration::from_secs(1),
            Duration::from_secs(5),
            &metrics,
        )
        .await
        .err();

        assert!(matches!(
            err,
            Some(Error::Backend { ref operation, .. }) if operation == "delete_before_tx"
        ));
        assert_eq!(target.stats().delete_before_tx_calls, 1);
        assert_eq!(metrics.failures(), 1);
    }

    #[tokio::test]
    async fn test_slow_datastore_times_out() {
        let target =
            FakeGcTarget::new(FailureMode::Never).with_delete_delay(Duration::from_secs(5));
        let metrics = GcMetrics::new();

        let err = run_garbage_collection(
            &target,
            Duration::from_secs(1),
            Duration::from_millis(20),
            &metrics,
        )
        .await
        .err();

        assert!(matches!(err, Some(Error::TimedOut { .. })));
        assert_eq!(metrics.snapshot().timeouts, 1);
        assert!(!target.has_gc_run());
    }

    #[tokio::test]
    async fn test_cancel_stops_in_flight_delete() {
        let target =
            FakeGcTarget::new(FailureMode::Never).with_delete_delay(Duration::from_secs(30));
        let metrics = GcMetrics::new();
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = run_garbage_collection_until(
            &target,
            Duration::from_secs(1),
            Duration::from_secs(60),
            &metrics,
            &cancel,
        )
        .await
        .err();

        assert!(matches!(err, Some(Error::Cancelled)));
        assert_eq!(target.stats().delete_before_tx_calls, 1);
        assert_eq!(metrics.snapshot().timeouts, 0);
        assert!(!target.has_gc_run());
    }
}
