//! Single garbage-collection attempt with internal retries.

use super::backoff::{BackoffConfig, BackoffStep};
use super::metrics::GcMetrics;
use super::target::{DeletionCounts, GcTarget};
use crate::{Error, Result};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// How failed tries inside one attempt are handled.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryMode {
    /// Surface the first failure unchanged.
    Never,
    /// Retry per the given backoff configuration.
    Backoff(BackoffConfig),
}

/// What a successful attempt did.
#[derive(Debug, Clone, Serialize)]
pub struct GcOutcome {
    /// The watermark passed to `delete_before_tx`, rendered for display.
    pub watermark: String,
    /// The datastore's time the watermark was derived from.
    pub reference_time: DateTime<Utc>,
    /// Rows removed.
    pub counts: DeletionCounts,
    /// Tries made, the successful one included.
    pub attempts: u32,
    /// Wall time of the whole attempt, retries included.
    pub duration: Duration,
}

impl GcOutcome {
    /// Returns a human-readable summary.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.counts.is_empty() {
            format!(
                "Nothing to collect before revision {} ({} attempts in {}ms)",
                self.watermark,
                self.attempts,
                self.duration.as_millis()
            )
        } else {
            format!(
                "Collected {} rows before revision {} ({}) in {}ms",
                self.counts.total(),
                self.watermark,
                self.counts,
                self.duration.as_millis()
            )
        }
    }
}

/// Runs one garbage-collection attempt against `target`.
///
/// A try polls readiness, derives the watermark from the datastore clock
/// minus `window`, and deletes everything preceding it. Failed tries are
/// counted in `metrics` and retried per `retry`. Every backend call and every
/// wait observes `cancel`.
///
/// # Errors
///
/// - [`Error::Cancelled`] as soon as `cancel` fires.
/// - The last try's error when retries are disabled or the backoff policy
///   is exhausted.
/// - Non-retryable errors (for example an unrepresentable window) unchanged.
#[instrument(
    name = "revgc.gc.collect_once",
    skip_all,
    fields(component = "gc", window = ?window)
)]
pub async fn collect_once<T>(
    target: &T,
    window: Duration,
    retry: &RetryMode,
    metrics: &GcMetrics,
    cancel: &CancellationToken,
) -> Result<GcOutcome>
where
    T: GcTarget + ?Sized,
{
    let start = Instant::now();
    let mut backoff = match retry {
        RetryMode::Never => None,
        RetryMode::Backoff(config) => Some(config.policy()),
    };
    let mut attempts: u32 = 0;

    loop {
        attempts = attempts.saturating_add(1);
        let err = match try_collect(target, window, cancel).await {
            Ok((watermark, reference_time, counts)) => {
                let duration = start.elapsed();
                target.mark_gc_completed();
                metrics.record_success(&counts, duration);
                info!(
                    highest_tx_id = %watermark,
                    now = %reference_time,
                    attempts,
                    duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                    collected = %counts,
                    "datastore garbage collection completed successfully"
                );
                return Ok(GcOutcome {
                    watermark: watermark.to_string(),
                    reference_time,
                    counts,
                    attempts,
                    duration,
                });
            },
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(err) => err,
        };

        metrics.record_failure();
        if !err.is_retryable() {
            return Err(err);
        }
        let Some(policy) = backoff.as_mut() else {
            return Err(err);
        };

        match policy.next_delay() {
            BackoffStep::Retry(delay) => {
                warn!(
                    error = %err,
                    attempt = attempts,
                    next_attempt_in = ?delay,
                    "error attempting to perform garbage collection"
                );
                wait(delay, cancel).await?;
            },
            BackoffStep::Exhausted if policy.granted() == 0 => {
                // Max elapsed time is below the initial interval.
                debug!(
                    error = %err,
                    attempt = attempts,
                    "backoff exhausted immediately, retrying without delay"
                );
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                tokio::task::yield_now().await;
            },
            BackoffStep::Exhausted => {
                warn!(
                    error = %err,
                    attempts,
                    elapsed = ?policy.elapsed(),
                    "garbage collection backoff exhausted"
                );
                return Err(err);
            },
        }
    }
}

async fn try_collect<T>(
    target: &T,
    window: Duration,
    cancel: &CancellationToken,
) -> Result<(T::Revision, DateTime<Utc>, DeletionCounts)>
where
    T: GcTarget + ?Sized,
{
    let ready = cancellable(cancel, target.ready_state()).await?;
    if !ready.is_ready {
        return Err(Error::NotReady {
            message: ready.message,
        });
    }

    let now = cancellable(cancel, target.now()).await?;
    let threshold = watermark_threshold(now, window)?;
    let watermark = cancellable(cancel, target.tx_id_before(threshold)).await?;
    debug!(
        threshold = %threshold,
        watermark = %watermark,
        "computed garbage collection watermark"
    );

    let counts = cancellable(cancel, target.delete_before_tx(&watermark)).await?;
    Ok((watermark, now, counts))
}

/// `now - window`, rejecting windows that do not fit the datastore clock.
fn watermark_threshold(now: DateTime<Utc>, window: Duration) -> Result<DateTime<Utc>> {
    TimeDelta::from_std(window)
        .ok()
        .and_then(|delta| now.checked_sub_signed(delta))
        .ok_or_else(|| {
            Error::InvalidInput(format!(
                "gc window {window:?} cannot be subtracted from {now}"
            ))
        })
}

async fn cancellable<F, R>(cancel: &CancellationToken, fut: F) -> Result<R>
where
    F: Future<Output = Result<R>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}

/// Sleeps for `delay` unless `cancel` fires first.
pub(super) async fn wait(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Error::Cancelled),
        () = tokio::time::sleep(delay) => Ok(()),
    }
}
