//! Background collection loop.

use super::backoff::BackoffConfig;
use super::collector::{GcOutcome, RetryMode, collect_once, wait};
use super::metrics::GcMetrics;
use super::target::GcTarget;
use crate::{Error, Result};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Timing for the background collector.
#[derive(Debug, Clone, PartialEq)]
pub struct GcSchedule {
    /// Wait between the end of one tick and the start of the next.
    pub interval: Duration,
    /// Minimum age of data before it may be deleted.
    pub window: Duration,
    /// Upper bound for one tick, internal retries included.
    pub timeout: Duration,
    /// Upper bound for the backoff sequence inside one tick.
    ///
    /// `None` lets the backoff grow until `timeout` ends the tick.
    pub max_elapsed_time: Option<Duration>,
}

impl GcSchedule {
    /// Creates a schedule with an unbounded backoff sequence.
    #[must_use]
    pub const fn new(interval: Duration, window: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            window,
            timeout,
            max_elapsed_time: None,
        }
    }

    /// Sets the backoff sequence bound.
    #[must_use]
    pub const fn with_max_elapsed_time(mut self, max_elapsed_time: Option<Duration>) -> Self {
        self.max_elapsed_time = max_elapsed_time;
        self
    }

    /// Backoff used inside each tick; starts at the scheduling interval.
    #[must_use]
    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig::new(self.interval).with_max_elapsed_time(self.max_elapsed_time)
    }
}

/// Runs garbage collection every `schedule.interval` until `cancel` fires.
///
/// Each tick is one [`collect_once`] bounded by `schedule.timeout`. Tick
/// failures are logged and counted, never returned; the next tick starts
/// a fresh backoff sequence after the regular interval.
///
/// # Errors
///
/// Returns [`Error::Cancelled`] once `cancel` fires. Nothing else ends the
/// loop.
pub async fn start_garbage_collector<T>(
    target: &T,
    schedule: &GcSchedule,
    metrics: &GcMetrics,
    cancel: &CancellationToken,
) -> Result<()>
where
    T: GcTarget + ?Sized,
{
    let retry = RetryMode::Backoff(schedule.backoff());

    info!(
        interval = ?schedule.interval,
        window = ?schedule.window,
        timeout = ?schedule.timeout,
        "datastore garbage collection worker started"
    );

    loop {
        if wait(schedule.interval, cancel).await.is_err() {
            info!("shutting down datastore garbage collection worker");
            return Err(Error::Cancelled);
        }

        debug!(
            interval = ?schedule.interval,
            window = ?schedule.window,
            timeout = ?schedule.timeout,
            "running garbage collection worker"
        );

        let tick = run_tick(
            target,
            schedule.window,
            schedule.timeout,
            &retry,
            metrics,
            cancel,
        );
        match tick.await {
            Ok(_) => {
                debug!(
                    next_run_in = ?schedule.interval,
                    "datastore garbage collection scheduled for next run"
                );
            },
            Err(Error::Cancelled) => {
                info!("shutting down datastore garbage collection worker");
                return Err(Error::Cancelled);
            },
            Err(err) => {
                warn!(
                    error = %err,
                    next_attempt_in = ?schedule.interval,
                    "garbage collection tick failed"
                );
            },
        }
    }
}

/// One attempt bounded by `timeout`.
pub(super) async fn run_tick<T>(
    target: &T,
    window: Duration,
    timeout: Duration,
    retry: &RetryMode,
    metrics: &GcMetrics,
    cancel: &CancellationToken,
) -> Result<GcOutcome>
where
    T: GcTarget + ?Sized,
{
    let attempt = collect_once(target, window, retry, metrics, cancel);
    match tokio::time::timeout(timeout, attempt).await {
        Ok(result) => result,
        Err(_elapsed) => {
            metrics.record_timeout();
            Err(Error::TimedOut { timeout })
        },
    }
}
