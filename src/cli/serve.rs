//! `revgc serve`: background collection until interrupted.

use crate::config::GcConfig;
use crate::gc::{GcCompletion, GcHealth, GcMetrics, GcTarget, HealthStatus, start_garbage_collector};
use crate::{Error, Result};
use chrono::Utc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Runs the background collector until `cancel` fires.
///
/// With background collection disabled this only waits for `cancel`.
/// Returns the collector's health at shutdown.
///
/// # Errors
///
/// Cancellation is the normal way out and is not an error. Nothing else
/// currently ends the loop.
pub async fn execute<T>(
    target: &T,
    config: &GcConfig,
    metrics: &GcMetrics,
    completion: &GcCompletion,
    cancel: &CancellationToken,
) -> Result<HealthStatus>
where
    T: GcTarget + ?Sized,
{
    if config.background_enabled() {
        match start_garbage_collector(target, &config.schedule(), metrics, cancel).await {
            Ok(()) | Err(Error::Cancelled) => {},
            Err(e) => return Err(e),
        }
    } else {
        info!("background garbage collection disabled, waiting for shutdown");
        cancel.cancelled().await;
    }

    let health = health_check(config).evaluate(completion, Utc::now());
    let snapshot = metrics.snapshot();
    if health.is_healthy() {
        info!(?health, ?snapshot, "garbage collector stopped");
    } else {
        warn!(?health, ?snapshot, "garbage collector stopped without a recent collection");
    }
    Ok(health)
}

/// Staleness bound: two full cycles.
#[must_use]
pub fn health_check(config: &GcConfig) -> GcHealth {
    let cycle = config.interval.saturating_add(config.max_operation_time);
    GcHealth::new(cycle.saturating_mul(2).max(Duration::from_secs(1)))
}
