//! Completion marker and staleness checks.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

const NEVER: i64 = i64::MIN;

/// Shared "last successful collection" marker.
///
/// Cloning yields another handle to the same marker. The timestamp only
/// moves forward until [`GcCompletion::reset`] is called, and reads never
/// observe a partially written value.
#[derive(Debug, Clone)]
pub struct GcCompletion {
    inner: Arc<CompletionInner>,
}

#[derive(Debug)]
struct CompletionInner {
    last_completed_ms: AtomicI64,
    completions: AtomicU64,
}

impl GcCompletion {
    /// Creates a marker in the "never run" state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CompletionInner {
                last_completed_ms: AtomicI64::new(NEVER),
                completions: AtomicU64::new(0),
            }),
        }
    }

    /// Records a completion at `at`.
    pub fn mark(&self, at: DateTime<Utc>) {
        self.inner
            .last_completed_ms
            .fetch_max(at.timestamp_millis(), Ordering::AcqRel);
        self.inner.completions.fetch_add(1, Ordering::AcqRel);
    }

    /// Clears the marker so health checks see a collector that never ran.
    pub fn reset(&self) {
        self.inner.last_completed_ms.store(NEVER, Ordering::Release);
    }

    /// Returns `true` if a completion was recorded since the last reset.
    #[must_use]
    pub fn has_run(&self) -> bool {
        self.inner.last_completed_ms.load(Ordering::Acquire) != NEVER
    }

    /// Time of the most recent completion.
    #[must_use]
    pub fn last_completed(&self) -> Option<DateTime<Utc>> {
        match self.inner.last_completed_ms.load(Ordering::Acquire) {
            NEVER => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }

    /// Total completions recorded over the lifetime of the marker.
    #[must_use]
    pub fn completions(&self) -> u64 {
        self.inner.completions.load(Ordering::Acquire)
    }
}

impl Default for GcCompletion {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a health evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HealthStatus {
    /// Collection completed within the staleness bound.
    Healthy,
    /// No collection has completed yet (or the marker was reset).
    NeverRun,
    /// The last completion is older than the staleness bound.
    Stale {
        /// Age of the last completion in seconds.
        age_secs: i64,
    },
}

impl HealthStatus {
    /// Returns `true` for [`HealthStatus::Healthy`].
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Staleness check used by readiness probes.
#[derive(Debug, Clone, Copy)]
pub struct GcHealth {
    max_staleness: Duration,
}

impl GcHealth {
    /// Creates a check that tolerates completions up to `max_staleness` old.
    #[must_use]
    pub const fn new(max_staleness: Duration) -> Self {
        Self { max_staleness }
    }

    /// Evaluates `completion` against `now`.
    #[must_use]
    pub fn evaluate(&self, completion: &GcCompletion, now: DateTime<Utc>) -> HealthStatus {
        let Some(last) = completion.last_completed() else {
            return HealthStatus::NeverRun;
        };

        let age = now.signed_duration_since(last);
        match age.to_std() {
            Ok(elapsed) if elapsed > self.max_staleness => HealthStatus::Stale {
                age_secs: age.num_seconds(),
            },
            _ => HealthStatus::Healthy,
        }
    }
}
