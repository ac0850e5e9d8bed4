//! Collector metrics.
//!
//! [`GcMetrics`] is an explicitly passed handle. Every update lands in the
//! handle's own atomics (readable by tests and status output) and is
//! mirrored into the `metrics` facade for Prometheus scraping:
//!
//! Counters:
//! - `revgc_datastore_gc_failure_total`
//! - `revgc_datastore_gc_timeout_total`
//! - `revgc_datastore_gc_runs_total`
//! - `revgc_datastore_gc_relationships_total`
//! - `revgc_datastore_gc_transactions_total`
//! - `revgc_datastore_gc_namespaces_total`
//!
//! Histograms:
//! - `revgc_datastore_gc_duration_seconds`

use super::target::DeletionCounts;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Shared counters for one or more collectors.
#[derive(Debug, Clone, Default)]
pub struct GcMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    failures: AtomicU64,
    timeouts: AtomicU64,
    successes: AtomicU64,
    relationships: AtomicU64,
    transactions: AtomicU64,
    namespaces: AtomicU64,
}

/// Point-in-time copy of [`GcMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GcMetricsSnapshot {
    /// Failed attempts, timed-out ticks included.
    pub failures: u64,
    /// Ticks aborted by their max operation time.
    pub timeouts: u64,
    /// Successful collections.
    pub successes: u64,
    /// Rows deleted across all successful collections.
    pub deleted: DeletionCounts,
}

impl GcMetrics {
    /// Creates a handle with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one failed attempt.
    pub fn record_failure(&self) {
        self.inner.failures.fetch_add(1, Ordering::AcqRel);
        metrics::counter!("revgc_datastore_gc_failure_total").increment(1);
    }

    /// Records a tick aborted by its max operation time.
    ///
    /// A timeout is also counted as a failure.
    pub fn record_timeout(&self) {
        self.inner.timeouts.fetch_add(1, Ordering::AcqRel);
        metrics::counter!("revgc_datastore_gc_timeout_total").increment(1);
        self.record_failure();
    }

    /// Records a successful collection and what it removed.
    pub fn record_success(&self, counts: &DeletionCounts, duration: Duration) {
        self.inner.successes.fetch_add(1, Ordering::AcqRel);
        self.inner
            .relationships
            .fetch_add(counts.relationships, Ordering::AcqRel);
        self.inner
            .transactions
            .fetch_add(counts.transactions, Ordering::AcqRel);
        self.inner
            .namespaces
            .fetch_add(counts.namespaces, Ordering::AcqRel);

        metrics::counter!("revgc_datastore_gc_runs_total").increment(1);
        metrics::counter!("revgc_datastore_gc_relationships_total")
            .increment(counts.relationships);
        metrics::counter!("revgc_datastore_gc_transactions_total").increment(counts.transactions);
        metrics::counter!("revgc_datastore_gc_namespaces_total").increment(counts.namespaces);
        metrics::histogram!("revgc_datastore_gc_duration_seconds").record(duration.as_secs_f64());
    }

    /// Failed attempts so far.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.inner.failures.load(Ordering::Acquire)
    }

    /// Successful collections so far.
    #[must_use]
    pub fn successes(&self) -> u64 {
        self.inner.successes.load(Ordering::Acquire)
    }

    /// Copies all counters.
    #[must_use]
    pub fn snapshot(&self) -> GcMetricsSnapshot {
        GcMetricsSnapshot {
            failures: self.failures(),
            timeouts: self.inner.timeouts.load(Ordering::Acquire),
            successes: self.successes(),
            deleted: DeletionCounts {
                relationships: self.inner.relationships.load(Ordering::Acquire),
                transactions: self.inner.transactions.load(Ordering::Acquire),
                namespaces: self.inner.namespaces.load(Ordering::Acquire),
            },
        }
    }
}
