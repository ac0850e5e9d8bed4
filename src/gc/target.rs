//! Datastore capabilities required for garbage collection.

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Readiness reported by a datastore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadyState {
    /// Whether the datastore can serve collection requests.
    pub is_ready: bool,
    /// Human readable detail, mostly useful when not ready.
    pub message: String,
}

impl ReadyState {
    /// A ready datastore.
    #[must_use]
    pub fn ready() -> Self {
        Self {
            is_ready: true,
            message: "ready".to_string(),
        }
    }

    /// A datastore that is not ready, with the reason.
    #[must_use]
    pub fn not_ready(message: impl Into<String>) -> Self {
        Self {
            is_ready: false,
            message: message.into(),
        }
    }
}

/// Rows removed by one `delete_before_tx` call, by category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeletionCounts {
    /// Relationship rows whose deletion precedes the watermark.
    pub relationships: u64,
    /// Transaction (revision) records preceding the watermark.
    pub transactions: u64,
    /// Superseded namespace definitions.
    pub namespaces: u64,
}

impl DeletionCounts {
    /// Total rows removed across all categories.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.relationships
            .saturating_add(self.transactions)
            .saturating_add(self.namespaces)
    }

    /// Returns `true` if nothing was removed.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Adds another set of counts into this one.
    pub const fn merge(&mut self, other: &Self) {
        self.relationships = self.relationships.saturating_add(other.relationships);
        self.transactions = self.transactions.saturating_add(other.transactions);
        self.namespaces = self.namespaces.saturating_add(other.namespaces);
    }
}

impl fmt::Display for DeletionCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "relationships={} transactions={} namespaces={}",
            self.relationships, self.transactions, self.namespaces
        )
    }
}

/// A datastore that can be garbage collected.
///
/// The collector guarantees at most one in-flight `delete_before_tx` per
/// collector instance. Several collectors (one per server replica) may still
/// target the same datastore concurrently, so deletes must tolerate overlap.
#[async_trait]
pub trait GcTarget: Send + Sync {
    /// Opaque, totally ordered revision identifier.
    type Revision: Ord + Clone + fmt::Display + fmt::Debug + Send + Sync;

    /// Non-blocking readiness probe.
    async fn ready_state(&self) -> Result<ReadyState>;

    /// The datastore's authoritative current time.
    async fn now(&self) -> Result<DateTime<Utc>>;

    /// Highest revision committed at or before `threshold`.
    async fn tx_id_before(&self, threshold: DateTime<Utc>) -> Result<Self::Revision>;

    /// Deletes all superseded data strictly preceding `watermark`.
    ///
    /// Either the whole deletion happened and its counts are returned, or an
    /// error is returned.
    async fn delete_before_tx(&self, watermark: &Self::Revision) -> Result<DeletionCounts>;

    /// Returns `true` if a collection has completed since the last reset.
    fn has_gc_run(&self) -> bool;

    /// Records that a collection cycle succeeded.
    fn mark_gc_completed(&self);

    /// Clears the completion marker.
    fn reset_gc_completed(&self);
}
