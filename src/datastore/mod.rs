//! Datastore backends.
//!
//! A backend becomes collectable by implementing [`crate::gc::GcTarget`].
//! Backends that can fix their own bookkeeping after a restore or a bad
//! migration also implement [`Repairable`], which the
//! `revgc datastore repair` command drives.

mod clock;
mod memory;

pub use clock::{Clock, ManualClock, SystemClock};
pub use memory::{MemoryDatastore, Relationship, Revision};

use crate::Result;
use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// A named repair a datastore knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RepairOperation {
    /// Name used on the command line.
    pub name: &'static str,
    /// One line describing what the repair fixes.
    pub description: &'static str,
}

/// What a repair changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    /// The operation that ran.
    pub operation: String,
    /// Records fixed. Zero means there was nothing to repair.
    pub repaired: u64,
}

/// A datastore with operator-invoked repairs.
#[async_trait]
pub trait Repairable: Send + Sync {
    /// Repairs this datastore supports.
    fn repair_operations(&self) -> Vec<RepairOperation>;

    /// Runs the repair called `operation`.
    ///
    /// With `output_progress` set, progress is logged as the repair runs.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::InvalidInput`] for an unknown operation.
    /// - [`crate::Error::Cancelled`] if `cancel` fires before the repair
    ///   starts.
    async fn repair(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        output_progress: bool,
    ) -> Result<RepairReport>;
}
