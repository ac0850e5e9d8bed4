//! # revgc
//!
//! Revision garbage collector for MVCC relationship stores.
//!
//! Every write to an MVCC relationship store creates a new immutable revision.
//! Reads at historical snapshots stay possible for as long as the superseded
//! revisions are kept, which also means storage grows without bound unless
//! they are periodically purged. revgc is the background engine that does
//! the purging:
//!
//! - computes a safe deletion watermark from the datastore's own clock
//! - asks the datastore to delete everything that precedes the watermark
//! - retries transient failures with bounded exponential backoff
//! - exposes failure counters and a completion marker for health checks
//!
//! ## Example
//!
//! ```rust,ignore
//! use revgc::datastore::MemoryDatastore;
//! use revgc::gc::{GcMetrics, GcSchedule, start_garbage_collector};
//! use tokio_util::sync::CancellationToken;
//!
//! let datastore = MemoryDatastore::new();
//! let cancel = CancellationToken::new();
//! let schedule = GcSchedule::new(interval, window, timeout);
//!
//! start_garbage_collector(&datastore, &schedule, &GcMetrics::new(), &cancel).await?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use std::time::Duration;
use thiserror::Error as ThisError;

// Module declarations
pub mod cli;
pub mod config;
pub mod datastore;
pub mod gc;
pub mod observability;

// Re-exports for convenience
pub use config::{GcConfig, RevgcConfig};
pub use datastore::{MemoryDatastore, Repairable};
pub use gc::{
    DeletionCounts, GcCompletion, GcMetrics, GcOutcome, GcSchedule, GcTarget, ReadyState,
    run_garbage_collection, start_garbage_collector,
};

/// Error type for revgc operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When | Retried by the collector |
/// |---------|-------------|--------------------------|
/// | `InvalidInput` | Malformed config values, unknown repair operations | no |
/// | `OperationFailed` | Config file IO, observability setup | no |
/// | `NotReady` | Datastore readiness probe reports not ready | yes |
/// | `Backend` | `now`, `tx_id_before` or `delete_before_tx` failed | yes |
/// | `TimedOut` | A collection tick exceeded its max operation time | no |
/// | `Cancelled` | The cancellation token fired | never |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - A duration string in the config cannot be parsed
    /// - The retention window cannot be subtracted from the reference time
    /// - A repair operation name is not known to the datastore
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A non-datastore operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// The datastore reported that it is not ready to be collected.
    #[error("datastore not ready: {message}")]
    NotReady {
        /// Readiness message reported by the datastore.
        message: String,
    },

    /// A datastore call made during collection failed.
    #[error("datastore operation '{operation}' failed: {cause}")]
    Backend {
        /// The datastore operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// A collection tick ran longer than its max operation time.
    #[error("garbage collection exceeded max operation time of {timeout:?}")]
    TimedOut {
        /// The configured per-tick limit.
        timeout: Duration,
    },

    /// Collection was cancelled.
    #[error("garbage collection cancelled")]
    Cancelled,
}

impl Error {
    /// Creates a `Backend` error for the named datastore operation.
    pub fn backend(operation: impl Into<String>, cause: impl ToString) -> Self {
        Self::Backend {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }

    /// Returns `true` if the collector may retry after this error.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::NotReady { .. } | Self::Backend { .. })
    }

    /// Returns `true` if this error is a cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result type alias for revgc operations.
pub type Result<T> = std::result::Result<T, Error>;
