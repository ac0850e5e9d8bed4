//! Garbage collection engine.
//!
//! This module deletes superseded revisions from an MVCC datastore. The
//! datastore is abstracted behind [`GcTarget`]; anything that can report its
//! readiness, its own clock, the revision visible at a point in time, and can
//! delete data preceding a revision can be collected.
//!
//! # Overview
//!
//! ```text
//! start_garbage_collector ──tick every interval──▶ collect_once ──▶ GcTarget
//!                                                       │
//! run_garbage_collection ──single tick──────────────────┘
//!                                                  BackoffPolicy between
//!                                                  failed tries
//! ```
//!
//! The watermark is always `tx_id_before(target.now() - window)`. The
//! collector never uses its own wall clock for this, so revisions stamped by
//! the datastore and the threshold computed here share one clock.
//!
//! # Retry behaviour
//!
//! A failed attempt is retried after an exponentially growing delay until
//! the backoff policy's max elapsed time is spent. If the policy is exhausted
//! before it ever granted a delay (a max elapsed time smaller than the
//! scheduling interval), the collector keeps retrying without delay until the tick
//! times out or is cancelled.
//!
//! # Example
//!
//! ```rust,ignore
//! use revgc::gc::{GcMetrics, run_garbage_collection};
//!
//! let metrics = GcMetrics::new();
//! let outcome = run_garbage_collection(&datastore, window, timeout, &metrics).await?;
//! println!("{}", outcome.summary());
//! ```

pub mod backoff;
mod collector;
mod completion;
mod metrics;
mod runner;
mod scheduler;
mod target;
#[doc(hidden)]
pub mod testing;

pub use backoff::{BackoffConfig, BackoffPolicy, BackoffStep, DEFAULT_MULTIPLIER, MAX_GC_INTERVAL};
pub use collector::{GcOutcome, RetryMode, collect_once};
pub use completion::{GcCompletion, GcHealth, HealthStatus};
pub use metrics::{GcMetrics, GcMetricsSnapshot};
pub use runner::{run_garbage_collection, run_garbage_collection_until};
pub use scheduler::{GcSchedule, start_garbage_collector};
pub use target::{DeletionCounts, GcTarget, ReadyState};
