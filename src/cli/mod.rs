//! CLI command implementations.
//!
//! Each submodule implements one `revgc` command. Commands write their
//! user-facing output to the writer they are given and report failures as
//! [`crate::Error`]; the binary maps errors to a non-zero exit code.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `datastore gc` | Run one garbage collection and exit |
//! | `datastore repair [OPERATION]` | List or run datastore repairs |
//! | `serve` | Run the background collector until interrupted |
//!
//! # Example Usage
//!
//! ```bash
//! # Collect everything older than the configured window, once
//! revgc datastore gc
//!
//! # Show available repairs, then run one
//! revgc datastore repair
//! revgc datastore repair transaction-ids
//!
//! # Run the collector with Prometheus metrics exposed
//! REVGC_METRICS_ENABLED=true revgc serve
//! ```

pub mod gc;
pub mod repair;
pub mod serve;

use crate::config::{DatastoreConfig, DatastoreEngine};
use crate::datastore::MemoryDatastore;
use crate::{Error, Result};
use std::sync::Arc;

/// Opens the datastore selected in `config`.
#[must_use]
pub fn open_datastore(config: &DatastoreConfig) -> Arc<MemoryDatastore> {
    match config.engine {
        DatastoreEngine::Memory => Arc::new(MemoryDatastore::new()),
    }
}

/// Maps a failed write to the command's output.
fn output_error(e: &std::io::Error) -> Error {
    Error::OperationFailed {
        operation: "write_output".to_string(),
        cause: e.to_string(),
    }
}
