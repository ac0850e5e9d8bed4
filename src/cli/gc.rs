//! `revgc datastore gc`: one collection, then exit.

use super::output_error;
use crate::Result;
use crate::config::GcConfig;
use crate::gc::{GcMetrics, GcOutcome, GcTarget, run_garbage_collection_until};
use std::io::Write;
use tokio_util::sync::CancellationToken;

/// Runs a single collection with the configured window and max operation
/// time.
///
/// `config` should have background collection disabled
/// ([`GcConfig::without_background`]); only the one-shot run happens here.
///
/// # Errors
///
/// Returns the collection error unchanged, [`crate::Error::Cancelled`] if
/// `cancel` fires first, or an error if `out` cannot be written.
pub async fn execute<T, W>(
    target: &T,
    config: &GcConfig,
    metrics: &GcMetrics,
    cancel: &CancellationToken,
    out: &mut W,
) -> Result<GcOutcome>
where
    T: GcTarget + ?Sized,
    W: Write,
{
    writeln!(
        out,
        "Running garbage collection (window {:?}, max operation time {:?})...",
        config.window, config.max_operation_time
    )
    .map_err(|e| output_error(&e))?;

    let outcome = run_garbage_collection_until(
        target,
        config.window,
        config.max_operation_time,
        metrics,
        cancel,
    )
    .await?;

    writeln!(out, "{}", outcome.summary()).map_err(|e| output_error(&e))?;
    Ok(outcome)
}
