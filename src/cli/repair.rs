//! `revgc datastore repair [OPERATION]`.

use super::output_error;
use crate::Result;
use crate::datastore::{RepairReport, Repairable};
use std::io::Write;
use tokio_util::sync::CancellationToken;

/// Lists repairs when `operation` is `None`, otherwise runs it.
///
/// # Errors
///
/// Returns the repair error unchanged, or an error if `out` cannot be
/// written.
pub async fn execute<R, W>(
    datastore: &R,
    operation: Option<&str>,
    cancel: &CancellationToken,
    out: &mut W,
) -> Result<Option<RepairReport>>
where
    R: Repairable + ?Sized,
    W: Write,
{
    let Some(operation) = operation else {
        writeln!(out, "Available repair operations:").map_err(|e| output_error(&e))?;
        for op in datastore.repair_operations() {
            writeln!(out, "\t{}: {}", op.name, op.description).map_err(|e| output_error(&e))?;
        }
        return Ok(None);
    };

    writeln!(out, "Running repair '{operation}'...").map_err(|e| output_error(&e))?;
    let report = datastore.repair(operation, cancel, true).await?;
    writeln!(
        out,
        "Repair '{}' completed, {} records repaired",
        report.operation, report.repaired
    )
    .map_err(|e| output_error(&e))?;

    Ok(Some(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::datastore::MemoryDatastore;

    #[tokio::test]
    async fn test_lists_operations_without_argument() {
        let datastore = MemoryDatastore::new();
        let mut out = Vec::new();

        let report = execute(&datastore, None, &CancellationToken::new(), &mut out)
            .await
            .expect("listing should succeed");

        assert!(report.is_none());
        let printed = String::from_utf8(out).expect("utf8 output");
        assert!(printed.contains("transaction-ids"));
    }

    #[tokio::test]
    async fn test_runs_named_operation() {
        let datastore = MemoryDatastore::new();
        let mut out = Vec::new();

        let report = execute(
            &datastore,
            Some("transaction-ids"),
            &CancellationToken::new(),
            &mut out,
        )
        .await
        .expect("repair should succeed");

        assert_eq!(report.map(|r| r.repaired), Some(0));
    }

    #[tokio::test]
    async fn test_unknown_operation() {
        let datastore = MemoryDatastore::new();
        let mut out = Vec::new();

        let result = execute(&datastore, Some("vacuum"), &CancellationToken::new(), &mut out).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
