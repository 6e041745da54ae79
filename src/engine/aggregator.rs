use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::ledger::{Ledger, LedgerError};

use super::{ExtractionOutcome, RunStats, WorkerReport};

/// Single committing actor: drains reports until every sender is dropped.
///
/// A ledger write failure requests shutdown; later outcomes are still
/// offered to the ledger. The first write error is returned.
pub(super) async fn run_aggregator(
    mut reports: mpsc::Receiver<WorkerReport>,
    ledger: Arc<Ledger>,
    stats: Arc<RunStats>,
    shutdown: Arc<AtomicBool>,
) -> Result<(), LedgerError> {
    let mut first_error = None;

    while let Some(report) = reports.recv().await {
        match report {
            WorkerReport::Skipped { source_id } => {
                debug!(source_id = %source_id, "skipped");
                stats.increment_skipped();
            }
            WorkerReport::Finished(outcome) => {
                if let Err(ledger_error) = commit(&ledger, &stats, outcome).await {
                    error!(error = %ledger_error, "ledger write failed, stopping dispatch");
                    stats.set_ledger_failed();
                    shutdown.store(true, Ordering::SeqCst);
                    first_error.get_or_insert(ledger_error);
                }
            }
        }
    }

    first_error.map_or(Ok(()), Err)
}

async fn commit(
    ledger: &Ledger,
    stats: &RunStats,
    outcome: ExtractionOutcome,
) -> Result<(), LedgerError> {
    let ExtractionOutcome {
        source_id,
        attempts,
        result,
    } = outcome;

    match result {
        Ok(extracted) => {
            stats.increment_succeeded();
            info!(
                source_id = %source_id,
                attempts,
                entries = extracted.entries,
                already_present = extracted.already_present,
                path = %extracted.path.display(),
                "succeeded"
            );
            if !ledger.commit_success(&source_id).await? {
                debug!(source_id = %source_id, "success already recorded");
            }
        }
        Err(task_error) => {
            stats.increment_failed();
            warn!(source_id = %source_id, attempts, error = %task_error, "failed");
            ledger
                .commit_failure(&source_id, &task_error.to_string())
                .await?;
        }
    }
    Ok(())
}
