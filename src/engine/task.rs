use std::sync::Arc;
use std::sync::atomic::Ordering;

use tracing::{debug, error, instrument};

use crate::descriptor::RunDescriptor;
use crate::extract::{ExtractError, ExtractedArchive};

use super::{DiskFullPolicy, ExtractionOutcome, TaskError, WorkerContext, WorkerReport, send_report};

/// Runs one descriptor through fetch and extract, then reports the outcome.
///
/// Fatal conditions set the shutdown flag before the report is sent, so
/// the dispatcher sees them before this task's permit is released.
#[instrument(skip(context, descriptor, url), fields(source_id = %descriptor.source_id))]
pub(super) async fn process_descriptor(
    context: &Arc<WorkerContext>,
    descriptor: RunDescriptor,
    url: String,
) {
    context.stats.increment_attempted();

    let (attempts, result) = fetch_and_extract(context, &descriptor, &url).await;

    if let Err(task_error) = &result {
        escalate(context, task_error);
    }

    send_report(
        &context.reports,
        WorkerReport::Finished(ExtractionOutcome {
            source_id: descriptor.source_id,
            attempts,
            result,
        }),
    )
    .await;
}

/// Stops dispatch when `task_error` makes every remaining descriptor futile.
fn escalate(context: &WorkerContext, task_error: &TaskError) {
    if task_error.is_auth() {
        error!(error = %task_error, "credential rejected, stopping dispatch");
        context.stats.set_auth_failed();
        context.shutdown.store(true, Ordering::SeqCst);
    } else if task_error.is_storage_exhausted() && context.disk_full == DiskFullPolicy::Abort {
        error!(error = %task_error, "storage exhausted, stopping dispatch");
        context.stats.set_fatal_filesystem();
        context.shutdown.store(true, Ordering::SeqCst);
    }
}

async fn fetch_and_extract(
    context: &WorkerContext,
    descriptor: &RunDescriptor,
    url: &str,
) -> (u32, Result<ExtractedArchive, TaskError>) {
    let archive = match context.fetcher.fetch(url).await {
        Ok(archive) => archive,
        Err(failure) => {
            context
                .stats
                .add_retried(failure.attempts.saturating_sub(1) as usize);
            return (failure.attempts, Err(TaskError::Fetch(failure)));
        }
    };
    let attempts = archive.attempts();
    context
        .stats
        .add_retried(attempts.saturating_sub(1) as usize);
    debug!(bytes = archive.bytes(), attempts, "archive fetched");

    let extractor = Arc::clone(&context.extractor);
    let target = extractor.target_for(descriptor);
    let blocking_target = target.clone();
    let extracted = tokio::task::spawn_blocking(move || {
        extractor.extract(archive.into_file(), &blocking_target)
    })
    .await
    .unwrap_or_else(|join_error| {
        Err(ExtractError::filesystem(
            target,
            std::io::Error::other(join_error),
        ))
    });

    (attempts, extracted.map_err(TaskError::Extract))
}
