//! Bounded worker pool driving fetch → extract → commit for a batch.
//!
//! # Concurrency Model
//!
//! - A semaphore limits how many descriptors are in flight at once
//! - Each dispatched descriptor runs in its own Tokio task holding one permit
//! - Workers never touch the ledger: they send a [`WorkerReport`] over a
//!   channel to a single aggregator task, which owns every commit
//! - Descriptors without an artifact URL are reported as skipped without
//!   taking a permit
//!
//! # Shutdown
//!
//! One shared `AtomicBool` stops dispatch. It is set by the caller (Ctrl-C),
//! by a worker whose credential was rejected, by a worker that ran out of
//! disk under [`DiskFullPolicy::Abort`], or by the aggregator when a ledger
//! write fails. The dispatch loop checks it before every descriptor and
//! again after acquiring a permit. Tasks already in flight are always
//! awaited so their outcomes reach the ledger.

mod aggregator;
mod task;

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::descriptor::RunDescriptor;
use crate::extract::{ArchiveExtractor, ExtractError, ExtractedArchive};
use crate::fetch::{ArchiveFetcher, FetchFailure};
use crate::ledger::{Ledger, LedgerError};

/// Minimum allowed concurrency value.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
pub const MAX_CONCURRENCY: usize = 100;

/// Default concurrency if not specified.
pub const DEFAULT_CONCURRENCY: usize = 8;

const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Error type for engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,

    /// The ledger could not record an outcome; the run was stopped.
    #[error("ledger write failed: {0}")]
    Ledger(#[from] LedgerError),

    /// The committing task died; later outcomes were not recorded.
    #[error("aggregator task failed: {reason}")]
    AggregatorFailed {
        /// The join error reported by the runtime.
        reason: String,
    },
}

/// What to do when extraction fails because local storage is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiskFullPolicy {
    /// Record the failure against the descriptor and keep going.
    #[default]
    Record,
    /// Record the failure, then stop dispatching further descriptors.
    Abort,
}

impl FromStr for DiskFullPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "record" => Ok(Self::Record),
            "abort" => Ok(Self::Abort),
            other => Err(format!("unknown disk-full policy `{other}` (expected record|abort)")),
        }
    }
}

/// Engine settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Number of descriptors processed concurrently.
    pub concurrency: usize,
    /// Disk exhaustion handling.
    pub disk_full: DiskFullPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            disk_full: DiskFullPolicy::default(),
        }
    }
}

/// Why a dispatched descriptor did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The archive could not be fetched.
    #[error("fetch failed: {0}")]
    Fetch(#[source] FetchFailure),

    /// The archive was fetched but could not be extracted.
    #[error("extraction failed: {0}")]
    Extract(#[source] ExtractError),

    /// The worker task panicked before reporting.
    #[error("worker task failed: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Returns true if the credential was rejected.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Fetch(failure) if failure.error.is_auth())
    }

    /// Returns true if local storage ran out during extraction.
    #[must_use]
    pub fn is_storage_exhausted(&self) -> bool {
        matches!(self, Self::Extract(error) if error.is_storage_exhausted())
    }
}

/// Terminal result of one dispatched descriptor.
#[derive(Debug)]
pub struct ExtractionOutcome {
    /// The descriptor's source id.
    pub source_id: String,
    /// Fetch attempts made (zero if the task never fetched).
    pub attempts: u32,
    /// The extracted archive, or why it failed.
    pub result: Result<ExtractedArchive, TaskError>,
}

/// Message from the dispatch side to the aggregator.
#[derive(Debug)]
pub enum WorkerReport {
    /// A dispatched descriptor reached a terminal state.
    Finished(ExtractionOutcome),
    /// A descriptor had nothing to fetch.
    Skipped {
        /// The descriptor's source id.
        source_id: String,
    },
}

/// Live counters for a run, shared with progress reporting.
///
/// Uses atomic counters so workers, the aggregator and the UI can read and
/// update concurrently.
#[derive(Debug, Default)]
pub struct RunStats {
    planned: AtomicUsize,
    attempted: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
    already_done: AtomicUsize,
    retried: AtomicUsize,
    not_dispatched: AtomicUsize,
    interrupted: AtomicBool,
    auth_failed: AtomicBool,
    fatal_filesystem: AtomicBool,
    ledger_failed: AtomicBool,
}

impl RunStats {
    /// Creates a new stats tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Descriptors expected to be dispatched in this run.
    #[must_use]
    pub fn planned(&self) -> usize {
        self.planned.load(Ordering::SeqCst)
    }

    /// Descriptors dispatched to a worker.
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.attempted.load(Ordering::SeqCst)
    }

    /// Descriptors that succeeded.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.succeeded.load(Ordering::SeqCst)
    }

    /// Descriptors that failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Descriptors with nothing to fetch.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    /// Descriptors already recorded as succeeded by a previous run.
    #[must_use]
    pub fn already_done(&self) -> usize {
        self.already_done.load(Ordering::SeqCst)
    }

    /// Fetch retries across all descriptors.
    #[must_use]
    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::SeqCst)
    }

    /// Descriptors finished (succeeded or failed).
    #[must_use]
    pub fn finished(&self) -> usize {
        self.succeeded() + self.failed()
    }

    /// Returns true if dispatch stopped early without a fatal error.
    #[must_use]
    pub fn was_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Returns true if the credential was rejected.
    #[must_use]
    pub fn auth_failed(&self) -> bool {
        self.auth_failed.load(Ordering::SeqCst)
    }

    /// Returns true if a storage failure stopped the run.
    #[must_use]
    pub fn fatal_filesystem(&self) -> bool {
        self.fatal_filesystem.load(Ordering::SeqCst)
    }

    /// Returns a point-in-time copy of the counters.
    #[must_use]
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            attempted: self.attempted(),
            succeeded: self.succeeded(),
            failed: self.failed(),
            skipped: self.skipped(),
            already_done: self.already_done(),
            retried: self.retried(),
            not_dispatched: self.not_dispatched.load(Ordering::SeqCst),
            interrupted: self.was_interrupted(),
            auth_failed: self.auth_failed(),
            fatal_filesystem: self.fatal_filesystem(),
            ledger_failed: self.ledger_failed.load(Ordering::SeqCst),
        }
    }

    fn set_planned(&self, planned: usize) {
        self.planned.store(planned, Ordering::SeqCst);
    }

    fn increment_attempted(&self) {
        self.attempted.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_already_done(&self) {
        self.already_done.fetch_add(1, Ordering::SeqCst);
    }

    fn add_retried(&self, retries: usize) {
        self.retried.fetch_add(retries, Ordering::SeqCst);
    }

    fn add_not_dispatched(&self, count: usize) {
        self.not_dispatched.fetch_add(count, Ordering::SeqCst);
    }

    fn set_interrupted(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    fn set_auth_failed(&self) {
        self.auth_failed.store(true, Ordering::SeqCst);
    }

    fn set_fatal_filesystem(&self) {
        self.fatal_filesystem.store(true, Ordering::SeqCst);
    }

    fn set_ledger_failed(&self) {
        self.ledger_failed.store(true, Ordering::SeqCst);
    }
}

/// Final counters of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Descriptors dispatched to a worker.
    pub attempted: usize,
    /// Descriptors that succeeded.
    pub succeeded: usize,
    /// Descriptors that failed.
    pub failed: usize,
    /// Descriptors with nothing to fetch.
    pub skipped: usize,
    /// Descriptors already succeeded in a previous run.
    pub already_done: usize,
    /// Fetch retries across all descriptors.
    pub retried: usize,
    /// Pending descriptors left undispatched because of a shutdown.
    pub not_dispatched: usize,
    /// Dispatch stopped early on request.
    pub interrupted: bool,
    /// The credential was rejected.
    pub auth_failed: bool,
    /// Local storage ran out under [`DiskFullPolicy::Abort`].
    pub fatal_filesystem: bool,
    /// A ledger write failed.
    pub ledger_failed: bool,
}

impl RunSummary {
    /// Returns true if the run stopped on a condition affecting every item.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.auth_failed || self.fatal_filesystem || self.ledger_failed
    }
}

/// Shared, read-only state handed to every worker task.
#[derive(Debug)]
struct WorkerContext {
    fetcher: Arc<dyn ArchiveFetcher>,
    extractor: Arc<ArchiveExtractor>,
    stats: Arc<RunStats>,
    shutdown: Arc<AtomicBool>,
    disk_full: DiskFullPolicy,
    reports: mpsc::Sender<WorkerReport>,
}

/// Concurrent fetch-and-extract engine over one ledger.
#[derive(Debug)]
pub struct RunEngine {
    semaphore: Arc<Semaphore>,
    config: EngineConfig,
    fetcher: Arc<dyn ArchiveFetcher>,
    extractor: Arc<ArchiveExtractor>,
    ledger: Arc<Ledger>,
    stats: Arc<RunStats>,
}

impl RunEngine {
    /// Creates an engine.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] if the value is outside
    /// the valid range (1-100).
    #[instrument(level = "debug", skip(fetcher, extractor, ledger))]
    pub fn new(
        config: EngineConfig,
        fetcher: Arc<dyn ArchiveFetcher>,
        extractor: Arc<ArchiveExtractor>,
        ledger: Arc<Ledger>,
    ) -> Result<Self, EngineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&config.concurrency) {
            return Err(EngineError::InvalidConcurrency {
                value: config.concurrency,
            });
        }

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(config.concurrency)),
            config,
            fetcher,
            extractor,
            ledger,
            stats: Arc::new(RunStats::new()),
        })
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.config.concurrency
    }

    /// Live counters, for progress display.
    #[must_use]
    pub fn stats(&self) -> Arc<RunStats> {
        Arc::clone(&self.stats)
    }

    /// Processes `descriptors` until all reach a terminal state or
    /// `shutdown` is set.
    ///
    /// Descriptors already succeeded in the ledger's startup snapshot are
    /// counted as already done and never dispatched. Individual failures do
    /// NOT cause this method to error; they are committed to the failure log
    /// and counted.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Ledger`] if an outcome could not be committed
    /// (after in-flight work drained), and [`EngineError::SemaphoreClosed`]
    /// if permit acquisition fails.
    #[instrument(skip(self, descriptors, shutdown), fields(descriptors = descriptors.len(), concurrency = self.config.concurrency))]
    pub async fn run(
        &self,
        descriptors: Vec<RunDescriptor>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<RunSummary, EngineError> {
        let snapshot = self.ledger.snapshot();
        let (pending, already_done): (Vec<_>, Vec<_>) = descriptors
            .into_iter()
            .partition(|d| !snapshot.is_succeeded(&d.source_id));
        for _ in &already_done {
            self.stats.increment_already_done();
        }
        self.stats
            .set_planned(pending.iter().filter(|d| !d.is_skippable()).count());

        info!(
            pending = pending.len(),
            already_done = already_done.len(),
            planned = self.stats.planned(),
            "starting run"
        );

        let (tx, rx) = mpsc::channel(self.config.concurrency * 2);
        let aggregator = tokio::spawn(aggregator::run_aggregator(
            rx,
            Arc::clone(&self.ledger),
            Arc::clone(&self.stats),
            Arc::clone(&shutdown),
        ));
        let context = Arc::new(WorkerContext {
            fetcher: Arc::clone(&self.fetcher),
            extractor: Arc::clone(&self.extractor),
            stats: Arc::clone(&self.stats),
            shutdown: Arc::clone(&shutdown),
            disk_full: self.config.disk_full,
            reports: tx.clone(),
        });

        let dispatch = self.dispatch(pending, &context, &tx, &shutdown).await;

        drop(context);
        drop(tx);
        let ledger_result = aggregator_result(aggregator.await, &self.stats);

        let summary = self.stats.summary();
        info!(
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            already_done = summary.already_done,
            retried = summary.retried,
            not_dispatched = summary.not_dispatched,
            "run complete"
        );

        dispatch?;
        ledger_result?;
        Ok(summary)
    }

    /// Dispatch loop; returns once every spawned task has been awaited.
    async fn dispatch(
        &self,
        pending: Vec<RunDescriptor>,
        context: &Arc<WorkerContext>,
        reports: &mpsc::Sender<WorkerReport>,
        shutdown: &AtomicBool,
    ) -> Result<(), EngineError> {
        let mut handles: Vec<(String, JoinHandle<()>)> = Vec::new();
        let mut remaining = pending.len();
        let mut result = Ok(());

        for descriptor in pending {
            if shutdown.load(Ordering::SeqCst) {
                self.stop_dispatch(remaining);
                break;
            }
            drain_finished_tasks(&mut handles, reports).await;

            let Some(url) = descriptor.artifact_url.clone() else {
                remaining -= 1;
                debug!(source_id = %descriptor.source_id, "no artifact url, skipping");
                send_report(
                    reports,
                    WorkerReport::Skipped {
                        source_id: descriptor.source_id,
                    },
                )
                .await;
                continue;
            };

            // Race the permit against the shutdown flag so a stop request
            // during a full-concurrency wait takes effect immediately.
            let acquired = tokio::select! {
                biased;
                () = wait_for_shutdown(shutdown) => None,
                acquired = Arc::clone(&self.semaphore).acquire_owned() => Some(acquired),
            };
            let permit = match acquired {
                Some(Ok(permit)) => permit,
                Some(Err(_)) => {
                    result = Err(EngineError::SemaphoreClosed);
                    break;
                }
                None => {
                    self.stop_dispatch(remaining);
                    break;
                }
            };
            if shutdown.load(Ordering::SeqCst) {
                drop(permit);
                self.stop_dispatch(remaining);
                break;
            }

            remaining -= 1;
            let source_id = descriptor.source_id.clone();
            let context = Arc::clone(context);
            handles.push((
                source_id,
                tokio::spawn(async move {
                    // Permit is dropped when this block exits (RAII)
                    let _permit = permit;
                    task::process_descriptor(&context, descriptor, url).await;
                }),
            ));
        }

        debug!(task_count = handles.len(), "waiting for in-flight tasks");
        for (source_id, handle) in handles {
            if let Err(join_error) = handle.await {
                report_join_error(reports, source_id, &join_error).await;
            }
        }
        result
    }

    fn stop_dispatch(&self, remaining: usize) {
        self.stats.add_not_dispatched(remaining);
        if !(self.stats.auth_failed()
            || self.stats.fatal_filesystem()
            || self.stats.ledger_failed.load(Ordering::SeqCst))
        {
            self.stats.set_interrupted();
        }
        info!(remaining, "shutdown requested, no further descriptors dispatched");
    }
}

async fn wait_for_shutdown(shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::SeqCst) {
        tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
    }
}

async fn send_report(reports: &mpsc::Sender<WorkerReport>, report: WorkerReport) {
    if let Err(error) = reports.send(report).await {
        warn!(error = %error, "aggregator gone, outcome not recorded");
    }
}

async fn drain_finished_tasks(
    handles: &mut Vec<(String, JoinHandle<()>)>,
    reports: &mpsc::Sender<WorkerReport>,
) {
    let mut idx = 0;
    while idx < handles.len() {
        if handles[idx].1.is_finished() {
            let (source_id, handle) = handles.swap_remove(idx);
            if let Err(join_error) = handle.await {
                report_join_error(reports, source_id, &join_error).await;
            }
        } else {
            idx += 1;
        }
    }
}

/// Folds the aggregator's join result into the run result.
fn aggregator_result(
    joined: Result<Result<(), LedgerError>, tokio::task::JoinError>,
    stats: &RunStats,
) -> Result<(), EngineError> {
    match joined {
        Ok(result) => result.map_err(EngineError::from),
        Err(join_error) => {
            error!(error = %join_error, "aggregator task failed, outcomes may be unrecorded");
            stats.set_ledger_failed();
            Err(EngineError::AggregatorFailed {
                reason: join_error.to_string(),
            })
        }
    }
}

async fn report_join_error(
    reports: &mpsc::Sender<WorkerReport>,
    source_id: String,
    join_error: &tokio::task::JoinError,
) {
    warn!(source_id = %source_id, error = %join_error, "worker task panicked");
    send_report(
        reports,
        WorkerReport::Finished(ExtractionOutcome {
            source_id,
            attempts: 0,
            result: Err(TaskError::Panicked(join_error.to_string())),
        }),
    )
    .await;
}
