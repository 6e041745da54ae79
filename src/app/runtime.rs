use std::io::{self, IsTerminal};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use runlog_core::{
    ArchiveExtractor, EngineConfig, Ledger, OutputLayout, RetrievalClient, RunEngine, RunSummary,
    load_descriptors,
};
use tracing::{debug, error, info, warn};

use crate::app::exit_handler::{self, ProcessExit};
use crate::app::{config_manager, progress_manager, terminal};
use crate::cli::Args;

pub(crate) async fn run_runlog() -> Result<ProcessExit> {
    // Must run before parsing so `.env` values feed the clap env fallbacks.
    let dotenv = config_manager::load_dotenv(Path::new(config_manager::DOTENV_FILE));
    let args = Args::parse();

    let default_level = terminal::default_log_level(args.verbose, args.quiet);
    terminal::init_tracing(default_level, terminal::no_color_env_requested());

    debug!(?args, "CLI arguments parsed");
    match dotenv {
        Ok(true) => debug!(path = config_manager::DOTENV_FILE, "loaded environment file"),
        Ok(false) => {}
        Err(error) => warn!(
            path = config_manager::DOTENV_FILE,
            error = %error,
            "ignoring unreadable environment file"
        ),
    }
    info!("runlog starting");

    let credential = config_manager::resolve_credential(args.token.as_ref(), &args.token_file)?;

    let report = load_descriptors(&args.input)?;
    if report.descriptors.is_empty() {
        info!(dropped = report.dropped.len(), "no runs to process");
        return Ok(ProcessExit::Success);
    }
    info!(
        runs = report.descriptors.len(),
        without_logs = report.skippable_count(),
        dropped = report.dropped.len(),
        "loaded runs"
    );

    let ledger_dir = config_manager::ledger_dir(&args);
    let ledger = Ledger::open(&ledger_dir)
        .await
        .with_context(|| format!("failed to open ledger in {}", ledger_dir.display()))?;
    let previously_failed = ledger.snapshot().pending_failures();
    if previously_failed > 0 {
        info!(previously_failed, "runs that failed before will be retried");
    }

    let extractor = ArchiveExtractor::new(OutputLayout::new(&args.output_dir));
    extractor.remove_stale_staging()?;

    let client = RetrievalClient::new(config_manager::retrieval_config(&args, credential))?;
    let engine = RunEngine::new(
        EngineConfig {
            concurrency: usize::from(args.concurrency),
            disk_full: args.on_disk_full,
        },
        Arc::new(client),
        Arc::new(extractor),
        Arc::new(ledger),
    )?;

    let shutdown = Arc::new(AtomicBool::new(false));
    spawn_interrupt_listener(Arc::clone(&shutdown));

    let use_spinner = terminal::should_use_spinner(
        io::stderr().is_terminal(),
        args.quiet,
        terminal::is_dumb_terminal(),
    );
    let (progress_handle, progress_stop) =
        progress_manager::spawn_progress_ui(use_spinner, engine.stats());

    let result = engine.run(report.descriptors, shutdown).await;

    progress_stop.store(true, Ordering::SeqCst);
    if let Some(handle) = progress_handle {
        let _ = handle.await;
    }

    let summary = result?;
    log_summary(&summary, &ledger_dir.display().to_string());
    Ok(exit_handler::determine_exit_outcome(&summary))
}

fn spawn_interrupt_listener(shutdown: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, waiting for in-flight downloads to finish");
            shutdown.store(true, Ordering::SeqCst);
        }
    });
}

fn log_summary(summary: &RunSummary, ledger_dir: &str) {
    info!(
        attempted = summary.attempted,
        succeeded = summary.succeeded,
        failed = summary.failed,
        skipped = summary.skipped,
        already_done = summary.already_done,
        retried = summary.retried,
        "summary"
    );
    if summary.failed > 0 {
        warn!(
            failed = summary.failed,
            "some runs failed; reasons are in {ledger_dir}/failed.tsv and they will be retried next time"
        );
    }
    if summary.auth_failed {
        error!("credential rejected by the server; check GITHUB_TOKEN or the token file");
    }
    if summary.fatal_filesystem {
        error!("local storage exhausted; free space and re-run to resume");
    }
    if summary.interrupted {
        warn!(
            not_dispatched = summary.not_dispatched,
            "run interrupted; re-run to resume"
        );
    }
}
