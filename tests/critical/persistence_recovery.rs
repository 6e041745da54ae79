//! Recovery after a process died mid-run: leftover staging directories,
//! extracted targets without a ledger line, and interrupted dispatch.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use runlog_core::ledger::COMPLETED_FILE;
use runlog_core::{
    ArchiveExtractor, Classification, EngineConfig, Ledger, OutputLayout, RunEngine,
};
use tempfile::TempDir;

use crate::support::fixtures::{StubFetcher, batch, descriptor, read_lines};

const BASE: &str = "https://api.example.test/repos/octo/widgets/actions";

async fn engine(temp: &TempDir, fetcher: Arc<StubFetcher>, concurrency: usize) -> RunEngine {
    let ledger = Ledger::open(&temp.path().join(".runlog")).await.unwrap();
    RunEngine::new(
        EngineConfig {
            concurrency,
            ..EngineConfig::default()
        },
        fetcher,
        Arc::new(ArchiveExtractor::new(OutputLayout::new(temp.path()))),
        Arc::new(ledger),
    )
    .unwrap()
}

#[test]
fn p0_stale_staging_directories_are_removed() {
    let temp = TempDir::new().unwrap();
    let normal = temp.path().join("logs_normal");
    let failure = temp.path().join("logs_failure");
    std::fs::create_dir_all(normal.join(".staging-abc123/build")).unwrap();
    std::fs::write(normal.join(".staging-abc123/build/1_half.txt"), b"partial").unwrap();
    std::fs::create_dir_all(failure.join(".staging-def456")).unwrap();
    std::fs::create_dir_all(normal.join("octo_widgets_9")).unwrap();

    let extractor = ArchiveExtractor::new(OutputLayout::new(temp.path()));
    assert_eq!(extractor.remove_stale_staging().unwrap(), 2);

    assert!(!normal.join(".staging-abc123").exists());
    assert!(!failure.join(".staging-def456").exists());
    assert!(normal.join("octo_widgets_9").exists(), "finished targets are kept");
    assert_eq!(extractor.remove_stale_staging().unwrap(), 0);
}

#[tokio::test]
async fn p0_target_without_ledger_line_is_committed_without_rewrite() {
    let temp = TempDir::new().unwrap();
    let target = temp.path().join("logs_normal").join("octo_widgets_5");
    std::fs::create_dir_all(&target).unwrap();
    std::fs::write(target.join("marker.txt"), b"from the crashed run").unwrap();

    let fetcher = Arc::new(StubFetcher::succeeding());
    let url = format!("{BASE}/runs/5/logs");
    let summary = engine(&temp, Arc::clone(&fetcher), 2)
        .await
        .run(
            vec![descriptor("5", Some(&url), Classification::Normal)],
            Arc::new(AtomicBool::new(false)),
        )
        .await
        .unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(
        std::fs::read(target.join("marker.txt")).unwrap(),
        b"from the crashed run"
    );
    assert!(!target.join("1_build.txt").exists());
    assert_eq!(
        read_lines(&temp.path().join(".runlog").join(COMPLETED_FILE)),
        vec!["5"]
    );
}

#[tokio::test]
async fn p0_interrupted_run_resumes_with_the_remainder() {
    let temp = TempDir::new().unwrap();
    let shutdown = Arc::new(AtomicBool::new(false));

    let fetcher = Arc::new(StubFetcher::succeeding().with_delay(Duration::from_millis(100)));
    let first = engine(&temp, Arc::clone(&fetcher), 1).await;
    let stop = Arc::clone(&shutdown);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        stop.store(true, Ordering::SeqCst);
    });
    let summary = first.run(batch(BASE, 6, &[]), shutdown).await.unwrap();
    drop(first);

    assert!(summary.interrupted);
    assert!(summary.succeeded >= 1 && summary.succeeded < 6, "got {summary:?}");
    let done_first = summary.succeeded;

    let resumed_fetcher = Arc::new(StubFetcher::succeeding());
    let second = engine(&temp, Arc::clone(&resumed_fetcher), 3).await;
    let summary = second
        .run(batch(BASE, 6, &[]), Arc::new(AtomicBool::new(false)))
        .await
        .unwrap();

    assert_eq!(summary.already_done, done_first);
    assert_eq!(summary.succeeded, 6 - done_first);
    assert_eq!(resumed_fetcher.calls(), 6 - done_first);
    assert!(!summary.interrupted);

    let mut completed = read_lines(&temp.path().join(".runlog").join(COMPLETED_FILE));
    completed.sort();
    completed.dedup();
    assert_eq!(completed.len(), 6);
}
