//! Torn ledger writes, hostile failure reasons, and damaged archives.

use std::io::{Seek, SeekFrom, Write};

use runlog_core::ledger::{COMPLETED_FILE, FAILED_FILE};
use runlog_core::{ArchiveExtractor, ExtractError, Ledger, OutputLayout};
use tempfile::TempDir;

use crate::support::fixtures::{log_archive, read_lines};

fn archive_file(bytes: &[u8]) -> std::fs::File {
    let mut file = tempfile::tempfile().unwrap();
    file.write_all(bytes).unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();
    file
}

fn staging_dirs(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir)
        .map(|listing| {
            listing
                .filter_map(Result::ok)
                .filter(|e| e.file_name().to_string_lossy().starts_with(".staging-"))
                .count()
        })
        .unwrap_or(0)
}

#[tokio::test]
async fn p0_torn_completed_line_is_discarded_and_appends_stay_clean() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join(COMPLETED_FILE), "100\n200\n30").unwrap();

    let ledger = Ledger::open(temp.path()).await.unwrap();
    assert!(ledger.snapshot().is_succeeded("100"));
    assert!(ledger.snapshot().is_succeeded("200"));
    assert!(!ledger.snapshot().is_succeeded("30"));

    ledger.commit_success("300").await.unwrap();
    drop(ledger);

    assert_eq!(
        read_lines(&temp.path().join(COMPLETED_FILE)),
        vec!["100", "200", "300"]
    );
}

#[tokio::test]
async fn p0_torn_failure_line_is_discarded() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join(FAILED_FILE), "5\tHTTP 404\n6\tHTTP 5").unwrap();

    let ledger = Ledger::open(temp.path()).await.unwrap();
    assert_eq!(ledger.snapshot().failure_reason("5"), Some("HTTP 404"));
    assert_eq!(ledger.snapshot().failure_reason("6"), None);
}

#[tokio::test]
async fn p0_failure_reason_cannot_break_line_format() {
    let temp = TempDir::new().unwrap();
    let ledger = Ledger::open(temp.path()).await.unwrap();

    ledger
        .commit_failure("9", "first\nsecond\tthird\r")
        .await
        .unwrap();
    drop(ledger);

    let lines = read_lines(&temp.path().join(FAILED_FILE));
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].split('\t').count(), 2, "got: {}", lines[0]);
    assert!(lines[0].starts_with("9\t"));
}

#[tokio::test]
async fn p0_source_id_with_newline_is_rejected() {
    let temp = TempDir::new().unwrap();
    let ledger = Ledger::open(temp.path()).await.unwrap();

    assert!(ledger.commit_success("1\n2").await.is_err());
    assert!(ledger.commit_success("").await.is_err());
    drop(ledger);
    assert!(read_lines(&temp.path().join(COMPLETED_FILE)).is_empty());
}

#[test]
fn p0_garbage_archive_leaves_no_target_and_no_staging() {
    let temp = TempDir::new().unwrap();
    let extractor = ArchiveExtractor::new(OutputLayout::new(temp.path()));
    let target = temp.path().join("logs_normal").join("octo_widgets_1");

    let error = extractor
        .extract(archive_file(b"<html>rate limited</html>"), &target)
        .unwrap_err();

    assert!(matches!(error, ExtractError::CorruptArchive { .. }));
    assert!(!target.exists());
    assert_eq!(staging_dirs(&temp.path().join("logs_normal")), 0);
}

#[test]
fn p0_truncated_archive_leaves_no_target_and_no_staging() {
    let temp = TempDir::new().unwrap();
    let extractor = ArchiveExtractor::new(OutputLayout::new(temp.path()));
    let target = temp.path().join("logs_failure").join("octo_widgets_2");
    let bytes = log_archive();

    let result = extractor.extract(archive_file(&bytes[..bytes.len() / 2]), &target);

    assert!(result.is_err());
    assert!(!target.exists());
    assert_eq!(staging_dirs(&temp.path().join("logs_failure")), 0);
}
