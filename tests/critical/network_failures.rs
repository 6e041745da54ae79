//! Refused connections, dropped servers, and persistent server errors.
//! Assert retries happen and the final error is reported per run.

use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use runlog_core::fetch::{
    Credential, FetchError, RetrievalClient, RetrievalConfig, RetryPolicy,
};
use runlog_core::ledger::FAILED_FILE;
use runlog_core::{
    ArchiveExtractor, Classification, EngineConfig, Ledger, OutputLayout, RunEngine,
};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::support::fixtures::{descriptor, log_archive, read_lines};
use crate::support::socket_guard::{should_skip_socket_bound_test, start_mock_server_or_skip};

fn fast_client(max_attempts: u32) -> RetrievalClient {
    let policy = RetryPolicy::new(
        max_attempts,
        Duration::from_millis(5),
        Duration::from_millis(50),
        2.0,
    );
    let config = RetrievalConfig::new(Credential::new("t").unwrap())
        .with_request_timeout(Duration::from_secs(2))
        .with_retry_policy(policy);
    RetrievalClient::new(config).unwrap()
}

/// Returns a localhost URL whose port has nothing listening on it.
fn refused_url() -> Option<String> {
    if should_skip_socket_bound_test() {
        return None;
    }
    let listener = TcpListener::bind("127.0.0.1:0").ok()?;
    let port = listener.local_addr().ok()?.port();
    drop(listener);
    Some(format!("http://127.0.0.1:{port}/runs/1/logs"))
}

#[tokio::test]
async fn p0_connection_refused_is_retried_then_reported() {
    let Some(url) = refused_url() else {
        return;
    };

    let failure = fast_client(3).fetch_with_retry(&url).await.unwrap_err();

    assert_eq!(failure.attempts, 3);
    assert!(
        matches!(failure.error, FetchError::Network { .. }),
        "got: {failure}"
    );
}

#[tokio::test]
async fn p0_invalid_url_is_not_retried() {
    let failure = fast_client(5)
        .fetch_with_retry("not a url")
        .await
        .unwrap_err();

    assert_eq!(failure.attempts, 1);
    assert!(matches!(failure.error, FetchError::InvalidUrl { .. }));
}

#[tokio::test]
async fn p0_server_error_exhaustion_is_recorded_and_others_continue() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/runs/1/logs"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/runs/2/logs"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(log_archive()))
        .mount(&mock_server)
        .await;

    let temp = TempDir::new().unwrap();
    let ledger = Arc::new(Ledger::open(&temp.path().join(".runlog")).await.unwrap());
    let engine = RunEngine::new(
        EngineConfig::default(),
        Arc::new(fast_client(2)),
        Arc::new(ArchiveExtractor::new(OutputLayout::new(temp.path()))),
        ledger,
    )
    .unwrap();

    let base = mock_server.uri();
    let summary = engine
        .run(
            vec![
                descriptor("1", Some(&format!("{base}/runs/1/logs")), Classification::Normal),
                descriptor("2", Some(&format!("{base}/runs/2/logs")), Classification::Failure),
            ],
            Arc::new(AtomicBool::new(false)),
        )
        .await
        .unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.retried, 1);
    assert!(!summary.is_fatal());

    let failed = read_lines(&temp.path().join(".runlog").join(FAILED_FILE));
    assert_eq!(failed.len(), 1);
    assert!(failed[0].starts_with("1\t"), "got: {}", failed[0]);
    assert!(failed[0].contains("HTTP 500"), "got: {}", failed[0]);
    assert!(failed[0].contains("after 2 attempt(s)"), "got: {}", failed[0]);
}
