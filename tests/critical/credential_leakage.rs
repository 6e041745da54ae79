//! The credential must never surface in debug output, error messages, or the
//! failure log.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use runlog_core::fetch::{Credential, RetrievalClient, RetrievalConfig};
use runlog_core::ledger::FAILED_FILE;
use runlog_core::{
    ArchiveExtractor, Classification, EngineConfig, Ledger, OutputLayout, RunEngine,
};
use tempfile::TempDir;
use wiremock::matchers::method;
use wiremock::{Mock, ResponseTemplate};

use crate::support::fixtures::{descriptor, read_lines};
use crate::support::socket_guard::start_mock_server_or_skip;

const SECRET: &str = "ghp_do_not_print_me";

#[test]
fn p0_credential_debug_is_redacted() {
    let credential = Credential::new(SECRET).unwrap();
    let rendered = format!("{credential:?}");
    assert!(!rendered.contains(SECRET), "got: {rendered}");
}

#[test]
fn p0_retrieval_config_debug_is_redacted() {
    let config = RetrievalConfig::new(Credential::new(SECRET).unwrap());
    let rendered = format!("{config:?}");
    assert!(!rendered.contains(SECRET), "got: {rendered}");
}

#[test]
fn p0_client_debug_does_not_contain_credential() {
    let client = RetrievalClient::new(RetrievalConfig::new(Credential::new(SECRET).unwrap()))
        .unwrap();
    let rendered = format!("{client:?}");
    assert!(!rendered.contains(SECRET), "got: {rendered}");
}

#[tokio::test]
async fn p0_auth_failure_message_does_not_contain_credential() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Bad credentials"))
        .mount(&mock_server)
        .await;

    let client = RetrievalClient::new(RetrievalConfig::new(Credential::new(SECRET).unwrap()))
        .unwrap();
    let failure = client
        .fetch_with_retry(&format!("{}/runs/1/logs", mock_server.uri()))
        .await
        .unwrap_err();

    let message = failure.to_string();
    assert!(message.contains("[AUTH]"), "got: {message}");
    assert!(!message.contains(SECRET), "got: {message}");
}

#[tokio::test]
async fn p0_failure_log_does_not_contain_credential() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&mock_server)
        .await;

    let temp = TempDir::new().unwrap();
    let ledger = Arc::new(Ledger::open(&temp.path().join(".runlog")).await.unwrap());
    let client = RetrievalClient::new(RetrievalConfig::new(Credential::new(SECRET).unwrap()))
        .unwrap();
    let engine = RunEngine::new(
        EngineConfig::default(),
        Arc::new(client),
        Arc::new(ArchiveExtractor::new(OutputLayout::new(temp.path()))),
        ledger,
    )
    .unwrap();

    let url = format!("{}/runs/7/logs", mock_server.uri());
    let summary = engine
        .run(
            vec![descriptor("7", Some(&url), Classification::Normal)],
            Arc::new(AtomicBool::new(false)),
        )
        .await
        .unwrap();

    assert!(summary.auth_failed);
    let failed = read_lines(&temp.path().join(".runlog").join(FAILED_FILE));
    assert_eq!(failed.len(), 1);
    assert!(!failed[0].contains(SECRET), "got: {}", failed[0]);
}
