//! Shared builders for integration tests: zip bodies, descriptors and an
//! in-memory fetcher.

use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use runlog_core::fetch::{ArchiveFetcher, FetchError, FetchFailure, FetchedArchive};
use runlog_core::{Classification, RunDescriptor};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

/// Builds a deflated zip holding `entries`.
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, body) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(body).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// A typical job-log archive.
pub fn log_archive() -> Vec<u8> {
    zip_bytes(&[
        ("1_build.txt", b"compiling...\nok\n"),
        ("build/2_test.txt", b"running 3 tests\n"),
    ])
}

pub fn descriptor(source_id: &str, url: Option<&str>, classification: Classification) -> RunDescriptor {
    RunDescriptor {
        source_id: source_id.to_string(),
        artifact_url: url.map(str::to_string),
        repo_label: "octo_widgets".to_string(),
        classification,
    }
}

/// `count` descriptors with ids `100..`, URLs under `base`, and the ids in
/// `without_url` lacking an artifact URL.
pub fn batch(base: &str, count: usize, without_url: &[usize]) -> Vec<RunDescriptor> {
    (0..count)
        .map(|i| {
            let id = (100 + i).to_string();
            let url = format!("{base}/runs/{id}/logs");
            let classification = if i % 2 == 0 {
                Classification::Normal
            } else {
                Classification::Failure
            };
            descriptor(
                &id,
                (!without_url.contains(&i)).then_some(url.as_str()),
                classification,
            )
        })
        .collect()
}

/// Non-empty lines of a ledger file.
pub fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// How [`StubFetcher`] answers a request.
#[derive(Debug, Clone)]
pub enum StubResponse {
    Archive(Vec<u8>),
    Status(u16),
    Auth,
}

/// In-memory fetcher counting calls and peak concurrency.
#[derive(Debug)]
pub struct StubFetcher {
    response: StubResponse,
    delay: Duration,
    calls: AtomicUsize,
    current: AtomicUsize,
    peak: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl StubFetcher {
    pub fn new(response: StubResponse) -> Self {
        Self {
            response,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(StubResponse::Archive(log_archive()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArchiveFetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedArchive, FetchFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.current.fetch_sub(1, Ordering::SeqCst);

        let error = match &self.response {
            StubResponse::Archive(body) => {
                return FetchedArchive::from_bytes(body).map_err(|e| FetchFailure {
                    error: FetchError::io(url, e),
                    attempts: 1,
                });
            }
            StubResponse::Status(status) => FetchError::http_status(url, *status),
            StubResponse::Auth => FetchError::auth(url, 401),
        };
        Err(FetchFailure { error, attempts: 1 })
    }
}
