//! HTTP retrieval client for log archives.
//!
//! The client is built once from an immutable [`RetrievalConfig`]: the
//! credential, timeout and retry policy never change for the life of a run.
//! Response bodies are streamed chunk by chunk into an anonymous temporary
//! file, so peak memory does not depend on archive size.

use std::fmt;
use std::io::{Seek, SeekFrom};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, RETRY_AFTER};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument};
use url::Url;

use super::constants::{ACCEPT_MEDIA_TYPE, CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT};
use super::error::{ClientBuildError, FetchError, FetchFailure};
use super::retry::{RetryDecision, RetryPolicy, classify_error};

/// API token used to authorize archive downloads.
///
/// The value never appears in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wraps a token, trimming surrounding whitespace.
    ///
    /// Returns `None` for an empty or whitespace-only token.
    #[must_use]
    pub fn new(token: &str) -> Option<Self> {
        let token = token.trim();
        (!token.is_empty()).then(|| Self(token.to_string()))
    }

    fn authorization_value(&self) -> String {
        format!("token {}", self.0)
    }
}

impl FromStr for Credential {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::new(value).ok_or_else(|| "credential must not be empty".to_string())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Immutable settings for a [`RetrievalClient`].
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    credential: Credential,
    request_timeout: Duration,
    retry_policy: RetryPolicy,
    user_agent: String,
}

impl RetrievalConfig {
    /// Creates a configuration with the default timeout and retry policy.
    #[must_use]
    pub fn new(credential: Credential) -> Self {
        Self {
            credential,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry_policy: RetryPolicy::default(),
            user_agent: default_user_agent(),
        }
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Returns the per-request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Returns the retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }
}

fn default_user_agent() -> String {
    format!("runlog/{}", env!("CARGO_PKG_VERSION"))
}

/// A fetched archive spooled to an anonymous temporary file.
///
/// The file is positioned at the start and is removed by the OS once dropped.
#[derive(Debug)]
pub struct FetchedArchive {
    file: std::fs::File,
    bytes: u64,
    attempts: u32,
    retry_delays: Vec<Duration>,
}

impl FetchedArchive {
    /// Spools an in-memory body, as if fetched on the first attempt.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the temporary file cannot be written.
    pub fn from_bytes(body: &[u8]) -> std::io::Result<Self> {
        use std::io::Write;

        let mut file = tempfile::tempfile()?;
        file.write_all(body)?;
        file.seek(SeekFrom::Start(0))?;
        Ok(Self {
            file,
            bytes: body.len() as u64,
            attempts: 1,
            retry_delays: Vec::new(),
        })
    }

    /// Size of the body in bytes.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Number of attempts it took to fetch, including the first.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delays slept before each retry, in order.
    #[must_use]
    pub fn retry_delays(&self) -> &[Duration] {
        &self.retry_delays
    }

    /// Consumes the archive, returning the spool file.
    #[must_use]
    pub fn into_file(self) -> std::fs::File {
        self.file
    }
}

/// Source of archive bytes for the scheduler.
///
/// Implementations resolve every retryable condition internally: an `Err`
/// is final for this descriptor.
#[async_trait]
pub trait ArchiveFetcher: Send + Sync + fmt::Debug {
    /// Fetches the archive at `url`.
    async fn fetch(&self, url: &str) -> Result<FetchedArchive, FetchFailure>;
}

/// HTTP client fetching archives with timeout and retry/backoff.
///
/// Cheap to clone; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct RetrievalClient {
    client: Client,
    retry_policy: RetryPolicy,
}

impl RetrievalClient {
    /// Builds a client from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientBuildError::InvalidCredential`] if the token cannot be
    /// sent as a header value, and [`ClientBuildError::Build`] if the HTTP
    /// client cannot be constructed.
    #[instrument(level = "debug", skip(config), fields(timeout_ms = config.request_timeout.as_millis()))]
    pub fn new(config: RetrievalConfig) -> Result<Self, ClientBuildError> {
        let mut authorization = HeaderValue::from_str(&config.credential.authorization_value())
            .map_err(|_| ClientBuildError::InvalidCredential)?;
        authorization.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, authorization);
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_MEDIA_TYPE));

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(CONNECT_TIMEOUT.min(config.request_timeout))
            .timeout(config.request_timeout)
            .user_agent(config.user_agent)
            .build()
            .map_err(ClientBuildError::Build)?;

        debug!(
            max_attempts = config.retry_policy.max_attempts(),
            "retrieval client ready"
        );

        Ok(Self {
            client,
            retry_policy: config.retry_policy,
        })
    }

    /// Returns the retry policy in use.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Fetches `url`, retrying transient failures per the retry policy.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchFailure`] holding the last error once the policy
    /// declines another attempt. Auth rejections and permanent statuses
    /// return after the first attempt.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn fetch_with_retry(&self, url: &str) -> Result<FetchedArchive, FetchFailure> {
        let mut attempt = 0u32;
        let mut retry_delays = Vec::new();

        loop {
            attempt += 1;
            debug!(attempt, "attempting fetch");

            match self.fetch_once(url).await {
                Ok(mut archive) => {
                    archive.attempts = attempt;
                    archive.retry_delays = retry_delays;
                    return Ok(archive);
                }
                Err(error) => {
                    let failure_type = classify_error(&error);
                    match self.retry_policy.should_retry(failure_type, attempt) {
                        RetryDecision::Retry {
                            delay: backoff,
                            attempt: next_attempt,
                        } => {
                            let delay = self
                                .retry_policy
                                .apply_retry_after(backoff, error.retry_after());
                            info!(
                                attempt = next_attempt,
                                max_attempts = self.retry_policy.max_attempts(),
                                delay_ms = delay.as_millis(),
                                error = %error,
                                "retrying fetch"
                            );
                            retry_delays.push(delay);
                            tokio::time::sleep(delay).await;
                        }
                        RetryDecision::DoNotRetry { reason } => {
                            debug!(%reason, "not retrying fetch");
                            return Err(FetchFailure {
                                error,
                                attempts: attempt,
                            });
                        }
                    }
                }
            }
        }
    }

    /// Performs a single request and spools the body.
    async fn fetch_once(&self, url: &str) -> Result<FetchedArchive, FetchError> {
        Url::parse(url).map_err(|_| FetchError::invalid_url(url))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| map_request_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            if matches!(status_code, 401 | 403) {
                return Err(FetchError::auth(url, status_code));
            }
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            return Err(FetchError::http_status_with_retry_after(
                url,
                status_code,
                retry_after,
            ));
        }

        let spool = tempfile::tempfile().map_err(|e| FetchError::io(url, e))?;
        let (spool, bytes) = stream_to_spool(spool, response, url).await?;
        debug!(bytes, "archive body spooled");

        Ok(FetchedArchive {
            file: spool,
            bytes,
            attempts: 1,
            retry_delays: Vec::new(),
        })
    }
}

#[async_trait]
impl ArchiveFetcher for RetrievalClient {
    async fn fetch(&self, url: &str) -> Result<FetchedArchive, FetchFailure> {
        self.fetch_with_retry(url).await
    }
}

fn map_request_error(url: &str, error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::timeout(url)
    } else {
        FetchError::network(url, error)
    }
}

/// Streams the response body into `spool`, returning the rewound file and
/// the number of bytes written.
async fn stream_to_spool(
    spool: std::fs::File,
    response: reqwest::Response,
    url: &str,
) -> Result<(std::fs::File, u64), FetchError> {
    let mut writer = BufWriter::new(tokio::fs::File::from_std(spool));
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| map_request_error(url, e))?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| FetchError::io(url, e))?;
        bytes_written += chunk.len() as u64;
    }

    writer.flush().await.map_err(|e| FetchError::io(url, e))?;

    let mut spool = writer.into_inner().into_std().await;
    spool
        .seek(SeekFrom::Start(0))
        .map_err(|e| FetchError::io(url, e))?;
    Ok((spool, bytes_written))
}
