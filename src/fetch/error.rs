//! Error types for archive retrieval.
//!
//! Every variant carries the URL (or spool path) it concerns so failure-log
//! entries are actionable without the surrounding trace.

use thiserror::Error;

/// Errors that can occur while fetching one archive.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS resolution, connection refused, reset mid-body).
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL being fetched.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// The request did not complete within the configured timeout.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Non-success HTTP response other than an auth rejection.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that returned the status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present.
        retry_after: Option<String>,
    },

    /// The credential was rejected (HTTP 401 or 403).
    ///
    /// This is never retried: the same credential will be rejected for every
    /// remaining item, so the run must stop.
    #[error("[AUTH] credential rejected (HTTP {status}) fetching {url}")]
    Auth {
        /// The URL that rejected the credential.
        url: String,
        /// The HTTP status code (401 or 403).
        status: u16,
    },

    /// The artifact URL is malformed.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The response body could not be spooled to local storage.
    #[error("IO error spooling {url}: {source}")]
    Io {
        /// The URL whose body was being written.
        url: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error with a Retry-After header value.
    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates an auth rejection error.
    pub fn auth(url: impl Into<String>, status: u16) -> Self {
        Self::Auth {
            url: url.into(),
            status,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a spool IO error.
    pub fn io(url: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            url: url.into(),
            source,
        }
    }

    /// Returns true if this error invalidates the credential for the whole run.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    /// The Retry-After header carried by a rate-limited or unavailable response.
    #[must_use]
    pub fn retry_after(&self) -> Option<&str> {
        match self {
            Self::HttpStatus { retry_after, .. } => retry_after.as_deref(),
            _ => None,
        }
    }
}

/// A fetch that failed after all permitted attempts.
#[derive(Debug, Error)]
#[error("{error} (after {attempts} attempt(s))")]
pub struct FetchFailure {
    /// The error from the last attempt.
    #[source]
    pub error: FetchError,
    /// Number of attempts made, including the first.
    pub attempts: u32,
}

/// Errors raised while constructing a retrieval client.
#[derive(Debug, Error)]
pub enum ClientBuildError {
    /// The credential contains characters not allowed in an HTTP header.
    #[error("credential contains characters not allowed in an HTTP header")]
    InvalidCredential,

    /// The underlying HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),
}
