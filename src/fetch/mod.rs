//! Archive retrieval over HTTP.
//!
//! [`RetrievalClient`] fetches one archive per call, classifying each failure
//! as transient, permanent, rate-limited or auth and retrying per its
//! [`RetryPolicy`]. The scheduler only sees the [`ArchiveFetcher`] trait, so
//! tests can substitute an in-memory fetcher.

mod client;
mod constants;
mod error;
mod retry;

pub use client::{ArchiveFetcher, Credential, FetchedArchive, RetrievalClient, RetrievalConfig};
pub use constants::{ACCEPT_MEDIA_TYPE, DEFAULT_REQUEST_TIMEOUT};
pub use error::{ClientBuildError, FetchError, FetchFailure};
pub use retry::{
    DEFAULT_BACKOFF_FACTOR, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY,
    FailureType, RetryAfterPolicy, RetryDecision, RetryPolicy, classify_error, parse_retry_after,
};
