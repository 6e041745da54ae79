//! Runlog Core Library
//!
//! Resumable, concurrent retrieval of CI run log archives. A batch of run
//! descriptors is loaded from a CSV table, every descriptor not already
//! recorded as done is fetched with retry/backoff, and each archive is
//! unpacked into a directory chosen by the run's classification. Progress is
//! kept in an append-only ledger so an interrupted run resumes where it left
//! off.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`descriptor`] - Input table loading and run descriptors
//! - [`ledger`] - Durable success/failure records
//! - [`fetch`] - HTTP retrieval with retry and backoff
//! - [`extract`] - Staged, atomic archive extraction
//! - [`engine`] - Bounded worker pool and result aggregation

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod descriptor;
pub mod engine;
pub mod extract;
pub mod fetch;
pub mod ledger;

// Re-export commonly used types
pub use descriptor::{Classification, LoadError, LoadReport, RunDescriptor, load_descriptors};
pub use engine::{
    DEFAULT_CONCURRENCY, DiskFullPolicy, EngineConfig, EngineError, RunEngine, RunStats,
    RunSummary,
};
pub use extract::{ArchiveExtractor, ExtractError, OutputLayout};
pub use fetch::{
    ArchiveFetcher, Credential, DEFAULT_MAX_ATTEMPTS, FetchError, RetrievalClient,
    RetrievalConfig, RetryAfterPolicy, RetryPolicy,
};
pub use ledger::{Ledger, LedgerError};
