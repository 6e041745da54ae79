//! Error types for ledger operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while reading or appending to the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Filesystem error on one of the ledger files.
    #[error("ledger IO error on {path}: {source}")]
    Io {
        /// The ledger file or directory involved.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A source id that cannot be written as a single ledger line.
    #[error("source id {source_id:?} cannot be recorded in the ledger")]
    InvalidSourceId {
        /// The rejected id.
        source_id: String,
    },
}

impl LedgerError {
    /// Creates an IO error for a ledger path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
