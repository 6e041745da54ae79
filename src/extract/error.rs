//! Error types for archive extraction.

use std::io::ErrorKind;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while unpacking one archive.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The archive could not be parsed or an entry failed to decompress.
    #[error("corrupt archive for {target}: {source}")]
    CorruptArchive {
        /// The directory the archive was destined for.
        target: PathBuf,
        /// The underlying zip error.
        #[source]
        source: zip::result::ZipError,
    },

    /// An entry name escapes the target directory (absolute path or `..`).
    #[error("unsafe entry path '{entry}' in archive for {target}")]
    UnsafeEntryPath {
        /// The directory the archive was destined for.
        target: PathBuf,
        /// The offending entry name as stored in the archive.
        entry: String,
    },

    /// A local filesystem operation failed.
    #[error("filesystem error at {path}: {source}")]
    Filesystem {
        /// The path being created or written.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl ExtractError {
    /// Creates a corrupt archive error.
    pub fn corrupt(target: impl Into<PathBuf>, source: zip::result::ZipError) -> Self {
        Self::CorruptArchive {
            target: target.into(),
            source,
        }
    }

    /// Creates an unsafe entry path error.
    pub fn unsafe_entry(target: impl Into<PathBuf>, entry: impl Into<String>) -> Self {
        Self::UnsafeEntryPath {
            target: target.into(),
            entry: entry.into(),
        }
    }

    /// Creates a filesystem error.
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Returns true if the local disk (or quota) is exhausted.
    ///
    /// Such a failure will repeat for every remaining item.
    #[must_use]
    pub fn is_storage_exhausted(&self) -> bool {
        match self {
            Self::Filesystem { source, .. } => source.kind() == ErrorKind::StorageFull,
            _ => false,
        }
    }
}
