//! Error types for loading the input table.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that make the whole input table unusable.
///
/// Problems confined to a single row never surface here; those rows are
/// dropped and reported through [`super::LoadReport::dropped`].
#[derive(Debug, Error)]
pub enum LoadError {
    /// The input file could not be opened.
    #[error("cannot read input table {path}: {source}")]
    Io {
        /// Path of the input table.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The header row could not be read.
    #[error("cannot read input table header: {0}")]
    Header(#[source] csv::Error),

    /// A column every row depends on is absent from the header.
    #[error("input table has no `{column}` column")]
    MissingColumn {
        /// Name of the absent column.
        column: &'static str,
    },
}

impl LoadError {
    /// Creates an IO error for the given input path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
