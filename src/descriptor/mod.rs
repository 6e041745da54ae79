//! Work items loaded from the workflow-run input table.
//!
//! Each row of the table becomes one [`RunDescriptor`]: a reference to a
//! remote log archive, the repository it belongs to, and the classification
//! that decides which output subtree it lands in.
//!
//! # Example
//!
//! ```
//! use runlog_core::descriptor::parse_descriptors;
//!
//! let table = "repo,run_id,conclusion,log_url\n\
//!              octo/app,42,failure,https://api.example.com/runs/42/logs\n";
//! let report = parse_descriptors(table.as_bytes()).unwrap();
//! assert_eq!(report.descriptors.len(), 1);
//! assert_eq!(report.descriptors[0].directory_name(), "octo_app_42");
//! ```

mod error;
mod loader;

use std::fmt;

pub use error::LoadError;
pub use loader::{DroppedRow, LoadReport, load_descriptors, parse_descriptors};

/// Outcome category of a workflow run, selecting the output subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    /// Any run that did not conclude with `failure`.
    Normal,
    /// A run whose conclusion was `failure`.
    Failure,
}

impl Classification {
    /// Maps a raw `conclusion` cell to a classification.
    ///
    /// Only `failure` (case-insensitive) selects [`Classification::Failure`];
    /// `success`, `cancelled`, empty cells and anything else are normal.
    #[must_use]
    pub fn from_conclusion(conclusion: Option<&str>) -> Self {
        match conclusion.map(str::trim) {
            Some(value) if value.eq_ignore_ascii_case("failure") => Self::Failure,
            _ => Self::Normal,
        }
    }

    /// Directory name of this classification under the output root.
    #[must_use]
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Normal => "logs_normal",
            Self::Failure => "logs_failure",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Normal => "normal",
            Self::Failure => "failure",
        };
        write!(f, "{label}")
    }
}

/// One unit of work: a remote log archive to fetch and classify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDescriptor {
    /// External run identifier, unique within a loaded batch.
    pub source_id: String,
    /// Archive location; `None` means there is nothing to fetch.
    pub artifact_url: Option<String>,
    /// Repository name made safe for use as a path component.
    pub repo_label: String,
    /// Output subtree selector.
    pub classification: Classification,
}

impl RunDescriptor {
    /// Returns true when this descriptor has no archive and must be skipped.
    #[must_use]
    pub fn is_skippable(&self) -> bool {
        self.artifact_url.is_none()
    }

    /// Name of the extraction directory: `{repo_label}_{source_id}`.
    ///
    /// Run ids are not unique across repositories, so both are always combined.
    #[must_use]
    pub fn directory_name(&self) -> String {
        format!("{}_{}", self.repo_label, self.source_id)
    }
}
