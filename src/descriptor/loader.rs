//! CSV loader producing [`RunDescriptor`]s in input order.

use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use super::{Classification, LoadError, RunDescriptor};

/// Column holding the repository slug (`owner/name`).
const REPO_COLUMN: &str = "repo";

/// Column holding the workflow run id.
const RUN_ID_COLUMN: &str = "run_id";

/// Cell values the metadata collector writes for a missing URL.
const NULL_MARKERS: [&str; 3] = ["nan", "none", "null"];

/// A row that was dropped while loading, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedRow {
    /// 1-based line number in the input table, when known.
    pub line: Option<u64>,
    /// Human-readable reason the row was dropped.
    pub reason: String,
}

/// Result of loading an input table.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Valid descriptors in input order.
    pub descriptors: Vec<RunDescriptor>,
    /// Rows that were dropped, in input order.
    pub dropped: Vec<DroppedRow>,
}

impl LoadReport {
    /// Number of descriptors that have nothing to fetch.
    #[must_use]
    pub fn skippable_count(&self) -> usize {
        self.descriptors.iter().filter(|d| d.is_skippable()).count()
    }

    fn drop_row(&mut self, line: Option<u64>, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(line, %reason, "dropping input row");
        self.dropped.push(DroppedRow { line, reason });
    }
}

#[derive(Debug, Deserialize)]
struct InputRow {
    #[serde(default)]
    repo: Option<String>,
    #[serde(default)]
    run_id: Option<String>,
    #[serde(default)]
    conclusion: Option<String>,
    #[serde(default)]
    log_url: Option<String>,
}

/// Loads descriptors from a CSV file on disk.
///
/// # Errors
///
/// Returns [`LoadError::Io`] if the file cannot be opened, and the errors of
/// [`parse_descriptors`] for structural problems with the table.
#[instrument(fields(path = %path.display()))]
pub fn load_descriptors(path: &Path) -> Result<LoadReport, LoadError> {
    let file = File::open(path).map_err(|e| LoadError::io(path, e))?;
    let report = parse_descriptors(file)?;
    info!(
        descriptors = report.descriptors.len(),
        skippable = report.skippable_count(),
        dropped = report.dropped.len(),
        "loaded input table"
    );
    Ok(report)
}

/// Parses descriptors from CSV text with a header row.
///
/// Rows without `repo` or `run_id`, malformed records, and repeated run ids
/// are dropped with a diagnostic. Rows without `log_url` are kept and marked
/// skippable.
///
/// # Errors
///
/// Returns [`LoadError::Header`] if the header row is unreadable and
/// [`LoadError::MissingColumn`] if `repo` or `run_id` is not a column.
pub fn parse_descriptors<R: Read>(input: R) -> Result<LoadReport, LoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(input);

    let headers = reader.headers().map_err(LoadError::Header)?.clone();
    for column in [REPO_COLUMN, RUN_ID_COLUMN] {
        if !headers.iter().any(|header| header == column) {
            return Err(LoadError::MissingColumn { column });
        }
    }

    let mut report = LoadReport::default();
    let mut seen = HashSet::new();

    for record in reader.records() {
        let record = match record {
            Ok(record) => record,
            Err(error) => {
                let line = error.position().map(csv::Position::line);
                let fatal = error.is_io_error();
                report.drop_row(line, format!("malformed record: {error}"));
                if fatal {
                    break;
                }
                continue;
            }
        };
        let line = record.position().map(csv::Position::line);

        let row: InputRow = match record.deserialize(Some(&headers)) {
            Ok(row) => row,
            Err(error) => {
                report.drop_row(line, format!("malformed record: {error}"));
                continue;
            }
        };

        let Some(raw_id) = row.run_id.as_deref().and_then(non_null) else {
            report.drop_row(line, "missing run_id");
            continue;
        };
        let Some(source_id) = normalize_run_id(raw_id) else {
            report.drop_row(line, format!("invalid run_id {:?}", row.run_id.unwrap_or_default()));
            continue;
        };
        let Some(repo_label) = row.repo.as_deref().and_then(repo_label) else {
            report.drop_row(line, format!("missing or invalid repo for run {source_id}"));
            continue;
        };
        if !seen.insert(source_id.clone()) {
            report.drop_row(line, format!("duplicate run_id {source_id}"));
            continue;
        }

        let descriptor = RunDescriptor {
            artifact_url: row.log_url.as_deref().and_then(non_null),
            classification: Classification::from_conclusion(row.conclusion.as_deref()),
            source_id,
            repo_label,
        };
        debug!(
            source_id = %descriptor.source_id,
            classification = %descriptor.classification,
            skippable = descriptor.is_skippable(),
            "parsed descriptor"
        );
        report.descriptors.push(descriptor);
    }

    Ok(report)
}

fn non_null(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty()
        || NULL_MARKERS
            .iter()
            .any(|marker| trimmed.eq_ignore_ascii_case(marker))
    {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Normalizes a non-null run id cell.
///
/// Integer columns that contained a null are written as floats (`123.0`) by
/// the collector; the fractional zero is stripped. Ids that could escape the
/// output directory or break a ledger line are rejected.
fn normalize_run_id(value: String) -> Option<String> {
    let value = match value.strip_suffix(".0") {
        Some(integer) if !integer.is_empty() && integer.bytes().all(|b| b.is_ascii_digit()) => {
            integer.to_string()
        }
        _ => value,
    };
    if value.contains(['/', '\\'])
        || value.chars().any(char::is_control)
        || value == "."
        || value == ".."
    {
        return None;
    }
    Some(value)
}

/// Turns `owner/name` into `owner_name` for use as a path component.
fn repo_label(raw: &str) -> Option<String> {
    let value = non_null(raw)?;
    let label = value.replace(['/', '\\'], "_");
    if label.chars().any(char::is_control) || label == "." || label == ".." {
        return None;
    }
    Some(label)
}
