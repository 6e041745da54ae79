//! Durable, append-only progress ledger.
//!
//! The ledger is two line-oriented text files inside one directory:
//!
//! - `completed.txt` - one source id per line for every extracted archive
//! - `failed.tsv` - `source_id<TAB>reason` for every failed attempt
//!
//! Both files are only ever appended to. The succeeded set is read once when
//! the ledger is opened and never changes afterwards; resume decisions are
//! made against that snapshot. Writes go through a single mutex so concurrent
//! commits are serialized and every line lands whole.
//!
//! # Example
//!
//! ```no_run
//! use runlog_core::ledger::Ledger;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ledger = Ledger::open(Path::new("./out/.runlog")).await?;
//! if !ledger.snapshot().is_succeeded("42") {
//!     ledger.commit_success("42").await?;
//! }
//! ledger.commit_failure("43", "HTTP 404").await?;
//! # Ok(())
//! # }
//! ```

mod error;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

pub use error::LedgerError;

/// File name of the success log.
pub const COMPLETED_FILE: &str = "completed.txt";

/// File name of the failure log.
pub const FAILED_FILE: &str = "failed.tsv";

/// Ledger contents as they were when the ledger was opened.
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    succeeded: HashSet<String>,
    failed: HashMap<String, String>,
}

impl LedgerSnapshot {
    /// Returns true if a succeeded entry exists for `source_id`.
    #[must_use]
    pub fn is_succeeded(&self, source_id: &str) -> bool {
        self.succeeded.contains(source_id)
    }

    /// All source ids with a succeeded entry.
    #[must_use]
    pub fn succeeded(&self) -> &HashSet<String> {
        &self.succeeded
    }

    /// Most recent failure reason recorded for `source_id`, if any.
    #[must_use]
    pub fn failure_reason(&self, source_id: &str) -> Option<&str> {
        self.failed.get(source_id).map(String::as_str)
    }

    /// Number of distinct source ids that have failed but never succeeded.
    #[must_use]
    pub fn pending_failures(&self) -> usize {
        self.failed
            .keys()
            .filter(|id| !self.succeeded.contains(*id))
            .count()
    }
}

struct LedgerWriter {
    completed: File,
    failed: File,
    committed: HashSet<String>,
}

/// Append-only record of completed and failed source ids.
///
/// `Ledger` is `Send + Sync`; wrap it in `Arc` to share it with the task that
/// commits outcomes.
pub struct Ledger {
    dir: PathBuf,
    snapshot: LedgerSnapshot,
    writer: Mutex<LedgerWriter>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("dir", &self.dir)
            .field("succeeded", &self.snapshot.succeeded.len())
            .field("failed", &self.snapshot.failed.len())
            .finish_non_exhaustive()
    }
}

impl Ledger {
    /// Opens the ledger in `dir`, creating the directory and files if needed,
    /// and loads the snapshot used for resume decisions.
    ///
    /// A trailing line without its newline is the remains of an interrupted
    /// write; it is ignored and truncated away so later appends start on a
    /// clean line.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Io`] if the directory or files cannot be
    /// created, read, or repaired.
    #[instrument(fields(dir = %dir.display()))]
    pub async fn open(dir: &Path) -> Result<Self, LedgerError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| LedgerError::io(dir, e))?;

        let completed_path = dir.join(COMPLETED_FILE);
        let failed_path = dir.join(FAILED_FILE);
        let (completed, completed_text) = open_for_append(&completed_path).await?;
        let (failed, failed_text) = open_for_append(&failed_path).await?;

        let snapshot = LedgerSnapshot {
            succeeded: parse_completed(&completed_text),
            failed: parse_failed(&failed_text),
        };
        info!(
            succeeded = snapshot.succeeded.len(),
            failed = snapshot.failed.len(),
            "ledger loaded"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            writer: Mutex::new(LedgerWriter {
                completed,
                failed,
                committed: snapshot.succeeded.clone(),
            }),
            snapshot,
        })
    }

    /// Directory holding the ledger files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The state loaded by [`Ledger::open`]. Never reflects later commits.
    #[must_use]
    pub fn snapshot(&self) -> &LedgerSnapshot {
        &self.snapshot
    }

    /// Source ids that were already succeeded when the ledger was opened.
    #[must_use]
    pub fn completed(&self) -> &HashSet<String> {
        &self.snapshot.succeeded
    }

    /// Appends a succeeded entry and syncs it to disk before returning.
    ///
    /// Returns `Ok(false)` without writing if this ledger already holds a
    /// succeeded entry for `source_id`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidSourceId`] for ids containing control
    /// characters and [`LedgerError::Io`] if the write or sync fails.
    #[instrument(skip(self))]
    pub async fn commit_success(&self, source_id: &str) -> Result<bool, LedgerError> {
        validate_source_id(source_id)?;
        let mut writer = self.writer.lock().await;
        if writer.committed.contains(source_id) {
            debug!("success already recorded");
            return Ok(false);
        }

        let line = format!("{source_id}\n");
        append_line(&mut writer.completed, &line, &self.dir.join(COMPLETED_FILE)).await?;
        writer.committed.insert(source_id.to_string());
        debug!("success committed");
        Ok(true)
    }

    /// Appends a failure entry and syncs it to disk before returning.
    ///
    /// Tabs and line breaks in `reason` are replaced by spaces so the entry
    /// stays on one line.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidSourceId`] for ids containing control
    /// characters and [`LedgerError::Io`] if the write or sync fails.
    #[instrument(skip(self, reason))]
    pub async fn commit_failure(&self, source_id: &str, reason: &str) -> Result<(), LedgerError> {
        validate_source_id(source_id)?;
        let reason: String = reason
            .chars()
            .map(|c| if matches!(c, '\t' | '\n' | '\r') { ' ' } else { c })
            .collect();
        let line = format!("{source_id}\t{}\n", reason.trim());

        let mut writer = self.writer.lock().await;
        append_line(&mut writer.failed, &line, &self.dir.join(FAILED_FILE)).await?;
        debug!("failure committed");
        Ok(())
    }
}

fn validate_source_id(source_id: &str) -> Result<(), LedgerError> {
    if source_id.is_empty() || source_id.chars().any(char::is_control) {
        return Err(LedgerError::InvalidSourceId {
            source_id: source_id.to_string(),
        });
    }
    Ok(())
}

async fn append_line(file: &mut File, line: &str, path: &Path) -> Result<(), LedgerError> {
    file.write_all(line.as_bytes())
        .await
        .map_err(|e| LedgerError::io(path, e))?;
    file.flush().await.map_err(|e| LedgerError::io(path, e))?;
    file.sync_data().await.map_err(|e| LedgerError::io(path, e))
}

/// Opens `path` for appending and returns its complete lines.
async fn open_for_append(path: &Path) -> Result<(File, String), LedgerError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(LedgerError::io(path, e)),
    };

    let valid_len = bytes.iter().rposition(|b| *b == b'\n').map_or(0, |i| i + 1);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| LedgerError::io(path, e))?;

    if valid_len < bytes.len() {
        warn!(
            path = %path.display(),
            discarded_bytes = bytes.len() - valid_len,
            "discarding torn ledger line"
        );
        file.set_len(valid_len as u64)
            .await
            .map_err(|e| LedgerError::io(path, e))?;
        file.sync_data().await.map_err(|e| LedgerError::io(path, e))?;
    }

    let text = String::from_utf8_lossy(&bytes[..valid_len]).into_owned();
    Ok((file, text))
}

fn parse_completed(text: &str) -> HashSet<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_failed(text: &str) -> HashMap<String, String> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| match line.split_once('\t') {
            Some((id, reason)) => (id.trim().to_string(), reason.to_string()),
            None => (line.trim().to_string(), String::new()),
        })
        .collect()
}
