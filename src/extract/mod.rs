//! Archive extraction into the classified output tree.
//!
//! Each archive is unpacked into a `.staging-*` directory created next to its
//! final target, then renamed onto the target in one step. A failed
//! extraction therefore never leaves a partially populated target behind,
//! and a target that already exists is treated as done.

mod error;

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};
use zip::ZipArchive;
use zip::result::ZipError;

use crate::descriptor::{Classification, RunDescriptor};

pub use error::ExtractError;

/// Name prefix of in-progress staging directories.
pub const STAGING_PREFIX: &str = ".staging-";

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Root of the output tree: one subdirectory per classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    /// Creates a layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The output root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every target of one classification.
    #[must_use]
    pub fn classification_dir(&self, classification: Classification) -> PathBuf {
        self.root.join(classification.dir_name())
    }

    /// Final extraction directory for `descriptor`.
    #[must_use]
    pub fn target_for(&self, descriptor: &RunDescriptor) -> PathBuf {
        self.classification_dir(descriptor.classification)
            .join(descriptor.directory_name())
    }
}

/// Result of a successful [`ArchiveExtractor::extract`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedArchive {
    /// The target directory.
    pub path: PathBuf,
    /// Number of file entries written (zero when already present).
    pub entries: usize,
    /// The target existed before this call and was left untouched.
    pub already_present: bool,
}

impl ExtractedArchive {
    fn already_present(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            entries: 0,
            already_present: true,
        }
    }
}

/// An entry that passed name validation, ready to be written.
struct PlannedEntry {
    index: usize,
    relative: PathBuf,
    is_dir: bool,
}

/// Unpacks zip archives into an [`OutputLayout`].
#[derive(Debug, Clone)]
pub struct ArchiveExtractor {
    layout: OutputLayout,
}

impl ArchiveExtractor {
    /// Creates an extractor writing under `layout`.
    #[must_use]
    pub fn new(layout: OutputLayout) -> Self {
        Self { layout }
    }

    /// The output layout.
    #[must_use]
    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Final extraction directory for `descriptor`.
    #[must_use]
    pub fn target_for(&self, descriptor: &RunDescriptor) -> PathBuf {
        self.layout.target_for(descriptor)
    }

    /// Unpacks `archive` into `target`.
    ///
    /// Blocking: call from `spawn_blocking` in async code.
    ///
    /// # Errors
    ///
    /// - [`ExtractError::CorruptArchive`] if the archive cannot be parsed or
    ///   an entry fails to decompress.
    /// - [`ExtractError::UnsafeEntryPath`] if any entry name would escape
    ///   `target`. Checked for all entries before anything is written.
    /// - [`ExtractError::Filesystem`] if a directory or file cannot be
    ///   created or written.
    ///
    /// On error nothing exists at `target` that did not exist before.
    #[instrument(skip(self, archive), fields(target = %target.display()))]
    pub fn extract(&self, archive: File, target: &Path) -> Result<ExtractedArchive, ExtractError> {
        if target.exists() {
            debug!("target already present, skipping extraction");
            return Ok(ExtractedArchive::already_present(target));
        }

        let parent = target.parent().ok_or_else(|| {
            ExtractError::filesystem(
                target,
                io::Error::new(io::ErrorKind::InvalidInput, "target has no parent directory"),
            )
        })?;
        fs::create_dir_all(parent).map_err(|e| ExtractError::filesystem(parent, e))?;

        let mut zip =
            ZipArchive::new(BufReader::new(archive)).map_err(|e| ExtractError::corrupt(target, e))?;
        let plan = plan_entries(&mut zip, target)?;

        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(parent)
            .map_err(|e| ExtractError::filesystem(parent, e))?;

        let entries = write_entries(&mut zip, &plan, staging.path(), target)?;

        if let Err(error) = fs::rename(staging.path(), target) {
            if target.exists() {
                warn!(error = %error, "target appeared during extraction, keeping existing copy");
                return Ok(ExtractedArchive::already_present(target));
            }
            return Err(ExtractError::filesystem(target, error));
        }
        drop(staging);

        debug!(entries, "archive extracted");
        Ok(ExtractedArchive {
            path: target.to_path_buf(),
            entries,
            already_present: false,
        })
    }

    /// Removes staging directories left behind by an interrupted process.
    ///
    /// Must only be called while no extraction is running.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::Filesystem`] if a classification directory
    /// cannot be listed or a staging directory cannot be removed.
    #[instrument(skip(self), fields(root = %self.layout.root.display()))]
    pub fn remove_stale_staging(&self) -> Result<usize, ExtractError> {
        let mut removed = 0;
        for classification in [Classification::Normal, Classification::Failure] {
            let dir = self.layout.classification_dir(classification);
            let listing = match fs::read_dir(&dir) {
                Ok(listing) => listing,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(ExtractError::filesystem(&dir, e)),
            };
            for entry in listing {
                let entry = entry.map_err(|e| ExtractError::filesystem(&dir, e))?;
                if !entry.file_name().to_string_lossy().starts_with(STAGING_PREFIX) {
                    continue;
                }
                let path = entry.path();
                fs::remove_dir_all(&path).map_err(|e| ExtractError::filesystem(&path, e))?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "removed stale staging directories");
        }
        Ok(removed)
    }
}

/// Validates every entry name against `target` without decompressing.
fn plan_entries<R: Read + io::Seek>(
    zip: &mut ZipArchive<R>,
    target: &Path,
) -> Result<Vec<PlannedEntry>, ExtractError> {
    let mut plan = Vec::with_capacity(zip.len());
    for index in 0..zip.len() {
        let entry = zip
            .by_index_raw(index)
            .map_err(|e| ExtractError::corrupt(target, e))?;
        let is_dir = entry.is_dir();
        let relative = match entry.enclosed_name() {
            Some(relative) if relative.as_os_str().is_empty() && is_dir => continue,
            Some(relative) if !relative.as_os_str().is_empty() => relative,
            _ => return Err(ExtractError::unsafe_entry(target, entry.name())),
        };
        plan.push(PlannedEntry {
            index,
            relative,
            is_dir,
        });
    }
    Ok(plan)
}

/// Decompresses the planned entries under `staging`, returning the file count.
fn write_entries<R: Read + io::Seek>(
    zip: &mut ZipArchive<R>,
    plan: &[PlannedEntry],
    staging: &Path,
    target: &Path,
) -> Result<usize, ExtractError> {
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut files = 0;

    for planned in plan {
        let dest = staging.join(&planned.relative);
        if planned.is_dir {
            fs::create_dir_all(&dest).map_err(|e| ExtractError::filesystem(&dest, e))?;
            continue;
        }
        if let Some(dir) = dest.parent() {
            fs::create_dir_all(dir).map_err(|e| ExtractError::filesystem(dir, e))?;
        }

        let mut entry = zip
            .by_index(planned.index)
            .map_err(|e| ExtractError::corrupt(target, e))?;
        let mut out = File::create(&dest).map_err(|e| ExtractError::filesystem(&dest, e))?;

        loop {
            let read = match entry.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => read,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ExtractError::corrupt(target, ZipError::Io(e))),
            };
            out.write_all(&buffer[..read])
                .map_err(|e| ExtractError::filesystem(&dest, e))?;
        }
        out.sync_data()
            .map_err(|e| ExtractError::filesystem(&dest, e))?;
        files += 1;
    }

    Ok(files)
}
