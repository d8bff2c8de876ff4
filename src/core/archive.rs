//! Group archive assembly.
//!
//! Packages a completed group's retained files into one ZIP plus a plaintext
//! manifest of the original source URLs. Membership and ordering come from
//! the group's recorded job list sorted by file name, never from directory
//! iteration, so the archive's directory listing is reproducible for the
//! same set of retained files.

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

use thiserror::Error;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::domain::GroupKey;

/// Name of the companion manifest inside every archive
pub const SOURCES_MANIFEST: &str = "sources.txt";

/// Errors from archive assembly
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The group retained zero files; delivery is skipped, the run continues
    #[error("group retained no files to archive")]
    Empty,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// One retained media file destined for a group archive
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// File name inside the archive (sanitized, unique within the group)
    pub file_name: String,
    /// Location of the transcoded file on disk
    pub path: PathBuf,
    /// Original stream reference, recorded for traceability
    pub source_url: String,
}

/// Everything needed to build one group's archive, detached from the live
/// Group so assembly can run on a blocking task
#[derive(Debug, Clone)]
pub struct ArchiveSpec {
    pub key: GroupKey,
    pub entries: Vec<ArchiveEntry>,
    /// Directory the finished archive is written into
    pub output_dir: PathBuf,
}

impl ArchiveSpec {
    /// Deterministic archive path for this group
    pub fn archive_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.zip", self.key.archive_stem()))
    }
}

/// Build the archive for one group. Blocking; call via `spawn_blocking`.
pub fn build_archive(spec: &ArchiveSpec) -> Result<PathBuf, ArchiveError> {
    if spec.entries.is_empty() {
        return Err(ArchiveError::Empty);
    }

    let mut entries: Vec<&ArchiveEntry> = spec.entries.iter().collect();
    entries.sort_by(|a, b| a.file_name.cmp(&b.file_name));

    let archive_path = spec.archive_path();
    let file = File::create(&archive_path)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in &entries {
        debug!(file = %entry.file_name, "adding to archive");
        let mut media = File::open(&entry.path)?;
        zip.start_file(entry.file_name.as_str(), options)?;
        io::copy(&mut media, &mut zip)?;
    }

    zip.start_file(SOURCES_MANIFEST, options)?;
    writeln!(zip, "# {} - original stream sources", spec.key)?;
    for entry in &entries {
        writeln!(zip, "{}\t{}", entry.file_name, entry.source_url)?;
    }

    zip.finish()?;

    Ok(archive_path)
}
