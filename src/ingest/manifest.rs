//! Manifest parsing.
//!
//! A manifest is UTF-8 text with one `<title>:<url>` entry per line. The URL
//! must use http/https and end in the stream-manifest extension; the title
//! may itself contain colons, so recognition scans for the last colon before
//! the URL rather than splitting naively. Lines that do not qualify are
//! skipped and counted, never fatal; only a manifest with zero usable
//! entries is rejected.

use std::str::Lines;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;
use url::Url;

/// Extension that marks a recognized stream reference
pub const STREAM_EXTENSION: &str = ".m3u8";

/// Errors from manifest parsing
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("no usable entries in manifest ({lines_scanned} lines scanned, {skipped} skipped)")]
    Empty { lines_scanned: usize, skipped: usize },
}

/// One labeled stream reference. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub raw_title: String,
    pub url: String,
}

/// Outcome of a full manifest scan
#[derive(Debug)]
pub struct ParsedManifest {
    pub entries: Vec<ManifestEntry>,
    /// Non-empty lines that did not qualify as entries
    pub skipped: usize,
}

fn entry_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // Lazy title group tolerates embedded colons; the URL anchor only
        // matches from the scheme onward.
        Regex::new(r"^(.*?):(https?://\S+\.m3u8)\s*$").expect("valid entry pattern")
    })
}

/// Single-pass iterator over a manifest's qualifying entries.
///
/// Not restartable; `skipped()` is meaningful once iteration has finished.
pub struct Entries<'a> {
    lines: Lines<'a>,
    scanned: usize,
    skipped: usize,
}

impl<'a> Entries<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines(),
            scanned: 0,
            skipped: 0,
        }
    }

    /// Non-empty lines seen so far
    pub fn scanned(&self) -> usize {
        self.scanned
    }

    /// Non-empty lines that failed recognition so far
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn qualify(line: &str) -> Option<ManifestEntry> {
        let caps = entry_pattern().captures(line)?;

        let raw_title = caps.get(1)?.as_str().trim();
        if raw_title.is_empty() {
            return None;
        }

        let url = caps.get(2)?.as_str();
        let parsed = Url::parse(url).ok()?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return None;
        }
        if !parsed.path().ends_with(STREAM_EXTENSION) {
            return None;
        }

        Some(ManifestEntry {
            raw_title: raw_title.to_string(),
            url: url.to_string(),
        })
    }
}

impl<'a> Iterator for Entries<'a> {
    type Item = ManifestEntry;

    fn next(&mut self) -> Option<Self::Item> {
        for line in self.lines.by_ref() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            self.scanned += 1;

            match Self::qualify(line) {
                Some(entry) => return Some(entry),
                None => self.skipped += 1,
            }
        }
        None
    }
}

/// Lazily iterate a manifest's entries
pub fn entries(text: &str) -> Entries<'_> {
    Entries::new(text)
}

/// Scan the whole manifest. Fails only when zero entries qualify.
pub fn parse(text: &str) -> Result<ParsedManifest, ManifestError> {
    let mut iter = entries(text);
    let entries: Vec<ManifestEntry> = iter.by_ref().collect();

    if entries.is_empty() {
        return Err(ManifestError::Empty {
            lines_scanned: iter.scanned(),
            skipped: iter.skipped(),
        });
    }

    Ok(ParsedManifest {
        entries,
        skipped: iter.skipped(),
    })
}
