//! Manifest ingestion: parsing and classification.
//!
//! The intake half of the pipeline:
//!
//! 1. **Manifest**: single-pass scan of `<title>:<url>` lines into typed
//!    entries, skipping (and counting) anything malformed
//! 2. **Classify**: pure title → group-key derivation plus filesystem-safe
//!    naming
//!
//! Everything downstream (jobs, groups, archives) consumes the
//! [`classify::ClassifiedItem`]s produced here.

pub mod classify;
pub mod manifest;

// Re-export key types
pub use classify::{CategoryRule, ClassifiedItem, Classifier};
pub use manifest::{ManifestEntry, ManifestError, ParsedManifest};
