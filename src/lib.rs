//! streampack - batch media ingestion pipeline
//!
//! Takes a manifest of `Title:URL` stream references, remuxes each stream to
//! a local MP4 via ffmpeg, groups results by a category key derived from the
//! title, packages each group into a ZIP with a source manifest, and delivers
//! both the individual videos and the group archives to a Telegram chat,
//! reporting progress along the way.
//!
//! # Architecture
//!
//! - Failures are isolated: a bad entry, a dead stream, or a rejected upload
//!   never aborts the run; it lands in the summary counters instead
//! - All Job/Group/counter mutation happens on the orchestrator's control
//!   loop; workers only return typed outcomes
//! - Group archives are assembled from the recorded job list sorted by name,
//!   so the archive listing is reproducible run to run
//!
//! # Modules
//!
//! - `ingest`: manifest parsing and title classification
//! - `domain`: data structures (Job, Group, PipelineRun)
//! - `adapters`: external system integrations (ffmpeg, Telegram)
//! - `core`: orchestration logic (Orchestrator, Archive, Progress)
//!
//! # Usage
//!
//! ```bash
//! # Run a batch against a manifest
//! TELEGRAM_BOT_TOKEN=... TELEGRAM_CHAT_ID=... streampack manifest.txt
//! ```

pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod ingest;

// Re-export main types at crate root for convenience
pub use crate::core::{PipelineOrchestrator, RunSummary};
pub use domain::{Group, GroupKey, Job, JobState, PipelineRun, RunTotals};
pub use ingest::{ClassifiedItem, Classifier, ManifestEntry, ManifestError};

// Adapters
pub use adapters::{
    DeliveryError, DeliveryMeta, DeliverySink, FfmpegTranscoder, MediaKind, StatusSink,
    TelegramConfig, TelegramSink, TranscodeError, Transcoder,
};
