//! Adapter interfaces for external systems.
//!
//! Adapters wrap the two collaborators the core pipeline drives: the
//! external transcoding tool and the remote delivery channel. The
//! orchestrator only sees the traits, so tests substitute fakes.

pub mod ffmpeg;
pub mod telegram;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

// Re-export the concrete adapters
pub use ffmpeg::FfmpegTranscoder;
pub use telegram::{TelegramConfig, TelegramSink};

/// Errors from one transcode invocation
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("failed to spawn {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transcode timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("transcoder exited with code {code}: {stderr}")]
    ExitStatus { code: i32, stderr: String },

    #[error("transcoder produced empty or missing output at {path}")]
    EmptyOutput { path: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from one delivery attempt, classified for retry handling
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Network-ish failure; worth retrying with backoff
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// The recipient rejected the payload; retrying cannot help
    #[error("permanent delivery failure: {0}")]
    Permanent(String),

    /// Payload exceeds the recipient's size limit; reported distinctly and
    /// never retried
    #[error("payload of {size} bytes exceeds the {limit}-byte upload limit")]
    TooLarge { size: u64, limit: u64 },
}

impl DeliveryError {
    /// Only transient failures are eligible for retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// What kind of payload a delivery carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// A single transcoded video
    Video,

    /// A group archive
    Archive,
}

/// Caption and payload kind accompanying a delivery
#[derive(Debug, Clone)]
pub struct DeliveryMeta {
    pub caption: String,
    pub kind: MediaKind,
}

/// Drives the external media tool for one entry
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Human-readable adapter name
    fn name(&self) -> &str;

    /// Produce exactly one output file at `dest` on success. On any failure
    /// no partial file may remain at `dest`.
    async fn transcode(
        &self,
        source_url: &str,
        dest: &Path,
        timeout: Duration,
    ) -> Result<(), TranscodeError>;
}

/// Sends a finished file (video or archive) to the recipient
#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Human-readable adapter name
    fn name(&self) -> &str;

    /// One delivery attempt; retry policy lives with the caller
    async fn deliver(&self, path: &Path, meta: &DeliveryMeta) -> Result<(), DeliveryError>;
}

/// Bounded-rate status channel. Updates are best-effort: callers log and
/// swallow failures rather than letting a status update abort the work it
/// reports on.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn status(&self, text: &str) -> anyhow::Result<()>;
}

/// Status sink that writes to the tracing log; used when no remote status
/// channel is wired up.
#[derive(Debug, Default)]
pub struct LogStatusSink;

#[async_trait]
impl StatusSink for LogStatusSink {
    async fn status(&self, text: &str) -> anyhow::Result<()> {
        tracing::info!(status = %text);
        Ok(())
    }
}

/// Emit a status line, logging (not propagating) sink failures
pub async fn emit_status(sink: &dyn StatusSink, text: &str) {
    if let Err(e) = sink.status(text).await {
        warn!(error = %e, "status update failed");
    }
}
