//! ffmpeg transcode worker.
//!
//! Spawns the system ffmpeg to pull a stream down into a local MP4. The
//! invocation remuxes (`-c copy`, no re-encode) so the operation stays
//! I/O-bound, applies the `aac_adtstoasc` bitstream filter for MP4 audio
//! compatibility, and overwrites any existing output (`-y`), which makes
//! re-invocation with the same destination idempotent.
//!
//! Success means exit code 0 AND a non-empty output file. Anything else is a
//! failure, and the partial output (if any) is removed before returning.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::{TranscodeError, Transcoder};

/// Cap on stderr captured into error messages
const MAX_STDERR_CHARS: usize = 400;

/// Transcoder backed by the ffmpeg CLI
pub struct FfmpegTranscoder {
    /// Path to the ffmpeg binary (default: "ffmpeg")
    binary_path: String,
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegTranscoder {
    /// Create a transcoder using the system ffmpeg
    pub fn new() -> Self {
        Self {
            binary_path: "ffmpeg".to_string(),
        }
    }

    /// Create a transcoder with a custom binary path
    pub fn with_binary_path(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }

    async fn run_ffmpeg(
        &self,
        source_url: &str,
        dest: &Path,
        limit: Duration,
    ) -> Result<(), TranscodeError> {
        debug!(url = %source_url, dest = %dest.display(), "spawning ffmpeg");

        let child = Command::new(&self.binary_path)
            .args(["-y", "-i", source_url])
            .args(["-bsf:a", "aac_adtstoasc"])
            .args(["-c", "copy"])
            .args(["-loglevel", "error"])
            .arg(dest)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            // Dropping the timed-out future must not leave ffmpeg running
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TranscodeError::Spawn {
                tool: self.binary_path.clone(),
                source: e,
            })?;

        let output = match timeout(limit, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => return Err(TranscodeError::Timeout { timeout: limit }),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TranscodeError::ExitStatus {
                code: output.status.code().unwrap_or(-1),
                stderr: truncate(stderr.trim(), MAX_STDERR_CHARS),
            });
        }

        // Exit 0 alone is not success: a dead stream can yield an empty file
        match tokio::fs::metadata(dest).await {
            Ok(meta) if meta.len() > 0 => Ok(()),
            _ => Err(TranscodeError::EmptyOutput {
                path: dest.to_path_buf(),
            }),
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn transcode(
        &self,
        source_url: &str,
        dest: &Path,
        limit: Duration,
    ) -> Result<(), TranscodeError> {
        match self.run_ffmpeg(source_url, dest, limit).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // No partial artifacts left behind
                let _ = tokio::fs::remove_file(dest).await;
                Err(e)
            }
        }
    }
}
