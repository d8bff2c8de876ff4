//! Job state and transitions.
//!
//! A Job tracks one manifest entry through transcode and delivery. State
//! changes go through [`Job::advance`], which rejects anything outside the
//! machine below; `Delivered` and `Failed` are terminal and sticky.
//!
//! ```text
//! Pending → Transcoding → Transcoded → Delivering → Delivered
//!                │                          │
//!                └────────→ Failed ←────────┘
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors for job state handling
#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid state transition: {from:?} → {to:?}")]
    InvalidTransition { from: JobState, to: JobState },
}

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Not yet dispatched
    Pending,

    /// External tool is running
    Transcoding,

    /// Local file produced and verified non-empty
    Transcoded,

    /// Individual upload in flight
    Delivering,

    /// Individual upload succeeded (terminal)
    Delivered,

    /// Transcode or delivery exhausted its retry budget (terminal)
    Failed,
}

impl JobState {
    /// Terminal states admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }
}

/// The unit of work for one classified manifest entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Stable identifier (12-hex SHA-256 of title and URL)
    pub id: String,

    /// Current lifecycle state
    pub state: JobState,

    /// Transcoded output, if one exists on disk. A job with a local path is
    /// retained for its group archive even when individual delivery failed.
    pub local_path: Option<PathBuf>,

    /// Total attempts across transcode and delivery
    pub attempts: u32,

    /// Reason for the most recent failure
    pub last_error: Option<String>,
}

impl Job {
    /// Create a new pending job
    pub fn new(id: String) -> Self {
        Self {
            id,
            state: JobState::Pending,
            local_path: None,
            attempts: 0,
            last_error: None,
        }
    }

    /// Advance the state machine, rejecting illegal transitions
    pub fn advance(&mut self, to: JobState) -> Result<(), JobError> {
        use JobState::*;

        let legal = matches!(
            (self.state, to),
            (Pending, Transcoding)
                | (Transcoding, Transcoded)
                | (Transcoding, Failed)
                | (Transcoded, Delivering)
                | (Delivering, Delivered)
                | (Delivering, Failed)
        );

        if !legal {
            return Err(JobError::InvalidTransition {
                from: self.state,
                to,
            });
        }

        self.state = to;
        Ok(())
    }

    /// Record a failure reason and move to `Failed`
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), JobError> {
        self.last_error = Some(reason.into());
        self.advance(JobState::Failed)
    }

    /// Whether this job's file participates in the group archive
    pub fn is_retained(&self) -> bool {
        self.local_path.is_some()
    }
}

/// Stable job identifier from title and URL (first 12 hex chars of SHA-256),
/// so log lines and retries correlate across attempts.
pub fn job_id(raw_title: &str, url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_title.as_bytes());
    hasher.update(b"\n");
    hasher.update(url.as_bytes());
    let result = hasher.finalize();

    format!("{:x}", result)[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut job = Job::new(job_id("M01 Intro", "https://x/a.m3u8"));

        job.advance(JobState::Transcoding).unwrap();
        job.advance(JobState::Transcoded).unwrap();
        job.advance(JobState::Delivering).unwrap();
        job.advance(JobState::Delivered).unwrap();

        assert!(job.state.is_terminal());
    }

    #[test]
    fn test_terminal_states_are_sticky() {
        let mut job = Job::new("abc".to_string());
        job.advance(JobState::Transcoding).unwrap();
        job.fail("tool crashed").unwrap();

        for to in [
            JobState::Pending,
            JobState::Transcoding,
            JobState::Transcoded,
            JobState::Delivering,
            JobState::Delivered,
        ] {
            assert!(matches!(
                job.advance(to),
                Err(JobError::InvalidTransition { .. })
            ));
        }
        assert_eq!(job.state, JobState::Failed);

        let mut delivered = Job::new("def".to_string());
        delivered.advance(JobState::Transcoding).unwrap();
        delivered.advance(JobState::Transcoded).unwrap();
        delivered.advance(JobState::Delivering).unwrap();
        delivered.advance(JobState::Delivered).unwrap();
        assert!(delivered.advance(JobState::Failed).is_err());
        assert_eq!(delivered.state, JobState::Delivered);
    }

    #[test]
    fn test_no_skipping_states() {
        let mut job = Job::new("abc".to_string());
        assert!(job.advance(JobState::Transcoded).is_err());
        assert!(job.advance(JobState::Delivered).is_err());
        assert_eq!(job.state, JobState::Pending);
    }

    #[test]
    fn test_job_id_stable() {
        let a = job_id("M01 Intro", "https://x/a.m3u8");
        let b = job_id("M01 Intro", "https://x/a.m3u8");
        let c = job_id("M01 Outro", "https://x/a.m3u8");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 12);
    }

    #[test]
    fn test_retained_tracks_local_path() {
        let mut job = Job::new("abc".to_string());
        assert!(!job.is_retained());

        job.local_path = Some(PathBuf::from("/tmp/a.mp4"));
        assert!(job.is_retained());
    }
}
