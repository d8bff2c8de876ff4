//! End-to-End Pipeline Tests
//!
//! Drives the orchestrator with fake collaborators: a transcoder that writes
//! files (or fails on demand) and a delivery sink that records what reached
//! it. Covers failure isolation, retained-despite-delivery-failure, empty
//! manifests, and cancellation.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use streampack::adapters::{
    DeliveryError, DeliveryMeta, DeliverySink, MediaKind, StatusSink, TranscodeError, Transcoder,
};
use streampack::config::{Config, RetryPolicy};
use streampack::core::PipelineOrchestrator;

/// Transcoder that writes a small payload, failing for URLs that contain the
/// configured marker
struct FakeTranscoder {
    fail_marker: Option<String>,
}

impl FakeTranscoder {
    fn ok() -> Self {
        Self { fail_marker: None }
    }

    fn failing_on(marker: &str) -> Self {
        Self {
            fail_marker: Some(marker.to_string()),
        }
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    fn name(&self) -> &str {
        "fake"
    }

    async fn transcode(
        &self,
        source_url: &str,
        dest: &Path,
        _timeout: Duration,
    ) -> Result<(), TranscodeError> {
        if let Some(marker) = &self.fail_marker {
            if source_url.contains(marker) {
                return Err(TranscodeError::Timeout {
                    timeout: Duration::from_secs(1),
                });
            }
        }
        tokio::fs::write(dest, b"fake media payload").await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Delivery {
    file_name: String,
    kind: MediaKind,
    caption: String,
}

/// Delivery sink that records payloads and captures archive listings at
/// delivery time (the orchestrator removes the files afterwards)
#[derive(Default)]
struct RecordingSink {
    reject_videos: bool,
    video_attempts: Mutex<u32>,
    deliveries: Mutex<Vec<Delivery>>,
    archive_listings: Mutex<Vec<Vec<String>>>,
}

impl RecordingSink {
    fn deliveries_of(&self, kind: MediaKind) -> Vec<Delivery> {
        self.deliveries
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.kind == kind)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl DeliverySink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver(&self, path: &Path, meta: &DeliveryMeta) -> Result<(), DeliveryError> {
        if meta.kind == MediaKind::Video {
            *self.video_attempts.lock().unwrap() += 1;
            if self.reject_videos {
                return Err(DeliveryError::TooLarge {
                    size: 999,
                    limit: 1,
                });
            }
        }

        if meta.kind == MediaKind::Archive {
            let file =
                std::fs::File::open(path).map_err(|e| DeliveryError::Permanent(e.to_string()))?;
            let mut zip = zip::ZipArchive::new(file)
                .map_err(|e| DeliveryError::Permanent(e.to_string()))?;
            let names: Vec<String> = (0..zip.len())
                .map(|i| zip.by_index(i).unwrap().name().to_string())
                .collect();
            self.archive_listings.lock().unwrap().push(names);
        }

        self.deliveries.lock().unwrap().push(Delivery {
            file_name: path.file_name().unwrap().to_string_lossy().to_string(),
            kind: meta.kind,
            caption: meta.caption.clone(),
        });
        Ok(())
    }
}

#[derive(Default)]
struct StatusRecorder {
    lines: Mutex<Vec<String>>,
}

#[async_trait]
impl StatusSink for StatusRecorder {
    async fn status(&self, text: &str) -> anyhow::Result<()> {
        self.lines.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

fn fast_config(workdir: &TempDir) -> Config {
    let fast_retry = |attempts: u32| RetryPolicy {
        max_attempts: attempts,
        initial_delay_ms: 1,
        max_delay_ms: 2,
        ..Default::default()
    };

    Config {
        workdir_root: workdir.path().join("work"),
        progress_interval_seconds: 0,
        transcode_retry: fast_retry(2),
        delivery_retry: fast_retry(3),
        ..Default::default()
    }
}

const TWO_GROUP_MANIFEST: &str = "\
M01 Intro:https://x.example/a.m3u8
M01 Outro:https://x.example/b.m3u8
Random:https://x.example/c.m3u8
";

#[tokio::test]
async fn test_two_groups_end_to_end() {
    let workdir = TempDir::new().unwrap();
    let sink = Arc::new(RecordingSink::default());
    let status = Arc::new(StatusRecorder::default());

    let orchestrator = PipelineOrchestrator::new(
        fast_config(&workdir),
        Arc::new(FakeTranscoder::ok()),
        sink.clone(),
        status.clone(),
    );

    let summary = orchestrator.run(TWO_GROUP_MANIFEST).await.unwrap();

    assert_eq!(summary.totals.attempted, 3);
    assert_eq!(summary.totals.succeeded, 3);
    assert_eq!(summary.totals.failed, 0);
    assert_eq!(summary.archives_delivered, 2);
    assert_eq!(summary.archives_failed, 0);

    // Three videos and two archives reached the sink
    let videos = sink.deliveries_of(MediaKind::Video);
    assert_eq!(videos.len(), 3);
    assert!(videos.iter().any(|d| d.caption == "M01 Intro"));
    let archives = sink.deliveries_of(MediaKind::Archive);
    assert_eq!(archives.len(), 2);
    assert!(archives
        .iter()
        .any(|d| d.file_name == "Uncategorized_M01.zip"));
    assert!(archives
        .iter()
        .any(|d| d.file_name == "Uncategorized_MISC.zip"));

    // The module archive holds both media files plus the source manifest
    let listings = sink.archive_listings.lock().unwrap();
    let module_listing = listings.iter().find(|l| l.len() == 3).unwrap();
    assert_eq!(
        *module_listing,
        vec!["M01 Intro.mp4", "M01 Outro.mp4", "sources.txt"]
    );

    // Working directories are gone once the run concludes
    let mut entries = std::fs::read_dir(workdir.path().join("work")).unwrap();
    assert!(entries.next().is_none());

    // The final summary went out on the status channel
    let lines = status.lines.lock().unwrap();
    assert!(lines.iter().any(|l| l.contains("Run complete")));
}

#[tokio::test]
async fn test_transcode_failure_is_isolated() {
    let workdir = TempDir::new().unwrap();
    let sink = Arc::new(RecordingSink::default());

    let orchestrator = PipelineOrchestrator::new(
        fast_config(&workdir),
        Arc::new(FakeTranscoder::failing_on("b.m3u8")),
        sink.clone(),
        Arc::new(StatusRecorder::default()),
    );

    let summary = orchestrator.run(TWO_GROUP_MANIFEST).await.unwrap();

    // One job failed, the rest of the run continued
    assert_eq!(summary.totals.attempted, 3);
    assert_eq!(summary.totals.succeeded, 2);
    assert_eq!(summary.totals.failed, 1);

    // The failing job's group still archived its surviving item
    assert_eq!(summary.archives_delivered, 2);
    let listings = sink.archive_listings.lock().unwrap();
    assert!(listings
        .iter()
        .any(|l| *l == vec!["M01 Intro.mp4".to_string(), "sources.txt".to_string()]));
}

#[tokio::test]
async fn test_rejected_video_still_reaches_group_archive() {
    let workdir = TempDir::new().unwrap();
    let sink = Arc::new(RecordingSink {
        reject_videos: true,
        ..Default::default()
    });

    let orchestrator = PipelineOrchestrator::new(
        fast_config(&workdir),
        Arc::new(FakeTranscoder::ok()),
        sink.clone(),
        Arc::new(StatusRecorder::default()),
    );

    let summary = orchestrator.run(TWO_GROUP_MANIFEST).await.unwrap();

    // Every individual delivery failed permanently
    assert_eq!(summary.totals.succeeded, 0);
    assert_eq!(summary.totals.failed, 3);

    // Size-exceeded is permanent: exactly one attempt per video, no retries
    assert_eq!(*sink.video_attempts.lock().unwrap(), 3);
    assert!(sink.deliveries_of(MediaKind::Video).is_empty());

    // The local files stayed retained, so both archives carry all media
    assert_eq!(summary.archives_delivered, 2);
    let listings = sink.archive_listings.lock().unwrap();
    let total_media: usize = listings.iter().map(|l| l.len() - 1).sum();
    assert_eq!(total_media, 3);
}

#[tokio::test]
async fn test_empty_manifest_aborts_without_workdirs() {
    let workdir = TempDir::new().unwrap();

    let orchestrator = PipelineOrchestrator::new(
        fast_config(&workdir),
        Arc::new(FakeTranscoder::ok()),
        Arc::new(RecordingSink::default()),
        Arc::new(StatusRecorder::default()),
    );

    let result = orchestrator.run("no entries in here\n").await;

    assert!(result.is_err());
    assert!(!workdir.path().join("work").exists());
}

#[tokio::test]
async fn test_cancellation_skips_dispatch_but_cleans_up() {
    let workdir = TempDir::new().unwrap();
    let sink = Arc::new(RecordingSink::default());

    let orchestrator = PipelineOrchestrator::new(
        fast_config(&workdir),
        Arc::new(FakeTranscoder::ok()),
        sink.clone(),
        Arc::new(StatusRecorder::default()),
    );

    // Cancel before the run starts: nothing should be attempted
    orchestrator.cancellation_token().cancel();
    let summary = orchestrator.run(TWO_GROUP_MANIFEST).await.unwrap();

    assert_eq!(summary.totals.attempted, 0);
    assert_eq!(summary.archives_delivered, 0);
    assert!(sink.deliveries.lock().unwrap().is_empty());

    // Cleanup still ran
    let mut entries = std::fs::read_dir(workdir.path().join("work")).unwrap();
    assert!(entries.next().is_none());
}

#[tokio::test]
async fn test_rerun_produces_identical_archive_membership() {
    let manifest = TWO_GROUP_MANIFEST;

    let mut runs: Vec<Vec<Vec<String>>> = Vec::new();
    for _ in 0..2 {
        let workdir = TempDir::new().unwrap();
        let sink = Arc::new(RecordingSink::default());

        let orchestrator = PipelineOrchestrator::new(
            fast_config(&workdir),
            Arc::new(FakeTranscoder::ok()),
            sink.clone(),
            Arc::new(StatusRecorder::default()),
        );
        orchestrator.run(manifest).await.unwrap();

        let mut listings = sink.archive_listings.lock().unwrap().clone();
        listings.sort();
        runs.push(listings);
    }

    assert_eq!(runs[0], runs[1]);
}
