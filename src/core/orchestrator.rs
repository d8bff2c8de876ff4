//! Pipeline orchestrator.
//!
//! Coordinates the end-to-end batch: manifest parsing, classification into
//! groups, bounded transcode dispatch, per-item delivery, per-group
//! archiving, and cleanup.
//!
//! Worker tasks own copies of their inputs and report back through typed
//! outcomes; every Job, Group, and counter mutation happens on the control
//! loop, so the run's aggregates have a single writer and never race.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{
    emit_status, DeliveryError, DeliveryMeta, DeliverySink, MediaKind, StatusSink,
    TranscodeError, Transcoder,
};
use crate::config::{Config, RetryPolicy};
use crate::domain::{GroupKey, Job, JobState, PipelineRun, RunTotals};
use crate::ingest::classify::Classifier;
use crate::ingest::manifest;

use super::archive::{build_archive, ArchiveEntry, ArchiveError, ArchiveSpec};
use super::progress::ProgressReporter;

/// Final accounting for one run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub totals: RunTotals,
    pub archives_delivered: u32,
    pub archives_failed: u32,
    /// Manifest lines that did not qualify as entries
    pub skipped_lines: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// What one job worker reports back to the control loop
#[derive(Debug)]
enum JobResult {
    /// Transcoded and individually delivered
    Delivered,

    /// Transcoded and retained for the group archive, but individual
    /// delivery failed
    DeliveryFailed { reason: String },

    /// Transcode failed; nothing retained
    TranscodeFailed { reason: String },

    /// Cancelled before work started; the job stays pending
    Skipped,
}

#[derive(Debug)]
struct JobOutcome {
    key: GroupKey,
    index: usize,
    attempts: u32,
    result: JobResult,
}

/// What a group finalizer reports back
#[derive(Debug)]
enum GroupResult {
    ArchiveDelivered,

    /// Zero retained files; archiving skipped, not an error for the run
    NothingRetained,

    ArchiveFailed { reason: String },

    ArchiveDeliveryFailed { reason: String },

    /// Cancelled; directory cleaned without archiving
    Skipped,
}

#[derive(Debug)]
struct GroupOutcome {
    key: GroupKey,
    result: GroupResult,
}

/// Main pipeline orchestrator
pub struct PipelineOrchestrator {
    config: Config,
    classifier: Classifier,
    transcoder: Arc<dyn Transcoder>,
    delivery: Arc<dyn DeliverySink>,
    status: Arc<dyn StatusSink>,
    cancel: CancellationToken,
}

impl PipelineOrchestrator {
    /// Create a new orchestrator. The config is built once at process start;
    /// nothing reads configuration from global state mid-run.
    pub fn new(
        config: Config,
        transcoder: Arc<dyn Transcoder>,
        delivery: Arc<dyn DeliverySink>,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        let classifier = match config.classification.clone() {
            Some(rules) => Classifier::new(rules),
            None => Classifier::with_default_rules(),
        };

        Self {
            config,
            classifier,
            transcoder,
            delivery,
            status,
            cancel: CancellationToken::new(),
        }
    }

    /// Token for cooperative cancellation: cancelling stops dispatch of new
    /// jobs, lets in-flight jobs finish or time out, and still runs cleanup.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execute the full batch for one manifest
    #[instrument(skip(self, manifest_text))]
    pub async fn run(&self, manifest_text: &str) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, "starting batch run");

        // Parse before any directory exists: an unusable manifest aborts the
        // run with nothing to clean up.
        let parsed = manifest::parse(manifest_text).context("manifest rejected")?;
        if parsed.skipped > 0 {
            warn!(skipped = parsed.skipped, "manifest lines did not qualify");
        }
        emit_status(
            self.status.as_ref(),
            &format!(
                "Found {} videos in manifest ({} lines skipped)",
                parsed.entries.len(),
                parsed.skipped
            ),
        )
        .await;

        let work_dir = self.config.workdir_root.join(format!("run-{}", run_id));
        let mut run = PipelineRun::new(run_id, work_dir);
        tokio::fs::create_dir_all(&run.work_dir)
            .await
            .with_context(|| {
                format!(
                    "failed to initialize working directory {}",
                    run.work_dir.display()
                )
            })?;

        for entry in parsed.entries {
            run.admit(self.classifier.classify_entry(entry));
        }
        for group in run.groups.values() {
            tokio::fs::create_dir_all(&group.work_dir)
                .await
                .with_context(|| {
                    format!(
                        "failed to create group directory {}",
                        group.work_dir.display()
                    )
                })?;
        }

        let total_jobs = run.job_count() as u64;
        let mut progress = ProgressReporter::new(
            self.status.clone(),
            "Batch progress",
            self.config.progress_interval(),
        );

        // Dispatch every job; the semaphore bounds actual concurrency to the
        // configured worker count.
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_transcodes));
        let mut workers: JoinSet<JobOutcome> = JoinSet::new();
        let mut remaining: BTreeMap<GroupKey, usize> = BTreeMap::new();

        for group in run.groups.values() {
            emit_status(
                self.status.as_ref(),
                &format!("Group {}: {} item(s)", group.key, group.len()),
            )
            .await;
            remaining.insert(group.key.clone(), group.len());

            for (index, gi) in group.items().iter().enumerate() {
                workers.spawn(job_worker(JobContext {
                    key: group.key.clone(),
                    index,
                    job_id: gi.job.id.clone(),
                    display_name: gi.item.sanitized_name.clone(),
                    url: gi.item.entry.url.clone(),
                    dest: group.work_dir.join(gi.file_name()),
                    transcode_timeout: self.config.transcode_timeout(),
                    transcode_retry: self.config.transcode_retry.clone(),
                    delivery_retry: self.config.delivery_retry.clone(),
                    transcoder: self.transcoder.clone(),
                    delivery: self.delivery.clone(),
                    status: self.status.clone(),
                    semaphore: semaphore.clone(),
                    cancel: self.cancel.clone(),
                }));
            }
        }

        let mut finalizers: JoinSet<GroupOutcome> = JoinSet::new();
        let mut finalized: BTreeSet<GroupKey> = BTreeSet::new();
        let mut done: u64 = 0;

        while let Some(joined) = workers.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = %e, "job worker panicked");
                    continue;
                }
            };
            done += 1;

            self.apply_job_outcome(&mut run, &outcome).await;

            if let Some(rem) = remaining.get_mut(&outcome.key) {
                *rem = rem.saturating_sub(1);
                // Archive assembly strictly follows the last terminal job of
                // its group; other groups may still be transcoding.
                if *rem == 0 && finalized.insert(outcome.key.clone()) {
                    self.spawn_finalize(&run, &outcome.key, &mut finalizers);
                }
            }

            progress.update(done, total_jobs).await;
        }
        progress.finish(total_jobs).await;

        // Groups whose outcomes were lost (worker panic) still get their
        // retained files archived and their directories cleaned.
        let unfinalized: Vec<GroupKey> = remaining
            .keys()
            .filter(|key| !finalized.contains(*key))
            .cloned()
            .collect();
        for key in unfinalized {
            finalized.insert(key.clone());
            self.spawn_finalize(&run, &key, &mut finalizers);
        }

        let mut archives_delivered = 0u32;
        let mut archives_failed = 0u32;

        while let Some(joined) = finalizers.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = %e, "group finalizer panicked");
                    archives_failed += 1;
                    continue;
                }
            };

            match outcome.result {
                GroupResult::ArchiveDelivered => {
                    archives_delivered += 1;
                    emit_status(
                        self.status.as_ref(),
                        &format!("Delivered archive for group {}", outcome.key),
                    )
                    .await;
                }
                GroupResult::NothingRetained => {
                    info!(group = %outcome.key, "no retained files, archive skipped");
                    emit_status(
                        self.status.as_ref(),
                        &format!("Group {}: nothing to archive", outcome.key),
                    )
                    .await;
                }
                GroupResult::ArchiveFailed { reason } => {
                    archives_failed += 1;
                    emit_status(
                        self.status.as_ref(),
                        &format!("Failed (archive): {} - {}", outcome.key, reason),
                    )
                    .await;
                }
                GroupResult::ArchiveDeliveryFailed { reason } => {
                    archives_failed += 1;
                    emit_status(
                        self.status.as_ref(),
                        &format!("Failed (archive delivery): {} - {}", outcome.key, reason),
                    )
                    .await;
                }
                GroupResult::Skipped => {
                    debug!(group = %outcome.key, "group finalize skipped by cancellation");
                }
            }
        }

        let summary = RunSummary {
            run_id,
            totals: run.totals,
            archives_delivered,
            archives_failed,
            skipped_lines: parsed.skipped,
            started_at,
            finished_at: Utc::now(),
        };
        emit_status(
            self.status.as_ref(),
            &format!(
                "Run complete: {} attempted, {} succeeded, {} failed; {} archive(s) delivered",
                summary.totals.attempted,
                summary.totals.succeeded,
                summary.totals.failed,
                summary.archives_delivered
            ),
        )
        .await;

        // The run directory (and any archives inside) goes away regardless
        // of outcome.
        if let Err(e) = tokio::fs::remove_dir_all(&run.work_dir).await {
            warn!(dir = %run.work_dir.display(), error = %e, "failed to remove run directory");
        }

        info!(
            run_id = %summary.run_id,
            attempted = summary.totals.attempted,
            succeeded = summary.totals.succeeded,
            failed = summary.totals.failed,
            archives = summary.archives_delivered,
            "batch run finished"
        );

        Ok(summary)
    }

    /// Apply one worker outcome: walk the job's state machine, update the
    /// run totals, and report failures with title, stage, and reason.
    async fn apply_job_outcome(&self, run: &mut PipelineRun, outcome: &JobOutcome) {
        enum Tally {
            None,
            Succeeded,
            Failed {
                stage: &'static str,
                title: String,
                reason: String,
            },
        }

        let tally = {
            let Some(group) = run.groups.get_mut(&outcome.key) else {
                error!(group = %outcome.key, "outcome for unknown group");
                return;
            };
            let work_dir = group.work_dir.clone();
            let Some(gi) = group.items_mut().get_mut(outcome.index) else {
                error!(group = %outcome.key, index = outcome.index, "outcome for unknown job");
                return;
            };

            gi.job.attempts = outcome.attempts;
            let title = gi.item.sanitized_name.clone();
            let dest = work_dir.join(gi.file_name());

            match &outcome.result {
                JobResult::Skipped => {
                    debug!(job = %gi.job.id, "job skipped by cancellation");
                    Tally::None
                }
                JobResult::Delivered => {
                    gi.job.local_path = Some(dest);
                    walk_states(
                        &mut gi.job,
                        &[
                            JobState::Transcoding,
                            JobState::Transcoded,
                            JobState::Delivering,
                            JobState::Delivered,
                        ],
                    );
                    Tally::Succeeded
                }
                JobResult::DeliveryFailed { reason } => {
                    // The local file stays retained: the group archive is a
                    // second, independent chance to reach the recipient.
                    gi.job.local_path = Some(dest);
                    walk_states(
                        &mut gi.job,
                        &[
                            JobState::Transcoding,
                            JobState::Transcoded,
                            JobState::Delivering,
                        ],
                    );
                    if let Err(e) = gi.job.fail(reason.clone()) {
                        error!(job = %gi.job.id, error = %e, "state machine violation");
                    }
                    Tally::Failed {
                        stage: "delivery",
                        title,
                        reason: reason.clone(),
                    }
                }
                JobResult::TranscodeFailed { reason } => {
                    walk_states(&mut gi.job, &[JobState::Transcoding]);
                    if let Err(e) = gi.job.fail(reason.clone()) {
                        error!(job = %gi.job.id, error = %e, "state machine violation");
                    }
                    Tally::Failed {
                        stage: "transcode",
                        title,
                        reason: reason.clone(),
                    }
                }
            }
        };

        match tally {
            Tally::None => {}
            Tally::Succeeded => {
                run.totals.attempted += 1;
                run.totals.succeeded += 1;
            }
            Tally::Failed {
                stage,
                title,
                reason,
            } => {
                run.totals.attempted += 1;
                run.totals.failed += 1;
                emit_status(
                    self.status.as_ref(),
                    &format!("Failed ({}): {} - {}", stage, title, reason),
                )
                .await;
            }
        }
    }

    /// Spawn the archive/deliver/cleanup task for a completed group
    fn spawn_finalize(
        &self,
        run: &PipelineRun,
        key: &GroupKey,
        finalizers: &mut JoinSet<GroupOutcome>,
    ) {
        let Some(group) = run.groups.get(key) else {
            error!(group = %key, "finalize requested for unknown group");
            return;
        };

        let entries: Vec<ArchiveEntry> = group
            .retained()
            .map(|gi| ArchiveEntry {
                file_name: gi.file_name(),
                path: gi
                    .job
                    .local_path
                    .clone()
                    .unwrap_or_else(|| group.work_dir.join(gi.file_name())),
                source_url: gi.item.entry.url.clone(),
            })
            .collect();

        finalizers.spawn(finalize_group(FinalizeContext {
            key: key.clone(),
            spec: ArchiveSpec {
                key: key.clone(),
                entries,
                output_dir: run.work_dir.clone(),
            },
            work_dir: group.work_dir.clone(),
            delivery: self.delivery.clone(),
            status: self.status.clone(),
            delivery_retry: self.config.delivery_retry.clone(),
            cancel: self.cancel.clone(),
        }));
    }
}

/// Walk a job through successive states, logging (not panicking on) any
/// violation; transitions here are driven by outcomes the machine already
/// permits.
fn walk_states(job: &mut Job, states: &[JobState]) {
    for &state in states {
        if let Err(e) = job.advance(state) {
            error!(job = %job.id, error = %e, "state machine violation");
            return;
        }
    }
}

struct JobContext {
    key: GroupKey,
    index: usize,
    job_id: String,
    display_name: String,
    url: String,
    dest: PathBuf,
    transcode_timeout: Duration,
    transcode_retry: RetryPolicy,
    delivery_retry: RetryPolicy,
    transcoder: Arc<dyn Transcoder>,
    delivery: Arc<dyn DeliverySink>,
    status: Arc<dyn StatusSink>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
}

/// One job's worker: transcode with retry, then individual delivery with
/// retry. Blocking externals run here, off the control loop.
async fn job_worker(ctx: JobContext) -> JobOutcome {
    let skipped = |ctx: &JobContext| JobOutcome {
        key: ctx.key.clone(),
        index: ctx.index,
        attempts: 0,
        result: JobResult::Skipped,
    };

    let _permit = match ctx.semaphore.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return skipped(&ctx),
    };
    if ctx.cancel.is_cancelled() {
        return skipped(&ctx);
    }

    debug!(job = %ctx.job_id, url = %ctx.url, "transcoding");
    emit_status(
        ctx.status.as_ref(),
        &format!("Downloading: {}", ctx.display_name),
    )
    .await;

    let (transcode_attempts, transcoded) = transcode_with_retry(
        ctx.transcoder.as_ref(),
        &ctx.url,
        &ctx.dest,
        ctx.transcode_timeout,
        &ctx.transcode_retry,
    )
    .await;

    if let Err(e) = transcoded {
        return JobOutcome {
            key: ctx.key,
            index: ctx.index,
            attempts: transcode_attempts,
            result: JobResult::TranscodeFailed {
                reason: e.to_string(),
            },
        };
    }

    emit_status(
        ctx.status.as_ref(),
        &format!("Uploading: {}", ctx.display_name),
    )
    .await;

    let meta = DeliveryMeta {
        caption: ctx.display_name.clone(),
        kind: MediaKind::Video,
    };
    let (delivery_attempts, delivered) = deliver_with_retry(
        ctx.delivery.as_ref(),
        &ctx.dest,
        &meta,
        &ctx.delivery_retry,
    )
    .await;

    let result = match delivered {
        Ok(()) => JobResult::Delivered,
        Err(e) => JobResult::DeliveryFailed {
            reason: e.to_string(),
        },
    };

    JobOutcome {
        key: ctx.key,
        index: ctx.index,
        attempts: transcode_attempts + delivery_attempts,
        result,
    }
}

struct FinalizeContext {
    key: GroupKey,
    spec: ArchiveSpec,
    work_dir: PathBuf,
    delivery: Arc<dyn DeliverySink>,
    status: Arc<dyn StatusSink>,
    delivery_retry: RetryPolicy,
    cancel: CancellationToken,
}

/// Archive, deliver, and clean up one completed group
async fn finalize_group(ctx: FinalizeContext) -> GroupOutcome {
    let result = if ctx.cancel.is_cancelled() {
        GroupResult::Skipped
    } else if ctx.spec.entries.is_empty() {
        GroupResult::NothingRetained
    } else {
        emit_status(
            ctx.status.as_ref(),
            &format!(
                "Packaging group {} ({} file(s))",
                ctx.key,
                ctx.spec.entries.len()
            ),
        )
        .await;

        let build_spec = ctx.spec.clone();
        match tokio::task::spawn_blocking(move || build_archive(&build_spec)).await {
            Ok(Ok(archive_path)) => {
                let meta = DeliveryMeta {
                    caption: format!("{} archive", ctx.key),
                    kind: MediaKind::Archive,
                };
                let (_, delivered) = deliver_with_retry(
                    ctx.delivery.as_ref(),
                    &archive_path,
                    &meta,
                    &ctx.delivery_retry,
                )
                .await;

                match delivered {
                    Ok(()) => GroupResult::ArchiveDelivered,
                    Err(e) => GroupResult::ArchiveDeliveryFailed {
                        reason: e.to_string(),
                    },
                }
            }
            Ok(Err(ArchiveError::Empty)) => GroupResult::NothingRetained,
            Ok(Err(e)) => GroupResult::ArchiveFailed {
                reason: e.to_string(),
            },
            Err(e) => GroupResult::ArchiveFailed {
                reason: e.to_string(),
            },
        }
    };

    // The group owns its directory exclusively; it goes away no matter how
    // finalization went.
    if let Err(e) = tokio::fs::remove_dir_all(&ctx.work_dir).await {
        warn!(dir = %ctx.work_dir.display(), error = %e, "failed to remove group directory");
    }

    GroupOutcome {
        key: ctx.key,
        result,
    }
}

/// Transcode with the configured retry budget
async fn transcode_with_retry(
    transcoder: &dyn Transcoder,
    url: &str,
    dest: &Path,
    limit: Duration,
    policy: &RetryPolicy,
) -> (u32, Result<(), TranscodeError>) {
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match transcoder.transcode(url, dest, limit).await {
            Ok(()) => return (attempt, Ok(())),
            Err(e) if policy.should_retry(attempt) => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transcode failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return (attempt, Err(e)),
        }
    }
}

/// Deliver with backoff on transient failures; permanent and oversized
/// failures return immediately.
async fn deliver_with_retry(
    sink: &dyn DeliverySink,
    path: &Path,
    meta: &DeliveryMeta,
    policy: &RetryPolicy,
) -> (u32, Result<(), DeliveryError>) {
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match sink.deliver(path, meta).await {
            Ok(()) => return (attempt, Ok(())),
            Err(e) if e.is_retryable() && policy.should_retry(attempt) => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "delivery failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return (attempt, Err(e)),
        }
    }
}
