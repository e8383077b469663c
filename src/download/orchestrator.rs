//! Bucketed download passes
//!
//! The record list is split into buckets that run one after another. Inside a
//! bucket up to `workers` transfers run concurrently and complete in any
//! order. A fatal transfer error raises a per-run stop: attempts that have not
//! started yet return without touching the network, in-flight ones are
//! drained and counted, and no further bucket starts.

use futures::stream::{self, StreamExt};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, debug_span, error, info, warn, Instrument};

use super::filename::{detect_filename_collisions, output_filename, sanitize_filename, FilenameInfo};
use super::stats::{DownloadOutcome, DownloadStats, ItemStatus};
use super::DownloadError;
use crate::batch::{batch, DEFAULT_BATCH_SIZE};
use crate::metrics;
use crate::progress::{format_bytes, format_speed, shorten, Stage, StageUpdate};
use crate::records::AttachmentRecord;
use crate::salesforce::{AttachmentTransfer, SalesforceError};
use crate::shutdown::{SharedStop, StopReason, StopSignal};

/// Default concurrent transfers per bucket.
pub const DEFAULT_WORKERS: usize = 1;

/// Default records per bucket.
pub const DEFAULT_BUCKET_SIZE: usize = DEFAULT_BATCH_SIZE;

/// Outcome message for names that resolve outside the output directory.
pub const PATH_TRAVERSAL_MESSAGE: &str = "Path traversal validation failed";

/// Downloads attachment bodies for a list of records.
pub struct DownloadOrchestrator {
    transfer: Arc<dyn AttachmentTransfer>,
    workers: usize,
    bucket_size: usize,
    interrupt: Option<SharedStop>,
    stage: Option<Arc<Stage>>,
}

impl std::fmt::Debug for DownloadOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadOrchestrator")
            .field("workers", &self.workers)
            .field("bucket_size", &self.bucket_size)
            .finish()
    }
}

impl DownloadOrchestrator {
    /// Sequential orchestrator with the default bucket size.
    pub fn new(transfer: Arc<dyn AttachmentTransfer>) -> Self {
        Self {
            transfer,
            workers: DEFAULT_WORKERS,
            bucket_size: DEFAULT_BUCKET_SIZE,
            interrupt: None,
            stage: None,
        }
    }

    /// Set the worker count. Values below 1 fall back to 1 with a warning.
    pub fn with_workers(mut self, workers: usize) -> Self {
        if workers < 1 {
            warn!(
                "Invalid download worker count {}, using {}",
                workers, DEFAULT_WORKERS
            );
            self.workers = DEFAULT_WORKERS;
        } else {
            self.workers = workers;
        }
        self
    }

    /// Set the bucket size. Zero is rejected when a pass starts.
    pub fn with_bucket_size(mut self, bucket_size: usize) -> Self {
        self.bucket_size = bucket_size;
        self
    }

    /// Observe an external stop signal (Ctrl+C).
    pub fn with_interrupt(mut self, interrupt: SharedStop) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    /// Report progress to `stage`.
    pub fn with_stage(mut self, stage: Arc<Stage>) -> Self {
        self.stage = Some(stage);
        self
    }

    /// Effective worker count.
    pub fn workers(&self) -> usize {
        self.workers
    }

    fn interrupted(&self) -> bool {
        self.interrupt.as_ref().is_some_and(|s| s.is_stopped())
    }

    fn should_stop(&self, run_stop: &StopSignal) -> bool {
        run_stop.is_stopped() || self.interrupted()
    }

    /// Download every record into `output_dir`.
    ///
    /// Returns the pass statistics, or [`DownloadError::Fatal`] /
    /// [`DownloadError::Interrupted`] carrying the statistics gathered so far.
    pub async fn download_all(
        &self,
        records: &[AttachmentRecord],
        output_dir: &Path,
    ) -> Result<DownloadStats, DownloadError> {
        let mut stats = DownloadStats::new(records.len());
        if let Some(stage) = &self.stage {
            stage.start(Some(records.len() as u64), Some("Downloading files"));
        }

        tokio::fs::create_dir_all(output_dir).await.map_err(|e| {
            self.fail_stage(DownloadError::Io(format!(
                "failed to create {}: {e}",
                output_dir.display()
            )))
        })?;
        let base = tokio::fs::canonicalize(output_dir).await.map_err(|e| {
            self.fail_stage(DownloadError::Io(format!(
                "failed to resolve {}: {e}",
                output_dir.display()
            )))
        })?;

        if records.is_empty() {
            info!("No attachments to download");
            return Ok(stats);
        }

        let filenames = detect_filename_collisions(records);
        let buckets =
            batch(records, self.bucket_size).map_err(|e| self.fail_stage(e.into()))?;
        let total_buckets = buckets.len();
        let started = Instant::now();
        let run_stop = StopSignal::new();
        let mut fatal: Option<SalesforceError> = None;

        info!(
            total = records.len(),
            buckets = total_buckets,
            workers = self.workers,
            "Starting download of {} attachment(s) to {}",
            records.len(),
            base.display()
        );

        for (index, bucket) in buckets.iter().enumerate() {
            if self.should_stop(&run_stop) {
                break;
            }
            let label = format!("bucket {}/{}", index + 1, total_buckets);
            info!(
                "Processing bucket {}/{} ({} files)",
                index + 1,
                total_buckets,
                bucket.len()
            );
            self.report(&stats, started, None, &label);

            let mut results = stream::iter(bucket.iter())
                .map(|record| {
                    self.attempt(record, filenames.get(&record.id), &base, &run_stop)
                        .instrument(debug_span!("attachment", id = %record.id))
                })
                .buffer_unordered(self.workers);

            let mut bucket_success = 0usize;
            let mut bucket_skipped = 0usize;
            let mut bucket_failed = 0usize;
            while let Some(result) = results.next().await {
                let Some((record, outcome)) = result else {
                    continue;
                };
                match outcome.status {
                    ItemStatus::Success => bucket_success += 1,
                    ItemStatus::Skipped => bucket_skipped += 1,
                    ItemStatus::Failed | ItemStatus::Fatal => bucket_failed += 1,
                }
                metrics::record_download(outcome.status, outcome.bytes);
                stats.record(record, &outcome);
                if outcome.status == ItemStatus::Fatal && fatal.is_none() {
                    fatal = outcome.fatal.clone();
                }
                self.report(&stats, started, Some(&record.name), &label);
            }

            info!(
                "Completed bucket {}/{}: {} downloaded, {} skipped, {} failed",
                index + 1,
                total_buckets,
                bucket_success,
                bucket_skipped,
                bucket_failed
            );
            self.report(&stats, started, None, &label);

            if fatal.is_some() {
                break;
            }
        }

        if let Some(source) = fatal {
            error!(
                "Download stopped after {} of {} item(s): {}",
                stats.processed(),
                stats.total,
                source
            );
            if let Some(stage) = &self.stage {
                stage.fail(&source.to_string(), Some("Download stopped by fatal error"));
            }
            return Err(DownloadError::Fatal { source, stats });
        }

        if self.interrupted() && stats.processed() < stats.total {
            warn!(
                "Download interrupted after {} of {} item(s)",
                stats.processed(),
                stats.total
            );
            if let Some(stage) = &self.stage {
                stage.fail("Interrupted by user", None);
            }
            return Err(DownloadError::Interrupted { stats });
        }

        info!(
            "Download complete: {} downloaded, {} skipped, {} failed",
            stats.success, stats.skipped, stats.failed
        );
        debug!(
            bytes = stats.bytes_transferred,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Transferred {}",
            format_bytes(stats.bytes_transferred)
        );
        Ok(stats)
    }

    /// Mark the stage failed before `err` is returned.
    fn fail_stage(&self, err: DownloadError) -> DownloadError {
        if let Some(stage) = &self.stage {
            stage.fail(&err.to_string(), Some("Download setup failed"));
        }
        err
    }

    /// One item. `None` means the item was never attempted because a stop
    /// had already been requested.
    async fn attempt<'r>(
        &self,
        record: &'r AttachmentRecord,
        info: Option<&FilenameInfo>,
        base: &Path,
        run_stop: &StopSignal,
    ) -> Option<(&'r AttachmentRecord, DownloadOutcome)> {
        if self.should_stop(run_stop) {
            debug!("Not starting {} after stop request", record.id);
            return None;
        }
        let outcome = self.download_one(record, info, base).await;
        if outcome.status == ItemStatus::Fatal {
            run_stop.request_stop(StopReason::Fatal);
        }
        Some((record, outcome))
    }

    async fn download_one(
        &self,
        record: &AttachmentRecord,
        info: Option<&FilenameInfo>,
        base: &Path,
    ) -> DownloadOutcome {
        let info = info.cloned().unwrap_or_else(|| FilenameInfo {
            safe_name: sanitize_filename(&record.name),
            has_collision: false,
        });
        let file_name = output_filename(record, &info);

        let Some(target) = resolve_within(base, &file_name) else {
            error!(
                attachment_id = %record.id,
                file_name = %file_name,
                "Path traversal attempt blocked for attachment {}",
                record.id
            );
            return DownloadOutcome::failed(PATH_TRAVERSAL_MESSAGE);
        };

        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            debug!("File already exists, skipping: {}", file_name);
            return DownloadOutcome::skipped();
        }

        match self.transfer.download(&record.id, &target).await {
            Ok(bytes) => {
                debug!("Downloaded {} ({})", file_name, format_bytes(bytes));
                DownloadOutcome::success(bytes)
            }
            Err(err) => {
                debug!(error = ?err, attachment_id = %record.id, "Transfer failed");
                if err.is_fatal() {
                    error!("Fatal error downloading {}: {}", record.name, err);
                } else {
                    error!("Failed to download {} ({}): {}", record.name, record.id, err);
                }
                DownloadOutcome::from_error(err)
            }
        }
    }

    fn report(&self, stats: &DownloadStats, started: Instant, current: Option<&str>, bucket: &str) {
        let Some(stage) = &self.stage else {
            return;
        };
        let mut update = StageUpdate::new()
            .current(stats.processed() as u64)
            .detail("success_count", stats.success)
            .detail("failed_count", stats.failed)
            .detail("skipped_count", stats.skipped)
            .detail("bucket", bucket)
            .detail("bytes_transferred", stats.bytes_transferred)
            .detail(
                "speed",
                format_speed(stats.bytes_transferred, started.elapsed()),
            );
        if let Some(name) = current {
            update = update.detail("current_file", shorten(name, 40));
        }
        stage.update(update);
    }
}

/// `base/name`, provided the lexically normalized result stays under `base`.
fn resolve_within(base: &Path, name: &str) -> Option<PathBuf> {
    let candidate = base.join(name);
    let mut normalized = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return None;
                }
            }
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }
    if normalized.starts_with(base) && normalized != base {
        Some(normalized)
    } else {
        None
    }
}
