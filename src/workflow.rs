//! CSV-driven attachment extraction
//!
//! For every record CSV in the input directory: extract its IDs, query the
//! attachments of each ID batch, merge the batch results and download the
//! attachment bodies into `{output}/{csv}/files/`.
//!
//! A failure scoped to one CSV (bad structure, query error) is recorded and
//! the next CSV is processed. Auth and network failures, and interrupts, end
//! the whole run after the stages have been marked failed.

use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};

use crate::batch::BatchError;
use crate::download::orchestrator::{DEFAULT_BUCKET_SIZE, DEFAULT_WORKERS};
use crate::download::{DownloadError, DownloadOrchestrator, DownloadStats};
use crate::progress::{Stage, StageUpdate};
use crate::records::metadata::{batch_file_name, merged_file_name, run_timestamp};
use crate::records::{
    discover_csv_files, merge_csv_files, prepare_csv_record_info, read_metadata_csv,
    FilterStrategy, ParentIdFilter, RecordsError,
};
use crate::salesforce::{AttachmentTransfer, QueryExecutor, SalesforceError};
use crate::shutdown::SharedStop;

/// Run-level workflow errors
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// Auth or network failure; nothing further can succeed
    #[error("{0}")]
    Fatal(SalesforceError),

    /// The user interrupted the run
    #[error("workflow interrupted")]
    Interrupted,

    /// Records directory problems
    #[error(transparent)]
    Records(#[from] RecordsError),

    /// Invalid batch size
    #[error(transparent)]
    Batch(#[from] BatchError),

    /// Output directory problems
    #[error("IO error: {0}")]
    Io(String),
}

/// Workflow settings.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Target org alias, `None` for the sf CLI default
    pub org: Option<String>,
    /// Base output directory
    pub output_dir: PathBuf,
    /// Directory of record CSVs
    pub records_dir: PathBuf,
    /// IDs per attachment query
    pub batch_size: usize,
    /// Records per download bucket
    pub bucket_size: usize,
    /// Concurrent downloads per bucket
    pub download_workers: usize,
    /// Optional ParentId filter
    pub filter: Option<ParentIdFilter>,
}

impl WorkflowConfig {
    /// Defaults for the given directories.
    pub fn new(records_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            org: None,
            output_dir: output_dir.into(),
            records_dir: records_dir.into(),
            batch_size: crate::batch::DEFAULT_BATCH_SIZE,
            bucket_size: DEFAULT_BUCKET_SIZE,
            download_workers: DEFAULT_WORKERS,
            filter: None,
        }
    }
}

/// Stages the workflow reports to. Missing stages are not reported.
#[derive(Debug, Clone, Default)]
pub struct WorkflowStages {
    /// CSV file progress
    pub csv: Option<Arc<Stage>>,
    /// Query batch progress
    pub query: Option<Arc<Stage>>,
    /// Download progress
    pub download: Option<Arc<Stage>>,
}

impl WorkflowStages {
    fn all(&self) -> impl Iterator<Item = &Arc<Stage>> {
        [&self.csv, &self.query, &self.download]
            .into_iter()
            .flatten()
    }

    fn fail_all(&self, error: &str) {
        for stage in self.all() {
            stage.fail(error, None);
        }
    }

    fn finish_all(&self) {
        for stage in self.all() {
            if stage.snapshot().status == crate::progress::StageStatus::Pending {
                stage.skip(Some("Nothing to do"));
            } else {
                stage.complete(None);
            }
        }
    }
}

/// Result for one processed CSV.
#[derive(Debug, Clone, Serialize)]
pub struct CsvSummary {
    /// CSV file stem
    pub csv_name: String,
    /// Unique record IDs
    pub records: usize,
    /// Query batches executed
    pub batches: usize,
    /// Attachments selected for download
    pub attachments: usize,
    /// Download counters
    pub download: DownloadStats,
    /// `{output}/{csv}`
    pub output_dir: PathBuf,
}

/// A CSV that could not be processed.
#[derive(Debug, Clone, Serialize)]
pub struct FailedCsv {
    /// CSV file stem
    pub csv_name: String,
    /// Why it failed
    pub error: String,
}

/// Run-wide results.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkflowSummary {
    /// CSV files discovered
    pub total_csv_files: usize,
    /// Unique IDs across processed CSVs
    pub total_records: usize,
    /// Query batches executed
    pub total_batches: usize,
    /// Attachments selected for download
    pub total_attachments: usize,
    /// Download counters across processed CSVs
    pub downloads: DownloadStats,
    /// Per-CSV results
    pub per_csv: Vec<CsvSummary>,
    /// CSVs that failed
    pub failed_files: Vec<FailedCsv>,
}

impl WorkflowSummary {
    /// Whether any CSV or download item failed.
    pub fn has_failures(&self) -> bool {
        !self.failed_files.is_empty() || self.downloads.failed > 0
    }

    fn add(&mut self, csv: CsvSummary) {
        self.total_records += csv.records;
        self.total_batches += csv.batches;
        self.total_attachments += csv.attachments;
        self.downloads.absorb(&csv.download);
        self.per_csv.push(csv);
    }
}

enum CsvFailure {
    Failed(String),
    Fatal(SalesforceError),
    Interrupted,
}

impl From<RecordsError> for CsvFailure {
    fn from(err: RecordsError) -> Self {
        Self::Failed(err.to_string())
    }
}

impl From<SalesforceError> for CsvFailure {
    fn from(err: SalesforceError) -> Self {
        if err.is_fatal() {
            Self::Fatal(err)
        } else {
            Self::Failed(err.to_string())
        }
    }
}

/// Drives the per-CSV query and download pipeline.
pub struct WorkflowCoordinator {
    query: Arc<dyn QueryExecutor>,
    transfer: Arc<dyn AttachmentTransfer>,
    config: WorkflowConfig,
    stop: SharedStop,
    stages: WorkflowStages,
}

impl WorkflowCoordinator {
    /// Build a coordinator. `stop` is checked between units of work.
    pub fn new(
        query: Arc<dyn QueryExecutor>,
        transfer: Arc<dyn AttachmentTransfer>,
        config: WorkflowConfig,
        stop: SharedStop,
    ) -> Self {
        Self {
            query,
            transfer,
            config,
            stop,
            stages: WorkflowStages::default(),
        }
    }

    /// Report progress to `stages`.
    pub fn with_stages(mut self, stages: WorkflowStages) -> Self {
        self.stages = stages;
        self
    }

    /// Settings in use.
    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Process every CSV in the records directory.
    pub async fn run(&self) -> Result<WorkflowSummary, WorkflowError> {
        let config = &self.config;
        info!(
            org = config.org.as_deref().unwrap_or("default"),
            records_dir = %config.records_dir.display(),
            output_dir = %config.output_dir.display(),
            batch_size = config.batch_size,
            download_workers = config.download_workers,
            "Starting CSV-based attachment extraction"
        );

        if config.batch_size < 1 {
            return Err(BatchError::InvalidArgument(config.batch_size).into());
        }

        let csv_files = discover_csv_files(&config.records_dir)?;
        let keep = self.remote_id_set();

        let mut summary = WorkflowSummary {
            total_csv_files: csv_files.len(),
            ..WorkflowSummary::default()
        };
        if let Some(stage) = &self.stages.csv {
            stage.start(Some(csv_files.len() as u64), Some("Processing CSV files"));
        }

        for (index, csv_path) in csv_files.iter().enumerate() {
            if self.stop.is_stopped() {
                self.stages.fail_all("Interrupted by user");
                return Err(WorkflowError::Interrupted);
            }
            let csv_label = csv_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            info!(
                "Processing CSV {}/{}: {}",
                index + 1,
                csv_files.len(),
                csv_label
            );
            if let Some(stage) = &self.stages.csv {
                stage.update(
                    StageUpdate::new()
                        .current(index as u64)
                        .detail("current_csv", csv_label.clone()),
                );
            }

            let span = info_span!("csv", file = %csv_label);
            match self.process_csv(csv_path, keep.as_ref()).instrument(span).await {
                Ok(csv) => {
                    info!("✓ Completed {}", csv_label);
                    summary.add(csv);
                }
                Err(CsvFailure::Failed(reason)) => {
                    error!("✗ Failed to process {}: {}", csv_label, reason);
                    summary.failed_files.push(FailedCsv {
                        csv_name: csv_stem(csv_path),
                        error: reason,
                    });
                }
                Err(CsvFailure::Fatal(err)) => {
                    error!("Aborting run while processing {}: {}", csv_label, err);
                    self.stages.fail_all(&err.to_string());
                    return Err(WorkflowError::Fatal(err));
                }
                Err(CsvFailure::Interrupted) => {
                    warn!("Interrupted while processing {}", csv_label);
                    self.stages.fail_all("Interrupted by user");
                    return Err(WorkflowError::Interrupted);
                }
            }

            if let Some(stage) = &self.stages.csv {
                stage.update(StageUpdate::new().current(index as u64 + 1));
            }
        }

        self.stages.finish_all();
        log_summary(&summary);
        Ok(summary)
    }

    fn remote_id_set(&self) -> Option<HashSet<String>> {
        let filter = self.config.filter.as_ref()?;
        if filter.strategy != FilterStrategy::Remote {
            return None;
        }
        if filter.exact_ids.is_empty() {
            warn!("SOQL filter strategy has no exact ParentIds; prefix filters are ignored");
            return None;
        }
        Some(filter.exact_id_set())
    }

    async fn process_csv(
        &self,
        csv_path: &Path,
        keep: Option<&HashSet<String>>,
    ) -> Result<CsvSummary, CsvFailure> {
        let info = prepare_csv_record_info(csv_path, self.config.batch_size, keep)
            .map_err(|e| CsvFailure::Failed(e.to_string()))?;
        info!(
            records = info.total_records(),
            batches = info.total_batches(),
            "Prepared {}",
            info.csv_name
        );
        if let Some(stage) = &self.stages.csv {
            stage.update(
                StageUpdate::new()
                    .detail("records", info.total_records())
                    .detail("batches", info.total_batches()),
            );
        }

        let csv_output_dir = self.config.output_dir.join(&info.csv_name);
        let metadata_dir = csv_output_dir.join("metadata");
        let files_dir = csv_output_dir.join("files");
        tokio::fs::create_dir_all(&metadata_dir).await.map_err(|e| {
            CsvFailure::Failed(format!("failed to create {}: {e}", metadata_dir.display()))
        })?;

        let timestamp = run_timestamp();
        let batch_files = self.query_batches(&info.id_batches, &metadata_dir, &timestamp).await?;

        let merged = metadata_dir.join(merged_file_name(&timestamp));
        merge_csv_files(&batch_files, &merged)?;
        let mut records = read_metadata_csv(&merged)?;

        if let Some(filter) = self
            .config
            .filter
            .as_ref()
            .filter(|f| f.strategy == FilterStrategy::Local)
        {
            let before = records.len();
            records = filter.apply(records);
            filter.log_summary(before, records.len());
        }

        let download = if records.is_empty() {
            info!("No attachments to download");
            DownloadStats::default()
        } else {
            info!(
                "Downloading {} attachment(s) to: {}",
                records.len(),
                files_dir.display()
            );
            let mut orchestrator = DownloadOrchestrator::new(Arc::clone(&self.transfer))
                .with_workers(self.config.download_workers)
                .with_bucket_size(self.config.bucket_size)
                .with_interrupt(Arc::clone(&self.stop));
            if let Some(stage) = &self.stages.download {
                orchestrator = orchestrator.with_stage(Arc::clone(stage));
            }
            match orchestrator.download_all(&records, &files_dir).await {
                Ok(stats) => stats,
                Err(DownloadError::Fatal { source, .. }) => return Err(CsvFailure::Fatal(source)),
                Err(DownloadError::Interrupted { .. }) => return Err(CsvFailure::Interrupted),
                Err(other) => return Err(CsvFailure::Failed(other.to_string())),
            }
        };

        Ok(CsvSummary {
            csv_name: info.csv_name.clone(),
            records: info.total_records(),
            batches: info.total_batches(),
            attachments: records.len(),
            download,
            output_dir: csv_output_dir,
        })
    }

    async fn query_batches(
        &self,
        id_batches: &[Vec<String>],
        metadata_dir: &Path,
        timestamp: &str,
    ) -> Result<Vec<PathBuf>, CsvFailure> {
        let total = id_batches.len();
        if let Some(stage) = &self.stages.query {
            stage.start(Some(total as u64), Some("Querying attachments"));
        }

        let mut batch_files = Vec::with_capacity(total);
        let mut found = 0usize;
        for (index, ids) in id_batches.iter().enumerate() {
            if self.stop.is_stopped() {
                return Err(CsvFailure::Interrupted);
            }
            info!(
                "Batch {}/{}: Querying {} ParentId(s)",
                index + 1,
                total,
                ids.len()
            );
            let where_clause =
                ParentIdFilter::new(Vec::new(), ids.clone(), FilterStrategy::Remote).where_clause();
            let output = metadata_dir.join(batch_file_name(timestamp, index + 1));

            let result = tokio::select! {
                result = self.query.query_attachments(self.config.org.as_deref(), &where_clause, &output) => result,
                _ = self.stop.wait() => return Err(CsvFailure::Interrupted),
            };
            let path = result?;
            let rows = read_metadata_csv(&path)?.len();
            found += rows;
            info!(
                "Batch {}/{}: Found {} attachment(s)",
                index + 1,
                total,
                rows
            );
            if let Some(stage) = &self.stages.query {
                stage.update(
                    StageUpdate::new()
                        .current(index as u64 + 1)
                        .detail("current_batch", format!("{}/{}", index + 1, total))
                        .detail("batch_size", ids.len())
                        .detail("attachments_found", found),
                );
            }
            batch_files.push(path);
        }
        Ok(batch_files)
    }
}

fn csv_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn log_summary(summary: &WorkflowSummary) {
    info!(
        csv_files = summary.total_csv_files,
        records = summary.total_records,
        batches = summary.total_batches,
        attachments = summary.total_attachments,
        downloaded = summary.downloads.success,
        skipped = summary.downloads.skipped,
        failed = summary.downloads.failed,
        "Workflow summary"
    );
    if summary.failed_files.is_empty() {
        info!("All CSV files processed successfully");
    } else {
        let names: Vec<&str> = summary
            .failed_files
            .iter()
            .map(|f| f.csv_name.as_str())
            .collect();
        warn!(
            "Failed to process {} file(s): {}",
            names.len(),
            names.join(", ")
        );
    }
}
