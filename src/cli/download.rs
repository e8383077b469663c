//! Command line surface and run orchestration

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::CliError;
use crate::download::orchestrator::DEFAULT_WORKERS;
use crate::logging::{DisplayCoordinator, LoggingConfig, DEFAULT_LOG_FILE};
use crate::progress::{ProgressMode, ProgressTracker, StageConfig};
use crate::records::{FilterStrategy, ParentIdFilter};
use crate::salesforce::{
    AttachmentTransfer, AuthProvider, QueryExecutor, RestTransfer, SfCliAuth, SfCliQuery,
};
use crate::shutdown::SharedStop;
use crate::workflow::{
    WorkflowConfig, WorkflowCoordinator, WorkflowError, WorkflowStages, WorkflowSummary,
};

use super::error::{EXIT_PARTIAL_FAILURE, EXIT_SUCCESS};

/// Maximum concurrent downloads per bucket
pub const MAX_DOWNLOAD_WORKERS: usize = 32;

/// Clamp a requested worker count into `1..=MAX_DOWNLOAD_WORKERS`.
///
/// Invalid values are not an error: non-numeric or non-positive input falls
/// back to the default, larger values to the maximum, each with a warning.
pub fn clamp_workers(requested: &str) -> usize {
    let value = match requested.trim().parse::<i64>() {
        Ok(value) => value,
        Err(_) => {
            warn!(
                "Invalid download workers value {:?}, using default {}",
                requested, DEFAULT_WORKERS
            );
            return DEFAULT_WORKERS;
        }
    };

    if value < 1 {
        warn!(
            "Invalid download workers value {}, using default {}",
            value, DEFAULT_WORKERS
        );
        return DEFAULT_WORKERS;
    }
    match usize::try_from(value) {
        Ok(n) if n <= MAX_DOWNLOAD_WORKERS => n,
        _ => {
            warn!(
                "Download workers {} exceeds maximum of {}, using {}",
                value, MAX_DOWNLOAD_WORKERS, MAX_DOWNLOAD_WORKERS
            );
            MAX_DOWNLOAD_WORKERS
        }
    }
}

/// Summary output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}

/// Salesforce attachments downloader CLI
#[derive(Parser, Debug)]
#[command(name = "sf-attachments-downloader")]
#[command(
    about = "Query and download Salesforce attachments for the records listed in CSV files",
    long_about = None
)]
#[command(version)]
pub struct Cli {
    /// Salesforce org alias (default: the sf CLI default org)
    #[arg(long, env = "SF_ORG_ALIAS")]
    pub org: Option<String>,

    /// Base output directory
    #[arg(long, env = "OUTPUT_DIR", default_value = "./output")]
    pub output: PathBuf,

    /// Directory containing record CSV files, each with an `Id` column
    #[arg(long, env = "RECORDS_DIR")]
    pub records_dir: PathBuf,

    /// Record IDs per attachment query
    ///
    /// Lower this if queries fail because the query string is too long.
    #[arg(
        long,
        env = "BATCH_SIZE",
        default_value_t = 100,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub batch_size: u64,

    /// Concurrent downloads per bucket (default: 1, max: 32)
    ///
    /// Invalid or out-of-range values are clamped with a warning.
    #[arg(
        long,
        env = "DOWNLOAD_WORKERS",
        default_value = "1",
        allow_hyphen_values = true
    )]
    pub download_workers: String,

    /// Live progress display: auto, on or off
    #[arg(long, default_value = "auto")]
    pub progress: ProgressMode,

    /// Log file receiving the full debug log
    #[arg(long, env = "LOG_FILE", default_value = DEFAULT_LOG_FILE)]
    pub log_file: PathBuf,

    /// Increase console verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Summary format (json or human)
    #[arg(long, default_value = "human")]
    pub output_format: OutputFormat,

    /// Comma-separated 3-character ParentId prefixes to keep (e.g. "a0B,001")
    #[arg(long, env = "PARENT_ID_PREFIX")]
    pub parent_id_prefix: Option<String>,

    /// Comma-separated ParentIds to keep
    #[arg(long, env = "PARENT_IDS")]
    pub parent_ids: Option<String>,

    /// Filter strategy: python (after the query) or soql (in the query)
    #[arg(long, env = "FILTER_STRATEGY", default_value = "python")]
    pub filter_strategy: FilterStrategy,

    /// Expose Prometheus metrics on this address (e.g. 127.0.0.1:9000)
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}

impl Cli {
    /// Logging settings from the command line.
    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig::new(&self.log_file, self.verbose)
    }

    /// Workflow settings. Logs warnings for clamped values, so call it after
    /// logging is installed.
    pub fn workflow_config(&self) -> Result<WorkflowConfig, CliError> {
        let batch_size = usize::try_from(self.batch_size).map_err(|_| {
            CliError::InvalidArgument(format!("batch size {} is too large", self.batch_size))
        })?;

        let mut config = WorkflowConfig::new(&self.records_dir, &self.output);
        config.org = self.org.clone().filter(|o| !o.trim().is_empty());
        config.batch_size = batch_size;
        config.download_workers = clamp_workers(&self.download_workers);
        config.filter = ParentIdFilter::parse(
            self.parent_id_prefix.as_deref(),
            self.parent_ids.as_deref(),
            self.filter_strategy,
        );
        Ok(config)
    }

    /// Resolve the session through the sf CLI and run the workflow.
    pub async fn execute(
        &self,
        coordinator: &DisplayCoordinator,
        stop: SharedStop,
    ) -> Result<WorkflowSummary, CliError> {
        let config = self.workflow_config()?;

        let auth = SfCliAuth::new();
        let session = tokio::select! {
            session = auth.session(config.org.as_deref()) => session?,
            _ = stop.wait() => return Err(WorkflowError::Interrupted.into()),
        };
        info!(
            instance_url = %session.instance_url,
            api_version = %session.api_version,
            username = session.username.as_deref().unwrap_or("unknown"),
            "Authenticated"
        );

        let query: Arc<dyn QueryExecutor> = Arc::new(SfCliQuery::new());
        let transfer: Arc<dyn AttachmentTransfer> = Arc::new(RestTransfer::new(session));
        run_workflow(config, query, transfer, coordinator, self.progress, stop).await
    }
}

/// Run the workflow with a live progress display.
///
/// The display is torn down before this returns, so buffered warnings are
/// flushed before the caller prints anything.
pub async fn run_workflow(
    config: WorkflowConfig,
    query: Arc<dyn QueryExecutor>,
    transfer: Arc<dyn AttachmentTransfer>,
    coordinator: &DisplayCoordinator,
    progress: ProgressMode,
    stop: SharedStop,
) -> Result<WorkflowSummary, CliError> {
    let mut tracker = ProgressTracker::new(coordinator.clone(), progress);
    let stages = WorkflowStages {
        csv: Some(tracker.add_stage(StageConfig::csv_processing())),
        query: Some(tracker.add_stage(StageConfig::query_batches())),
        download: Some(tracker.add_stage(StageConfig::downloads())),
    };

    let workflow =
        WorkflowCoordinator::new(query, transfer, config, stop).with_stages(stages);

    tracker.start();
    let result = workflow.run().await;
    tracker.stop();

    result.map_err(CliError::from)
}

/// Exit code for a completed run.
pub fn summary_exit_code(summary: &WorkflowSummary) -> i32 {
    if summary.has_failures() {
        EXIT_PARTIAL_FAILURE
    } else {
        EXIT_SUCCESS
    }
}

/// Print the end-of-run summary in `format`.
pub fn print_summary(format: OutputFormat, summary: &WorkflowSummary) {
    match format {
        OutputFormat::Json => output_json(summary),
        OutputFormat::Human => output_human(summary),
    }
}

fn output_json(summary: &WorkflowSummary) {
    let output = serde_json::json!({
        "success": !summary.has_failures(),
        "total_csv_files": summary.total_csv_files,
        "total_records": summary.total_records,
        "total_batches": summary.total_batches,
        "total_attachments": summary.total_attachments,
        "downloaded": summary.downloads.success,
        "skipped": summary.downloads.skipped,
        "failed": summary.downloads.failed,
        "bytes_transferred": summary.downloads.bytes_transferred,
        "per_csv": summary.per_csv,
        "failed_files": summary.failed_files,
        "errors": summary.downloads.errors,
    });

    match serde_json::to_string(&output) {
        Ok(line) => println!("{line}"),
        Err(e) => error!("Failed to serialize summary: {}", e),
    }
}

fn output_human(summary: &WorkflowSummary) {
    let rule = "=".repeat(70);
    println!("\n{rule}");
    println!("WORKFLOW SUMMARY");
    println!("{rule}");

    for csv in &summary.per_csv {
        println!(
            "{}: {} record(s), {} batch(es), {} attachment(s) -> {} downloaded, {} skipped, {} failed",
            csv.csv_name,
            csv.records,
            csv.batches,
            csv.attachments,
            csv.download.success,
            csv.download.skipped,
            csv.download.failed
        );
        println!("  Output: {}", csv.output_dir.display());
    }

    println!("Total CSV files: {}", summary.total_csv_files);
    println!("Total records: {}", summary.total_records);
    println!("Total batches executed: {}", summary.total_batches);
    println!("Total attachments found: {}", summary.total_attachments);
    println!(
        "Downloads: {} succeeded, {} skipped, {} failed ({})",
        summary.downloads.success,
        summary.downloads.skipped,
        summary.downloads.failed,
        crate::progress::format_bytes(summary.downloads.bytes_transferred)
    );

    if !summary.downloads.errors.is_empty() {
        println!("\nFailed downloads:");
        for item in &summary.downloads.errors {
            println!("  {} ({}): {}", item.name, item.id, item.error);
        }
    }

    if summary.failed_files.is_empty() {
        println!("\nAll CSV files processed successfully!");
    } else {
        println!("\nFailed to process {} file(s):", summary.failed_files.len());
        for failed in &summary.failed_files {
            println!("  {}: {}", failed.csv_name, failed.error);
        }
    }
}
