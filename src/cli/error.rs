//! CLI error types and conversions

use crate::batch::BatchError;
use crate::download::DownloadError;
use crate::logging::LoggingError;
use crate::metrics::MetricsError;
use crate::records::RecordsError;
use crate::salesforce::SalesforceError;
use crate::workflow::WorkflowError;

/// Exit code for a completed run without failures.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code when the run completed but some CSV or item failed.
pub const EXIT_PARTIAL_FAILURE: i32 = 1;
/// Exit code for argument, configuration, auth and fatal errors.
pub const EXIT_FATAL: i32 = 2;
/// Exit code after Ctrl+C.
pub const EXIT_INTERRUPTED: i32 = 130;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Records directory or CSV error
    #[error("records error: {0}")]
    RecordsError(#[from] RecordsError),

    /// Workflow aborted
    #[error("workflow error: {0}")]
    WorkflowError(#[from] WorkflowError),

    /// Salesforce collaborator error
    #[error("salesforce error: {0}")]
    SalesforceError(#[from] SalesforceError),

    /// Download error
    #[error("download error: {0}")]
    DownloadError(#[from] DownloadError),

    /// Batch sizing error
    #[error("batch error: {0}")]
    BatchError(#[from] BatchError),

    /// Logging setup error
    #[error("logging error: {0}")]
    LoggingError(#[from] LoggingError),

    /// Metrics setup error
    #[error("metrics error: {0}")]
    MetricsError(#[from] MetricsError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigurationError(String),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::WorkflowError(WorkflowError::Interrupted)
            | CliError::DownloadError(DownloadError::Interrupted { .. }) => EXIT_INTERRUPTED,
            _ => EXIT_FATAL,
        }
    }
}
