//! Logging setup
//!
//! Two `tracing-subscriber` layers are installed:
//!
//! - a file layer that records everything from this crate at DEBUG, as text
//!   or JSON lines (`LOG_FORMAT=json`), regardless of the progress display
//! - a console layer whose writer is a [`DisplayCoordinator`], so console
//!   output is routed around the live progress display
//!
//! - [`coordinator`] - progress-aware console routing
//! - [`console`] - console output targets

use std::fs::OpenOptions;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

pub mod console;
pub mod coordinator;

pub use console::{ConsoleOutput, TerminalConsole};
pub use coordinator::{ConsoleRoute, DisplayCoordinator, ProgressGuard};

/// Default log file location.
pub const DEFAULT_LOG_FILE: &str = "./logs/download.log";

/// File layer filter: this crate at DEBUG, dependencies at WARN.
pub const FILE_FILTER: &str = "sf_attachments_downloader=debug,warn";

/// Logging setup errors
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// Log file or its directory could not be created
    #[error("failed to open log file {path}: {reason}")]
    LogFile {
        /// Log file path
        path: PathBuf,
        /// Underlying IO error
        reason: String,
    },

    /// A global subscriber was already installed
    #[error("failed to install tracing subscriber: {0}")]
    Init(String),
}

/// Logging options taken from the command line.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// File receiving the full log
    pub log_file: PathBuf,
    /// `-v` count: 0 = WARN, 1 = INFO, 2+ = DEBUG on the console
    pub verbosity: u8,
    /// Write the file log as JSON lines
    pub json: bool,
}

impl LoggingConfig {
    /// Config for `log_file`, console at WARN, JSON when `LOG_FORMAT=json`.
    pub fn new(log_file: impl Into<PathBuf>, verbosity: u8) -> Self {
        Self {
            log_file: log_file.into(),
            verbosity,
            json: json_requested(),
        }
    }
}

fn json_requested() -> bool {
    std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Console filter directive. `-v` flags win over `RUST_LOG`, which wins over
/// the WARN default.
pub fn console_directive(verbosity: u8, rust_log: Option<&str>) -> String {
    match (verbosity, rust_log.map(str::trim).filter(|s| !s.is_empty())) {
        (0, Some(env)) => env.to_string(),
        (0, None) => "warn".to_string(),
        (1, _) => "sf_attachments_downloader=info,warn".to_string(),
        _ => "sf_attachments_downloader=debug,warn".to_string(),
    }
}

fn open_log_file(path: &Path) -> Result<std::fs::File, LoggingError> {
    let err = |e: std::io::Error| LoggingError::LogFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(err)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(err)
}

/// Install the global subscriber. Returns the log file path in use.
pub fn init_logging(
    config: &LoggingConfig,
    coordinator: &DisplayCoordinator,
) -> Result<PathBuf, LoggingError> {
    let file = open_log_file(&config.log_file)?;

    let file_layer = if config.json {
        fmt::layer()
            .json()
            .with_writer(Mutex::new(file))
            .with_filter(EnvFilter::new(FILE_FILTER))
            .boxed()
    } else {
        fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_filter(EnvFilter::new(FILE_FILTER))
            .boxed()
    };

    let rust_log = std::env::var("RUST_LOG").ok();
    let console_filter = EnvFilter::try_new(console_directive(config.verbosity, rust_log.as_deref()))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let console_layer = fmt::layer()
        .with_writer(coordinator.clone())
        .with_ansi(std::io::stdout().is_terminal())
        .with_target(false)
        .compact()
        .with_filter(console_filter);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))?;

    tracing::debug!(log_file = %config.log_file.display(), "Logging initialized");
    Ok(config.log_file.clone())
}
