//! Attachment body downloads
//!
//! - [`filename`] - safe output names and collision detection
//! - [`stats`] - per-item outcomes and aggregate counters
//! - [`orchestrator`] - bucketed, bounded-concurrency download passes

pub mod filename;
pub mod orchestrator;
pub mod stats;

pub use filename::{detect_filename_collisions, output_filename, sanitize_filename, FilenameInfo};
pub use orchestrator::DownloadOrchestrator;
pub use stats::{DownloadOutcome, DownloadStats, ItemError, ItemStatus};

use crate::batch::BatchError;
use crate::salesforce::SalesforceError;

/// Download pass errors
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// An auth or network failure stopped the pass
    #[error("download stopped by fatal error: {source}")]
    Fatal {
        /// Error reported by the transfer
        source: SalesforceError,
        /// Counters at the time the pass stopped
        stats: DownloadStats,
    },

    /// The pass was interrupted before finishing
    #[error("download interrupted after {} of {} item(s)", stats.processed(), stats.total)]
    Interrupted {
        /// Counters at the time the pass stopped
        stats: DownloadStats,
    },

    /// Invalid orchestrator configuration
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Output directory could not be prepared
    #[error("IO error: {0}")]
    Io(String),
}

impl DownloadError {
    /// Counters gathered before the pass stopped, if any.
    pub fn stats(&self) -> Option<&DownloadStats> {
        match self {
            Self::Fatal { stats, .. } | Self::Interrupted { stats } => Some(stats),
            _ => None,
        }
    }
}

impl From<BatchError> for DownloadError {
    fn from(err: BatchError) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}
