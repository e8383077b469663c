//! Per-attempt outcomes and aggregate download statistics

use serde::Serialize;

use crate::records::AttachmentRecord;
use crate::salesforce::SalesforceError;

/// Classification of one download attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// Bytes written to the target file
    Success,
    /// Target already existed
    Skipped,
    /// Item-scoped failure (not found, permission, path rejection)
    Failed,
    /// Auth or connectivity failure; stops the run
    Fatal,
}

/// Result of one download attempt.
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    /// Classification
    pub status: ItemStatus,
    /// Bytes written, zero unless `Success`
    pub bytes: u64,
    /// Operator-facing error message
    pub error: Option<String>,
    /// Error that stopped the run, only for `Fatal`
    pub fatal: Option<SalesforceError>,
}

impl DownloadOutcome {
    /// A successful transfer of `bytes`.
    pub fn success(bytes: u64) -> Self {
        Self {
            status: ItemStatus::Success,
            bytes,
            error: None,
            fatal: None,
        }
    }

    /// The target already existed.
    pub fn skipped() -> Self {
        Self {
            status: ItemStatus::Skipped,
            bytes: 0,
            error: None,
            fatal: None,
        }
    }

    /// An item-scoped failure.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: ItemStatus::Failed,
            bytes: 0,
            error: Some(error.into()),
            fatal: None,
        }
    }

    /// Classify a transfer error as `Fatal` or `Failed`.
    pub fn from_error(err: SalesforceError) -> Self {
        if err.is_fatal() {
            Self {
                status: ItemStatus::Fatal,
                bytes: 0,
                error: Some(err.to_string()),
                fatal: Some(err),
            }
        } else {
            Self::failed(err.to_string())
        }
    }
}

/// One failed item in [`DownloadStats::errors`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemError {
    /// Attachment ID
    pub id: String,
    /// Attachment name
    pub name: String,
    /// Error message
    pub error: String,
}

/// Aggregate counters for a download pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownloadStats {
    /// Items handed to the orchestrator
    pub total: usize,
    /// Items downloaded
    pub success: usize,
    /// Items that failed, fatal ones included
    pub failed: usize,
    /// Items whose target already existed
    pub skipped: usize,
    /// Bytes written across all successful items
    pub bytes_transferred: u64,
    /// Failures in the order they were observed
    pub errors: Vec<ItemError>,
}

impl DownloadStats {
    /// Stats for a pass over `total` items.
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    /// Items with a recorded outcome.
    pub fn processed(&self) -> usize {
        self.success + self.failed + self.skipped
    }

    /// Fold one outcome into the counters.
    pub fn record(&mut self, record: &AttachmentRecord, outcome: &DownloadOutcome) {
        match outcome.status {
            ItemStatus::Success => {
                self.success += 1;
                self.bytes_transferred += outcome.bytes;
            }
            ItemStatus::Skipped => self.skipped += 1,
            ItemStatus::Failed | ItemStatus::Fatal => {
                self.failed += 1;
                self.errors.push(ItemError {
                    id: record.id.clone(),
                    name: record.name.clone(),
                    error: outcome
                        .error
                        .clone()
                        .unwrap_or_else(|| "unknown error".to_string()),
                });
            }
        }
    }

    /// Add another pass's counters to these.
    pub fn absorb(&mut self, other: &DownloadStats) {
        self.total += other.total;
        self.success += other.success;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.bytes_transferred += other.bytes_transferred;
        self.errors.extend(other.errors.iter().cloned());
    }
}
