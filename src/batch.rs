//! Splitting ordered ID lists into query-sized batches.
//!
//! Each batch becomes one `WHERE ParentId IN (...)` query, so the batch size is
//! what keeps a query under the remote length limit. The same partitioning is
//! reused for download buckets.

use tracing::{debug, warn};

/// Default number of IDs per query batch.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Batch planning errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BatchError {
    /// Batch size below 1
    #[error("invalid argument: batch size must be at least 1, got {0}")]
    InvalidArgument(usize),
}

/// Split `ids` into contiguous, order-preserving batches of at most `size` items.
///
/// Every batch except possibly the last holds exactly `size` items. An empty
/// input yields no batches.
pub fn batch<T: Clone>(ids: &[T], size: usize) -> Result<Vec<Vec<T>>, BatchError> {
    if size < 1 {
        return Err(BatchError::InvalidArgument(size));
    }

    if ids.is_empty() {
        warn!("batch called with an empty ID list");
        return Ok(Vec::new());
    }

    let batches: Vec<Vec<T>> = ids.chunks(size).map(|chunk| chunk.to_vec()).collect();

    debug!(
        ids = ids.len(),
        batches = batches.len(),
        batch_size = size,
        "Split IDs into batches"
    );

    Ok(batches)
}
