//! Record CSV discovery and ID extraction

use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{file_label, RecordsError};
use crate::batch::{batch, BatchError};

/// Column holding record IDs in input CSVs.
pub const ID_COLUMN: &str = "Id";

/// A record CSV prepared for querying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvRecordInfo {
    /// Source file
    pub csv_path: PathBuf,
    /// File stem, used as the output subdirectory name
    pub csv_name: String,
    /// Unique IDs in first-seen order
    pub record_ids: Vec<String>,
    /// IDs split into query batches
    pub id_batches: Vec<Vec<String>>,
}

impl CsvRecordInfo {
    /// Number of unique IDs.
    pub fn total_records(&self) -> usize {
        self.record_ids.len()
    }

    /// Number of query batches.
    pub fn total_batches(&self) -> usize {
        self.id_batches.len()
    }
}

/// List `*.csv` files directly inside `records_dir`, sorted by file name.
pub fn discover_csv_files(records_dir: &Path) -> Result<Vec<PathBuf>, RecordsError> {
    if !records_dir.exists() {
        return Err(RecordsError::DirectoryNotFound(records_dir.to_path_buf()));
    }
    if !records_dir.is_dir() {
        return Err(RecordsError::NotADirectory(records_dir.to_path_buf()));
    }

    let entries = std::fs::read_dir(records_dir)
        .map_err(|e| RecordsError::Io(format!("failed to read {}: {e}", records_dir.display())))?;

    let mut csv_files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| RecordsError::Io(format!("failed to read directory entry: {e}")))?;
        let path = entry.path();
        let is_csv = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
        if is_csv && path.is_file() {
            csv_files.push(path);
        }
    }

    if csv_files.is_empty() {
        return Err(RecordsError::NoCsvFiles(records_dir.to_path_buf()));
    }

    csv_files.sort_by_key(|p| p.file_name().map(|n| n.to_os_string()));

    info!(
        "Discovered {} CSV file(s) in {}",
        csv_files.len(),
        records_dir.display()
    );
    for path in &csv_files {
        debug!("  - {}", file_label(path));
    }

    Ok(csv_files)
}

fn open_reader(csv_path: &Path) -> Result<csv::Reader<File>, RecordsError> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(csv_path)
        .map_err(|e| RecordsError::Csv {
            file: file_label(csv_path),
            reason: e.to_string(),
        })
}

/// Check that `csv_path` has a header containing `Id`. Returns the header.
pub fn validate_csv_structure(csv_path: &Path) -> Result<csv::StringRecord, RecordsError> {
    let mut reader = open_reader(csv_path)?;
    let headers = reader
        .headers()
        .map_err(|e| RecordsError::Csv {
            file: file_label(csv_path),
            reason: e.to_string(),
        })?
        .clone();

    if headers.is_empty() || headers.iter().all(|h| h.trim().is_empty()) {
        return Err(RecordsError::EmptyFile(file_label(csv_path)));
    }

    if !headers.iter().any(|h| h.trim() == ID_COLUMN) {
        return Err(RecordsError::MissingColumns {
            file: file_label(csv_path),
            missing: ID_COLUMN.to_string(),
            found: headers.iter().collect::<Vec<_>>().join(", "),
        });
    }

    debug!("CSV file '{}' validated", file_label(csv_path));
    Ok(headers)
}

/// Extract the trimmed, non-empty, de-duplicated `Id` values of `csv_path`
/// in order of first occurrence.
pub fn extract_ids_from_csv(csv_path: &Path) -> Result<Vec<String>, RecordsError> {
    let headers = validate_csv_structure(csv_path)?;
    let id_index = headers
        .iter()
        .position(|h| h.trim() == ID_COLUMN)
        .ok_or_else(|| RecordsError::EmptyFile(file_label(csv_path)))?;

    let mut reader = open_reader(csv_path)?;
    let mut record_ids = Vec::new();
    let mut seen = HashSet::new();
    let mut skipped = 0usize;

    for (row, result) in reader.records().enumerate() {
        let record = result.map_err(|e| RecordsError::Csv {
            file: file_label(csv_path),
            reason: e.to_string(),
        })?;
        let id = record.get(id_index).map(str::trim).unwrap_or_default();

        if id.is_empty() {
            skipped += 1;
            debug!("Row {}: skipping empty Id", row + 2);
            continue;
        }
        if !seen.insert(id.to_string()) {
            skipped += 1;
            debug!("Row {}: skipping duplicate Id '{}'", row + 2, id);
            continue;
        }
        record_ids.push(id.to_string());
    }

    debug!(
        "Extracted {} unique ID(s) from '{}'",
        record_ids.len(),
        file_label(csv_path)
    );
    if skipped > 0 {
        debug!("Skipped {} row(s) with empty or duplicate IDs", skipped);
    }
    if record_ids.is_empty() {
        warn!(
            "No valid IDs found in '{}'. Check that the 'Id' column contains non-empty values.",
            file_label(csv_path)
        );
    }

    Ok(record_ids)
}

/// Errors from [`prepare_csv_record_info`]
#[derive(Debug, thiserror::Error)]
pub enum PrepareError {
    /// Invalid CSV
    #[error(transparent)]
    Records(#[from] RecordsError),
    /// Invalid batch size
    #[error(transparent)]
    Batch(#[from] BatchError),
}

/// Validate, extract and batch one record CSV.
///
/// `keep` optionally restricts the extracted IDs before batching.
pub fn prepare_csv_record_info(
    csv_path: &Path,
    batch_size: usize,
    keep: Option<&HashSet<String>>,
) -> Result<CsvRecordInfo, PrepareError> {
    let mut record_ids = extract_ids_from_csv(csv_path)?;
    if let Some(keep) = keep {
        let before = record_ids.len();
        record_ids.retain(|id| keep.contains(id));
        info!(
            "Restricted '{}' to {} of {} ID(s) by exact ParentId filter",
            file_label(csv_path),
            record_ids.len(),
            before
        );
    }
    let id_batches = if record_ids.is_empty() {
        // batch() requires a valid size even when there is nothing to split
        if batch_size < 1 {
            return Err(BatchError::InvalidArgument(batch_size).into());
        }
        Vec::new()
    } else {
        batch(&record_ids, batch_size)?
    };

    let csv_name = csv_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "records".to_string());

    Ok(CsvRecordInfo {
        csv_path: csv_path.to_path_buf(),
        csv_name,
        record_ids,
        id_batches,
    })
}
