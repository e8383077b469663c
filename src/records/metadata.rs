//! Attachment query results on disk
//!
//! Each query batch produces one CSV under `{output}/{csv}/metadata/`. The
//! batch files are merged into a single timestamped CSV which is then read back
//! as [`AttachmentRecord`]s for download.

use chrono::Local;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{file_label, AttachmentRecord, RecordsError};
use crate::salesforce::ATTACHMENT_FIELDS;

/// Columns every metadata CSV must provide.
pub const REQUIRED_COLUMNS: [&str; 3] = ["Id", "Name", "ParentId"];

/// Timestamp shared by all metadata files of one CSV run (`YYYYmmdd_HHMMSS`).
pub fn run_timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// `attachments_{ts}_batch{NNN}.csv`, numbered from 1.
pub fn batch_file_name(timestamp: &str, batch_number: usize) -> String {
    format!("attachments_{timestamp}_batch{batch_number:03}.csv")
}

/// `attachments_{ts}_merged.csv`
pub fn merged_file_name(timestamp: &str) -> String {
    format!("attachments_{timestamp}_merged.csv")
}

fn csv_error(path: &Path, e: csv::Error) -> RecordsError {
    RecordsError::Csv {
        file: file_label(path),
        reason: e.to_string(),
    }
}

fn is_blank_file(path: &Path) -> Result<bool, RecordsError> {
    let content = std::fs::read(path)
        .map_err(|e| RecordsError::Io(format!("failed to read {}: {e}", path.display())))?;
    Ok(content.iter().all(u8::is_ascii_whitespace))
}

/// Read a metadata CSV into attachment records.
///
/// A blank file yields no records. Rows with an empty `Id` are skipped.
pub fn read_metadata_csv(path: &Path) -> Result<Vec<AttachmentRecord>, RecordsError> {
    if is_blank_file(path)? {
        debug!("Metadata file '{}' is empty", file_label(path));
        return Ok(Vec::new());
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| csv_error(path, e))?;
    let headers = reader.headers().map_err(|e| csv_error(path, e))?.clone();

    let column = |name: &str| headers.iter().position(|h| h.trim() == name);
    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|c| column(c).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(RecordsError::MissingColumns {
            file: file_label(path),
            missing: missing.join(", "),
            found: headers.iter().collect::<Vec<_>>().join(", "),
        });
    }
    let (id_idx, name_idx, parent_idx) = match (column("Id"), column("Name"), column("ParentId")) {
        (Some(i), Some(n), Some(p)) => (i, n, p),
        _ => return Err(RecordsError::EmptyFile(file_label(path))),
    };

    let mut records = Vec::new();
    for result in reader.records() {
        let row = result.map_err(|e| csv_error(path, e))?;
        let id = row.get(id_idx).unwrap_or_default().trim();
        if id.is_empty() {
            debug!("Skipping metadata row without Id in '{}'", file_label(path));
            continue;
        }
        let mut record = AttachmentRecord::new(
            id,
            row.get(name_idx).unwrap_or_default(),
            row.get(parent_idx),
        );
        record.fields = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| ![id_idx, name_idx, parent_idx].contains(i))
            .map(|(i, h)| (h.to_string(), row.get(i).unwrap_or_default().to_string()))
            .collect::<BTreeMap<_, _>>();
        records.push(record);
    }

    debug!(
        "Read {} attachment record(s) from '{}'",
        records.len(),
        file_label(path)
    );
    Ok(records)
}

/// Merge batch result files into `output`, returning the merged row count.
///
/// Blank batch files are skipped. All other files must share one header. If
/// every file is blank, `output` holds only the standard attachment header.
pub fn merge_csv_files(batch_files: &[PathBuf], output: &Path) -> Result<usize, RecordsError> {
    info!(
        "Merging {} batch CSV(s) into: {}",
        batch_files.len(),
        file_label(output)
    );

    let mut header: Option<csv::StringRecord> = None;
    let mut rows: Vec<csv::StringRecord> = Vec::new();

    for path in batch_files {
        if is_blank_file(path)? {
            debug!("Skipping empty batch file '{}'", file_label(path));
            continue;
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .map_err(|e| csv_error(path, e))?;
        let batch_header = reader.headers().map_err(|e| csv_error(path, e))?.clone();

        match &header {
            None => header = Some(batch_header),
            Some(expected) if *expected != batch_header => {
                return Err(RecordsError::HeaderMismatch {
                    file: file_label(path),
                });
            }
            Some(_) => {}
        }

        for result in reader.records() {
            rows.push(result.map_err(|e| csv_error(path, e))?);
        }
    }

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| RecordsError::Io(format!("failed to create {}: {e}", parent.display())))?;
    }
    let mut writer = csv::Writer::from_path(output).map_err(|e| csv_error(output, e))?;

    match &header {
        Some(h) => writer.write_record(h).map_err(|e| csv_error(output, e))?,
        None => {
            warn!("All batch results were empty - writing header-only merged CSV");
            writer
                .write_record(ATTACHMENT_FIELDS)
                .map_err(|e| csv_error(output, e))?
        }
    }
    for row in &rows {
        writer.write_record(row).map_err(|e| csv_error(output, e))?;
    }
    writer
        .flush()
        .map_err(|e| RecordsError::Io(format!("failed to write {}: {e}", output.display())))?;

    info!("Merged CSV created with {} attachment(s)", rows.len());
    Ok(rows.len())
}
