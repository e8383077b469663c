//! CSV input and attachment metadata
//!
//! - [`discovery`] - finds record CSVs and extracts their unique IDs
//! - [`metadata`] - reads, merges and writes attachment query results
//! - [`filter`] - optional ParentId filtering of attachment metadata

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::download::filename::DEFAULT_PARENT_ID;

pub mod discovery;
pub mod filter;
pub mod metadata;

pub use discovery::{discover_csv_files, extract_ids_from_csv, prepare_csv_record_info, CsvRecordInfo};
pub use filter::{FilterStrategy, ParentIdFilter};
pub use metadata::{merge_csv_files, read_metadata_csv};

/// Input validation and CSV I/O errors
#[derive(Debug, thiserror::Error)]
pub enum RecordsError {
    /// Records directory does not exist
    #[error("records directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    /// Records path exists but is a file
    #[error("path is not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Records directory holds no CSV files
    #[error("no CSV files found in directory: {0}")]
    NoCsvFiles(PathBuf),

    /// CSV has no header row
    #[error("CSV file '{0}' is empty or has no header")]
    EmptyFile(String),

    /// CSV lacks required columns
    #[error("CSV file '{file}' is missing required column(s) {missing}. Found columns: {found}")]
    MissingColumns {
        /// File name
        file: String,
        /// Missing column names, comma separated
        missing: String,
        /// Header as found, comma separated
        found: String,
    },

    /// Batch results disagree on their header
    #[error("CSV file '{file}' has different columns than the previous batch results")]
    HeaderMismatch {
        /// File name of the offending batch
        file: String,
    },

    /// Malformed CSV content
    #[error("failed to read CSV file '{file}': {reason}")]
    Csv {
        /// File name
        file: String,
        /// Parser message
        reason: String,
    },

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(String),
}

/// One attachment row from a query result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRecord {
    /// Attachment ID
    pub id: String,
    /// Display name, used to derive the output file name
    pub name: String,
    /// Owning record, `None` when the column is blank
    pub parent_id: Option<String>,
    /// Remaining columns (ContentType, BodyLength, timestamps, ...)
    pub fields: BTreeMap<String, String>,
}

impl AttachmentRecord {
    /// Build a record without passthrough fields.
    pub fn new(id: impl Into<String>, name: impl Into<String>, parent_id: Option<&str>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parent_id: parent_id
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string),
            fields: BTreeMap::new(),
        }
    }

    /// Parent ID used for grouping and file naming, `NO_PARENT` when absent.
    pub fn parent_key(&self) -> &str {
        self.parent_id.as_deref().unwrap_or(DEFAULT_PARENT_ID)
    }

    /// A passthrough column value.
    pub fn field(&self, column: &str) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }
}

pub(crate) fn file_label(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
