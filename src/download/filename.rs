//! Filesystem-safe attachment names and collision detection
//!
//! Output files are named `{parent}_{name}`. When two attachments of the same
//! parent sanitize to the same name (compared case-insensitively, so the result
//! is stable on case-insensitive filesystems) both get the attachment ID
//! inserted: `{parent}_{id}_{name}`.

use std::collections::HashMap;
use tracing::{info, warn};

use crate::records::AttachmentRecord;

/// Longest file name most filesystems accept.
pub const MAX_FILENAME_LENGTH: usize = 255;

/// Parent key for attachments without a ParentId.
pub const DEFAULT_PARENT_ID: &str = "NO_PARENT";

const INVALID_CHARS: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Sanitized name and collision flag for one attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameInfo {
    /// Name with invalid characters replaced and length capped
    pub safe_name: String,
    /// Whether another attachment of the same parent shares `safe_name`
    pub has_collision: bool,
}

/// Replace `<>:"/\|?*` with `_` and cap the length at 255 characters,
/// keeping the extension after the last `.` when truncating.
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if INVALID_CHARS.contains(&c) { '_' } else { c })
        .collect();

    if replaced.chars().count() <= MAX_FILENAME_LENGTH {
        return replaced;
    }

    match replaced.rsplit_once('.') {
        Some((stem, ext)) if ext.chars().count() + 1 < MAX_FILENAME_LENGTH => {
            let keep = MAX_FILENAME_LENGTH - ext.chars().count() - 1;
            let stem: String = stem.chars().take(keep).collect();
            format!("{stem}.{ext}")
        }
        _ => replaced.chars().take(MAX_FILENAME_LENGTH).collect(),
    }
}

/// Sanitize every record's name and flag collisions within `records`.
///
/// Must see the complete list before any output name is used, since a
/// collision depends on every other record of the same parent.
pub fn detect_filename_collisions(records: &[AttachmentRecord]) -> HashMap<String, FilenameInfo> {
    let mut occurrences: HashMap<(&str, String), usize> = HashMap::new();
    let mut resolved: Vec<(&str, String, (&str, String))> = Vec::with_capacity(records.len());

    for record in records {
        let raw = if record.name.is_empty() { "unnamed" } else { record.name.as_str() };
        let safe_name = sanitize_filename(raw);
        let key = (record.parent_key(), safe_name.to_lowercase());
        *occurrences.entry(key.clone()).or_default() += 1;
        resolved.push((record.id.as_str(), safe_name, key));
    }

    let result: HashMap<String, FilenameInfo> = resolved
        .into_iter()
        .map(|(id, safe_name, key)| {
            let has_collision = occurrences.get(&key).copied().unwrap_or(0) > 1;
            (
                id.to_string(),
                FilenameInfo {
                    safe_name,
                    has_collision,
                },
            )
        })
        .collect();

    let collisions = result.values().filter(|info| info.has_collision).count();
    if collisions > 0 {
        warn!(
            "Detected {} file(s) with name collisions - will use Id prefix for these files",
            collisions
        );
    } else {
        info!("No filename collisions detected");
    }

    result
}

/// Final output file name for `record`.
pub fn output_filename(record: &AttachmentRecord, info: &FilenameInfo) -> String {
    if info.has_collision {
        format!("{}_{}_{}", record.parent_key(), record.id, info.safe_name)
    } else {
        format!("{}_{}", record.parent_key(), info.safe_name)
    }
}
