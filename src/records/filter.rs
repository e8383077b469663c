//! ParentId filtering of attachment metadata

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

use super::AttachmentRecord;

/// Where a [`ParentIdFilter`] is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterStrategy {
    /// Filter merged metadata locally after querying (supports prefixes).
    #[default]
    Local,
    /// Push exact IDs into the query itself. Prefixes cannot be expressed.
    Remote,
}

impl FromStr for FilterStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python" | "local" => Ok(Self::Local),
            "soql" | "remote" => Ok(Self::Remote),
            other => Err(format!(
                "invalid filter strategy '{other}', expected 'python' or 'soql'"
            )),
        }
    }
}

impl fmt::Display for FilterStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "python"),
            Self::Remote => write!(f, "soql"),
        }
    }
}

/// Restricts downloads to attachments whose ParentId matches an exact ID or
/// a 3-character object-type prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentIdFilter {
    /// 3-character ID prefixes, e.g. `001` for Account
    pub prefixes: Vec<String>,
    /// Exact 15/18-character ParentIds
    pub exact_ids: Vec<String>,
    /// Where the filter is applied
    pub strategy: FilterStrategy,
}

fn is_valid_prefix(prefix: &str) -> bool {
    prefix.len() == 3 && prefix.chars().all(|c| c.is_ascii_alphanumeric())
}

fn is_valid_id(id: &str) -> bool {
    matches!(id.len(), 15 | 18) && id.chars().all(|c| c.is_ascii_alphanumeric())
}

fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

impl ParentIdFilter {
    /// Build a filter and log warnings for malformed entries.
    pub fn new(prefixes: Vec<String>, exact_ids: Vec<String>, strategy: FilterStrategy) -> Self {
        let filter = Self {
            prefixes,
            exact_ids,
            strategy,
        };
        for warning in filter.validate() {
            warn!("{}", warning);
        }
        filter
    }

    /// Parse comma-separated prefix and ID lists. `None` when both are empty.
    pub fn parse(
        prefix_list: Option<&str>,
        id_list: Option<&str>,
        strategy: FilterStrategy,
    ) -> Option<Self> {
        let prefixes = split_list(prefix_list);
        let exact_ids = split_list(id_list);
        if prefixes.is_empty() && exact_ids.is_empty() {
            return None;
        }
        Some(Self::new(prefixes, exact_ids, strategy))
    }

    /// Configuration problems. None of them are fatal.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for prefix in self.prefixes.iter().filter(|p| !is_valid_prefix(p)) {
            warnings.push(format!(
                "Invalid Salesforce ID prefix format: '{prefix}'. Expected 3 alphanumeric characters."
            ));
        }
        for id in self.exact_ids.iter().filter(|id| !is_valid_id(id)) {
            warnings.push(format!(
                "Invalid Salesforce ID format: '{id}'. Expected 15 or 18 alphanumeric characters."
            ));
        }
        if self.strategy == FilterStrategy::Remote && !self.prefixes.is_empty() {
            warnings.push(
                "SOQL strategy does not support prefix filtering. Prefix filters will be ignored. Use 'python' strategy for prefix filtering.".to_string(),
            );
        }
        warnings
    }

    /// Whether any prefix or exact ID is configured.
    pub fn has_filters(&self) -> bool {
        !self.prefixes.is_empty() || !self.exact_ids.is_empty()
    }

    /// Exact IDs as a set, for restricting input ID lists.
    pub fn exact_id_set(&self) -> HashSet<String> {
        self.exact_ids.iter().cloned().collect()
    }

    /// `WHERE ParentId IN (...)` over the exact IDs, empty when there are none.
    pub fn where_clause(&self) -> String {
        if self.exact_ids.is_empty() {
            if !self.prefixes.is_empty() {
                warn!(
                    "SOQL WHERE clause cannot be built for prefix filters. Use 'python' strategy for prefix-based filtering."
                );
            }
            return String::new();
        }
        let clause = in_clause(&self.exact_ids);
        info!(
            "Built SOQL WHERE clause with {} IDs",
            self.exact_ids.len()
        );
        clause
    }

    /// Keep records whose ParentId matches an exact ID, else a prefix.
    pub fn apply(&self, records: Vec<AttachmentRecord>) -> Vec<AttachmentRecord> {
        if !self.has_filters() {
            info!("No filters configured - returning all attachments");
            return records;
        }

        info!("Applying filter: {}", self);
        info!("Pre-filter count: {} attachments", records.len());

        let exact: HashSet<&str> = self.exact_ids.iter().map(String::as_str).collect();
        let prefixes: HashSet<&str> = self.prefixes.iter().map(String::as_str).collect();
        let (mut by_exact, mut by_prefix, mut no_parent) = (0usize, 0usize, 0usize);

        let filtered: Vec<AttachmentRecord> = records
            .into_iter()
            .filter(|record| {
                let Some(parent) = record.parent_id.as_deref() else {
                    no_parent += 1;
                    debug!("Skipping attachment {} - no ParentId", record.id);
                    return false;
                };
                if exact.contains(parent) {
                    by_exact += 1;
                    return true;
                }
                if parent.get(..3).is_some_and(|p| prefixes.contains(p)) {
                    by_prefix += 1;
                    return true;
                }
                false
            })
            .collect();

        info!("Post-filter count: {} attachments", filtered.len());
        info!(
            "Match statistics: {} by prefix, {} by exact ID",
            by_prefix, by_exact
        );
        if no_parent > 0 {
            info!("Skipped {} attachments without ParentId", no_parent);
        }
        filtered
    }

    /// Log a before/after summary of a local filtering pass.
    pub fn log_summary(&self, original_count: usize, filtered_count: usize) {
        info!(
            filter = %self,
            before = original_count,
            after = filtered_count,
            filtered_out = original_count.saturating_sub(filtered_count),
            "Filtering summary"
        );
        if filtered_count == 0 {
            warn!(
                "No attachments matched the filter criteria. Check your ParentId prefixes/IDs and try again."
            );
        } else if original_count > 10 && filtered_count * 10 < original_count {
            info!(
                "Only {}/{} attachments matched; the filter may be very specific or misconfigured",
                filtered_count, original_count
            );
        }
    }
}

impl fmt::Display for ParentIdFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if !self.prefixes.is_empty() {
            parts.push(format!("prefixes={}", self.prefixes.join(",")));
        }
        if !self.exact_ids.is_empty() {
            let mut preview = self
                .exact_ids
                .iter()
                .take(3)
                .cloned()
                .collect::<Vec<_>>()
                .join(",");
            if self.exact_ids.len() > 3 {
                preview.push_str(&format!(" (+{} more)", self.exact_ids.len() - 3));
            }
            parts.push(format!("exact_ids={preview}"));
        }
        parts.push(format!("strategy={}", self.strategy));
        write!(f, "ParentIdFilter({})", parts.join(", "))
    }
}

/// `WHERE ParentId IN ('a','b')` with single quotes escaped.
fn in_clause<S: AsRef<str>>(ids: &[S]) -> String {
    let escaped: Vec<String> = ids
        .iter()
        .map(|id| id.as_ref().replace('\'', "\\'"))
        .collect();
    format!("WHERE ParentId IN ('{}')", escaped.join("','"))
}
