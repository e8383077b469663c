//! Attachment SOQL queries through `sf data query`

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{QueryExecutor, SalesforceError};
use crate::metrics;

/// Attachment fields selected by every query, in output column order.
pub const ATTACHMENT_FIELDS: [&str; 8] = [
    "Id",
    "Name",
    "ContentType",
    "BodyLength",
    "ParentId",
    "CreatedDate",
    "LastModifiedDate",
    "Description",
];

/// Upper bound on a single `sf data query` invocation.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(300);

/// Build the Attachment query for a pre-built WHERE clause (may be empty).
pub fn build_attachment_query(where_clause: &str) -> String {
    let fields = ATTACHMENT_FIELDS.join(", ");
    let where_clause = where_clause.trim();
    if where_clause.is_empty() {
        format!("SELECT {fields} FROM Attachment ORDER BY ParentId, CreatedDate DESC")
    } else {
        format!("SELECT {fields} FROM Attachment {where_clause} ORDER BY ParentId, CreatedDate DESC")
    }
}

/// Turn a failed `sf data query` run into a descriptive error.
///
/// `output` is the CLI's stderr and stdout concatenated.
pub fn classify_query_failure(output: &str, query: &str, org: Option<&str>) -> SalesforceError {
    let combined = output.to_lowercase();
    let org_label = org.unwrap_or("default");
    let has_any = |phrases: &[&str]| phrases.iter().any(|p| combined.contains(p));

    if has_any(&["not authenticated", "no authorization", "invalid session"]) {
        return SalesforceError::Auth(format!(
            "authentication failed for org {org_label}; run `sf org login web --alias {org_label}` or check `sf org display --target-org {org_label}`"
        ));
    }

    if has_any(&["query length exceeded", "string too long", "query is too long"]) {
        return SalesforceError::Query(format!(
            "SOQL query exceeds the Salesforce length limit (~20,000 chars); current length is {} characters. Reduce --batch-size (try 50 or lower)",
            query.chars().count()
        ));
    }

    if combined.contains("invalid") && has_any(&["where", "clause", "syntax"]) {
        return SalesforceError::Query(format!(
            "invalid SOQL query syntax; query preview: {}; sf CLI output: {}",
            preview(query, 100),
            output.trim()
        ));
    }

    if has_any(&["not accessible", "insufficient access", "permission"]) {
        return SalesforceError::Query(
            "insufficient permissions to query the Attachment object; read access to Attachment is required".to_string(),
        );
    }

    if combined.contains("org") && has_any(&["no org", "not found"]) {
        return SalesforceError::Query(format!(
            "org {org_label} not found; list authenticated orgs with `sf org list`"
        ));
    }

    SalesforceError::Query(format!("sf data query failed: {}", output.trim()))
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let head: String = text.chars().take(max_chars).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

/// [`QueryExecutor`] backed by the Salesforce CLI.
#[derive(Debug, Clone)]
pub struct SfCliQuery {
    program: String,
    timeout: Duration,
}

impl SfCliQuery {
    /// Use the `sf` executable on `PATH` with the default timeout.
    pub fn new() -> Self {
        Self {
            program: "sf".to_string(),
            timeout: QUERY_TIMEOUT,
        }
    }

    /// Override the executable.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Override the per-query timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for SfCliQuery {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueryExecutor for SfCliQuery {
    async fn query_attachments(
        &self,
        org: Option<&str>,
        where_clause: &str,
        output_file: &Path,
    ) -> Result<PathBuf, SalesforceError> {
        let query = build_attachment_query(where_clause);
        debug!(query_len = query.len(), "Executing SOQL query via sf CLI");
        debug!("Query preview: {}", preview(&query, 150));

        if let Some(parent) = output_file.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                SalesforceError::Query(format!("failed to create {}: {e}", parent.display()))
            })?;
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(["data", "query", "--query", &query]);
        if let Some(org) = org {
            cmd.args(["--target-org", org]);
        }
        cmd.args(["--result-format", "csv"]);
        cmd.kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => {
                metrics::record_query("timeout");
                return Err(SalesforceError::Query(format!(
                    "query timed out after {} seconds; try reducing --batch-size",
                    self.timeout.as_secs()
                )));
            }
            Ok(Err(e)) if e.kind() == ErrorKind::NotFound => {
                metrics::record_query("error");
                return Err(SalesforceError::Auth(format!(
                    "Salesforce CLI ({}) not found. Install it with `npm install -g @salesforce/cli`",
                    self.program
                )));
            }
            Ok(Err(e)) => {
                metrics::record_query("error");
                return Err(SalesforceError::Query(format!("failed to run sf CLI: {e}")));
            }
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            metrics::record_query("error");
            let combined = format!(
                "{}{}",
                String::from_utf8_lossy(&output.stderr),
                String::from_utf8_lossy(&output.stdout)
            );
            return Err(classify_query_failure(&combined, &query, org));
        }

        tokio::fs::write(output_file, &output.stdout)
            .await
            .map_err(|e| {
                SalesforceError::Query(format!(
                    "failed to write query result {}: {e}",
                    output_file.display()
                ))
            })?;

        let text = String::from_utf8_lossy(&output.stdout);
        let records = text.lines().filter(|l| !l.trim().is_empty()).count().saturating_sub(1);
        if text.trim().is_empty() {
            warn!(
                "Query returned no output for {}; treating as zero records",
                output_file.display()
            );
        }
        metrics::record_query("success");
        info!(
            "Query successful: {} records saved to {}",
            records,
            output_file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        );

        Ok(output_file.to_path_buf())
    }
}
