//! In-memory Salesforce collaborators shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use sf_attachments_downloader::salesforce::{
    AttachmentTransfer, QueryExecutor, SalesforceError, ATTACHMENT_FIELDS,
};
use sf_attachments_downloader::AttachmentRecord;

/// Transfer that writes a small body per attachment, or fails as scripted.
#[derive(Default)]
pub struct ScriptedTransfer {
    failures: HashMap<String, SalesforceError>,
    delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `id` with `error` instead of writing it.
    pub fn fail(mut self, id: &str, error: SalesforceError) -> Self {
        self.failures.insert(id.to_string(), error);
        self
    }

    /// Sleep before every transfer.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// IDs passed to `download`, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AttachmentTransfer for ScriptedTransfer {
    async fn download(&self, attachment_id: &str, destination: &Path) -> Result<u64, SalesforceError> {
        self.calls.lock().unwrap().push(attachment_id.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.failures.get(attachment_id) {
            return Err(err.clone());
        }
        let body = format!("body of {attachment_id}");
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await.unwrap();
        }
        tokio::fs::write(destination, body.as_bytes()).await.unwrap();
        Ok(body.len() as u64)
    }
}

/// One attachment known to [`CsvQuery`].
#[derive(Debug, Clone)]
pub struct FakeAttachment {
    pub id: String,
    pub name: String,
    pub parent_id: String,
}

impl FakeAttachment {
    pub fn new(id: &str, name: &str, parent_id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            parent_id: parent_id.to_string(),
        }
    }
}

/// Query executor answering `WHERE ParentId IN (...)` from an in-memory
/// attachment list and writing the result CSV like `sf data query` does.
#[derive(Default)]
pub struct CsvQuery {
    attachments: Vec<FakeAttachment>,
    failing_parents: HashMap<String, SalesforceError>,
    clauses: Mutex<Vec<String>>,
}

impl CsvQuery {
    pub fn new(attachments: Vec<FakeAttachment>) -> Self {
        Self {
            attachments,
            ..Self::default()
        }
    }

    /// Fail any query whose ID list contains `parent_id`.
    pub fn fail_for(mut self, parent_id: &str, error: SalesforceError) -> Self {
        self.failing_parents.insert(parent_id.to_string(), error);
        self
    }

    /// WHERE clauses received, in call order.
    pub fn clauses(&self) -> Vec<String> {
        self.clauses.lock().unwrap().clone()
    }
}

/// IDs listed in a `WHERE ParentId IN ('a','b')` clause.
pub fn ids_in_clause(clause: &str) -> HashSet<String> {
    let Some(start) = clause.find('(') else {
        return HashSet::new();
    };
    let end = clause.rfind(')').unwrap_or(clause.len());
    clause[start + 1..end]
        .split(',')
        .map(|s| s.trim().trim_matches('\'').replace("\\'", "'"))
        .filter(|s| !s.is_empty())
        .collect()
}

#[async_trait]
impl QueryExecutor for CsvQuery {
    async fn query_attachments(
        &self,
        _org: Option<&str>,
        where_clause: &str,
        output_file: &Path,
    ) -> Result<PathBuf, SalesforceError> {
        self.clauses.lock().unwrap().push(where_clause.to_string());
        let ids = ids_in_clause(where_clause);
        for (parent, err) in &self.failing_parents {
            if ids.contains(parent) {
                return Err(err.clone());
            }
        }

        let mut writer = csv::Writer::from_path(output_file).unwrap();
        writer.write_record(ATTACHMENT_FIELDS).unwrap();
        for att in self.attachments.iter().filter(|a| ids.contains(&a.parent_id)) {
            writer
                .write_record([
                    att.id.as_str(),
                    att.name.as_str(),
                    "application/pdf",
                    "12",
                    att.parent_id.as_str(),
                    "2024-01-01T00:00:00.000+0000",
                    "2024-01-01T00:00:00.000+0000",
                    "",
                ])
                .unwrap();
        }
        writer.flush().unwrap();
        Ok(output_file.to_path_buf())
    }
}

/// Write a record CSV with an `Id` column.
pub fn write_records_csv(dir: &Path, file_name: &str, ids: &[&str]) -> PathBuf {
    let path = dir.join(file_name);
    let mut content = String::from("Id,Name\n");
    for id in ids {
        content.push_str(&format!("{id},Record {id}\n"));
    }
    std::fs::write(&path, content).unwrap();
    path
}

/// `count` attachments with distinct names under one parent.
pub fn records(count: usize) -> Vec<AttachmentRecord> {
    (0..count)
        .map(|i| {
            AttachmentRecord::new(
                format!("00P{i:015}"),
                format!("file_{i}.pdf"),
                Some("001000000000001AAA"),
            )
        })
        .collect()
}
