//! Salesforce collaborators
//!
//! The downloader talks to Salesforce through three narrow seams:
//!
//! - [`AuthProvider`] - resolves an authenticated session from the `sf` CLI
//! - [`QueryExecutor`] - runs an Attachment SOQL query and stores the CSV result
//! - [`AttachmentTransfer`] - streams one attachment body to disk
//!
//! Production implementations shell out to `sf` ([`auth::SfCliAuth`],
//! [`query::SfCliQuery`]) and use the REST API ([`client::RestTransfer`]).
//! Tests substitute in-memory implementations.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

pub mod auth;
pub mod client;
pub mod http;
pub mod query;

pub use auth::SfCliAuth;
pub use client::RestTransfer;
pub use query::{build_attachment_query, SfCliQuery, ATTACHMENT_FIELDS};

/// Default REST API version when `sf org display` does not report one.
pub const DEFAULT_API_VERSION: &str = "65.0";

/// Errors raised by the Salesforce collaborators.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SalesforceError {
    /// Session missing, expired or rejected. Fatal to the whole run.
    #[error("authentication error: {0}")]
    Auth(String),

    /// SOQL query failed. Fatal to the current CSV only.
    #[error("query error: {0}")]
    Query(String),

    /// Connectivity loss or service-side failure. Fatal to the whole run.
    #[error("network error: {0}")]
    Network(String),

    /// Item-scoped API failure such as a missing attachment.
    #[error("API error: {0}")]
    Api(String),
}

impl SalesforceError {
    /// Whether this error means the external systems are unusable for any
    /// further work in the current run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SalesforceError::Auth(_) | SalesforceError::Network(_))
    }
}

/// Authenticated session details taken from the `sf` CLI.
#[derive(Clone, PartialEq, Eq)]
pub struct SfSession {
    /// OAuth access token
    pub access_token: String,
    /// Instance base URL, without trailing slash
    pub instance_url: String,
    /// REST API version, e.g. `65.0`
    pub api_version: String,
    /// Authenticated username
    pub username: Option<String>,
    /// Org ID
    pub org_id: Option<String>,
}

impl std::fmt::Debug for SfSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SfSession")
            .field("access_token", &"<redacted>")
            .field("instance_url", &self.instance_url)
            .field("api_version", &self.api_version)
            .field("username", &self.username)
            .field("org_id", &self.org_id)
            .finish()
    }
}

/// Resolves the session used for REST downloads.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Look up the session for `org` (or the CLI default org when `None`).
    async fn session(&self, org: Option<&str>) -> Result<SfSession, SalesforceError>;
}

/// Runs Attachment queries and stores their CSV output.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Query attachments matching `where_clause` and write the CSV result to
    /// `output_file`. Returns the written path.
    async fn query_attachments(
        &self,
        org: Option<&str>,
        where_clause: &str,
        output_file: &Path,
    ) -> Result<PathBuf, SalesforceError>;
}

/// Transfers one attachment body to a local file.
#[async_trait]
pub trait AttachmentTransfer: Send + Sync {
    /// Download attachment `attachment_id` into `destination`, returning the
    /// number of bytes written.
    async fn download(
        &self,
        attachment_id: &str,
        destination: &Path,
    ) -> Result<u64, SalesforceError>;
}
