//! REST download of attachment bodies

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error};

use super::http::shared_http_client;
use super::{AttachmentTransfer, SalesforceError, SfSession};

/// Streams `/sobjects/Attachment/{id}/Body` into local files.
#[derive(Clone)]
pub struct RestTransfer {
    client: Arc<Client>,
    session: SfSession,
}

impl std::fmt::Debug for RestTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestTransfer")
            .field("session", &self.session)
            .finish()
    }
}

impl RestTransfer {
    /// Create a transfer client for `session` using the shared HTTP client.
    pub fn new(session: SfSession) -> Self {
        Self::with_client(session, shared_http_client())
    }

    /// Create a transfer client with an explicit HTTP client.
    pub fn with_client(session: SfSession, client: Arc<Client>) -> Self {
        Self { client, session }
    }

    /// Body endpoint URL for an attachment.
    pub fn body_url(&self, attachment_id: &str) -> String {
        format!(
            "{}/services/data/v{}/sobjects/Attachment/{}/Body",
            self.session.instance_url.trim_end_matches('/'),
            self.session.api_version,
            attachment_id
        )
    }
}

/// Map a non-success HTTP status to the download error taxonomy.
pub fn classify_status(status: StatusCode, attachment_id: &str) -> SalesforceError {
    match status {
        StatusCode::NOT_FOUND => {
            SalesforceError::Api(format!("Attachment {attachment_id} not found (404)"))
        }
        StatusCode::UNAUTHORIZED => SalesforceError::Auth(format!(
            "session rejected while downloading {attachment_id} (401); re-authenticate with `sf org login web`"
        )),
        StatusCode::FORBIDDEN => SalesforceError::Api(format!(
            "access to attachment {attachment_id} denied (403)"
        )),
        StatusCode::TOO_MANY_REQUESTS => SalesforceError::Network(format!(
            "API request limit reached while downloading {attachment_id} (429)"
        )),
        s if s.is_server_error() => SalesforceError::Network(format!(
            "Salesforce service error while downloading {attachment_id} ({s})"
        )),
        s => SalesforceError::Api(format!("HTTP error downloading {attachment_id}: {s}")),
    }
}

fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

#[async_trait]
impl AttachmentTransfer for RestTransfer {
    async fn download(
        &self,
        attachment_id: &str,
        destination: &Path,
    ) -> Result<u64, SalesforceError> {
        let url = self.body_url(attachment_id);
        debug!(attachment_id, %url, "Downloading attachment");

        let mut response = self
            .client
            .get(&url)
            .bearer_auth(&self.session.access_token)
            .send()
            .await
            .map_err(|e| {
                error!("Request failed for {}: {}", attachment_id, e);
                SalesforceError::Network(format!("request failed for {attachment_id}: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let err = classify_status(status, attachment_id);
            error!("{}", err);
            return Err(err);
        }

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                SalesforceError::Api(format!("file write error for {}: {e}", parent.display()))
            })?;
        }

        let part = partial_path(destination);
        let mut file = tokio::fs::File::create(&part).await.map_err(|e| {
            SalesforceError::Api(format!("file write error for {}: {e}", part.display()))
        })?;

        let mut written: u64 = 0;
        let streamed: Result<(), SalesforceError> = async {
            while let Some(chunk) = response.chunk().await.map_err(|e| {
                SalesforceError::Network(format!("body stream failed for {attachment_id}: {e}"))
            })? {
                file.write_all(&chunk).await.map_err(|e| {
                    SalesforceError::Api(format!("file write error for {}: {e}", part.display()))
                })?;
                written += chunk.len() as u64;
            }
            file.flush().await.map_err(|e| {
                SalesforceError::Api(format!("file write error for {}: {e}", part.display()))
            })
        }
        .await;

        drop(file);
        if let Err(err) = streamed {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(err);
        }

        tokio::fs::rename(&part, destination).await.map_err(|e| {
            SalesforceError::Api(format!(
                "failed to move {} into place: {e}",
                destination.display()
            ))
        })?;

        debug!(attachment_id, bytes = written, "Attachment written");
        Ok(written)
    }
}
