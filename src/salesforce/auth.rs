//! Session lookup through `sf org display --json`

use async_trait::async_trait;
use serde::Deserialize;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info};

use super::{AuthProvider, SalesforceError, SfSession, DEFAULT_API_VERSION};

/// Upper bound for one `sf org display` call.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct OrgDisplayResponse {
    status: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    result: Option<OrgDisplayResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrgDisplayResult {
    access_token: Option<String>,
    instance_url: Option<String>,
    id: Option<String>,
    username: Option<String>,
    api_version: Option<String>,
}

/// Parse the JSON printed by `sf org display --json`.
pub fn parse_org_display(stdout: &str) -> Result<SfSession, SalesforceError> {
    let response: OrgDisplayResponse = serde_json::from_str(stdout)
        .map_err(|e| SalesforceError::Auth(format!("invalid JSON response from sf CLI: {e}")))?;

    if response.status != 0 {
        let message = response
            .message
            .unwrap_or_else(|| "unknown error".to_string());
        return Err(SalesforceError::Auth(format!("sf CLI error: {message}")));
    }

    let result = response
        .result
        .ok_or_else(|| SalesforceError::Auth("sf CLI response has no result".to_string()))?;

    let access_token = result.access_token.filter(|t| !t.is_empty());
    let instance_url = result.instance_url.filter(|u| !u.is_empty());
    let (Some(access_token), Some(instance_url)) = (access_token, instance_url) else {
        return Err(SalesforceError::Auth(
            "missing access token or instance URL in sf CLI response".to_string(),
        ));
    };

    Ok(SfSession {
        access_token,
        instance_url: instance_url.trim_end_matches('/').to_string(),
        api_version: result
            .api_version
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
        username: result.username,
        org_id: result.id,
    })
}

/// [`AuthProvider`] backed by the Salesforce CLI.
#[derive(Debug, Clone)]
pub struct SfCliAuth {
    program: String,
    timeout: Duration,
}

impl SfCliAuth {
    /// Use the `sf` executable found on `PATH`.
    pub fn new() -> Self {
        Self {
            program: "sf".to_string(),
            timeout: AUTH_TIMEOUT,
        }
    }

    /// Use a specific executable instead of `sf`.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            timeout: AUTH_TIMEOUT,
        }
    }

    /// Override the lookup timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for SfCliAuth {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthProvider for SfCliAuth {
    async fn session(&self, org: Option<&str>) -> Result<SfSession, SalesforceError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["org", "display", "--json"]);
        if let Some(org) = org {
            cmd.args(["--target-org", org]);
        }
        cmd.kill_on_drop(true);

        info!("Retrieving auth info for org: {}", org.unwrap_or("default"));

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => {
                error!("sf org display timed out after {:?}", self.timeout);
                return Err(SalesforceError::Auth(format!(
                    "sf CLI did not return auth info within {:?}",
                    self.timeout
                )));
            }
            Ok(Err(e)) if e.kind() == ErrorKind::NotFound => {
                return Err(SalesforceError::Auth(format!(
                    "Salesforce CLI ({}) not found. Install it with `npm install -g @salesforce/cli` and verify with `sf --version`",
                    self.program
                )));
            }
            Ok(Err(e)) => {
                return Err(SalesforceError::Auth(format!("failed to execute sf CLI: {e}")));
            }
            Ok(Ok(output)) => output,
        };

        let stdout = String::from_utf8_lossy(&output.stdout);

        if !output.status.success() {
            // sf still prints a JSON envelope on failure; prefer its message.
            if let Err(err) = parse_org_display(&stdout) {
                if !matches!(&err, SalesforceError::Auth(m) if m.starts_with("invalid JSON")) {
                    error!("sf org display failed: {}", err);
                    return Err(err);
                }
            }
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            error!("sf org display failed: {}", detail);
            return Err(SalesforceError::Auth(format!(
                "failed to execute sf CLI: {detail}"
            )));
        }

        let session = parse_org_display(&stdout)?;
        info!(
            "Successfully retrieved auth for: {}",
            session.username.as_deref().unwrap_or("unknown user")
        );
        debug!(instance_url = %session.instance_url, api_version = %session.api_version, "Session resolved");
        Ok(session)
    }
}
