//! Shared HTTP client for REST downloads
//!
//! reqwest clients pool connections internally, so every transfer in the
//! process goes through one instance.

use once_cell::sync::Lazy;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

/// HTTP connect timeout (seconds)
const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Idle pooled connections are dropped after this many seconds
const HTTP_POOL_IDLE_TIMEOUT_SECS: u64 = 90;

/// Global HTTP client.
///
/// No overall request timeout is set: attachment bodies can be large and a
/// slow but progressing transfer must not be cut off. Stalled connections are
/// surfaced by the connect timeout and TCP keepalive.
static GLOBAL_HTTP_CLIENT: Lazy<Arc<Client>> = Lazy::new(|| {
    let client = Client::builder()
        .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
        .pool_idle_timeout(Duration::from_secs(HTTP_POOL_IDLE_TIMEOUT_SECS))
        .tcp_keepalive(Duration::from_secs(30))
        .user_agent(concat!("sf-attachments-downloader/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|e| {
            tracing::error!("Failed to build configured HTTP client ({e}), using defaults");
            Client::new()
        });
    Arc::new(client)
});

/// Get the shared HTTP client.
pub fn shared_http_client() -> Arc<Client> {
    GLOBAL_HTTP_CLIENT.clone()
}
