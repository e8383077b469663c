//! Download and query counters
//!
//! Recording goes through the `metrics` facade and is a no-op until
//! [`init_metrics`] installs the Prometheus exporter, so the hot paths can
//! record unconditionally.

use metrics::{counter, describe_counter, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use std::net::SocketAddr;
use tracing::{debug, info};

use crate::download::ItemStatus;

static METRICS_ADDR: OnceCell<SocketAddr> = OnceCell::new();

/// Metrics setup errors
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Exporter could not be installed (port in use, recorder already set)
    #[error("failed to install Prometheus exporter on {addr}: {reason}")]
    Install {
        /// Requested listen address
        addr: SocketAddr,
        /// Underlying failure
        reason: String,
    },
}

/// Install the Prometheus exporter listening on `addr`.
///
/// Idempotent: later calls return `Ok` without rebinding.
pub fn init_metrics(addr: SocketAddr) -> Result<(), MetricsError> {
    if let Some(existing) = METRICS_ADDR.get() {
        debug!("Metrics already initialized on {}, skipping", existing);
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError::Install {
            addr,
            reason: e.to_string(),
        })?;

    describe_counter!(
        "attachments_downloaded_total",
        Unit::Count,
        "Attachments downloaded successfully"
    );
    describe_counter!(
        "attachments_skipped_total",
        Unit::Count,
        "Attachments skipped because the target file already existed"
    );
    describe_counter!(
        "attachments_failed_total",
        Unit::Count,
        "Attachments that failed, labelled by failure kind"
    );
    describe_counter!(
        "attachment_bytes_total",
        Unit::Bytes,
        "Attachment bytes written to disk"
    );
    describe_counter!(
        "soql_queries_total",
        Unit::Count,
        "Attachment queries executed, labelled by outcome"
    );

    let _ = METRICS_ADDR.set(addr);
    info!("Metrics endpoint listening on {}", addr);
    Ok(())
}

/// Whether [`init_metrics`] has succeeded in this process.
pub fn is_initialized() -> bool {
    METRICS_ADDR.get().is_some()
}

/// Record one classified download attempt.
pub fn record_download(status: ItemStatus, bytes: u64) {
    match status {
        ItemStatus::Success => {
            counter!("attachments_downloaded_total").increment(1);
            counter!("attachment_bytes_total").increment(bytes);
        }
        ItemStatus::Skipped => counter!("attachments_skipped_total").increment(1),
        ItemStatus::Failed => counter!("attachments_failed_total", "kind" => "failed").increment(1),
        ItemStatus::Fatal => counter!("attachments_failed_total", "kind" => "fatal").increment(1),
    }
}

/// Record one `sf data query` run.
pub fn record_query(outcome: &'static str) {
    counter!("soql_queries_total", "outcome" => outcome).increment(1);
}
