//! # Salesforce Attachments Downloader
//!
//! Downloads Salesforce Attachment bodies for the records listed in CSV
//! files. For each CSV in a records directory the record IDs are extracted,
//! the matching attachments are queried in batches through the `sf` CLI, and
//! the attachment bodies are streamed to disk with a bounded worker pool.
//!
//! ## Output layout
//!
//! For a CSV named `X.csv`:
//!
//! - `output/X/metadata/` - per-batch and merged query results
//! - `output/X/files/` - downloaded files named `{parent_id}_{name}`, or
//!   `{parent_id}_{id}_{name}` when two attachments share a name
//!
//! Reruns are idempotent: files that already exist are skipped.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use sf_attachments_downloader::salesforce::{AuthProvider, RestTransfer, SfCliAuth, SfCliQuery};
//! use sf_attachments_downloader::shutdown::StopSignal;
//! use sf_attachments_downloader::workflow::{WorkflowConfig, WorkflowCoordinator};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let session = SfCliAuth::new().session(Some("prod")).await?;
//! let config = WorkflowConfig::new("./records", "./output");
//! let workflow = WorkflowCoordinator::new(
//!     Arc::new(SfCliQuery::new()),
//!     Arc::new(RestTransfer::new(session)),
//!     config,
//!     StopSignal::shared(),
//! );
//! let summary = workflow.run().await?;
//! println!("{} attachment(s) downloaded", summary.downloads.success);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`records`] - CSV discovery, ID extraction, query metadata and ParentId filtering
//! - [`batch`] - fixed-size batching of IDs and records
//! - [`salesforce`] - session lookup, SOQL queries and attachment transfer
//! - [`download`] - filename resolution and the bucketed download orchestrator
//! - [`workflow`] - the per-CSV pipeline
//! - [`progress`] - stage tracking and live renderers
//! - [`logging`] - log file plus a console that stays out of the progress display
//! - [`shutdown`] - stop signal shared by fatal errors and Ctrl+C
//! - [`metrics`] - Prometheus counters
//! - [`cli`] - command line surface

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Fixed-size batching
pub mod batch;

/// Command line interface
pub mod cli;

/// Attachment download orchestration
pub mod download;

/// Logging setup and console coordination
pub mod logging;

/// Download and query metrics
pub mod metrics;

/// Live progress reporting
pub mod progress;

/// Record CSV handling
pub mod records;

/// Salesforce collaborators
pub mod salesforce;

/// Stop signal shared across modules
pub mod shutdown;

/// CSV-driven workflow
pub mod workflow;

pub use download::{DownloadOrchestrator, DownloadStats};
pub use records::AttachmentRecord;
pub use workflow::{WorkflowConfig, WorkflowCoordinator, WorkflowSummary};
