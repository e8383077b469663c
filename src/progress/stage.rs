//! Per-phase progress state with listener dispatch
//!
//! A [`Stage`] moves `pending -> running -> completed | failed | skipped`.
//! Terminal states are final: later `start`, `update`, `complete`, `fail` and
//! `skip` calls are ignored. Listeners receive a [`StageSnapshot`] after every
//! change; they are called outside the state lock, and a listener that keeps
//! failing is disabled.

use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

/// Default cap on detail entries per stage.
pub const DEFAULT_MAX_DETAILS: usize = 50;

/// Default number of listener errors before the listener is disabled.
pub const DEFAULT_LISTENER_ERROR_THRESHOLD: usize = 5;

/// Lifecycle state of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    /// Not started
    Pending,
    /// In progress
    Running,
    /// Finished successfully (terminal)
    Completed,
    /// Aborted by an error (terminal)
    Failed,
    /// Not applicable to this run (terminal)
    Skipped,
}

impl StageStatus {
    /// Whether no further transitions are allowed.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// Static description of a stage.
#[derive(Debug, Clone)]
pub struct StageConfig {
    /// Stable identifier passed to listeners
    pub name: String,
    /// Short label for renderers
    pub title: String,
    /// Message built on each update when the update carries none.
    /// `{current}`, `{total}` and `{<detail key>}` are substituted.
    pub message_template: String,
    /// Detail keys renderers should show
    pub detail_keys: Vec<String>,
}

impl StageConfig {
    /// A stage with no message template.
    pub fn new(name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            message_template: String::new(),
            detail_keys: Vec::new(),
        }
    }

    /// Set the message template.
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.message_template = template.into();
        self
    }

    /// Set the tracked detail keys.
    pub fn with_detail_keys(mut self, keys: &[&str]) -> Self {
        self.detail_keys = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    /// Record CSV processing.
    pub fn csv_processing() -> Self {
        Self::new("csv_processing", "CSV files")
            .with_template("Processing CSV files ({current}/{total}) | Current: {current_csv}")
            .with_detail_keys(&["current_csv", "records", "batches"])
    }

    /// Attachment metadata queries.
    pub fn query_batches() -> Self {
        Self::new("soql_query", "Queries")
            .with_template("Querying batches ({current}/{total}) | {attachments_found} attachment(s) found")
            .with_detail_keys(&["current_batch", "batch_size", "attachments_found"])
    }

    /// Attachment body downloads.
    pub fn downloads() -> Self {
        Self::new("file_downloads", "Downloads")
            .with_template(
                "Downloading files ({current}/{total}) | Current: {current_file} | [✓{success_count}/✗{failed_count}/⊙{skipped_count}] | {speed}",
            )
            .with_detail_keys(&[
                "success_count",
                "failed_count",
                "skipped_count",
                "current_file",
                "bucket",
                "bytes_transferred",
                "speed",
            ])
    }
}

/// Immutable copy of a stage's state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageSnapshot {
    /// Stage name
    pub name: String,
    /// Stage title
    pub title: String,
    /// Units done
    pub current: u64,
    /// Units expected, if known
    pub total: Option<u64>,
    /// Lifecycle state
    pub status: StageStatus,
    /// Latest status message
    pub message: String,
    /// Detail entries, oldest first
    pub details: Vec<(String, Value)>,
    /// Error recorded by `fail` or an update
    pub error: Option<String>,
}

impl StageSnapshot {
    /// Look up a detail value.
    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

/// Error returned by a listener.
#[derive(Debug, thiserror::Error)]
#[error("progress listener error: {0}")]
pub struct ListenerError(pub String);

/// Receives stage snapshots after every change.
pub trait ProgressListener: Send + Sync {
    /// Called with the stage name and a snapshot taken after the change.
    fn on_update(&self, stage: &str, snapshot: &StageSnapshot) -> Result<(), ListenerError>;
}

/// Optional fields for [`Stage::update`].
#[derive(Debug, Clone, Default)]
pub struct StageUpdate {
    current: Option<u64>,
    total: Option<u64>,
    message: Option<String>,
    details: Vec<(String, Value)>,
    error: Option<String>,
}

impl StageUpdate {
    /// An empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the current count.
    pub fn current(mut self, current: u64) -> Self {
        self.current = Some(current);
        self
    }

    /// Set the total.
    pub fn total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }

    /// Set an explicit message instead of the template.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Add or replace one detail entry.
    pub fn detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.push((key.into(), value.into()));
        self
    }

    /// Record an error without failing the stage.
    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

#[derive(Debug)]
struct StageState {
    current: u64,
    total: Option<u64>,
    status: StageStatus,
    message: String,
    details: Vec<(String, Value)>,
    error: Option<String>,
}

struct ListenerSlot {
    listener: Arc<dyn ProgressListener>,
    errors: usize,
    disabled: bool,
}

/// One pipeline phase.
pub struct Stage {
    config: StageConfig,
    max_details: usize,
    error_threshold: usize,
    state: Mutex<StageState>,
    listeners: Mutex<Vec<ListenerSlot>>,
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.config.name)
            .field("state", &self.snapshot())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking listener must not wedge the pipeline.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn render_template(template: &str, state: &StageState) -> String {
    let mut message = template.replace("{current}", &state.current.to_string()).replace(
        "{total}",
        &state.total.map(|t| t.to_string()).unwrap_or_else(|| "?".to_string()),
    );
    for (key, value) in &state.details {
        let placeholder = format!("{{{key}}}");
        if message.contains(&placeholder) {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            message = message.replace(&placeholder, &text);
        }
    }
    message
}

impl Stage {
    /// A pending stage with default limits.
    pub fn new(config: StageConfig) -> Self {
        Self {
            config,
            max_details: DEFAULT_MAX_DETAILS,
            error_threshold: DEFAULT_LISTENER_ERROR_THRESHOLD,
            state: Mutex::new(StageState {
                current: 0,
                total: None,
                status: StageStatus::Pending,
                message: String::new(),
                details: Vec::new(),
                error: None,
            }),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Override the detail cap (minimum 1).
    pub fn with_max_details(mut self, max_details: usize) -> Self {
        self.max_details = max_details.max(1);
        self
    }

    /// Override the listener error threshold (minimum 1).
    pub fn with_error_threshold(mut self, threshold: usize) -> Self {
        self.error_threshold = threshold.max(1);
        self
    }

    /// Stage name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Stage configuration.
    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    /// Register a listener.
    pub fn add_listener(&self, listener: Arc<dyn ProgressListener>) {
        lock(&self.listeners).push(ListenerSlot {
            listener,
            errors: 0,
            disabled: false,
        });
    }

    /// Number of listeners still receiving updates.
    pub fn active_listeners(&self) -> usize {
        lock(&self.listeners).iter().filter(|s| !s.disabled).count()
    }

    /// Move to running and reset `current`. Allowed while already running.
    pub fn start(&self, total: Option<u64>, message: Option<&str>) {
        let changed = self.mutate(|state| {
            state.status = StageStatus::Running;
            state.current = 0;
            if total.is_some() {
                state.total = total;
            }
            if let Some(message) = message {
                state.message = message.to_string();
            }
            state.error = None;
        });
        if let Some(snapshot) = changed {
            self.notify(&snapshot);
        }
    }

    /// Apply an update. Ignored once terminal.
    pub fn update(&self, update: StageUpdate) {
        let template = self.config.message_template.clone();
        let max_details = self.max_details;
        let changed = self.mutate(|state| {
            if let Some(current) = update.current {
                state.current = current;
            }
            if update.total.is_some() {
                state.total = update.total;
            }
            for (key, value) in update.details {
                state.details.retain(|(k, _)| *k != key);
                state.details.push((key, value));
            }
            if state.details.len() > max_details {
                let excess = state.details.len() - max_details;
                state.details.drain(..excess);
            }
            if let Some(error) = update.error {
                state.error = Some(error);
            }
            match update.message {
                Some(message) => state.message = message,
                None if !template.is_empty() && state.status == StageStatus::Running => {
                    state.message = render_template(&template, state);
                }
                None => {}
            }
        });
        if let Some(snapshot) = changed {
            self.notify(&snapshot);
        }
    }

    /// Mark completed; `current` is set to `total` when known.
    pub fn complete(&self, message: Option<&str>) {
        let changed = self.mutate(|state| {
            state.status = StageStatus::Completed;
            if let Some(total) = state.total {
                state.current = total;
            }
            if let Some(message) = message {
                state.message = message.to_string();
            }
        });
        if let Some(snapshot) = changed {
            self.notify(&snapshot);
        }
    }

    /// Mark failed with `error`.
    pub fn fail(&self, error: &str, message: Option<&str>) {
        let changed = self.mutate(|state| {
            state.status = StageStatus::Failed;
            state.error = Some(error.to_string());
            if let Some(message) = message {
                state.message = message.to_string();
            }
        });
        if let Some(snapshot) = changed {
            self.notify(&snapshot);
        }
    }

    /// Mark skipped.
    pub fn skip(&self, message: Option<&str>) {
        let changed = self.mutate(|state| {
            state.status = StageStatus::Skipped;
            if let Some(message) = message {
                state.message = message.to_string();
            }
        });
        if let Some(snapshot) = changed {
            self.notify(&snapshot);
        }
    }

    /// Deep copy of the current state.
    pub fn snapshot(&self) -> StageSnapshot {
        let state = lock(&self.state);
        self.snapshot_of(&state)
    }

    fn snapshot_of(&self, state: &StageState) -> StageSnapshot {
        StageSnapshot {
            name: self.config.name.clone(),
            title: self.config.title.clone(),
            current: state.current,
            total: state.total,
            status: state.status,
            message: state.message.clone(),
            details: state.details.clone(),
            error: state.error.clone(),
        }
    }

    /// Run `f` under the lock unless terminal; returns the resulting snapshot.
    fn mutate(&self, f: impl FnOnce(&mut StageState)) -> Option<StageSnapshot> {
        let mut state = lock(&self.state);
        if state.status.is_terminal() {
            return None;
        }
        f(&mut state);
        Some(self.snapshot_of(&state))
    }

    fn notify(&self, snapshot: &StageSnapshot) {
        let active: Vec<(usize, Arc<dyn ProgressListener>)> = lock(&self.listeners)
            .iter()
            .enumerate()
            .filter(|(_, slot)| !slot.disabled)
            .map(|(i, slot)| (i, Arc::clone(&slot.listener)))
            .collect();

        let mut failures = Vec::new();
        for (index, listener) in active {
            if let Err(err) = listener.on_update(&self.config.name, snapshot) {
                failures.push((index, err));
            }
        }
        if failures.is_empty() {
            return;
        }

        let mut disabled_now = Vec::new();
        {
            let mut listeners = lock(&self.listeners);
            for (index, _) in &failures {
                if let Some(slot) = listeners.get_mut(*index) {
                    slot.errors += 1;
                    if slot.errors >= self.error_threshold && !slot.disabled {
                        slot.disabled = true;
                        disabled_now.push(slot.errors);
                    }
                }
            }
        }

        for (_, err) in &failures {
            warn!("Progress listener error for {}: {}", self.config.name, err);
        }
        for errors in disabled_now {
            warn!(
                "Disabling progress listener for {} after {} errors",
                self.config.name, errors
            );
        }
    }
}
