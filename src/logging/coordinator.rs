//! Arbitration between console logging and live progress
//!
//! While progress is drawn, the console log layer must not write over it:
//! errors go to a critical panel, warnings are held back and flushed as one
//! block when progress ends, and info/debug output is dropped from the
//! console. The file log is a separate layer and never sees this routing.
//!
//! The coordinator is a cheap, cloneable handle. Nothing is logged or
//! written while its internal lock is held.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{Level, Metadata};
use tracing_subscriber::fmt::MakeWriter;

use super::console::{ConsoleOutput, TerminalConsole};

/// Default number of warnings held back during progress.
pub const DEFAULT_WARNING_BUFFER: usize = 50;

/// Where one console event goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleRoute {
    /// Normal console output
    Plain,
    /// Critical panel, shown even during progress
    Critical,
    /// Held back until progress ends
    Buffer,
    /// Dropped from the console
    Discard,
}

#[derive(Debug)]
struct BufferedWarning {
    at: Instant,
    message: String,
}

struct State {
    progress_depth: usize,
    warnings: VecDeque<BufferedWarning>,
    dropped_warnings: usize,
    critical: Option<Arc<dyn ConsoleOutput>>,
}

struct Inner {
    state: Mutex<State>,
    console: Arc<dyn ConsoleOutput>,
    max_warnings: usize,
}

/// Shared handle coordinating console output with the progress display.
#[derive(Clone)]
pub struct DisplayCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DisplayCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplayCoordinator")
            .field("progress_active", &self.is_progress_active())
            .field("buffered_warnings", &self.buffered_warnings())
            .finish()
    }
}

impl Default for DisplayCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplayCoordinator {
    /// Coordinator writing to the terminal.
    pub fn new() -> Self {
        Self::with_console(Arc::new(TerminalConsole))
    }

    /// Coordinator writing to `console`.
    pub fn with_console(console: Arc<dyn ConsoleOutput>) -> Self {
        Self::with_options(console, DEFAULT_WARNING_BUFFER)
    }

    /// Coordinator with an explicit warning buffer size (minimum 1).
    pub fn with_options(console: Arc<dyn ConsoleOutput>, max_warnings: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    progress_depth: 0,
                    warnings: VecDeque::new(),
                    dropped_warnings: 0,
                    critical: None,
                }),
                console,
                max_warnings: max_warnings.max(1),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enter progress mode. Calls nest; each needs a matching disable.
    pub fn enable_progress(&self) {
        self.state().progress_depth += 1;
    }

    /// Leave one level of progress mode. Buffered warnings are flushed when
    /// the last level is left. Extra calls are ignored.
    pub fn disable_progress(&self) {
        let flushed = {
            let mut state = self.state();
            if state.progress_depth == 0 {
                return;
            }
            state.progress_depth -= 1;
            if state.progress_depth > 0 {
                return;
            }
            let dropped = std::mem::take(&mut state.dropped_warnings);
            let warnings: Vec<BufferedWarning> = state.warnings.drain(..).collect();
            (warnings, dropped)
        };

        let (warnings, dropped) = flushed;
        if !warnings.is_empty() {
            self.inner.console.print(&format_warning_block(&warnings, dropped));
        }
    }

    /// Enter progress mode until the returned guard is dropped.
    pub fn progress_guard(&self) -> ProgressGuard {
        self.enable_progress();
        ProgressGuard {
            coordinator: self.clone(),
        }
    }

    /// Whether any progress level is active.
    pub fn is_progress_active(&self) -> bool {
        self.state().progress_depth > 0
    }

    /// Number of warnings waiting to be flushed.
    pub fn buffered_warnings(&self) -> usize {
        self.state().warnings.len()
    }

    /// Show critical messages through `display` instead of the console,
    /// e.g. above live progress bars. `None` restores the console.
    pub fn set_critical_display(&self, display: Option<Arc<dyn ConsoleOutput>>) {
        self.state().critical = display;
    }

    /// Route for an event at `level` given the current mode.
    pub fn route_for(&self, level: &Level) -> ConsoleRoute {
        if !self.is_progress_active() {
            return ConsoleRoute::Plain;
        }
        match *level {
            Level::ERROR => ConsoleRoute::Critical,
            Level::WARN => ConsoleRoute::Buffer,
            _ => ConsoleRoute::Discard,
        }
    }

    /// Deliver already formatted console text along `route`.
    pub fn emit(&self, route: ConsoleRoute, text: &str) {
        match route {
            ConsoleRoute::Plain => self.inner.console.print(text),
            ConsoleRoute::Critical => {
                let display = self.state().critical.clone();
                match display {
                    Some(display) => display.print_critical(text),
                    None => self.inner.console.print_critical(text),
                }
            }
            ConsoleRoute::Buffer => {
                let message = text.trim_end().to_string();
                let mut state = self.state();
                if state.progress_depth == 0 {
                    // progress ended between routing and delivery
                    drop(state);
                    self.inner.console.print(text);
                    return;
                }
                if state.warnings.len() >= self.inner.max_warnings {
                    state.warnings.pop_front();
                    state.dropped_warnings += 1;
                }
                state.warnings.push_back(BufferedWarning {
                    at: Instant::now(),
                    message,
                });
            }
            ConsoleRoute::Discard => {}
        }
    }
}

fn format_warning_block(warnings: &[BufferedWarning], dropped: usize) -> String {
    let rule = "-".repeat(60);
    let mut block = format!(
        "\n⚠️  {} warning(s) occurred during processing:\n{rule}\n",
        warnings.len() + dropped
    );
    if dropped > 0 {
        block.push_str(&format!("({dropped} older warning(s) not shown)\n"));
    }
    for warning in warnings {
        block.push_str(&format!(
            "[{:.1}s ago] {}\n",
            warning.at.elapsed().as_secs_f64(),
            warning.message
        ));
    }
    block.push_str(&rule);
    block.push('\n');
    block
}

/// Leaves progress mode on drop.
#[must_use = "progress mode ends when the guard is dropped"]
pub struct ProgressGuard {
    coordinator: DisplayCoordinator,
}

impl Drop for ProgressGuard {
    fn drop(&mut self) {
        self.coordinator.disable_progress();
    }
}

/// Buffered writer for one console event, delivered on drop.
pub struct ConsoleWriter {
    coordinator: DisplayCoordinator,
    route: ConsoleRoute,
    buf: Vec<u8>,
}

impl io::Write for ConsoleWriter {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        if self.route != ConsoleRoute::Discard {
            self.buf.extend_from_slice(bytes);
        }
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for ConsoleWriter {
    fn drop(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        let text = String::from_utf8_lossy(&self.buf);
        self.coordinator.emit(self.route, &text);
    }
}

impl<'a> MakeWriter<'a> for DisplayCoordinator {
    type Writer = ConsoleWriter;

    fn make_writer(&'a self) -> Self::Writer {
        ConsoleWriter {
            coordinator: self.clone(),
            route: ConsoleRoute::Plain,
            buf: Vec::new(),
        }
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        ConsoleWriter {
            coordinator: self.clone(),
            route: self.route_for(meta.level()),
            buf: Vec::new(),
        }
    }
}
