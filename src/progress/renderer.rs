//! Progress renderers and startup selection
//!
//! Candidates are tried in [`RENDERER_FACTORIES`] order and the first one
//! available for the requested mode wins. The choice is made once per process:
//! terminal capabilities do not change mid-run.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::io::{IsTerminal, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::stage::{ListenerError, ProgressListener, StageConfig, StageSnapshot, StageStatus};
use super::ProgressMode;
use crate::logging::console::{critical_panel, ConsoleOutput};

/// Minimum gap between two plain progress lines for the same stage.
pub const DEFAULT_LINE_INTERVAL: Duration = Duration::from_secs(2);

/// Draws stage snapshots.
pub trait ProgressRenderer: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Prepare output for a stage before its first snapshot.
    fn register_stage(&self, config: &StageConfig);

    /// Draw one snapshot.
    fn render(&self, stage: &str, snapshot: &StageSnapshot) -> Result<(), ListenerError>;

    /// Show a critical message without corrupting the display.
    fn print_critical(&self, text: &str);

    /// Tear the display down.
    fn finish(&self);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Forwards stage updates to a renderer.
pub struct RendererListener(pub Arc<dyn ProgressRenderer>);

impl ProgressListener for RendererListener {
    fn on_update(&self, stage: &str, snapshot: &StageSnapshot) -> Result<(), ListenerError> {
        self.0.render(stage, snapshot)
    }
}

/// Exposes a renderer as the coordinator's critical display.
pub struct RendererConsole(pub Arc<dyn ProgressRenderer>);

impl ConsoleOutput for RendererConsole {
    fn print(&self, text: &str) {
        self.0.print_critical(text);
    }

    fn print_critical(&self, text: &str) {
        self.0.print_critical(text);
    }
}

/// One live bar per stage, drawn on stderr.
pub struct IndicatifRenderer {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl IndicatifRenderer {
    /// Renderer drawing to stderr.
    pub fn new() -> Self {
        Self::with_target(ProgressDrawTarget::stderr())
    }

    /// Renderer drawing to `target` (hidden in tests).
    pub fn with_target(target: ProgressDrawTarget) -> Self {
        Self {
            multi: MultiProgress::with_draw_target(target),
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("{spinner:.green} {prefix:>10} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
            .expect("hardcoded template is valid")
            .progress_chars("#>-")
    }
}

impl Default for IndicatifRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressRenderer for IndicatifRenderer {
    fn name(&self) -> &'static str {
        "indicatif"
    }

    fn register_stage(&self, config: &StageConfig) {
        let mut bars = lock(&self.bars);
        if bars.contains_key(&config.name) {
            return;
        }
        let bar = self.multi.add(ProgressBar::new(0));
        bar.set_style(Self::style());
        bar.set_prefix(config.title.clone());
        bar.set_message("waiting");
        bars.insert(config.name.clone(), bar);
    }

    fn render(&self, stage: &str, snapshot: &StageSnapshot) -> Result<(), ListenerError> {
        let bar = lock(&self.bars)
            .get(stage)
            .cloned()
            .ok_or_else(|| ListenerError(format!("unknown stage '{stage}'")))?;

        if let Some(total) = snapshot.total {
            bar.set_length(total);
        }
        bar.set_position(snapshot.current);
        match snapshot.status {
            StageStatus::Pending | StageStatus::Running => bar.set_message(snapshot.message.clone()),
            StageStatus::Completed => bar.finish_with_message(snapshot.message.clone()),
            StageStatus::Failed => bar.abandon_with_message(format!(
                "failed: {}",
                snapshot.error.as_deref().unwrap_or("unknown error")
            )),
            StageStatus::Skipped => bar.finish_with_message("skipped"),
        }
        Ok(())
    }

    fn print_critical(&self, text: &str) {
        let panel = critical_panel(text);
        if self.multi.is_hidden() || self.multi.println(panel.trim_end()).is_err() {
            let _ = std::io::stderr().write_all(panel.as_bytes());
        }
    }

    fn finish(&self) {
        let bars: Vec<ProgressBar> = lock(&self.bars).values().cloned().collect();
        for bar in bars.iter().filter(|b| !b.is_finished()) {
            bar.abandon();
        }
    }
}

/// Plain, throttled progress lines for non-interactive output.
pub struct LineRenderer {
    out: Mutex<Box<dyn Write + Send>>,
    interval: Duration,
    last: Mutex<HashMap<String, (Instant, StageStatus)>>,
    titles: Mutex<HashMap<String, String>>,
}

impl LineRenderer {
    /// Lines on stderr at the default interval.
    pub fn new() -> Self {
        Self::with_writer(Box::new(std::io::stderr()), DEFAULT_LINE_INTERVAL)
    }

    /// Lines on `out`, at most one per `interval` per stage unless the
    /// status changes.
    pub fn with_writer(out: Box<dyn Write + Send>, interval: Duration) -> Self {
        Self {
            out: Mutex::new(out),
            interval,
            last: Mutex::new(HashMap::new()),
            titles: Mutex::new(HashMap::new()),
        }
    }

    fn due(&self, stage: &str, status: StageStatus) -> bool {
        let mut last = lock(&self.last);
        let now = Instant::now();
        let due = match last.get(stage) {
            None => true,
            Some((at, prev)) => *prev != status || now.duration_since(*at) >= self.interval,
        };
        if due {
            last.insert(stage.to_string(), (now, status));
        }
        due
    }
}

impl Default for LineRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressRenderer for LineRenderer {
    fn name(&self) -> &'static str {
        "lines"
    }

    fn register_stage(&self, config: &StageConfig) {
        lock(&self.titles).insert(config.name.clone(), config.title.clone());
    }

    fn render(&self, stage: &str, snapshot: &StageSnapshot) -> Result<(), ListenerError> {
        if !self.due(stage, snapshot.status) {
            return Ok(());
        }
        let title = lock(&self.titles)
            .get(stage)
            .cloned()
            .unwrap_or_else(|| stage.to_string());
        let counts = match snapshot.total {
            Some(total) => format!("{}/{}", snapshot.current, total),
            None => snapshot.current.to_string(),
        };
        let status = match snapshot.status {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Completed => "done",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
        };
        let line = format!("[{title}] {status} {counts} {}\n", snapshot.message);
        lock(&self.out)
            .write_all(line.as_bytes())
            .map_err(|e| ListenerError(e.to_string()))
    }

    fn print_critical(&self, text: &str) {
        let _ = lock(&self.out).write_all(critical_panel(text).as_bytes());
    }

    fn finish(&self) {
        let _ = lock(&self.out).flush();
    }
}

/// A renderer candidate.
pub struct RendererFactory {
    /// Candidate name
    pub name: &'static str,
    /// Whether this candidate can serve `mode` given terminal support
    pub available: fn(ProgressMode, bool) -> bool,
    /// Construct the renderer
    pub build: fn() -> Arc<dyn ProgressRenderer>,
}

impl std::fmt::Debug for RendererFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

fn indicatif_available(mode: ProgressMode, is_terminal: bool) -> bool {
    match mode {
        ProgressMode::On => true,
        ProgressMode::Auto => is_terminal,
        ProgressMode::Off => false,
    }
}

fn lines_available(mode: ProgressMode, _is_terminal: bool) -> bool {
    mode != ProgressMode::Off
}

fn build_indicatif() -> Arc<dyn ProgressRenderer> {
    Arc::new(IndicatifRenderer::new())
}

fn build_lines() -> Arc<dyn ProgressRenderer> {
    Arc::new(LineRenderer::new())
}

/// Renderer candidates in priority order.
pub static RENDERER_FACTORIES: [RendererFactory; 2] = [
    RendererFactory {
        name: "indicatif",
        available: indicatif_available,
        build: build_indicatif,
    },
    RendererFactory {
        name: "lines",
        available: lines_available,
        build: build_lines,
    },
];

/// First candidate available for `mode`, `None` when progress is off.
pub fn pick_factory(mode: ProgressMode, is_terminal: bool) -> Option<&'static RendererFactory> {
    if mode == ProgressMode::Off {
        return None;
    }
    RENDERER_FACTORIES
        .iter()
        .find(|factory| (factory.available)(mode, is_terminal))
}

static SELECTED: OnceCell<(ProgressMode, Option<&'static RendererFactory>)> = OnceCell::new();

/// Build the renderer for `mode`, probing the terminal only on first use.
pub fn select_renderer(mode: ProgressMode) -> Option<Arc<dyn ProgressRenderer>> {
    let (cached_mode, factory) =
        *SELECTED.get_or_init(|| (mode, pick_factory(mode, std::io::stderr().is_terminal())));
    let factory = if cached_mode == mode {
        factory
    } else {
        pick_factory(mode, std::io::stderr().is_terminal())
    };
    factory.map(|f| (f.build)())
}
