//! Stage registry and display lifecycle

use std::sync::{Arc, Mutex};
use tracing::debug;

use super::renderer::{select_renderer, ProgressRenderer, RendererConsole, RendererListener};
use super::stage::{Stage, StageConfig, StageSnapshot};
use super::ProgressMode;
use crate::logging::{DisplayCoordinator, ProgressGuard};

/// Owns the pipeline stages and the renderer drawing them.
///
/// While started, the display coordinator is in progress mode and critical
/// log events are drawn through the renderer. Stopping (or dropping) the
/// tracker finishes the renderer first, then flushes buffered warnings.
pub struct ProgressTracker {
    coordinator: DisplayCoordinator,
    renderer: Option<Arc<dyn ProgressRenderer>>,
    stages: Vec<Arc<Stage>>,
    guard: Mutex<Option<ProgressGuard>>,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("renderer", &self.renderer_name())
            .field("stages", &self.stages.len())
            .finish()
    }
}

impl ProgressTracker {
    /// Tracker using the renderer selected for `mode`.
    pub fn new(coordinator: DisplayCoordinator, mode: ProgressMode) -> Self {
        Self::with_renderer(coordinator, select_renderer(mode))
    }

    /// Tracker with an explicit renderer, or none.
    pub fn with_renderer(
        coordinator: DisplayCoordinator,
        renderer: Option<Arc<dyn ProgressRenderer>>,
    ) -> Self {
        Self {
            coordinator,
            renderer,
            stages: Vec::new(),
            guard: Mutex::new(None),
        }
    }

    /// Create and register a stage.
    pub fn add_stage(&mut self, config: StageConfig) -> Arc<Stage> {
        let stage = Arc::new(Stage::new(config));
        if let Some(renderer) = &self.renderer {
            renderer.register_stage(stage.config());
            stage.add_listener(Arc::new(RendererListener(Arc::clone(renderer))));
        }
        self.stages.push(Arc::clone(&stage));
        stage
    }

    /// Registered stage by name.
    pub fn stage(&self, name: &str) -> Option<Arc<Stage>> {
        self.stages.iter().find(|s| s.name() == name).cloned()
    }

    /// Snapshots of all stages in registration order.
    pub fn snapshots(&self) -> Vec<StageSnapshot> {
        self.stages.iter().map(|s| s.snapshot()).collect()
    }

    /// Name of the active renderer, if any.
    pub fn renderer_name(&self) -> Option<&'static str> {
        self.renderer.as_ref().map(|r| r.name())
    }

    /// Whether the display is currently live.
    pub fn is_active(&self) -> bool {
        self.guard
            .lock()
            .map(|g| g.is_some())
            .unwrap_or(false)
    }

    /// Go live. Without a renderer the console stays in plain mode.
    pub fn start(&self) {
        let Some(renderer) = &self.renderer else {
            debug!("Progress display disabled");
            return;
        };
        let started = {
            let mut guard = self.guard.lock().unwrap_or_else(|p| p.into_inner());
            if guard.is_some() {
                false
            } else {
                self.coordinator
                    .set_critical_display(Some(Arc::new(RendererConsole(Arc::clone(renderer)))));
                *guard = Some(self.coordinator.progress_guard());
                true
            }
        };
        if started {
            debug!(renderer = renderer.name(), "Progress display started");
        }
    }

    /// End the live display and flush buffered warnings.
    pub fn stop(&self) {
        let guard = self
            .guard
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(guard) = guard {
            if let Some(renderer) = &self.renderer {
                renderer.finish();
            }
            self.coordinator.set_critical_display(None);
            drop(guard);
        }
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        self.stop();
    }
}
