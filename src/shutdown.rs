//! Cooperative stop signalling.
//!
//! A [`StopSignal`] is shared between the coordinating task and the download
//! workers. It is raised either by a fatal download outcome or by Ctrl+C and
//! checked before any new unit of work starts. Raising it never aborts work
//! that is already running.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Shared handle to a stop signal.
pub type SharedStop = Arc<StopSignal>;

const NOT_STOPPED: u8 = 0;
const STOP_FATAL: u8 = 1;
const STOP_INTERRUPT: u8 = 2;

/// Why a stop was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A fatal error (auth or network) made further work pointless.
    Fatal,
    /// The user interrupted the run.
    Interrupted,
}

/// One-shot stop flag with async waiters.
#[derive(Debug, Default)]
pub struct StopSignal {
    state: AtomicU8,
    notify: Notify,
}

impl StopSignal {
    /// Create a signal in the not-stopped state.
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(NOT_STOPPED),
            notify: Notify::new(),
        }
    }

    /// Create a new shared signal wrapped in [`Arc`].
    pub fn shared() -> SharedStop {
        Arc::new(Self::new())
    }

    /// Raise the signal. The first reason wins; later calls are ignored.
    pub fn request_stop(&self, reason: StopReason) {
        let code = match reason {
            StopReason::Fatal => STOP_FATAL,
            StopReason::Interrupted => STOP_INTERRUPT,
        };
        if self
            .state
            .compare_exchange(NOT_STOPPED, code, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.notify.notify_waiters();
        }
    }

    /// Whether a stop has been requested for any reason.
    pub fn is_stopped(&self) -> bool {
        self.state.load(Ordering::SeqCst) != NOT_STOPPED
    }

    /// The reason recorded by the first [`request_stop`](Self::request_stop) call.
    pub fn reason(&self) -> Option<StopReason> {
        match self.state.load(Ordering::SeqCst) {
            STOP_FATAL => Some(StopReason::Fatal),
            STOP_INTERRUPT => Some(StopReason::Interrupted),
            _ => None,
        }
    }

    /// Wait until a stop is requested. Returns immediately if already raised.
    pub async fn wait(&self) {
        // Register interest before checking the flag so a concurrent
        // request_stop cannot slip between the check and the await.
        let notified = self.notify.notified();
        if self.is_stopped() {
            return;
        }
        notified.await;
    }
}
