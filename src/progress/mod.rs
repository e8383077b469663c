//! Live progress reporting
//!
//! - [`stage`] - per-phase progress state and listener dispatch
//! - [`renderer`] - terminal renderers and their startup selection
//! - [`tracker`] - wires stages, renderer and the display coordinator together

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub mod renderer;
pub mod stage;
pub mod tracker;

pub use stage::{
    ListenerError, ProgressListener, Stage, StageConfig, StageSnapshot, StageStatus, StageUpdate,
};
pub use tracker::ProgressTracker;

/// When to draw live progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgressMode {
    /// Live bars on a terminal, plain lines otherwise
    #[default]
    Auto,
    /// Always draw live bars
    On,
    /// No progress display
    Off,
}

impl FromStr for ProgressMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "on" | "true" | "yes" => Ok(Self::On),
            "off" | "false" | "no" => Ok(Self::Off),
            other => Err(format!(
                "invalid progress mode '{other}', expected auto, on or off"
            )),
        }
    }
}

impl fmt::Display for ProgressMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Auto => "auto",
            Self::On => "on",
            Self::Off => "off",
        };
        f.write_str(s)
    }
}

/// Human-readable byte count: `512 B`, `1.5 KB`, `3.2 MB`, `1.0 GB`.
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let b = bytes as f64;
    if b < KB {
        format!("{bytes} B")
    } else if b < KB * KB {
        format!("{:.1} KB", b / KB)
    } else if b < KB * KB * KB {
        format!("{:.1} MB", b / (KB * KB))
    } else {
        format!("{:.1} GB", b / (KB * KB * KB))
    }
}

/// Transfer rate over `elapsed`, e.g. `1.2 MB/s`.
pub fn format_speed(bytes: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return "0 B/s".to_string();
    }
    format!("{}/s", format_bytes((bytes as f64 / secs) as u64))
}

/// Shorten `text` to `max` characters, ending in `...` when cut.
pub fn shorten(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(3);
    let head: String = text.chars().take(keep).collect();
    format!("{head}...")
}
