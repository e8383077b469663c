//! Console routing through the installed subscriber
//!
//! Only one test in this binary may install the global subscriber.

use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use sf_attachments_downloader::logging::{
    init_logging, ConsoleOutput, DisplayCoordinator, LoggingConfig,
};

// Events must fall under the crate's filter directives
const TARGET: &str = "sf_attachments_downloader::tests";

#[derive(Default)]
struct Capture {
    plain: Mutex<Vec<String>>,
    critical: Mutex<Vec<String>>,
}

impl ConsoleOutput for Capture {
    fn print(&self, text: &str) {
        self.plain.lock().unwrap().push(text.to_string());
    }
    fn print_critical(&self, text: &str) {
        self.critical.lock().unwrap().push(text.to_string());
    }
}

#[test]
fn test_progress_mode_routes_console_and_keeps_file_log() {
    let dir = TempDir::new().unwrap();
    let log_file = dir.path().join("logs/download.log");
    let capture = Arc::new(Capture::default());
    let coordinator = DisplayCoordinator::with_console(capture.clone());

    let mut config = LoggingConfig::new(&log_file, 1);
    config.json = false;
    init_logging(&config, &coordinator).unwrap();

    tracing::info!(target: TARGET, "before progress");
    assert_eq!(capture.plain.lock().unwrap().len(), 1);

    {
        let _guard = coordinator.progress_guard();
        tracing::info!(target: TARGET, "hidden during progress");
        tracing::warn!(target: TARGET, "quota nearly exhausted");
        tracing::error!(target: TARGET, "attachment rejected");

        assert_eq!(capture.plain.lock().unwrap().len(), 1);
        assert_eq!(coordinator.buffered_warnings(), 1);
        let critical = capture.critical.lock().unwrap();
        assert_eq!(critical.len(), 1);
        assert!(critical[0].contains("attachment rejected"));
    }

    let plain = capture.plain.lock().unwrap();
    assert_eq!(plain.len(), 2);
    assert!(plain[1].contains("1 warning(s) occurred during processing:"));
    assert!(plain[1].contains("quota nearly exhausted"));

    let file_log = std::fs::read_to_string(&log_file).unwrap();
    assert!(file_log.contains("before progress"));
    assert!(file_log.contains("hidden during progress"));
    assert!(file_log.contains("quota nearly exhausted"));
}
