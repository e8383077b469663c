//! Progress display wiring: stages, renderer and console coordination

use std::io::Write;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use sf_attachments_downloader::cli::run_workflow;
use sf_attachments_downloader::logging::{ConsoleOutput, DisplayCoordinator};
use sf_attachments_downloader::progress::renderer::{LineRenderer, ProgressRenderer};
use sf_attachments_downloader::progress::{
    ProgressMode, ProgressTracker, StageConfig, StageUpdate,
};
use sf_attachments_downloader::shutdown::StopSignal;
use sf_attachments_downloader::workflow::WorkflowConfig;

use crate::support::{write_records_csv, CsvQuery, FakeAttachment, ScriptedTransfer};

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct Silent;

impl ConsoleOutput for Silent {
    fn print(&self, _: &str) {}
    fn print_critical(&self, _: &str) {}
}

#[test]
fn test_line_renderer_draws_stage_updates() {
    let buf = SharedBuf::default();
    let renderer: Arc<dyn ProgressRenderer> = Arc::new(LineRenderer::with_writer(
        Box::new(buf.clone()),
        std::time::Duration::ZERO,
    ));
    let coordinator = DisplayCoordinator::with_console(Arc::new(Silent));
    let mut tracker = ProgressTracker::with_renderer(coordinator.clone(), Some(renderer));
    let stage = tracker.add_stage(StageConfig::downloads());

    tracker.start();
    stage.start(Some(2), None);
    stage.update(
        StageUpdate::new()
            .current(1)
            .detail("current_file", "contract.pdf")
            .detail("success_count", 1)
            .detail("failed_count", 0)
            .detail("skipped_count", 0)
            .detail("speed", "1.0 KB/s"),
    );
    stage.complete(None);
    tracker.stop();

    let text = buf.text();
    assert!(text.contains("running 1/2 Downloading files (1/2) | Current: contract.pdf"));
    assert!(text.contains("done 2/2"));
    assert!(!coordinator.is_progress_active());
}

#[test]
fn test_error_during_progress_goes_through_renderer() {
    let buf = SharedBuf::default();
    let renderer: Arc<dyn ProgressRenderer> = Arc::new(LineRenderer::with_writer(
        Box::new(buf.clone()),
        std::time::Duration::ZERO,
    ));
    let coordinator = DisplayCoordinator::with_console(Arc::new(Silent));
    let tracker = ProgressTracker::with_renderer(coordinator.clone(), Some(renderer));

    tracker.start();
    coordinator.emit(
        coordinator.route_for(&tracing::Level::ERROR),
        "authentication error: session expired",
    );
    tracker.stop();

    let text = buf.text();
    assert!(text.contains("Critical Error"));
    assert!(text.contains("session expired"));
}

#[tokio::test]
async fn test_run_workflow_releases_display() {
    let dir = TempDir::new().unwrap();
    let records_dir = dir.path().join("records");
    std::fs::create_dir_all(&records_dir).unwrap();
    write_records_csv(&records_dir, "accounts.csv", &["001000000000001AAA"]);

    let coordinator = DisplayCoordinator::with_console(Arc::new(Silent));
    let query = Arc::new(CsvQuery::new(vec![FakeAttachment::new(
        "00P000000000001AAA",
        "contract.pdf",
        "001000000000001AAA",
    )]));

    let summary = run_workflow(
        WorkflowConfig::new(&records_dir, dir.path().join("output")),
        query,
        Arc::new(ScriptedTransfer::new()),
        &coordinator,
        ProgressMode::Off,
        StopSignal::shared(),
    )
    .await
    .unwrap();

    assert_eq!(summary.downloads.success, 1);
    assert!(!coordinator.is_progress_active());
}
