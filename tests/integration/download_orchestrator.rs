//! Download orchestrator behaviour against a scripted transfer

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use sf_attachments_downloader::download::orchestrator::PATH_TRAVERSAL_MESSAGE;
use sf_attachments_downloader::download::{
    detect_filename_collisions, DownloadError, DownloadOrchestrator,
};
use sf_attachments_downloader::progress::{Stage, StageConfig, StageStatus};
use sf_attachments_downloader::salesforce::SalesforceError;
use sf_attachments_downloader::shutdown::{StopReason, StopSignal};
use sf_attachments_downloader::AttachmentRecord;

use crate::support::{records, ScriptedTransfer};

#[tokio::test]
async fn test_second_run_skips_existing_files() {
    let dir = TempDir::new().unwrap();
    let items = records(5);

    let transfer = Arc::new(ScriptedTransfer::new());
    let orchestrator = DownloadOrchestrator::new(transfer.clone()).with_workers(2);

    let first = orchestrator.download_all(&items, dir.path()).await.unwrap();
    assert_eq!(first.success, 5);
    assert_eq!(first.skipped, 0);

    let second = orchestrator.download_all(&items, dir.path()).await.unwrap();
    assert_eq!(second.success, 0);
    assert_eq!(second.skipped, 5);
    assert_eq!(second.bytes_transferred, 0);
    assert_eq!(transfer.calls().len(), 5);
}

#[tokio::test]
async fn test_fatal_error_stops_remaining_items() {
    let dir = TempDir::new().unwrap();
    let items = records(10);

    let transfer = Arc::new(
        ScriptedTransfer::new().fail(&items[2].id, SalesforceError::Auth("session expired".into())),
    );
    let orchestrator = DownloadOrchestrator::new(transfer.clone()).with_workers(1);

    let err = orchestrator
        .download_all(&items, dir.path())
        .await
        .unwrap_err();

    match err {
        DownloadError::Fatal { source, stats } => {
            assert_eq!(source, SalesforceError::Auth("session expired".into()));
            assert_eq!(stats.success, 2);
            assert_eq!(stats.failed, 1);
            assert_eq!(stats.processed(), 3);
        }
        other => panic!("expected fatal error, got {other:?}"),
    }
    assert_eq!(transfer.calls().len(), 3);
}

#[tokio::test]
async fn test_item_errors_do_not_stop_the_run() {
    let dir = TempDir::new().unwrap();
    let items = records(6);

    let transfer = Arc::new(
        ScriptedTransfer::new()
            .fail(&items[1].id, SalesforceError::Api("Attachment not found (404)".into()))
            .fail(&items[4].id, SalesforceError::Api("insufficient access (403)".into())),
    );
    let stats = DownloadOrchestrator::new(transfer)
        .with_workers(3)
        .download_all(&items, dir.path())
        .await
        .unwrap();

    assert_eq!(stats.success, 4);
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.errors.len(), 2);
    assert!(stats.errors.iter().any(|e| e.id == items[1].id));
}

#[tokio::test]
async fn test_buckets_cover_every_record() {
    let dir = TempDir::new().unwrap();
    let items = records(250);

    let transfer = Arc::new(ScriptedTransfer::new());
    let stage = Arc::new(Stage::new(StageConfig::downloads()));
    let stats = DownloadOrchestrator::new(transfer.clone())
        .with_workers(4)
        .with_bucket_size(100)
        .with_stage(stage.clone())
        .download_all(&items, dir.path())
        .await
        .unwrap();

    assert_eq!(stats.success, 250);
    assert_eq!(transfer.calls().len(), 250);

    let snapshot = stage.snapshot();
    assert_eq!(snapshot.current, 250);
    assert_eq!(snapshot.total, Some(250));
    assert_eq!(
        snapshot.detail("bucket").and_then(|v| v.as_str()),
        Some("bucket 3/3")
    );
}

#[tokio::test]
async fn test_colliding_names_use_id_prefix() {
    let dir = TempDir::new().unwrap();
    let items = vec![
        AttachmentRecord::new("00P000000000001AAA", "report.pdf", Some("001000000000001AAA")),
        AttachmentRecord::new("00P000000000002AAA", "report.pdf", Some("001000000000001AAA")),
        AttachmentRecord::new("00P000000000003AAA", "notes.txt", None),
    ];

    let stats = DownloadOrchestrator::new(Arc::new(ScriptedTransfer::new()))
        .download_all(&items, dir.path())
        .await
        .unwrap();
    assert_eq!(stats.success, 3);

    assert!(dir
        .path()
        .join("001000000000001AAA_00P000000000001AAA_report.pdf")
        .exists());
    assert!(dir
        .path()
        .join("001000000000001AAA_00P000000000002AAA_report.pdf")
        .exists());
    assert!(dir.path().join("NO_PARENT_notes.txt").exists());
}

#[tokio::test]
async fn test_interrupt_cancels_unstarted_items() {
    let dir = TempDir::new().unwrap();
    let items = records(20);

    let stop = StopSignal::shared();
    let transfer = Arc::new(ScriptedTransfer::new().with_delay(Duration::from_millis(20)));
    let orchestrator = DownloadOrchestrator::new(transfer.clone())
        .with_workers(1)
        .with_interrupt(stop.clone());

    let trigger = {
        let stop = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(70)).await;
            stop.request_stop(StopReason::Interrupted);
        })
    };

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        orchestrator.download_all(&items, dir.path()),
    )
    .await
    .expect("download did not stop");
    trigger.await.unwrap();

    match result {
        Err(DownloadError::Interrupted { stats }) => {
            assert!(stats.processed() < 20);
            assert_eq!(stats.processed(), transfer.calls().len());
        }
        other => panic!("expected interruption, got {other:?}"),
    }
}

#[tokio::test]
async fn test_fatal_marks_stage_failed() {
    let dir = TempDir::new().unwrap();
    let items = records(3);
    let stage = Arc::new(Stage::new(StageConfig::downloads()));

    let transfer = Arc::new(
        ScriptedTransfer::new().fail(&items[0].id, SalesforceError::Network("connection reset".into())),
    );
    let result = DownloadOrchestrator::new(transfer)
        .with_stage(stage.clone())
        .download_all(&items, dir.path())
        .await;

    assert!(matches!(result, Err(DownloadError::Fatal { .. })));
    assert_eq!(stage.snapshot().status, StageStatus::Failed);
}

#[tokio::test]
async fn test_fatal_error_stops_later_buckets() {
    let dir = TempDir::new().unwrap();
    let items = records(12);

    let transfer = Arc::new(
        ScriptedTransfer::new()
            .with_delay(Duration::from_millis(5))
            .fail(&items[1].id, SalesforceError::Network("connection refused".into())),
    );
    let err = DownloadOrchestrator::new(transfer.clone())
        .with_workers(3)
        .with_bucket_size(4)
        .download_all(&items, dir.path())
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::Fatal { .. }));
    let calls = transfer.calls();
    assert!(calls.len() <= 4, "attempted {} items", calls.len());
    let first_bucket: Vec<&str> = items[..4].iter().map(|r| r.id.as_str()).collect();
    assert!(calls.iter().all(|id| first_bucket.contains(&id.as_str())));
}

#[tokio::test]
async fn test_escaping_names_fail_without_stopping_the_pass() {
    let dir = TempDir::new().unwrap();
    let mut items = records(3);
    items.insert(
        1,
        AttachmentRecord::new("00P000000000099AAA", "passwd", Some("../../x")),
    );

    let transfer = Arc::new(ScriptedTransfer::new());
    let stats = DownloadOrchestrator::new(transfer.clone())
        .download_all(&items, dir.path())
        .await
        .unwrap();

    assert_eq!(stats.success, 3);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.errors.len(), 1);
    assert_eq!(stats.errors[0].id, "00P000000000099AAA");
    assert_eq!(stats.errors[0].error, PATH_TRAVERSAL_MESSAGE);
    assert!(!transfer.calls().contains(&"00P000000000099AAA".to_string()));
}

#[test]
fn test_collision_flags_ignore_input_order() {
    let items = vec![
        AttachmentRecord::new("00P000000000001AAA", "Report.pdf", Some("001000000000001AAA")),
        AttachmentRecord::new("00P000000000002AAA", "notes.txt", Some("001000000000001AAA")),
        AttachmentRecord::new("00P000000000003AAA", "report.PDF", Some("001000000000001AAA")),
        AttachmentRecord::new("00P000000000004AAA", "Report.pdf", Some("001000000000002AAA")),
        AttachmentRecord::new("00P000000000005AAA", "a:b.txt", None),
        AttachmentRecord::new("00P000000000006AAA", "a_b.txt", None),
    ];
    let expected = detect_filename_collisions(&items);

    let flagged: Vec<&str> = items
        .iter()
        .filter(|r| expected[&r.id].has_collision)
        .map(|r| r.id.as_str())
        .collect();
    assert_eq!(
        flagged,
        vec![
            "00P000000000001AAA",
            "00P000000000003AAA",
            "00P000000000005AAA",
            "00P000000000006AAA",
        ]
    );

    let mut reversed = items.clone();
    reversed.reverse();
    assert_eq!(detect_filename_collisions(&reversed), expected);

    for shift in 1..items.len() {
        let mut rotated = items.clone();
        rotated.rotate_left(shift);
        assert_eq!(detect_filename_collisions(&rotated), expected);
    }
}

#[tokio::test]
async fn test_unusable_output_dir_marks_stage_failed() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("files");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let stage = Arc::new(Stage::new(StageConfig::downloads()));

    let result = DownloadOrchestrator::new(Arc::new(ScriptedTransfer::new()))
        .with_stage(stage.clone())
        .download_all(&records(2), &blocker)
        .await;

    assert!(matches!(result, Err(DownloadError::Io(_))));
    assert_eq!(stage.snapshot().status, StageStatus::Failed);
}

#[tokio::test]
async fn test_zero_bucket_size_marks_stage_failed() {
    let dir = TempDir::new().unwrap();
    let stage = Arc::new(Stage::new(StageConfig::downloads()));

    let result = DownloadOrchestrator::new(Arc::new(ScriptedTransfer::new()))
        .with_bucket_size(0)
        .with_stage(stage.clone())
        .download_all(&records(2), dir.path())
        .await;

    assert!(matches!(result, Err(DownloadError::InvalidArgument(_))));
    assert_eq!(stage.snapshot().status, StageStatus::Failed);
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_bucket_summary_counts_only_that_bucket() {
    let dir = TempDir::new().unwrap();
    let items = records(5);
    std::fs::write(dir.path().join("001000000000001AAA_file_2.pdf"), b"old").unwrap();

    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let transfer = Arc::new(
        ScriptedTransfer::new().fail(&items[4].id, SalesforceError::Api("not found (404)".into())),
    );
    let stats = DownloadOrchestrator::new(transfer)
        .with_bucket_size(2)
        .download_all(&items, dir.path())
        .await
        .unwrap();
    assert_eq!((stats.success, stats.skipped, stats.failed), (3, 1, 1));

    let text = logs.text();
    assert!(text.contains("Completed bucket 1/3: 2 downloaded, 0 skipped, 0 failed"), "{text}");
    assert!(text.contains("Completed bucket 2/3: 1 downloaded, 1 skipped, 0 failed"), "{text}");
    assert!(text.contains("Completed bucket 3/3: 0 downloaded, 0 skipped, 1 failed"), "{text}");
    assert!(text.contains("Download complete: 3 downloaded, 1 skipped, 1 failed"), "{text}");
}
