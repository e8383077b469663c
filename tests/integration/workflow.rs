//! End-to-end workflow runs against in-memory collaborators

use std::sync::Arc;
use tempfile::TempDir;

use sf_attachments_downloader::progress::{Stage, StageConfig, StageStatus};
use sf_attachments_downloader::records::{FilterStrategy, ParentIdFilter, RecordsError};
use sf_attachments_downloader::salesforce::SalesforceError;
use sf_attachments_downloader::shutdown::{StopReason, StopSignal};
use sf_attachments_downloader::workflow::{
    WorkflowConfig, WorkflowCoordinator, WorkflowError, WorkflowStages,
};

use crate::support::{write_records_csv, CsvQuery, FakeAttachment, ScriptedTransfer};

const ACCOUNT_1: &str = "001000000000001AAA";
const ACCOUNT_2: &str = "001000000000002AAA";
const CONTACT_1: &str = "003000000000001AAA";

fn attachments() -> Vec<FakeAttachment> {
    vec![
        FakeAttachment::new("00P000000000001AAA", "contract.pdf", ACCOUNT_1),
        FakeAttachment::new("00P000000000002AAA", "invoice.pdf", ACCOUNT_1),
        FakeAttachment::new("00P000000000003AAA", "photo.jpg", ACCOUNT_2),
        FakeAttachment::new("00P000000000004AAA", "cv.docx", CONTACT_1),
    ]
}

struct Fixture {
    _dir: TempDir,
    records_dir: std::path::PathBuf,
    output_dir: std::path::PathBuf,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let records_dir = dir.path().join("records");
    let output_dir = dir.path().join("output");
    std::fs::create_dir_all(&records_dir).unwrap();
    Fixture {
        records_dir,
        output_dir,
        _dir: dir,
    }
}

fn workflow(
    fx: &Fixture,
    query: Arc<CsvQuery>,
    transfer: Arc<ScriptedTransfer>,
    configure: impl FnOnce(&mut WorkflowConfig),
) -> WorkflowCoordinator {
    let mut config = WorkflowConfig::new(&fx.records_dir, &fx.output_dir);
    configure(&mut config);
    WorkflowCoordinator::new(query, transfer, config, StopSignal::shared())
}

#[tokio::test]
async fn test_downloads_attachments_per_csv() {
    let fx = fixture();
    write_records_csv(&fx.records_dir, "accounts.csv", &[ACCOUNT_1, ACCOUNT_2, ACCOUNT_1]);
    write_records_csv(&fx.records_dir, "contacts.csv", &[CONTACT_1]);

    let query = Arc::new(CsvQuery::new(attachments()));
    let transfer = Arc::new(ScriptedTransfer::new());
    let summary = workflow(&fx, query, transfer, |_| {}).run().await.unwrap();

    assert_eq!(summary.total_csv_files, 2);
    assert_eq!(summary.total_records, 3);
    assert_eq!(summary.total_batches, 2);
    assert_eq!(summary.total_attachments, 4);
    assert_eq!(summary.downloads.success, 4);
    assert!(!summary.has_failures());

    let files = fx.output_dir.join("accounts").join("files");
    assert!(files.join(format!("{ACCOUNT_1}_contract.pdf")).exists());
    assert!(files.join(format!("{ACCOUNT_2}_photo.jpg")).exists());
    assert!(fx
        .output_dir
        .join("contacts/files")
        .join(format!("{CONTACT_1}_cv.docx"))
        .exists());

    let metadata: Vec<String> = std::fs::read_dir(fx.output_dir.join("accounts/metadata"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert!(metadata.iter().any(|n| n.ends_with("_batch001.csv")));
    assert!(metadata.iter().any(|n| n.ends_with("_merged.csv")));
}

#[tokio::test]
async fn test_rerun_skips_downloaded_files() {
    let fx = fixture();
    write_records_csv(&fx.records_dir, "accounts.csv", &[ACCOUNT_1]);

    let query = Arc::new(CsvQuery::new(attachments()));
    let transfer = Arc::new(ScriptedTransfer::new());
    let first = workflow(&fx, query.clone(), transfer.clone(), |_| {})
        .run()
        .await
        .unwrap();
    let second = workflow(&fx, query, transfer.clone(), |_| {})
        .run()
        .await
        .unwrap();

    assert_eq!(first.downloads.success, 2);
    assert_eq!(second.downloads.success, 0);
    assert_eq!(second.downloads.skipped, 2);
    assert_eq!(transfer.calls().len(), 2);
}

#[tokio::test]
async fn test_batches_follow_batch_size() {
    let fx = fixture();
    let ids: Vec<String> = (1..=5).map(|i| format!("001{i:015}")).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    write_records_csv(&fx.records_dir, "accounts.csv", &id_refs);

    let query = Arc::new(CsvQuery::new(Vec::new()));
    let summary = workflow(&fx, query.clone(), Arc::new(ScriptedTransfer::new()), |c| {
        c.batch_size = 2
    })
    .run()
    .await
    .unwrap();

    assert_eq!(summary.total_batches, 3);
    assert_eq!(summary.total_attachments, 0);
    let clauses = query.clauses();
    assert_eq!(clauses.len(), 3);
    assert!(clauses[0].starts_with("WHERE ParentId IN ("));
}

#[tokio::test]
async fn test_query_error_fails_only_that_csv() {
    let fx = fixture();
    write_records_csv(&fx.records_dir, "accounts.csv", &[ACCOUNT_1]);
    write_records_csv(&fx.records_dir, "contacts.csv", &[CONTACT_1]);

    let query = Arc::new(
        CsvQuery::new(attachments()).fail_for(ACCOUNT_1, SalesforceError::Query("malformed query".into())),
    );
    let summary = workflow(&fx, query, Arc::new(ScriptedTransfer::new()), |_| {})
        .run()
        .await
        .unwrap();

    assert!(summary.has_failures());
    assert_eq!(summary.failed_files.len(), 1);
    assert_eq!(summary.failed_files[0].csv_name, "accounts");
    assert!(summary.failed_files[0].error.contains("malformed query"));
    assert_eq!(summary.per_csv.len(), 1);
    assert_eq!(summary.downloads.success, 1);
}

#[tokio::test]
async fn test_csv_without_id_column_is_recorded() {
    let fx = fixture();
    std::fs::write(fx.records_dir.join("broken.csv"), "Name,Email\nA,a@example.com\n").unwrap();
    write_records_csv(&fx.records_dir, "contacts.csv", &[CONTACT_1]);

    let summary = workflow(
        &fx,
        Arc::new(CsvQuery::new(attachments())),
        Arc::new(ScriptedTransfer::new()),
        |_| {},
    )
    .run()
    .await
    .unwrap();

    assert_eq!(summary.failed_files.len(), 1);
    assert_eq!(summary.failed_files[0].csv_name, "broken");
    assert_eq!(summary.downloads.success, 1);
}

#[tokio::test]
async fn test_auth_error_aborts_run_and_fails_stages() {
    let fx = fixture();
    write_records_csv(&fx.records_dir, "accounts.csv", &[ACCOUNT_1]);
    write_records_csv(&fx.records_dir, "contacts.csv", &[CONTACT_1]);

    let query = Arc::new(
        CsvQuery::new(attachments()).fail_for(ACCOUNT_1, SalesforceError::Auth("invalid session".into())),
    );
    let stages = WorkflowStages {
        csv: Some(Arc::new(Stage::new(StageConfig::csv_processing()))),
        query: Some(Arc::new(Stage::new(StageConfig::query_batches()))),
        download: Some(Arc::new(Stage::new(StageConfig::downloads()))),
    };
    let result = workflow(&fx, query.clone(), Arc::new(ScriptedTransfer::new()), |_| {})
        .with_stages(stages.clone())
        .run()
        .await;

    assert!(matches!(
        result,
        Err(WorkflowError::Fatal(SalesforceError::Auth(_)))
    ));
    // contacts.csv sorts after accounts.csv and is never queried
    assert_eq!(query.clauses().len(), 1);
    for stage in [&stages.csv, &stages.query, &stages.download].into_iter().flatten() {
        assert_eq!(stage.snapshot().status, StageStatus::Failed);
    }
}

#[tokio::test]
async fn test_network_error_during_download_aborts_run() {
    let fx = fixture();
    write_records_csv(&fx.records_dir, "accounts.csv", &[ACCOUNT_1]);

    let transfer = Arc::new(
        ScriptedTransfer::new().fail("00P000000000001AAA", SalesforceError::Network("timeout".into())),
    );
    let result = workflow(&fx, Arc::new(CsvQuery::new(attachments())), transfer, |_| {})
        .run()
        .await;

    assert!(matches!(
        result,
        Err(WorkflowError::Fatal(SalesforceError::Network(_)))
    ));
}

#[tokio::test]
async fn test_local_prefix_filter_drops_other_parents() {
    let fx = fixture();
    write_records_csv(&fx.records_dir, "mixed.csv", &[ACCOUNT_1, CONTACT_1]);

    let filter = ParentIdFilter::parse(Some("003"), None, FilterStrategy::Local);
    let transfer = Arc::new(ScriptedTransfer::new());
    let summary = workflow(&fx, Arc::new(CsvQuery::new(attachments())), transfer.clone(), |c| {
        c.filter = filter
    })
    .run()
    .await
    .unwrap();

    assert_eq!(summary.total_attachments, 1);
    assert_eq!(transfer.calls(), vec!["00P000000000004AAA".to_string()]);
}

#[tokio::test]
async fn test_remote_filter_limits_queried_ids() {
    let fx = fixture();
    write_records_csv(&fx.records_dir, "accounts.csv", &[ACCOUNT_1, ACCOUNT_2]);

    let query = Arc::new(CsvQuery::new(attachments()));
    let filter = ParentIdFilter::parse(None, Some(ACCOUNT_2), FilterStrategy::Remote);
    let summary = workflow(&fx, query.clone(), Arc::new(ScriptedTransfer::new()), |c| {
        c.filter = filter
    })
    .run()
    .await
    .unwrap();

    assert_eq!(summary.total_records, 1);
    assert_eq!(summary.total_attachments, 1);
    let clauses = query.clauses();
    assert!(clauses[0].contains(ACCOUNT_2));
    assert!(!clauses[0].contains(ACCOUNT_1));
}

#[tokio::test]
async fn test_stop_before_run_is_interrupted() {
    let fx = fixture();
    write_records_csv(&fx.records_dir, "accounts.csv", &[ACCOUNT_1]);

    let stop = StopSignal::shared();
    stop.request_stop(StopReason::Interrupted);
    let result = WorkflowCoordinator::new(
        Arc::new(CsvQuery::new(attachments())),
        Arc::new(ScriptedTransfer::new()),
        WorkflowConfig::new(&fx.records_dir, &fx.output_dir),
        stop,
    )
    .run()
    .await;

    assert!(matches!(result, Err(WorkflowError::Interrupted)));
}

#[tokio::test]
async fn test_missing_records_dir_is_run_error() {
    let fx = fixture();
    let config = WorkflowConfig::new(fx.records_dir.join("nope"), &fx.output_dir);
    let result = WorkflowCoordinator::new(
        Arc::new(CsvQuery::new(Vec::new())),
        Arc::new(ScriptedTransfer::new()),
        config,
        StopSignal::shared(),
    )
    .run()
    .await;

    assert!(matches!(
        result,
        Err(WorkflowError::Records(RecordsError::DirectoryNotFound(_)))
    ));
}
