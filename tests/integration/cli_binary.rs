//! Exit codes of the compiled binary for failures that happen before any
//! Salesforce call

use assert_cmd::Command;
use tempfile::TempDir;

fn bin(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("sf-attachments-downloader").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("RECORDS_DIR")
        .env_remove("BATCH_SIZE")
        .env_remove("DOWNLOAD_WORKERS")
        .env("LOG_FILE", dir.path().join("download.log"));
    cmd
}

#[test]
fn test_missing_records_dir_flag_exits_2() {
    let dir = TempDir::new().unwrap();
    bin(&dir).assert().code(2);
}

#[test]
fn test_zero_batch_size_exits_2() {
    let dir = TempDir::new().unwrap();
    bin(&dir)
        .args(["--records-dir", "records", "--batch-size", "0"])
        .assert()
        .code(2);
}

#[test]
fn test_invalid_progress_mode_exits_2() {
    let dir = TempDir::new().unwrap();
    bin(&dir)
        .args(["--records-dir", "records", "--progress", "sometimes"])
        .assert()
        .code(2);
}

#[test]
fn test_help_lists_flags() {
    let dir = TempDir::new().unwrap();
    let output = bin(&dir).arg("--help").output().unwrap();
    assert!(output.status.success());
    let help = String::from_utf8_lossy(&output.stdout);
    for flag in ["--records-dir", "--batch-size", "--download-workers", "--progress"] {
        assert!(help.contains(flag), "help is missing {flag}");
    }
}
