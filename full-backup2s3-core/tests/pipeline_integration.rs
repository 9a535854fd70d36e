use full_backup2s3_core::config::BackupSection;
use full_backup2s3_core::contract::{
    BackupToolOutput, MockBackupTool, MockChecksummer, MockMetricSink, MockObjectStore,
};
use full_backup2s3_core::monitoring::{keys, Monitor};
use full_backup2s3_core::pipeline::{run_pipeline, Collaborators, PipelineError, RunMode};
use full_backup2s3_core::upload::{upload_all, UploadTarget};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

fn section_for(dir: &Path) -> BackupSection {
    BackupSection {
        backup_file: "tableau_backup".into(),
        backup_dir: dir.to_path_buf(),
        append_timestamp: true,
        multithreaded: true,
        extension: ".tsbak".into(),
        tsm_command: "tsm".into(),
        profile_script: None,
        checksum_command: "md5sum".into(),
    }
}

fn checksummer() -> MockChecksummer {
    let mut checksummer = MockChecksummer::new();
    checksummer.expect_checksum().returning(|path: &Path| {
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        Ok(format!("0123456789abcdef  {name}"))
    });
    checksummer
}

/// Collects every metric sent to the mock sink.
fn recording_sink() -> (MockMetricSink, Arc<Mutex<Vec<(String, i64)>>>) {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let recorder = sent.clone();
    let mut sink = MockMetricSink::new();
    sink.expect_send().returning(move |key: &str, value: i64| {
        recorder.lock().unwrap().push((key.to_string(), value));
        Ok(())
    });
    (sink, sent)
}

fn successful_tool() -> MockBackupTool {
    let mut tool = MockBackupTool::new();
    tool.expect_run_backup().times(1).returning(|req| {
        Ok(BackupToolOutput {
            exit_code: 0,
            stdout: format!("Backup written to '/var/backups/{}.tsbak'", req.backup_file),
            stderr: String::new(),
        })
    });
    tool
}

#[tokio::test]
async fn file_is_removed_only_when_upload_succeeds() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("good.tsbak"), b"good").unwrap();
    std::fs::write(dir.path().join("bad.tsbak"), b"bad").unwrap();
    std::fs::write(dir.path().join("readme.txt"), b"ignored").unwrap();

    let mut store = MockObjectStore::new();
    store
        .expect_upload_file()
        .returning(|_bucket: &str, key: &str, _path: &Path| {
            if key.contains("bad") {
                Err("access denied".into())
            } else {
                Ok(())
            }
        });
    store
        .expect_put_object()
        .withf(|bucket: &str, key: &str, body: &str| {
            bucket == "tableau-backups"
                && key == "nightly/good.tsbak.md5sum.txt"
                && body == "0123456789abcdef  good.tsbak\n"
        })
        .times(1)
        .returning(|_, _, _| Ok(()));

    let report = upload_all(
        &section_for(dir.path()),
        &UploadTarget::new("tableau-backups", "nightly/"),
        &store,
        &checksummer(),
        &Monitor::disabled(),
    )
    .await
    .expect("upload pass should complete");

    assert!(!dir.path().join("good.tsbak").exists(), "uploaded file must be removed");
    assert!(dir.path().join("bad.tsbak").exists(), "failed file must stay for the next run");
    assert!(dir.path().join("readme.txt").exists());

    assert_eq!(report.files.len(), 2);
    let bad = &report.files[0];
    assert_eq!(bad.file_name, "bad.tsbak");
    assert_eq!(bad.result_code, 1);
    assert!(!bad.removed);
    let good = &report.files[1];
    assert_eq!(good.file_name, "good.tsbak");
    assert_eq!(good.result_code, 0);
    assert!(good.removed);
    assert_eq!(good.checksum.as_deref(), Some("0123456789abcdef  good.tsbak"));
    assert!(!report.all_succeeded());
}

#[tokio::test]
async fn upload_metrics_are_sent_only_for_successful_files() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("a.tsbak"), b"12345").unwrap();
    std::fs::write(dir.path().join("b.tsbak"), b"1").unwrap();

    let mut store = MockObjectStore::new();
    store
        .expect_upload_file()
        .returning(|_bucket: &str, key: &str, _path: &Path| {
            if key == "b.tsbak" {
                Err("connection reset".into())
            } else {
                Ok(())
            }
        });
    store.expect_put_object().returning(|_, _, _| Ok(()));

    let (sink, sent) = recording_sink();
    upload_all(
        &section_for(dir.path()),
        &UploadTarget::new("tableau-backups", ""),
        &store,
        &checksummer(),
        &Monitor::new(Some(&sink)),
    )
    .await
    .unwrap();

    let sent = sent.lock().unwrap().clone();
    let keys_sent: Vec<&str> = sent.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(
        keys_sent,
        vec![
            keys::BACKUP_FILE_SIZE,
            keys::UPLOAD_RESULT_CODE,
            keys::UPLOAD_DURATION
        ]
    );
    assert_eq!(sent[0].1, 5);
    assert_eq!(sent[1].1, 0);
}

#[tokio::test]
async fn checksum_failure_keeps_the_file() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("a.tsbak"), b"data").unwrap();

    let mut checksummer = MockChecksummer::new();
    checksummer
        .expect_checksum()
        .returning(|_| Err("md5sum: a.tsbak: Permission denied".into()));
    let mut store = MockObjectStore::new();
    store.expect_upload_file().never();
    store.expect_put_object().never();

    let report = upload_all(
        &section_for(dir.path()),
        &UploadTarget::new("tableau-backups", ""),
        &store,
        &checksummer,
        &Monitor::disabled(),
    )
    .await
    .unwrap();

    assert!(dir.path().join("a.tsbak").exists());
    assert_eq!(report.files[0].result_code, 1);
}

#[tokio::test]
async fn backup_then_upload_reports_everything() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("tableau_backup.tsbak"), b"backup").unwrap();

    let mut tool = MockBackupTool::new();
    tool.expect_run_backup()
        .withf(|req| req.backup_file.starts_with("tableau_backup_") && req.multithreaded)
        .times(1)
        .returning(|req| {
            Ok(BackupToolOutput {
                exit_code: 0,
                stdout: format!("Backup written to '/var/backups/{}.tsbak'", req.backup_file),
                stderr: String::new(),
            })
        });
    let mut store = MockObjectStore::new();
    store
        .expect_verify_credentials()
        .times(1)
        .returning(|| Ok("arn:aws:iam::123456789012:user/backup".to_string()));
    store.expect_upload_file().times(1).returning(|_, _, _| Ok(()));
    store.expect_put_object().times(1).returning(|_, _, _| Ok(()));
    let checksummer = checksummer();
    let (sink, sent) = recording_sink();

    let collaborators = Collaborators {
        backup_tool: &tool,
        store: &store,
        checksummer: &checksummer,
        monitor: Monitor::new(Some(&sink)),
    };
    let report = run_pipeline(
        RunMode::BackupAndUpload,
        &section_for(dir.path()),
        &UploadTarget::new("tableau-backups", ""),
        &collaborators,
    )
    .await
    .expect("pipeline should run");

    assert!(report.is_success());
    let backup = report.backup.as_ref().expect("backup step should run");
    assert_eq!(backup.result_code, 0);
    assert_eq!(backup.exit_code, 0);
    assert_eq!(report.upload.files.len(), 1);

    let sent = sent.lock().unwrap().clone();
    let keys_sent: Vec<&str> = sent.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(
        keys_sent,
        vec![
            keys::HEARTBEAT,
            keys::TSM_BACKUP_DURATION,
            keys::TSM_BACKUP_RESULT_CODE,
            keys::TSM_EXIT_CODE,
            keys::BACKUP_FILE_SIZE,
            keys::UPLOAD_RESULT_CODE,
            keys::UPLOAD_DURATION,
        ]
    );
}

#[tokio::test]
async fn failed_backup_still_uploads_existing_artifacts() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("old.tsbak"), b"left over").unwrap();

    let mut tool = MockBackupTool::new();
    tool.expect_run_backup().times(1).returning(|_| {
        Ok(BackupToolOutput {
            exit_code: 1,
            stdout: "Job failed".into(),
            stderr: "Resource Manager: out of disk".into(),
        })
    });
    let mut store = MockObjectStore::new();
    store
        .expect_verify_credentials()
        .returning(|| Ok("identity".to_string()));
    store.expect_upload_file().times(1).returning(|_, _, _| Ok(()));
    store.expect_put_object().times(1).returning(|_, _, _| Ok(()));
    let checksummer = checksummer();
    let (sink, sent) = recording_sink();

    let collaborators = Collaborators {
        backup_tool: &tool,
        store: &store,
        checksummer: &checksummer,
        monitor: Monitor::new(Some(&sink)),
    };
    let report = run_pipeline(
        RunMode::BackupAndUpload,
        &section_for(dir.path()),
        &UploadTarget::new("tableau-backups", ""),
        &collaborators,
    )
    .await
    .unwrap();

    assert!(!report.is_success());
    assert_eq!(report.backup.as_ref().unwrap().result_code, 1);
    assert!(!dir.path().join("old.tsbak").exists());

    let sent = sent.lock().unwrap().clone();
    assert!(
        !sent.iter().any(|(k, _)| k == keys::TSM_BACKUP_DURATION),
        "duration is only reported for successful backups"
    );
    assert!(sent.contains(&(keys::TSM_BACKUP_RESULT_CODE.to_string(), 1)));
    assert!(sent.contains(&(keys::TSM_EXIT_CODE.to_string(), 1)));
}

#[tokio::test]
async fn backup_tool_launch_failure_is_reported_as_exit_code_minus_one() {
    let dir = tempdir().unwrap();

    let mut tool = MockBackupTool::new();
    tool.expect_run_backup()
        .returning(|_| Err("sh: not found".into()));
    let mut store = MockObjectStore::new();
    store
        .expect_verify_credentials()
        .returning(|| Ok("identity".to_string()));
    let checksummer = MockChecksummer::new();

    let collaborators = Collaborators {
        backup_tool: &tool,
        store: &store,
        checksummer: &checksummer,
        monitor: Monitor::disabled(),
    };
    let report = run_pipeline(
        RunMode::BackupAndUpload,
        &section_for(dir.path()),
        &UploadTarget::new("tableau-backups", ""),
        &collaborators,
    )
    .await
    .unwrap();

    let backup = report.backup.unwrap();
    assert_eq!(backup.exit_code, -1);
    assert_eq!(backup.result_code, 1);
    assert!(backup.stderr.contains("sh: not found"));
    assert!(report.upload.files.is_empty());
}

#[tokio::test]
async fn upload_only_skips_the_backup_tool() {
    let dir = tempdir().unwrap();

    let mut tool = MockBackupTool::new();
    tool.expect_run_backup().never();
    let mut store = MockObjectStore::new();
    store
        .expect_verify_credentials()
        .returning(|| Ok("identity".to_string()));
    let checksummer = MockChecksummer::new();
    let (sink, sent) = recording_sink();

    let collaborators = Collaborators {
        backup_tool: &tool,
        store: &store,
        checksummer: &checksummer,
        monitor: Monitor::new(Some(&sink)),
    };
    let report = run_pipeline(
        RunMode::UploadOnly,
        &section_for(dir.path()),
        &UploadTarget::new("tableau-backups", ""),
        &collaborators,
    )
    .await
    .unwrap();

    assert!(report.backup.is_none());
    assert!(report.is_success());
    assert!(sent.lock().unwrap().is_empty(), "no heartbeat without a backup");
}

#[tokio::test]
async fn rejected_credentials_abort_before_touching_files() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("a.tsbak"), b"data").unwrap();

    let tool = successful_tool();
    let mut store = MockObjectStore::new();
    store
        .expect_verify_credentials()
        .returning(|| Err("InvalidClientTokenId".into()));
    store.expect_upload_file().never();
    let checksummer = MockChecksummer::new();

    let collaborators = Collaborators {
        backup_tool: &tool,
        store: &store,
        checksummer: &checksummer,
        monitor: Monitor::disabled(),
    };
    let err = run_pipeline(
        RunMode::BackupAndUpload,
        &section_for(dir.path()),
        &UploadTarget::new("tableau-backups", ""),
        &collaborators,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, PipelineError::Credentials(_)), "got {err:?}");
    assert!(dir.path().join("a.tsbak").exists());
}

#[tokio::test]
async fn missing_backup_dir_is_fatal() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("missing");

    let tool = MockBackupTool::new();
    let mut store = MockObjectStore::new();
    store
        .expect_verify_credentials()
        .returning(|| Ok("identity".to_string()));
    let checksummer = MockChecksummer::new();

    let collaborators = Collaborators {
        backup_tool: &tool,
        store: &store,
        checksummer: &checksummer,
        monitor: Monitor::disabled(),
    };
    let err = run_pipeline(
        RunMode::UploadOnly,
        &section_for(&missing),
        &UploadTarget::new("tableau-backups", ""),
        &collaborators,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, PipelineError::Upload(_)), "got {err:?}");
    assert!(err.to_string().contains("failed to scan backup directory"));
}
