//! Upload pass: scan the backup directory, push every artifact and its checksum
//! to the object store, and remove the local copy once the upload succeeded.
//!
//! # Responsibilities
//! - Pick up finished artifacts (regular files with the configured extension)
//! - Per artifact: checksum -> upload file -> upload `<name>.md5sum.txt`
//! - Remove the local file only after all three calls succeeded
//! - Report size, result code and duration for each file
//!
//! # Error Handling
//! A failing artifact is logged, left in place for the next run and recorded
//! with result code 1; the remaining artifacts are still processed. Only failing
//! to read the backup directory aborts the pass.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::BackupSection;
use crate::contract::{Checksummer, ObjectStore, StoreError};
use crate::monitoring::{keys, Monitor};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Where artifacts are uploaded to.
#[derive(Debug, Clone)]
pub struct UploadTarget {
    pub bucket: String,
    /// Prepended verbatim to every object key.
    pub key_prefix: String,
}

impl UploadTarget {
    pub fn new(bucket: impl Into<String>, key_prefix: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key_prefix: key_prefix.into(),
        }
    }

    pub fn object_key(&self, file_name: &str) -> String {
        format!("{}{}", self.key_prefix, file_name)
    }

    pub fn checksum_key(&self, file_name: &str) -> String {
        format!("{}{}.md5sum.txt", self.key_prefix, file_name)
    }
}

/// A finished backup file waiting for upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupArtifact {
    pub path: PathBuf,
    pub file_name: String,
    pub size: u64,
}

impl BackupArtifact {
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = tokio::fs::metadata(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("{} has no file name", path.display()),
                )
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            file_name,
            size: metadata.len(),
        })
    }

    pub fn size_mb(&self) -> u64 {
        self.size / BYTES_PER_MB
    }
}

/// Per-file outcome of the upload pass.
#[derive(Debug, Clone, Serialize)]
pub struct FileUploadReport {
    pub file_name: String,
    pub size: u64,
    pub checksum: Option<String>,
    /// 0 on success, 1 otherwise.
    pub result_code: i64,
    pub duration_secs: u64,
    pub removed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadReport {
    pub bucket: String,
    pub files: Vec<FileUploadReport>,
}

impl UploadReport {
    pub fn all_succeeded(&self) -> bool {
        self.files.iter().all(|file| file.result_code == 0)
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("failed to scan backup directory {}: {source}", .dir.display())]
    Scan {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Lists regular files in `dir` whose names end with `extension`, sorted by name.
pub async fn scan_backup_dir(dir: &Path, extension: &str) -> std::io::Result<Vec<BackupArtifact>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut artifacts = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if !file_name.ends_with(extension) {
            continue;
        }
        let path = entry.path();
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(error = %e, path = %path.display(), "Skipping unreadable entry");
                continue;
            }
        };
        if !metadata.is_file() {
            debug!(path = %path.display(), "Skipping non-file entry");
            continue;
        }
        artifacts.push(BackupArtifact {
            path,
            file_name,
            size: metadata.len(),
        });
    }

    artifacts.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(artifacts)
}

/// Uploads one artifact and its checksum object. Returns the checksum text.
pub async fn upload_artifact<S, C>(
    artifact: &BackupArtifact,
    target: &UploadTarget,
    store: &S,
    checksummer: &C,
) -> Result<String, StoreError>
where
    S: ObjectStore + ?Sized,
    C: Checksummer + ?Sized,
{
    let checksum = checksummer.checksum(&artifact.path).await?;
    info!(file = %artifact.file_name, checksum = %checksum, "[UPLOAD] Checksum computed");

    let key = target.object_key(&artifact.file_name);
    info!(file = %artifact.path.display(), bucket = %target.bucket, key = %key, "[UPLOAD] Start upload");
    store
        .upload_file(&target.bucket, &key, &artifact.path)
        .await?;
    debug!(file = %artifact.path.display(), "[UPLOAD] End upload");

    let checksum_key = target.checksum_key(&artifact.file_name);
    info!(key = %checksum_key, bucket = %target.bucket, "[UPLOAD] Uploading checksum");
    store
        .put_object(&target.bucket, &checksum_key, &format!("{checksum}\n"))
        .await?;

    Ok(checksum)
}

/// Uploads every artifact found in the backup directory.
pub async fn upload_all<S, C>(
    section: &BackupSection,
    target: &UploadTarget,
    store: &S,
    checksummer: &C,
    monitor: &Monitor<'_>,
) -> Result<UploadReport, UploadError>
where
    S: ObjectStore + ?Sized,
    C: Checksummer + ?Sized,
{
    info!("Starting upload");
    let artifacts = scan_backup_dir(&section.backup_dir, &section.extension)
        .await
        .map_err(|source| UploadError::Scan {
            dir: section.backup_dir.clone(),
            source,
        })?;
    info!(
        count = artifacts.len(),
        backup_dir = %section.backup_dir.display(),
        "[UPLOAD] Found backup artifacts"
    );

    let mut files = Vec::with_capacity(artifacts.len());
    for artifact in &artifacts {
        info!(
            file = %artifact.file_name,
            size_mb = artifact.size_mb(),
            bucket = %target.bucket,
            "[UPLOAD] Uploading file"
        );

        let mut report = FileUploadReport {
            file_name: artifact.file_name.clone(),
            size: artifact.size,
            checksum: None,
            result_code: 0,
            duration_secs: 0,
            removed: false,
        };

        let started = Instant::now();
        match upload_artifact(artifact, target, store, checksummer).await {
            Ok(checksum) => {
                report.checksum = Some(checksum);
                report.duration_secs = started.elapsed().as_secs();
                info!(path = %artifact.path.display(), "[UPLOAD] Remove");
                match tokio::fs::remove_file(&artifact.path).await {
                    Ok(()) => report.removed = true,
                    Err(e) => {
                        error!(
                            error = %e,
                            path = %artifact.path.display(),
                            "[UPLOAD][ERROR] Uploaded file could not be removed"
                        );
                    }
                }
            }
            Err(e) => {
                error!(
                    error = %e,
                    file = %artifact.file_name,
                    "[UPLOAD][ERROR] Upload failed, keeping local file"
                );
                report.result_code = 1;
            }
        }

        if report.result_code == 0 {
            monitor
                .send(keys::BACKUP_FILE_SIZE, artifact.size as i64)
                .await;
            monitor
                .send(keys::UPLOAD_RESULT_CODE, report.result_code)
                .await;
            monitor
                .send(keys::UPLOAD_DURATION, report.duration_secs as i64)
                .await;
        }

        files.push(report);
    }

    Ok(UploadReport {
        bucket: target.bucket.clone(),
        files,
    })
}
