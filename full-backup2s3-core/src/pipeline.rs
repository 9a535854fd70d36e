//! High-level pipeline: orchestrates backup -> upload for one scheduled run.
//!
//! # Major Types
//! - [`RunMode`]: whether the backup tool is triggered before the upload pass
//! - [`RunReport`]: what happened, for printing and for the process exit code
//!
//! # Responsibilities
//! - Runs the backup step (when asked) and always continues with the upload pass
//! - Verifies object store credentials once before touching any artifact
//! - Each collaborator call is awaited before the next one starts
//!
//! # Error Handling
//! Backup and per-file failures are recorded in the report, not returned. Only
//! rejected credentials and an unreadable backup directory end the run early.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::backup::{run_backup, BackupReport};
use crate::config::BackupSection;
use crate::contract::{BackupTool, Checksummer, ObjectStore, StoreError};
use crate::monitoring::Monitor;
use crate::upload::{upload_all, UploadError, UploadReport, UploadTarget};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunMode {
    /// Trigger a backup, then upload whatever is in the backup directory.
    BackupAndUpload,
    /// Only upload what is already in the backup directory.
    UploadOnly,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub mode: RunMode,
    pub backup: Option<BackupReport>,
    pub upload: UploadReport,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.backup.as_ref().map_or(true, BackupReport::succeeded) && self.upload.all_succeeded()
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("object store rejected credentials: {0}")]
    Credentials(StoreError),
    #[error(transparent)]
    Upload(#[from] UploadError),
}

/// Everything the pipeline talks to.
pub struct Collaborators<'a, B: ?Sized, S: ?Sized, C: ?Sized> {
    pub backup_tool: &'a B,
    pub store: &'a S,
    pub checksummer: &'a C,
    pub monitor: Monitor<'a>,
}

pub async fn run_pipeline<B, S, C>(
    mode: RunMode,
    section: &BackupSection,
    target: &UploadTarget,
    collaborators: &Collaborators<'_, B, S, C>,
) -> Result<RunReport, PipelineError>
where
    B: BackupTool + ?Sized,
    S: ObjectStore + ?Sized,
    C: Checksummer + ?Sized,
{
    info!(mode = ?mode, "[PIPELINE] Starting run");

    let backup = match mode {
        RunMode::BackupAndUpload => Some(
            run_backup(section, collaborators.backup_tool, &collaborators.monitor).await,
        ),
        RunMode::UploadOnly => None,
    };

    match collaborators.store.verify_credentials().await {
        Ok(identity) => info!(identity = %identity, "[PIPELINE] Object store credentials accepted"),
        Err(e) => {
            error!(error = %e, "[PIPELINE][ERROR] Object store credential check failed");
            return Err(PipelineError::Credentials(e));
        }
    }

    let upload = upload_all(
        section,
        target,
        collaborators.store,
        collaborators.checksummer,
        &collaborators.monitor,
    )
    .await?;

    let report = RunReport {
        mode,
        backup,
        upload,
    };
    match serde_json::to_string_pretty(&report) {
        Ok(json) => debug!(json = %json, "[PIPELINE] Run report"),
        Err(e) => error!(error = ?e, "[PIPELINE] Failed to serialize run report"),
    }
    info!(success = report.is_success(), "End");

    Ok(report)
}
