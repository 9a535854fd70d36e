//! Backup step: trigger `tsm maintenance backup`, judge the outcome and report it.
//!
//! The step never fails as a whole. Whatever the tool does, a [`BackupReport`] is
//! produced, the result metrics are sent, and the caller moves on to the upload
//! pass.

use async_trait::async_trait;
use chrono::Local;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::config::BackupSection;
use crate::contract::{BackupRequest, BackupTool, BackupToolOutput, ToolError};
use crate::monitoring::{keys, Monitor};
use crate::process::run_captured;

/// Printed by `tsm` once the backup file has been written.
pub const SUCCESS_MARKER: &str = "Backup written to ";

/// Outcome of one backup step.
#[derive(Debug, Clone, Serialize)]
pub struct BackupReport {
    pub backup_file: String,
    pub exit_code: i64,
    /// 0 on success, 1 otherwise.
    pub result_code: i64,
    pub duration_secs: u64,
    pub stdout: String,
    pub stderr: String,
}

impl BackupReport {
    pub fn succeeded(&self) -> bool {
        self.result_code == 0
    }
}

/// Local-time suffix appended to the backup file name.
pub fn timestamp_suffix() -> String {
    Local::now().format("%Y%m%d-%H%M%S").to_string()
}

pub fn backup_file_name(section: &BackupSection, timestamp: &str) -> String {
    if section.append_timestamp {
        format!("{}_{}", section.backup_file, timestamp)
    } else {
        section.backup_file.clone()
    }
}

/// A backup counts as successful only if the tool exited cleanly and reported the written file.
pub fn result_code(output: &BackupToolOutput) -> i64 {
    if output.exit_code == 0 && output.stdout.contains(SUCCESS_MARKER) {
        0
    } else {
        1
    }
}

/// Runs `tsm maintenance backup` through `sh -c`, sourcing the Tableau profile first.
#[derive(Debug, Clone)]
pub struct TsmBackupTool {
    tsm_command: String,
    profile_script: Option<PathBuf>,
}

impl TsmBackupTool {
    pub fn new(tsm_command: impl Into<String>, profile_script: Option<PathBuf>) -> Self {
        Self {
            tsm_command: tsm_command.into(),
            profile_script,
        }
    }

    pub fn from_section(section: &BackupSection) -> Self {
        Self::new(section.tsm_command.clone(), section.profile_script.clone())
    }

    pub fn shell_command(&self, request: &BackupRequest) -> String {
        let mut script = String::new();
        if let Some(profile) = &self.profile_script {
            script.push_str(&format!(". {}; ", profile.display()));
        }
        script.push_str(&format!(
            "{} maintenance backup --ignore-prompt --file {}",
            self.tsm_command, request.backup_file
        ));
        if request.multithreaded {
            script.push_str(" --multithreaded");
        }
        script
    }
}

#[async_trait]
impl BackupTool for TsmBackupTool {
    async fn run_backup(&self, request: &BackupRequest) -> Result<BackupToolOutput, ToolError> {
        let script = self.shell_command(request);
        debug!(command = %script, "[BACKUP] Running backup tool");
        let mut command = Command::new("sh");
        command.arg("-c").arg(&script);
        let output = run_captured(command).await?;
        Ok(BackupToolOutput {
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

/// Runs the backup step and reports heartbeat, duration, result code and exit code.
pub async fn run_backup<T>(section: &BackupSection, tool: &T, monitor: &Monitor<'_>) -> BackupReport
where
    T: BackupTool + ?Sized,
{
    monitor.send(keys::HEARTBEAT, 1).await;

    info!("Starting backup");
    let request = BackupRequest {
        backup_file: backup_file_name(section, &timestamp_suffix()),
        multithreaded: section.multithreaded,
    };
    info!(
        backup_file = %request.backup_file,
        multithreaded = request.multithreaded,
        "[BACKUP] Invoking backup tool"
    );

    let started = Instant::now();
    let output = match tool.run_backup(&request).await {
        Ok(output) => output,
        Err(e) => {
            error!(error = %e, "[BACKUP][ERROR] Failed to run backup tool");
            BackupToolOutput {
                exit_code: -1,
                stdout: String::new(),
                stderr: e.to_string(),
            }
        }
    };
    let duration_secs = started.elapsed().as_secs();
    let result_code = result_code(&output);

    debug!(
        stdout = %output.stdout,
        stderr = %output.stderr,
        exit_code = output.exit_code,
        "[BACKUP] Backup tool output"
    );
    info!(duration_secs, result_code, "[BACKUP] Backup finished");

    if result_code == 0 {
        monitor
            .send(keys::TSM_BACKUP_DURATION, duration_secs as i64)
            .await;
    }
    monitor.send(keys::TSM_BACKUP_RESULT_CODE, result_code).await;
    monitor.send(keys::TSM_EXIT_CODE, output.exit_code).await;

    if result_code != 0 {
        error!(
            exit_code = output.exit_code,
            "[BACKUP][ERROR] Backup did not complete:\n{}{}", output.stdout, output.stderr
        );
    }

    BackupReport {
        backup_file: request.backup_file,
        exit_code: output.exit_code,
        result_code,
        duration_secs,
        stdout: output.stdout,
        stderr: output.stderr,
    }
}
