//! Subprocess helper shared by the backup tool, checksum utility and monitoring sink.

use serde::Serialize;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Captured result of a finished subprocess.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct CommandOutput {
    /// Exit code, or `-1` when the process was terminated by a signal.
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to launch `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{program}` exited with code {exit_code}: {output}")]
    Failed {
        program: String,
        exit_code: i64,
        output: String,
    },
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turns a non-zero exit into [`CommandError::Failed`].
    pub fn into_result(self, program: &str) -> Result<CommandOutput, CommandError> {
        if self.success() {
            return Ok(self);
        }
        let output = if self.stderr.trim().is_empty() {
            self.stdout.trim().to_string()
        } else {
            self.stderr.trim().to_string()
        };
        Err(CommandError::Failed {
            program: program.to_string(),
            exit_code: self.exit_code,
            output,
        })
    }
}

/// Runs `command` to completion, capturing stdout and stderr as text.
pub async fn run_captured(mut command: Command) -> Result<CommandOutput, CommandError> {
    let program = command
        .as_std()
        .get_program()
        .to_string_lossy()
        .into_owned();
    debug!(command = ?command.as_std(), "Running subprocess");

    let output = command
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| CommandError::Spawn {
            program: program.clone(),
            source,
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    for line in stdout.lines() {
        debug!(program = %program, "{}", line.trim_end());
    }

    let exit_code = output.status.code().map(i64::from).unwrap_or(-1);
    debug!(program = %program, exit_code, "Subprocess finished");

    Ok(CommandOutput {
        exit_code,
        stdout,
        stderr,
    })
}
