use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

use crate::contract::{ChecksumError, Checksummer};
use crate::process::run_captured;

/// Computes checksums with an external utility (`md5sum` by default).
///
/// The utility runs inside the file's directory with the bare file name, so the
/// captured line reads `<digest>  <file name>` and can be verified in place
/// after download.
#[derive(Debug, Clone)]
pub struct CommandChecksummer {
    program: String,
}

impl CommandChecksummer {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Checksummer for CommandChecksummer {
    async fn checksum(&self, path: &Path) -> Result<String, ChecksumError> {
        let file_name = path
            .file_name()
            .ok_or_else(|| format!("{} has no file name", path.display()))?;
        info!(file = %path.display(), program = %self.program, "Start calculate checksum");

        let mut command = Command::new(&self.program);
        command.arg(file_name);
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            command.current_dir(dir);
        }

        let output = run_captured(command).await?.into_result(&self.program)?;
        let checksum = output.stdout.trim().to_string();
        debug!(file = %path.display(), checksum = %checksum, "Checksum computed");
        Ok(checksum)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn md5sum_reports_digest_and_bare_file_name() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.tsbak");
        std::fs::write(&path, b"").unwrap();

        let checksum = CommandChecksummer::new("md5sum")
            .checksum(&path)
            .await
            .expect("md5sum should succeed");
        assert_eq!(checksum, "d41d8cd98f00b204e9800998ecf8427e  empty.tsbak");
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.tsbak");

        let result = CommandChecksummer::new("md5sum").checksum(&path).await;
        assert!(result.is_err());
    }
}
