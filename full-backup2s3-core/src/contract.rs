//! # contract: trait seams between the backup job and the outside world
//!
//! Every external collaborator of the job sits behind one of the traits in this
//! module:
//!
//! - [`BackupTool`]: the server's backup command (`tsm maintenance backup`).
//! - [`Checksummer`]: the checksum utility run against each artifact.
//! - [`ObjectStore`]: the remote bucket the artifacts are uploaded to.
//! - [`MetricSink`]: the monitoring agent that receives key/value metrics.
//!
//! Real implementations live in [`crate::backup`], [`crate::checksum`],
//! [`crate::monitoring`] and (for the AWS SDK client) the CLI crate.
//!
//! ## Mocking & Testing
//! - The traits are annotated for `mockall`, so tests can build deterministic
//!   mocks (`MockBackupTool`, `MockObjectStore`, ...) with the
//!   `test-export-mocks` feature (on by default).
//!
//! ## Errors
//! - All methods return boxed trait-object errors so that SDK errors, subprocess
//!   errors and mock errors share one contract.

use async_trait::async_trait;
use std::path::Path;

use mockall::automock;

/// Error returned by a [`BackupTool`].
pub type ToolError = Box<dyn std::error::Error + Send + Sync>;

/// Error returned by a [`Checksummer`].
pub type ChecksumError = Box<dyn std::error::Error + Send + Sync>;

/// Error returned by an [`ObjectStore`].
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// Error returned by a [`MetricSink`].
pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// What to ask the backup tool for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRequest {
    /// File name handed to the tool, timestamp suffix already applied.
    pub backup_file: String,
    /// Ask the tool to run its multi-threaded backup mode.
    pub multithreaded: bool,
}

/// Raw result of one backup tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BackupToolOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

/// Trait for triggering a server backup.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait BackupTool: Send + Sync {
    /// Run one backup to completion and return its exit code and captured output.
    ///
    /// A non-zero exit code is *not* an error here; errors are reserved for
    /// failing to run the tool at all.
    async fn run_backup(&self, request: &BackupRequest) -> Result<BackupToolOutput, ToolError>;
}

/// Trait for computing the checksum text stored next to each uploaded artifact.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Checksummer: Send + Sync {
    /// Compute the checksum line for the file at `path`.
    async fn checksum(&self, path: &Path) -> Result<String, ChecksumError>;
}

/// Trait for the remote object store.
/// The implementor owns credentials, region and transport details.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Check that the configured credentials are accepted by the provider.
    /// Returns a human-readable identity (for logging).
    async fn verify_credentials(&self) -> Result<String, StoreError>;

    /// Upload a local file to `bucket` under `key`.
    async fn upload_file(&self, bucket: &str, key: &str, path: &Path) -> Result<(), StoreError>;

    /// Store a small text blob in `bucket` under `key`.
    async fn put_object(&self, bucket: &str, key: &str, body: &str) -> Result<(), StoreError>;
}

/// Trait for a monitoring sink receiving integer metrics.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait MetricSink: Send + Sync {
    async fn send(&self, key: &str, value: i64) -> Result<(), SinkError>;
}
