//! CLI interface for full-backup2s3: argument parsing and wiring of the real
//! collaborators into the core pipeline.
//!
//! All backup/upload logic lives in `full-backup2s3-core`; this module only
//! loads the config, sets up logging, builds the clients and prints the report.
use crate::load_config::{default_config_path, load_config};
use crate::logging;
use crate::upload::S3Store;
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use full_backup2s3_core::backup::TsmBackupTool;
use full_backup2s3_core::checksum::CommandChecksummer;
use full_backup2s3_core::contract::{MetricSink, ObjectStore};
use full_backup2s3_core::monitoring::{Monitor, ZabbixSender};
use full_backup2s3_core::pipeline::{run_pipeline, Collaborators, RunMode};
use full_backup2s3_core::upload::{upload_artifact, BackupArtifact, UploadTarget};
use std::path::{Path, PathBuf};

/// CLI for full-backup2s3: back up Tableau Server, ship the backups to S3, report to Zabbix.
#[derive(Parser)]
#[clap(
    name = "full-backup2s3",
    version,
    about = "Start \"tsm maintenance backup\", upload backups to S3 and send results to Zabbix",
    arg_required_else_help = true
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// More logs
    #[clap(short, long, global = true)]
    pub debug: bool,

    /// Path to the YAML config file (default: config.yaml next to the executable)
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run "tsm maintenance backup" and after completion start the "upload" command
    Backup,
    /// Upload all backup files in the backup folder to S3 and then remove them
    Upload,
    /// Upload a single file and its checksum to S3, keeping the local copy
    UploadFile {
        /// File to upload
        #[clap(short, long)]
        file: PathBuf,
    },
}

/// Runs one invocation. `Ok(false)` means the run completed but something failed.
pub async fn run(cli: Cli) -> Result<bool> {
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = tracing::subscriber::with_default(logging::console_subscriber(cli.debug), || {
        load_config(&config_path)
    })?;

    let base_dir = config_path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    logging::init(cli.debug, config.logging.as_ref(), base_dir)?;
    tracing::info!(config = %config_path.display(), "trace_initialised");
    config.trace_loaded();

    let sender = match &config.zabbix {
        Some(section) => Some(
            ZabbixSender::from_section(section).context("Failed to resolve hostname for zabbix")?,
        ),
        None => None,
    };
    let monitor = Monitor::new(sender.as_ref().map(|s| s as &dyn MetricSink));

    let target = UploadTarget::new(config.aws.bucket_name.clone(), config.aws.key_prefix.clone());
    let checksummer = CommandChecksummer::new(config.backup.checksum_command.clone());
    let store = S3Store::connect(&config.aws).await?;

    let mode = match cli.command {
        Commands::Backup => RunMode::BackupAndUpload,
        Commands::Upload => RunMode::UploadOnly,
        Commands::UploadFile { file } => {
            return upload_single(&file, &target, &store, &checksummer).await;
        }
    };

    let backup_tool = TsmBackupTool::from_section(&config.backup);
    let collaborators = Collaborators {
        backup_tool: &backup_tool,
        store: &store,
        checksummer: &checksummer,
        monitor,
    };
    let report = run_pipeline(mode, &config.backup, &target, &collaborators).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.is_success() {
        tracing::error!(command = ?mode, "Run finished with failures");
    }
    Ok(report.is_success())
}

/// Uploads one file and its checksum object, keeping the local copy.
async fn upload_single(
    file: &Path,
    target: &UploadTarget,
    store: &S3Store,
    checksummer: &CommandChecksummer,
) -> Result<bool> {
    store
        .verify_credentials()
        .await
        .map_err(|e| anyhow!("Object store rejected credentials: {e}"))?;
    let artifact = BackupArtifact::from_path(file)
        .await
        .with_context(|| format!("Cannot read {}", file.display()))?;
    let checksum = upload_artifact(&artifact, target, store, checksummer)
        .await
        .map_err(|e| anyhow!("Upload of {} failed: {e}", file.display()))?;
    tracing::info!(file = %file.display(), checksum = %checksum, "Single file uploaded");
    println!("{checksum}");
    Ok(true)
}
