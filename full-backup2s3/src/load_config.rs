/// `load_config` module: loads the YAML config file and injects credentials from the environment.
///
/// This module is the only place where the user-supplied file is parsed and mapped to
/// strongly-typed sections. Every failure here is fatal for the run.
///
/// # Sections
/// - `backup` (required): see [`BackupSection`]
/// - `aws` (required): see [`AwsSection`]; `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`
///   fill in keys that are missing from the file
/// - `zabbix` (optional): metrics are only sent when present
/// - `logging` (optional): enables the rotating log file
///
/// # Errors
/// All errors use `anyhow::Error` and are surfaced at the CLI boundary.
use anyhow::{bail, Result};
use full_backup2s3_core::config::{BackupSection, ZabbixSection};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::logging::LoggingSection;
use crate::upload::AwsSection;

/// Name of the config file looked up next to the executable.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Deserialize)]
pub struct CliConfig {
    pub backup: BackupSection,
    pub aws: AwsSection,
    #[serde(default)]
    pub zabbix: Option<ZabbixSection>,
    #[serde(default)]
    pub logging: Option<LoggingSection>,
}

impl CliConfig {
    pub fn trace_loaded(&self) {
        self.backup.trace_loaded();
        self.aws.trace_loaded();
        match &self.zabbix {
            Some(zabbix) => zabbix.trace_loaded(),
            None => info!("No zabbix section, metrics are disabled"),
        }
    }
}

/// `config.yaml` in the directory of the running executable.
pub fn default_config_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(DEFAULT_CONFIG_FILE)))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

fn env_fallback(value: &mut Option<String>, var: &str) {
    if value.is_none() {
        if let Ok(from_env) = std::env::var(var) {
            info!(var, "Using credential from environment");
            *value = Some(from_env);
        }
    }
}

/// Loads the YAML config file and fills missing credentials from the environment.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Reading config file");

    if !path_ref.is_file() {
        error!(config_path = ?path_ref, "Config file not found");
        bail!("Config file not found: {}", path_ref.display());
    }

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {}: {}",
                path_ref.display(),
                e
            ));
        }
    };

    let mut config: CliConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!(
                "Failed to parse config YAML {}: {e}",
                path_ref.display()
            ));
        }
    };

    env_fallback(&mut config.aws.aws_access_key_id, "AWS_ACCESS_KEY_ID");
    env_fallback(&mut config.aws.aws_secret_access_key, "AWS_SECRET_ACCESS_KEY");
    if config.aws.aws_access_key_id.is_none() || config.aws.aws_secret_access_key.is_none() {
        error!("AWS credentials missing from config and environment");
        bail!(
            "aws.aws_access_key_id and aws.aws_secret_access_key must be set in {} or via AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY",
            path_ref.display()
        );
    }

    Ok(config)
}
