use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

/// The `backup` section: what the backup tool writes and where artifacts are picked up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSection {
    /// Base name passed to `tsm maintenance backup --file`.
    pub backup_file: String,
    /// Directory scanned for finished artifacts.
    pub backup_dir: PathBuf,
    #[serde(default)]
    pub append_timestamp: bool,
    #[serde(default)]
    pub multithreaded: bool,
    /// Only files ending with this suffix are uploaded.
    #[serde(default = "default_extension")]
    pub extension: String,
    #[serde(default = "default_tsm_command")]
    pub tsm_command: String,
    /// Sourced before running the backup tool so `tsm` is on `PATH`.
    #[serde(default = "default_profile_script")]
    pub profile_script: Option<PathBuf>,
    #[serde(default = "default_checksum_command")]
    pub checksum_command: String,
}

/// The optional `zabbix` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZabbixSection {
    /// Agent configuration file handed to `zabbix_sender -c`.
    pub config_file: PathBuf,
    #[serde(default = "default_sender")]
    pub sender: String,
    /// Host the metrics are reported for; defaults to the machine hostname.
    #[serde(default)]
    pub host: Option<String>,
}

fn default_extension() -> String {
    ".tsbak".to_string()
}

fn default_tsm_command() -> String {
    "tsm".to_string()
}

fn default_profile_script() -> Option<PathBuf> {
    Some(PathBuf::from("/etc/profile.d/tableau_server.sh"))
}

fn default_checksum_command() -> String {
    "md5sum".to_string()
}

fn default_sender() -> String {
    "zabbix_sender".to_string()
}

impl BackupSection {
    pub fn trace_loaded(&self) {
        info!(
            backup_file = %self.backup_file,
            backup_dir = %self.backup_dir.display(),
            append_timestamp = self.append_timestamp,
            multithreaded = self.multithreaded,
            extension = %self.extension,
            "Loaded backup section"
        );
        debug!(section = ?self, "Backup section loaded (full debug)");
    }
}

impl ZabbixSection {
    pub fn trace_loaded(&self) {
        info!(
            config_file = %self.config_file.display(),
            sender = %self.sender,
            host = self.host.as_deref().unwrap_or("<hostname>"),
            "Loaded zabbix section"
        );
    }
}
