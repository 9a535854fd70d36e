//! Monitoring: metric keys, the fire-and-forget [`Monitor`] wrapper and the
//! `zabbix_sender` backed [`MetricSink`].

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::ZabbixSection;
use crate::contract::{MetricSink, SinkError};
use crate::process::run_captured;

/// Item keys reported to the monitoring system.
pub mod keys {
    pub const HEARTBEAT: &str = "full-backup2s3.heartbeat";
    pub const TSM_BACKUP_DURATION: &str = "full-backup2s3.tsm.backup_duration";
    pub const TSM_BACKUP_RESULT_CODE: &str = "full-backup2s3.tsm.backup_result_code";
    pub const TSM_EXIT_CODE: &str = "full-backup2s3.tsm.exit_code";
    pub const BACKUP_FILE_SIZE: &str = "full-backup2s3.backup_file_size";
    pub const UPLOAD_RESULT_CODE: &str = "full-backup2s3.upload_result_code";
    pub const UPLOAD_DURATION: &str = "full-backup2s3.upload_duration";
}

/// Optional metric sink. Sends are no-ops without a sink, and sink failures are
/// logged and swallowed.
#[derive(Clone, Copy)]
pub struct Monitor<'a> {
    sink: Option<&'a dyn MetricSink>,
}

impl<'a> Monitor<'a> {
    pub fn new(sink: Option<&'a dyn MetricSink>) -> Self {
        Self { sink }
    }

    pub fn disabled() -> Self {
        Self { sink: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    pub async fn send(&self, key: &str, value: i64) {
        let Some(sink) = self.sink else {
            return;
        };
        info!(key, value, "Send to monitoring");
        if let Err(e) = sink.send(key, value).await {
            warn!(key, value, error = %e, "Failed to send metric");
        }
    }
}

/// Sends metrics by invoking `zabbix_sender` once per value.
#[derive(Debug, Clone)]
pub struct ZabbixSender {
    sender: String,
    config_file: PathBuf,
    host: String,
}

impl ZabbixSender {
    pub fn new(sender: impl Into<String>, config_file: impl Into<PathBuf>, host: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            config_file: config_file.into(),
            host: host.into(),
        }
    }

    /// Builds a sender from the config section, resolving the hostname when it is not set.
    pub fn from_section(section: &ZabbixSection) -> std::io::Result<Self> {
        let host = match &section.host {
            Some(host) => host.clone(),
            None => local_hostname()?,
        };
        Ok(Self::new(
            section.sender.clone(),
            section.config_file.clone(),
            host,
        ))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn args(&self, key: &str, value: i64) -> Vec<String> {
        vec![
            "-c".to_string(),
            self.config_file.to_string_lossy().into_owned(),
            "-s".to_string(),
            self.host.clone(),
            "-k".to_string(),
            key.to_string(),
            "-o".to_string(),
            value.to_string(),
        ]
    }
}

#[async_trait]
impl MetricSink for ZabbixSender {
    async fn send(&self, key: &str, value: i64) -> Result<(), SinkError> {
        let args = self.args(key, value);
        debug!(sender = %self.sender, args = %args.join(" "), "Running metric sender");
        let mut command = Command::new(&self.sender);
        command.args(&args);
        run_captured(command).await?.into_result(&self.sender)?;
        Ok(())
    }
}

/// Hostname of this machine as reported by the OS.
pub fn local_hostname() -> std::io::Result<String> {
    #[cfg(unix)]
    {
        let mut buf = vec![0u8; 256];
        let result =
            unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
        if result != 0 {
            return Err(std::io::Error::last_os_error());
        }
        let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        buf.truncate(len);
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    #[cfg(not(unix))]
    {
        Ok(std::env::var("COMPUTERNAME").unwrap_or_else(|_| "localhost".to_string()))
    }
}
