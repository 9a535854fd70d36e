//! Tracing setup: a console layer on stdout and, when the `logging` section is
//! present, a rotating log file.

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::Filtered;
use tracing_subscriber::fmt::format;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

/// The optional `logging` section.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    /// Log file; relative paths are resolved against the config file's directory.
    pub filename: PathBuf,
    /// Rotation period: `M` (minutes), `H` (hours), `D`/`midnight` (days) or `never`.
    #[serde(default = "default_when")]
    pub when: String,
    /// Number of rotated files kept; 0 keeps all of them.
    #[serde(default)]
    pub backup_count: usize,
    #[serde(default)]
    pub debug: bool,
}

fn default_when() -> String {
    "midnight".to_string()
}

pub fn parse_rotation(when: &str) -> Result<Rotation> {
    match when.to_ascii_lowercase().as_str() {
        "m" | "minutely" => Ok(Rotation::MINUTELY),
        "h" | "hourly" => Ok(Rotation::HOURLY),
        "d" | "daily" | "midnight" => Ok(Rotation::DAILY),
        "never" => Ok(Rotation::NEVER),
        other => bail!("Unsupported logging.when: {other}"),
    }
}

fn filter_for(debug: bool) -> EnvFilter {
    let level = if debug { "debug" } else { "info" };
    EnvFilter::new(format!(
        "warn,full_backup2s3={level},full_backup2s3_core={level}"
    ))
}

fn file_layer(section: &LoggingSection, base_dir: &Path) -> Result<impl Layer<Registry>> {
    let path = if section.filename.is_absolute() {
        section.filename.clone()
    } else {
        base_dir.join(&section.filename)
    };
    let directory = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let prefix = path
        .file_name()
        .with_context(|| format!("logging.filename has no file name: {}", path.display()))?
        .to_string_lossy()
        .into_owned();

    let mut builder = RollingFileAppender::builder()
        .rotation(parse_rotation(&section.when)?)
        .filename_prefix(prefix);
    if section.backup_count > 0 {
        builder = builder.max_log_files(section.backup_count);
    }
    let appender = builder
        .build(directory)
        .with_context(|| format!("Failed to open log file in {}", directory.display()))?;

    Ok(fmt::layer()
        .with_ansi(false)
        .with_writer(appender)
        .with_filter(filter_for(section.debug)))
}

type ConsoleLayer<S> = Filtered<
    fmt::Layer<S, format::DefaultFields, format::Format, fn() -> std::io::Stdout>,
    EnvFilter,
    S,
>;

fn console_layer<S>(debug: bool) -> ConsoleLayer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let console_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| filter_for(debug));
    fmt::layer()
        .with_writer(std::io::stdout as fn() -> std::io::Stdout)
        .with_filter(console_filter)
}

/// Console-only subscriber used while the config file is read, before [`init`] can run.
pub fn console_subscriber(debug: bool) -> impl tracing::Subscriber + Send + Sync {
    tracing_subscriber::registry().with(console_layer(debug))
}

/// Installs the global subscriber. `RUST_LOG` overrides the console level.
pub fn init(debug: bool, file: Option<&LoggingSection>, base_dir: &Path) -> Result<()> {
    let file = match file {
        Some(section) => Some(file_layer(section, base_dir)?),
        None => None,
    };
    let console = console_layer(debug);

    tracing_subscriber::registry()
        .with(file)
        .with(console)
        .try_init()
        .map_err(|e| anyhow!("Failed to init logging: {e}"))?;
    Ok(())
}
