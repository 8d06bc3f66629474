//! Logging setup for the command line
//!
//! - Console logging to stderr, pretty or compact
//! - Optional JSON log file with rotation
//! - `RUST_LOG` overrides the configured level

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

/// Crates whose events the default filter lets through
const LOG_TARGETS: &[&str] = &["crawlavator", "crawl_sync", "crawl_sources"];

/// Telemetry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Enable console logging
    pub console_logging: bool,
    /// Console format: pretty or compact
    pub console_format: ConsoleFormat,
    /// JSON log file; no file logging when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file_path: Option<PathBuf>,
    pub log_rotation: LogRotationConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleFormat {
    Pretty,
    Compact,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogRotationConfig {
    /// Enable log rotation
    pub enabled: bool,
    /// Rotation frequency (daily, hourly)
    pub frequency: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            console_logging: true,
            console_format: ConsoleFormat::Compact,
            log_file_path: None,
            log_rotation: LogRotationConfig::default(),
        }
    }
}

impl Default for LogRotationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            frequency: "daily".to_string(),
        }
    }
}

/// Keeps the file writer flushing until dropped
pub struct TelemetryGuard {
    _file_guard: Option<WorkerGuard>,
    session_id: Uuid,
}

impl TelemetryGuard {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }
}

/// Map a level name onto a tracing level, defaulting to info
pub fn parse_level(level: &str) -> tracing::Level {
    match level.trim().to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}

/// `crawlavator=info,crawl_sync=info,...`
pub fn filter_directive(level: &str) -> String {
    let level = parse_level(level).to_string().to_lowercase();
    LOG_TARGETS
        .iter()
        .map(|target| format!("{}={}", target, level))
        .collect::<Vec<_>>()
        .join(",")
}

fn file_appender(path: &Path, rotation: &LogRotationConfig) -> rolling::RollingFileAppender {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .unwrap_or_else(|| std::ffi::OsStr::new("crawlavator.log"));

    if !rotation.enabled {
        return rolling::never(dir, name);
    }
    match rotation.frequency.as_str() {
        "hourly" => rolling::hourly(dir, name),
        "daily" => rolling::daily(dir, name),
        _ => rolling::never(dir, name),
    }
}

/// Install the global subscriber. `level_override` wins over the config level.
pub fn init(config: &TelemetryConfig, level_override: Option<&str>) -> Result<TelemetryGuard> {
    let level = level_override.unwrap_or(&config.log_level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_directive(level)));

    let (pretty_layer, compact_layer) = match (config.console_logging, config.console_format) {
        (false, _) => (None, None),
        (true, ConsoleFormat::Pretty) => (
            Some(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .pretty(),
            ),
            None,
        ),
        (true, ConsoleFormat::Compact) => (
            None,
            Some(fmt::layer().with_writer(std::io::stderr).with_target(false).compact()),
        ),
    };

    let (file_layer, guard) = if let Some(log_path) = &config.log_file_path {
        if let Some(parent) = log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender(log_path, &config.log_rotation));
        let layer = fmt::layer()
            .with_writer(non_blocking)
            .json()
            .with_current_span(true)
            .with_span_list(true);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(pretty_layer)
        .with(compact_layer)
        .with(file_layer)
        .try_init()?;

    let session_id = Uuid::new_v4();
    debug!(session_id = %session_id, "Telemetry initialized");

    Ok(TelemetryGuard {
        _file_guard: guard,
        session_id,
    })
}
