//! Logging system configuration and initialization
//!
//! - Console output for interactive runs
//! - Daily rolling log files under the configured directory
//! - Optional structured JSON output for file logs
//! - Timestamps in JST, the marketplaces' local time

use anyhow::{Result, anyhow};
use chrono::{FixedOffset, Utc};
use lazy_static::lazy_static;
use std::path::Path;
use std::sync::Mutex;
use tracing::{info, warn};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{self, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

pub use crate::infrastructure::config::LoggingConfig;

const LOG_FILE_PREFIX: &str = "resale-scout.log";
const JST_OFFSET_SECONDS: i32 = 9 * 3600;

// Keeps the non-blocking writers alive for the life of the process
lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<tracing_appender::non_blocking::WorkerGuard>> = Mutex::new(Vec::new());
}

/// Japan Standard Time (UTC+9) timestamps
struct JstTimeFormatter;

impl FormatTime for JstTimeFormatter {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        let offset = FixedOffset::east_opt(JST_OFFSET_SECONDS).ok_or(std::fmt::Error)?;
        write!(w, "{}", Utc::now().with_timezone(&offset).format("%Y-%m-%d %H:%M:%S%.3f %:z"))
    }
}

/// Build the filter: `RUST_LOG` wins, otherwise the configured level with
/// dependency noise suppressed unless TRACE was requested.
fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let mut filter = EnvFilter::try_new(&config.level)?;

    if !config.level.to_lowercase().contains("trace") {
        for directive in ["sqlx::query=warn", "hyper=warn", "h2=warn", "html5ever=warn", "selectors=warn"] {
            filter = filter.add_directive(directive.parse()?);
        }
    }

    for (target, level) in &config.module_filters {
        filter = filter.add_directive(format!("{target}={level}").parse()?);
    }

    Ok(filter.add_directive(format!("resale_scout_lib={}", config.level).parse()?))
}

/// Initialize logging with the given configuration and log directory
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init_logging_with_config(config: &LoggingConfig, log_dir: &Path) -> Result<()> {
    let env_filter = build_env_filter(config)?;
    let registry = Registry::default().with(env_filter);

    let file_writer = if config.file_output {
        std::fs::create_dir_all(log_dir)
            .map_err(|e| anyhow!("Failed to create log directory {:?}: {}", log_dir, e))?;
        cleanup_old_logs(log_dir, config.max_files)?;

        let (writer, guard) = non_blocking(rolling::daily(log_dir, LOG_FILE_PREFIX));
        LOG_GUARDS
            .lock()
            .map_err(|_| anyhow!("log guard registry poisoned"))?
            .push(guard);
        Some(writer)
    } else {
        None
    };

    // Generic over the subscriber so each arm below can stack it on a different base
    fn console_layer<S>(
        enabled: bool,
    ) -> Option<fmt::Layer<S, fmt::format::DefaultFields, fmt::format::Format<fmt::format::Full, JstTimeFormatter>, fn() -> std::io::Stderr>>
    {
        enabled.then(|| {
            fmt::Layer::new()
                .with_writer(std::io::stderr as fn() -> std::io::Stderr)
                .with_timer(JstTimeFormatter)
                .with_target(false)
        })
    }

    let result = match (file_writer, config.json_format) {
        (Some(writer), true) => {
            let file_layer = fmt::Layer::new()
                .json()
                .with_writer(writer)
                .with_timer(JstTimeFormatter)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false);
            registry.with(file_layer).with(console_layer(config.console_output)).try_init()
        }
        (Some(writer), false) => {
            let file_layer = fmt::Layer::new()
                .with_writer(writer)
                .with_timer(JstTimeFormatter)
                .with_target(true)
                .with_ansi(false);
            registry.with(file_layer).with(console_layer(config.console_output)).try_init()
        }
        (None, _) if config.console_output => registry.with(console_layer(config.console_output)).try_init(),
        (None, _) => return Err(anyhow!("No logging output configured")),
    };

    if result.is_err() {
        // A subscriber is already installed (tests, embedding callers)
        return Ok(());
    }

    info!("Logging system initialized");
    info!("Log directory: {:?}", log_dir);
    info!("Log level: {}", config.level);
    info!("JSON format: {}, console: {}, file: {}", config.json_format, config.console_output, config.file_output);

    Ok(())
}

/// Keep the newest `max_files` log files in `log_dir`
fn cleanup_old_logs(log_dir: &Path, max_files: usize) -> Result<()> {
    let mut log_files = Vec::new();

    for entry in std::fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_log = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX));

        if path.is_file() && is_log {
            if let Ok(modified) = entry.metadata().and_then(|m| m.modified()) {
                log_files.push((path, modified));
            }
        }
    }

    if log_files.len() <= max_files {
        return Ok(());
    }

    // Newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in log_files.iter().skip(max_files) {
        if let Err(e) = std::fs::remove_file(path) {
            warn!("Failed to remove old log file {:?}: {}", path, e);
        }
    }

    Ok(())
}

/// Log system information for diagnostics
pub fn log_system_info() {
    info!("=== Resale Scout ===");
    info!("Application version: {}", env!("CARGO_PKG_VERSION"));
    info!("Operating system: {}", std::env::consts::OS);
    info!("Architecture: {}", std::env::consts::ARCH);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_logging_config_default() {
        let config = LoggingConfig::default();
        assert!(!config.level.is_empty());
        assert!(config.console_output);
        assert!(config.file_output);
    }

    #[test]
    fn cleanup_keeps_newest_files() -> Result<()> {
        let dir = tempdir()?;
        for day in 1..=4 {
            let path = dir.path().join(format!("{LOG_FILE_PREFIX}.2026-10-0{day}"));
            std::fs::write(&path, "x")?;
            std::thread::sleep(std::time::Duration::from_millis(15));
        }
        std::fs::write(dir.path().join("unrelated.txt"), "keep")?;

        cleanup_old_logs(dir.path(), 2)?;

        let remaining: Vec<_> = std::fs::read_dir(dir.path())?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(remaining.len(), 3);
        assert!(remaining.iter().any(|n| n.ends_with("2026-10-04")));
        assert!(remaining.iter().any(|n| n == "unrelated.txt"));
        Ok(())
    }

    #[test]
    fn rejects_configuration_without_outputs() {
        let config = LoggingConfig {
            console_output: false,
            file_output: false,
            ..LoggingConfig::default()
        };
        let dir = tempdir().unwrap();
        assert!(init_logging_with_config(&config, dir.path()).is_err());
    }
}
