//! Logging Module
//!
//! Application logging through `tracing`: a compact console layer on stderr and,
//! when a log directory is configured, a daily-rotated file written off the hot
//! path through a non-blocking appender.

use crate::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "hybrid-cache.log";

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence when set
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Directory for rotated log files; console only when unset
    #[serde(default, deserialize_with = "crate::config::option_pathbuf_serde::deserialize")]
    pub log_dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_dir: None,
        }
    }
}

/// Keeps the background log writer alive; dropping it flushes pending lines
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard {
    file: Option<WorkerGuard>,
}

impl LoggingGuard {
    pub fn has_file(&self) -> bool {
        self.file.is_some()
    }
}

/// Install the global subscriber.
///
/// Calling this again (as tests do) leaves the first subscriber in place.
pub fn init_logging(config: &LoggingConfig) -> Result<LoggingGuard> {
    let (file_layer, file_guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| {
                CacheError::IoError(format!("Failed to create log directory {:?}: {}", dir, e))
            })?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
                .compact();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(false)
        .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
        .compact();

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| {
            CacheError::ConfigError(format!("Invalid log level {:?}: {}", config.level, e))
        })?;

    let result = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init();

    match result {
        Ok(()) => {
            info!("Logging initialized: level={}", config.level);
            if let Some(dir) = &config.log_dir {
                info!("Application logs will be written to: {:?}", dir);
            }
        }
        Err(_) => {
            debug!("Tracing subscriber already initialized, skipping");
        }
    }

    Ok(LoggingGuard { file: file_guard })
}
