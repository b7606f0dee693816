//! # Tracing Setup
//!
//! Installs the global `tracing` subscriber:
//!
//! - an `EnvFilter` taken from `RUST_LOG`, falling back to the configured level,
//! - a human-readable console layer with targets,
//! - a JSON layer writing to a daily rolling file through a non-blocking writer.
//!
//! The returned [`WorkerGuard`] flushes the file writer when dropped, so the
//! caller keeps it alive for the lifetime of the process.

use std::io;
use std::path::PathBuf;

use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Where and how much to log.
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Directory for the rolling log files. Created if missing.
    pub log_dir: PathBuf,
    /// Filter directive used when `RUST_LOG` is not set, e.g. `info`.
    pub level: String,
    /// File name prefix of the rolling log files.
    pub app_name: String,
}

impl LogOptions {
    pub fn new(log_dir: impl Into<PathBuf>, level: impl Into<String>, app_name: impl Into<String>) -> Self {
        Self {
            log_dir: log_dir.into(),
            level: level.into(),
            app_name: app_name.into(),
        }
    }
}

/// Initializes the global subscriber and returns the file writer's guard.
///
/// # Errors
/// Fails if the log directory cannot be created, the level is not a valid
/// filter directive, or a global subscriber is already installed.
pub fn setup_logging(options: &LogOptions) -> io::Result<WorkerGuard> {
    std::fs::create_dir_all(&options.log_dir)?;

    let file_appender = rolling::daily(&options.log_dir, format!("{}.log", options.app_name));
    let (non_blocking_appender, guard) = non_blocking(file_appender);

    let console_layer = fmt::layer().with_target(true).with_ansi(true);

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking_appender)
        .json();

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&options.level))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(io::Error::other)?;

    info!("Logging initialized with level: {}", options.level);
    Ok(guard)
}
