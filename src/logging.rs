//! Logging setup: everything at DEBUG and above is appended to the run log
//! file, INFO and above (or whatever `RUST_LOG` says) goes to stderr.

use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

pub const DEFAULT_LOG_PATH: &str = "diagnostic_completion_debug.log";
pub const LOG_PATH_ENV: &str = "RIPSFIX_LOG";

/// Install the global subscriber. The debug log appends across runs so a
/// batch leaves a durable trail. Returns the log file path in use.
/// Calling this more than once is harmless; later calls keep the first
/// subscriber.
pub fn init_logging() -> Result<PathBuf, io::Error> {
    let log_path = std::env::var(LOG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_LOG_PATH));

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(Mutex::new(log_file))
        .with_filter(LevelFilter::DEBUG);

    let console_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));

    let _ = tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init();

    Ok(log_path)
}
