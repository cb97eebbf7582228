//! Tracing setup for the blobpush binary.
//!
//! Events go to stderr and, when the file can be opened, to a daily log file
//! at `logs/<YYYYMMDD>/app.log` under the working directory. `RUST_LOG`
//! overrides the default `info` (or `debug` with `--verbose`) filter.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Local};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::load_config::LOG_DIR;

pub const LOG_FILE_NAME: &str = "app.log";

/// Path of the log file for the day of `now`.
pub fn log_file_path(working_dir: &Path, now: DateTime<Local>) -> PathBuf {
    working_dir
        .join(LOG_DIR)
        .join(now.format("%Y%m%d").to_string())
        .join(LOG_FILE_NAME)
}

fn default_filter(verbose: bool) -> EnvFilter {
    let level = if verbose { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Installs the global subscriber. Returns the log file path when file logging is active.
pub fn init(verbose: bool, working_dir: &Path) -> Option<PathBuf> {
    let path = log_file_path(working_dir, Local::now());
    let (file_layer, file_error) = match open_log_file(&path) {
        Ok(file) => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            ),
            None,
        ),
        Err(e) => (None, Some(e)),
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(io::stderr);

    let installed = tracing_subscriber::registry()
        .with(default_filter(verbose))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .is_ok();

    match file_error {
        Some(e) => {
            tracing::warn!(error = %e, log_file = %path.display(), "File logging disabled");
            None
        }
        None if installed => Some(path),
        None => None,
    }
}
