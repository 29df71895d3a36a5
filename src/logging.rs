//! Logging setup shared by the binaries.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::error::{CourierError, Result};

/// `RUST_LOG` if set and valid, otherwise `default_filter`
pub fn build_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Log file destination with its own filter
#[derive(Debug, Clone, Copy)]
pub struct FileLog<'a> {
    pub path: &'a Path,

    /// Directives for the file only; `RUST_LOG` does not apply here
    pub filter: &'a str,
}

impl<'a> FileLog<'a> {
    /// Log file that records debug output and above
    pub fn new(path: &'a Path) -> Self {
        Self { path, filter: "debug" }
    }
}

/// Install the global tracing subscriber
///
/// Logs always go to stderr, filtered by `RUST_LOG` or `stderr_filter`.
/// With `file`, they are also appended to that file at its own level.
pub fn init_tracing(stderr_filter: &str, file: Option<FileLog<'_>>) -> Result<()> {
    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .with_filter(build_filter(stderr_filter));

    let file_layer = match file {
        Some(file) => {
            let sink = OpenOptions::new().create(true).append(true).open(file.path)?;
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_writer(Mutex::new(sink))
                .with_filter(EnvFilter::new(file.filter));
            Some(layer)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| CourierError::Config(format!("failed to install logger: {}", e)))
}
