//! Console and optional JSON file logging

use std::ffi::OsStr;
use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` wins over `level`.
///
/// The returned guard flushes the file writer on drop and must live as long
/// as the process logs.
pub fn init_logging(level: &str, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("launcher={}", level)));

    let console_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let (file_layer, guard) = match log_file {
        Some(log_path) => {
            let directory = log_path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(directory)
                .with_context(|| format!("Failed to create log directory {}", directory.display()))?;

            let file_appender = rolling::never(
                directory,
                log_path.file_name().unwrap_or_else(|| OsStr::new("launcher.log")),
            );
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .json()
                .with_current_span(true)
                .with_span_list(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}
