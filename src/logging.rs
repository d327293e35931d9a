use crate::error::{GraphiteError, Result};
use crate::layer::ErrorCountingLayer;
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber: the error-counting layer, console output and,
/// when `log_dir` is given, a daily-rotated JSON log file.
///
/// The counting layer sees every event regardless of `RUST_LOG`. Keep the
/// returned guard alive for as long as file logs should be flushed.
pub fn init_logging(
    metrics_layer: ErrorCountingLayer,
    log_dir: Option<&Path>,
) -> Result<Option<WorkerGuard>> {
    let console_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_filter(env_filter());

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            let file_appender = tracing_appender::rolling::daily(dir, "graphite-error-counter.log");
            let (writer, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(env_filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(metrics_layer)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| GraphiteError::Logging(e.to_string()))?;

    Ok(guard)
}
