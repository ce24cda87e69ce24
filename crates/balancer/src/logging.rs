//! Tracing setup: machine-readable file output, human-readable stderr.

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// File name prefix for the daily-rolled log under `log_dir`.
const LOG_FILE_PREFIX: &str = "treasury.log";

/// Install the process-wide subscriber.
///
/// Two sinks: a daily-rolling JSON file (for ingestion) and a compact stderr
/// stream (for operators). `RUST_LOG` wins when set; otherwise the crate logs
/// at the level named in `LoggingConfig` and dependencies stay at warn.
///
/// The returned guard owns the non-blocking file writer — `main` holds it
/// until exit so buffered events are flushed.
pub fn init_tracing(logging: &LoggingConfig) -> Result<WorkerGuard> {
    std::fs::create_dir_all(&logging.log_dir)
        .with_context(|| format!("creating log directory {}", logging.log_dir))?;

    let appender = tracing_appender::rolling::daily(&logging.log_dir, LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let filter = match EnvFilter::try_from_default_env() {
        Ok(from_env) => from_env,
        Err(_) => EnvFilter::builder()
            .with_default_directive(LevelFilter::WARN.into())
            .parse_lossy(format!("treasury_balancer={}", logging.level)),
    };

    let file_layer = fmt::layer()
        .json()
        .with_ansi(false)
        .with_writer(file_writer);

    let stderr_layer = fmt::layer()
        .compact()
        .with_target(true)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();

    Ok(guard)
}
