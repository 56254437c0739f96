use anyhow::{Error, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::AppConfig;

/// Installs the global subscriber. When `log_directory` is set, log lines are
/// also written to a daily rolling file; keep the returned guard alive until
/// exit so buffered lines get flushed.
pub fn init(config: &AppConfig) -> Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.log_level))?;
    let stderr_layer = fmt::layer().with_writer(std::io::stderr);

    let (file_layer, guard) = match &config.log_directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "router-stats.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(Error::msg)?;
    Ok(guard)
}
