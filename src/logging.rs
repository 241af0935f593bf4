use anyhow::{Context, Result};
use std::{fs, path::Path};
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const LOG_ENV: &str = "REPOHUB_LOG";
pub const LOG_FILE: &str = "repohub.log";

/// Installs the process-wide subscriber: compact lines on stderr plus a log
/// file in `data_dir`. Keep the guard alive until exit or buffered lines are
/// lost.
pub fn init(data_dir: &Path, verbose: bool) -> Result<WorkerGuard> {
    fs::create_dir_all(data_dir).context("create data dir")?;
    let default_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .with_env_var(LOG_ENV)
        .from_env_lossy();

    let file_appender = tracing_appender::rolling::never(data_dir, LOG_FILE);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .with(
            fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(true),
        )
        .try_init()
        .context("install log subscriber")?;

    Ok(guard)
}
