// ABOUTME: Tracing setup: EnvFilter from RUST_LOG or the configured level, output to the log file
// ABOUTME: The log file is created owner-only and written through a non-blocking appender

use anyhow::{Context, Result};
use mattermostd_core::{paths, Config};
use std::fs::{File, OpenOptions};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn open_log_file(path: &Path) -> Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}

/// Filter from `RUST_LOG` if set, else the configured level
pub fn env_filter(config: &Config) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_filter()))
}

/// Install the global subscriber. Keep the returned guard alive until exit,
/// dropping it flushes buffered log lines.
pub fn init(config: &Config) -> Result<WorkerGuard> {
    let file = open_log_file(&paths::log_file(&config.dir))?;
    let (writer, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::registry()
        .with(env_filter(config))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(guard)
}
