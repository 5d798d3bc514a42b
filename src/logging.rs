use crate::config::Config;
use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_log::LogTracer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_FILE_PREFIX: &str = "playlist-link-sync.log";

/// `RUST_LOG` when set, otherwise the configured level.
pub fn filter_for(cfg: &Config) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_level))
}

/// Install the global subscriber: compact lines on stderr and JSON lines
/// in a daily-rotated file under `cfg.log_dir()`. Keep the returned guard
/// alive until exit or buffered file output is lost.
pub fn init(cfg: &Config) -> Result<WorkerGuard> {
    // `log` records from dependencies go through tracing too
    let _ = LogTracer::init();

    let log_dir = cfg.log_dir();
    std::fs::create_dir_all(&log_dir).with_context(|| format!("creating {}", log_dir.display()))?;
    let file_appender: RollingFileAppender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer().json().with_writer(non_blocking);
    let console_layer = fmt::layer().compact().with_target(false).with_writer(std::io::stderr);

    let subscriber = tracing_subscriber::registry()
        .with(filter_for(cfg))
        .with(file_layer)
        .with(console_layer);
    tracing::subscriber::set_global_default(subscriber).context("installing global tracing subscriber")?;
    Ok(guard)
}
