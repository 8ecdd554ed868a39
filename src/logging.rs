//! Tracing subscriber setup.
//!
//! `RUST_LOG` overrides the configured level, e.g.
//! `RUST_LOG=landmark_stream::listener=trace` to see every datagram.

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;
use crate::error::Result;

const LOG_DIR: &str = "logs";

/// `logs/<name>_<YYYYmmdd_HHMMSS>.log`
pub fn log_file_path(dir: &Path, name: &str) -> PathBuf {
    let ts = chrono::Local::now().format("%Y%m%d_%H%M%S");
    dir.join(format!("{}_{}.log", name, ts))
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Keep the returned guard alive until exit
/// so buffered file output is flushed.
pub fn init(config: &LoggingConfig, name: &str) -> Result<Option<WorkerGuard>> {
    let filter = env_filter(&config.level);
    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    if !config.file {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .init();
        return Ok(None);
    }

    std::fs::create_dir_all(LOG_DIR)?;
    let path = log_file_path(Path::new(LOG_DIR), name);
    let file = std::fs::File::create(&path)?;
    let (writer, guard) = tracing_appender::non_blocking(file);
    let file_layer = fmt::layer().with_writer(writer).with_ansi(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    tracing::info!(path = %path.display(), "logging to file");
    Ok(Some(guard))
}
