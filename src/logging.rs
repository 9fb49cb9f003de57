//! Tracing subscriber setup for the binary.

use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, EnvFilter};

/// Used when RUST_LOG is unset
pub const DEFAULT_FILTER: &str = "procache=info";

/// Where log lines go
#[derive(Debug, Clone)]
pub enum LogTarget {
  Stderr,
  /// Daily rolling files in this directory
  Directory(PathBuf),
}

impl LogTarget {
  /// $XDG_DATA_HOME/procache/logs, or stderr when there is no data dir.
  pub fn default_directory() -> Self {
    match dirs::data_dir() {
      Some(dir) => LogTarget::Directory(dir.join("procache").join("logs")),
      None => LogTarget::Stderr,
    }
  }
}

fn env_filter() -> EnvFilter {
  EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber.
///
/// Keep the returned guard alive for the life of the process; dropping it
/// flushes and stops the background file writer.
pub fn init(target: LogTarget) -> Result<Option<WorkerGuard>> {
  match target {
    LogTarget::Stderr => {
      fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;
      Ok(None)
    }
    LogTarget::Directory(dir) => {
      std::fs::create_dir_all(&dir)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

      let appender = tracing_appender::rolling::daily(&dir, "procache.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);

      fmt()
        .with_env_filter(env_filter())
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;
      Ok(Some(guard))
    }
  }
}
