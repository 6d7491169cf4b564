use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::Config;

/// Install a file-backed subscriber. stdout belongs to command output, so
/// logs go to `{data_dir}/logs/skillmatch.log.YYYY-MM-DD`.
///
/// The returned guard must outlive the program or buffered lines are lost.
pub fn init(config: &Config, data_dir: &Path) -> Result<WorkerGuard> {
  let log_dir = data_dir.join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(&log_dir, "skillmatch.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter = EnvFilter::try_from_env("SKILLMATCH_LOG").unwrap_or_else(|_| {
    EnvFilter::new(config.log.level.as_deref().unwrap_or("info"))
  });

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .try_init()
    .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))?;

  Ok(guard)
}
