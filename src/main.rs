mod api;
mod app;
mod cache;
mod commands;
mod config;
mod event;
mod logging;
mod messaging;
mod session;
mod stomp;

use clap::Parser;
use color_eyre::Result;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::app::{App, Storage};
use crate::cache::{NoopStorage, SqliteStorage};
use crate::commands::Command;
use crate::session::SessionHandle;

#[derive(Parser, Debug)]
#[command(name = "skillmatch")]
#[command(about = "A terminal client for the SkillMatch job-matching platform")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/skillmatch/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Backend base URL, overriding the config file
  #[arg(long, global = true)]
  server: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = config::Config::load(args.config.as_deref())?;
  if let Some(server) = args.server {
    config.server.url = server;
  }

  let data_dir = config::Config::data_dir()?;
  let _log_guard = logging::init(&config, &data_dir)?;

  let session = SessionHandle::load(&data_dir.join("session.json"))?;
  let storage = open_storage(&config, &data_dir);

  let app = App::new(config, session, storage)?;
  app.run(args.command).await
}

/// SQLite cache under the data directory. The client still works without
/// one, just with nothing to show offline.
fn open_storage(config: &config::Config, data_dir: &Path) -> Storage {
  if !config.cache.enabled {
    return Box::new(NoopStorage);
  }
  match SqliteStorage::open(&data_dir.join("cache.db")) {
    Ok(storage) => Box::new(storage),
    Err(e) => {
      warn!("Cache unavailable, continuing without it: {}", e);
      Box::new(NoopStorage)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::CommandFactory;

  #[test]
  fn test_args_are_consistent() {
    Args::command().debug_assert();
  }

  #[test]
  fn test_search_short_flag_with_global_server() {
    let args = Args::try_parse_from(["skillmatch", "inbox", "-s", "bo"]).unwrap();
    assert!(matches!(args.command, Command::Inbox { search: Some(ref s) } if s == "bo"));

    let args = Args::try_parse_from([
      "skillmatch",
      "share",
      "1",
      "-s",
      "bo",
      "--server",
      "http://api.test",
    ])
    .unwrap();
    assert_eq!(args.server.as_deref(), Some("http://api.test"));
    assert!(matches!(
      args.command,
      Command::Share { job_id: 1, user: None, search: Some(ref s) } if s == "bo"
    ));
  }
}
