use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default cache lifetime, also the window for the rolling global clear.
pub const DEFAULT_EXPIRY_HOURS: i64 = 72;

/// Age after which `fetch_cached` goes back to the network.
pub const DEFAULT_STALE_MINUTES: i64 = 5;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub server: ServerConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  /// Base URL for REST calls (e.g., "http://localhost:8080")
  #[serde(default = "default_server_url")]
  pub url: String,
  /// STOMP endpoint. Derived from `url` when not set.
  pub ws_url: Option<String>,
  /// Public web origin used when building share links
  pub web_origin: Option<String>,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      url: default_server_url(),
      ws_url: None,
      web_origin: None,
    }
  }
}

fn default_server_url() -> String {
  "http://localhost:8080".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  #[serde(default = "default_true")]
  pub enabled: bool,
  #[serde(default = "default_expiry_hours")]
  pub default_expiry_hours: i64,
  #[serde(default = "default_stale_minutes")]
  pub stale_minutes: i64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      default_expiry_hours: DEFAULT_EXPIRY_HOURS,
      stale_minutes: DEFAULT_STALE_MINUTES,
    }
  }
}

fn default_true() -> bool {
  true
}

fn default_expiry_hours() -> i64 {
  DEFAULT_EXPIRY_HOURS
}

fn default_stale_minutes() -> i64 {
  DEFAULT_STALE_MINUTES
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
  /// EnvFilter directive, overridden by SKILLMATCH_LOG
  pub level: Option<String>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./skillmatch.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/skillmatch/config.yaml
  ///
  /// Unlike an explicit path, a missing default file is not an error: the
  /// client falls back to a local backend.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };

    if let Ok(url) = std::env::var("SKILLMATCH_SERVER_URL") {
      config.server.url = url;
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("skillmatch.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("skillmatch").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// STOMP endpoint, falling back to `{url}/ws` with the scheme swapped.
  pub fn ws_url(&self) -> String {
    if let Some(ws) = &self.server.ws_url {
      return ws.clone();
    }
    let base = self.server.url.trim_end_matches('/');
    let swapped = if let Some(rest) = base.strip_prefix("https://") {
      format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
      format!("ws://{}", rest)
    } else {
      base.to_string()
    };
    format!("{}/ws", swapped)
  }

  /// Origin used for `/jobs/{id}` share links.
  pub fn web_origin(&self) -> &str {
    self
      .server
      .web_origin
      .as_deref()
      .unwrap_or(&self.server.url)
      .trim_end_matches('/')
  }

  pub fn default_expiry(&self) -> chrono::Duration {
    chrono::Duration::hours(self.cache.default_expiry_hours)
  }

  pub fn stale_time(&self) -> chrono::Duration {
    chrono::Duration::minutes(self.cache.stale_minutes)
  }

  /// Directory for the cache database, session file and logs.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("skillmatch"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_config_uses_defaults() {
    let config = Config::parse("{}").unwrap();
    assert_eq!(config.server.url, "http://localhost:8080");
    assert!(config.cache.enabled);
    assert_eq!(config.cache.default_expiry_hours, 72);
    assert_eq!(config.default_expiry(), chrono::Duration::days(3));
  }

  #[test]
  fn test_ws_url_derived_from_server_url() {
    let config = Config::parse("server:\n  url: https://api.example.com/\n").unwrap();
    assert_eq!(config.ws_url(), "wss://api.example.com/ws");

    let config = Config::parse("server:\n  url: http://localhost:8080\n").unwrap();
    assert_eq!(config.ws_url(), "ws://localhost:8080/ws");
  }

  #[test]
  fn test_explicit_ws_url_wins() {
    let config =
      Config::parse("server:\n  url: http://a\n  ws_url: ws://b/socket\n").unwrap();
    assert_eq!(config.ws_url(), "ws://b/socket");
  }

  #[test]
  fn test_cache_section() {
    let config = Config::parse("cache:\n  enabled: false\n  default_expiry_hours: 1\n").unwrap();
    assert!(!config.cache.enabled);
    assert_eq!(config.default_expiry(), chrono::Duration::hours(1));
  }

  #[test]
  fn test_missing_explicit_path_is_error() {
    let err = Config::load(Some(Path::new("/nonexistent/skillmatch.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
