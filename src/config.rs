use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  /// Where the database and log file live (defaults to the platform data dir)
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the remote store
  pub url: String,
  /// Owner whose records are read and written
  pub owner: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  DEFAULT_TIMEOUT_SECS
}

impl ApiConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs.max(1))
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./ledgerline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/ledgerline/config.yaml
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

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/ledgerline/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("ledgerline.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("ledgerline").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.api.owner.trim().is_empty() {
      return Err(eyre!("api.owner must not be empty"));
    }
    Ok(config)
  }

  /// Directory holding the database and the log file.
  pub fn data_dir(&self) -> Result<PathBuf> {
    self
      .data_dir
      .clone()
      .or_else(crate::db::Database::default_dir)
      .ok_or_else(|| eyre!("Could not determine a data directory; set data_dir in the config"))
  }

  /// Get the API bearer token from environment variables.
  ///
  /// Checks LEDGERLINE_TOKEN first, then LEDGERLINE_API_TOKEN as fallback.
  /// A missing token is not fatal here: network calls fail with an auth error
  /// and queued writes keep waiting.
  pub fn get_api_token() -> Option<String> {
    std::env::var("LEDGERLINE_TOKEN")
      .or_else(|_| std::env::var("LEDGERLINE_API_TOKEN"))
      .ok()
  }
}
