use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Host configuration. Watch-face settings are not configured here; they
/// arrive from the companion.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Config {
  /// Path of the state database (defaults to $XDG_DATA_HOME/facesync/state.db)
  pub database: Option<PathBuf>,
  /// Seconds between periodic ticks
  #[serde(default = "default_tick_seconds")]
  pub tick_seconds: u64,
  /// Directory for rolling log files; logs go to stderr only when unset
  pub log_dir: Option<PathBuf>,
}

fn default_tick_seconds() -> u64 {
  60
}

impl Default for Config {
  fn default() -> Self {
    Self {
      database: None,
      tick_seconds: default_tick_seconds(),
      log_dir: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./facesync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/facesync/config.yaml
  ///
  /// Without a config file the defaults are used.
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("facesync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("facesync").join("config.yaml");
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

  fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }
}
