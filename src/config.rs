//! Ambient configuration layer (SPEC_FULL.md §10.1).
//!
//! Resolution order, each layer overriding the last: built-in defaults,
//! then `<user-app-data>/config/rose.toml` (rejecting unknown keys so a
//! typo surfaces instead of silently no-opping), then `ROSE_*` env vars,
//! then CLI flags. The result is an immutable [`AppConfig`] built once
//! at bootstrap and handed to every component by reference.

use std::path::PathBuf;

use serde::Deserialize;

use crate::cli::Cli;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
  lockfile: Option<PathBuf>,
  league_install: Option<PathBuf>,
  phase_poll_hz: Option<u64>,
  ws_ping_secs: Option<u64>,
  timer_hz: Option<u64>,
  skin_threshold_ms: Option<u64>,
  download_skins: Option<bool>,
  force_update_skins: Option<bool>,
  max_champions: Option<usize>,
  analytics_endpoint: Option<String>,
  log_format: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
  pub lockfile_path: Option<PathBuf>,
  pub league_install_hint: Option<PathBuf>,
  pub phase_poll_hz: u64,
  pub ws_ping_secs: u64,
  pub timer_hz: u64,
  pub skin_threshold_ms: u64,
  pub download_skins: bool,
  pub force_update_skins: bool,
  pub max_champions: usize,
  pub analytics_endpoint: Option<String>,
  pub log_format: LogFormat,
  pub verbose: bool,
  pub debug: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
  Pretty,
  Json,
}

impl AppConfig {
  const DEFAULT_PHASE_POLL_HZ: u64 = 1;
  const DEFAULT_WS_PING_SECS: u64 = 30;
  const DEFAULT_TIMER_HZ: u64 = 10;
  const DEFAULT_SKIN_THRESHOLD_MS: u64 = 1500;
  const DEFAULT_MAX_CHAMPIONS: usize = 170;

  /// Builds the layered config: defaults, then the TOML file at
  /// `config_path` if it exists, then `ROSE_*` env vars, then `cli`.
  pub fn resolve(config_path: &std::path::Path, cli: &Cli) -> Result<Self, crate::error::FatalError> {
    let file_config = Self::load_file(config_path)?;

    let mut config = AppConfig {
      lockfile_path: file_config.lockfile,
      league_install_hint: file_config.league_install,
      phase_poll_hz: file_config.phase_poll_hz.unwrap_or(Self::DEFAULT_PHASE_POLL_HZ),
      ws_ping_secs: file_config.ws_ping_secs.unwrap_or(Self::DEFAULT_WS_PING_SECS),
      timer_hz: file_config.timer_hz.unwrap_or(Self::DEFAULT_TIMER_HZ),
      skin_threshold_ms: file_config.skin_threshold_ms.unwrap_or(Self::DEFAULT_SKIN_THRESHOLD_MS),
      download_skins: file_config.download_skins.unwrap_or(true),
      force_update_skins: file_config.force_update_skins.unwrap_or(false),
      max_champions: file_config.max_champions.unwrap_or(Self::DEFAULT_MAX_CHAMPIONS),
      analytics_endpoint: file_config.analytics_endpoint,
      log_format: match file_config.log_format.as_deref() {
        Some("json") => LogFormat::Json,
        _ => LogFormat::Pretty,
      },
      verbose: false,
      debug: false,
    };

    if let Ok(val) = std::env::var("ROSE_TIMER_HZ") {
      if let Ok(parsed) = val.parse() {
        config.timer_hz = parsed;
      }
    }
    if let Ok(val) = std::env::var("ROSE_MAX_CHAMPIONS") {
      if let Ok(parsed) = val.parse() {
        config.max_champions = parsed;
      }
    }
    if let Ok(val) = std::env::var("ROSE_ANALYTICS_ENDPOINT") {
      config.analytics_endpoint = Some(val);
    }

    cli.apply_overrides(&mut config);

    Ok(config)
  }

  fn load_file(path: &std::path::Path) -> Result<FileConfig, crate::error::FatalError> {
    if !path.exists() {
      return Ok(FileConfig::default());
    }
    let text = std::fs::read_to_string(path)
      .map_err(|e| crate::error::FatalError::Config(format!("failed to read {}: {e}", path.display())))?;
    toml::from_str(&text).map_err(|e| crate::error::FatalError::Config(format!("failed to parse {}: {e}", path.display())))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_file_falls_back_to_defaults() {
    let result = AppConfig::load_file(std::path::Path::new("/nonexistent/rose.toml"));
    assert!(result.is_ok());
  }

  #[test]
  fn rejects_unknown_keys() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("rose.toml");
    std::fs::write(&path, "not_a_real_key = 1\n").unwrap();
    assert!(AppConfig::load_file(&path).is_err());
  }
}
