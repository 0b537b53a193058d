//! Command-line surface (SPEC_FULL.md §6).

use std::path::PathBuf;

use clap::Parser;

use crate::config::{AppConfig, LogFormat};

#[derive(Debug, Parser)]
#[command(name = "rose", about = "Champ-select skin overlay companion")]
pub struct Cli {
  /// Explicit path to the League client's lockfile, bypassing discovery.
  #[arg(long, env = "ROSE_LOCKFILE")]
  pub lockfile: Option<PathBuf>,

  /// Hint directory for the League install, used by process-scan discovery.
  #[arg(long, env = "ROSE_LEAGUE_INSTALL")]
  pub league_install: Option<PathBuf>,

  /// Gameflow phase poll fallback frequency, in Hz.
  #[arg(long)]
  pub phase_hz: Option<u64>,

  /// WebSocket idle ping interval, in seconds.
  #[arg(long)]
  pub ws_ping: Option<u64>,

  /// Commit controller ticker frequency, in Hz.
  #[arg(long)]
  pub timer_hz: Option<u64>,

  /// Countdown lead time, in milliseconds, at which a skin is committed.
  #[arg(long)]
  pub skin_threshold_ms: Option<u64>,

  #[arg(long, overrides_with = "no_download_skins")]
  pub download_skins: bool,
  #[arg(long)]
  pub no_download_skins: bool,

  #[arg(long)]
  pub force_update_skins: bool,

  /// Caps how many champions' skin catalogues are kept resident.
  #[arg(long)]
  pub max_champions: Option<usize>,

  #[arg(long, short = 'v')]
  pub verbose: bool,

  #[arg(long)]
  pub debug: bool,

  #[arg(long)]
  pub log_format: Option<String>,
}

impl Cli {
  pub fn apply_overrides(&self, config: &mut AppConfig) {
    if self.lockfile.is_some() {
      config.lockfile_path = self.lockfile.clone();
    }
    if self.league_install.is_some() {
      config.league_install_hint = self.league_install.clone();
    }
    if let Some(hz) = self.phase_hz {
      config.phase_poll_hz = hz;
    }
    if let Some(secs) = self.ws_ping {
      config.ws_ping_secs = secs;
    }
    if let Some(hz) = self.timer_hz {
      config.timer_hz = hz;
    }
    if let Some(ms) = self.skin_threshold_ms {
      config.skin_threshold_ms = ms;
    }
    if self.no_download_skins {
      config.download_skins = false;
    } else if self.download_skins {
      config.download_skins = true;
    }
    if self.force_update_skins {
      config.force_update_skins = true;
    }
    if let Some(max) = self.max_champions {
      config.max_champions = max;
    }
    if let Some(format) = &self.log_format {
      config.log_format = if format.eq_ignore_ascii_case("json") { LogFormat::Json } else { LogFormat::Pretty };
    }
    config.verbose = self.verbose;
    config.debug = self.debug;
  }
}
