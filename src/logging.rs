//! Ambient logging setup (SPEC_FULL.md §10.3): a `tracing-subscriber`
//! layer configured from [`AppConfig`], replacing the teacher's scattered
//! `println!`/`eprintln!` calls with structured, leveled events.

use tracing_subscriber::EnvFilter;

use crate::config::{AppConfig, LogFormat};

/// Initializes the global subscriber. Call once, at the very start of
/// `main`, before any other component logs.
pub fn init(config: &AppConfig) {
  let default_level = if config.debug {
    "debug"
  } else if config.verbose {
    "info"
  } else {
    "warn"
  };
  let filter = EnvFilter::try_from_env("ROSE_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));

  let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

  match config.log_format {
    LogFormat::Json => subscriber.json().init(),
    LogFormat::Pretty => subscriber.init(),
  }
}
