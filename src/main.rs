use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use rose_lib::cli::Cli;
use rose_lib::config::AppConfig;
use rose_lib::error::FatalError;
use rose_lib::name_db::{InMemoryNameDatabase, JsonNameDatabase, NameDatabase};
use rose_lib::logging;
use rose_lib::single_instance::SingleInstanceGuard;
use rose_lib::supervisor::{Paths, Supervisor};

fn main() {
  let exit_code = run();
  std::process::exit(exit_code);
}

fn run() -> i32 {
  let cli = Cli::parse();

  let app_dirs = match directories::ProjectDirs::from("", "", "rose") {
    Some(dirs) => dirs,
    None => {
      eprintln!("could not determine an app-data directory for this platform");
      return 1;
    }
  };
  let state_dir = app_dirs.data_dir().join("state");
  let config_path = app_dirs.data_dir().join("config").join("rose.toml");
  let skins_root = app_dirs.data_dir().join("skins");
  let tools_dir = app_dirs.data_dir().join("tools");
  let game_dir = cli
    .league_install
    .clone()
    .unwrap_or_else(|| PathBuf::from(r"C:\Riot Games\League of Legends\Game"));

  let config = match AppConfig::resolve(&config_path, &cli) {
    Ok(config) => config,
    Err(e) => {
      eprintln!("configuration error: {e}");
      return 1;
    }
  };

  logging::init(&config);

  let _guard = match SingleInstanceGuard::acquire(&state_dir) {
    Ok(guard) => guard,
    Err(FatalError::AlreadyRunning(path)) => {
      tracing::error!(path = %path.display(), "another instance is already running");
      return 1;
    }
    Err(e) => {
      tracing::error!(error = %e, "failed to acquire single-instance lock");
      return 1;
    }
  };

  let name_db: Arc<dyn NameDatabase> = match JsonNameDatabase::load(&skins_root.join("names.json")) {
    Ok(db) => Arc::new(db),
    Err(_) => {
      tracing::warn!("no names.json catalogue found, falling back to an empty name database");
      Arc::new(InMemoryNameDatabase::new())
    }
  };

  let paths = Paths {
    tools_dir,
    game_dir,
    skins_root,
    staging_root: state_dir,
  };

  let supervisor = Supervisor::new(config, name_db, paths);
  match supervisor.run() {
    Ok(()) => 0,
    Err(e) => {
      tracing::error!(error = %e, "fatal error");
      e.exit_code()
    }
  }
}
