use std::path::PathBuf;

use thiserror::Error;

/// Failure modes of [`crate::lockfile`].
#[derive(Debug, Error)]
pub enum LockfileError {
  #[error("no lockfile found (searched explicit path, LCU_LOCKFILE, default install locations, running processes)")]
  NotFound,
  #[error("lockfile at {path} has {found} fields, expected 5")]
  Malformed { path: PathBuf, found: usize },
  #[error("lockfile at {path} has a non-numeric pid or port field")]
  BadNumericField { path: PathBuf },
  #[error("failed to read lockfile at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// Failure modes of [`crate::connection`] and [`crate::api_client`].
#[derive(Debug, Error)]
pub enum ConnectionError {
  #[error("connection is dead and could not be refreshed")]
  Dead,
  #[error("insecure TLS client requires a loopback base URL, got {0}")]
  InsecureClientRequiresLoopback(String),
  #[error("transport error: {0}")]
  Transport(#[from] reqwest::Error),
  #[error(transparent)]
  Lockfile(#[from] LockfileError),
}

/// Failure modes of [`crate::skin_resolver`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SkinResolveError {
  #[error("champion {0} is not known to the name database")]
  ChampionNotKnown(u32),
  #[error("skin hint did not resolve to a known skin id for champion {0}")]
  SkinNotResolved(u32),
  #[error("no archive on disk for champion {champion_id} skin {skin_id}")]
  ArchiveMissing { champion_id: u32, skin_id: u32 },
}

/// Failure modes of [`crate::prebuilder`].
#[derive(Debug, Error)]
pub enum PrebuildError {
  #[error("mod-tools executable not found at {0}")]
  ToolMissing(PathBuf),
  #[error("mkoverlay failed for {mod_name} with exit code {code:?}: {stderr}")]
  ToolFailed {
    mod_name: String,
    code: Option<i32>,
    stderr: String,
  },
  #[error("mkoverlay for {0} timed out")]
  Timeout(String),
  #[error("io error while staging {mod_name}: {source}")]
  Io {
    mod_name: String,
    #[source]
    source: std::io::Error,
  },
}

/// Failure modes of [`crate::overlay_runner`].
#[derive(Debug, Error)]
pub enum InjectionError {
  #[error("runoverlay executable not found at {0}")]
  RunnerMissing(PathBuf),
  #[error("failed to spawn overlay process: {0}")]
  SpawnFailed(#[source] std::io::Error),
  #[error("overlay process did not exit within the shutdown budget")]
  StopTimedOut,
}

/// Fatal, process-terminating conditions raised during bootstrap.
#[derive(Debug, Error)]
pub enum FatalError {
  #[error("another instance is already running (lock held at {0})")]
  AlreadyRunning(PathBuf),
  #[error("app-data directory is not writable: {0}")]
  AppDataUnwritable(PathBuf),
  #[error("configuration error: {0}")]
  Config(String),
  #[error(transparent)]
  Lockfile(#[from] LockfileError),
}

/// Top-level error unifying every subsystem, used only at boundaries that
/// must report a single exit code (bootstrap, CLI).
#[derive(Debug, Error)]
pub enum RoseError {
  #[error(transparent)]
  Fatal(#[from] FatalError),
  #[error(transparent)]
  Connection(#[from] ConnectionError),
  #[error(transparent)]
  Prebuild(#[from] PrebuildError),
  #[error(transparent)]
  Injection(#[from] InjectionError),
}

impl RoseError {
  /// Maps a top-level failure to a process exit code per the CLI contract:
  /// 0 normal, 1 fatal init error.
  pub fn exit_code(&self) -> i32 {
    match self {
      RoseError::Fatal(_) => 1,
      _ => 1,
    }
  }
}
