//! C2 — Connection.
//!
//! Holds an authenticated HTTPS session against the loopback LCU endpoint
//! and knows how to rebuild itself when the lockfile rotates. Two
//! observable states: live and dead; the only path from dead back to live
//! is re-reading the lockfile.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use base64::Engine;
use tracing::{debug, info, warn};

use crate::error::ConnectionError;
use crate::lockfile::{self, Lockfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
  Live,
  Dead,
}

pub struct Connection {
  client: reqwest::blocking::Client,
  lockfile: Lockfile,
  status: ConnectionStatus,
  explicit_path: Option<PathBuf>,
  league_install_hint: Option<PathBuf>,
}

impl Connection {
  /// Builds a new session from a freshly located lockfile. Fails
  /// construction if the resolved base is not the loopback address —
  /// the insecure-TLS relaxation below must never apply to anything else.
  pub fn establish(
    explicit_path: Option<&Path>,
    league_install_hint: Option<&Path>,
  ) -> Result<Self, ConnectionError> {
    let lockfile = lockfile::locate(explicit_path, league_install_hint)?;
    let client = build_insecure_loopback_client(&lockfile.base_url())?;
    info!(port = lockfile.port, "connection established");
    Ok(Connection {
      client,
      lockfile,
      status: ConnectionStatus::Live,
      explicit_path: explicit_path.map(Path::to_path_buf),
      league_install_hint: league_install_hint.map(Path::to_path_buf),
    })
  }

  pub fn status(&self) -> ConnectionStatus {
    self.status
  }

  pub fn base_url(&self) -> String {
    self.lockfile.base_url()
  }

  pub fn auth_header(&self) -> String {
    let token = format!("riot:{}", self.lockfile.password);
    format!("Basic {}", base64::engine::general_purpose::STANDARD.encode(token))
  }

  pub fn port(&self) -> u16 {
    self.lockfile.port
  }

  pub fn password(&self) -> &str {
    &self.lockfile.password
  }

  pub fn client(&self) -> &reqwest::blocking::Client {
    &self.client
  }

  /// Re-reads and re-parses the lockfile if `force` is set, the explicit
  /// path changed, or the file's mtime advanced; on any change the
  /// session is rebuilt atomically. A no-op when nothing changed and the
  /// session is already live — see property 2 in the testable-properties
  /// list.
  pub fn refresh_if_needed(&mut self, force: bool) -> Result<(), ConnectionError> {
    if !force && self.status == ConnectionStatus::Live {
      if let Ok(meta) = std::fs::metadata(&self.lockfile.path) {
        let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        if mtime == self.lockfile.mtime {
          return Ok(());
        }
      }
    }

    match lockfile::locate(self.explicit_path.as_deref(), self.league_install_hint.as_deref()) {
      Ok(new_lockfile) => {
        let rotated = new_lockfile.path != self.lockfile.path || new_lockfile.mtime != self.lockfile.mtime;
        if force || rotated || self.status == ConnectionStatus::Dead {
          let client = build_insecure_loopback_client(&new_lockfile.base_url())?;
          self.client = client;
          self.lockfile = new_lockfile;
          self.status = ConnectionStatus::Live;
          info!("connection rebuilt after lockfile change");
        }
        Ok(())
      }
      Err(e) => {
        warn!(error = %e, "failed to refresh connection, marking dead");
        self.status = ConnectionStatus::Dead;
        Err(ConnectionError::Dead)
      }
    }
  }

  /// Marks the connection dead; called by the API client on unrecoverable
  /// transport failure so the next call attempts a refresh.
  pub fn mark_dead(&mut self) {
    debug!("connection marked dead");
    self.status = ConnectionStatus::Dead;
  }

  /// Test-only fixture: a connection with no real lockfile behind it, so
  /// any call that reaches the network fails and refresh always fails.
  /// Lets handler-level tests exercise the no-op paths of code that takes
  /// an `&Arc<Mutex<Connection>>` without a running LCU to talk to.
  #[cfg(test)]
  pub fn offline_for_test() -> Self {
    Connection {
      client: reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_millis(50))
        .build()
        .expect("failed to build test client"),
      lockfile: Lockfile {
        process_name: "LeagueClientUx".to_string(),
        pid: 0,
        port: 1,
        password: "test".to_string(),
        protocol: "https".to_string(),
        path: PathBuf::from("/nonexistent"),
        mtime: SystemTime::UNIX_EPOCH,
      },
      status: ConnectionStatus::Dead,
      explicit_path: None,
      league_install_hint: None,
    }
  }
}

/// Dedicated constructor for the loopback-only, TLS-verification-disabled
/// client. Refuses any non-loopback base — isolating the one place in the
/// codebase allowed to build an "insecure" HTTP client, per the TLS
/// redesign note.
fn build_insecure_loopback_client(base_url: &str) -> Result<reqwest::blocking::Client, ConnectionError> {
  let parsed = url::Url::parse(base_url).map_err(|_| {
    ConnectionError::InsecureClientRequiresLoopback(base_url.to_string())
  })?;
  let is_loopback = matches!(parsed.host_str(), Some("127.0.0.1") | Some("localhost") | Some("::1"));
  if !is_loopback {
    return Err(ConnectionError::InsecureClientRequiresLoopback(base_url.to_string()));
  }

  reqwest::blocking::Client::builder()
    .danger_accept_invalid_certs(true)
    .timeout(std::time::Duration::from_secs(5))
    .build()
    .map_err(ConnectionError::Transport)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_non_loopback_base() {
    let err = build_insecure_loopback_client("https://example.com:1234").unwrap_err();
    assert!(matches!(err, ConnectionError::InsecureClientRequiresLoopback(_)));
  }

  #[test]
  fn accepts_loopback_base() {
    assert!(build_insecure_loopback_client("https://127.0.0.1:54321").is_ok());
  }
}
