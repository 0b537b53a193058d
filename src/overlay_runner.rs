//! C9 — Overlay Runner.
//!
//! Owns the `runoverlay` child process mounting the committed overlay
//! filesystem over the game's. Exactly one instance should be alive at a
//! time; the Phase Tracker calls `stop_if_running` on both champ-select
//! re-entry and end-of-game so a stale mount never outlives its match.
//! `stop_if_running` only reaps a child this process itself spawned —
//! recovering an orphan left by a *prior crashed run* is a separate,
//! OS-level concern handled by `kill_stale_processes`.

use std::path::PathBuf;
use std::process::Child;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::error::InjectionError;
use crate::mod_tools::ModTools;

const STOP_WAIT_TIMEOUT: Duration = Duration::from_secs(10);
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct OverlayRunner {
  tools: ModTools,
  game_dir: PathBuf,
  child: Mutex<Option<Child>>,
}

impl OverlayRunner {
  pub fn new(tools_dir: PathBuf, game_dir: PathBuf) -> Self {
    OverlayRunner {
      tools: ModTools::new(tools_dir),
      game_dir,
      child: Mutex::new(None),
    }
  }

  /// Starts `runoverlay` over `overlay_dir`, stopping any prior instance
  /// first. The caller is expected to already hold the commit decision;
  /// this call is fire-and-forget beyond spawning.
  pub fn start(&self, overlay_dir: &std::path::Path) -> Result<(), InjectionError> {
    self.stop_if_running()?;
    let child = self.tools.spawn_runoverlay(overlay_dir, &self.game_dir)?;
    info!(overlay = %overlay_dir.display(), pid = child.id(), "overlay runner started");
    *self.child.lock().unwrap() = Some(child);
    Ok(())
  }

  /// Idempotent: a call with nothing running is a no-op success. Kills
  /// the child and polls `try_wait` up to [`STOP_WAIT_TIMEOUT`] before
  /// giving up, reporting [`InjectionError::StopTimedOut`] if the
  /// process still hasn't been reaped by then.
  pub fn stop_if_running(&self) -> Result<(), InjectionError> {
    let mut guard = self.child.lock().unwrap();
    let Some(mut child) = guard.take() else {
      return Ok(());
    };

    let _ = child.kill();

    let deadline = Instant::now() + STOP_WAIT_TIMEOUT;
    loop {
      match child.try_wait() {
        Ok(Some(status)) => {
          info!(code = ?status.code(), "overlay runner exited");
          return Ok(());
        }
        Ok(None) => {
          if Instant::now() >= deadline {
            warn!("overlay runner did not exit within shutdown budget");
            *guard = Some(child);
            return Err(InjectionError::StopTimedOut);
          }
          std::thread::sleep(STOP_POLL_INTERVAL);
        }
        Err(_) => return Ok(()),
      }
    }
  }

  pub fn is_running(&self) -> bool {
    self.child.lock().unwrap().is_some()
  }

  /// Diagnostic recovery from a prior crashed session (S5): kills any
  /// `mod-tools` process still running that this instance did not spawn.
  /// `stop_if_running` alone cannot see these — it only reaps `self.child`
  /// — so callers needing the full stale-overlay guarantee (supervisor
  /// startup, champ-select re-entry) should call both.
  pub fn kill_stale_processes(&self) -> usize {
    let killed = self.tools.kill_stale_processes();
    if killed > 0 {
      warn!(killed, "terminated stale mod-tools process(es) from a prior run");
    }
    killed
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn stop_when_nothing_running_is_a_no_op() {
    let tmp = tempfile::tempdir().unwrap();
    let runner = OverlayRunner::new(tmp.path().join("tools"), tmp.path().join("game"));
    assert!(runner.stop_if_running().is_ok());
    assert!(!runner.is_running());
  }

  #[test]
  fn kill_stale_processes_never_panics_when_none_are_running() {
    let tmp = tempfile::tempdir().unwrap();
    let runner = OverlayRunner::new(tmp.path().join("tools"), tmp.path().join("game"));
    runner.kill_stale_processes();
  }
}
