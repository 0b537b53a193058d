//! Subprocess wrapper around the external `mkoverlay`/`runoverlay` tools.
//! Shared by the Pre-Builder (C7) and Overlay Runner (C9) so the exact
//! CLI argument shape and timeout/drain handling is defined once.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use tracing::{debug, error};

#[cfg(target_os = "windows")]
use std::os::windows::process::CommandExt;

#[cfg(target_os = "windows")]
pub const CREATE_NO_WINDOW: u32 = 0x0800_0000;

pub struct ModTools {
  tools_dir: PathBuf,
}

impl ModTools {
  pub fn new(tools_dir: PathBuf) -> Self {
    ModTools { tools_dir }
  }

  fn executable(&self, name: &str) -> PathBuf {
    #[cfg(target_os = "windows")]
    {
      self.tools_dir.join(format!("{name}.exe"))
    }
    #[cfg(not(target_os = "windows"))]
    {
      self.tools_dir.join(name)
    }
  }

  /// Invokes `mkoverlay <mods_dir> <overlay_dir> --game:<game_dir> --mods:<mod_name> --noTFT`
  /// with a bounded timeout, draining stdout/stderr on a background
  /// thread so a chatty tool can never deadlock the pipe.
  pub fn mkoverlay(
    &self,
    mods_dir: &Path,
    overlay_dir: &Path,
    game_dir: &Path,
    mod_name: &str,
    timeout: Duration,
  ) -> Result<(), crate::error::PrebuildError> {
    let exe = self.executable("mod-tools");
    if !exe.exists() {
      return Err(crate::error::PrebuildError::ToolMissing(exe));
    }

    let mut cmd = Command::new(&exe);
    cmd
      .arg("mkoverlay")
      .arg(mods_dir)
      .arg(overlay_dir)
      .arg(format!("--game:{}", game_dir.display()))
      .arg(format!("--mods:{mod_name}"))
      .arg("--noTFT")
      .stdout(Stdio::piped())
      .stderr(Stdio::piped());
    #[cfg(target_os = "windows")]
    cmd.creation_flags(CREATE_NO_WINDOW);

    let mut child = cmd.spawn().map_err(|e| crate::error::PrebuildError::Io {
      mod_name: mod_name.to_string(),
      source: e,
    })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let drain = std::thread::spawn(move || {
      use std::io::Read;
      let mut out = String::new();
      let mut err = String::new();
      if let Some(mut s) = stdout {
        let _ = s.read_to_string(&mut out);
      }
      if let Some(mut s) = stderr {
        let _ = s.read_to_string(&mut err);
      }
      (out, err)
    });

    let deadline = std::time::Instant::now() + timeout;
    let status = loop {
      match child.try_wait() {
        Ok(Some(status)) => break Some(status),
        Ok(None) => {
          if std::time::Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            break None;
          }
          std::thread::sleep(Duration::from_millis(50));
        }
        Err(_) => break None,
      }
    };

    let (_out, stderr_text) = drain.join().unwrap_or_default();

    match status {
      None => {
        error!(mod_name, "mkoverlay timed out");
        Err(crate::error::PrebuildError::Timeout(mod_name.to_string()))
      }
      Some(status) if status.success() => {
        debug!(mod_name, "mkoverlay completed successfully");
        Ok(())
      }
      Some(status) => {
        error!(mod_name, code = ?status.code(), stderr = stderr_text, "mkoverlay failed");
        Err(crate::error::PrebuildError::ToolFailed {
          mod_name: mod_name.to_string(),
          code: status.code(),
          stderr: stderr_text,
        })
      }
    }
  }

  /// Spawns `runoverlay <overlay_dir> --game:<game_dir>` and returns the
  /// child handle for the Overlay Runner to own.
  pub fn spawn_runoverlay(
    &self,
    overlay_dir: &Path,
    game_dir: &Path,
  ) -> Result<std::process::Child, crate::error::InjectionError> {
    let exe = self.executable("mod-tools");
    if !exe.exists() {
      return Err(crate::error::InjectionError::RunnerMissing(exe));
    }

    let mut cmd = Command::new(&exe);
    cmd
      .arg("runoverlay")
      .arg(overlay_dir)
      .arg(format!("--game:{}", game_dir.display()))
      .stdout(Stdio::null())
      .stderr(Stdio::null());
    #[cfg(target_os = "windows")]
    cmd.creation_flags(CREATE_NO_WINDOW);

    cmd.spawn().map_err(crate::error::InjectionError::SpawnFailed)
  }

  /// Kills any `mod-tools` process left running by a prior crashed
  /// session — neither `mkoverlay` nor `runoverlay` survives the process
  /// that spawned them dying, but the child itself is orphaned and keeps
  /// its overlay VFS mounted. Returns the number of processes terminated.
  /// Grounded on the source's `cleanup_mod_tools_processes`: a
  /// name-match kill on Windows, `pkill -f` elsewhere.
  pub fn kill_stale_processes(&self) -> usize {
    #[cfg(target_os = "windows")]
    {
      kill_stale_processes_windows()
    }
    #[cfg(not(target_os = "windows"))]
    {
      let _ = Command::new("pkill").args(["-f", "mod-tools"]).output();
      0
    }
  }
}

#[cfg(target_os = "windows")]
const STALE_PROCESS_NAMES: &[&str] = &["mod-tools.exe"];

/// Walks a process snapshot the same way `lockfile::scan_running_client`
/// locates the game client, but terminates every match instead of
/// returning its directory.
#[cfg(target_os = "windows")]
fn kill_stale_processes_windows() -> usize {
  use std::mem::size_of;
  use windows::Win32::Foundation::CloseHandle;
  use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W, TH32CS_SNAPPROCESS,
  };
  use windows::Win32::System::Threading::{OpenProcess, TerminateProcess, PROCESS_TERMINATE};

  unsafe {
    let Ok(snapshot) = CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) else {
      return 0;
    };
    let mut entry = PROCESSENTRY32W {
      dwSize: size_of::<PROCESSENTRY32W>() as u32,
      ..Default::default()
    };

    let mut killed = 0usize;
    if Process32FirstW(snapshot, &mut entry).is_ok() {
      loop {
        let exe_name = String::from_utf16_lossy(
          &entry.szExeFile[..entry.szExeFile.iter().position(|&c| c == 0).unwrap_or(0)],
        );
        if STALE_PROCESS_NAMES.iter().any(|n| n.eq_ignore_ascii_case(&exe_name)) {
          if let Ok(handle) = OpenProcess(PROCESS_TERMINATE, false, entry.th32ProcessID) {
            if TerminateProcess(handle, 1).is_ok() {
              killed += 1;
            }
            let _ = CloseHandle(handle);
          }
        }
        if Process32NextW(snapshot, &mut entry).is_err() {
          break;
        }
      }
    }
    let _ = CloseHandle(snapshot);
    killed
  }
}
