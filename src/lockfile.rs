//! C1 — Lockfile Locator.
//!
//! Finds and parses the game client's per-session credentials file. The
//! file is five colon-separated fields written by the client at process
//! start and removed on exit; its mtime is the one signal that credentials
//! rotated (client restarted) and the whole [`crate::connection::Connection`]
//! must be rebuilt.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;

use crate::error::LockfileError;

const LOCKFILE_NAMES: &[&str] = &["lockfile", "LeagueClientUx.lockfile", "LeagueClient.lockfile"];

const DEFAULT_INSTALL_LOCATIONS: &[&str] = &[
  r"C:\Riot Games\League of Legends",
  r"C:\Program Files\Riot Games\League of Legends",
  r"C:\Program Files (x86)\Riot Games\League of Legends",
];

const CLIENT_PROCESS_NAMES: &[&str] = &["LeagueClientUx.exe", "LeagueClient.exe"];

/// Five colon-separated fields written by the client at session start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lockfile {
  pub process_name: String,
  pub pid: u32,
  pub port: u16,
  pub password: String,
  pub protocol: String,
  pub path: PathBuf,
  pub mtime: SystemTime,
}

impl Lockfile {
  /// Splits `contents` on `:` and validates field count and numeric fields.
  /// Pure parsing — no filesystem access — so it can be property-tested
  /// directly against arbitrary strings.
  pub fn parse(contents: &str, path: &Path, mtime: SystemTime) -> Result<Self, LockfileError> {
    let fields: Vec<&str> = contents.trim().split(':').collect();
    if fields.len() < 5 {
      return Err(LockfileError::Malformed {
        path: path.to_path_buf(),
        found: fields.len(),
      });
    }

    let pid = fields[1]
      .parse::<u32>()
      .map_err(|_| LockfileError::BadNumericField { path: path.to_path_buf() })?;
    let port = fields[2]
      .parse::<u16>()
      .map_err(|_| LockfileError::BadNumericField { path: path.to_path_buf() })?;

    Ok(Lockfile {
      process_name: fields[0].to_string(),
      pid,
      port,
      password: fields[3].to_string(),
      protocol: fields[4].to_string(),
      path: path.to_path_buf(),
      mtime,
    })
  }

  pub fn base_url(&self) -> String {
    format!("https://127.0.0.1:{}", self.port)
  }
}

/// Finds, reads, and parses the lockfile using the search order: explicit
/// path, `LCU_LOCKFILE` env var, fixed install locations, then a process
/// scan for the client executable.
pub fn locate(explicit_path: Option<&Path>, league_install_hint: Option<&Path>) -> Result<Lockfile, LockfileError> {
  let path = find_path(explicit_path, league_install_hint)?;
  read_and_parse(&path)
}

fn find_path(explicit_path: Option<&Path>, league_install_hint: Option<&Path>) -> Result<PathBuf, LockfileError> {
  if let Some(p) = explicit_path {
    if p.exists() {
      return Ok(p.to_path_buf());
    }
  }

  if let Ok(env_path) = std::env::var("LCU_LOCKFILE") {
    let p = PathBuf::from(env_path);
    if p.exists() {
      return Ok(p);
    }
  }

  let mut search_dirs: Vec<PathBuf> = Vec::new();
  if let Some(hint) = league_install_hint {
    search_dirs.push(hint.to_path_buf());
  }
  search_dirs.extend(DEFAULT_INSTALL_LOCATIONS.iter().map(PathBuf::from));

  for dir in &search_dirs {
    for name in LOCKFILE_NAMES {
      let candidate = dir.join(name);
      if candidate.exists() {
        return Ok(candidate);
      }
    }
  }

  if let Some(dir) = scan_running_client() {
    for name in LOCKFILE_NAMES {
      let candidate = dir.join(name);
      if candidate.exists() {
        return Ok(candidate);
      }
    }
    if let Some(parent) = dir.parent() {
      for name in LOCKFILE_NAMES {
        let candidate = parent.join(name);
        if candidate.exists() {
          return Ok(candidate);
        }
      }
    }
  }

  Err(LockfileError::NotFound)
}

#[cfg(target_os = "windows")]
fn scan_running_client() -> Option<PathBuf> {
  // Best-effort: walk process snapshots looking for one of the client's
  // executable names and return its containing directory.
  use std::mem::size_of;
  use windows::Win32::Foundation::CloseHandle;
  use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W, TH32CS_SNAPPROCESS,
  };

  unsafe {
    let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0).ok()?;
    let mut entry = PROCESSENTRY32W {
      dwSize: size_of::<PROCESSENTRY32W>() as u32,
      ..Default::default()
    };

    let mut found = None;
    if Process32FirstW(snapshot, &mut entry).is_ok() {
      loop {
        let exe_name = String::from_utf16_lossy(
          &entry.szExeFile[..entry.szExeFile.iter().position(|&c| c == 0).unwrap_or(0)],
        );
        if CLIENT_PROCESS_NAMES.iter().any(|n| n.eq_ignore_ascii_case(&exe_name)) {
          if let Some(dir) = process_executable_dir(entry.th32ProcessID) {
            found = Some(dir);
            break;
          }
        }
        if Process32NextW(snapshot, &mut entry).is_err() {
          break;
        }
      }
    }
    let _ = CloseHandle(snapshot);
    found
  }
}

#[cfg(target_os = "windows")]
fn process_executable_dir(pid: u32) -> Option<PathBuf> {
  use windows::Win32::Foundation::CloseHandle;
  use windows::Win32::System::ProcessStatus::K32GetModuleFileNameExW;
  use windows::Win32::System::Threading::{OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION, PROCESS_VM_READ};

  unsafe {
    let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION | PROCESS_VM_READ, false, pid).ok()?;
    let mut buf = [0u16; 1024];
    let len = K32GetModuleFileNameExW(handle, None, &mut buf);
    let _ = CloseHandle(handle);
    if len == 0 {
      return None;
    }
    let exe_path = PathBuf::from(String::from_utf16_lossy(&buf[..len as usize]));
    exe_path.parent().map(|p| p.to_path_buf())
  }
}

#[cfg(not(target_os = "windows"))]
fn scan_running_client() -> Option<PathBuf> {
  None
}

fn read_and_parse(path: &Path) -> Result<Lockfile, LockfileError> {
  let metadata = std::fs::metadata(path).map_err(|e| LockfileError::Io {
    path: path.to_path_buf(),
    source: e,
  })?;
  let mtime = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
  let contents = std::fs::read_to_string(path).map_err(|e| LockfileError::Io {
    path: path.to_path_buf(),
    source: e,
  })?;
  debug!(path = %path.display(), "parsed lockfile");
  Lockfile::parse(&contents, path, mtime)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::path::PathBuf;

  fn path() -> PathBuf {
    PathBuf::from("/tmp/lockfile")
  }

  #[test]
  fn parses_well_formed_five_field_line() {
    let lf = Lockfile::parse("LeagueClient:2345:54321:shhhh:https", &path(), SystemTime::now()).unwrap();
    assert_eq!(lf.process_name, "LeagueClient");
    assert_eq!(lf.pid, 2345);
    assert_eq!(lf.port, 54321);
    assert_eq!(lf.password, "shhhh");
    assert_eq!(lf.protocol, "https");
    assert_eq!(lf.base_url(), "https://127.0.0.1:54321");
  }

  #[test]
  fn rejects_too_few_fields() {
    let err = Lockfile::parse("LeagueClient:2345:54321", &path(), SystemTime::now()).unwrap_err();
    assert!(matches!(err, LockfileError::Malformed { found: 3, .. }));
  }

  #[test]
  fn rejects_non_numeric_port() {
    let err = Lockfile::parse("LeagueClient:2345:notaport:shhhh:https", &path(), SystemTime::now()).unwrap_err();
    assert!(matches!(err, LockfileError::BadNumericField { .. }));
  }

  #[test]
  fn rejects_non_numeric_pid() {
    let err = Lockfile::parse("LeagueClient:notapid:54321:shhhh:https", &path(), SystemTime::now()).unwrap_err();
    assert!(matches!(err, LockfileError::BadNumericField { .. }));
  }
}

#[cfg(test)]
mod proptests {
  use super::*;
  use proptest::prelude::*;

  proptest! {
    #[test]
    fn roundtrips_any_five_numeric_field_line(
      name in "[a-zA-Z]{1,12}",
      pid in 1u32..999_999,
      port in 1u16..=65535,
      password in "[a-zA-Z0-9]{1,32}",
      protocol in "(https|wss)",
    ) {
      let line = format!("{}:{}:{}:{}:{}", name, pid, port, password, protocol);
      let lf = Lockfile::parse(&line, &PathBuf::from("x"), SystemTime::now()).unwrap();
      prop_assert_eq!(lf.process_name, name);
      prop_assert_eq!(lf.pid, pid);
      prop_assert_eq!(lf.port, port);
      prop_assert_eq!(lf.password, password);
      prop_assert_eq!(lf.protocol, protocol);
    }

    #[test]
    fn rejects_fewer_than_five_fields(
      fields in prop::collection::vec("[a-zA-Z0-9]{1,8}", 0..5),
    ) {
      let line = fields.join(":");
      let result = Lockfile::parse(&line, &PathBuf::from("x"), SystemTime::now());
      prop_assert!(result.is_err());
    }
  }
}
