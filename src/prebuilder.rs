//! C7 — Pre-Builder.
//!
//! When the local player locks their champion, eagerly builds overlay
//! filesystems for every unowned mod of that champion so the later
//! commit step is near-instant. Grounded on the source's
//! `ChampionPreBuilder`: per-job thread-scoped staging directories, a
//! short-poll completion loop so cancellation is honored within ~100ms,
//! and a `building_lock` guarding only the shared bookkeeping fields —
//! never the filesystem work itself.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::mod_tools::ModTools;
use crate::name_db::NameDatabase;
use crate::skin_resolver::{ArchiveCandidate, SkinResolver};

const DEFAULT_THREAD_COUNT: usize = 4;
/// Champions whose VFX-heavy mods warrant a smaller worker pool to avoid
/// memory pressure during simultaneous mkoverlay invocations.
const CHAMPIONS_USE_2_THREADS: &[&str] = &["Aurelion Sol", "Viktor", "Yone"];
const CHAMPIONS_USE_3_THREADS: &[&str] = &["Gwen", "Seraphine"];

const PER_JOB_TIMEOUT: Duration = Duration::from_secs(60);
const CANCELLATION_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Default)]
struct BuildBookkeeping {
  current_champion: Option<String>,
  job_count: usize,
  completed_count: usize,
}

pub struct PreBuilder {
  tools: ModTools,
  game_dir: PathBuf,
  skins_root: PathBuf,
  staging_root: PathBuf,
  prebuilt_root: PathBuf,
  name_db: Arc<dyn NameDatabase>,
  building_lock: Mutex<BuildBookkeeping>,
  build_generation: std::sync::atomic::AtomicU64,
}

struct JobOutcome {
  skin_label: String,
  success: bool,
  overlay_dir: Option<PathBuf>,
}

impl PreBuilder {
  pub fn new(
    tools_dir: PathBuf,
    game_dir: PathBuf,
    skins_root: PathBuf,
    staging_root: PathBuf,
    name_db: Arc<dyn NameDatabase>,
  ) -> Self {
    let prebuilt_root = staging_root.join("prebuilt");
    let _ = std::fs::create_dir_all(&prebuilt_root);
    PreBuilder {
      tools: ModTools::new(tools_dir),
      game_dir,
      skins_root,
      staging_root,
      prebuilt_root,
      name_db,
      building_lock: Mutex::new(BuildBookkeeping::default()),
      build_generation: std::sync::atomic::AtomicU64::new(0),
    }
  }

  fn recommended_threads(champion_name: &str) -> usize {
    if CHAMPIONS_USE_2_THREADS.contains(&champion_name) {
      2
    } else if CHAMPIONS_USE_3_THREADS.contains(&champion_name) {
      3
    } else {
      DEFAULT_THREAD_COUNT
    }
  }

  /// Path to the pre-built overlay for `(champion_name, skin_label)`, if
  /// a successful build is at rest for it.
  pub fn prebuilt_overlay_path(&self, champion_name: &str, skin_label: &str) -> Option<PathBuf> {
    let path = self.prebuilt_root.join(format!("{champion_name}_{skin_label}"));
    path.is_dir().then_some(path)
  }

  /// Any one successfully pre-built overlay for `champion_name`, used by
  /// the Commit Controller's random-mode fallback when no specific skin
  /// id was hovered or confirmed. Returns the parsed skin id and its path.
  pub fn any_prebuilt_overlay(&self, champion_name: &str) -> Option<(u32, PathBuf)> {
    let entries = std::fs::read_dir(&self.prebuilt_root).ok()?;
    let prefix = format!("{champion_name}_");
    for entry in entries.flatten() {
      let path = entry.path();
      if !path.is_dir() {
        continue;
      }
      let Some(name) = entry.file_name().to_str().map(str::to_string) else {
        continue;
      };
      let Some(label) = name.strip_prefix(&prefix) else {
        continue;
      };
      let skin_id = label.split('_').next().and_then(|s| s.parse::<u32>().ok());
      if let Some(skin_id) = skin_id {
        return Some((skin_id, path));
      }
    }
    None
  }

  /// Idempotent per champion: a call for the champion currently building
  /// is a no-op. A call for a different champion cancels the current
  /// build first (happens-before its own cleanup, per the ordering
  /// guarantee in SPEC_FULL.md §5) and starts a fresh one, blocking the
  /// calling thread until all jobs for this champion have completed or
  /// been cancelled.
  pub fn prebuild(&self, champion_name: String, champion_id: u32, owned_skin_ids: HashSet<u32>) -> bool {
    {
      let bookkeeping = self.building_lock.lock().unwrap();
      if bookkeeping.current_champion.as_deref() == Some(champion_name.as_str()) {
        debug!(champion_name, "prebuild already in progress for this champion");
        return false;
      }
    }

    self.cancel_current_build();
    let generation = self.build_generation.fetch_add(1, Ordering::SeqCst) + 1;

    let resolver = SkinResolver::new(&self.skins_root, self.name_db.as_ref());
    let candidates = resolver.candidates(champion_id, &owned_skin_ids);
    if candidates.is_empty() {
      warn!(champion_name, "no unowned skins found, nothing to prebuild");
      return false;
    }

    let max_workers = Self::recommended_threads(&champion_name);
    info!(champion_name, count = candidates.len(), max_workers, "starting prebuild");

    {
      let mut bookkeeping = self.building_lock.lock().unwrap();
      bookkeeping.current_champion = Some(champion_name.clone());
      bookkeeping.job_count = candidates.len();
      bookkeeping.completed_count = 0;
    }

    let successful = self.run_jobs(&champion_name, &candidates, max_workers, generation);

    {
      let mut bookkeeping = self.building_lock.lock().unwrap();
      if bookkeeping.current_champion.as_deref() == Some(champion_name.as_str()) {
        bookkeeping.current_champion = None;
      }
    }

    // A generation bump since this batch started means some later call to
    // `cancel_current_build`/`prebuild` superseded us — detect that by
    // comparing our own captured generation rather than a shared flag,
    // which a newer batch's own reset would otherwise race.
    if self.build_generation.load(Ordering::SeqCst) != generation {
      self.cleanup_champion_overlays(&champion_name);
    }

    info!(champion_name, successful, total = candidates.len(), "prebuild finished");
    successful > 0
  }

  fn run_jobs(&self, champion_name: &str, candidates: &[ArchiveCandidate], max_workers: usize, generation: u64) -> usize {
    let (tx, rx) = mpsc::channel::<JobOutcome>();
    let pool = rayon::ThreadPoolBuilder::new()
      .num_threads(max_workers)
      .build()
      .expect("failed to build prebuild worker pool");

    pool.scope(|scope| {
      for (idx, candidate) in candidates.iter().enumerate() {
        if self.build_generation.load(Ordering::SeqCst) != generation {
          break;
        }
        let tx = tx.clone();
        scope.spawn(move |_| {
          if self.build_generation.load(Ordering::SeqCst) != generation {
            return;
          }
          let outcome = self.build_single_overlay(champion_name, candidate, idx);
          let _ = tx.send(outcome);
        });
      }
    });
    drop(tx);

    let mut successful = 0;
    loop {
      match rx.recv_timeout(CANCELLATION_POLL_INTERVAL) {
        Ok(outcome) => {
          let mut bookkeeping = self.building_lock.lock().unwrap();
          bookkeeping.completed_count += 1;
          if outcome.success {
            successful += 1;
            debug!(skin = outcome.skin_label, "prebuild job succeeded");
          } else {
            warn!(skin = outcome.skin_label, "prebuild job failed");
          }
          if bookkeeping.completed_count >= bookkeeping.job_count {
            break;
          }
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
          if self.build_generation.load(Ordering::SeqCst) != generation {
            break;
          }
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => break,
      }
    }

    successful
  }

  fn build_single_overlay(&self, champion_name: &str, candidate: &ArchiveCandidate, thread_idx: usize) -> JobOutcome {
    let skin_label = match candidate.chroma_id {
      Some(chroma) => format!("{}_{}", candidate.skin_id, chroma),
      None => candidate.skin_id.to_string(),
    };

    let thread_base = self.prebuilt_root.join(format!("{champion_name}_thread_{thread_idx}"));
    let mods_dir = thread_base.join("mods");
    let overlay_dir = thread_base.join("overlay");

    let result = (|| -> Result<PathBuf, crate::error::PrebuildError> {
      let _ = std::fs::remove_dir_all(&thread_base);
      std::fs::create_dir_all(&mods_dir).map_err(|e| crate::error::PrebuildError::Io {
        mod_name: skin_label.clone(),
        source: e,
      })?;
      std::fs::create_dir_all(&overlay_dir).map_err(|e| crate::error::PrebuildError::Io {
        mod_name: skin_label.clone(),
        source: e,
      })?;

      let mod_name = extract_archive_to_mods_dir(&candidate.archive_path, &mods_dir)?;

      self.tools.mkoverlay(&mods_dir, &overlay_dir, &self.game_dir, &mod_name, PER_JOB_TIMEOUT)?;

      let final_dir = self.prebuilt_root.join(format!("{champion_name}_{skin_label}"));
      let _ = std::fs::remove_dir_all(&final_dir);
      std::fs::rename(&overlay_dir, &final_dir).map_err(|e| crate::error::PrebuildError::Io {
        mod_name: skin_label.clone(),
        source: e,
      })?;
      Ok(final_dir)
    })();

    let _ = std::fs::remove_dir_all(&thread_base);

    match result {
      Ok(dir) => JobOutcome { skin_label, success: true, overlay_dir: Some(dir) },
      Err(e) => {
        warn!(skin = skin_label, error = %e, "prebuild job error");
        JobOutcome { skin_label, success: false, overlay_dir: None }
      }
    }
  }

  /// Cancels any in-flight build. Pending jobs observe the bumped
  /// generation and skip; running jobs are left to finish under their
  /// own subprocess timeout, never killed mid-flight — cancellation is
  /// cooperative, per SPEC_FULL.md §5.
  pub fn cancel_current_build(&self) {
    self.build_generation.fetch_add(1, Ordering::SeqCst);

    let champion = self.building_lock.lock().unwrap().current_champion.clone();
    if let Some(champion) = champion {
      info!(champion, "cancelling in-progress prebuild");
    }
  }

  fn cleanup_champion_overlays(&self, champion_name: &str) {
    let Ok(entries) = std::fs::read_dir(&self.prebuilt_root) else {
      return;
    };
    let prefix = format!("{champion_name}_");
    for entry in entries.flatten() {
      if let Some(name) = entry.file_name().to_str() {
        if name.starts_with(&prefix) {
          let _ = std::fs::remove_dir_all(entry.path());
        }
      }
    }
  }
}

/// Extracts `archive_path` into a fresh directory under `mods_dir` named
/// after the archive stem, returning that directory's name for use as
/// the `--mods:` argument to `mkoverlay`. Uses a memory-mapped reader for
/// archives above 1MB, matching the source's size-based extraction
/// strategy switch.
fn extract_archive_to_mods_dir(archive_path: &Path, mods_dir: &Path) -> Result<String, crate::error::PrebuildError> {
  let mod_name = archive_path
    .file_stem()
    .and_then(|s| s.to_str())
    .unwrap_or("mod")
    .to_string();
  let target_dir = mods_dir.join(&mod_name);
  std::fs::create_dir_all(&target_dir).map_err(|e| crate::error::PrebuildError::Io {
    mod_name: mod_name.clone(),
    source: e,
  })?;

  let metadata = std::fs::metadata(archive_path).map_err(|e| crate::error::PrebuildError::Io {
    mod_name: mod_name.clone(),
    source: e,
  })?;

  if metadata.len() > 1_048_576 {
    extract_zip_mmap(archive_path, &target_dir, &mod_name)?;
  } else {
    extract_zip_direct(archive_path, &target_dir, &mod_name)?;
  }

  Ok(mod_name)
}

fn extract_zip_direct(archive_path: &Path, target_dir: &Path, mod_name: &str) -> Result<(), crate::error::PrebuildError> {
  let file = std::fs::File::open(archive_path).map_err(|e| crate::error::PrebuildError::Io {
    mod_name: mod_name.to_string(),
    source: e,
  })?;
  let mut archive = zip::ZipArchive::new(file).map_err(|e| crate::error::PrebuildError::Io {
    mod_name: mod_name.to_string(),
    source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
  })?;
  archive.extract(target_dir).map_err(|e| crate::error::PrebuildError::Io {
    mod_name: mod_name.to_string(),
    source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
  })
}

fn extract_zip_mmap(archive_path: &Path, target_dir: &Path, mod_name: &str) -> Result<(), crate::error::PrebuildError> {
  let file = std::fs::File::open(archive_path).map_err(|e| crate::error::PrebuildError::Io {
    mod_name: mod_name.to_string(),
    source: e,
  })?;
  let mmap = unsafe {
    memmap2::Mmap::map(&file).map_err(|e| crate::error::PrebuildError::Io {
      mod_name: mod_name.to_string(),
      source: e,
    })?
  };
  let cursor = std::io::Cursor::new(&mmap[..]);
  let mut archive = zip::ZipArchive::new(cursor).map_err(|e| crate::error::PrebuildError::Io {
    mod_name: mod_name.to_string(),
    source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
  })?;
  archive.extract(target_dir).map_err(|e| crate::error::PrebuildError::Io {
    mod_name: mod_name.to_string(),
    source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn recommended_threads_uses_per_champion_table() {
    assert_eq!(PreBuilder::recommended_threads("Viktor"), 2);
    assert_eq!(PreBuilder::recommended_threads("Gwen"), 3);
    assert_eq!(PreBuilder::recommended_threads("Ashe"), DEFAULT_THREAD_COUNT);
  }

  fn builder() -> (tempfile::TempDir, PreBuilder) {
    let tmp = tempfile::tempdir().unwrap();
    let builder = PreBuilder::new(
      tmp.path().join("tools"),
      tmp.path().join("game"),
      tmp.path().join("skins"),
      tmp.path().join("staging"),
      Arc::new(crate::name_db::InMemoryNameDatabase::new()),
    );
    (tmp, builder)
  }

  #[test]
  fn cancel_current_build_strictly_advances_generation() {
    let (_tmp, builder) = builder();
    let before = builder.build_generation.load(Ordering::SeqCst);
    builder.cancel_current_build();
    builder.cancel_current_build();
    assert!(builder.build_generation.load(Ordering::SeqCst) > before + 1);
  }

  #[test]
  fn superseded_batch_is_detected_by_its_own_captured_generation_not_a_shared_flag() {
    // Reproduces scenario S2: batch A captures its generation, batch B
    // (a different champion lock) calls cancel_current_build and starts
    // its own batch afterwards. A's captured generation must compare
    // unequal to the now-current generation even though nothing ever
    // resets a shared boolean A could race against.
    let (_tmp, builder) = builder();
    let generation_a = builder.build_generation.fetch_add(1, Ordering::SeqCst) + 1;

    builder.cancel_current_build();
    let _generation_b = builder.build_generation.fetch_add(1, Ordering::SeqCst) + 1;

    assert_ne!(builder.build_generation.load(Ordering::SeqCst), generation_a);
  }

  #[test]
  fn cleanup_champion_overlays_removes_only_matching_prefix() {
    let (_tmp, builder) = builder();
    std::fs::create_dir_all(builder.prebuilt_root.join("Garen_86001")).unwrap();
    std::fs::create_dir_all(builder.prebuilt_root.join("Garen_86002")).unwrap();
    std::fs::create_dir_all(builder.prebuilt_root.join("GarenTop_1")).unwrap();

    builder.cleanup_champion_overlays("Garen");

    assert!(!builder.prebuilt_root.join("Garen_86001").exists());
    assert!(!builder.prebuilt_root.join("Garen_86002").exists());
    assert!(builder.prebuilt_root.join("GarenTop_1").exists(), "differently-prefixed dir must survive");
  }
}
