//! C6 — Skin Resolver.
//!
//! Maps a hovered-skin hint (name or id) to a local mod archive. Pure
//! given its inputs and the filesystem snapshot: it holds no mutable
//! process-wide cache of its own (that belongs to the Pre-Builder, which
//! tracks "have I already built this" at its own request scope).

use std::path::{Path, PathBuf};

use strsim::normalized_levenshtein;

use crate::error::SkinResolveError;
use crate::name_db::{normalize, NameDatabase};

const FUZZY_MATCH_THRESHOLD: f64 = 0.82;

/// A candidate mod archive for one unowned skin of the locked champion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveCandidate {
  pub champion_id: u32,
  pub skin_id: u32,
  pub chroma_id: Option<u32>,
  pub archive_path: PathBuf,
}

pub struct SkinResolver<'a> {
  skins_root: &'a Path,
  name_db: &'a dyn NameDatabase,
}

impl<'a> SkinResolver<'a> {
  pub fn new(skins_root: &'a Path, name_db: &'a dyn NameDatabase) -> Self {
    SkinResolver { skins_root, name_db }
  }

  /// Resolves a skin name hint to its skin id for `champion_id`: exact
  /// normalized match first, then fuzzy by normalized edit distance
  /// against the per-champion skin list.
  pub fn resolve_skin_id(&self, champion_id: u32, skin_name: &str) -> Result<u32, SkinResolveError> {
    let entries = self.name_db.skins_for_champion(champion_id);
    if entries.is_empty() {
      return Err(SkinResolveError::ChampionNotKnown(champion_id));
    }

    let target = normalize(skin_name);

    if let Some((id, _)) = entries.iter().find(|(_, name)| normalize(name) == target) {
      return Ok(*id);
    }

    let mut best: Option<(u32, f64)> = None;
    for (id, name) in &entries {
      let score = normalized_levenshtein(&target, &normalize(name));
      if best.map(|(_, best_score)| score > best_score).unwrap_or(true) {
        best = Some((*id, score));
      }
    }

    match best {
      Some((id, score)) if score >= FUZZY_MATCH_THRESHOLD => Ok(id),
      _ => Err(SkinResolveError::SkinNotResolved(champion_id)),
    }
  }

  /// Display name for `skin_id`, used to form archive paths when only
  /// the id is known.
  pub fn display_name(&self, champion_id: u32, skin_id: u32) -> Option<String> {
    self
      .name_db
      .skins_for_champion(champion_id)
      .into_iter()
      .find(|(id, _)| *id == skin_id)
      .map(|(_, name)| name)
  }

  /// Enumerates candidate archives for `champion_id` under
  /// `<skins-root>/<championId>/<skinId>/…`, filtering owned skins and
  /// unconditionally filtering base skins (`championId * 1000`).
  pub fn candidates(
    &self,
    champion_id: u32,
    owned_skin_ids: &std::collections::HashSet<u32>,
  ) -> Vec<ArchiveCandidate> {
    let base_skin_id = champion_id * 1000;
    let champion_dir = self.skins_root.join(champion_id.to_string());
    let Ok(entries) = std::fs::read_dir(&champion_dir) else {
      return Vec::new();
    };

    let mut candidates = Vec::new();
    for entry in entries.flatten() {
      let skin_dir = entry.path();
      if !skin_dir.is_dir() {
        continue;
      }
      let Some(skin_id) = skin_dir
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|s| s.parse::<u32>().ok())
      else {
        continue;
      };

      if skin_id == base_skin_id || owned_skin_ids.contains(&skin_id) {
        continue;
      }

      let base_archive = skin_dir.join(format!("{skin_id}.zip"));
      if base_archive.is_file() {
        candidates.push(ArchiveCandidate {
          champion_id,
          skin_id,
          chroma_id: None,
          archive_path: base_archive,
        });
      }

      if let Ok(chroma_entries) = std::fs::read_dir(&skin_dir) {
        for chroma_entry in chroma_entries.flatten() {
          let chroma_dir = chroma_entry.path();
          if !chroma_dir.is_dir() {
            continue;
          }
          let Some(chroma_id) = chroma_dir
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|s| s.parse::<u32>().ok())
          else {
            continue;
          };
          if owned_skin_ids.contains(&chroma_id) {
            continue;
          }
          let chroma_archive = chroma_dir.join(format!("{chroma_id}.zip"));
          if chroma_archive.is_file() {
            candidates.push(ArchiveCandidate {
              champion_id,
              skin_id,
              chroma_id: Some(chroma_id),
              archive_path: chroma_archive,
            });
          }
        }
      }
    }

    candidates
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::name_db::InMemoryNameDatabase;
  use std::collections::HashSet;
  use std::fs;

  fn archive_layout(dir: &Path, champion_id: u32, skin_ids: &[u32]) {
    for skin_id in skin_ids {
      let skin_dir = dir.join(champion_id.to_string()).join(skin_id.to_string());
      fs::create_dir_all(&skin_dir).unwrap();
      fs::write(skin_dir.join(format!("{skin_id}.zip")), b"fake-zip").unwrap();
    }
  }

  #[test]
  fn filters_owned_and_base_skins() {
    let tmp = tempfile::tempdir().unwrap();
    archive_layout(tmp.path(), 86, &[86000, 86001, 86002, 86003]);

    let db = InMemoryNameDatabase::new();
    let resolver = SkinResolver::new(tmp.path(), &db);

    let mut owned = HashSet::new();
    owned.insert(86002);

    let candidates = resolver.candidates(86, &owned);
    let ids: HashSet<u32> = candidates.iter().map(|c| c.skin_id).collect();

    assert!(!ids.contains(&86000), "base skin must never be a candidate");
    assert!(!ids.contains(&86002), "owned skin must be filtered");
    assert!(ids.contains(&86001));
    assert!(ids.contains(&86003));
  }

  #[test]
  fn resolves_exact_name_ignoring_case_and_whitespace() {
    let mut db = InMemoryNameDatabase::new();
    db.insert_skin(86, 86001, "God-King Darius");
    let resolver = SkinResolver::new(Path::new("."), &db);

    assert_eq!(resolver.resolve_skin_id(86, "god-kingdarius").unwrap(), 86001);
  }

  #[test]
  fn rejects_fuzzy_match_below_threshold() {
    let mut db = InMemoryNameDatabase::new();
    db.insert_skin(86, 86001, "God-King Darius");
    let resolver = SkinResolver::new(Path::new("."), &db);

    let err = resolver.resolve_skin_id(86, "Completely Unrelated Name").unwrap_err();
    assert_eq!(err, SkinResolveError::SkinNotResolved(86));
  }

  #[test]
  fn unknown_champion_is_an_error() {
    let db = InMemoryNameDatabase::new();
    let resolver = SkinResolver::new(Path::new("."), &db);
    assert_eq!(
      resolver.resolve_skin_id(9999, "anything").unwrap_err(),
      SkinResolveError::ChampionNotKnown(9999)
    );
  }
}
