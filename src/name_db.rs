//! Name-database collaborator (external, per SPEC_FULL.md §1's non-goals:
//! locale translation is delegated here, not performed by the core).
//!
//! The core only needs two operations from this collaborator: resolve a
//! skin name to its id for a given champion, and look up a skin's display
//! name from its id. A minimal in-memory implementation is provided so
//! the rest of the pipeline can be exercised without a real data source;
//! production wiring supplies its own [`NameDatabase`] impl (e.g. backed
//! by a downloaded skin catalogue).

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

pub trait NameDatabase: Send + Sync {
  /// All known skin ids (and their display names) for `champion_id`.
  fn skins_for_champion(&self, champion_id: u32) -> Vec<(u32, String)>;

  /// Display name for `champion_id`, used to key pre-build staging paths.
  fn champion_name(&self, champion_id: u32) -> Option<String>;
}

/// Simple in-memory name database keyed by champion id, suitable for
/// tests and as a template for a real catalogue-backed implementation.
#[derive(Default)]
pub struct InMemoryNameDatabase {
  skins_by_champion: HashMap<u32, Vec<(u32, String)>>,
  champion_names: HashMap<u32, String>,
}

impl InMemoryNameDatabase {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert_skin(&mut self, champion_id: u32, skin_id: u32, name: impl Into<String>) {
    self
      .skins_by_champion
      .entry(champion_id)
      .or_default()
      .push((skin_id, name.into()));
  }

  pub fn insert_champion(&mut self, champion_id: u32, name: impl Into<String>) {
    self.champion_names.insert(champion_id, name.into());
  }
}

impl NameDatabase for InMemoryNameDatabase {
  fn skins_for_champion(&self, champion_id: u32) -> Vec<(u32, String)> {
    self.skins_by_champion.get(&champion_id).cloned().unwrap_or_default()
  }

  fn champion_name(&self, champion_id: u32) -> Option<String> {
    self.champion_names.get(&champion_id).cloned()
  }
}

/// Case-folds and strips all whitespace, matching the normalization the
/// source's fuzzy resolver performs bitwise per the design notes.
pub fn normalize(name: &str) -> String {
  name.chars().filter(|c| !c.is_whitespace()).collect::<String>().to_lowercase()
}

#[derive(Debug, Deserialize)]
struct ChampionEntry {
  name: String,
  #[serde(default)]
  skins: HashMap<u32, String>,
}

/// Catalogue-backed implementation reading a bundled or downloaded
/// `names.json`: `{ "<championId>": { "name": "...", "skins": { "<skinId>": "..." } } }`.
/// This is the collaborator production wiring actually uses; downloading
/// and refreshing that file is out of scope here (non-goal: locale
/// translation), the loader only needs whatever copy is already on disk.
pub struct JsonNameDatabase {
  champions: HashMap<u32, ChampionEntry>,
}

impl JsonNameDatabase {
  pub fn load(path: &Path) -> Result<Self, std::io::Error> {
    let text = std::fs::read_to_string(path)?;
    let champions: HashMap<u32, ChampionEntry> = serde_json::from_str(&text)
      .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok(JsonNameDatabase { champions })
  }
}

impl NameDatabase for JsonNameDatabase {
  fn skins_for_champion(&self, champion_id: u32) -> Vec<(u32, String)> {
    self
      .champions
      .get(&champion_id)
      .map(|entry| entry.skins.iter().map(|(id, name)| (*id, name.clone())).collect())
      .unwrap_or_default()
  }

  fn champion_name(&self, champion_id: u32) -> Option<String> {
    self.champions.get(&champion_id).map(|entry| entry.name.clone())
  }
}
