//! C10 — Shared State.
//!
//! The rendezvous point every other component reads and writes through.
//! Fields are grouped into a small number of mutexes by writer
//! discipline, per the ownership rules in the data model: `timer_lock`,
//! `locks_lock`, `owned_skins_lock`. A reader that needs a consistent
//! snapshot across groups takes them in the fixed order
//! `timer_lock -> locks_lock -> owned_skins_lock` to stay deadlock-free.
//!
//! This replaces the source's scattered process-wide `Lazy<Atomic*>`
//! statics with one struct the [`crate::supervisor::Supervisor`]
//! constructs once and hands to every component by reference — no
//! component reaches for a global to find it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use crate::phase_tracker::GameflowPhase;

/// Fields written only by the Commit Controller's ticker and read by
/// itself and the Phase Tracker.
#[derive(Debug, Default)]
pub struct TimerGroup {
  pub loadout_countdown_active: bool,
  pub loadout_t0: Option<Instant>,
  pub loadout_left0_ms: u64,
  pub ticker_seq: u64,
  pub current_ticker: u64,
  pub injection_completed: bool,
}

/// Fields written by the Phase Tracker's champ-select action processing.
#[derive(Debug, Default)]
pub struct LocksGroup {
  pub locks_by_cell: HashMap<i64, bool>,
  /// Private in spirit to the Phase Tracker: only its module inserts or
  /// clears entries here, per the open-question decision in SPEC_FULL.md.
  pub(crate) processed_action_ids: HashSet<i64>,
  pub locked_champ_id: Option<u32>,
  pub locked_champion_name: Option<String>,
  pub own_champion_locked: bool,
}

/// Fields written on the `ChampSelect` entry edge and read by the
/// Pre-Builder and Commit Controller.
#[derive(Debug, Default)]
pub struct OwnedSkinsGroup {
  pub owned_skin_ids: HashSet<u32>,
}

pub struct SharedState {
  pub stop: AtomicBool,
  pub phase: Mutex<GameflowPhase>,
  pub hovered_champ_id: Mutex<Option<u32>>,
  pub selected_skin_id: Mutex<Option<u32>>,
  pub last_hovered_skin_id: Mutex<Option<u32>>,
  pub current_game_mode: Mutex<Option<String>>,
  pub current_map_id: Mutex<Option<u32>>,
  pub is_swiftplay_mode: AtomicBool,
  pub random_mode_active: AtomicBool,
  pub historic_skin_id: Mutex<Option<u32>>,

  pub timer_lock: Mutex<TimerGroup>,
  pub locks_lock: Mutex<LocksGroup>,
  pub owned_skins_lock: Mutex<OwnedSkinsGroup>,
}

impl Default for SharedState {
  fn default() -> Self {
    SharedState {
      stop: AtomicBool::new(false),
      phase: Mutex::new(GameflowPhase::None),
      hovered_champ_id: Mutex::new(None),
      selected_skin_id: Mutex::new(None),
      last_hovered_skin_id: Mutex::new(None),
      current_game_mode: Mutex::new(None),
      current_map_id: Mutex::new(None),
      is_swiftplay_mode: AtomicBool::new(false),
      random_mode_active: AtomicBool::new(false),
      historic_skin_id: Mutex::new(None),
      timer_lock: Mutex::new(TimerGroup::default()),
      locks_lock: Mutex::new(LocksGroup::default()),
      owned_skins_lock: Mutex::new(OwnedSkinsGroup::default()),
    }
  }
}

impl SharedState {
  pub fn is_stopping(&self) -> bool {
    self.stop.load(Ordering::SeqCst)
  }

  pub fn request_stop(&self) {
    self.stop.store(true, Ordering::SeqCst);
  }

  /// Resets per-champ-select scratch state on the `* -> ChampSelect`
  /// transition: hovered skin, owned-skin set, processed actions, and the
  /// injection-completed flag, in the order the Phase Tracker's contract
  /// requires so readers never observe a half-cleared snapshot within a
  /// single lock group.
  pub fn reset_for_champ_select_entry(&self) {
    *self.hovered_champ_id.lock().unwrap() = None;
    *self.selected_skin_id.lock().unwrap() = None;

    {
      let mut owned = self.owned_skins_lock.lock().unwrap();
      owned.owned_skin_ids.clear();
    }
    {
      let mut locks = self.locks_lock.lock().unwrap();
      locks.processed_action_ids.clear();
      locks.locked_champ_id = None;
      locks.locked_champion_name = None;
      locks.own_champion_locked = false;
      locks.locks_by_cell.clear();
    }
    {
      let mut timer = self.timer_lock.lock().unwrap();
      timer.injection_completed = false;
      timer.loadout_countdown_active = false;
      timer.current_ticker = 0;
    }
  }

  pub fn snapshot_phase(&self) -> GameflowPhase {
    self.phase.lock().unwrap().clone()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn champ_select_entry_clears_scratch_state() {
    let state = SharedState::default();
    *state.hovered_champ_id.lock().unwrap() = Some(86);
    state.owned_skins_lock.lock().unwrap().owned_skin_ids.insert(86000);
    state.locks_lock.lock().unwrap().processed_action_ids.insert(7);
    state.timer_lock.lock().unwrap().injection_completed = true;

    state.reset_for_champ_select_entry();

    assert_eq!(*state.hovered_champ_id.lock().unwrap(), None);
    assert!(state.owned_skins_lock.lock().unwrap().owned_skin_ids.is_empty());
    assert!(state.locks_lock.lock().unwrap().processed_action_ids.is_empty());
    assert!(!state.timer_lock.lock().unwrap().injection_completed);
  }
}
