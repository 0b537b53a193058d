//! C5 — Phase Tracker.
//!
//! A one-writer gameflow state machine. Authoritative input is the
//! `gameflow-phase` WebSocket event; a once-per-second poll covers gaps
//! when the event stream goes quiet. Transition side effects (clearing
//! per-match scratch state, killing this-session's overlay process and
//! any `mod-tools` orphan left by a prior crashed run, cancelling a
//! stale pre-build) live here rather than being scattered across
//! handlers, so there is exactly one writer for `processed_action_ids`
//! as the open question in SPEC_FULL.md resolves.

use std::sync::Arc;

use tracing::{info, warn};

use crate::overlay_runner::OverlayRunner;
use crate::prebuilder::PreBuilder;
use crate::shared_state::SharedState;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GameflowPhase {
  #[default]
  None,
  Lobby,
  Matchmaking,
  ReadyCheck,
  ChampSelect,
  Finalization,
  InProgress,
  WaitingForStats,
  PreEndOfGame,
  EndOfGame,
  Other(String),
}

impl GameflowPhase {
  pub fn from_wire(s: &str) -> Self {
    match s {
      "None" => GameflowPhase::None,
      "Lobby" => GameflowPhase::Lobby,
      "Matchmaking" => GameflowPhase::Matchmaking,
      "ReadyCheck" => GameflowPhase::ReadyCheck,
      "ChampSelect" => GameflowPhase::ChampSelect,
      "Finalization" => GameflowPhase::Finalization,
      "InProgress" => GameflowPhase::InProgress,
      "WaitingForStats" => GameflowPhase::WaitingForStats,
      "PreEndOfGame" => GameflowPhase::PreEndOfGame,
      "EndOfGame" => GameflowPhase::EndOfGame,
      other => GameflowPhase::Other(other.to_string()),
    }
  }
}

pub struct PhaseTracker {
  state: Arc<SharedState>,
  prebuilder: Arc<PreBuilder>,
  overlay_runner: Arc<OverlayRunner>,
  last_locked_champion: Option<(String, u32)>,
}

impl PhaseTracker {
  pub fn new(state: Arc<SharedState>, prebuilder: Arc<PreBuilder>, overlay_runner: Arc<OverlayRunner>) -> Self {
    PhaseTracker {
      state,
      prebuilder,
      overlay_runner,
      last_locked_champion: None,
    }
  }

  /// Applies a newly observed phase, running the transition side effects
  /// described in SPEC_FULL.md §4.5. Idempotent when `new_phase` equals
  /// the currently recorded phase.
  pub fn on_phase_observed(&mut self, new_phase: GameflowPhase) {
    let previous = {
      let mut guard = self.state.phase.lock().unwrap();
      if *guard == new_phase {
        return;
      }
      let previous = guard.clone();
      *guard = new_phase.clone();
      previous
    };

    info!(?previous, ?new_phase, "gameflow phase transition");

    match &new_phase {
      GameflowPhase::ChampSelect => self.on_enter_champ_select(),
      GameflowPhase::InProgress => self.on_enter_in_progress(),
      GameflowPhase::EndOfGame => self.on_enter_end_of_game(),
      _ => self.on_enter_other_terminal(&previous),
    }
  }

  fn on_enter_champ_select(&mut self) {
    self.state.reset_for_champ_select_entry();
    self.last_locked_champion = None;

    if let Err(e) = self.overlay_runner.stop_if_running() {
      warn!(error = %e, "failed to stop stale overlay process on champ-select entry");
    }
    self.overlay_runner.kill_stale_processes();
    self.prebuilder.cancel_current_build();
  }

  fn on_enter_in_progress(&self) {
    let skin = *self.state.selected_skin_id.lock().unwrap();
    info!(?skin, "entering match with last chosen skin");
  }

  fn on_enter_end_of_game(&self) {
    if let Err(e) = self.overlay_runner.stop_if_running() {
      warn!(error = %e, "failed to stop overlay process at end of game");
    }
  }

  fn on_enter_other_terminal(&mut self, previous: &GameflowPhase) {
    if *previous == GameflowPhase::ChampSelect {
      let mut locks = self.state.locks_lock.lock().unwrap();
      locks.processed_action_ids.clear();
    }
  }

  /// Records that the local player's pick action completed for
  /// `champion_id`, named `champion_name` for prebuild staging paths.
  /// Requests a pre-build; a repeat call for the same champion while one
  /// is already running is a no-op by the Pre-Builder's own contract.
  /// The build itself runs on a dedicated thread so this call returns
  /// immediately — `prebuild()` blocks its caller until every job for
  /// the champion finishes or is cancelled, and this method is invoked
  /// from the event-dispatch thread, which must keep draining incoming
  /// phase/timer events while a build is in flight.
  pub fn on_champion_locked(&mut self, champion_name: String, champion_id: u32) {
    if self.last_locked_champion.as_ref().map(|(_, id)| *id) == Some(champion_id) {
      return;
    }
    self.last_locked_champion = Some((champion_name.clone(), champion_id));

    {
      let mut locks = self.state.locks_lock.lock().unwrap();
      locks.locked_champ_id = Some(champion_id);
      locks.locked_champion_name = Some(champion_name.clone());
      locks.own_champion_locked = true;
    }

    let owned = self.state.owned_skins_lock.lock().unwrap().owned_skin_ids.clone();
    let prebuilder = self.prebuilder.clone();
    std::thread::spawn(move || {
      prebuilder.prebuild(champion_name, champion_id, owned);
    });
  }
}
