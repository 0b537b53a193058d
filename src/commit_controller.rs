//! C8 — Commit Controller.
//!
//! Arms a countdown ticker when champ select enters its FINALIZATION
//! phase and, when the countdown nears its end (or the phase advances
//! past it), commits exactly one skin selection and hands it to the
//! Overlay Runner. Grounded on the source's `TimerManager`: a polling
//! ticker reading a shared `(t0, left0_ms)` pair under a single lock,
//! a monotonically increasing ticker id so a superseded timer can
//! recognize itself as stale and exit quietly, and a commit-selection
//! priority order that falls back through several hint sources before
//! giving up.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::overlay_runner::OverlayRunner;
use crate::prebuilder::PreBuilder;
use crate::shared_state::SharedState;
use crate::skin_resolver::SkinResolver;

const DEFAULT_TIMER_HZ: u64 = 10;
/// Default commit lead: the countdown must have at least this much time
/// left for the fire to happen, so the chosen overlay has a chance to
/// start before champ select ends. Overridable via `--skin-threshold-ms`.
const DEFAULT_COMMIT_LEAD_MS: i64 = 1500;

pub struct CommitController {
  state: Arc<SharedState>,
  prebuilder: Arc<PreBuilder>,
  overlay_runner: Arc<OverlayRunner>,
  timer_hz: u64,
  commit_lead_ms: i64,
}

impl CommitController {
  pub fn new(state: Arc<SharedState>, prebuilder: Arc<PreBuilder>, overlay_runner: Arc<OverlayRunner>) -> Self {
    CommitController {
      state,
      prebuilder,
      overlay_runner,
      timer_hz: DEFAULT_TIMER_HZ,
      commit_lead_ms: DEFAULT_COMMIT_LEAD_MS,
    }
  }

  pub fn with_timer_hz(mut self, hz: u64) -> Self {
    self.timer_hz = hz.max(1);
    self
  }

  pub fn with_threshold_ms(mut self, threshold_ms: u64) -> Self {
    self.commit_lead_ms = threshold_ms as i64;
    self
  }

  /// Arms the ticker for this champ-select FINALIZATION window. Called
  /// once per session from the phase tracker when the gameflow phase
  /// hint or session timer payload indicates FINALIZATION has begun.
  /// Returns the `ticker_id` assigned to this arming so a later,
  /// independent arm can tell which generation produced a given tick.
  pub fn arm(&self, left0_ms: u64) -> u64 {
    let ticker_id = {
      let mut timer = self.state.timer_lock.lock().unwrap();
      timer.loadout_countdown_active = true;
      timer.loadout_t0 = Some(Instant::now());
      timer.loadout_left0_ms = left0_ms;
      timer.ticker_seq += 1;
      timer.current_ticker = timer.ticker_seq;
      timer.injection_completed = false;
      timer.current_ticker
    };
    info!(ticker_id, left0_ms, "commit controller armed");
    ticker_id
  }

  pub fn disarm(&self) {
    let mut timer = self.state.timer_lock.lock().unwrap();
    timer.loadout_countdown_active = false;
    timer.loadout_t0 = None;
  }

  /// Runs the ticker loop for the ticker id returned by `arm`, blocking
  /// until it commits, is superseded, or the process is stopping. Meant
  /// to be spawned on its own thread per arming; a later `arm()` call
  /// bumps `ticker_seq` so this loop notices it is stale and exits
  /// without acting.
  pub fn run_ticker(&self, ticker_id: u64, resolver: &SkinResolver<'_>) {
    let interval = Duration::from_millis(1000 / self.timer_hz.max(1));

    loop {
      if self.state.is_stopping() {
        return;
      }

      let (is_current, remaining_ms, already_fired) = {
        let timer = self.state.timer_lock.lock().unwrap();
        let is_current = timer.current_ticker == ticker_id;
        let remaining_ms = match timer.loadout_t0 {
          Some(t0) if timer.loadout_countdown_active => {
            timer.loadout_left0_ms as i64 - t0.elapsed().as_millis() as i64
          }
          _ => i64::MIN,
        };
        (is_current, remaining_ms, timer.injection_completed)
      };

      if !is_current {
        debug!(ticker_id, "ticker superseded, exiting");
        return;
      }
      if already_fired {
        return;
      }
      if remaining_ms == i64::MIN {
        return; // disarmed from under us
      }

      if remaining_ms <= self.commit_lead_ms {
        self.fire(ticker_id, resolver);
        return;
      }

      std::thread::sleep(interval);
    }
  }

  /// Chooses a skin for the locked champion by priority: (a) an explicit
  /// chroma-panel confirmed selection, (b) the last hovered skin id,
  /// (c) any pre-built skin if random mode is active, (d) a historic
  /// skin id, (e) no-op. Marks `injection_completed` so this ticker
  /// cannot fire twice, even if called directly by a late-hover
  /// synchronous fallback. Once a skin id is chosen, hands the matching
  /// pre-built overlay's path to the Overlay Runner.
  fn fire(&self, ticker_id: u64, resolver: &SkinResolver<'_>) {
    let mut timer = self.state.timer_lock.lock().unwrap();
    if timer.current_ticker != ticker_id || timer.injection_completed {
      return;
    }
    timer.injection_completed = true;
    drop(timer);

    let (champion_id, champion_name) = {
      let locks = self.state.locks_lock.lock().unwrap();
      (locks.locked_champ_id, locks.locked_champion_name.clone())
    };

    let Some(champion_id) = champion_id else {
      warn!(ticker_id, "fired with no locked champion, nothing to commit");
      return;
    };
    let champion_name = champion_name.unwrap_or_default();

    let confirmed = *self.state.selected_skin_id.lock().unwrap();
    let hovered = *self.state.last_hovered_skin_id.lock().unwrap();
    let random_mode = self.state.random_mode_active.load(std::sync::atomic::Ordering::SeqCst);
    let historic = *self.state.historic_skin_id.lock().unwrap();

    let chosen = confirmed
      .map(|id| (id, self.prebuilder.prebuilt_overlay_path(&champion_name, &id.to_string())))
      .or_else(|| hovered.map(|id| (id, self.prebuilder.prebuilt_overlay_path(&champion_name, &id.to_string()))))
      .or_else(|| {
        random_mode
          .then(|| self.prebuilder.any_prebuilt_overlay(&champion_name))
          .flatten()
          .map(|(id, path)| (id, Some(path)))
      })
      .or_else(|| {
        historic.map(|id| (id, self.prebuilder.prebuilt_overlay_path(&champion_name, &id.to_string())))
      });

    let Some((skin_id, overlay_path)) = chosen else {
      info!(ticker_id, champion_id, "no hovered, confirmed, random, or historic skin, committing base skin (no-op)");
      return;
    };

    let label = resolver
      .display_name(champion_id, skin_id)
      .unwrap_or_else(|| skin_id.to_string());

    match overlay_path {
      Some(path) => {
        info!(ticker_id, champion_id, skin_id, label, overlay = %path.display(), "committed skin, handing overlay to runner");
        if let Err(e) = self.overlay_runner.start(&path) {
          warn!(ticker_id, champion_id, skin_id, error = %e, "failed to start overlay runner for committed skin");
        }
      }
      None => warn!(
        ticker_id,
        champion_id, skin_id, label, "committed skin but no pre-built overlay was ready in time, skipping (no partial commits)"
      ),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::name_db::InMemoryNameDatabase;
  use std::sync::Arc;

  fn test_prebuilder() -> Arc<PreBuilder> {
    let tmp = tempfile::tempdir().unwrap();
    Arc::new(PreBuilder::new(
      tmp.path().join("tools"),
      tmp.path().join("game"),
      tmp.path().join("skins"),
      tmp.path().join("staging"),
      Arc::new(InMemoryNameDatabase::new()),
    ))
  }

  fn test_overlay_runner() -> Arc<OverlayRunner> {
    let tmp = tempfile::tempdir().unwrap();
    Arc::new(OverlayRunner::new(tmp.path().join("tools"), tmp.path().join("game")))
  }

  #[test]
  fn arming_twice_strictly_increases_ticker_id() {
    let state = Arc::new(SharedState::default());
    let controller = CommitController::new(state, test_prebuilder(), test_overlay_runner());

    let first = controller.arm(5000);
    let second = controller.arm(3000);
    assert!(second > first);
  }

  #[test]
  fn stale_ticker_exits_without_firing() {
    let state = Arc::new(SharedState::default());
    let controller = CommitController::new(state.clone(), test_prebuilder(), test_overlay_runner());

    let first = controller.arm(50);
    let _second = controller.arm(50);

    let db = InMemoryNameDatabase::new();
    let resolver = SkinResolver::new(std::path::Path::new("."), &db);
    controller.run_ticker(first, &resolver);

    let timer = state.timer_lock.lock().unwrap();
    assert!(!timer.injection_completed, "stale ticker must not mark completion");
  }

  #[test]
  fn fires_exactly_once_on_hovered_skin_and_commits() {
    let state = Arc::new(SharedState::default());
    let controller = CommitController::new(state.clone(), test_prebuilder(), test_overlay_runner());

    {
      let mut locks = state.locks_lock.lock().unwrap();
      locks.locked_champ_id = Some(86);
      locks.locked_champion_name = Some("Garen".to_string());
    }
    *state.last_hovered_skin_id.lock().unwrap() = Some(86001);

    let db = InMemoryNameDatabase::new();
    let resolver = SkinResolver::new(std::path::Path::new("."), &db);

    let ticker_id = controller.arm(10);
    controller.run_ticker(ticker_id, &resolver);

    assert!(state.timer_lock.lock().unwrap().injection_completed);

    // A second tick for the same (now-fired) ticker must not re-commit.
    controller.fire(ticker_id, &resolver);
    assert!(state.timer_lock.lock().unwrap().injection_completed);
  }
}
