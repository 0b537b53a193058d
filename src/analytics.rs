//! C12 — Analytics Heartbeat.
//!
//! A best-effort, fire-and-forget background task posting a small
//! identity payload to a configured endpoint on an interval. Grounded on
//! the teacher's telemetry command (a simple POST of a machine id and
//! app version); failures here are logged at `debug` and never
//! propagate, since losing a heartbeat should never affect the injection
//! pipeline.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::shared_state::SharedState;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(900);

#[derive(Debug, Clone, Serialize)]
struct Heartbeat<'a> {
  machine_id: &'a str,
  app_version: &'a str,
}

pub struct AnalyticsHeartbeat {
  state: Arc<SharedState>,
  client: reqwest::blocking::Client,
  endpoint: Option<String>,
  machine_id: String,
  app_version: String,
  interval: Duration,
}

impl AnalyticsHeartbeat {
  pub fn new(state: Arc<SharedState>, endpoint: Option<String>, machine_id: String) -> Self {
    AnalyticsHeartbeat {
      state,
      client: reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .expect("failed to build analytics http client"),
      endpoint,
      machine_id,
      app_version: env!("CARGO_PKG_VERSION").to_string(),
      interval: DEFAULT_INTERVAL,
    }
  }

  pub fn with_interval(mut self, interval: Duration) -> Self {
    self.interval = interval;
    self
  }

  /// Runs until the process is stopping. Sleeps in short slices so a
  /// stop request is noticed promptly rather than after a long interval.
  pub fn run(&self) {
    let Some(endpoint) = self.endpoint.as_deref() else {
      debug!("no analytics endpoint configured, heartbeat disabled");
      return;
    };

    let poll = Duration::from_millis(500);
    let mut elapsed = self.interval;
    while !self.state.is_stopping() {
      if elapsed >= self.interval {
        self.send_once(endpoint);
        elapsed = Duration::ZERO;
      }
      std::thread::sleep(poll);
      elapsed += poll;
    }
  }

  fn send_once(&self, endpoint: &str) {
    let payload = Heartbeat { machine_id: &self.machine_id, app_version: &self.app_version };
    match self.client.post(endpoint).json(&payload).send() {
      Ok(resp) if resp.status().is_success() => debug!("analytics heartbeat sent"),
      Ok(resp) => debug!(status = %resp.status(), "analytics heartbeat rejected"),
      Err(e) => debug!(error = %e, "analytics heartbeat failed"),
    }
  }
}

/// Resolves a stable machine id: reused across runs from a small file in
/// the app-data directory if present, otherwise freshly generated and
/// persisted for next time.
pub fn resolve_machine_id(state_dir: &std::path::Path) -> String {
  let id_path = state_dir.join("machine-id");
  if let Ok(existing) = std::fs::read_to_string(&id_path) {
    let trimmed = existing.trim();
    if !trimmed.is_empty() {
      return trimmed.to_string();
    }
  }

  let generated = uuid::Uuid::new_v4().to_string();
  let _ = std::fs::create_dir_all(state_dir);
  let _ = std::fs::write(&id_path, &generated);
  generated
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn machine_id_is_stable_across_calls() {
    let tmp = tempfile::tempdir().unwrap();
    let first = resolve_machine_id(tmp.path());
    let second = resolve_machine_id(tmp.path());
    assert_eq!(first, second);
  }

  #[test]
  fn run_is_a_no_op_without_an_endpoint() {
    let state = Arc::new(SharedState::default());
    state.request_stop();
    let heartbeat = AnalyticsHeartbeat::new(state, None, "test-machine".to_string());
    heartbeat.run();
  }
}
