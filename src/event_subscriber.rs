//! C4 — Event Subscriber.
//!
//! Opens a WebSocket on the same port as the REST API, under the `wamp`
//! subprotocol, and subscribes to the client's JSON-API event stream.
//! Frames are parsed into [`LcuEvent`] — a tagged sum type, one variant
//! per dispatched URI prefix plus an `Other` escape hatch — rather than
//! threaded through the rest of the pipeline as untyped JSON, per the
//! dynamic-typing redesign note.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::shared_state::SharedState;

const WS_RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// A strongly-typed event derived from an `OnJsonApiEvent` frame, per
/// the URI-prefix dispatch table in SPEC_FULL.md §4.4.
#[derive(Debug, Clone)]
pub enum LcuEvent {
  GameflowPhase { phase: String },
  ChampSelectSession { data: Value },
  Lobby { data: Value },
  ReadyCheck { data: Value },
  /// Anything outside the subscribed prefixes; carried for completeness
  /// but discarded at the dispatcher.
  Other { uri: String, raw: Value },
}

impl LcuEvent {
  fn from_frame(uri: &str, data: Value) -> Self {
    if uri == "/lol-gameflow/v1/gameflow-phase" {
      let phase = data.as_str().unwrap_or_default().to_string();
      LcuEvent::GameflowPhase { phase }
    } else if uri.starts_with("/lol-champ-select/v1/session") {
      LcuEvent::ChampSelectSession { data }
    } else if uri.starts_with("/lol-lobby/v2/lobby") {
      LcuEvent::Lobby { data }
    } else if uri.starts_with("/lol-matchmaking/v1/ready-check") {
      LcuEvent::ReadyCheck { data }
    } else {
      LcuEvent::Other { uri: uri.to_string(), raw: data }
    }
  }
}

pub struct EventSubscriber {
  state: Arc<SharedState>,
}

impl EventSubscriber {
  pub fn new(state: Arc<SharedState>) -> Self {
    EventSubscriber { state }
  }

  /// Runs the reconnect loop until the stop flag is set, pushing parsed
  /// events to `sender`. On any disconnect, forces a connection refresh
  /// (handled by the caller re-invoking with fresh credentials) and
  /// sleeps `WS_RECONNECT_DELAY` before retrying.
  pub async fn run(&self, port: u16, password: &str, sender: mpsc::UnboundedSender<LcuEvent>) {
    while !self.state.is_stopping() {
      match self.connect_and_stream(port, password, &sender).await {
        Ok(()) => info!("event stream closed cleanly"),
        Err(e) => warn!(error = %e, "event stream disconnected"),
      }
      if self.state.is_stopping() {
        break;
      }
      tokio::time::sleep(WS_RECONNECT_DELAY).await;
    }
  }

  async fn connect_and_stream(
    &self,
    port: u16,
    password: &str,
    sender: &mpsc::UnboundedSender<LcuEvent>,
  ) -> Result<(), String> {
    let url = format!("wss://127.0.0.1:{}/", port);
    let mut request = url
      .into_client_request()
      .map_err(|e| format!("invalid websocket url: {e}"))?;

    let token = format!("riot:{password}");
    let auth = format!("Basic {}", base64::engine::general_purpose::STANDARD.encode(token));
    request
      .headers_mut()
      .insert(reqwest::header::AUTHORIZATION.as_str(), auth.parse().unwrap());
    request
      .headers_mut()
      .insert("Sec-WebSocket-Protocol", "wamp".parse().unwrap());

    let connector = native_tls::TlsConnector::builder()
      .danger_accept_invalid_certs(true)
      .build()
      .map_err(|e| format!("failed to build tls connector: {e}"))?;

    let (ws_stream, _) = tokio_tungstenite::connect_async_tls_with_config(
      request,
      None,
      false,
      Some(tokio_tungstenite::Connector::NativeTls(connector)),
    )
    .await
    .map_err(|e| format!("websocket connect failed: {e}"))?;

    let (mut write, mut read) = ws_stream.split();

    let subscribe = serde_json::to_string(&(5, "OnJsonApiEvent")).unwrap();
    write
      .send(Message::Text(subscribe))
      .await
      .map_err(|e| format!("failed to send subscription frame: {e}"))?;

    info!("subscribed to OnJsonApiEvent");

    while !self.state.is_stopping() {
      let next = tokio::time::timeout(Duration::from_secs(30), read.next()).await;
      let msg = match next {
        Ok(Some(Ok(msg))) => msg,
        Ok(Some(Err(e))) => return Err(format!("websocket read error: {e}")),
        Ok(None) => return Ok(()),
        Err(_) => continue, // idle timeout, loop to re-check stop flag
      };

      if let Message::Text(text) = msg {
        if let Some(event) = parse_event_frame(&text) {
          let _ = sender.send(event);
        }
      }
    }
    Ok(())
  }
}

/// Parses a raw WS text frame. Meaningful frames have shape
/// `[8, "OnJsonApiEvent", {uri, eventType, data}]`; anything else is
/// ignored (acks, pings, unrelated frame types).
fn parse_event_frame(text: &str) -> Option<LcuEvent> {
  let parsed: Value = serde_json::from_str(text).ok()?;
  let arr = parsed.as_array()?;
  if arr.len() < 3 || arr[0].as_i64() != Some(8) || arr[1].as_str() != Some("OnJsonApiEvent") {
    debug!(frame = text, "ignoring non-event frame");
    return None;
  }
  let payload = &arr[2];
  let uri = payload.get("uri")?.as_str()?.to_string();
  let data = payload.get("data").cloned().unwrap_or(Value::Null);
  Some(LcuEvent::from_frame(&uri, data))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dispatches_gameflow_phase_by_uri_prefix() {
    let frame = r#"[8, "OnJsonApiEvent", {"uri": "/lol-gameflow/v1/gameflow-phase", "eventType": "Update", "data": "ChampSelect"}]"#;
    match parse_event_frame(frame) {
      Some(LcuEvent::GameflowPhase { phase }) => assert_eq!(phase, "ChampSelect"),
      other => panic!("expected GameflowPhase event, got {other:?}"),
    }
  }

  #[test]
  fn unrecognized_prefix_becomes_other() {
    let frame = r#"[8, "OnJsonApiEvent", {"uri": "/lol-something-else/v1/x", "eventType": "Update", "data": {}}]"#;
    match parse_event_frame(frame) {
      Some(LcuEvent::Other { uri, .. }) => assert_eq!(uri, "/lol-something-else/v1/x"),
      other => panic!("expected Other event, got {other:?}"),
    }
  }

  #[test]
  fn non_event_frames_are_ignored() {
    assert!(parse_event_frame(r#"[5, "OnJsonApiEvent"]"#).is_none());
    assert!(parse_event_frame("not json").is_none());
  }
}
