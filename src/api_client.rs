//! C3 — API Client.
//!
//! Three verbs over the [`crate::connection::Connection`]: GET, PUT, PATCH.
//! 404/405 is absence, not error; any transport failure forces a refresh
//! and retries exactly once before surfacing the second failure.

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::connection::Connection;

/// Result of a mutating call: HTTP status plus an optional JSON body, so
/// callers can check 2xx without re-parsing.
pub struct ApiResponse {
  pub status: reqwest::StatusCode,
  pub body: Option<Value>,
}

impl ApiResponse {
  pub fn is_success(&self) -> bool {
    self.status.is_success()
  }
}

pub struct ApiClient<'a> {
  connection: &'a mut Connection,
}

impl<'a> ApiClient<'a> {
  pub fn new(connection: &'a mut Connection) -> Self {
    ApiClient { connection }
  }

  /// `GET path`. Returns `None` on 404/405 or any decode failure; those are
  /// absence, not error, per the API client's policy.
  pub fn get(&mut self, path: &str) -> Option<Value> {
    self.with_retry(|conn| {
      let url = format!("{}{}", conn.base_url(), path);
      conn
        .client()
        .get(&url)
        .header(reqwest::header::AUTHORIZATION, conn.auth_header())
        .send()
    })
    .and_then(|resp| {
      if resp.status() == reqwest::StatusCode::NOT_FOUND || resp.status() == reqwest::StatusCode::METHOD_NOT_ALLOWED {
        return None;
      }
      match resp.json::<Value>() {
        Ok(v) => Some(v),
        Err(e) => {
          debug!(error = %e, path, "response was not valid JSON, treating as absent");
          None
        }
      }
    })
  }

  pub fn put<T: Serialize>(&mut self, path: &str, body: &T) -> Option<ApiResponse> {
    self.mutate(reqwest::Method::PUT, path, body)
  }

  pub fn patch<T: Serialize>(&mut self, path: &str, body: &T) -> Option<ApiResponse> {
    self.mutate(reqwest::Method::PATCH, path, body)
  }

  fn mutate<T: Serialize>(&mut self, method: reqwest::Method, path: &str, body: &T) -> Option<ApiResponse> {
    let resp = self.with_retry(|conn| {
      let url = format!("{}{}", conn.base_url(), path);
      conn
        .client()
        .request(method.clone(), &url)
        .header(reqwest::header::AUTHORIZATION, conn.auth_header())
        .json(body)
        .send()
    })?;

    if resp.status() == reqwest::StatusCode::NOT_FOUND || resp.status() == reqwest::StatusCode::METHOD_NOT_ALLOWED {
      return None;
    }
    let status = resp.status();
    let body = resp.json::<Value>().ok();
    Some(ApiResponse { status, body })
  }

  /// Shared retry policy: if the connection is dead, try to refresh it
  /// first; on transport error, force-refresh and retry exactly once.
  fn with_retry<F>(&mut self, call: F) -> Option<reqwest::blocking::Response>
  where
    F: Fn(&Connection) -> Result<reqwest::blocking::Response, reqwest::Error>,
  {
    if self.connection.status() == crate::connection::ConnectionStatus::Dead
      && self.connection.refresh_if_needed(false).is_err()
    {
      return None;
    }

    match call(self.connection) {
      Ok(resp) => Some(resp),
      Err(e) => {
        debug!(error = %e, "transport error, forcing refresh and retrying once");
        self.connection.mark_dead();
        if self.connection.refresh_if_needed(true).is_err() {
          return None;
        }
        call(self.connection).ok()
      }
    }
  }
}
