//! Captured responses and their synthetic offline stand-ins.

use chrono::{DateTime, Utc};

/// An immutable captured response: status, headers, body, and the moment it
/// was stored. Entries are refreshed by overwrite, never by expiry.
#[derive(Debug, Clone)]
pub struct StoredResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub stored_at: DateTime<Utc>,
}

impl StoredResponse {
  pub fn new(status: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
    Self {
      status,
      headers,
      body,
      stored_at: Utc::now(),
    }
  }

  /// 2xx check; the same test the strategies apply before caching a copy.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn content_type(&self) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
      .map(|(_, value)| value.as_str())
  }

  fn html(body: &str) -> Self {
    Self::new(
      200,
      vec![("Content-Type".to_string(), "text/html".to_string())],
      body.as_bytes().to_vec(),
    )
  }

  /// Minimal navigable HTML served when the app shell is unreachable and
  /// nothing usable is cached.
  pub fn offline_page() -> Self {
    Self::html(
      "<html><body><h1>Offline</h1><p>Please check your connection and try again.</p></body></html>",
    )
  }

  /// HTML notice for a static resource with no cached copy.
  pub fn offline_asset() -> Self {
    Self::html("<html><body><h1>Offline</h1><p>Resource not available offline.</p></body></html>")
  }

  /// JSON error body for data requests; callers detect offline state via the
  /// `offline` flag.
  pub fn offline_json() -> Self {
    let body = serde_json::json!({ "error": "Network unavailable", "offline": true });
    Self::new(
      200,
      vec![("Content-Type".to_string(), "application/json".to_string())],
      body.to_string().into_bytes(),
    )
  }
}
