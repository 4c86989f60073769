//! Canonical request identity for cache addressing.

use reqwest::Method;
use sha2::{Digest, Sha256};
use url::Url;

/// Canonical cache key: method plus absolute URL, query string included.
///
/// The method is part of the hashed input, so a GET entry can never alias
/// another verb for the same URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestKey {
  method: Method,
  url: Url,
}

impl RequestKey {
  pub fn new(method: Method, url: Url) -> Self {
    Self { method, url }
  }

  /// Key for a plain GET of the given URL.
  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  pub fn url(&self) -> &Url {
    &self.url
  }

  /// Stable fixed-length storage key.
  pub fn cache_hash(&self) -> String {
    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_str().as_bytes());
    hex::encode(hasher.finalize())
  }

  /// Human-readable form for logs and introspection.
  pub fn description(&self) -> String {
    format!("{} {}", self.method, self.url)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_hash_is_stable() {
    let a = RequestKey::get(url("https://app.example.com/web/"));
    let b = RequestKey::get(url("https://app.example.com/web/"));
    assert_eq!(a.cache_hash(), b.cache_hash());
  }

  #[test]
  fn test_method_distinguishes_keys() {
    let get = RequestKey::get(url("https://app.example.com/data/tags"));
    let post = RequestKey::new(Method::POST, url("https://app.example.com/data/tags"));
    assert_ne!(get.cache_hash(), post.cache_hash());
  }

  #[test]
  fn test_query_distinguishes_keys() {
    let bare = RequestKey::get(url("https://app.example.com/data/tags"));
    let filtered = RequestKey::get(url("https://app.example.com/data/tags?limit=10"));
    assert_ne!(bare.cache_hash(), filtered.cache_hash());
  }
}
