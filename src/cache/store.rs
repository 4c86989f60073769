//! Cache storage backends and the versioned store handle.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use super::key::RequestKey;
use super::response::StoredResponse;

/// Storage backend for named response caches.
///
/// Caches spring into existence on first `put`; opening is implicit and
/// idempotent. `put` and `lookup` are individually atomic at the key level,
/// last writer wins.
pub trait CacheBackend: Send + Sync {
  /// Look up an entry in one named cache.
  fn lookup(&self, cache: &str, key: &RequestKey) -> Result<Option<StoredResponse>>;

  /// Store an entry, overwriting any prior entry for the same key.
  fn put(&self, cache: &str, key: &RequestKey, response: &StoredResponse) -> Result<()>;

  /// Names of all caches that currently hold at least one entry, sorted.
  fn list_names(&self) -> Result<Vec<String>>;

  /// Drop a named cache wholesale. Returns whether anything was deleted.
  fn delete(&self, cache: &str) -> Result<bool>;
}

/// In-memory backend for the ephemeral `--memory` mode and tests.
#[derive(Default)]
pub struct MemoryBackend {
  caches: Mutex<HashMap<String, HashMap<String, StoredResponse>>>,
}

impl MemoryBackend {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, HashMap<String, StoredResponse>>>> {
    self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl CacheBackend for MemoryBackend {
  fn lookup(&self, cache: &str, key: &RequestKey) -> Result<Option<StoredResponse>> {
    let caches = self.lock()?;
    Ok(
      caches
        .get(cache)
        .and_then(|entries| entries.get(&key.cache_hash()))
        .cloned(),
    )
  }

  fn put(&self, cache: &str, key: &RequestKey, response: &StoredResponse) -> Result<()> {
    let mut caches = self.lock()?;
    caches
      .entry(cache.to_string())
      .or_default()
      .insert(key.cache_hash(), response.clone());
    Ok(())
  }

  fn list_names(&self) -> Result<Vec<String>> {
    let caches = self.lock()?;
    let mut names: Vec<String> = caches.keys().cloned().collect();
    names.sort();
    Ok(names)
  }

  fn delete(&self, cache: &str) -> Result<bool> {
    let mut caches = self.lock()?;
    Ok(caches.remove(cache).is_some())
  }
}

/// SQLite-backed persistent cache storage.
pub struct SqliteBackend {
  conn: Mutex<Connection>,
}

impl SqliteBackend {
  /// Open the cache database at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let backend = Self {
      conn: Mutex::new(conn),
    };
    backend.run_migrations()?;

    Ok(backend)
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("awning").join("cache.db"))
  }

  /// Run database migrations for the cache table.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

#[cfg(test)]
impl SqliteBackend {
  fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open database: {}", e))?;
    let backend = Self {
      conn: Mutex::new(conn),
    };
    backend.run_migrations()?;
    Ok(backend)
  }
}

/// Schema for the response cache.
const CACHE_SCHEMA: &str = r#"
-- Captured responses, one row per (cache name, canonical request key)
CREATE TABLE IF NOT EXISTS response_cache (
    cache_name TEXT NOT NULL,
    request_key TEXT NOT NULL,
    request TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL,
    PRIMARY KEY (cache_name, request_key)
);

CREATE INDEX IF NOT EXISTS idx_response_cache_name ON response_cache(cache_name);
"#;

impl CacheBackend for SqliteBackend {
  fn lookup(&self, cache: &str, key: &RequestKey) -> Result<Option<StoredResponse>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT status, headers, body, stored_at FROM response_cache
         WHERE cache_name = ? AND request_key = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(u16, String, Vec<u8>, String)> = stmt
      .query_row(params![cache, key.cache_hash()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .ok();

    match row {
      Some((status, headers_json, body, stored_at_str)) => {
        let headers: Vec<(String, String)> = serde_json::from_str(&headers_json)
          .map_err(|e| eyre!("Failed to parse cached headers: {}", e))?;
        let stored_at = chrono::DateTime::parse_from_rfc3339(&stored_at_str)
          .map(|dt| dt.with_timezone(&chrono::Utc))
          .map_err(|e| eyre!("Failed to parse stored_at '{}': {}", stored_at_str, e))?;

        Ok(Some(StoredResponse {
          status,
          headers,
          body,
          stored_at,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, cache: &str, key: &RequestKey, response: &StoredResponse) -> Result<()> {
    let conn = self.lock()?;

    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO response_cache (cache_name, request_key, request, status, headers, body, stored_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
          cache,
          key.cache_hash(),
          key.description(),
          response.status,
          headers,
          response.body,
          response.stored_at.to_rfc3339(),
        ],
      )
      .map_err(|e| eyre!("Failed to store response: {}", e))?;

    Ok(())
  }

  fn list_names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT DISTINCT cache_name FROM response_cache ORDER BY cache_name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names: Vec<String> = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache names: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(names)
  }

  fn delete(&self, cache: &str) -> Result<bool> {
    let conn = self.lock()?;

    let deleted = conn
      .execute("DELETE FROM response_cache WHERE cache_name = ?", params![cache])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", cache, e))?;

    Ok(deleted > 0)
  }
}

/// Handle over the current version's caches and the backend they live in.
///
/// The store knows exactly two live cache names: the static cache filled at
/// install time and the dynamic cache filled as responses are captured.
pub struct CacheStore<B: CacheBackend> {
  backend: Arc<B>,
  static_name: String,
  dynamic_name: String,
}

impl<B: CacheBackend> CacheStore<B> {
  pub fn new(backend: B, static_name: impl Into<String>, dynamic_name: impl Into<String>) -> Self {
    Self {
      backend: Arc::new(backend),
      static_name: static_name.into(),
      dynamic_name: dynamic_name.into(),
    }
  }

  pub fn static_name(&self) -> &str {
    &self.static_name
  }

  pub fn dynamic_name(&self) -> &str {
    &self.dynamic_name
  }

  /// Look up an entry in one named cache.
  pub fn lookup(&self, cache: &str, key: &RequestKey) -> Result<Option<StoredResponse>> {
    self.backend.lookup(cache, key)
  }

  /// Store an entry, overwriting any prior entry for the same key.
  pub fn put(&self, cache: &str, key: &RequestKey, response: &StoredResponse) -> Result<()> {
    self.backend.put(cache, key, response)
  }

  /// Look up a key across the current version's caches.
  ///
  /// Search order is fixed: static before dynamic. Pre-populated shell
  /// entries are authoritative; the dynamic cache only holds opportunistic
  /// copies captured after install.
  pub fn match_any(&self, key: &RequestKey) -> Result<Option<StoredResponse>> {
    if let Some(hit) = self.backend.lookup(&self.static_name, key)? {
      return Ok(Some(hit));
    }
    self.backend.lookup(&self.dynamic_name, key)
  }

  pub fn list_names(&self) -> Result<Vec<String>> {
    self.backend.list_names()
  }

  pub fn delete(&self, cache: &str) -> Result<bool> {
    self.backend.delete(cache)
  }

  /// All-or-nothing pre-population of one cache.
  ///
  /// Every key is fetched (concurrently, fail-fast) before anything is
  /// written, so a failed attempt leaves the cache exactly as it was. A
  /// non-2xx status counts as a failed fetch.
  pub async fn populate<F, Fut>(&self, cache: &str, keys: &[RequestKey], fetcher: F) -> Result<()>
  where
    F: Fn(RequestKey) -> Fut,
    Fut: Future<Output = Result<StoredResponse>>,
  {
    let fetches = keys.iter().cloned().map(|key| {
      let fetch = fetcher(key.clone());
      async move {
        let response = fetch
          .await
          .map_err(|e| eyre!("Failed to fetch {}: {}", key.description(), e))?;
        if !response.is_success() {
          return Err(eyre!(
            "Fetch for {} returned status {}",
            key.description(),
            response.status
          ));
        }
        Ok((key, response))
      }
    });

    let fetched = futures::future::try_join_all(fetches).await?;

    for (key, response) in &fetched {
      self.backend.put(cache, key, response)?;
    }

    Ok(())
  }
}

impl<B: CacheBackend> Clone for CacheStore<B> {
  fn clone(&self) -> Self {
    Self {
      backend: Arc::clone(&self.backend),
      static_name: self.static_name.clone(),
      dynamic_name: self.dynamic_name.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use reqwest::Method;
  use url::Url;

  fn key(path: &str) -> RequestKey {
    RequestKey::get(Url::parse(&format!("https://app.example.com{}", path)).unwrap())
  }

  fn response(body: &str) -> StoredResponse {
    StoredResponse::new(200, vec![], body.as_bytes().to_vec())
  }

  fn store() -> CacheStore<MemoryBackend> {
    CacheStore::new(MemoryBackend::new(), "awning-static-v1", "awning-dynamic-v1")
  }

  #[test]
  fn test_put_then_lookup_roundtrip() {
    let store = store();
    let key = key("/web/app.js");

    store
      .put("awning-static-v1", &key, &response("console.log(1)"))
      .unwrap();

    let hit = store.lookup("awning-static-v1", &key).unwrap().unwrap();
    assert_eq!(hit.body, b"console.log(1)");
    assert_eq!(hit.status, 200);
  }

  #[test]
  fn test_put_overwrites_prior_entry() {
    let store = store();
    let key = key("/web/app.js");

    store
      .put("awning-dynamic-v1", &key, &response("old"))
      .unwrap();
    store
      .put("awning-dynamic-v1", &key, &response("new"))
      .unwrap();

    let hit = store.lookup("awning-dynamic-v1", &key).unwrap().unwrap();
    assert_eq!(hit.body, b"new");
  }

  #[test]
  fn test_lookup_does_not_alias_methods() {
    let store = store();
    let url = Url::parse("https://app.example.com/data/tags").unwrap();

    store
      .put(
        "awning-dynamic-v1",
        &RequestKey::get(url.clone()),
        &response("get body"),
      )
      .unwrap();

    let miss = store
      .lookup("awning-dynamic-v1", &RequestKey::new(Method::POST, url))
      .unwrap();
    assert!(miss.is_none());
  }

  #[test]
  fn test_match_any_prefers_static() {
    let store = store();
    let key = key("/web/style.css");

    store
      .put("awning-static-v1", &key, &response("static copy"))
      .unwrap();
    store
      .put("awning-dynamic-v1", &key, &response("dynamic copy"))
      .unwrap();

    let hit = store.match_any(&key).unwrap().unwrap();
    assert_eq!(hit.body, b"static copy");
  }

  #[test]
  fn test_match_any_falls_back_to_dynamic() {
    let store = store();
    let key = key("/fonts/mono.woff2");

    store
      .put("awning-dynamic-v1", &key, &response("dynamic copy"))
      .unwrap();

    let hit = store.match_any(&key).unwrap().unwrap();
    assert_eq!(hit.body, b"dynamic copy");
  }

  #[test]
  fn test_delete_and_list_names() {
    let store = store();

    store
      .put("awning-static-v0", &key("/web/"), &response("old shell"))
      .unwrap();
    store
      .put("awning-static-v1", &key("/web/"), &response("shell"))
      .unwrap();

    assert_eq!(
      store.list_names().unwrap(),
      vec!["awning-static-v0", "awning-static-v1"]
    );

    assert!(store.delete("awning-static-v0").unwrap());
    assert!(!store.delete("awning-static-v0").unwrap());
    assert_eq!(store.list_names().unwrap(), vec!["awning-static-v1"]);
  }

  #[tokio::test]
  async fn test_populate_stores_every_key() {
    let store = store();
    let keys = vec![key("/web/"), key("/web/manifest.json")];

    store
      .populate("awning-static-v1", &keys, |key| async move {
        Ok(response(key.url().path()))
      })
      .await
      .unwrap();

    for key in &keys {
      assert!(store.lookup("awning-static-v1", key).unwrap().is_some());
    }
  }

  #[tokio::test]
  async fn test_populate_is_all_or_nothing() {
    let store = store();
    let keys = vec![key("/web/"), key("/web/manifest.json")];

    let result = store
      .populate("awning-static-v1", &keys, |key| async move {
        if key.url().path() == "/web/manifest.json" {
          Err(color_eyre::eyre::eyre!("connection refused"))
        } else {
          Ok(response("shell"))
        }
      })
      .await;

    assert!(result.is_err());
    for key in &keys {
      assert!(store.lookup("awning-static-v1", key).unwrap().is_none());
    }
    assert!(store.list_names().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_populate_rejects_error_status() {
    let store = store();
    let keys = vec![key("/web/icons/icon-192x192.png")];

    let result = store
      .populate("awning-static-v1", &keys, |_| async {
        Ok(StoredResponse::new(404, vec![], b"not found".to_vec()))
      })
      .await;

    assert!(result.is_err());
    assert!(store.list_names().unwrap().is_empty());
  }

  #[test]
  fn test_sqlite_roundtrip() {
    let backend = SqliteBackend::open_in_memory().unwrap();
    let key = key("/web/app.js");
    let stored = StoredResponse::new(
      200,
      vec![("Content-Type".to_string(), "text/javascript".to_string())],
      b"console.log(1)".to_vec(),
    );

    backend.put("awning-dynamic-v1", &key, &stored).unwrap();

    let hit = backend.lookup("awning-dynamic-v1", &key).unwrap().unwrap();
    assert_eq!(hit.status, 200);
    assert_eq!(hit.body, b"console.log(1)");
    assert_eq!(hit.content_type(), Some("text/javascript"));
    assert_eq!(
      hit.stored_at.timestamp_millis(),
      stored.stored_at.timestamp_millis()
    );

    assert_eq!(backend.list_names().unwrap(), vec!["awning-dynamic-v1"]);
    assert!(backend.delete("awning-dynamic-v1").unwrap());
    assert!(backend.lookup("awning-dynamic-v1", &key).unwrap().is_none());
  }
}
