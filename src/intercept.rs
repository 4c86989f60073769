//! The fetch interceptor: one cache-or-network decision per request.
//!
//! Every strategy runs the same fixed ordering: classify, primary source,
//! fallback source, synthesized default. A handled request always produces
//! a response; only `Ignore` declines. Cache I/O failures inside a strategy
//! downgrade to a log line and the next fallback step.

use tracing::{debug, warn};

use crate::cache::{CacheBackend, CacheStore, RequestKey, StoredResponse};
use crate::net::{Fetch, Request};
use crate::route::{RouteClass, Routes};

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh from the network
  Network,
  /// A previously captured response
  Cache,
  /// The reserved offline page entry
  OfflinePage,
  /// Synthesized in place; nothing cached and no network
  Synthetic,
}

/// A response plus where it came from.
#[derive(Debug, Clone)]
pub struct ServedResponse {
  pub response: StoredResponse,
  pub source: ResponseSource,
}

impl ServedResponse {
  fn new(response: StoredResponse, source: ResponseSource) -> Self {
    Self { response, source }
  }
}

/// Outcome of one interception.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
  /// The request is not ours; it passes through untouched
  Passthrough,
  /// A response produced by the matching strategy
  Served(ServedResponse),
}

/// Routes every request through the cache layer.
///
/// Explicitly constructed over its collaborators; holds no ambient state.
pub struct Interceptor<B: CacheBackend, N: Fetch> {
  store: CacheStore<B>,
  net: N,
  routes: Routes,
  /// Key of the reserved offline fallback page, if one is configured
  offline_page: Option<RequestKey>,
}

impl<B: CacheBackend, N: Fetch> Interceptor<B, N> {
  pub fn new(
    store: CacheStore<B>,
    net: N,
    routes: Routes,
    offline_page: Option<RequestKey>,
  ) -> Self {
    Self {
      store,
      net,
      routes,
      offline_page,
    }
  }

  /// Route one request through its strategy.
  ///
  /// Never fails for the handled classes: every failure path inside a
  /// strategy ends, at worst, at a synthesized response.
  pub async fn intercept(&self, request: &Request) -> FetchOutcome {
    match self.routes.classify(request) {
      RouteClass::Ignore => FetchOutcome::Passthrough,
      RouteClass::AppShell => FetchOutcome::Served(self.handle_app_shell(request).await),
      RouteClass::LiveData => FetchOutcome::Served(self.handle_live_data(request).await),
      RouteClass::StaticAsset => FetchOutcome::Served(self.handle_static_asset(request).await),
    }
  }

  /// App-shell strategy: network first, cache fallback, offline page,
  /// synthesized notice.
  ///
  /// 1. Try the network; a 2xx response is captured into the dynamic cache
  ///    and returned.
  /// 2. Fall back to the dynamic cache.
  /// 3. Fall back to the reserved offline page entry.
  /// 4. Synthesize a minimal HTML offline notice.
  ///
  /// A non-2xx status follows the same fallback chain as a network failure.
  async fn handle_app_shell(&self, request: &Request) -> ServedResponse {
    let key = request.key();

    match self.net.fetch(request).await {
      Ok(response) if response.is_success() => {
        self.capture(&key, &response);
        return ServedResponse::new(response, ResponseSource::Network);
      }
      Ok(response) => {
        debug!(
          "App shell fetch for {} returned status {}, trying cache",
          request.url, response.status
        );
      }
      Err(e) => {
        debug!("App shell fetch for {} failed, trying cache: {}", request.url, e);
      }
    }

    if let Some(cached) = self.cached(self.store.dynamic_name(), &key) {
      return ServedResponse::new(cached, ResponseSource::Cache);
    }

    if let Some(offline_key) = &self.offline_page {
      if let Some(page) = self.matched(offline_key) {
        return ServedResponse::new(page, ResponseSource::OfflinePage);
      }
    }

    ServedResponse::new(StoredResponse::offline_page(), ResponseSource::Synthetic)
  }

  /// Live-data strategy: network first, stale cache fallback, JSON error.
  ///
  /// 1. Try the network; any reachable response is returned verbatim and
  ///    never cached.
  /// 2. Fall back to the dynamic cache; a stale copy beats a hard failure.
  /// 3. Synthesize a JSON error body with the offline flag set.
  async fn handle_live_data(&self, request: &Request) -> ServedResponse {
    match self.net.fetch(request).await {
      Ok(response) => ServedResponse::new(response, ResponseSource::Network),
      Err(e) => {
        debug!("Data fetch for {} failed, trying cache: {}", request.url, e);

        let key = request.key();
        match self.cached(self.store.dynamic_name(), &key) {
          Some(cached) => ServedResponse::new(cached, ResponseSource::Cache),
          None => ServedResponse::new(StoredResponse::offline_json(), ResponseSource::Synthetic),
        }
      }
    }
  }

  /// Static-asset strategy: cache first, network fallback, HTML notice.
  ///
  /// 1. Look up both current caches, static before dynamic (see
  ///    `CacheStore::match_any`); a hit skips the network entirely.
  /// 2. Fetch; a 2xx response is captured into the dynamic cache and
  ///    returned.
  /// 3. Synthesize a minimal HTML notice.
  ///
  /// A non-2xx status follows the same fallback chain as a network failure.
  async fn handle_static_asset(&self, request: &Request) -> ServedResponse {
    let key = request.key();

    if let Some(cached) = self.matched(&key) {
      return ServedResponse::new(cached, ResponseSource::Cache);
    }

    match self.net.fetch(request).await {
      Ok(response) if response.is_success() => {
        self.capture(&key, &response);
        ServedResponse::new(response, ResponseSource::Network)
      }
      Ok(response) => {
        debug!(
          "Static fetch for {} returned status {}",
          request.url, response.status
        );
        ServedResponse::new(StoredResponse::offline_asset(), ResponseSource::Synthetic)
      }
      Err(e) => {
        debug!("Static fetch for {} failed: {}", request.url, e);
        ServedResponse::new(StoredResponse::offline_asset(), ResponseSource::Synthetic)
      }
    }
  }

  /// Store a copy in the dynamic cache. Write failures downgrade to a log
  /// line; the response is served regardless.
  fn capture(&self, key: &RequestKey, response: &StoredResponse) {
    if let Err(e) = self.store.put(self.store.dynamic_name(), key, response) {
      warn!("Failed to cache {}: {}", key.description(), e);
    }
  }

  /// Lookup in one cache, treating storage errors as misses.
  fn cached(&self, cache: &str, key: &RequestKey) -> Option<StoredResponse> {
    match self.store.lookup(cache, key) {
      Ok(hit) => hit,
      Err(e) => {
        warn!("Cache lookup for {} failed: {}", key.description(), e);
        None
      }
    }
  }

  /// Lookup across the current caches, treating storage errors as misses.
  fn matched(&self, key: &RequestKey) -> Option<StoredResponse> {
    match self.store.match_any(key) {
      Ok(hit) => hit,
      Err(e) => {
        warn!("Cache match for {} failed: {}", key.description(), e);
        None
      }
    }
  }
}
