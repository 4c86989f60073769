//! Request classification: which strategy owns a request, if any.

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use url::Url;

use crate::config::Config;
use crate::net::Request;

/// Strategy class for an inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
  /// Navigable shell of the application, under the configured scope
  AppShell,
  /// Frequently changing payloads under the reserved data prefix
  LiveData,
  /// Any other same-origin GET resource
  StaticAsset,
  /// Not ours to handle: non-GET or cross-origin
  Ignore,
}

/// Routing rules derived from configuration.
#[derive(Debug, Clone)]
pub struct Routes {
  origin: Url,
  scope: String,
  data_prefix: String,
}

impl Routes {
  pub fn new(origin: Url, scope: impl Into<String>, data_prefix: impl Into<String>) -> Self {
    Self {
      origin,
      scope: scope.into(),
      data_prefix: data_prefix.into(),
    }
  }

  pub fn from_config(config: &Config) -> Result<Self> {
    let origin = Url::parse(&config.gateway.url)
      .map_err(|e| eyre!("Invalid gateway url {}: {}", config.gateway.url, e))?;

    Ok(Self::new(
      origin,
      config.gateway.scope.clone(),
      config.gateway.data_prefix.clone(),
    ))
  }

  /// Resolve an absolute path against the serving origin.
  pub fn resource(&self, path: &str) -> Result<Url> {
    self
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid resource path {}: {}", path, e))
  }

  /// Classify one request. Pure function of request metadata.
  ///
  /// Rules, in order:
  /// 1. Non-GET methods are never intercepted.
  /// 2. Cross-origin requests are never intercepted.
  /// 3. Paths under the data prefix are live data.
  /// 4. Paths under the application scope are app shell.
  /// 5. Everything else is a static asset.
  pub fn classify(&self, request: &Request) -> RouteClass {
    if request.method != Method::GET {
      return RouteClass::Ignore;
    }

    if request.url.origin() != self.origin.origin() {
      return RouteClass::Ignore;
    }

    let path = request.url.path();
    if path.starts_with(&self.data_prefix) {
      return RouteClass::LiveData;
    }

    if path.starts_with(&self.scope) {
      return RouteClass::AppShell;
    }

    RouteClass::StaticAsset
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn routes() -> Routes {
    Routes::new(
      Url::parse("https://app.example.com").unwrap(),
      "/web/",
      "/data/",
    )
  }

  fn get(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
  }

  #[test]
  fn test_non_get_is_ignored() {
    let request = Request::new(
      Method::POST,
      Url::parse("https://app.example.com/web/").unwrap(),
    );
    assert_eq!(routes().classify(&request), RouteClass::Ignore);
  }

  #[test]
  fn test_cross_origin_is_ignored() {
    assert_eq!(
      routes().classify(&get("https://cdn.example.net/lib.js")),
      RouteClass::Ignore
    );
    // Same host, different port is a different origin
    assert_eq!(
      routes().classify(&get("https://app.example.com:8443/web/")),
      RouteClass::Ignore
    );
  }

  #[test]
  fn test_data_prefix_is_live_data() {
    assert_eq!(
      routes().classify(&get("https://app.example.com/data/tags?limit=10")),
      RouteClass::LiveData
    );
  }

  #[test]
  fn test_scope_is_app_shell() {
    assert_eq!(
      routes().classify(&get("https://app.example.com/web/")),
      RouteClass::AppShell
    );
    assert_eq!(
      routes().classify(&get("https://app.example.com/web/views/overview")),
      RouteClass::AppShell
    );
  }

  #[test]
  fn test_other_same_origin_is_static_asset() {
    assert_eq!(
      routes().classify(&get("https://app.example.com/fonts/mono.woff2")),
      RouteClass::StaticAsset
    );
  }

  #[test]
  fn test_resource_resolves_against_origin() {
    let url = routes().resource("/web/offline.html").unwrap();
    assert_eq!(url.as_str(), "https://app.example.com/web/offline.html");
  }
}
