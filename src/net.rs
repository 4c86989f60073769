//! Network access behind a swappable fetch seam.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use url::Url;

use crate::cache::{RequestKey, StoredResponse};

/// A single outgoing request as seen by the interceptor.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self { method, url }
  }

  /// A plain GET request.
  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  /// Canonical cache key for this request.
  pub fn key(&self) -> RequestKey {
    RequestKey::new(self.method.clone(), self.url.clone())
  }
}

/// The network side of a strategy: fetch one request, capture the response.
///
/// A reachable server is an `Ok`, whatever the status code; `Err` means the
/// network itself failed. Strategies decide what a non-2xx status means.
#[async_trait]
pub trait Fetch: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<StoredResponse>;
}

/// reqwest-backed fetcher used outside of tests.
#[derive(Clone)]
pub struct NetworkClient {
  http: reqwest::Client,
}

impl NetworkClient {
  pub fn new() -> Result<Self> {
    let http = reqwest::Client::builder()
      .user_agent(concat!("awning/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { http })
  }
}

#[async_trait]
impl Fetch for NetworkClient {
  async fn fetch(&self, request: &Request) -> Result<StoredResponse> {
    let response = self
      .http
      .request(request.method.clone(), request.url.clone())
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|value| (name.to_string(), value.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body from {}: {}", request.url, e))?
      .to_vec();

    Ok(StoredResponse::new(status, headers, body))
  }
}
