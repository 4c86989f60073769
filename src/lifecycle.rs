//! Install/activate lifecycle for the gateway.

use color_eyre::Result;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cache::{CacheBackend, CacheStore, RequestKey};
use crate::event::LifecycleEvent;
use crate::net::{Fetch, Request};
use crate::route::Routes;

/// Lifecycle states, in order. A manager that has not installed yet (or
/// whose install attempt failed) has no state at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Installing,
  Installed,
  Activating,
  Active,
}

/// Drives installation, activation, and takeover for one gateway version.
pub struct LifecycleManager<B: CacheBackend, N: Fetch + Clone> {
  store: CacheStore<B>,
  net: N,
  routes: Routes,
  manifest: Vec<String>,
  version: String,
  state: Option<LifecycleState>,
  skip_waiting: bool,
  /// Identifier of the version currently governing requests, if any
  controller: Option<String>,
  events: mpsc::UnboundedSender<LifecycleEvent>,
}

impl<B: CacheBackend, N: Fetch + Clone> LifecycleManager<B, N> {
  pub fn new(
    store: CacheStore<B>,
    net: N,
    routes: Routes,
    manifest: Vec<String>,
    version: impl Into<String>,
    events: mpsc::UnboundedSender<LifecycleEvent>,
  ) -> Self {
    Self {
      store,
      net,
      routes,
      manifest,
      version: version.into(),
      state: None,
      skip_waiting: false,
      controller: None,
      events,
    }
  }

  /// Mark an older version as currently controlling the page.
  pub fn with_controller(mut self, controller: impl Into<String>) -> Self {
    self.controller = Some(controller.into());
    self
  }

  pub fn state(&self) -> Option<LifecycleState> {
    self.state
  }

  /// Whether a completed install asked to take over without waiting.
  pub fn skip_waiting(&self) -> bool {
    self.skip_waiting
  }

  /// Install: pre-populate the static cache from the manifest.
  ///
  /// All-or-nothing: one failed manifest fetch aborts the attempt, leaves
  /// the static cache untouched, and resets the state so a later attempt
  /// starts fresh. On success the skip-waiting flag is set and, if an older
  /// version still controls the page, an update notification goes out.
  pub async fn install(&mut self) -> Result<()> {
    self.state = Some(LifecycleState::Installing);
    info!("Installing {} ({} manifest entries)", self.version, self.manifest.len());

    let keys = self
      .manifest
      .iter()
      .map(|path| self.routes.resource(path).map(RequestKey::get))
      .collect::<Result<Vec<_>>>()?;

    let static_name = self.store.static_name().to_string();
    let result = self
      .store
      .populate(&static_name, &keys, |key| {
        let net = self.net.clone();
        async move { net.fetch(&Request::get(key.url().clone())).await }
      })
      .await;

    match result {
      Ok(()) => {
        self.state = Some(LifecycleState::Installed);
        self.skip_waiting = true;
        info!("Installed {} into {}", self.version, static_name);

        if self.controller.is_some() {
          self.emit(LifecycleEvent::UpdateAvailable {
            version: self.version.clone(),
          });
        }

        Ok(())
      }
      Err(e) => {
        // Not partially committed; the previous version keeps serving
        self.state = None;
        warn!("Install of {} failed: {}", self.version, e);
        Err(e)
      }
    }
  }

  /// Activate: prune caches from superseded versions, then claim requests.
  ///
  /// Every cache name that is neither the current static nor dynamic name
  /// belongs to an earlier deploy and is deleted wholesale.
  pub fn activate(&mut self) -> Result<()> {
    self.state = Some(LifecycleState::Activating);

    let keep = [self.store.static_name(), self.store.dynamic_name()];
    for name in self.store.list_names()? {
      if !keep.contains(&name.as_str()) {
        info!("Pruning cache from superseded version: {}", name);
        self.store.delete(&name)?;
      }
    }

    self.claim();
    self.state = Some(LifecycleState::Active);
    info!("Activated {}", self.version);

    Ok(())
  }

  /// Take over request governance immediately, without a reload.
  fn claim(&mut self) {
    self.controller = Some(self.version.clone());
  }

  /// Handle an opaque message from the host shell.
  ///
  /// Only the type tag is inspected; `background-sync` is acknowledged with
  /// an event, everything else is ignored.
  pub fn handle_message(&self, payload: &serde_json::Value) {
    match payload.get("type").and_then(|tag| tag.as_str()) {
      Some("background-sync") => {
        info!("Background sync message handled");
        self.emit(LifecycleEvent::BackgroundSyncHandled);
      }
      tag => {
        debug!("Ignoring message with type tag {:?}", tag);
      }
    }
  }

  /// Best-effort send; the receiving shell may be gone.
  fn emit(&self, event: LifecycleEvent) {
    let _ = self.events.send(event);
  }
}
