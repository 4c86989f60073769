use tokio::sync::mpsc;

/// Notifications surfaced to the host shell.
///
/// The core only emits these; rendering them (update banner, sync toast) is
/// the host's concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
  /// A new version finished installing while an older one still controls
  /// the page
  UpdateAvailable { version: String },
  /// A background-sync message was acknowledged
  BackgroundSyncHandled,
}

/// Receiving half of the lifecycle event channel.
pub struct EventReceiver {
  rx: mpsc::UnboundedReceiver<LifecycleEvent>,
}

impl EventReceiver {
  /// Wait for the next event.
  #[allow(dead_code)]
  pub async fn next(&mut self) -> Option<LifecycleEvent> {
    self.rx.recv().await
  }

  /// Drain one pending event without waiting.
  pub fn try_next(&mut self) -> Option<LifecycleEvent> {
    self.rx.try_recv().ok()
  }
}

/// Create the lifecycle event channel.
pub fn channel() -> (mpsc::UnboundedSender<LifecycleEvent>, EventReceiver) {
  let (tx, rx) = mpsc::unbounded_channel();
  (tx, EventReceiver { rx })
}
