//! Notifications the sync core pushes to its front end.

use tokio::sync::broadcast;

use crate::finance::MutationKind;
use crate::sync::{Connectivity, DrainReport};

/// Buffered notifications per subscriber before the oldest are dropped
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
  /// The coordinator's connectivity state flipped
  ConnectivityChanged(Connectivity),
  /// An additive write was stored locally instead of reaching the server
  MutationQueued { id: String, kind: MutationKind },
  /// A drain pass finished
  DrainCompleted(DrainReport),
}

/// Fan-out of sync events to any number of subscribers
#[derive(Debug)]
pub struct EventBus {
  tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
  pub fn new() -> Self {
    let (tx, _rx) = broadcast::channel(EVENT_CAPACITY);
    Self { tx }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
    self.tx.subscribe()
  }

  /// Publish an event; having no subscribers is fine.
  pub fn emit(&self, event: SyncEvent) {
    let _ = self.tx.send(event);
  }
}

impl Default for EventBus {
  fn default() -> Self {
    Self::new()
  }
}
