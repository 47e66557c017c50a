//! Host-driven connectivity signal.
//!
//! The host environment owns the sending half and flips it whenever its
//! network-status signal changes; the coordinator only listens.

use std::fmt;

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
  Online,
  Offline,
}

impl Connectivity {
  pub fn from_online(online: bool) -> Self {
    if online {
      Connectivity::Online
    } else {
      Connectivity::Offline
    }
  }

  pub fn is_online(&self) -> bool {
    matches!(self, Connectivity::Online)
  }
}

impl fmt::Display for Connectivity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Connectivity::Online => f.write_str("online"),
      Connectivity::Offline => f.write_str("offline"),
    }
  }
}

/// Sending half held by the host environment.
#[derive(Debug)]
pub struct ConnectivitySignal {
  tx: watch::Sender<Connectivity>,
}

/// Create a signal seeded with the state observed at startup.
pub fn channel(initial: Connectivity) -> (ConnectivitySignal, watch::Receiver<Connectivity>) {
  let (tx, rx) = watch::channel(initial);
  (ConnectivitySignal { tx }, rx)
}

impl ConnectivitySignal {
  /// Report the current network status. Repeated reports of the same state
  /// do not wake listeners.
  pub fn set(&self, state: Connectivity) {
    self.tx.send_if_modified(|current| {
      if *current == state {
        false
      } else {
        *current = state;
        true
      }
    });
  }
}
