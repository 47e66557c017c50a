//! Offline-aware sync: connectivity tracking, the coordinator, and queue replay.

mod connectivity;
mod coordinator;

#[cfg(test)]
pub(crate) mod testing;

pub use connectivity::{channel, Connectivity, ConnectivitySignal};
pub use coordinator::{AddOutcome, DrainReport, SyncCoordinator};
