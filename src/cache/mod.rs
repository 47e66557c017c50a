//! Local read-through cache of record lists.
//!
//! One entry per (owner, partition, record type) scope, persisted in SQLite so
//! the last known-good lists survive a restart and can be served offline.

mod key;
mod snapshot;
pub(crate) mod storage;

pub use key::ScopeKey;
pub use snapshot::{CacheEntry, CacheSource, Snapshot};
pub use storage::RecordCache;
