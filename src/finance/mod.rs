//! Donation and expense records and the remote store that owns them.

mod client;
mod remote;
mod types;

pub use client::HttpRemoteStore;
pub use remote::RemoteStore;
pub use types::{Donation, Expense, MutationKind, Record, RecordType};
