//! Error taxonomy for the offline sync core.
//!
//! Storage, network, offline and auth failures stay distinct all the way up to
//! the caller so a front end can tell a stale-data banner from a hard error
//! from a "try again when online" message.

use thiserror::Error;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Local persistence failure (queue or cache).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
  #[error("Failed to {action}: {message}")]
  Database {
    action: &'static str,
    message: String,
  },

  #[error("Corrupt {what} in local storage: {message}")]
  Corrupt { what: &'static str, message: String },

  #[error("Mutation {0} is already queued")]
  DuplicateId(String),

  #[error("Lock poisoned")]
  LockPoisoned,
}

impl StorageError {
  /// Build a `map_err` adapter for a failed database call.
  pub(crate) fn db(action: &'static str) -> impl Fn(rusqlite::Error) -> Self {
    move |e| StorageError::Database {
      action,
      message: e.to_string(),
    }
  }

  pub(crate) fn corrupt(what: &'static str) -> impl Fn(serde_json::Error) -> Self {
    move |e| StorageError::Corrupt {
      what,
      message: e.to_string(),
    }
  }
}

/// Failure talking to the remote store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
  #[error("Unauthorized - credential missing or expired")]
  Unauthorized,

  #[error("Network unavailable: {0}")]
  Unavailable(String),

  #[error("Request timed out")]
  Timeout,

  #[error("Server error: {0}")]
  Server(String),

  #[error("Request rejected ({status}): {body}")]
  Rejected { status: u16, body: String },

  #[error("Invalid response: {0}")]
  InvalidResponse(String),
}

impl RemoteError {
  /// Truncate a response body to avoid logging excessive data
  fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
      return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
      end -= 1;
    }
    format!(
      "{}... (truncated, {} total bytes)",
      &body[..end],
      body.len()
    )
  }

  pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
    let truncated = Self::truncate_body(body);
    match status.as_u16() {
      401 => RemoteError::Unauthorized,
      408 => RemoteError::Timeout,
      500..=599 => RemoteError::Server(format!("{}: {}", status, truncated)),
      code => RemoteError::Rejected {
        status: code,
        body: truncated,
      },
    }
  }

  /// Whether the failure means "could not reach a healthy server" rather than
  /// "the server refused this request". Only transient failures fall back to
  /// the local queue or cache.
  pub fn is_transient(&self) -> bool {
    matches!(
      self,
      RemoteError::Unavailable(_) | RemoteError::Timeout | RemoteError::Server(_)
    )
  }
}

impl From<reqwest::Error> for RemoteError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_timeout() {
      RemoteError::Timeout
    } else if e.is_decode() {
      RemoteError::InvalidResponse(e.to_string())
    } else if let Some(status) = e.status() {
      RemoteError::from_status(status, "")
    } else {
      RemoteError::Unavailable(e.to_string())
    }
  }
}

/// Error surfaced by the sync coordinator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
  #[error(transparent)]
  Storage(#[from] StorageError),

  #[error(transparent)]
  Network(RemoteError),

  #[error("{operation} is unavailable while offline")]
  OfflineUnavailable { operation: &'static str },

  #[error("Authentication required: {0}")]
  Auth(String),

  #[error("Invalid record: {0}")]
  InvalidRecord(String),
}

impl From<RemoteError> for SyncError {
  fn from(e: RemoteError) -> Self {
    match e {
      RemoteError::Unauthorized => SyncError::Auth(e.to_string()),
      other => SyncError::Network(other),
    }
  }
}

impl SyncError {
  pub fn is_offline_unavailable(&self) -> bool {
    matches!(self, SyncError::OfflineUnavailable { .. })
  }
}
