//! What a record read hands back to the caller.

use chrono::{DateTime, Utc};

use crate::finance::Record;

use super::key::ScopeKey;

/// Indicates where a snapshot's records came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Last known-good data served before a refresh completes
  Cache,
  /// Fresh data from the remote store
  Network,
  /// Refresh failed; cached data is all there is
  Stale,
  /// Offline - no refresh attempted
  Offline,
}

/// One emission of a record read.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
  pub scope: ScopeKey,
  /// `None` when nothing has ever been cached for the scope
  pub records: Option<Vec<Record>>,
  pub source: CacheSource,
  /// When the records were last written locally
  pub cached_at: Option<DateTime<Utc>>,
}

impl Snapshot {
  pub fn new(scope: ScopeKey, entry: Option<CacheEntry>, source: CacheSource) -> Self {
    match entry {
      Some(entry) => Self {
        scope,
        records: Some(entry.records),
        source,
        cached_at: Some(entry.cached_at),
      },
      None => Self {
        scope,
        records: None,
        source,
        cached_at: None,
      },
    }
  }

  pub fn len(&self) -> usize {
    self.records.as_ref().map_or(0, Vec::len)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Age of the records for display; `None` when nothing was ever cached.
  pub fn age_display(&self) -> Option<String> {
    self.cached_at.map(age_display)
  }
}

/// A cached record list, always read and written as a whole.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
  pub records: Vec<Record>,
  pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
  pub fn age_display(&self) -> String {
    age_display(self.cached_at)
  }
}

fn age_display(cached_at: DateTime<Utc>) -> String {
  let minutes = (Utc::now() - cached_at).num_minutes();
  if minutes < 1 {
    // Also covers clock skew
    "just now".to_string()
  } else if minutes < 60 {
    format!("{}m ago", minutes)
  } else if minutes < 1440 {
    format!("{}h ago", minutes / 60)
  } else {
    format!("{}d ago", minutes / 1440)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::finance::RecordType;
  use chrono::Duration;

  #[test]
  fn test_age_display() {
    let mut entry = CacheEntry {
      records: Vec::new(),
      cached_at: Utc::now(),
    };
    assert_eq!(entry.age_display(), "just now");

    entry.cached_at = Utc::now() - Duration::minutes(90);
    assert_eq!(entry.age_display(), "1h ago");

    entry.cached_at = Utc::now() - Duration::days(3);
    assert_eq!(entry.age_display(), "3d ago");

    entry.cached_at = Utc::now() + Duration::minutes(10);
    assert_eq!(entry.age_display(), "just now");
  }

  #[test]
  fn test_empty_snapshot() {
    let scope = ScopeKey::new("u1", 2026, RecordType::Donation);
    let snapshot = Snapshot::new(scope, None, CacheSource::Offline);
    assert!(snapshot.is_empty());
    assert!(snapshot.records.is_none());
    assert!(snapshot.cached_at.is_none());
  }
}
