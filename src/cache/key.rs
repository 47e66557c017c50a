//! Cache scope keys.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::finance::RecordType;

/// Identifies one cache entry: (owner, partition, record type).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeKey {
  pub owner: String,
  /// Partition dimension; the year for donations and expenses
  pub partition: i32,
  pub record_type: RecordType,
}

impl ScopeKey {
  pub fn new(owner: impl Into<String>, partition: i32, record_type: RecordType) -> Self {
    Self {
      owner: owner.into(),
      partition,
      record_type,
    }
  }

  /// Stable, fixed-length storage key.
  pub fn cache_hash(&self) -> String {
    let input = format!(
      "{}:{}:{}",
      self.owner,
      self.partition,
      self.record_type.as_str()
    );

    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for ScopeKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}/{}/{}",
      self.owner,
      self.record_type.collection(),
      self.partition
    )
  }
}
