//! Remote store seam consumed by the sync coordinator.

use async_trait::async_trait;

use crate::error::RemoteError;

use super::types::{Record, RecordType};

/// Record-oriented remote store, scoped by owner and partition (year).
#[async_trait]
pub trait RemoteStore: Send + Sync {
  /// Create a record; the returned record is the server-confirmed version.
  async fn create(
    &self,
    owner: &str,
    record_type: RecordType,
    record: &Record,
  ) -> Result<Record, RemoteError>;

  /// List all records of a type for one owner and partition.
  async fn list(
    &self,
    owner: &str,
    record_type: RecordType,
    partition: i32,
  ) -> Result<Vec<Record>, RemoteError>;

  async fn update(
    &self,
    owner: &str,
    record_type: RecordType,
    record: &Record,
  ) -> Result<Record, RemoteError>;

  async fn delete(&self, owner: &str, record_type: RecordType, id: &str)
    -> Result<(), RemoteError>;
}
