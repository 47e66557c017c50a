//! Durable queue of additive writes made while offline.
//!
//! Every pending mutation is one row; replay order is `enqueued_at`, ties
//! broken by insertion order.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::storage::{format_timestamp, parse_timestamp};
use crate::db::Database;
use crate::error::StorageError;
use crate::finance::{MutationKind, Record};

/// An additive write waiting for the remote store. Never modified once queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMutation {
  /// Same id the record keeps once the remote store has it
  pub id: String,
  pub kind: MutationKind,
  pub payload: Record,
  pub enqueued_at: DateTime<Utc>,
}

pub struct MutationQueue {
  db: Arc<Database>,
}

impl MutationQueue {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }

  /// Persist a new mutation. The id comes from the payload when it has one,
  /// otherwise a fresh one is generated and written into the payload.
  pub fn enqueue(
    &self,
    kind: MutationKind,
    mut payload: Record,
  ) -> Result<QueuedMutation, StorageError> {
    let id = payload.ensure_id();
    let data = serde_json::to_vec(&payload).map_err(StorageError::corrupt("mutation payload"))?;

    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(StorageError::db("begin transaction"))?;

    let exists: Option<i64> = tx
      .query_row(
        "SELECT seq FROM pending_mutations WHERE id = ?",
        params![id],
        |row| row.get(0),
      )
      .optional()
      .map_err(StorageError::db("check pending mutation"))?;
    if exists.is_some() {
      return Err(StorageError::DuplicateId(id));
    }

    // Keep stamps monotonic even if the wall clock steps backwards
    let latest: Option<String> = tx
      .query_row("SELECT MAX(enqueued_at) FROM pending_mutations", [], |row| {
        row.get(0)
      })
      .map_err(StorageError::db("read latest enqueue time"))?;
    let now = Utc::now();
    let enqueued_at = match latest.as_deref().map(parse_timestamp).transpose()? {
      Some(latest) if latest > now => latest,
      _ => now,
    };

    tx.execute(
      "INSERT INTO pending_mutations (id, kind, payload, enqueued_at) VALUES (?, ?, ?, ?)",
      params![id, kind.as_str(), data, format_timestamp(&enqueued_at)],
    )
    .map_err(StorageError::db("enqueue mutation"))?;
    tx.commit().map_err(StorageError::db("commit transaction"))?;

    debug!(id = %id, kind = kind.as_str(), "Mutation queued");

    Ok(QueuedMutation {
      id,
      kind,
      payload,
      enqueued_at,
    })
  }

  /// All pending mutations in replay order. Has no side effects.
  pub fn list_pending(&self) -> Result<Vec<QueuedMutation>, StorageError> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare(
        "SELECT id, kind, payload, enqueued_at FROM pending_mutations
         ORDER BY enqueued_at, seq",
      )
      .map_err(StorageError::db("prepare pending query"))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, Vec<u8>>(2)?,
          row.get::<_, String>(3)?,
        ))
      })
      .map_err(StorageError::db("query pending mutations"))?;

    let mut pending = Vec::new();
    for row in rows {
      let (id, kind, payload, enqueued_at) =
        row.map_err(StorageError::db("read pending mutation"))?;

      let kind = kind.parse::<MutationKind>().map_err(|message| StorageError::Corrupt {
        what: "mutation kind",
        message,
      })?;
      let payload: Record =
        serde_json::from_slice(&payload).map_err(StorageError::corrupt("mutation payload"))?;

      pending.push(QueuedMutation {
        id,
        kind,
        payload,
        enqueued_at: parse_timestamp(&enqueued_at)?,
      });
    }

    Ok(pending)
  }

  /// Delete a mutation. Removing an id that is not queued is a no-op.
  pub fn remove(&self, id: &str) -> Result<(), StorageError> {
    let removed = self
      .db
      .conn()?
      .execute("DELETE FROM pending_mutations WHERE id = ?", params![id])
      .map_err(StorageError::db("remove mutation"))?;

    if removed == 0 {
      debug!(id = %id, "Mutation already removed");
    }
    Ok(())
  }

  pub fn count(&self) -> Result<u64, StorageError> {
    self
      .db
      .conn()?
      .query_row("SELECT COUNT(*) FROM pending_mutations", [], |row| {
        row.get::<_, i64>(0)
      })
      .map(|count| count.max(0) as u64)
      .map_err(StorageError::db("count pending mutations"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn queue() -> MutationQueue {
    MutationQueue::new(Arc::new(Database::open_in_memory().unwrap()))
  }

  fn payload(value: serde_json::Value) -> Record {
    Record::from_value(value).unwrap()
  }

  #[test]
  fn test_enqueue_uses_payload_id() {
    let queue = queue();
    let queued = queue
      .enqueue(
        MutationKind::AddDonation,
        payload(json!({
          "id": "a1",
          "donorName": "Ali",
          "pledgedAmount": 100,
          "paidAmount": 0,
          "date": "2026-03-01",
          "year": 2026
        })),
      )
      .unwrap();
    assert_eq!(queued.id, "a1");

    let pending = queue.list_pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0], queued);
  }

  #[test]
  fn test_enqueue_generates_id_into_payload() {
    let queue = queue();
    let queued = queue
      .enqueue(MutationKind::AddExpense, payload(json!({"amount": 12, "year": 2026})))
      .unwrap();

    assert!(!queued.id.is_empty());
    assert_eq!(queued.payload.id(), Some(queued.id.as_str()));
  }

  #[test]
  fn test_list_pending_is_fifo_and_repeatable() {
    let queue = queue();
    for i in 0..5 {
      queue
        .enqueue(
          MutationKind::AddDonation,
          payload(json!({"id": format!("m{}", i), "year": 2026})),
        )
        .unwrap();
    }

    let first: Vec<String> = queue.list_pending().unwrap().into_iter().map(|m| m.id).collect();
    let second: Vec<String> = queue.list_pending().unwrap().into_iter().map(|m| m.id).collect();
    assert_eq!(first, vec!["m0", "m1", "m2", "m3", "m4"]);
    assert_eq!(first, second);
    assert_eq!(queue.count().unwrap(), 5);
  }

  #[test]
  fn test_equal_timestamps_keep_insertion_order() {
    let queue = queue();
    {
      let conn = queue.db.conn().unwrap();
      for id in ["z", "a", "m"] {
        conn
          .execute(
            "INSERT INTO pending_mutations (id, kind, payload, enqueued_at) VALUES (?, ?, ?, ?)",
            params![
              id,
              "AddDonation",
              serde_json::to_vec(&json!({"id": id})).unwrap(),
              "2026-03-01T10:00:00.000000000Z"
            ],
          )
          .unwrap();
      }
    }

    let ids: Vec<String> = queue.list_pending().unwrap().into_iter().map(|m| m.id).collect();
    assert_eq!(ids, vec!["z", "a", "m"]);
  }

  #[test]
  fn test_stamps_never_go_backwards() {
    let queue = queue();
    let future = "2999-01-01T00:00:00.000000000Z";
    queue
      .db
      .conn()
      .unwrap()
      .execute(
        "INSERT INTO pending_mutations (id, kind, payload, enqueued_at) VALUES ('f', 'AddExpense', ?, ?)",
        params![serde_json::to_vec(&json!({"id": "f"})).unwrap(), future],
      )
      .unwrap();

    let queued = queue
      .enqueue(MutationKind::AddExpense, payload(json!({"id": "n", "year": 2026})))
      .unwrap();
    assert_eq!(format_timestamp(&queued.enqueued_at), future);

    let ids: Vec<String> = queue.list_pending().unwrap().into_iter().map(|m| m.id).collect();
    assert_eq!(ids, vec!["f", "n"]);
  }

  #[test]
  fn test_duplicate_id_is_an_error() {
    let queue = queue();
    queue
      .enqueue(MutationKind::AddDonation, payload(json!({"id": "a1", "year": 2026})))
      .unwrap();
    let err = queue
      .enqueue(MutationKind::AddDonation, payload(json!({"id": "a1", "year": 2026})))
      .unwrap_err();
    assert_eq!(err, StorageError::DuplicateId("a1".to_string()));
    assert_eq!(queue.count().unwrap(), 1);
  }

  #[test]
  fn test_remove_is_idempotent() {
    let queue = queue();
    queue
      .enqueue(MutationKind::AddDonation, payload(json!({"id": "a1", "year": 2026})))
      .unwrap();

    queue.remove("a1").unwrap();
    queue.remove("a1").unwrap();
    queue.remove("never-queued").unwrap();
    assert_eq!(queue.count().unwrap(), 0);
  }

  #[test]
  fn test_queue_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
      let queue = MutationQueue::new(Arc::new(Database::open(dir.path()).unwrap()));
      queue
        .enqueue(MutationKind::AddExpense, payload(json!({"id": "e1", "year": 2026})))
        .unwrap();
    }

    let reopened = MutationQueue::new(Arc::new(Database::open(dir.path()).unwrap()));
    let pending = reopened.list_pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].kind, MutationKind::AddExpense);
  }
}
