//! SQLite-backed read-through cache of record lists.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::Database;
use crate::error::StorageError;
use crate::finance::{Record, RecordType};

use super::key::ScopeKey;
use super::snapshot::CacheEntry;

/// Last known record list per scope key.
///
/// Entries are replaced wholesale, never patched in place, and are never
/// evicted: the key space is bounded by owners x years x record types.
pub struct RecordCache {
  db: Arc<Database>,
}

impl RecordCache {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }

  /// Look up the cached list for a scope. Never touches the network.
  pub fn read(&self, scope: &ScopeKey) -> Result<Option<CacheEntry>, StorageError> {
    let conn = self.db.conn()?;
    read_entry(&conn, scope)
  }

  /// Replace the cached list for a scope.
  pub fn write(&self, scope: &ScopeKey, records: &[Record]) -> Result<CacheEntry, StorageError> {
    let conn = self.db.conn()?;
    write_entry(&conn, scope, records)
  }

  /// Add one record to a scope's list (replacing a record with the same id).
  /// Read and rewrite happen in one transaction.
  pub fn append(&self, scope: &ScopeKey, record: Record) -> Result<CacheEntry, StorageError> {
    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(StorageError::db("begin transaction"))?;

    let mut records = read_entry(&tx, scope)?
      .map(|entry| entry.records)
      .unwrap_or_default();

    match record
      .id()
      .and_then(|id| records.iter().position(|r| r.id() == Some(id)))
    {
      Some(position) => records[position] = record,
      None => records.push(record),
    }

    let entry = write_entry(&tx, scope, &records)?;
    tx.commit().map_err(StorageError::db("commit transaction"))?;
    Ok(entry)
  }

  /// Apply a confirmed update to every cached list of the owner and record
  /// type. The record is replaced in place in its own partition (or appended
  /// if that list is cached but lacks it) and dropped from any other
  /// partition it used to live in. Returns the number of rewritten entries.
  pub fn apply_update(
    &self,
    owner: &str,
    record_type: RecordType,
    partition: i32,
    record: &Record,
  ) -> Result<usize, StorageError> {
    let Some(id) = record.id() else {
      return Ok(0);
    };

    self.rewrite_scopes(owner, record_type, |scope, records| {
      let position = records.iter().position(|r| r.id() == Some(id));
      if scope.partition == partition {
        match position {
          Some(p) => records[p] = record.clone(),
          None => records.push(record.clone()),
        }
        true
      } else if let Some(p) = position {
        records.remove(p);
        true
      } else {
        false
      }
    })
  }

  /// Drop a record from every cached list of the owner and record type.
  pub fn remove_record(
    &self,
    owner: &str,
    record_type: RecordType,
    id: &str,
  ) -> Result<usize, StorageError> {
    self.rewrite_scopes(owner, record_type, |_, records| {
      let before = records.len();
      records.retain(|r| r.id() != Some(id));
      records.len() != before
    })
  }

  fn rewrite_scopes<F>(
    &self,
    owner: &str,
    record_type: RecordType,
    mut edit: F,
  ) -> Result<usize, StorageError>
  where
    F: FnMut(&ScopeKey, &mut Vec<Record>) -> bool,
  {
    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(StorageError::db("begin transaction"))?;

    let partitions: Vec<i32> = {
      let mut stmt = tx
        .prepare(
          "SELECT partition_key FROM record_cache
           WHERE owner_id = ? AND record_type = ?
           ORDER BY partition_key",
        )
        .map_err(StorageError::db("prepare cache scan"))?;

      let rows = stmt
        .query_map(params![owner, record_type.as_str()], |row| row.get(0))
        .map_err(StorageError::db("scan cache"))?;
      rows
        .collect::<Result<_, _>>()
        .map_err(StorageError::db("scan cache"))?
    };

    let mut rewritten = 0;
    for partition in partitions {
      let scope = ScopeKey::new(owner, partition, record_type);
      let Some(entry) = read_entry(&tx, &scope)? else {
        continue;
      };
      let mut records = entry.records;
      if edit(&scope, &mut records) {
        write_entry(&tx, &scope, &records)?;
        rewritten += 1;
      }
    }

    tx.commit().map_err(StorageError::db("commit transaction"))?;
    Ok(rewritten)
  }
}

fn read_entry(conn: &Connection, scope: &ScopeKey) -> Result<Option<CacheEntry>, StorageError> {
  let row: Option<(Vec<u8>, String)> = conn
    .query_row(
      "SELECT data, cached_at FROM record_cache WHERE scope_hash = ?",
      params![scope.cache_hash()],
      |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()
    .map_err(StorageError::db("read cache entry"))?;

  let Some((data, cached_at)) = row else {
    return Ok(None);
  };

  let records: Vec<Record> =
    serde_json::from_slice(&data).map_err(StorageError::corrupt("cache entry"))?;
  let cached_at = parse_timestamp(&cached_at)?;

  Ok(Some(CacheEntry { records, cached_at }))
}

fn write_entry(
  conn: &Connection,
  scope: &ScopeKey,
  records: &[Record],
) -> Result<CacheEntry, StorageError> {
  let data = serde_json::to_vec(records).map_err(StorageError::corrupt("cache entry"))?;
  let cached_at = Utc::now();

  conn
    .execute(
      "INSERT OR REPLACE INTO record_cache
         (scope_hash, owner_id, partition_key, record_type, data, cached_at)
       VALUES (?, ?, ?, ?, ?, ?)",
      params![
        scope.cache_hash(),
        scope.owner,
        scope.partition,
        scope.record_type.as_str(),
        data,
        format_timestamp(&cached_at),
      ],
    )
    .map_err(StorageError::db("write cache entry"))?;

  Ok(CacheEntry {
    records: records.to_vec(),
    cached_at,
  })
}

/// RFC 3339 with fixed nanosecond precision so stored stamps sort as text.
pub(crate) fn format_timestamp(at: &DateTime<Utc>) -> String {
  at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StorageError> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| StorageError::Corrupt {
      what: "timestamp",
      message: format!("'{}': {}", s, e),
    })
}
