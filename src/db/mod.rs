//! SQLite database shared by the mutation queue and the record cache.

pub mod schema;

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::error::StorageError;

/// Database file name inside the data directory
const DATABASE_FILE: &str = "ledgerline.db";

/// Database connection wrapper for offline state
pub struct Database {
  conn: Mutex<Connection>,
}

impl Database {
  /// Open or create the database inside `data_dir`
  pub fn open(data_dir: &Path) -> Result<Self, StorageError> {
    std::fs::create_dir_all(data_dir).map_err(|e| StorageError::Database {
      action: "create data directory",
      message: format!("{}: {}", data_dir.display(), e),
    })?;

    let path = data_dir.join(DATABASE_FILE);
    let conn = Connection::open(&path).map_err(|e| StorageError::Database {
      action: "open database",
      message: format!("{}: {}", path.display(), e),
    })?;

    Self::with_connection(conn)
  }

  /// Open a private in-memory database
  pub fn open_in_memory() -> Result<Self, StorageError> {
    let conn = Connection::open_in_memory().map_err(StorageError::db("open database"))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self, StorageError> {
    let db = Self {
      conn: Mutex::new(conn),
    };
    db.run_migrations()?;
    Ok(db)
  }

  /// Get the default data directory
  pub fn default_dir() -> Option<PathBuf> {
    dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .map(|p| p.join("ledgerline"))
  }

  /// Run database migrations
  fn run_migrations(&self) -> Result<(), StorageError> {
    self
      .conn()?
      .execute_batch(schema::SCHEMA)
      .map_err(StorageError::db("run migrations"))
  }

  /// Lock the connection. The guard must not be held across an `.await`.
  pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
    self.conn.lock().map_err(|_| StorageError::LockPoisoned)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_open_creates_file_and_tables() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path()).unwrap();
    assert!(dir.path().join(DATABASE_FILE).exists());

    let conn = db.conn().unwrap();
    let tables: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
         AND name IN ('pending_mutations', 'record_cache')",
        [],
        |row| row.get(0),
      )
      .unwrap();
    assert_eq!(tables, 2);
  }

  #[test]
  fn test_migrations_are_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    drop(Database::open(dir.path()).unwrap());
    assert!(Database::open(dir.path()).is_ok());
  }
}
