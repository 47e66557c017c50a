/// Schema for the local offline store.
pub const SCHEMA: &str = r#"
-- Additive writes waiting for the remote store (FIFO by enqueued_at, then seq)
CREATE TABLE IF NOT EXISTS pending_mutations (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL,
    payload BLOB NOT NULL,
    enqueued_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pending_mutations_order
    ON pending_mutations(enqueued_at, seq);

-- Last known record list per (owner, partition, record type)
CREATE TABLE IF NOT EXISTS record_cache (
    scope_hash TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    partition_key INTEGER NOT NULL,
    record_type TEXT NOT NULL,
    data BLOB NOT NULL,
    cached_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_record_cache_owner
    ON record_cache(owner_id, record_type);
"#;
