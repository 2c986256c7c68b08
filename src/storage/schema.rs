//! SQLite schema for stored items and session history
//!
//! Urls are unique per source at the table level. Names are only indexed:
//! the sink checks them under its connection lock before inserting.

/// Statements run on every open; all of them are idempotent
pub const SCHEMA_SQL: &str = r#"
-- Track crawl sessions
CREATE TABLE IF NOT EXISTS sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    filters TEXT NOT NULL,
    config_hash TEXT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    inserted_count INTEGER NOT NULL DEFAULT 0,
    outcome TEXT
);

CREATE INDEX IF NOT EXISTS idx_sessions_started ON sessions(started_at);

-- Crawled items, one row per source and url
CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    kind TEXT NOT NULL,
    name TEXT NOT NULL,
    url TEXT NOT NULL,
    fields TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(source, url)
);

CREATE INDEX IF NOT EXISTS idx_items_source_name ON items(source, name);
CREATE INDEX IF NOT EXISTS idx_items_kind ON items(kind);
"#;

/// Creates missing tables and indexes on `conn`
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
