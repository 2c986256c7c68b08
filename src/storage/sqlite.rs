//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the PersistenceSink
//! trait, plus the read queries behind `--stats`.

use crate::crawler::SessionOutcome;
use crate::source::{filter_tags, Item, ItemKey, ItemKind, KnownItems};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{PersistenceSink, SinkError, SinkResult};
use crate::storage::{SessionRecord, SourceCount};
use crate::DragnetError;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// SQLite storage backend
///
/// The connection sits behind a mutex so one sink can be shared by the CLI
/// and a running session. Every query is short and synchronous.
pub struct SqliteSink {
    conn: Mutex<Connection>,
}

impl SqliteSink {
    /// Opens or creates the database at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteSink)` - Successfully opened/created database
    /// * `Err(DragnetError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, DragnetError> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database
    pub fn in_memory() -> Result<Self, DragnetError> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the url of a stored item that collides with `key`
    fn find_collision(conn: &Connection, key: &ItemKey) -> SinkResult<Option<String>> {
        let url = conn
            .query_row(
                "SELECT url FROM items WHERE source = ?1 AND (url = ?2 OR name = ?3) LIMIT 1",
                params![key.source, key.url, key.name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(url)
    }

    fn exists_sync(&self, key: &ItemKey) -> SinkResult<bool> {
        let conn = self.lock();
        Ok(Self::find_collision(&conn, key)?.is_some())
    }

    fn upsert_sync(&self, item: Item) -> SinkResult<Item> {
        let conn = self.lock();

        if let Some(existing) = Self::find_collision(&conn, &item.key())? {
            return Err(SinkError::Duplicate(existing));
        }

        let fields = serde_json::to_string(&item.fields)?;
        let result = conn.execute(
            "INSERT INTO items (source, kind, name, url, fields, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                item.source,
                item.kind.to_db_string(),
                item.name,
                item.url,
                fields,
                Utc::now().to_rfc3339()
            ],
        );

        match result {
            Ok(_) => Ok(item),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(SinkError::Duplicate(item.url))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn known_items_sync(&self, source: &str) -> SinkResult<KnownItems> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT name, url, fields FROM items WHERE source = ?1")?;
        let rows = stmt
            .query_map(params![source], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut known = KnownItems::new();
        for (name, url, fields) in &rows {
            let fields: Map<String, Value> = serde_json::from_str(fields)?;
            known.insert_tagged(name, url, filter_tags(&fields));
        }
        Ok(known)
    }

    fn begin_session_sync(
        &self,
        source: &str,
        filters: &str,
        config_hash: Option<&str>,
    ) -> SinkResult<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO sessions (source, filters, config_hash, started_at) VALUES (?1, ?2, ?3, ?4)",
            params![source, filters, config_hash, Utc::now().to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn finish_session_sync(
        &self,
        session_id: i64,
        inserted: usize,
        outcome: SessionOutcome,
    ) -> SinkResult<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE sessions SET finished_at = ?1, inserted_count = ?2, outcome = ?3 WHERE id = ?4",
            params![
                Utc::now().to_rfc3339(),
                inserted as i64,
                outcome.to_db_string(),
                session_id
            ],
        )?;
        Ok(())
    }

    // ===== Statistics =====

    /// Total number of stored items
    pub fn count_items(&self) -> SinkResult<u64> {
        let conn = self.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Item counts grouped by source and kind, largest first
    pub fn count_by_source(&self) -> SinkResult<Vec<SourceCount>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT source, kind, COUNT(*) FROM items GROUP BY source, kind ORDER BY COUNT(*) DESC, source",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .filter_map(|(source, kind, count)| {
                ItemKind::from_db_string(&kind).map(|kind| SourceCount {
                    source,
                    kind,
                    count: count as u64,
                })
            })
            .collect())
    }

    /// The most recent sessions, newest first
    pub fn recent_sessions(&self, limit: usize) -> SinkResult<Vec<SessionRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, source, filters, config_hash, started_at, finished_at, inserted_count, outcome
             FROM sessions ORDER BY id DESC LIMIT ?1",
        )?;

        let sessions = stmt
            .query_map(params![limit as i64], |row| {
                let outcome: Option<String> = row.get(7)?;
                Ok(SessionRecord {
                    id: row.get(0)?,
                    source: row.get(1)?,
                    filters: row.get(2)?,
                    config_hash: row.get(3)?,
                    started_at: row.get(4)?,
                    finished_at: row.get(5)?,
                    inserted_count: row.get::<_, i64>(6)? as u64,
                    outcome: outcome.as_deref().and_then(SessionOutcome::from_db_string),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(sessions)
    }

    /// Every item stored for `source`, oldest first
    pub fn items_for_source(&self, source: &str) -> SinkResult<Vec<Item>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT kind, name, url, fields FROM items WHERE source = ?1 ORDER BY id")?;

        let rows = stmt
            .query_map(params![source], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut items = Vec::with_capacity(rows.len());
        for (kind, name, url, fields) in rows {
            let kind = ItemKind::from_db_string(&kind)
                .ok_or_else(|| SinkError::Storage(format!("unknown item kind '{}'", kind)))?;
            let mut item = Item::new(source, kind, name, url);
            item.fields = serde_json::from_str(&fields)?;
            items.push(item);
        }
        Ok(items)
    }
}

#[async_trait]
impl PersistenceSink for SqliteSink {
    async fn exists(&self, key: &ItemKey) -> SinkResult<bool> {
        self.exists_sync(key)
    }

    async fn upsert(&self, item: Item) -> SinkResult<Item> {
        self.upsert_sync(item)
    }

    async fn known_items(&self, source: &str) -> SinkResult<KnownItems> {
        self.known_items_sync(source)
    }

    async fn begin_session(
        &self,
        source: &str,
        filters: &str,
        config_hash: Option<&str>,
    ) -> SinkResult<Option<i64>> {
        self.begin_session_sync(source, filters, config_hash)
            .map(Some)
    }

    async fn finish_session(
        &self,
        session_id: i64,
        inserted: usize,
        outcome: SessionOutcome,
    ) -> SinkResult<()> {
        self.finish_session_sync(session_id, inserted, outcome)
    }
}
