//! Storage module for persisting crawled items
//!
//! This module handles:
//! - The [`PersistenceSink`] interface the orchestrator writes through
//! - SQLite database initialization and schema management
//! - Session bookkeeping and the queries behind `--stats`

mod schema;
mod sqlite;
mod traits;

pub use schema::{initialize_schema, SCHEMA_SQL};
pub use sqlite::SqliteSink;
pub use traits::{PersistenceSink, SinkError, SinkResult};

use crate::crawler::SessionOutcome;
use crate::source::ItemKind;
use crate::DragnetError;
use std::path::Path;

/// Opens or creates the item database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteSink)` - Successfully opened sink
/// * `Err(DragnetError)` - Failed to open the database
pub fn open_sink(path: &Path) -> Result<SqliteSink, DragnetError> {
    SqliteSink::new(path)
}

/// A recorded crawl session
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: i64,
    pub source: String,
    pub filters: String,
    pub config_hash: Option<String>,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub inserted_count: u64,

    /// None while the session is running, or if it never finished
    pub outcome: Option<SessionOutcome>,
}

/// Number of items stored for one source and kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceCount {
    pub source: String,
    pub kind: ItemKind,
    pub count: u64,
}
