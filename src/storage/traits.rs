//! Persistence sink trait and error types
//!
//! This module defines the interface the orchestrator persists items through
//! and the errors an insert can end with.

use crate::crawler::SessionOutcome;
use crate::source::{Item, ItemKey, KnownItems};
use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur while persisting an item
#[derive(Debug, Error)]
pub enum SinkError {
    /// An item with the same name or url is already stored for the source
    #[error("Duplicate item: {0}")]
    Duplicate(String),

    /// The backend failed; the item was not stored
    #[error("Storage failure: {0}")]
    Storage(String),
}

impl From<rusqlite::Error> for SinkError {
    fn from(e: rusqlite::Error) -> Self {
        SinkError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(e: serde_json::Error) -> Self {
        SinkError::Storage(format!("serialization: {}", e))
    }
}

/// Result type for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

/// Destination of crawled items
///
/// Implementations must be safe to share between the caller and the session
/// task.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    /// Returns true if an item with the key's name or url is already stored
    async fn exists(&self, key: &ItemKey) -> SinkResult<bool>;

    /// Stores `item`, or rejects it with [`SinkError::Duplicate`]
    ///
    /// # Returns
    ///
    /// The item as stored.
    async fn upsert(&self, item: Item) -> SinkResult<Item>;

    /// Identities already stored for `source`, used to seed a session
    async fn known_items(&self, _source: &str) -> SinkResult<KnownItems> {
        Ok(KnownItems::new())
    }

    /// Records the start of a session; returns an id for [`Self::finish_session`]
    async fn begin_session(
        &self,
        _source: &str,
        _filters: &str,
        _config_hash: Option<&str>,
    ) -> SinkResult<Option<i64>> {
        Ok(None)
    }

    /// Records how a session ended
    async fn finish_session(
        &self,
        _session_id: i64,
        _inserted: usize,
        _outcome: SessionOutcome,
    ) -> SinkResult<()> {
        Ok(())
    }
}
