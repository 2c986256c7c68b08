//! Dragnet: a proxy-rotating crawl engine for third-party directories
//!
//! This crate discovers, fetches, parses, deduplicates and persists records
//! (companies, jobs, local businesses) from uncooperative third-party sites.
//! Each site is a [`source::SourceAdapter`]; the [`crawler::Orchestrator`]
//! drives one session at a time against an adapter, routing fetches through a
//! [`proxy::ProxyPool`] and storing results in a [`storage::PersistenceSink`].

pub mod config;
pub mod crawler;
pub mod output;
pub mod proxy;
pub mod source;
pub mod storage;

use thiserror::Error;

/// Main error type for Dragnet operations
///
/// Only setup problems surface through this type. Failures inside a running
/// session (a dead proxy, a page that does not parse, a rejected insert) are
/// logged and absorbed by the orchestrator.
#[derive(Debug, Error)]
pub enum DragnetError {
    #[error("Bad configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("SQLite failure: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Sink failure: {0}")]
    Sink(#[from] storage::SinkError),

    #[error("Could not build HTTP client: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("A crawl session is already running for source {source_id}")]
    SessionActive { source_id: String },

    #[error("Session cannot move from {from} to {to}")]
    InvalidTransition {
        from: crawler::CrawlState,
        to: crawler::CrawlState,
    },

    #[error("Session task failed: {0}")]
    SessionTask(String),

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while loading configuration or parsing filters
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config rejected: {0}")]
    Validation(String),

    #[error("Bad URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),
}

/// Result type alias for Dragnet operations
pub type Result<T> = std::result::Result<T, DragnetError>;

/// Result of loading or validating configuration
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

pub use config::Config;
pub use crawler::{Orchestrator, Progress, SessionOutcome, SessionReport};
pub use proxy::{ProxyPool, ProxyRecord};
pub use source::{CrawlTarget, Filter, FilterSet, Item, ItemKey, SourceAdapter};
pub use storage::{PersistenceSink, SinkError, SqliteSink};
