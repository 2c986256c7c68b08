//! Session progress reporting

use crate::crawler::SessionReport;
use crate::proxy::PoolStats;
use std::sync::Arc;
use std::time::Duration;

/// Point-in-time view of a running session
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub source: String,

    /// Items inserted by this session so far
    pub inserted: usize,

    /// Targets discovered but not fetched yet
    pub pending: usize,

    pub elapsed: Duration,

    /// `None` when the session fetches directly
    pub pool: Option<PoolStats>,
}

impl SessionStats {
    /// Logs the periodic progress line
    pub fn log(&self) {
        let pool = self.pool.clone().unwrap_or_default();

        tracing::info!(
            source = %self.source,
            valid_proxies = pool.valid,
            total_proxies = pool.total,
            used_proxies = pool.used,
            successful_proxies = pool.successful,
            expired = pool.expired,
            expired_min_uses = pool.expired_min_uses,
            expired_max_uses = pool.expired_max_uses,
            expired_mean_uses = pool.expired_mean_uses,
            inserted = self.inserted,
            pending = self.pending,
            "Progress: {} items in {:.1} min",
            self.inserted,
            self.elapsed.as_secs_f64() / 60.0
        );
    }
}

/// Events delivered to a session's progress callback
#[derive(Debug, Clone)]
pub enum Progress {
    /// The session acquired its adapter and is about to discover
    Started { source: String, filters: String },

    /// Periodic snapshot, emitted every report interval
    Report(SessionStats),

    /// The session ended; carries the same report `join` returns
    Finished(SessionReport),
}

/// Progress callback shared with the session task
pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

/// A callback that ignores every event
pub fn no_progress() -> ProgressCallback {
    Arc::new(|_| {})
}
