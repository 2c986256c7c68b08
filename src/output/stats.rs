//! Statistics generation from the item database
//!
//! This module provides functionality for extracting and displaying
//! item counts and session history from the storage layer.

use crate::storage::{SessionRecord, SinkResult, SourceCount, SqliteSink};

/// Number of sessions shown by `--stats`
pub const RECENT_SESSIONS: usize = 10;

/// Item and session statistics summary
#[derive(Debug, Clone)]
pub struct ItemStatistics {
    /// Total number of stored items
    pub total_items: u64,

    /// Item counts per source and kind, largest first
    pub by_source: Vec<SourceCount>,

    /// Most recent sessions, newest first
    pub recent_sessions: Vec<SessionRecord>,
}

/// Loads statistics from the sink
///
/// # Arguments
///
/// * `sink` - The database to query
/// * `sessions` - Number of recent sessions to include
///
/// # Returns
///
/// * `Ok(ItemStatistics)` - Successfully loaded statistics
/// * `Err(SinkError)` - Failed to query statistics
pub fn load_statistics(sink: &SqliteSink, sessions: usize) -> SinkResult<ItemStatistics> {
    Ok(ItemStatistics {
        total_items: sink.count_items()?,
        by_source: sink.count_by_source()?,
        recent_sessions: sink.recent_sessions(sessions)?,
    })
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &ItemStatistics) {
    println!("=== Item Statistics ===\n");

    println!("Overview:");
    println!("  Total items: {}", stats.total_items);
    println!();

    if !stats.by_source.is_empty() {
        println!("Items by Source:");
        for count in &stats.by_source {
            let percentage = if stats.total_items > 0 {
                (count.count as f64 / stats.total_items as f64) * 100.0
            } else {
                0.0
            };
            println!(
                "  {} ({}): {} ({:.1}%)",
                count.source,
                count.kind.to_db_string(),
                count.count,
                percentage
            );
        }
        println!();
    }

    if stats.recent_sessions.is_empty() {
        println!("No sessions recorded yet.");
        return;
    }

    println!("Recent Sessions:");
    for session in &stats.recent_sessions {
        let outcome = match (&session.outcome, &session.finished_at) {
            (Some(outcome), _) => outcome.to_string(),
            (None, Some(_)) => "unknown".to_string(),
            (None, None) => "running or interrupted".to_string(),
        };
        println!(
            "  #{} {} [{}] started {}: {} inserted, {}",
            session.id,
            session.source,
            session.filters,
            session.started_at,
            session.inserted_count,
            outcome
        );
    }
}
