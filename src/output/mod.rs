//! Output module for session summaries and database statistics
//!
//! This module handles:
//! - Printing the summary of a finished session
//! - Reading and printing item statistics for `--stats`

pub mod stats;

pub use stats::{load_statistics, print_statistics, ItemStatistics, RECENT_SESSIONS};

use crate::crawler::SessionReport;

/// Prints the summary of a finished session to stdout
///
/// # Arguments
///
/// * `report` - The report returned by the session
pub fn print_session_report(report: &SessionReport) {
    println!("=== Session Summary: {} ===\n", report.source);

    println!("  Outcome: {}", report.outcome);
    println!("  Items inserted: {}", report.inserted_count);
    println!(
        "  Items stored: {}",
        report.items_at_start + report.inserted_count
    );
    println!("  Fetch failures: {}", report.fetch_failures);
    println!("  Parse failures: {}", report.parse_failures);
    println!("  Elapsed: {:.1} min", report.elapsed.as_secs_f64() / 60.0);

    if let Some(pool) = &report.pool {
        println!();
        println!("Proxy Pool:");
        println!("  Valid: {} / {}", pool.valid, pool.total);
        println!(
            "  Used: {} ({} successful, {:.1}%)",
            pool.used,
            pool.successful,
            pool.success_rate()
        );
        if pool.expired > 0 {
            println!(
                "  Expired: {} (uses min {}, max {}, mean {:.1})",
                pool.expired, pool.expired_min_uses, pool.expired_max_uses, pool.expired_mean_uses
            );
        }
    }

    if !report.inserted.is_empty() {
        println!();
        println!("Inserted:");
        for item in report.inserted.iter().take(20) {
            println!("  - {} <{}>", item.name, item.url);
        }
        if report.inserted.len() > 20 {
            println!("  ... and {} more", report.inserted.len() - 20);
        }
    }
}
