//! Dragnet main entry point
//!
//! This is the command-line interface for the Dragnet crawl engine.

use anyhow::{bail, Context};
use clap::Parser;
use dragnet::config::{load_config_with_hash, Config};
use dragnet::crawler::{build_orchestrator, Progress};
use dragnet::output::{load_statistics, print_session_report, print_statistics, RECENT_SESSIONS};
use dragnet::source::{AdapterRegistry, FilterSet};
use dragnet::storage::open_sink;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Dragnet: a proxy-rotating crawl engine
///
/// Dragnet discovers records (companies, jobs, local businesses) on
/// third-party directories, fetches their detail pages through a pool of
/// rotating proxies and stores them, deduplicated, in SQLite.
#[derive(Parser, Debug)]
#[command(name = "dragnet")]
#[command(version)]
#[command(about = "A proxy-rotating crawl engine", long_about = None)]
struct Cli {
    /// TOML configuration (crawler, proxy, output and source sections)
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Source to crawl (craft, yelp, indeed)
    #[arg(short, long, required_unless_present_any = ["dry_run", "stats"])]
    source: Option<String>,

    /// Filters such as "city=Boston, MA;category=bars"; separate several with commas
    #[arg(short, long, default_value = "")]
    filter: String,

    /// Number of items to insert before stopping
    #[arg(short, long)]
    limit: Option<usize>,

    /// Fetch directly, without the proxy pool
    #[arg(long)]
    no_proxies: bool,

    /// More log output; repeat for debug and trace (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Check the config and filters, print the plan, and exit
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Print stored item counts and recent sessions, and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::debug!(path = %cli.config.display(), "Reading configuration");
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    let registry = AdapterRegistry::with_defaults();

    if cli.dry_run {
        handle_dry_run(&config, &registry, &cli.filter)
    } else if cli.stats {
        handle_stats(&config)
    } else {
        let Some(source) = cli.source.as_deref() else {
            bail!("--source is required to start a crawl");
        };
        handle_crawl(
            &config,
            &registry,
            source,
            &cli.filter,
            cli.limit,
            cli.no_proxies,
            config_hash,
        )
        .await
    }
}

/// Installs the fmt subscriber; `-v` flags raise the level of dragnet targets first
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("dragnet=info,warn"),
            1 => EnvFilter::new("dragnet=debug,info"),
            2 => EnvFilter::new("dragnet=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Prints the effective settings, registered sources and parsed filters
fn handle_dry_run(config: &Config, registry: &AdapterRegistry, filter: &str) -> anyhow::Result<()> {
    let filters = FilterSet::parse(filter).context("invalid --filter")?;

    println!("=== Dragnet Dry Run ===\n");

    println!("Session loop:");
    println!("  Hits per loop: {}", config.crawler.hits_per_loop);
    println!("  Stagger: {}ms", config.crawler.stagger_ms);
    println!("  Fetch timeout: {}s", config.crawler.fetch_timeout_secs);
    println!("  Report interval: {}s", config.crawler.report_interval_secs);
    println!("  Default limit: {}", config.crawler.default_limit);
    match config.crawler.max_idle_discoveries {
        0 => println!("  Idle discoveries: unbounded"),
        n => println!("  Idle discoveries: {}", n),
    }

    println!("\nIdentity:");
    println!("  {}", config.user_agent.header_value());

    println!("\nProxies:");
    if config.proxy.enabled {
        println!("  Low-water mark: {}", config.proxy.low_water_mark);
        println!(
            "  Fail thresholds: untested {}, proven {}",
            config.proxy.untested_fail_threshold, config.proxy.proven_fail_threshold
        );
        for provider in &config.proxy.providers {
            println!("  - {} ({:?}) {}", provider.name, provider.kind, provider.url);
        }
        if let Some(url) = &config.proxy.trickle_url {
            println!("  Trickle: {} per minute from {}", config.proxy.trickle_per_minute, url);
        }
    } else {
        println!("  Disabled");
    }

    println!("\nOutput:");
    println!("  SQLite file: {}", config.output.database_path);

    println!("\nRegistered Sources:");
    for id in registry.ids() {
        let overrides = if config.source_entry(id).is_some() {
            " (overridden)"
        } else {
            ""
        };
        println!("  - {}{}", id, overrides);
    }

    println!("\nFilters ({}):", filters.len());
    for filter in filters.iter() {
        println!("  - {}", filter);
    }

    println!("\nConfiguration OK");

    Ok(())
}

/// Reads totals and recent sessions from the configured database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Statistics for {}\n", config.output.database_path);

    let sink = open_sink(Path::new(&config.output.database_path))?;
    let stats = load_statistics(&sink, RECENT_SESSIONS)?;
    print_statistics(&stats);

    Ok(())
}

/// Runs one session for `source` until the limit, exhaustion or Ctrl-C
async fn handle_crawl(
    config: &Config,
    registry: &AdapterRegistry,
    source: &str,
    filter: &str,
    limit: Option<usize>,
    no_proxies: bool,
    config_hash: String,
) -> anyhow::Result<()> {
    let filters = FilterSet::parse(filter).context("invalid --filter")?;
    let sink = Arc::new(open_sink(Path::new(&config.output.database_path))?);

    let orchestrator = build_orchestrator(config, registry, source, sink, no_proxies)?
        .with_config_hash(config_hash);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, finishing the current batch");
            on_interrupt.cancel();
        }
    });

    let report = orchestrator
        .run_session(filters, limit, cancel, |event| {
            if let Progress::Started { source, filters } = event {
                tracing::info!("Crawling {} with filters {}", source, filters);
            }
        })
        .await?;

    print_session_report(&report);

    Ok(())
}
