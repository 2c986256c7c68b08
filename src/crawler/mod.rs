//! Crawler module for session orchestration and detail fetching
//!
//! This module contains the core crawling logic, including:
//! - The session state machine and its bookkeeping
//! - HTTP fetching through rotating proxies
//! - Periodic progress reporting
//! - Wiring an orchestrator from configuration

mod fetcher;
mod orchestrator;
mod reporter;
mod session;

pub use fetcher::{build_http_client, proxy_url, FetchResult, Fetcher, HttpFetcher};
pub use orchestrator::{Orchestrator, OrchestratorSettings, SessionHandle, SessionReport};
pub use reporter::{no_progress, Progress, ProgressCallback, SessionStats};
pub use session::{CrawlSession, CrawlState, SessionOutcome};

use crate::config::Config;
use crate::proxy::{build_providers, GimmeProxyProvider, InvalidationPolicy, ProxyPool};
use crate::source::{AdapterContext, AdapterRegistry};
use crate::storage::PersistenceSink;
use crate::Result;
use std::sync::Arc;
use std::time::Duration;

/// Builds an orchestrator for `source_id` from configuration
///
/// The adapter comes from `registry`, with the source's `[[source]]`
/// overrides applied. Proxies are used only if the source wants them, the
/// `[proxy]` section enables them and `no_proxies` is false.
///
/// # Arguments
///
/// * `config` - The loaded configuration
/// * `registry` - Adapter constructors
/// * `source_id` - Source to crawl
/// * `sink` - Where items are stored
/// * `no_proxies` - Forces direct fetches
///
/// # Returns
///
/// * `Ok(Orchestrator)` - Ready to start sessions
/// * `Err(DragnetError)` - Unknown source, bad override or HTTP client failure
pub fn build_orchestrator(
    config: &Config,
    registry: &AdapterRegistry,
    source_id: &str,
    sink: Arc<dyn PersistenceSink>,
    no_proxies: bool,
) -> Result<Orchestrator> {
    let fetch_timeout = Duration::from_secs(config.crawler.fetch_timeout_secs);
    let client = build_http_client(&config.user_agent, fetch_timeout)?;
    let entry = config.source_entry(source_id);

    let adapter = registry.build(
        source_id,
        AdapterContext {
            client: client.clone(),
            base_url: entry.and_then(|e| e.base_url.clone()),
        },
    )?;

    let mut profile = adapter.profile().with_overrides(entry);
    if no_proxies || !config.proxy.enabled {
        profile.use_proxies = false;
    }

    let fetcher = Arc::new(HttpFetcher::new(&config.user_agent, fetch_timeout)?);
    let mut orchestrator = Orchestrator::new(adapter, sink, fetcher)
        .with_settings(OrchestratorSettings::from(config))
        .with_profile(profile.clone());

    if profile.use_proxies {
        let provider_timeout = Duration::from_secs(config.proxy.provider_timeout_secs);
        let provider_client = build_http_client(&config.user_agent, provider_timeout)?;
        let pool = Arc::new(ProxyPool::new(InvalidationPolicy::from(&config.proxy)));

        orchestrator =
            orchestrator.with_pool(pool, build_providers(&config.proxy, &provider_client));

        if let Some(url) = &config.proxy.trickle_url {
            orchestrator = orchestrator.with_trickle(
                Arc::new(GimmeProxyProvider::new("trickle", url, provider_client)),
                config.proxy.trickle_per_minute,
            );
        }
    }

    tracing::debug!(
        source = source_id,
        use_proxies = profile.use_proxies,
        batch_size = profile.batch_size,
        "Orchestrator ready"
    );

    Ok(orchestrator)
}
