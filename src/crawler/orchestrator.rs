//! Crawl session orchestration
//!
//! The [`Orchestrator`] owns one source adapter and drives at most one
//! session against it at a time. A session runs the state machine in
//! [`CrawlState`]:
//!
//! 1. Discover targets through the adapter (retrying after a delay)
//! 2. Fetch a batch of at most `hits-per-loop` targets, staggered, each
//!    through a proxy picked from the pool
//! 3. Parse, deduplicate and persist the fetched pages
//! 4. Repeat until the limit is reached, discovery stays empty for too long,
//!    or the session is cancelled

use crate::config::Config;
use crate::crawler::fetcher::{FetchResult, Fetcher};
use crate::crawler::reporter::{Progress, ProgressCallback, SessionStats};
use crate::crawler::session::{CrawlSession, CrawlState, SessionOutcome};
use crate::proxy::{PoolStats, ProxyPool, ProxyProvider, ProxyRecord};
use crate::source::{html, CrawlTarget, Filter, FilterSet, Item, SourceAdapter, SourceProfile};
use crate::storage::{PersistenceSink, SinkError};
use crate::{DragnetError, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Exclusive access to the adapter; held for the whole session
type AdapterGuard = OwnedMutexGuard<Box<dyn SourceAdapter>>;

/// Loop tuning shared by every session of an orchestrator
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    /// Upper bound on fetches in flight
    pub hits_per_loop: usize,

    /// Delay between the starts of two fetches of a batch
    pub stagger: Duration,

    /// Hard wall-clock limit for one fetch
    pub fetch_timeout: Duration,

    pub report_interval: Duration,

    /// Items to insert when the caller gives no limit
    pub default_limit: usize,

    /// Consecutive empty discoveries before giving up; 0 retries forever
    pub max_idle_discoveries: u32,

    /// Replenish the pool when fewer valid records remain
    pub low_water_mark: usize,

    pub provider_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            hits_per_loop: 5,
            stagger: Duration::from_secs(1),
            fetch_timeout: Duration::from_secs(10),
            report_interval: Duration::from_secs(60),
            default_limit: 10_000,
            max_idle_discoveries: 0,
            low_water_mark: 10,
            provider_timeout: Duration::from_secs(20),
        }
    }
}

impl From<&Config> for OrchestratorSettings {
    fn from(config: &Config) -> Self {
        Self {
            hits_per_loop: config.crawler.hits_per_loop as usize,
            stagger: Duration::from_millis(config.crawler.stagger_ms),
            fetch_timeout: Duration::from_secs(config.crawler.fetch_timeout_secs),
            report_interval: Duration::from_secs(config.crawler.report_interval_secs),
            default_limit: config.crawler.default_limit as usize,
            max_idle_discoveries: config.crawler.max_idle_discoveries,
            low_water_mark: config.proxy.low_water_mark,
            provider_timeout: Duration::from_secs(config.proxy.provider_timeout_secs),
        }
    }
}

/// Summary of a finished session
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub source: String,
    pub outcome: SessionOutcome,

    /// Items inserted by the session, in insertion order
    pub inserted: Vec<Item>,

    pub inserted_count: usize,

    /// Items already stored for the source when the session started
    pub items_at_start: usize,

    pub fetch_failures: usize,
    pub parse_failures: usize,
    pub elapsed: Duration,
    pub pool: Option<PoolStats>,
}

/// Handle to a session started with [`Orchestrator::start_scrape_service`]
#[derive(Debug)]
pub struct SessionHandle {
    cancel: CancellationToken,
    join: JoinHandle<Result<SessionReport>>,
}

impl SessionHandle {
    /// Asks the session to stop; in-flight fetches are drained first
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Waits for the session to end
    pub async fn join(self) -> Result<SessionReport> {
        self.join
            .await
            .map_err(|e| DragnetError::SessionTask(e.to_string()))?
    }
}

/// Drives crawl sessions against a single source
///
/// Sink, fetcher, proxy pool and adapter are all injected; nothing here is
/// global, so several orchestrators (one per source) can share a sink and a
/// pool.
pub struct Orchestrator {
    source_id: String,
    adapter: Arc<Mutex<Box<dyn SourceAdapter>>>,
    profile: SourceProfile,
    sink: Arc<dyn PersistenceSink>,
    fetcher: Arc<dyn Fetcher>,
    pool: Option<Arc<ProxyPool>>,
    providers: Vec<Arc<dyn ProxyProvider>>,
    trickle: Option<(Arc<dyn ProxyProvider>, u32)>,
    settings: OrchestratorSettings,
    config_hash: Option<String>,
}

impl Orchestrator {
    /// Creates an orchestrator that fetches directly, with default settings
    pub fn new(
        adapter: Box<dyn SourceAdapter>,
        sink: Arc<dyn PersistenceSink>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            source_id: adapter.id().to_string(),
            profile: adapter.profile(),
            adapter: Arc::new(Mutex::new(adapter)),
            sink,
            fetcher,
            pool: None,
            providers: Vec::new(),
            trickle: None,
            settings: OrchestratorSettings::default(),
            config_hash: None,
        }
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Replaces the adapter's own profile
    pub fn with_profile(mut self, profile: SourceProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Routes fetches through `pool`, replenished from `providers`
    pub fn with_pool(mut self, pool: Arc<ProxyPool>, providers: Vec<Arc<dyn ProxyProvider>>) -> Self {
        self.pool = Some(pool);
        self.providers = providers;
        self
    }

    /// Polls `provider` in the background while a session runs
    pub fn with_trickle(mut self, provider: Arc<dyn ProxyProvider>, per_minute: u32) -> Self {
        if per_minute > 0 {
            self.trickle = Some((provider, per_minute));
        }
        self
    }

    /// Recorded with every session started by this orchestrator
    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = Some(hash.into());
        self
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn profile(&self) -> &SourceProfile {
        &self.profile
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn pool(&self) -> Option<&Arc<ProxyPool>> {
        self.pool.as_ref()
    }

    /// Returns true while a session holds the adapter
    pub fn is_running(&self) -> bool {
        self.adapter.try_lock().is_err()
    }

    fn acquire(&self) -> Result<AdapterGuard> {
        Arc::clone(&self.adapter)
            .try_lock_owned()
            .map_err(|_| DragnetError::SessionActive {
                source_id: self.source_id.clone(),
            })
    }

    /// Starts a session in the background
    ///
    /// Fails with [`DragnetError::SessionActive`] if a session is already
    /// running for this source. `on_progress` receives [`Progress::Started`]
    /// before this function returns.
    ///
    /// # Arguments
    ///
    /// * `filters` - Filters crawled one after the other
    /// * `limit` - Items to insert before stopping; the configured default if `None`
    /// * `on_progress` - Progress callback, invoked from the session task
    ///
    /// # Returns
    ///
    /// * `Ok(SessionHandle)` - The session is running
    /// * `Err(DragnetError)` - Another session holds the adapter
    pub fn start_scrape_service<F>(
        self: &Arc<Self>,
        filters: FilterSet,
        limit: Option<usize>,
        on_progress: F,
    ) -> Result<SessionHandle>
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        let adapter = self.acquire()?;
        let on_progress: ProgressCallback = Arc::new(on_progress);
        self.notify_started(&filters, &on_progress);

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let this = Arc::clone(self);
        let join = tokio::spawn(async move {
            this.drive(adapter, filters, limit, token, on_progress)
                .await
        });

        Ok(SessionHandle { cancel, join })
    }

    /// Runs a session to completion on the current task
    pub async fn run_session<F>(
        &self,
        filters: FilterSet,
        limit: Option<usize>,
        cancel: CancellationToken,
        on_progress: F,
    ) -> Result<SessionReport>
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        let adapter = self.acquire()?;
        let on_progress: ProgressCallback = Arc::new(on_progress);
        self.notify_started(&filters, &on_progress);
        self.drive(adapter, filters, limit, cancel, on_progress)
            .await
    }

    fn notify_started(&self, filters: &FilterSet, on_progress: &ProgressCallback) {
        on_progress(Progress::Started {
            source: self.source_id.clone(),
            filters: filters.to_string(),
        });
    }

    async fn drive(
        &self,
        mut adapter: AdapterGuard,
        filters: FilterSet,
        limit: Option<usize>,
        cancel: CancellationToken,
        on_progress: ProgressCallback,
    ) -> Result<SessionReport> {
        let limit = limit.unwrap_or(self.settings.default_limit).max(1);
        let known = self.sink.known_items(&self.source_id).await?;
        let mut session = CrawlSession::new(known);

        let session_id = match self
            .sink
            .begin_session(
                &self.source_id,
                &filters.to_string(),
                self.config_hash.as_deref(),
            )
            .await
        {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!("Failed to record session start: {}", e);
                None
            }
        };

        tracing::info!(
            source = %self.source_id,
            filters = %filters,
            limit,
            known = session.items_at_start,
            "Starting crawl session"
        );

        let background = cancel.child_token();
        self.start_background(&background);

        let period = self.settings.report_interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        session.transition(CrawlState::Discovering)?;
        let result = self
            .run_loop(
                &mut adapter,
                &filters,
                limit,
                &cancel,
                &mut session,
                &mut ticker,
                &on_progress,
            )
            .await;

        background.cancel();
        drop(adapter);
        let outcome = result?;
        session.transition(CrawlState::Completed)?;

        let report = SessionReport {
            source: self.source_id.clone(),
            outcome,
            inserted_count: session.inserted_count(),
            inserted: std::mem::take(&mut session.inserted),
            items_at_start: session.items_at_start,
            fetch_failures: session.fetch_failures,
            parse_failures: session.parse_failures,
            elapsed: session.elapsed(),
            pool: self.pool.as_ref().map(|pool| pool.snapshot()),
        };

        tracing::info!(
            source = %report.source,
            outcome = %report.outcome,
            inserted = report.inserted_count,
            fetch_failures = report.fetch_failures,
            parse_failures = report.parse_failures,
            "Crawl session finished in {:.1}s",
            report.elapsed.as_secs_f64()
        );

        if let Some(id) = session_id {
            if let Err(e) = self
                .sink
                .finish_session(id, report.inserted_count, outcome)
                .await
            {
                tracing::warn!("Failed to record session end: {}", e);
            }
        }

        on_progress(Progress::Finished(report.clone()));
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_loop(
        &self,
        adapter: &mut AdapterGuard,
        filters: &FilterSet,
        limit: usize,
        cancel: &CancellationToken,
        session: &mut CrawlSession,
        ticker: &mut Interval,
        on_progress: &ProgressCallback,
    ) -> Result<SessionOutcome> {
        loop {
            match session.state() {
                CrawlState::Discovering => {
                    if cancel.is_cancelled() {
                        return Ok(SessionOutcome::Cancelled);
                    }

                    let filter = filters
                        .get(session.filter_index)
                        .cloned()
                        .unwrap_or_else(Filter::any);

                    let discovered = {
                        let mut discovery = adapter.discover_targets(
                            &session.known,
                            &filter,
                            self.profile.batch_size,
                        );
                        loop {
                            tokio::select! {
                                biased;
                                _ = cancel.cancelled() => break None,
                                result = &mut discovery => break Some(result),
                                _ = ticker.tick() => self.report(session, on_progress),
                            }
                        }
                    };

                    let Some(result) = discovered else {
                        return Ok(SessionOutcome::Cancelled);
                    };

                    match result {
                        Ok(targets) if !targets.is_empty() => {
                            tracing::debug!(filter = %filter, count = targets.len(), "Discovered targets");
                            session.idle_discoveries = 0;
                            session.enqueue(targets);
                            session.transition(CrawlState::FetchingBatch)?;
                        }
                        Ok(_) if session.filter_index + 1 < filters.len() => {
                            session.filter_index += 1;
                            tracing::info!(
                                exhausted = %filter,
                                next = session.filter_index + 1,
                                of = filters.len(),
                                "Filter exhausted, moving to the next one"
                            );
                            session.transition(CrawlState::Discovering)?;
                        }
                        Ok(_) => {
                            session.idle_discoveries += 1;
                            let max_idle = self.settings.max_idle_discoveries;
                            if max_idle > 0 && session.idle_discoveries >= max_idle {
                                tracing::info!(
                                    attempts = session.idle_discoveries,
                                    "Nothing left to discover"
                                );
                                return Ok(SessionOutcome::Exhausted);
                            }
                            tracing::debug!(
                                attempts = session.idle_discoveries,
                                "Discovery returned nothing new, throttling"
                            );
                            session.transition(CrawlState::Throttled)?;
                        }
                        Err(e) => {
                            tracing::warn!("Discovery failed: {}", e);
                            session.transition(CrawlState::Throttled)?;
                        }
                    }
                }

                CrawlState::Throttled => {
                    let wait = tokio::time::sleep(self.profile.retry_delay);
                    tokio::pin!(wait);
                    loop {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return Ok(SessionOutcome::Cancelled),
                            _ = &mut wait => break,
                            _ = ticker.tick() => self.report(session, on_progress),
                        }
                    }
                    session.transition(CrawlState::Discovering)?;
                }

                CrawlState::FetchingBatch => {
                    if cancel.is_cancelled() {
                        return Ok(SessionOutcome::Cancelled);
                    }

                    let dropped = session.drop_known_pending();
                    if dropped > 0 {
                        tracing::debug!(dropped, "Dropped queued targets that are already stored");
                    }

                    let batch = session.take_batch(self.settings.hits_per_loop);
                    if batch.is_empty() {
                        session.transition(CrawlState::Discovering)?;
                        continue;
                    }

                    self.maintain_pool();
                    let fetched = self.fetch_batch(batch, session, ticker, on_progress).await;

                    session.transition(CrawlState::Persisting)?;
                    self.persist_batch(&***adapter, fetched, session).await;

                    if session.inserted_count() >= limit {
                        tracing::info!(
                            inserted = session.inserted_count(),
                            limit,
                            "Limit reached"
                        );
                        return Ok(SessionOutcome::LimitReached);
                    }

                    if session.pending.is_empty() {
                        session.transition(CrawlState::Discovering)?;
                    } else {
                        session.transition(CrawlState::FetchingBatch)?;
                    }
                }

                other => {
                    return Err(DragnetError::SessionTask(format!(
                        "session loop reached state {}",
                        other
                    )));
                }
            }
        }
    }

    /// Fetches a batch and returns the content of every successful fetch
    ///
    /// Fetches are polled on this task, never spawned, so the batch size is
    /// also the bound on concurrent requests.
    async fn fetch_batch(
        &self,
        batch: Vec<CrawlTarget>,
        session: &mut CrawlSession,
        ticker: &mut Interval,
        on_progress: &ProgressCallback,
    ) -> Vec<(CrawlTarget, String)> {
        let mut fetched = Vec::with_capacity(batch.len());
        let mut in_flight = FuturesUnordered::new();
        let mut started: u32 = 0;

        for target in batch {
            if let Some(content) = target.content.clone() {
                fetched.push((target, content));
                continue;
            }

            let proxy = self.checkout_proxy();
            let delay = self.settings.stagger * started;
            started += 1;

            let fetcher = Arc::clone(&self.fetcher);
            let timeout = self.settings.fetch_timeout;
            in_flight.push(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let via = proxy
                    .as_ref()
                    .filter(|record| !record.is_direct())
                    .map(|record| record.address.as_str());
                let result = match tokio::time::timeout(timeout, fetcher.fetch(&target.key, via)).await {
                    Ok(result) => result,
                    Err(_) => FetchResult::Timeout,
                };
                (target, proxy, result)
            });
        }

        while !in_flight.is_empty() {
            tokio::select! {
                Some((target, proxy, result)) = in_flight.next() => {
                    match self.handle_fetch(&target, proxy.as_ref(), result) {
                        Some(content) => fetched.push((target, content)),
                        None => session.fetch_failures += 1,
                    }
                }
                _ = ticker.tick() => self.report(session, on_progress),
            }
        }

        fetched
    }

    /// Picks the egress for one fetch; `None` means fetch directly
    fn checkout_proxy(&self) -> Option<ProxyRecord> {
        if !self.profile.use_proxies {
            return None;
        }
        let pool = self.pool.as_ref()?;

        let record = pool.select_next();
        match &record {
            Some(record) => pool.record_use(&record.address),
            None => tracing::debug!("No valid proxy left, fetching directly"),
        }
        record
    }

    /// Applies proxy feedback for one fetch and extracts the content to parse
    fn handle_fetch(
        &self,
        target: &CrawlTarget,
        proxy: Option<&ProxyRecord>,
        result: FetchResult,
    ) -> Option<String> {
        let via = proxy.map(|record| record.address.as_str()).unwrap_or("direct");

        match result {
            FetchResult::Success { body, .. } => {
                self.feedback(proxy, ProxyPool::record_success);
                Some(match &self.profile.content_root {
                    Some(root) => html::extract_root(&body, root),
                    None => body,
                })
            }
            FetchResult::HttpError { status_code } => {
                tracing::debug!(url = %target.key, proxy = via, status_code, "Fetch rejected");
                self.feedback(proxy, ProxyPool::record_failure);
                None
            }
            FetchResult::Timeout => {
                tracing::debug!(url = %target.key, proxy = via, "Fetch timed out");
                self.feedback(proxy, ProxyPool::record_failure);
                None
            }
            FetchResult::NetworkError { error } => {
                tracing::debug!(url = %target.key, proxy = via, "Fetch failed: {}", error);
                self.feedback(proxy, ProxyPool::invalidate);
                None
            }
        }
    }

    /// Applies `update` to the proxy's record and lets the fetcher forget
    /// proxies that are no longer valid
    fn feedback(&self, proxy: Option<&ProxyRecord>, update: impl FnOnce(&ProxyPool, &str)) {
        if let (Some(pool), Some(record)) = (self.pool.as_deref(), proxy) {
            update(pool, &record.address);
            if !pool.get(&record.address).is_some_and(|r| r.valid) {
                self.fetcher.release(&record.address);
            }
        }
    }

    /// Parses, deduplicates and stores a fetched batch
    async fn persist_batch(
        &self,
        adapter: &dyn SourceAdapter,
        fetched: Vec<(CrawlTarget, String)>,
        session: &mut CrawlSession,
    ) {
        for (target, content) in fetched {
            if session.known.matches(&target.key, target.name.as_deref()) {
                continue;
            }

            let item = match adapter.parse_detail(&content, &target) {
                Ok(item) => item,
                Err(e) => {
                    tracing::debug!(url = %target.key, "Skipping target: {}", e);
                    session.parse_failures += 1;
                    continue;
                }
            };

            if session.known.contains_item(&item) {
                continue;
            }

            let key = item.key();
            match self.sink.exists(&key).await {
                Ok(true) => {
                    session.known.insert(&key.name, &key.url);
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(url = %key.url, "Existence check failed: {}", e);
                    continue;
                }
            }

            match self.sink.upsert(item).await {
                Ok(stored) => {
                    tracing::info!(source = %stored.source, name = %stored.name, "Inserted item");
                    session.record_inserted(stored);
                }
                Err(SinkError::Duplicate(what)) => {
                    tracing::debug!("Already stored: {}", what);
                    session.known.insert(&key.name, &key.url);
                }
                Err(e @ SinkError::Storage(_)) => {
                    tracing::warn!(url = %key.url, "Failed to store item: {}", e);
                }
            }
        }
    }

    /// Starts a replenish if the pool fell below its low-water mark
    fn maintain_pool(&self) {
        let Some(pool) = &self.pool else {
            return;
        };
        if !self.profile.use_proxies || self.providers.is_empty() {
            return;
        }

        let valid = pool.valid_count();
        if valid < self.settings.low_water_mark
            && pool
                .spawn_replenish(self.providers.clone(), self.settings.provider_timeout)
                .is_some()
        {
            tracing::info!(
                valid,
                low_water_mark = self.settings.low_water_mark,
                "Proxy pool below low-water mark, replenishing"
            );
        }
    }

    fn start_background(&self, token: &CancellationToken) {
        self.maintain_pool();

        if let (Some(pool), Some((provider, per_minute))) = (&self.pool, &self.trickle) {
            if self.profile.use_proxies {
                pool.spawn_trickle(Arc::clone(provider), *per_minute, token.clone());
            }
        }
    }

    fn report(&self, session: &CrawlSession, on_progress: &ProgressCallback) {
        let stats = SessionStats {
            source: self.source_id.clone(),
            inserted: session.inserted_count(),
            pending: session.pending.len(),
            elapsed: session.elapsed(),
            pool: self.pool.as_ref().map(|pool| pool.snapshot()),
        };
        stats.log();
        on_progress(Progress::Report(stats));
    }
}
