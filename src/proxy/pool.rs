//! The proxy pool: least-used selection, feedback counters and replenishment

use crate::proxy::provider::{DiscoveredProxy, ProviderError, ProxyProvider};
use crate::proxy::record::{InvalidationPolicy, ProxyRecord};
use futures::future::join_all;
use rand::seq::IndexedRandom;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Aggregate view of a pool, used by the periodic reporter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolStats {
    /// All records, valid or not
    pub total: usize,

    /// Records that can still be selected
    pub valid: usize,

    /// Records handed out at least once
    pub used: usize,

    /// Records that returned at least one page
    pub successful: usize,

    /// Records that succeeded before and were invalidated since
    pub expired: usize,

    /// Lowest use count among expired records
    pub expired_min_uses: u32,

    /// Highest use count among expired records
    pub expired_max_uses: u32,

    /// Mean use count among expired records
    pub expired_mean_uses: f64,
}

impl PoolStats {
    /// Percentage of used proxies that succeeded at least once
    pub fn success_rate(&self) -> f64 {
        if self.used == 0 {
            0.0
        } else {
            100.0 * self.successful as f64 / self.used as f64
        }
    }
}

/// A set of egress records shared by every fetch of a session
///
/// The records sit behind a mutex that is only ever held for the duration of
/// a counter update or a selection, never across an `.await`, so the pool can
/// be shared with background replenishment tasks.
#[derive(Debug)]
pub struct ProxyPool {
    records: Mutex<Vec<ProxyRecord>>,
    policy: InvalidationPolicy,
    replenishing: AtomicBool,
}

impl ProxyPool {
    /// Creates a pool holding only the direct record
    pub fn new(policy: InvalidationPolicy) -> Self {
        Self::with_records(policy, vec![ProxyRecord::direct()])
    }

    /// Creates a pool with no records at all
    pub fn empty(policy: InvalidationPolicy) -> Self {
        Self::with_records(policy, Vec::new())
    }

    /// Creates a pool from existing records
    pub fn with_records(policy: InvalidationPolicy, records: Vec<ProxyRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            policy,
            replenishing: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ProxyRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Picks a valid record among those used the fewest times
    ///
    /// Invalidation is re-evaluated for every record first. Ties are broken
    /// uniformly at random. Returns `None` when no valid record remains; the
    /// caller should then fetch directly.
    pub fn select_next(&self) -> Option<ProxyRecord> {
        let mut records = self.lock();

        for record in records.iter_mut() {
            if record.valid && record.should_invalidate(&self.policy) {
                record.valid = false;
            }
        }

        let least_used = records
            .iter()
            .filter(|r| r.valid)
            .map(|r| r.used_count)
            .min()?;

        let candidates: Vec<&ProxyRecord> = records
            .iter()
            .filter(|r| r.valid && r.used_count == least_used)
            .collect();

        candidates
            .choose(&mut rand::rng())
            .map(|record| (*record).clone())
    }

    /// Records that `address` was handed out for a fetch
    pub fn record_use(&self, address: &str) {
        self.update(address, |record| record.used_count += 1);
    }

    /// Records a fetch through `address` that returned a page
    pub fn record_success(&self, address: &str) {
        self.update(address, |record| {
            record.success_count += 1;
            record.fail_count = 0;
        });
    }

    /// Records a failed fetch through `address` and applies the invalidation rule
    pub fn record_failure(&self, address: &str) {
        let policy = self.policy;
        self.update(address, |record| {
            record.fail_count += 1;
            if record.should_invalidate(&policy) {
                record.valid = false;
            }
        });
    }

    /// Marks `address` invalid regardless of its counters
    pub fn invalidate(&self, address: &str) {
        self.update(address, |record| {
            record.fail_count += 1;
            record.valid = false;
        });
    }

    fn update(&self, address: &str, f: impl FnOnce(&mut ProxyRecord)) {
        let mut records = self.lock();
        match records.iter_mut().find(|r| r.address == address) {
            Some(record) => f(record),
            None => tracing::debug!(proxy = address, "Feedback for unknown proxy ignored"),
        }
    }

    /// Adds newly discovered proxies, skipping addresses already in the pool
    ///
    /// Returns the number of records added.
    pub fn merge(&self, discovered: Vec<DiscoveredProxy>) -> usize {
        let mut records = self.lock();
        let mut added = 0;
        for proxy in discovered {
            if !records.iter().any(|r| r.address == proxy.address) {
                records.push(ProxyRecord::new(proxy.address, proxy.source));
                added += 1;
            }
        }
        added
    }

    /// Queries every provider concurrently and merges what they return
    ///
    /// Each provider runs under its own `timeout`. A provider that errors or
    /// times out is logged and ignored; the others still contribute. Returns
    /// the number of records added.
    pub async fn replenish(
        &self,
        providers: &[Arc<dyn ProxyProvider>],
        timeout: Duration,
    ) -> usize {
        let fetches = providers.iter().map(|provider| async move {
            match fetch_within(provider.as_ref(), timeout).await {
                Ok(proxies) => {
                    tracing::debug!(
                        provider = provider.name(),
                        count = proxies.len(),
                        "Proxy provider returned"
                    );
                    proxies
                }
                Err(e) => {
                    tracing::warn!("Proxy provider failed: {}", e);
                    Vec::new()
                }
            }
        });

        let discovered: Vec<DiscoveredProxy> = join_all(fetches).await.into_iter().flatten().collect();
        let added = self.merge(discovered);

        tracing::info!(
            added,
            total = self.len(),
            valid = self.valid_count(),
            "Proxy pool replenished"
        );
        added
    }

    /// Starts a background replenish unless one is already running
    ///
    /// Returns `None` if another replenish still holds the pool.
    pub fn spawn_replenish(
        self: &Arc<Self>,
        providers: Vec<Arc<dyn ProxyProvider>>,
        timeout: Duration,
    ) -> Option<JoinHandle<usize>> {
        if self
            .replenishing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }

        let pool = Arc::clone(self);
        Some(tokio::spawn(async move {
            let added = pool.replenish(&providers, timeout).await;
            pool.replenishing.store(false, Ordering::Release);
            added
        }))
    }

    /// Returns true while a background replenish is in progress
    pub fn is_replenishing(&self) -> bool {
        self.replenishing.load(Ordering::Acquire)
    }

    /// Polls a single-proxy provider `per_minute` times a minute until cancelled
    pub fn spawn_trickle(
        self: &Arc<Self>,
        provider: Arc<dyn ProxyProvider>,
        per_minute: u32,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        let period = Duration::from_millis(60_000 / u64::from(per_minute.max(1)));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match provider.fetch().await {
                    Ok(proxies) => {
                        pool.merge(proxies);
                    }
                    Err(e) => tracing::debug!("Trickle provider failed: {}", e),
                }
            }
        })
    }

    /// Number of records that can still be selected
    pub fn valid_count(&self) -> usize {
        self.lock().iter().filter(|r| r.valid).count()
    }

    /// Total number of records
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if the pool holds no records at all
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the record for `address`
    pub fn get(&self, address: &str) -> Option<ProxyRecord> {
        self.lock().iter().find(|r| r.address == address).cloned()
    }

    /// Copy of every record
    pub fn records(&self) -> Vec<ProxyRecord> {
        self.lock().clone()
    }

    /// Computes the aggregate counters for reporting
    pub fn snapshot(&self) -> PoolStats {
        let records = self.lock();
        let expired: Vec<u32> = records
            .iter()
            .filter(|r| r.is_expired())
            .map(|r| r.used_count)
            .collect();

        PoolStats {
            total: records.len(),
            valid: records.iter().filter(|r| r.valid).count(),
            used: records.iter().filter(|r| r.used_count > 0).count(),
            successful: records.iter().filter(|r| r.success_count > 0).count(),
            expired: expired.len(),
            expired_min_uses: expired.iter().copied().min().unwrap_or(0),
            expired_max_uses: expired.iter().copied().max().unwrap_or(0),
            expired_mean_uses: if expired.is_empty() {
                0.0
            } else {
                expired.iter().map(|&u| f64::from(u)).sum::<f64>() / expired.len() as f64
            },
        }
    }
}

/// Runs one provider fetch, turning an elapsed `timeout` into an error
async fn fetch_within(
    provider: &dyn ProxyProvider,
    timeout: Duration,
) -> Result<Vec<DiscoveredProxy>, ProviderError> {
    tokio::time::timeout(timeout, provider.fetch())
        .await
        .unwrap_or_else(|_| {
            Err(ProviderError::Timeout {
                provider: provider.name().to_string(),
            })
        })
}
