// src/cache/mod.rs
//! Balance cache: bounded-staleness reads with single-flight request
//! coalescing.
//!
//! The fast path is synchronous and never touches the network; the blocking
//! path performs or joins the one in-flight upstream fetch per identity.
//! Staleness is computed here and nowhere else.

use crate::config::settings::{Config, FallbackMode};
use crate::error::{ExchangeError, Result, Verdict};
use crate::exchange::{AssetBalance, CredentialStore, ExchangeClient};
use crate::registry::ConnectionRegistry;
use crate::utils::ConnectionId;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use log::{debug, warn};
use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Where a snapshot's data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalanceSource {
    Fresh,
    Stale,
    /// No data yet; a fetch is on its way
    Pending,
    /// Upstream failed and nothing usable was cached
    Failed,
    /// Fabricated fallback data, never real account state
    Simulated,
}

/// What balance readers receive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub connection: ConnectionId,
    pub balances: Vec<AssetBalance>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub source: BalanceSource,
    pub warning: Option<String>,
}

/// One cached balance set for an identity.
#[derive(Debug, Clone)]
struct CacheEntry {
    balances: Vec<AssetBalance>,
    cached_at: Instant,
    fetched_at: DateTime<Utc>,
    /// Synthetic age added on top of the wall-clock age, settable by tests
    #[cfg(test)]
    aged_by: Duration,
}

impl CacheEntry {
    fn new(balances: Vec<AssetBalance>) -> Self {
        Self {
            balances,
            cached_at: Instant::now(),
            fetched_at: Utc::now(),
            #[cfg(test)]
            aged_by: Duration::ZERO,
        }
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        self.age() <= ttl
    }

    #[cfg(not(test))]
    fn age(&self) -> Duration {
        self.cached_at.elapsed()
    }

    #[cfg(test)]
    fn age(&self) -> Duration {
        self.cached_at.elapsed() + self.aged_by
    }

    fn snapshot(
        &self,
        id: &ConnectionId,
        source: BalanceSource,
        warning: Option<String>,
    ) -> BalanceSnapshot {
        BalanceSnapshot {
            connection: id.clone(),
            balances: self.balances.clone(),
            fetched_at: Some(self.fetched_at),
            source,
            warning,
        }
    }
}

/// Cache counters for monitoring.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    pub hits: AtomicU64,
    pub stale_hits: AtomicU64,
    pub misses: AtomicU64,
    pub upstream_fetches: AtomicU64,
    pub coalesced_waits: AtomicU64,
    pub background_refreshes: AtomicU64,
}

impl CacheMetrics {
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            upstream_fetches: self.upstream_fetches.load(Ordering::Relaxed),
            coalesced_waits: self.coalesced_waits.load(Ordering::Relaxed),
            background_refreshes: self.background_refreshes.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub stale_hits: u64,
    pub misses: u64,
    pub upstream_fetches: u64,
    pub coalesced_waits: u64,
    pub background_refreshes: u64,
}

impl CacheMetricsSnapshot {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.stale_hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits + self.stale_hits) as f64 / total as f64
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "Balance cache: {:.1}% hit rate, {} upstream fetches, {} coalesced waits, {} background refreshes",
            self.hit_rate() * 100.0,
            self.upstream_fetches,
            self.coalesced_waits,
            self.background_refreshes
        )
    }
}

type FetchOutcome = Result<BalanceSnapshot>;

/// Outcome of claiming an identity's single-flight slot.
enum FlightSlot {
    /// This caller runs the upstream fetch
    Owner(broadcast::Sender<FetchOutcome>),
    /// A fetch is already in flight; wait for its result
    Waiter(broadcast::Receiver<FetchOutcome>),
}

/// Per-connection balance cache with stale-while-revalidate reads.
///
/// Cheap to clone; all state is shared behind `Arc`.
#[derive(Clone)]
pub struct BalanceCache {
    entries: Arc<DashMap<ConnectionId, CacheEntry>>,
    in_flight: Arc<DashMap<ConnectionId, broadcast::Sender<FetchOutcome>>>,
    registry: Arc<ConnectionRegistry>,
    credentials: Arc<dyn CredentialStore>,
    config: Arc<Config>,
    metrics: Arc<CacheMetrics>,
}

impl BalanceCache {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        credentials: Arc<dyn CredentialStore>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            in_flight: Arc::new(DashMap::new()),
            registry,
            credentials,
            config,
            metrics: Arc::new(CacheMetrics::default()),
        }
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.config.balance_cache_ttl_secs)
    }

    pub fn refresh_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.config.refresh_wait_timeout_secs)
    }

    /// Returns the cached snapshot immediately, whatever its age.
    ///
    /// Not async on purpose: this path can never suspend. A missing entry
    /// yields a "pending" placeholder, a stale entry is served as-is; both
    /// cases schedule at most one background refresh for the identity.
    pub fn get_fast(&self, id: &ConnectionId) -> BalanceSnapshot {
        let ttl = self.ttl();
        if let Some(entry) = self.entries.get(id) {
            if entry.is_fresh(ttl) {
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                return entry.snapshot(id, BalanceSource::Fresh, None);
            }
            self.metrics.stale_hits.fetch_add(1, Ordering::Relaxed);
            let snapshot = entry.snapshot(id, BalanceSource::Stale, None);
            drop(entry);
            self.schedule_refresh(id);
            return snapshot;
        }

        self.metrics.misses.fetch_add(1, Ordering::Relaxed);
        self.schedule_refresh(id);
        BalanceSnapshot {
            connection: id.clone(),
            balances: vec![AssetBalance::pending()],
            fetched_at: None,
            source: BalanceSource::Pending,
            warning: None,
        }
    }

    /// Performs, or attaches to, the in-flight upstream fetch for an
    /// identity and waits up to `wait_timeout` for its outcome.
    ///
    /// All concurrent callers for one identity observe the same single
    /// upstream result. Fatal errors (credentials, auth) surface as `Err`;
    /// retryable upstream failures come back as degraded snapshots instead.
    pub async fn refresh_blocking(
        &self,
        id: &ConnectionId,
        wait_timeout: Duration,
    ) -> Result<BalanceSnapshot> {
        match self.acquire_slot(id) {
            FlightSlot::Owner(tx) => {
                // Subscribe before the fetch task can possibly finish
                let rx = tx.subscribe();
                let cache = self.clone();
                let owned_id = id.clone();
                tokio::spawn(async move {
                    cache.run_owner_fetch(&owned_id, tx).await;
                });
                self.await_outcome(id, rx, wait_timeout).await
            }
            FlightSlot::Waiter(rx) => {
                self.metrics.coalesced_waits.fetch_add(1, Ordering::Relaxed);
                self.await_outcome(id, rx, wait_timeout).await
            }
        }
    }

    /// Drops every cached entry. Health state is untouched.
    pub fn clear(&self) {
        let removed = self.entries.len();
        self.entries.clear();
        debug!("Cleared balance cache ({} entries)", removed);
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Check-and-set on the single-flight map. Synchronous, so the fast
    /// path can claim a slot without awaiting.
    fn acquire_slot(&self, id: &ConnectionId) -> FlightSlot {
        match self.in_flight.entry(id.clone()) {
            Entry::Occupied(occupied) => FlightSlot::Waiter(occupied.get().subscribe()),
            Entry::Vacant(vacant) => {
                let (tx, _rx) = broadcast::channel(1);
                vacant.insert(tx.clone());
                FlightSlot::Owner(tx)
            }
        }
    }

    /// Schedules a deduplicated background refresh for an identity.
    fn schedule_refresh(&self, id: &ConnectionId) {
        match self.acquire_slot(id) {
            FlightSlot::Owner(tx) => {
                self.metrics
                    .background_refreshes
                    .fetch_add(1, Ordering::Relaxed);
                let cache = self.clone();
                let owned_id = id.clone();
                tokio::spawn(async move {
                    cache.run_owner_fetch(&owned_id, tx).await;
                });
            }
            // A refresh is already on its way
            FlightSlot::Waiter(_) => {}
        }
    }

    /// Owner side of the single-flight protocol. The slot is released on
    /// every path, a panic in the client included, before the outcome is
    /// broadcast; a caller racing the removal either receives this result
    /// or starts a clean new fetch.
    async fn run_owner_fetch(&self, id: &ConnectionId, tx: broadcast::Sender<FetchOutcome>) {
        let outcome = match AssertUnwindSafe(self.fetch_and_store(id)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_panic) => Err(ExchangeError::Internal(format!(
                "balance fetch task for {} panicked",
                id
            ))),
        };
        self.in_flight.remove(id);
        let _ = tx.send(outcome);
    }

    async fn await_outcome(
        &self,
        id: &ConnectionId,
        mut rx: broadcast::Receiver<FetchOutcome>,
        wait_timeout: Duration,
    ) -> Result<BalanceSnapshot> {
        match tokio::time::timeout(wait_timeout, rx.recv()).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_closed)) => Err(ExchangeError::Internal(format!(
                "balance fetch for {} ended without a result",
                id
            ))),
            Err(_elapsed) => Err(ExchangeError::Timeout(format!(
                "waited {}s for balance refresh of {}",
                wait_timeout.as_secs(),
                id
            ))),
        }
    }

    /// The actual upstream fetch plus cache/registry bookkeeping.
    async fn fetch_and_store(&self, id: &ConnectionId) -> FetchOutcome {
        self.metrics.upstream_fetches.fetch_add(1, Ordering::Relaxed);
        match self.try_upstream(id).await {
            Ok(balances) => {
                let entry = CacheEntry::new(balances);
                let snapshot = entry.snapshot(id, BalanceSource::Fresh, None);
                self.entries.insert(id.clone(), entry);
                self.registry.record_success(id);
                debug!(
                    "💾 Cached {} balance rows for {}",
                    snapshot.balances.len(),
                    id
                );
                Ok(snapshot)
            }
            Err(err) => {
                let health = self.registry.record_failure(id, &err);
                let classification = err.classify();
                if classification.verdict == Verdict::Fatal {
                    warn!("Balance fetch for {} failed fatally: {}", id, err);
                    return Err(err);
                }
                warn!(
                    "Balance fetch for {} failed ({} consecutive): {}",
                    id, health.consecutive_failures, err
                );
                if let Some(entry) = self.entries.get(id) {
                    return Ok(entry.snapshot(
                        id,
                        BalanceSource::Stale,
                        Some(classification.reason.to_string()),
                    ));
                }
                Ok(self.fallback_snapshot(id, classification.reason))
            }
        }
    }

    async fn try_upstream(&self, id: &ConnectionId) -> Result<Vec<AssetBalance>> {
        let credentials = self.credentials.get(id).await?;
        let client = self.registry.get_or_create(id, &credentials)?;
        let deadline = Duration::from_secs(self.config.exchange_request_timeout_secs);
        match tokio::time::timeout(deadline, client.fetch_balance()).await {
            Ok(result) => result,
            Err(_elapsed) => Err(ExchangeError::Timeout(format!(
                "balance fetch for {} exceeded {}s",
                id,
                deadline.as_secs()
            ))),
        }
    }

    /// Synthetic snapshot served when upstream failed and nothing usable is
    /// cached. Fabricated data only ever leaves here labelled as such.
    fn fallback_snapshot(&self, id: &ConnectionId, reason: &str) -> BalanceSnapshot {
        match self.config.fallback_mode {
            FallbackMode::Pending => BalanceSnapshot {
                connection: id.clone(),
                balances: Vec::new(),
                fetched_at: None,
                source: BalanceSource::Failed,
                warning: Some(reason.to_string()),
            },
            FallbackMode::Simulated => {
                let mut rng = thread_rng();
                let balances = vec![
                    AssetBalance::new("USDT", rng.gen_range(500.0..5_000.0), 0.0),
                    AssetBalance::new("BTC", rng.gen_range(0.01..0.5), 0.0),
                ];
                BalanceSnapshot {
                    connection: id.clone(),
                    balances,
                    fetched_at: None,
                    source: BalanceSource::Simulated,
                    warning: Some(format!("{}; balances are simulated", reason)),
                }
            }
        }
    }

    #[cfg(test)]
    fn age_entry(&self, id: &ConnectionId, by: Duration) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.aged_by = by;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryCredentialStore, MockClientFactory, MockExchangeClient};
    use futures::future::join_all;
    use pretty_assertions::assert_eq;

    struct Harness {
        cache: BalanceCache,
        registry: Arc<ConnectionRegistry>,
        factory: Arc<MockClientFactory>,
    }

    fn harness(config: Config) -> Harness {
        let config = Arc::new(config);
        let factory = Arc::new(MockClientFactory::new());
        let registry = Arc::new(ConnectionRegistry::new(factory.clone(), &config));
        let credentials = Arc::new(MemoryCredentialStore::accepting_all());
        let cache = BalanceCache::new(registry.clone(), credentials, config);
        Harness {
            cache,
            registry,
            factory,
        }
    }

    fn id() -> ConnectionId {
        ConnectionId::new(7, "binance", true)
    }

    fn btc_rows() -> Vec<AssetBalance> {
        vec![
            AssetBalance::new("BTC", 1.5, 0.5),
            AssetBalance::new("USDT", 10_000.0, 0.0),
        ]
    }

    #[tokio::test]
    async fn get_fast_serves_placeholder_before_any_fetch() {
        let h = harness(Config::default());
        let snapshot = h.cache.get_fast(&id());
        assert_eq!(snapshot.source, BalanceSource::Pending);
        assert_eq!(snapshot.balances.len(), 1);
        assert_eq!(snapshot.balances[0].currency, "pending");
        assert_eq!(snapshot.balances[0].total, 0.0);
        assert!(snapshot.fetched_at.is_none());
    }

    #[tokio::test]
    async fn get_fast_never_waits_on_a_slow_upstream() {
        let h = harness(Config::default());
        h.factory.register(
            id(),
            Arc::new(
                MockExchangeClient::new("binance").with_latency(Duration::from_secs(5)),
            ),
        );
        let started = Instant::now();
        let snapshot = h.cache.get_fast(&id());
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(snapshot.source, BalanceSource::Pending);
    }

    #[tokio::test]
    async fn refresh_then_fast_reads_follow_the_ttl_lifecycle() {
        let h = harness(Config::default());
        h.factory.register(
            id(),
            Arc::new(MockExchangeClient::new("binance").with_balances(btc_rows())),
        );

        // t = 0: blocking refresh populates the cache
        let snapshot = h
            .cache
            .refresh_blocking(&id(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(snapshot.source, BalanceSource::Fresh);
        assert_eq!(snapshot.balances, btc_rows());

        // t = 100: still fresh, returned verbatim, no refresh scheduled
        h.cache.age_entry(&id(), Duration::from_secs(100));
        let snapshot = h.cache.get_fast(&id());
        assert_eq!(snapshot.source, BalanceSource::Fresh);
        assert_eq!(snapshot.balances, btc_rows());
        assert_eq!(h.cache.metrics().background_refreshes, 0);

        // t = 400: past the 300s ttl, stale value served, one refresh queued
        h.cache.age_entry(&id(), Duration::from_secs(400));
        let first = h.cache.get_fast(&id());
        let second = h.cache.get_fast(&id());
        assert_eq!(first.source, BalanceSource::Stale);
        assert_eq!(first.balances, btc_rows());
        assert_eq!(second.source, BalanceSource::Stale);
        assert_eq!(h.cache.metrics().background_refreshes, 1);
    }

    #[tokio::test]
    async fn fifty_concurrent_refreshes_hit_upstream_once() {
        let h = harness(Config::default());
        let client = Arc::new(
            MockExchangeClient::new("binance")
                .with_latency(Duration::from_millis(100))
                .with_balances(btc_rows()),
        );
        h.factory.register(id(), client.clone());

        let calls = (0..50).map(|_| {
            let cache = h.cache.clone();
            async move { cache.refresh_blocking(&id(), Duration::from_secs(5)).await }
        });
        let outcomes = join_all(calls).await;

        assert_eq!(client.balance_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        for outcome in outcomes {
            let snapshot = outcome.unwrap();
            assert_eq!(snapshot.source, BalanceSource::Fresh);
            assert_eq!(snapshot.balances, btc_rows());
        }
        assert_eq!(h.cache.metrics().upstream_fetches, 1);
        assert_eq!(h.cache.metrics().coalesced_waits, 49);
    }

    #[tokio::test]
    async fn waiter_timeout_leaves_the_fetch_running() {
        let h = harness(Config::default());
        let client = Arc::new(
            MockExchangeClient::new("binance")
                .with_latency(Duration::from_millis(300))
                .with_balances(btc_rows()),
        );
        h.factory.register(id(), client.clone());

        let err = h
            .cache
            .refresh_blocking(&id(), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Timeout);

        // The owner task completes on its own and fills the cache
        tokio::time::sleep(Duration::from_millis(500)).await;
        let snapshot = h.cache.get_fast(&id());
        assert_eq!(snapshot.source, BalanceSource::Fresh);
        assert_eq!(snapshot.balances, btc_rows());

        // Slot was released; a new refresh is possible
        let snapshot = h
            .cache
            .refresh_blocking(&id(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(snapshot.source, BalanceSource::Fresh);
        assert_eq!(client.balance_calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn upstream_failure_preserves_stale_data_with_warning() {
        let h = harness(Config::default());
        let client = Arc::new(MockExchangeClient::new("binance").with_balances(btc_rows()));
        h.factory.register(id(), client.clone());

        h.cache
            .refresh_blocking(&id(), Duration::from_secs(5))
            .await
            .unwrap();

        client.push_error(ExchangeError::Api {
            status: 500,
            message: "exchange down".to_string(),
        });
        let snapshot = h
            .cache
            .refresh_blocking(&id(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(snapshot.source, BalanceSource::Stale);
        assert_eq!(snapshot.balances, btc_rows());
        assert_eq!(
            snapshot.warning.as_deref(),
            Some("exchange error, using fallback")
        );
        assert_eq!(h.registry.health(&id()).consecutive_failures, 1);
    }

    #[tokio::test]
    async fn failure_with_empty_cache_yields_failed_snapshot() {
        let h = harness(Config::default());
        let client = Arc::new(MockExchangeClient::new("binance"));
        client.push_error(ExchangeError::Network("unreachable".to_string()));
        h.factory.register(id(), client);

        let snapshot = h
            .cache
            .refresh_blocking(&id(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(snapshot.source, BalanceSource::Failed);
        assert!(snapshot.balances.is_empty());
        assert_eq!(
            snapshot.warning.as_deref(),
            Some("network timeout, using fallback")
        );
    }

    #[tokio::test]
    async fn simulated_mode_labels_fabricated_balances() {
        let config = Config {
            fallback_mode: FallbackMode::Simulated,
            ..Config::default()
        };
        let h = harness(config);
        let client = Arc::new(MockExchangeClient::new("binance"));
        client.push_error(ExchangeError::Network("unreachable".to_string()));
        h.factory.register(id(), client);

        let snapshot = h
            .cache
            .refresh_blocking(&id(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(snapshot.source, BalanceSource::Simulated);
        assert!(!snapshot.balances.is_empty());
        assert!(snapshot.warning.unwrap().contains("simulated"));
    }

    #[tokio::test]
    async fn auth_failures_surface_instead_of_degrading_silently() {
        let h = harness(Config::default());
        let client = Arc::new(MockExchangeClient::new("binance").with_balances(btc_rows()));
        h.factory.register(id(), client.clone());

        h.cache
            .refresh_blocking(&id(), Duration::from_secs(5))
            .await
            .unwrap();

        client.push_error(ExchangeError::Auth("invalid API-key".to_string()));
        let err = h
            .cache
            .refresh_blocking(&id(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Auth);
        // Auth problems are not a connection-health signal
        assert_eq!(h.registry.health(&id()).consecutive_failures, 0);
        assert!(!h.registry.is_degraded(&id()));
    }

    #[tokio::test]
    async fn missing_credentials_propagate() {
        let config = Arc::new(Config::default());
        let factory = Arc::new(MockClientFactory::new());
        let registry = Arc::new(ConnectionRegistry::new(factory.clone(), &config));
        let cache = BalanceCache::new(
            registry.clone(),
            Arc::new(MemoryCredentialStore::new()),
            config,
        );

        let err = cache
            .refresh_blocking(&id(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Credential);
        assert!(!registry.is_degraded(&id()));
    }

    #[tokio::test]
    async fn upstream_timeout_counts_as_standard_failure() {
        let config = Config {
            exchange_request_timeout_secs: 1,
            ..Config::default()
        };
        let h = harness(config);
        h.factory.register(
            id(),
            Arc::new(
                MockExchangeClient::new("binance").with_latency(Duration::from_millis(1500)),
            ),
        );

        let snapshot = h
            .cache
            .refresh_blocking(&id(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(snapshot.source, BalanceSource::Failed);
        assert_eq!(h.registry.health(&id()).consecutive_failures, 1);
    }

    #[tokio::test]
    async fn three_failed_refreshes_degrade_then_success_heals() {
        let h = harness(Config::default());
        let client = Arc::new(MockExchangeClient::new("binance").with_balances(btc_rows()));
        client.fail_next(ExchangeError::Network("down".to_string()), 3);
        h.factory.register(id(), client);

        for _ in 0..3 {
            h.cache
                .refresh_blocking(&id(), Duration::from_secs(5))
                .await
                .unwrap();
        }
        assert!(h.registry.is_degraded(&id()));

        let snapshot = h
            .cache
            .refresh_blocking(&id(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(snapshot.source, BalanceSource::Fresh);
        assert!(!h.registry.is_degraded(&id()));
        assert_eq!(h.registry.health(&id()).consecutive_failures, 0);
    }

    #[tokio::test]
    async fn metrics_track_the_read_paths() {
        let h = harness(Config::default());
        h.factory.register(
            id(),
            Arc::new(MockExchangeClient::new("binance").with_balances(btc_rows())),
        );

        h.cache.get_fast(&id()); // miss
        h.cache
            .refresh_blocking(&id(), Duration::from_secs(5))
            .await
            .unwrap();
        h.cache.get_fast(&id()); // fresh hit
        h.cache.age_entry(&id(), Duration::from_secs(400));
        h.cache.get_fast(&id()); // stale hit

        let m = h.cache.metrics();
        assert_eq!(m.misses, 1);
        assert_eq!(m.hits, 1);
        assert_eq!(m.stale_hits, 1);
        assert!(m.hit_rate() > 0.6);
    }

    #[tokio::test]
    async fn clear_drops_entries_but_not_health() {
        let h = harness(Config::default());
        h.factory.register(
            id(),
            Arc::new(MockExchangeClient::new("binance").with_balances(btc_rows())),
        );
        h.cache
            .refresh_blocking(&id(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(h.cache.entry_count(), 1);

        h.cache.clear();
        assert_eq!(h.cache.entry_count(), 0);
        let snapshot = h.cache.get_fast(&id());
        assert_eq!(snapshot.source, BalanceSource::Pending);
        assert!(h.registry.health(&id()).last_success.is_some());
    }
}
