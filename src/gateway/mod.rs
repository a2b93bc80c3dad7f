// src/gateway/mod.rs
//! Facade wiring the registry, balance cache and strategy scheduler into one
//! service surface. Binary entry points and API layers talk to this type
//! instead of to the individual components.

use crate::cache::{BalanceCache, BalanceSnapshot, BalanceSource, CacheMetricsSnapshot};
use crate::config::settings::Config;
use crate::error::Result;
use crate::exchange::{CredentialStore, ExchangeClientFactory};
use crate::registry::{ConnectionHealth, ConnectionRegistry};
use crate::scheduler::{SchedulerMetricsSnapshot, StrategyScheduler, TickReport};
use crate::strategy::{SignalEvaluator, StrategyStore};
use crate::utils::ConnectionId;
use futures::future::join_all;
use log::info;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Point-in-time operational picture for status logs and dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    pub connections: usize,
    pub degraded: Vec<ConnectionId>,
    pub cached_balances: usize,
    pub scheduler_running: bool,
    pub cache: CacheMetricsSnapshot,
    pub scheduler: SchedulerMetricsSnapshot,
}

impl GatewayStatus {
    pub fn summary(&self) -> String {
        format!(
            "🛰️ {} connections ({} degraded), {} cached balance sets | {} | {}",
            self.connections,
            self.degraded.len(),
            self.cached_balances,
            self.cache.summary(),
            self.scheduler.summary()
        )
    }
}

/// One service object owning the whole exchange-side state.
///
/// Cheap to clone; all state is shared behind `Arc`.
#[derive(Clone)]
pub struct ExchangeGateway {
    registry: Arc<ConnectionRegistry>,
    cache: BalanceCache,
    scheduler: StrategyScheduler,
}

impl ExchangeGateway {
    pub fn new(
        factory: Arc<dyn ExchangeClientFactory>,
        credentials: Arc<dyn CredentialStore>,
        strategies: Arc<dyn StrategyStore>,
        evaluator: Arc<dyn SignalEvaluator>,
        config: Arc<Config>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(factory, &config));
        let cache = BalanceCache::new(registry.clone(), credentials.clone(), config.clone());
        let scheduler = StrategyScheduler::new(
            strategies,
            evaluator,
            cache.clone(),
            registry.clone(),
            credentials,
            config,
        );
        Self {
            registry,
            cache,
            scheduler,
        }
    }

    /// Starts the recurring strategy loop. No-op when already running.
    pub fn start(&self) {
        info!("🔌 Exchange gateway starting");
        self.scheduler.start();
    }

    /// Stops the strategy loop after any in-progress tick. Idempotent.
    pub fn stop(&self) {
        self.scheduler.stop();
    }

    /// Runs one strategy pass right now, outside the timer.
    pub async fn trigger_tick(&self) -> Result<TickReport> {
        self.scheduler.tick().await
    }

    /// Non-blocking balance read; placeholder or stale data included.
    pub fn balances_fast(&self, id: &ConnectionId) -> BalanceSnapshot {
        self.cache.get_fast(id)
    }

    /// Non-blocking batch read, one row per requested identity.
    pub fn balances_fast_batch(&self, ids: &[ConnectionId]) -> Vec<BalanceSnapshot> {
        ids.iter().map(|id| self.cache.get_fast(id)).collect()
    }

    /// Blocking refresh for one identity, errors intact.
    pub async fn refresh_balance(&self, id: &ConnectionId) -> Result<BalanceSnapshot> {
        self.cache
            .refresh_blocking(id, self.cache.refresh_wait_timeout())
            .await
    }

    /// Blocking refresh of several identities at once, each wait bounded by
    /// `timeout` (the configured refresh wait when `None`).
    ///
    /// Always yields one row per requested identity: failures are folded
    /// into `Failed` snapshots so a dashboard render never loses a row.
    pub async fn refresh_balances(
        &self,
        ids: &[ConnectionId],
        timeout: Option<Duration>,
    ) -> Vec<BalanceSnapshot> {
        let wait = timeout.unwrap_or_else(|| self.cache.refresh_wait_timeout());
        let refreshes = ids.iter().map(|id| async move {
            match self.cache.refresh_blocking(id, wait).await {
                Ok(snapshot) => snapshot,
                Err(err) => BalanceSnapshot {
                    connection: id.clone(),
                    balances: Vec::new(),
                    fetched_at: None,
                    source: BalanceSource::Failed,
                    warning: Some(err.to_string()),
                },
            }
        });
        join_all(refreshes).await
    }

    pub fn connection_health(&self, id: &ConnectionId) -> ConnectionHealth {
        self.registry.health(id)
    }

    /// Drops the client handle and health history for an identity.
    pub fn invalidate_connection(&self, id: &ConnectionId) {
        self.registry.invalidate(id);
    }

    pub fn clear_balance_cache(&self) {
        self.cache.clear();
    }

    pub fn status(&self) -> GatewayStatus {
        GatewayStatus {
            connections: self.registry.len(),
            degraded: self.registry.degraded_connections(),
            cached_balances: self.cache.entry_count(),
            scheduler_running: self.scheduler.is_running(),
            cache: self.cache.metrics(),
            scheduler: self.scheduler.metrics(),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &BalanceCache {
        &self.cache
    }

    pub fn scheduler(&self) -> &StrategyScheduler {
        &self.scheduler
    }
}
