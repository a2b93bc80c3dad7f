// src/scheduler/mod.rs
//! Timer-driven strategy loop.
//!
//! Every tick loads the active strategies and walks them in ascending id
//! order. Each strategy gets its own timeout and its own error handling, so
//! one broken or slow strategy never takes the tick down with it. Strategies
//! whose connection is degraded are skipped outright, and Buy/Sell signals
//! are checked against the cached balances before an order leaves.

use crate::cache::{BalanceCache, BalanceSnapshot, BalanceSource};
use crate::config::settings::Config;
use crate::error::{ExchangeError, Result};
use crate::exchange::{CredentialStore, ExchangeClient, OrderReceipt, OrderRequest, OrderSide};
use crate::registry::ConnectionRegistry;
use crate::strategy::{order_quantity, SignalEvaluator, Strategy, StrategyStore, TradeRecord};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

/// What one tick did, for logs and monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub processed: usize,
    pub skipped_degraded: usize,
    pub signals_acted: usize,
    pub failures: usize,
}

/// Running counters across all ticks.
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    pub ticks: AtomicU64,
    pub strategies_processed: AtomicU64,
    pub strategies_skipped: AtomicU64,
    pub strategies_failed: AtomicU64,
    pub signals_acted: AtomicU64,
}

impl SchedulerMetrics {
    pub fn snapshot(&self) -> SchedulerMetricsSnapshot {
        SchedulerMetricsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            strategies_processed: self.strategies_processed.load(Ordering::Relaxed),
            strategies_skipped: self.strategies_skipped.load(Ordering::Relaxed),
            strategies_failed: self.strategies_failed.load(Ordering::Relaxed),
            signals_acted: self.signals_acted.load(Ordering::Relaxed),
        }
    }

    fn absorb(&self, report: &TickReport) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.strategies_processed
            .fetch_add(report.processed as u64, Ordering::Relaxed);
        self.strategies_skipped
            .fetch_add(report.skipped_degraded as u64, Ordering::Relaxed);
        self.strategies_failed
            .fetch_add(report.failures as u64, Ordering::Relaxed);
        self.signals_acted
            .fetch_add(report.signals_acted as u64, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetricsSnapshot {
    pub ticks: u64,
    pub strategies_processed: u64,
    pub strategies_skipped: u64,
    pub strategies_failed: u64,
    pub signals_acted: u64,
}

impl SchedulerMetricsSnapshot {
    pub fn summary(&self) -> String {
        format!(
            "Scheduler: {} ticks, {} strategies processed, {} skipped (degraded), {} failed, {} signals acted on",
            self.ticks,
            self.strategies_processed,
            self.strategies_skipped,
            self.strategies_failed,
            self.signals_acted
        )
    }
}

/// Quote assets recognized when splitting concatenated spot symbols.
const QUOTE_ASSETS: [&str; 8] = [
    "USDT", "USDC", "BUSD", "FDUSD", "TUSD", "BTC", "ETH", "BNB",
];

/// Splits a "BTCUSDT" style symbol into (base, quote) by its quote suffix.
fn split_symbol(symbol: &str) -> Option<(&str, &str)> {
    QUOTE_ASSETS.iter().find_map(|quote| {
        symbol
            .strip_suffix(quote)
            .filter(|base| !base.is_empty())
            .map(|base| (base, *quote))
    })
}

fn free_balance(snapshot: &BalanceSnapshot, asset: &str) -> f64 {
    snapshot
        .balances
        .iter()
        .find(|row| row.currency == asset)
        .map(|row| row.free)
        .unwrap_or(0.0)
}

/// Pre-trade funds check against the cached balance snapshot.
///
/// Only `Fresh` and `Stale` snapshots can veto an order; `Pending`, `Failed`
/// and `Simulated` snapshots prove nothing about the live account, so those
/// orders proceed and the exchange gives the final verdict. Symbols whose
/// quote asset is not recognized proceed as well. Buys need the quote cost
/// covered, sells the base quantity.
fn insufficient_funds(
    snapshot: &BalanceSnapshot,
    symbol: &str,
    side: OrderSide,
    quantity: f64,
    price: f64,
) -> Option<String> {
    if !matches!(snapshot.source, BalanceSource::Fresh | BalanceSource::Stale) {
        return None;
    }
    let (base, quote) = split_symbol(symbol)?;
    let (asset, needed) = match side {
        OrderSide::Buy => (quote, quantity * price),
        OrderSide::Sell => (base, quantity),
    };
    let free = free_balance(snapshot, asset);
    if free < needed {
        Some(format!("free {} {} is below the required {}", asset, free, needed))
    } else {
        None
    }
}

/// How one strategy's iteration ended.
enum StrategyOutcome {
    SkippedDegraded,
    Held,
    Acted(OrderReceipt),
}

/// Recurring evaluation loop over all active strategies.
///
/// Cheap to clone; all state is shared behind `Arc`.
#[derive(Clone)]
pub struct StrategyScheduler {
    store: Arc<dyn StrategyStore>,
    evaluator: Arc<dyn SignalEvaluator>,
    cache: BalanceCache,
    registry: Arc<ConnectionRegistry>,
    credentials: Arc<dyn CredentialStore>,
    config: Arc<Config>,
    running: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    metrics: Arc<SchedulerMetrics>,
}

impl StrategyScheduler {
    pub fn new(
        store: Arc<dyn StrategyStore>,
        evaluator: Arc<dyn SignalEvaluator>,
        cache: BalanceCache,
        registry: Arc<ConnectionRegistry>,
        credentials: Arc<dyn CredentialStore>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            evaluator,
            cache,
            registry,
            credentials,
            config,
            running: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            metrics: Arc::new(SchedulerMetrics::default()),
        }
    }

    /// Starts the tick loop. Calling this on a running scheduler is a no-op.
    /// Every start hands the interval to a new loop generation, so a loop
    /// still parked across a stop/start cycle exits instead of ticking twice.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::Relaxed) {
            debug!("Strategy scheduler is already running");
            return;
        }
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            "🚀 Strategy scheduler started (tick every {}s)",
            self.config.scheduler_tick_secs
        );

        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(scheduler.config.scheduler_tick_secs));
            while scheduler.generation_active(generation) {
                ticker.tick().await;
                if !scheduler.generation_active(generation) {
                    break;
                }
                match scheduler.tick().await {
                    Ok(report) => debug!("⏱️ Tick finished: {:?}", report),
                    Err(err) => error!("Strategy tick failed: {}", err),
                }
            }
            info!("🛑 Strategy scheduler loop exited");
        });
    }

    /// Signals the loop to stop after any in-progress tick. Idempotent.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::Relaxed) {
            return;
        }
        info!("🛑 Strategy scheduler stopping; in-progress tick will finish");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// True while `generation` is still the loop generation allowed to tick.
    fn generation_active(&self, generation: u64) -> bool {
        self.running.load(Ordering::Relaxed)
            && self.generation.load(Ordering::Relaxed) == generation
    }

    pub fn metrics(&self) -> SchedulerMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// One full pass over the active strategies.
    ///
    /// Strategies run one after another in ascending id order, each bounded
    /// by its own timeout. Only a failure to load the strategy list aborts
    /// the tick; per-strategy errors are counted and logged.
    pub async fn tick(&self) -> Result<TickReport> {
        let mut strategies = self.store.list_active().await?;
        strategies.sort_by_key(|s| s.id);

        let mut report = TickReport::default();
        if strategies.is_empty() {
            debug!("No active strategies this tick");
            self.metrics.absorb(&report);
            return Ok(report);
        }

        debug!("🔍 Evaluating {} active strategies", strategies.len());
        let deadline = Duration::from_secs(self.config.strategy_timeout_secs);

        for strategy in &strategies {
            let outcome = match tokio::time::timeout(deadline, self.process_strategy(strategy)).await
            {
                Ok(outcome) => outcome,
                Err(_elapsed) => Err(ExchangeError::Timeout(format!(
                    "strategy {} exceeded the {}s per-strategy budget",
                    strategy.id,
                    deadline.as_secs()
                ))),
            };
            match outcome {
                Ok(StrategyOutcome::SkippedDegraded) => report.skipped_degraded += 1,
                Ok(StrategyOutcome::Held) => report.processed += 1,
                Ok(StrategyOutcome::Acted(receipt)) => {
                    report.processed += 1;
                    // The order already reached the exchange, so persistence
                    // runs outside the per-strategy budget
                    let trade = TradeRecord::from_receipt(strategy, &receipt);
                    match self.store.record_trade(trade).await {
                        Ok(()) => {
                            report.signals_acted += 1;
                            info!(
                                "✅ Strategy {} recorded {} {} {} @ {} (order {})",
                                strategy.id,
                                receipt.status,
                                receipt.side,
                                strategy.symbol,
                                receipt.fill_price,
                                receipt.order_id
                            );
                        }
                        Err(err) => {
                            report.failures += 1;
                            error!(
                                "⚠️ Strategy {} submitted order {} but persisting the trade failed: {}",
                                strategy.id, receipt.order_id, err
                            );
                        }
                    }
                }
                Err(err) => {
                    report.failures += 1;
                    error!("⚠️ Strategy {} failed this tick: {}", strategy.id, err);
                }
            }
        }

        self.metrics.absorb(&report);
        Ok(report)
    }

    async fn process_strategy(&self, strategy: &Strategy) -> Result<StrategyOutcome> {
        let id = &strategy.connection;
        if self.registry.is_degraded(id) {
            warn!(
                "⏭️ Skipping strategy {}: connection {} is degraded",
                strategy.id, id
            );
            return Ok(StrategyOutcome::SkippedDegraded);
        }

        // Funds context for the pre-trade check; the fast path never blocks a tick
        let balances = self.cache.get_fast(id);
        debug!(
            "Strategy {} balance context: {:?} ({} rows)",
            strategy.id,
            balances.source,
            balances.balances.len()
        );

        let credentials = self.credentials.get(id).await?;
        let client = self.registry.get_or_create(id, &credentials)?;

        let tick = match client.fetch_ticker(&strategy.symbol).await {
            Ok(tick) => {
                self.registry.record_success(id);
                tick
            }
            Err(err) => {
                self.registry.record_failure(id, &err);
                return Err(err);
            }
        };

        // Evaluator errors are strategy problems, not connection problems
        let signal = self.evaluator.evaluate(strategy, &tick)?;
        let side = match signal.action.to_order_side() {
            Some(side) => side,
            None => {
                debug!("Strategy {} holds: {}", strategy.id, signal.reason);
                return Ok(StrategyOutcome::Held);
            }
        };

        info!(
            "📈 Strategy {} signals {} {} @ {}: {}",
            strategy.id, side, strategy.symbol, tick.price, signal.reason
        );

        let quantity = order_quantity(strategy, tick.price)?;
        if let Some(shortfall) =
            insufficient_funds(&balances, &strategy.symbol, side, quantity, tick.price)
        {
            warn!(
                "⏭️ Strategy {} holds its {} {}: {}",
                strategy.id, side, strategy.symbol, shortfall
            );
            return Ok(StrategyOutcome::Held);
        }

        let receipt = if self.config.paper_trading {
            self.paper_receipt(strategy, side, quantity, tick.price)
        } else {
            let request = OrderRequest::market(strategy.symbol.clone(), side, quantity);
            match client.submit_order(&request).await {
                Ok(receipt) => receipt,
                Err(err) => {
                    self.registry.record_failure(id, &err);
                    return Err(err);
                }
            }
        };
        Ok(StrategyOutcome::Acted(receipt))
    }

    fn paper_receipt(
        &self,
        strategy: &Strategy,
        side: OrderSide,
        quantity: f64,
        price: f64,
    ) -> OrderReceipt {
        OrderReceipt {
            order_id: format!("paper-{}", uuid::Uuid::new_v4()),
            client_order_id: uuid::Uuid::new_v4().to_string(),
            symbol: strategy.symbol.clone(),
            side,
            filled_qty: quantity,
            fill_price: price,
            status: "PAPER".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::AssetBalance;
    use crate::strategy::SignalAction;
    use crate::testing::{
        MemoryCredentialStore, MemoryStrategyStore, MockClientFactory, MockExchangeClient,
        ScriptedEvaluator, ScriptedOutcome,
    };
    use crate::utils::ConnectionId;
    use pretty_assertions::assert_eq;

    struct Harness {
        scheduler: StrategyScheduler,
        cache: BalanceCache,
        store: Arc<MemoryStrategyStore>,
        evaluator: Arc<ScriptedEvaluator>,
        factory: Arc<MockClientFactory>,
        registry: Arc<ConnectionRegistry>,
    }

    fn harness(config: Config) -> Harness {
        harness_with_store(config, MemoryStrategyStore::new())
    }

    fn harness_with_store(config: Config, store: MemoryStrategyStore) -> Harness {
        let config = Arc::new(config);
        let factory = Arc::new(MockClientFactory::new());
        let registry = Arc::new(ConnectionRegistry::new(factory.clone(), &config));
        let credentials: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::accepting_all());
        let cache = BalanceCache::new(registry.clone(), credentials.clone(), config.clone());
        let store = Arc::new(store);
        let evaluator = Arc::new(ScriptedEvaluator::new());
        let scheduler = StrategyScheduler::new(
            store.clone(),
            evaluator.clone(),
            cache.clone(),
            registry.clone(),
            credentials,
            config,
        );
        Harness {
            scheduler,
            cache,
            store,
            evaluator,
            factory,
            registry,
        }
    }

    fn conn(user_id: i64) -> ConnectionId {
        ConnectionId::new(user_id, "binance", true)
    }

    #[tokio::test]
    async fn one_broken_evaluator_does_not_abort_the_tick() {
        let h = harness(Config::default());
        for id in 1..=5 {
            h.store.push_strategy(Strategy::sample(id, conn(id), "BTCUSDT"));
            if id == 3 {
                h.evaluator
                    .script(id, ScriptedOutcome::Fail("indicator blew up".to_string()));
            } else {
                h.evaluator.script(id, ScriptedOutcome::Act(SignalAction::Buy));
            }
        }

        let report = h.scheduler.tick().await.unwrap();
        assert_eq!(report.processed, 4);
        assert_eq!(report.signals_acted, 4);
        assert_eq!(report.failures, 1);
        assert_eq!(report.skipped_degraded, 0);

        let trades = h.store.recorded_trades();
        let ids: Vec<i64> = trades.iter().map(|t| t.strategy_id).collect();
        assert_eq!(ids, vec![1, 2, 4, 5]);
    }

    #[tokio::test]
    async fn strategies_run_in_ascending_id_order() {
        let h = harness(Config::default());
        for id in [42, 7, 19] {
            h.store.push_strategy(Strategy::sample(id, conn(id), "ETHUSDT"));
            h.evaluator.script(id, ScriptedOutcome::Act(SignalAction::Sell));
        }

        h.scheduler.tick().await.unwrap();
        let ids: Vec<i64> = h
            .store
            .recorded_trades()
            .iter()
            .map(|t| t.strategy_id)
            .collect();
        assert_eq!(ids, vec![7, 19, 42]);
    }

    #[tokio::test]
    async fn degraded_connections_are_skipped_for_the_tick() {
        let h = harness(Config::default());
        let degraded = conn(1);
        let healthy = conn(2);
        h.store.push_strategy(Strategy::sample(1, degraded.clone(), "BTCUSDT"));
        h.store.push_strategy(Strategy::sample(2, healthy.clone(), "BTCUSDT"));
        h.evaluator.script(1, ScriptedOutcome::Act(SignalAction::Buy));
        h.evaluator.script(2, ScriptedOutcome::Act(SignalAction::Buy));

        let degraded_client = Arc::new(MockExchangeClient::new("binance"));
        h.factory.register(degraded.clone(), degraded_client.clone());
        let err = ExchangeError::Network("down".to_string());
        for _ in 0..3 {
            h.registry.record_failure(&degraded, &err);
        }
        assert!(h.registry.is_degraded(&degraded));

        let report = h.scheduler.tick().await.unwrap();
        assert_eq!(report.skipped_degraded, 1);
        assert_eq!(report.processed, 1);
        assert_eq!(report.signals_acted, 1);

        // The degraded connection saw no traffic at all
        assert_eq!(
            degraded_client
                .ticker_calls
                .load(std::sync::atomic::Ordering::SeqCst),
            0
        );
        let trades = h.store.recorded_trades();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].strategy_id, 2);
    }

    #[tokio::test]
    async fn hold_signals_process_without_trading() {
        let h = harness(Config::default());
        h.store.push_strategy(Strategy::sample(1, conn(1), "BTCUSDT"));
        // Unscripted strategies hold

        let report = h.scheduler.tick().await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.signals_acted, 0);
        assert!(h.store.recorded_trades().is_empty());
    }

    #[tokio::test]
    async fn paper_trading_records_without_submitting_orders() {
        let config = Config {
            paper_trading: true,
            ..Config::default()
        };
        let h = harness(config);
        h.store.push_strategy(Strategy::sample(1, conn(1), "BTCUSDT"));
        h.evaluator.script(1, ScriptedOutcome::Act(SignalAction::Buy));
        let client = Arc::new(MockExchangeClient::new("binance"));
        h.factory.register(conn(1), client.clone());

        let report = h.scheduler.tick().await.unwrap();
        assert_eq!(report.signals_acted, 1);
        assert_eq!(client.order_calls.load(std::sync::atomic::Ordering::SeqCst), 0);

        let trades = h.store.recorded_trades();
        assert_eq!(trades.len(), 1);
        assert!(trades[0].order_id.starts_with("paper-"));
    }

    #[tokio::test]
    async fn live_trades_fill_through_the_client() {
        let h = harness(Config::default());
        h.store.push_strategy(Strategy::sample(1, conn(1), "BTCUSDT"));
        h.evaluator.script(1, ScriptedOutcome::Act(SignalAction::Buy));
        let client = Arc::new(MockExchangeClient::new("binance").with_price(50_000.0));
        h.factory.register(conn(1), client.clone());

        h.scheduler.tick().await.unwrap();
        assert_eq!(client.order_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        let trades = h.store.recorded_trades();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].side, OrderSide::Buy);
        // entry_amount 100 at price 50k
        assert!(trades[0].amount > 0.0019 && trades[0].amount < 0.0021);
    }

    #[tokio::test]
    async fn slow_strategy_is_cut_off_by_the_per_strategy_timeout() {
        let config = Config {
            strategy_timeout_secs: 1,
            ..Config::default()
        };
        let h = harness(config);
        h.store.push_strategy(Strategy::sample(1, conn(1), "BTCUSDT"));
        h.store.push_strategy(Strategy::sample(2, conn(2), "BTCUSDT"));
        h.evaluator.script(1, ScriptedOutcome::Act(SignalAction::Buy));
        h.evaluator.script(2, ScriptedOutcome::Act(SignalAction::Buy));
        h.factory.register(
            conn(1),
            Arc::new(
                MockExchangeClient::new("binance").with_latency(Duration::from_millis(1500)),
            ),
        );

        let report = h.scheduler.tick().await.unwrap();
        assert_eq!(report.failures, 1);
        assert_eq!(report.signals_acted, 1);
        let trades = h.store.recorded_trades();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].strategy_id, 2);
    }

    #[tokio::test]
    async fn ticker_failures_count_against_connection_health() {
        let h = harness(Config::default());
        h.store.push_strategy(Strategy::sample(1, conn(1), "BTCUSDT"));
        let client = Arc::new(MockExchangeClient::new("binance"));
        client.push_error(ExchangeError::Network("reset by peer".to_string()));
        h.factory.register(conn(1), client);

        let report = h.scheduler.tick().await.unwrap();
        assert_eq!(report.failures, 1);
        assert_eq!(h.registry.health(&conn(1)).consecutive_failures, 1);
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let h = harness(Config::default());
        assert!(!h.scheduler.is_running());
        h.scheduler.start();
        h.scheduler.start();
        assert!(h.scheduler.is_running());
        h.scheduler.stop();
        h.scheduler.stop();
        assert!(!h.scheduler.is_running());
    }

    #[tokio::test]
    async fn running_loop_ticks_on_its_interval() {
        let config = Config {
            scheduler_tick_secs: 1,
            ..Config::default()
        };
        let h = harness(config);
        h.store.push_strategy(Strategy::sample(1, conn(1), "BTCUSDT"));
        h.evaluator.script(1, ScriptedOutcome::Act(SignalAction::Buy));

        h.scheduler.start();
        // The first interval tick fires immediately
        tokio::time::sleep(Duration::from_millis(300)).await;
        h.scheduler.stop();

        assert!(h.scheduler.metrics().ticks >= 1);
        assert!(!h.store.recorded_trades().is_empty());
    }

    #[tokio::test]
    async fn empty_strategy_list_is_a_quiet_tick() {
        let h = harness(Config::default());
        let report = h.scheduler.tick().await.unwrap();
        assert_eq!(report, TickReport::default());
        assert_eq!(h.scheduler.metrics().ticks, 1);
    }

    #[tokio::test]
    async fn restart_within_one_interval_runs_a_single_loop() {
        let config = Config {
            scheduler_tick_secs: 1,
            ..Config::default()
        };
        let h = harness(config);
        h.store.push_strategy(Strategy::sample(1, conn(1), "BTCUSDT"));

        h.scheduler.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.scheduler.stop();
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.scheduler.start();
        tokio::time::sleep(Duration::from_millis(3100)).await;
        h.scheduler.stop();

        // One immediate tick per start plus one per elapsed second puts a
        // single loop at five ticks, six with scheduling slack; a loop
        // surviving the restart doubles the per-second rate to around eight
        let ticks = h.scheduler.metrics().ticks;
        assert!(ticks >= 3, "scheduler stalled after restart: {} ticks", ticks);
        assert!(
            ticks <= 6,
            "more than one tick loop ran after restart: {} ticks",
            ticks
        );
    }

    #[tokio::test]
    async fn zero_free_balance_blocks_the_order() {
        let h = harness(Config::default());
        h.store.push_strategy(Strategy::sample(1, conn(1), "BTCUSDT"));
        h.evaluator.script(1, ScriptedOutcome::Act(SignalAction::Buy));
        let client = Arc::new(
            MockExchangeClient::new("binance")
                .with_balances(vec![AssetBalance::new("USDT", 0.0, 0.0)]),
        );
        h.factory.register(conn(1), client.clone());

        // Settle a fresh snapshot proving the account cannot cover the entry
        h.cache
            .refresh_blocking(&conn(1), Duration::from_secs(5))
            .await
            .unwrap();

        let report = h.scheduler.tick().await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.signals_acted, 0);
        assert_eq!(report.failures, 0);
        assert_eq!(client.order_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert!(h.store.recorded_trades().is_empty());
    }

    #[tokio::test]
    async fn sell_orders_need_free_base_asset() {
        let h = harness(Config::default());
        h.store.push_strategy(Strategy::sample(1, conn(1), "BTCUSDT"));
        h.evaluator.script(1, ScriptedOutcome::Act(SignalAction::Sell));
        let client = Arc::new(
            MockExchangeClient::new("binance")
                .with_balances(vec![AssetBalance::new("USDT", 10_000.0, 0.0)]),
        );
        h.factory.register(conn(1), client.clone());

        // No BTC anywhere in the fresh snapshot, so the sell holds
        h.cache
            .refresh_blocking(&conn(1), Duration::from_secs(5))
            .await
            .unwrap();
        let report = h.scheduler.tick().await.unwrap();
        assert_eq!(report.signals_acted, 0);
        assert_eq!(client.order_calls.load(std::sync::atomic::Ordering::SeqCst), 0);

        // With base coverage the same signal trades
        client.set_balances(vec![
            AssetBalance::new("BTC", 5.0, 0.0),
            AssetBalance::new("USDT", 10_000.0, 0.0),
        ]);
        h.cache
            .refresh_blocking(&conn(1), Duration::from_secs(5))
            .await
            .unwrap();
        let report = h.scheduler.tick().await.unwrap();
        assert_eq!(report.signals_acted, 1);
        assert_eq!(h.store.recorded_trades().len(), 1);
    }

    #[tokio::test]
    async fn unsettled_snapshots_do_not_veto_orders() {
        let h = harness(Config::default());
        h.store.push_strategy(Strategy::sample(1, conn(1), "BTCUSDT"));
        h.evaluator.script(1, ScriptedOutcome::Act(SignalAction::Buy));
        let client = Arc::new(MockExchangeClient::new("binance"));
        h.factory.register(conn(1), client.clone());

        // Nothing cached yet: the pending placeholder must not block trading
        let report = h.scheduler.tick().await.unwrap();
        assert_eq!(report.signals_acted, 1);
        assert_eq!(client.order_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_trade_persistence_is_not_cut_off_by_the_budget() {
        let config = Config {
            strategy_timeout_secs: 1,
            ..Config::default()
        };
        let store = MemoryStrategyStore::new().with_trade_latency(Duration::from_millis(1500));
        let h = harness_with_store(config, store);
        h.store.push_strategy(Strategy::sample(1, conn(1), "BTCUSDT"));
        h.evaluator.script(1, ScriptedOutcome::Act(SignalAction::Buy));
        let client = Arc::new(MockExchangeClient::new("binance"));
        h.factory.register(conn(1), client.clone());

        let report = h.scheduler.tick().await.unwrap();
        assert_eq!(report.failures, 0);
        assert_eq!(report.signals_acted, 1);
        assert_eq!(client.order_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(h.store.recorded_trades().len(), 1);
    }

    #[test]
    fn symbols_split_on_their_quote_suffix() {
        assert_eq!(split_symbol("BTCUSDT"), Some(("BTC", "USDT")));
        assert_eq!(split_symbol("ETHBTC"), Some(("ETH", "BTC")));
        assert_eq!(split_symbol("BNBFDUSD"), Some(("BNB", "FDUSD")));
        assert_eq!(split_symbol("USDT"), None);
        assert_eq!(split_symbol("WEIRD"), None);
    }
}
