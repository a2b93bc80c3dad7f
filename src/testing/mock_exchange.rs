//! Mock exchange environment.
//!
//! Scripted outcomes per call, invocation counters and configurable latency
//! so coalescing, timeout and degradation behavior can be exercised without
//! a live exchange.

use crate::error::{ExchangeError, Result};
use crate::exchange::{
    AssetBalance, CredentialStore, Credentials, ExchangeClient, ExchangeClientFactory,
    OrderReceipt, OrderRequest, PriceTick,
};
use crate::strategy::{Signal, SignalAction, SignalEvaluator, Strategy, StrategyStore, TradeRecord};
use crate::utils::ConnectionId;
use async_trait::async_trait;
use dashmap::DashMap;
use rand::{thread_rng, Rng};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

/// Scripted [`ExchangeClient`] with per-call invocation counters.
///
/// Errors queued via [`push_error`](Self::push_error) are consumed one per
/// upstream call, in order; once the queue is empty calls succeed with the
/// configured balances and price.
#[derive(Debug)]
pub struct MockExchangeClient {
    name: String,
    latency: Duration,
    price_jitter_pct: f64,
    balances: Mutex<Vec<AssetBalance>>,
    ticker_price: Mutex<f64>,
    scripted_errors: Mutex<VecDeque<ExchangeError>>,
    pub balance_calls: AtomicU64,
    pub ticker_calls: AtomicU64,
    pub order_calls: AtomicU64,
}

impl MockExchangeClient {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            latency: Duration::from_millis(0),
            price_jitter_pct: 0.0,
            balances: Mutex::new(vec![AssetBalance::new("USDT", 10_000.0, 0.0)]),
            ticker_price: Mutex::new(100.0),
            scripted_errors: Mutex::new(VecDeque::new()),
            balance_calls: AtomicU64::new(0),
            ticker_calls: AtomicU64::new(0),
            order_calls: AtomicU64::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_balances(self, balances: Vec<AssetBalance>) -> Self {
        *self.balances.lock().unwrap() = balances;
        self
    }

    pub fn with_price(self, price: f64) -> Self {
        *self.ticker_price.lock().unwrap() = price;
        self
    }

    /// Adds a random walk of up to +/- `pct` percent to every ticker answer.
    pub fn with_price_jitter(mut self, pct: f64) -> Self {
        self.price_jitter_pct = pct;
        self
    }

    /// Queues an error consumed by the next upstream call.
    pub fn push_error(&self, error: ExchangeError) {
        self.scripted_errors.lock().unwrap().push_back(error);
    }

    /// Queues `n` copies of the same error.
    pub fn fail_next(&self, error: ExchangeError, n: usize) {
        let mut queue = self.scripted_errors.lock().unwrap();
        for _ in 0..n {
            queue.push_back(error.clone());
        }
    }

    pub fn set_balances(&self, balances: Vec<AssetBalance>) {
        *self.balances.lock().unwrap() = balances;
    }

    pub fn set_price(&self, price: f64) {
        *self.ticker_price.lock().unwrap() = price;
    }

    pub fn total_calls(&self) -> u64 {
        self.balance_calls.load(Ordering::SeqCst)
            + self.ticker_calls.load(Ordering::SeqCst)
            + self.order_calls.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
    }

    fn next_scripted_error(&self) -> Option<ExchangeError> {
        self.scripted_errors.lock().unwrap().pop_front()
    }

    fn current_price(&self) -> f64 {
        let base = *self.ticker_price.lock().unwrap();
        if self.price_jitter_pct > 0.0 {
            let factor = thread_rng().gen_range(-self.price_jitter_pct..self.price_jitter_pct);
            base * (1.0 + factor / 100.0)
        } else {
            base
        }
    }
}

#[async_trait]
impl ExchangeClient for MockExchangeClient {
    fn exchange_name(&self) -> &str {
        &self.name
    }

    async fn fetch_balance(&self) -> Result<Vec<AssetBalance>> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        if let Some(err) = self.next_scripted_error() {
            return Err(err);
        }
        Ok(self.balances.lock().unwrap().clone())
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<PriceTick> {
        self.ticker_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        if let Some(err) = self.next_scripted_error() {
            return Err(err);
        }
        Ok(PriceTick::new(symbol, self.current_price()))
    }

    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderReceipt> {
        self.order_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        if let Some(err) = self.next_scripted_error() {
            return Err(err);
        }
        let fill_price = request.price.unwrap_or_else(|| self.current_price());
        Ok(OrderReceipt {
            order_id: uuid::Uuid::new_v4().to_string(),
            client_order_id: request.client_order_id.clone(),
            symbol: request.symbol.clone(),
            side: request.side,
            filled_qty: request.quantity,
            fill_price,
            status: "FILLED".to_string(),
        })
    }
}

/// Factory handing out pre-registered mock clients, one per identity.
///
/// Identities without a registered client get a default mock on first use,
/// so simple tests need no setup.
pub struct MockClientFactory {
    clients: DashMap<ConnectionId, Arc<MockExchangeClient>>,
    pub create_calls: AtomicU64,
}

impl MockClientFactory {
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
            create_calls: AtomicU64::new(0),
        }
    }

    pub fn register(&self, id: ConnectionId, client: Arc<MockExchangeClient>) {
        self.clients.insert(id, client);
    }

    /// The mock behind an identity, for scripting and counter assertions.
    pub fn client_for(&self, id: &ConnectionId) -> Arc<MockExchangeClient> {
        self.clients
            .entry(id.clone())
            .or_insert_with(|| Arc::new(MockExchangeClient::new(id.exchange.clone())))
            .clone()
    }
}

impl Default for MockClientFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ExchangeClientFactory for MockClientFactory {
    fn create(
        &self,
        id: &ConnectionId,
        credentials: &Credentials,
    ) -> Result<Arc<dyn ExchangeClient>> {
        credentials.validate()?;
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.client_for(id))
    }
}

/// In-memory [`CredentialStore`].
pub struct MemoryCredentialStore {
    credentials: DashMap<ConnectionId, Credentials>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self {
            credentials: DashMap::new(),
        }
    }

    /// Store with the same credentials for every identity it is asked about.
    pub fn accepting_all() -> Self {
        let store = Self::new();
        store
            .credentials
            .insert(ConnectionId::new(0, "*", false), Credentials::new("k", "s"));
        store
    }

    pub fn insert(&self, id: ConnectionId, credentials: Credentials) {
        self.credentials.insert(id, credentials);
    }
}

impl Default for MemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, id: &ConnectionId) -> Result<Credentials> {
        if let Some(creds) = self.credentials.get(id) {
            return Ok(creds.clone());
        }
        // The wildcard row makes this store accept any identity
        if let Some(creds) = self.credentials.get(&ConnectionId::new(0, "*", false)) {
            return Ok(creds.clone());
        }
        Err(ExchangeError::Credential(format!(
            "no credentials stored for {}",
            id
        )))
    }
}

/// In-memory [`StrategyStore`] recording every trade it is handed.
pub struct MemoryStrategyStore {
    strategies: Mutex<Vec<Strategy>>,
    trades: Mutex<Vec<TradeRecord>>,
    trade_latency: Duration,
}

impl MemoryStrategyStore {
    pub fn new() -> Self {
        Self {
            strategies: Mutex::new(Vec::new()),
            trades: Mutex::new(Vec::new()),
            trade_latency: Duration::from_millis(0),
        }
    }

    /// Delays every `record_trade` by `latency`.
    pub fn with_trade_latency(mut self, latency: Duration) -> Self {
        self.trade_latency = latency;
        self
    }

    pub fn push_strategy(&self, strategy: Strategy) {
        self.strategies.lock().unwrap().push(strategy);
    }

    pub fn recorded_trades(&self) -> Vec<TradeRecord> {
        self.trades.lock().unwrap().clone()
    }
}

impl Default for MemoryStrategyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StrategyStore for MemoryStrategyStore {
    async fn list_active(&self) -> Result<Vec<Strategy>> {
        Ok(self
            .strategies
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.active)
            .cloned()
            .collect())
    }

    async fn record_trade(&self, trade: TradeRecord) -> Result<()> {
        if !self.trade_latency.is_zero() {
            sleep(self.trade_latency).await;
        }
        self.trades.lock().unwrap().push(trade);
        Ok(())
    }
}

/// Per-strategy scripted evaluator outcome.
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    Act(SignalAction),
    Fail(String),
}

/// [`SignalEvaluator`] answering from a per-strategy script; strategies
/// without a script hold.
pub struct ScriptedEvaluator {
    outcomes: DashMap<i64, ScriptedOutcome>,
}

impl ScriptedEvaluator {
    pub fn new() -> Self {
        Self {
            outcomes: DashMap::new(),
        }
    }

    pub fn script(&self, strategy_id: i64, outcome: ScriptedOutcome) {
        self.outcomes.insert(strategy_id, outcome);
    }
}

impl Default for ScriptedEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalEvaluator for ScriptedEvaluator {
    fn evaluate(&self, strategy: &Strategy, tick: &PriceTick) -> Result<Signal> {
        match self.outcomes.get(&strategy.id).map(|o| o.clone()) {
            Some(ScriptedOutcome::Act(action)) => Ok(Signal {
                action,
                price: tick.price,
                reason: "scripted".to_string(),
            }),
            Some(ScriptedOutcome::Fail(message)) => Err(ExchangeError::Internal(message)),
            None => Ok(Signal {
                action: SignalAction::Hold,
                price: tick.price,
                reason: "no script".to_string(),
            }),
        }
    }
}
