// src/main.rs
use async_trait::async_trait;
use clap::Parser;
use exchange_gateway::config::settings::Config;
use exchange_gateway::error::{ExchangeError, Result};
use exchange_gateway::exchange::rest::RestClientFactory;
use exchange_gateway::exchange::{CredentialStore, Credentials};
use exchange_gateway::gateway::ExchangeGateway;
use exchange_gateway::strategy::{Strategy, StrategyStore, ThresholdEvaluator, TradeRecord};
use exchange_gateway::utils::{setup_logging, ConnectionId};
use log::{info, warn};
use std::env;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "exchange-gateway")]
#[command(about = "Exchange connection, balance cache and strategy loop service", long_about = None)]
struct Args {
    /// Paper trading mode: signals are recorded, no orders leave the process
    #[arg(long)]
    paper: bool,

    /// Override the strategy tick interval in seconds
    #[arg(long)]
    tick_secs: Option<u64>,

    /// Run exactly one strategy tick and exit
    #[arg(long)]
    once: bool,
}

/// Serves API keys from the environment, per exchange.
///
/// `BINANCE_API_KEY`/`BINANCE_API_SECRET` win over the generic
/// `EXCHANGE_API_KEY`/`EXCHANGE_API_SECRET` pair.
struct EnvCredentialStore;

#[async_trait]
impl CredentialStore for EnvCredentialStore {
    async fn get(&self, id: &ConnectionId) -> Result<Credentials> {
        let prefix = id.exchange.to_uppercase();
        let key = env::var(format!("{}_API_KEY", prefix))
            .or_else(|_| env::var("EXCHANGE_API_KEY"))
            .map_err(|_| {
                ExchangeError::Credential(format!("no API key configured for {}", id))
            })?;
        let secret = env::var(format!("{}_API_SECRET", prefix))
            .or_else(|_| env::var("EXCHANGE_API_SECRET"))
            .map_err(|_| {
                ExchangeError::Credential(format!("no API secret configured for {}", id))
            })?;
        let credentials = Credentials::new(key, secret);
        credentials.validate()?;
        Ok(credentials)
    }
}

/// Environment-defined strategy list for a standalone deployment; a real
/// installation plugs a persistence-backed store in here instead.
struct EnvStrategyStore {
    strategies: Vec<Strategy>,
}

impl EnvStrategyStore {
    fn from_env() -> Self {
        let symbol = match env::var("STRATEGY_SYMBOL") {
            Ok(symbol) => symbol,
            Err(_) => {
                warn!("⚠️ STRATEGY_SYMBOL not set; the scheduler will idle");
                return Self {
                    strategies: Vec::new(),
                };
            }
        };

        let exchange = env::var("EXCHANGE_NAME").unwrap_or_else(|_| "binance".to_string());
        let testnet = env::var("EXCHANGE_TESTNET")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(true);
        let user_id = env::var("USER_ID")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);

        let mut strategy =
            Strategy::sample(1, ConnectionId::new(user_id, exchange, testnet), symbol);
        if let Ok(raw) = env::var("STRATEGY_ENTRY_AMOUNT") {
            strategy.entry_amount = raw.parse().unwrap_or(strategy.entry_amount);
        }
        let mut params = serde_json::Map::new();
        if let Ok(raw) = env::var("STRATEGY_BUY_BELOW") {
            if let Ok(threshold) = raw.parse::<f64>() {
                params.insert("buy_below".to_string(), threshold.into());
            }
        }
        if let Ok(raw) = env::var("STRATEGY_SELL_ABOVE") {
            if let Ok(threshold) = raw.parse::<f64>() {
                params.insert("sell_above".to_string(), threshold.into());
            }
        }
        strategy.params = serde_json::Value::Object(params);

        info!(
            "📋 Loaded strategy {} on {} from environment",
            strategy.symbol, strategy.connection
        );
        Self {
            strategies: vec![strategy],
        }
    }

    fn connections(&self) -> Vec<ConnectionId> {
        self.strategies.iter().map(|s| s.connection.clone()).collect()
    }
}

#[async_trait]
impl StrategyStore for EnvStrategyStore {
    async fn list_active(&self) -> Result<Vec<Strategy>> {
        Ok(self
            .strategies
            .iter()
            .filter(|s| s.active)
            .cloned()
            .collect())
    }

    async fn record_trade(&self, trade: TradeRecord) -> Result<()> {
        info!(
            "💰 Trade recorded: {} {} {} @ {} (strategy {}, order {})",
            trade.side, trade.amount, trade.symbol, trade.price, trade.strategy_id, trade.order_id
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    setup_logging().expect("Failed to initialize logging");
    info!("🚀 Exchange gateway starting...");

    dotenv::dotenv().ok();
    let mut config = Config::from_env();
    if args.paper {
        config.paper_trading = true;
    }
    if let Some(tick_secs) = args.tick_secs {
        config.scheduler_tick_secs = tick_secs;
    }
    config.validate()?;
    config.log_settings();
    let config = Arc::new(config);

    let strategies = Arc::new(EnvStrategyStore::from_env());
    let known_connections = strategies.connections();

    let gateway = ExchangeGateway::new(
        Arc::new(RestClientFactory::new(config.clone())),
        Arc::new(EnvCredentialStore),
        strategies,
        Arc::new(ThresholdEvaluator),
        config.clone(),
    );

    if args.once {
        let report = gateway.trigger_tick().await?;
        info!("⏱️ Single tick finished: {:?}", report);
        return Ok(());
    }

    // Warm the balance cache so the first tick starts with fresh data
    if !known_connections.is_empty() {
        info!(
            "🗄️ Warming balance cache for {} connection(s)...",
            known_connections.len()
        );
        for snapshot in gateway.refresh_balances(&known_connections, None).await {
            match &snapshot.warning {
                Some(warning) => warn!(
                    "⚠️ Balance warm-up for {}: {:?} ({})",
                    snapshot.connection, snapshot.source, warning
                ),
                None => info!(
                    "✅ Balances ready for {} ({} assets)",
                    snapshot.connection,
                    snapshot.balances.len()
                ),
            }
        }
    }

    gateway.start();

    // Periodic operational status line
    let status_gateway = gateway.clone();
    let status_interval_secs = config.status_log_interval_secs;
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(status_interval_secs));
        loop {
            interval.tick().await;
            info!("{}", status_gateway.status().summary());
        }
    });

    info!("✅ Exchange gateway is running. Press CTRL-C to exit.");
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl-c");

    info!("🛑 Shutting down gracefully...");
    gateway.stop();
    info!("✅ Exchange gateway stopped");

    Ok(())
}
