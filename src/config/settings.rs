use std::env;

/// What the balance cache serves when the upstream exchange is unreachable
/// and nothing usable is cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackMode {
    /// Honest placeholders: "pending" rows and failed snapshots
    Pending,
    /// Fabricated plausible balances, always labelled as simulated
    Simulated,
}

impl FallbackMode {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "simulated" | "simulate" | "mock" => FallbackMode::Simulated,
            _ => FallbackMode::Pending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Seconds a balance snapshot stays Fresh
    pub balance_cache_ttl_secs: u64,
    /// Consecutive standard failures before a connection degrades
    pub max_consecutive_failures: u32,
    /// Scheduler tick interval
    pub scheduler_tick_secs: u64,
    /// Upper bound for any single upstream exchange call
    pub exchange_request_timeout_secs: u64,
    /// Default bound a blocking refresh caller waits for a result
    pub refresh_wait_timeout_secs: u64,
    /// Bound for processing one strategy within a tick
    pub strategy_timeout_secs: u64,
    pub exchange_recv_window_ms: u64,
    /// Routes all REST clients to one endpoint (self-hosted gateways, tests)
    pub exchange_base_url_override: Option<String>,
    pub fallback_mode: FallbackMode,
    pub paper_trading: bool,
    pub status_log_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            balance_cache_ttl_secs: 300,
            max_consecutive_failures: 3,
            scheduler_tick_secs: 30,
            exchange_request_timeout_secs: 15,
            refresh_wait_timeout_secs: 20,
            strategy_timeout_secs: 20,
            exchange_recv_window_ms: 5000,
            exchange_base_url_override: None,
            fallback_mode: FallbackMode::Pending,
            paper_trading: false,
            status_log_interval_secs: 60,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            balance_cache_ttl_secs: env::var("BALANCE_CACHE_TTL_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .unwrap_or(300),
            max_consecutive_failures: env::var("MAX_CONSECUTIVE_FAILURES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .unwrap_or(3),
            scheduler_tick_secs: env::var("SCHEDULER_TICK_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(30),
            exchange_request_timeout_secs: env::var("EXCHANGE_REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|_| "15".to_string())
                .parse()
                .unwrap_or(15),
            refresh_wait_timeout_secs: env::var("REFRESH_WAIT_TIMEOUT_SECS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .unwrap_or(20),
            strategy_timeout_secs: env::var("STRATEGY_TIMEOUT_SECS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .unwrap_or(20),
            exchange_recv_window_ms: env::var("EXCHANGE_RECV_WINDOW_MS")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .unwrap_or(5000),
            exchange_base_url_override: env::var("EXCHANGE_BASE_URL_OVERRIDE").ok(),
            fallback_mode: FallbackMode::parse(
                &env::var("FALLBACK_MODE").unwrap_or_else(|_| "pending".to_string()),
            ),
            paper_trading: env::var("PAPER_TRADING")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            status_log_interval_secs: env::var("STATUS_LOG_INTERVAL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .unwrap_or(60),
        }
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        if self.balance_cache_ttl_secs == 0 {
            return Err(crate::error::ExchangeError::Config(
                "BALANCE_CACHE_TTL_SECS must be positive".to_string(),
            ));
        }
        if self.max_consecutive_failures == 0 {
            return Err(crate::error::ExchangeError::Config(
                "MAX_CONSECUTIVE_FAILURES must be positive".to_string(),
            ));
        }
        if self.scheduler_tick_secs == 0 {
            return Err(crate::error::ExchangeError::Config(
                "SCHEDULER_TICK_SECS must be positive".to_string(),
            ));
        }
        if self.exchange_request_timeout_secs == 0 {
            return Err(crate::error::ExchangeError::Config(
                "EXCHANGE_REQUEST_TIMEOUT_SECS must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn log_settings(&self) {
        log::info!("Application Configuration Loaded: {:?}", self);
        if self.fallback_mode == FallbackMode::Simulated {
            log::warn!(
                "FALLBACK_MODE=simulated: fabricated balances will be served (labelled) on upstream failure"
            );
        }
    }
}
