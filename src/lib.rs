pub mod cache;
pub mod config;
pub mod error;
pub mod exchange;
pub mod gateway;
pub mod registry;
pub mod scheduler;
pub mod strategy;
pub mod testing; // Testing infrastructure
pub mod utils;

// Re-export the service surface for binaries and embedding crates
pub use cache::{BalanceCache, BalanceSnapshot, BalanceSource};
pub use config::{load_config, Config, FallbackMode};
pub use error::{ErrorKind, ExchangeError, Result};
pub use gateway::{ExchangeGateway, GatewayStatus};
pub use registry::{ConnectionHealth, ConnectionRegistry};
pub use scheduler::{StrategyScheduler, TickReport};
pub use utils::ConnectionId;
