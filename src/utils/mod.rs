// src/utils/mod.rs
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one logical exchange connection.
///
/// Two identities are equal iff user, exchange name and network mode all
/// match; this is the key used by the registry, the balance cache and the
/// scheduler alike.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId {
    pub user_id: i64,
    pub exchange: String,
    pub testnet: bool,
}

impl ConnectionId {
    pub fn new(user_id: i64, exchange: impl Into<String>, testnet: bool) -> Self {
        Self {
            user_id,
            exchange: exchange.into(),
            testnet,
        }
    }

    pub fn network_label(&self) -> &'static str {
        if self.testnet {
            "testnet"
        } else {
            "live"
        }
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.user_id,
            self.exchange,
            self.network_label()
        )
    }
}

pub fn setup_logging() -> Result<(), fern::InitError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}] {}",
                record.level(),
                record.target(),
                message
            ))
        })
        .level(log::LevelFilter::Info)
        .level_for("hyper", log::LevelFilter::Warn)
        .level_for("reqwest", log::LevelFilter::Warn)
        .chain(std::io::stdout())
        .apply()?;
    info!("Logging initialized.");
    Ok(())
}
