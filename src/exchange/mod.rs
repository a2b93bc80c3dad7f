// src/exchange/mod.rs

pub mod rest;

use crate::error::{ExchangeError, Result};
use crate::utils::ConnectionId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Decrypted API credentials for one exchange account.
///
/// Deliberately not serializable; secrets only ever live in memory here.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
    pub passphrase: Option<String>,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            passphrase: None,
        }
    }

    /// Rejects credentials that cannot possibly authenticate.
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(ExchangeError::Credential("API key is empty".to_string()));
        }
        if self.api_secret.trim().is_empty() {
            return Err(ExchangeError::Credential("API secret is empty".to_string()));
        }
        Ok(())
    }
}

/// One asset row of an account balance snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AssetBalance {
    pub currency: String,
    pub free: f64,
    pub used: f64,
    pub total: f64,
}

impl AssetBalance {
    pub fn new(currency: impl Into<String>, free: f64, used: f64) -> Self {
        Self {
            currency: currency.into(),
            free,
            used,
            total: free + used,
        }
    }

    /// Placeholder row served while no real data exists for a connection yet.
    pub fn pending() -> Self {
        Self {
            currency: "pending".to_string(),
            free: 0.0,
            used: 0.0,
            total: 0.0,
        }
    }
}

/// Last-price view of one trading symbol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceTick {
    pub symbol: String,
    pub price: f64,
    pub fetched_at: DateTime<Utc>,
}

impl PriceTick {
    pub fn new(symbol: impl Into<String>, price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            fetched_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Parameters of one order submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    /// None places a market order
    pub price: Option<f64>,
    pub client_order_id: String,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            price: None,
            client_order_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// The exchange's answer to a submitted order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderReceipt {
    pub order_id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub filled_qty: f64,
    pub fill_price: f64,
    pub status: String,
}

/// Capability handle for one authenticated exchange connection.
///
/// Implementations wrap a concrete wire protocol (REST, mock, ...); callers
/// never see anything below this trait.
#[async_trait]
pub trait ExchangeClient: Send + Sync + fmt::Debug {
    /// Name of the exchange this client talks to (e.g. "binance").
    fn exchange_name(&self) -> &str;

    /// Account balances, one row per currency the account holds.
    async fn fetch_balance(&self) -> Result<Vec<AssetBalance>>;

    /// Last traded price for one symbol.
    async fn fetch_ticker(&self, symbol: &str) -> Result<PriceTick>;

    /// Places an order and returns the exchange's receipt.
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderReceipt>;
}

/// Builds a client handle for an identity from decrypted credentials.
pub trait ExchangeClientFactory: Send + Sync {
    fn create(
        &self,
        id: &ConnectionId,
        credentials: &Credentials,
    ) -> Result<Arc<dyn ExchangeClient>>;
}

/// Hands out decrypted API credentials for an identity.
///
/// Encryption at rest and the backing store live behind this boundary.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, id: &ConnectionId) -> Result<Credentials>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn pending_placeholder_is_all_zero() {
        let row = AssetBalance::pending();
        assert_eq!(row.currency, "pending");
        assert_eq!(row.free, 0.0);
        assert_eq!(row.used, 0.0);
        assert_eq!(row.total, 0.0);
    }

    #[test]
    fn asset_balance_totals_free_plus_used() {
        let row = AssetBalance::new("BTC", 0.5, 0.25);
        assert_eq!(row.total, 0.75);
    }

    #[test]
    fn empty_credentials_fail_validation() {
        let creds = Credentials::new("", "secret");
        assert!(matches!(
            creds.validate(),
            Err(ExchangeError::Credential(_))
        ));
        let creds = Credentials::new("key", "   ");
        assert!(creds.validate().is_err());
        let creds = Credentials::new("key", "secret");
        assert!(creds.validate().is_ok());
    }

    #[test]
    fn order_side_renders_exchange_style() {
        assert_eq!(OrderSide::Buy.to_string(), "BUY");
        assert_eq!(OrderSide::Sell.to_string(), "SELL");
    }

    #[test]
    fn market_orders_carry_a_client_order_id() {
        let req = OrderRequest::market("BTCUSDT", OrderSide::Buy, 0.01);
        assert!(req.price.is_none());
        assert!(!req.client_order_id.is_empty());
    }
}
