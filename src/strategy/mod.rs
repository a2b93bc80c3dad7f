// src/strategy/mod.rs
//! Strategy entities, the persistence and evaluation seams, and a minimal
//! threshold evaluator so the pipeline works end-to-end.

use crate::error::{ExchangeError, Result};
use crate::exchange::{OrderReceipt, OrderSide, PriceTick};
use crate::utils::ConnectionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One configured trading strategy. Owned by the persistence layer; the
/// scheduler reads it and never mutates it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Strategy {
    pub id: i64,
    pub connection: ConnectionId,
    pub symbol: String,
    pub active: bool,
    /// Indicator parameters, opaque to the scheduler
    pub params: serde_json::Value,
    pub entry_amount: f64,
    pub leverage: u32,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
}

impl Strategy {
    /// Quick builder with sane defaults; tests and the paper demo use it.
    pub fn sample(id: i64, connection: ConnectionId, symbol: impl Into<String>) -> Self {
        Self {
            id,
            connection,
            symbol: symbol.into(),
            active: true,
            params: serde_json::json!({}),
            entry_amount: 100.0,
            leverage: 1,
            stop_loss_pct: 5.0,
            take_profit_pct: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

impl SignalAction {
    pub fn to_order_side(self) -> Option<OrderSide> {
        match self {
            SignalAction::Buy => Some(OrderSide::Buy),
            SignalAction::Sell => Some(OrderSide::Sell),
            SignalAction::Hold => None,
        }
    }
}

/// Transient evaluation result, one per strategy per tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub action: SignalAction,
    pub price: f64,
    pub reason: String,
}

/// Persisted side effect of an executed signal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeRecord {
    pub id: String,
    pub strategy_id: i64,
    pub connection: ConnectionId,
    pub symbol: String,
    pub side: OrderSide,
    pub amount: f64,
    pub price: f64,
    pub order_id: String,
    pub executed_at: DateTime<Utc>,
}

impl TradeRecord {
    pub fn from_receipt(strategy: &Strategy, receipt: &OrderReceipt) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            strategy_id: strategy.id,
            connection: strategy.connection.clone(),
            symbol: receipt.symbol.clone(),
            side: receipt.side,
            amount: receipt.filled_qty,
            price: receipt.fill_price,
            order_id: receipt.order_id.clone(),
            executed_at: Utc::now(),
        }
    }
}

/// Persistence seam for strategies and their trades.
#[async_trait::async_trait]
pub trait StrategyStore: Send + Sync {
    async fn list_active(&self) -> Result<Vec<Strategy>>;
    async fn record_trade(&self, trade: TradeRecord) -> Result<()>;
}

/// Turns a strategy plus current market data into a signal.
///
/// Pure over its inputs; indicator state, if any, lives behind the
/// implementation.
pub trait SignalEvaluator: Send + Sync {
    fn evaluate(&self, strategy: &Strategy, tick: &PriceTick) -> Result<Signal>;
}

/// Buys below a configured price, sells above another one.
///
/// Reads `{"buy_below": x, "sell_above": y}` from the strategy params;
/// anything missing or malformed degrades to Hold rather than failing the
/// whole tick.
pub struct ThresholdEvaluator;

impl ThresholdEvaluator {
    fn threshold(strategy: &Strategy, key: &str) -> Option<f64> {
        strategy.params.get(key).and_then(|v| v.as_f64())
    }
}

impl SignalEvaluator for ThresholdEvaluator {
    fn evaluate(&self, strategy: &Strategy, tick: &PriceTick) -> Result<Signal> {
        let buy_below = Self::threshold(strategy, "buy_below");
        let sell_above = Self::threshold(strategy, "sell_above");

        if buy_below.is_none() && sell_above.is_none() {
            return Ok(Signal {
                action: SignalAction::Hold,
                price: tick.price,
                reason: "no thresholds configured".to_string(),
            });
        }

        if let Some(threshold) = buy_below {
            if tick.price < threshold {
                return Ok(Signal {
                    action: SignalAction::Buy,
                    price: tick.price,
                    reason: format!("price {} below buy threshold {}", tick.price, threshold),
                });
            }
        }
        if let Some(threshold) = sell_above {
            if tick.price > threshold {
                return Ok(Signal {
                    action: SignalAction::Sell,
                    price: tick.price,
                    reason: format!("price {} above sell threshold {}", tick.price, threshold),
                });
            }
        }

        Ok(Signal {
            action: SignalAction::Hold,
            price: tick.price,
            reason: "price within thresholds".to_string(),
        })
    }
}

/// Sizes an order from the strategy's entry amount (quote currency) and the
/// signalled price.
pub fn order_quantity(strategy: &Strategy, price: f64) -> Result<f64> {
    if price <= 0.0 {
        return Err(ExchangeError::Order(format!(
            "cannot size order at non-positive price {}",
            price
        )));
    }
    Ok(strategy.entry_amount * strategy.leverage as f64 / price)
}
