// src/exchange/rest.rs
//! Reference REST implementation of [`ExchangeClient`], wire-compatible with
//! Binance-style spot APIs (signed query strings, `X-MBX-APIKEY` header).

use crate::config::settings::Config;
use crate::error::{ExchangeError, Result};
use crate::exchange::{
    AssetBalance, Credentials, ExchangeClient, ExchangeClientFactory, OrderReceipt, OrderRequest,
    PriceTick,
};
use crate::utils::ConnectionId;
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use log::debug;
use once_cell::sync::Lazy;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

type HmacSha256 = Hmac<Sha256>;

/// Default REST endpoints per (exchange, testnet) pair. Overridable through
/// `Config::exchange_base_url_override` for self-hosted gateways and tests.
static DEFAULT_ENDPOINTS: Lazy<HashMap<(&'static str, bool), &'static str>> = Lazy::new(|| {
    HashMap::from([
        (("binance", false), "https://api.binance.com"),
        (("binance", true), "https://testnet.binance.vision"),
    ])
});

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[allow(dead_code)]
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    balances: Vec<RawBalance>,
}

// Amounts arrive as decimal strings on the wire
#[derive(Debug, Deserialize)]
struct RawBalance {
    asset: String,
    free: String,
    locked: String,
}

#[derive(Debug, Deserialize)]
struct TickerResponse {
    symbol: String,
    price: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: u64,
    client_order_id: String,
    status: String,
    executed_qty: String,
    cummulative_quote_qty: String,
}

fn parse_amount(raw: &str, field: &str) -> Result<f64> {
    raw.parse::<f64>()
        .map_err(|e| ExchangeError::Parse(format!("bad decimal in '{}': {} ({})", field, raw, e)))
}

/// Authenticated REST client for one exchange account.
#[derive(Debug)]
pub struct RestExchangeClient {
    exchange: String,
    base_url: Url,
    api_key: String,
    api_secret: String,
    recv_window_ms: u64,
    http: reqwest::Client,
}

impl RestExchangeClient {
    pub fn new(
        exchange: &str,
        base_url: Url,
        credentials: &Credentials,
        timeout_secs: u64,
        recv_window_ms: u64,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            exchange: exchange.to_string(),
            base_url,
            api_key: credentials.api_key.clone(),
            api_secret: credentials.api_secret.clone(),
            recv_window_ms,
            http,
        })
    }

    /// HMAC-SHA256 over the raw query string, hex encoded.
    fn sign(&self, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Appends timestamp and recvWindow, then the signature parameter.
    fn signed_query(&self, params: &[(&str, String)]) -> String {
        let mut query: Vec<String> = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        query.push(format!("recvWindow={}", self.recv_window_ms));
        query.push(format!("timestamp={}", Utc::now().timestamp_millis()));
        let query = query.join("&");
        let signature = self.sign(&query);
        format!("{}&signature={}", query, signature)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    /// Maps non-success HTTP answers onto the typed error surface.
    async fn map_error_status(resp: reqwest::Response) -> ExchangeError {
        let status = resp.status().as_u16();
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|b| b.msg)
            .unwrap_or(body);
        match status {
            401 | 403 => ExchangeError::Auth(message),
            418 | 429 => ExchangeError::RateLimit {
                retry_after_secs: retry_after,
            },
            _ => ExchangeError::Api { status, message },
        }
    }
}

#[async_trait]
impl ExchangeClient for RestExchangeClient {
    fn exchange_name(&self) -> &str {
        &self.exchange
    }

    async fn fetch_balance(&self) -> Result<Vec<AssetBalance>> {
        let url = self.endpoint("api/v3/account")?;
        let full = format!("{}?{}", url, self.signed_query(&[]));
        debug!("GET {}/api/v3/account", self.base_url);

        let resp = self
            .http
            .get(&full)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::map_error_status(resp).await);
        }

        let account: AccountResponse = resp.json().await?;
        let mut balances = Vec::new();
        for raw in account.balances {
            let free = parse_amount(&raw.free, "free")?;
            let locked = parse_amount(&raw.locked, "locked")?;
            // The account endpoint lists every asset; keep the funded rows
            if free > 0.0 || locked > 0.0 {
                balances.push(AssetBalance::new(raw.asset, free, locked));
            }
        }
        Ok(balances)
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<PriceTick> {
        let url = self.endpoint("api/v3/ticker/price")?;
        let resp = self.http.get(url).query(&[("symbol", symbol)]).send().await?;
        if !resp.status().is_success() {
            return Err(Self::map_error_status(resp).await);
        }
        let ticker: TickerResponse = resp.json().await?;
        Ok(PriceTick::new(
            ticker.symbol,
            parse_amount(&ticker.price, "price")?,
        ))
    }

    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderReceipt> {
        let mut params: Vec<(&str, String)> = vec![
            ("symbol", request.symbol.clone()),
            ("side", request.side.to_string()),
            ("quantity", request.quantity.to_string()),
            ("newClientOrderId", request.client_order_id.clone()),
        ];
        match request.price {
            Some(price) => {
                params.push(("type", "LIMIT".to_string()));
                params.push(("timeInForce", "GTC".to_string()));
                params.push(("price", price.to_string()));
            }
            None => params.push(("type", "MARKET".to_string())),
        }

        let url = self.endpoint("api/v3/order")?;
        let full = format!("{}?{}", url, self.signed_query(&params));
        debug!(
            "POST {}/api/v3/order {} {} qty {}",
            self.base_url, request.side, request.symbol, request.quantity
        );

        let resp = self
            .http
            .post(&full)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::map_error_status(resp).await);
        }

        let order: OrderResponse = resp.json().await?;
        let executed = parse_amount(&order.executed_qty, "executedQty")?;
        let quote = parse_amount(&order.cummulative_quote_qty, "cummulativeQuoteQty")?;
        let fill_price = if executed > 0.0 { quote / executed } else { 0.0 };
        Ok(OrderReceipt {
            order_id: order.order_id.to_string(),
            client_order_id: order.client_order_id,
            symbol: request.symbol.clone(),
            side: request.side,
            filled_qty: executed,
            fill_price,
            status: order.status,
        })
    }
}

/// Production factory: resolves the REST endpoint for an identity and wires
/// credentials plus HTTP timeouts from the application config.
pub struct RestClientFactory {
    config: Arc<Config>,
}

impl RestClientFactory {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    fn resolve_base_url(&self, id: &ConnectionId) -> Result<Url> {
        let raw = match &self.config.exchange_base_url_override {
            Some(override_url) => override_url.clone(),
            None => DEFAULT_ENDPOINTS
                .get(&(id.exchange.as_str(), id.testnet))
                .map(|s| s.to_string())
                .ok_or_else(|| {
                    ExchangeError::UnsupportedExchange(format!(
                        "{} ({})",
                        id.exchange,
                        id.network_label()
                    ))
                })?,
        };
        Ok(Url::parse(&raw)?)
    }
}

impl ExchangeClientFactory for RestClientFactory {
    fn create(
        &self,
        id: &ConnectionId,
        credentials: &Credentials,
    ) -> Result<Arc<dyn ExchangeClient>> {
        credentials.validate()?;
        let base_url = self.resolve_base_url(id)?;
        let client = RestExchangeClient::new(
            &id.exchange,
            base_url,
            credentials,
            self.config.exchange_request_timeout_secs,
            self.config.exchange_recv_window_ms,
        )?;
        Ok(Arc::new(client))
    }
}
