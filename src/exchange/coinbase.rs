//! Coinbase Exchange REST client
//!
//! Signed access to the Exchange API: order book snapshots, account
//! balances, limit orders, crypto withdrawals, and the ETH-USD reference
//! price used for gas-cost conversion.
//!
//! Request signing: base64(HMAC-SHA256(base64decode(secret),
//! timestamp + method + path + body)), sent via the CB-ACCESS-* headers.
//! The signed path must include the query string.

use crate::config::BotConfig;
use crate::execution::with_timeout;
use crate::types::{BookLevel, OrderBook};
use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::StatusCode;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

/// Poll interval while waiting for an order to settle.
const ORDER_POLL_MS: u64 = 500;

/// Attempts per request; transient failures back off and retry within the
/// same call, terminal ones surface immediately.
const MAX_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF_MS: u64 = 500;

/// Whether an HTTP status is worth retrying (rate limit or server-side).
fn transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Order side on the exchange book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

/// Terminal state of a settled order.
#[derive(Debug, Clone, Copy)]
pub struct OrderFill {
    pub filled_size: f64,
    pub executed_value: f64,
}

// ── Raw API payloads ─────────────────────────────────────────────────

/// Level-2 book: arrays of [price, size, num_orders].
#[derive(Deserialize)]
struct RawBook {
    bids: Vec<(Decimal, Decimal, serde_json::Value)>,
    asks: Vec<(Decimal, Decimal, serde_json::Value)>,
}

#[derive(Deserialize)]
struct RawTicker {
    bid: Decimal,
}

#[derive(Deserialize)]
struct RawAccount {
    currency: String,
    available: Decimal,
}

#[derive(Deserialize)]
struct RawOrder {
    id: String,
    status: String,
    settled: bool,
    #[serde(default)]
    filled_size: Decimal,
    #[serde(default)]
    executed_value: Decimal,
}

#[derive(Serialize)]
struct NewOrder<'a> {
    #[serde(rename = "type")]
    order_type: &'a str,
    side: &'a str,
    product_id: &'a str,
    price: String,
    size: String,
}

#[derive(Serialize)]
struct CryptoWithdrawal<'a> {
    amount: String,
    currency: &'a str,
    crypto_address: String,
}

#[derive(Deserialize)]
struct WithdrawalReceipt {
    id: String,
}

// ── Client ───────────────────────────────────────────────────────────

pub struct CoinbaseClient {
    api_url: String,
    api_key: String,
    api_secret: String,
    api_passphrase: String,
    product_id: String,
    client: reqwest::Client,
}

impl CoinbaseClient {
    pub fn new(config: &BotConfig) -> Self {
        Self {
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            api_passphrase: config.api_passphrase.clone(),
            product_id: config.product_id.clone(),
            client: reqwest::Client::new(),
        }
    }

    fn sign(&self, timestamp: &str, method: &str, path: &str, body: &str) -> Result<String> {
        let key = B64
            .decode(&self.api_secret)
            .context("API secret is not valid base64")?;
        let mut mac =
            HmacSha256::new_from_slice(&key).context("API secret has invalid length")?;
        mac.update(format!("{}{}{}{}", timestamp, method, path, body).as_bytes());
        Ok(B64.encode(mac.finalize().into_bytes()))
    }

    /// Signed request. `path` must include any query string (it is part of
    /// the signature preimage). Rate limits, server errors, and transport
    /// timeouts are retried with a short backoff; each attempt is re-signed
    /// so the timestamp stays fresh.
    async fn request<T: for<'de> Deserialize<'de>>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<String>,
    ) -> Result<T> {
        let body_str = body.unwrap_or_default();
        let url = format!("{}{}", self.api_url, path);
        let mut attempt = 1;

        loop {
            let timestamp = chrono::Utc::now().timestamp().to_string();
            let signature = self.sign(&timestamp, method.as_str(), path, &body_str)?;

            let mut req = self
                .client
                .request(method.clone(), &url)
                .header("CB-ACCESS-KEY", &self.api_key)
                .header("CB-ACCESS-SIGN", signature)
                .header("CB-ACCESS-TIMESTAMP", timestamp)
                .header("CB-ACCESS-PASSPHRASE", &self.api_passphrase)
                .header("User-Agent", "cexarb-bot/0.1")
                .header("Content-Type", "application/json");
            if !body_str.is_empty() {
                req = req.body(body_str.clone());
            }

            let outcome = req.send().await;
            let retriable = match &outcome {
                Ok(resp) => transient_status(resp.status()),
                Err(e) => e.is_timeout() || e.is_connect(),
            };
            if retriable && attempt < MAX_ATTEMPTS {
                warn!(
                    "Transient exchange error on {} (attempt {}/{}), retrying",
                    path, attempt, MAX_ATTEMPTS
                );
                tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS * attempt as u64))
                    .await;
                attempt += 1;
                continue;
            }

            let resp = outcome.context("Exchange request failed")?;
            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                bail!("Exchange API error {} on {}: {}", status, path, text);
            }

            return resp
                .json::<T>()
                .await
                .with_context(|| format!("Failed to decode exchange response from {}", path));
        }
    }

    /// Level-2 aggregated order book for the configured product.
    pub async fn get_order_book(&self) -> Result<OrderBook> {
        let path = format!("/products/{}/book?level=2", self.product_id);
        let raw: RawBook = self.request(reqwest::Method::GET, &path, None).await?;

        let convert = |levels: Vec<(Decimal, Decimal, serde_json::Value)>| {
            levels
                .into_iter()
                .filter_map(|(price, size, _)| {
                    Some(BookLevel {
                        price: price.to_f64()?,
                        size: size.to_f64()?,
                    })
                })
                .collect()
        };

        Ok(OrderBook {
            bids: convert(raw.bids),
            asks: convert(raw.asks),
        })
    }

    /// Current ETH price in USD (ETH-USD best bid). Used to convert gas
    /// costs into quote units.
    pub async fn get_eth_price(&self) -> Result<f64> {
        let raw: RawTicker = self
            .request(reqwest::Method::GET, "/products/ETH-USD/ticker", None)
            .await?;
        raw.bid
            .to_f64()
            .context("ETH-USD bid out of f64 range")
    }

    /// Available balance of one currency on the exchange.
    pub async fn get_balance(&self, currency: &str) -> Result<f64> {
        let accounts: Vec<RawAccount> =
            self.request(reqwest::Method::GET, "/accounts", None).await?;
        let balance = accounts
            .iter()
            .find(|a| a.currency == currency)
            .and_then(|a| a.available.to_f64())
            .unwrap_or(0.0);
        Ok(balance)
    }

    /// Place a limit order. For buys, `size` is the base amount purchased at
    /// `price`. Returns the order id.
    pub async fn create_limit_order(&self, side: Side, price: f64, size: f64) -> Result<String> {
        let order = NewOrder {
            order_type: "limit",
            side: side.as_str(),
            product_id: &self.product_id,
            price: format!("{:.6}", price),
            size: format!("{:.6}", size),
        };
        let body = serde_json::to_string(&order).context("Failed to encode order")?;
        let raw: RawOrder = self
            .request(reqwest::Method::POST, "/orders", Some(body))
            .await?;
        debug!(
            "Placed {} limit order {}: {} @ {}",
            side.as_str(),
            raw.id,
            size,
            price
        );
        Ok(raw.id)
    }

    pub async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let path = format!("/orders/{}", order_id);
        let _: serde_json::Value = self.request(reqwest::Method::DELETE, &path, None).await?;
        Ok(())
    }

    /// Poll until the order settles, or time out. A timed-out order is left
    /// open; the caller decides how to reconcile it.
    pub async fn wait_order_filled(&self, order_id: &str, timeout: Duration) -> Result<OrderFill> {
        let path = format!("/orders/{}", order_id);

        let poll = async {
            loop {
                let order: RawOrder = self.request(reqwest::Method::GET, &path, None).await?;
                if order.settled {
                    if order.status != "done" {
                        bail!("Order {} settled with status '{}'", order_id, order.status);
                    }
                    return Ok(OrderFill {
                        filled_size: order.filled_size.to_f64().unwrap_or(0.0),
                        executed_value: order.executed_value.to_f64().unwrap_or(0.0),
                    });
                }
                tokio::time::sleep(Duration::from_millis(ORDER_POLL_MS)).await;
            }
        };

        with_timeout(
            &format!("order {} fill (order left open for reconciliation)", order_id),
            timeout,
            poll,
        )
        .await?
    }

    /// Withdraw crypto from the exchange to an on-chain address.
    /// Returns the withdrawal id.
    pub async fn withdraw(&self, currency: &str, amount: f64, address: &str) -> Result<String> {
        let withdrawal = CryptoWithdrawal {
            amount: format!("{:.6}", amount),
            currency,
            crypto_address: address.to_string(),
        };
        let body = serde_json::to_string(&withdrawal).context("Failed to encode withdrawal")?;
        let raw: WithdrawalReceipt = self
            .request(reqwest::Method::POST, "/withdrawals/crypto", Some(body))
            .await?;
        Ok(raw.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn test_client() -> CoinbaseClient {
        CoinbaseClient {
            api_url: "https://api.exchange.test".to_string(),
            api_key: "key".to_string(),
            // base64 of "super-secret"
            api_secret: B64.encode(b"super-secret"),
            api_passphrase: "phrase".to_string(),
            product_id: "EURC-USDC".to_string(),
            client: reqwest::Client::new(),
        }
    }

    #[test]
    fn test_signature_is_deterministic() {
        let client = test_client();
        let a = client
            .sign("1700000000", "GET", "/accounts", "")
            .unwrap();
        let b = client
            .sign("1700000000", "GET", "/accounts", "")
            .unwrap();
        assert_eq!(a, b);
        // base64 of a 32-byte HMAC-SHA256 digest
        assert_eq!(B64.decode(&a).unwrap().len(), 32);
    }

    #[test]
    fn test_signature_covers_all_inputs() {
        let client = test_client();
        let base = client.sign("1700000000", "GET", "/accounts", "").unwrap();
        assert_ne!(
            base,
            client.sign("1700000001", "GET", "/accounts", "").unwrap()
        );
        assert_ne!(
            base,
            client.sign("1700000000", "POST", "/accounts", "").unwrap()
        );
        assert_ne!(
            base,
            client.sign("1700000000", "GET", "/orders", "").unwrap()
        );
        assert_ne!(
            base,
            client
                .sign("1700000000", "GET", "/accounts", "{\"a\":1}")
                .unwrap()
        );
    }

    #[test]
    fn test_sign_rejects_non_base64_secret() {
        let mut client = test_client();
        client.api_secret = "%%%not-base64%%%".to_string();
        assert!(client.sign("1700000000", "GET", "/accounts", "").is_err());
    }

    #[test]
    fn test_book_levels_parse() {
        let raw: RawBook = serde_json::from_str(
            r#"{"bids":[["1.0035","600.0",3],["1.0020","500.0",1]],
                "asks":[["1.0040","250.5",2]],
                "sequence":12345}"#,
        )
        .unwrap();
        assert_eq!(raw.bids.len(), 2);
        assert_eq!(raw.asks.len(), 1);
        assert_eq!(raw.bids[0].0, dec!(1.0035));
        assert_eq!(raw.asks[0].1, dec!(250.5));
    }

    #[test]
    fn test_transient_status_classification() {
        // Rate limits and server errors get retried.
        assert!(transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(transient_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(transient_status(StatusCode::BAD_GATEWAY));
        // Client errors are terminal (bad request, auth, not found).
        assert!(!transient_status(StatusCode::BAD_REQUEST));
        assert!(!transient_status(StatusCode::UNAUTHORIZED));
        assert!(!transient_status(StatusCode::NOT_FOUND));
    }

    #[test]
    fn test_order_defaults_for_open_order() {
        // Open orders omit filled fields in some responses.
        let raw: RawOrder = serde_json::from_str(
            r#"{"id":"abc","status":"open","settled":false}"#,
        )
        .unwrap();
        assert_eq!(raw.id, "abc");
        assert!(!raw.settled);
        assert_eq!(raw.filled_size.to_f64().unwrap(), 0.0);
    }
}
