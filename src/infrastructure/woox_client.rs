//! WOOX REST gateway.
//!
//! Market data uses the public v1 endpoints; account and trading use the
//! signed v3 endpoints. Authenticated requests carry an HMAC-SHA256
//! signature over `timestamp + method + path + body`. API error responses
//! (`success: false`) map onto the [`ExchangeError`] taxonomy and transient
//! classes are retried per [`RetryPolicy`].

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Method;
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::domain::entities::order::OrderRequest;
use crate::domain::errors::ExchangeError;
use crate::domain::market_state::OrderbookLevel;
use crate::domain::repositories::exchange_gateway::{
    AccountInfo, ExchangeGateway, ExchangePosition, MarketTrade, OrderbookLevels, TokenBalance,
};
use crate::infrastructure::retry::{RetryDecision, RetryPolicy};

pub const DEFAULT_BASE_URL: &str = "https://api.woox.io";

type HmacSha256 = Hmac<Sha256>;

pub struct WooxClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    api_secret: Option<String>,
    retry: RetryPolicy,
}

/// WOOX returns numeric fields as either numbers or strings depending on
/// the endpoint version.
fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn parse_levels(raw: Option<&Value>) -> Vec<OrderbookLevel> {
    raw.and_then(Value::as_array)
        .map(|levels| {
            levels
                .iter()
                .filter_map(|level| {
                    Some(OrderbookLevel {
                        price: as_f64(level.get("price")?)?,
                        quantity: as_f64(level.get("quantity")?)?,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

impl WooxClient {
    pub fn new(base_url: String, api_key: Option<String>, api_secret: Option<String>) -> Self {
        WooxClient {
            http: reqwest::Client::new(),
            base_url,
            api_key,
            api_secret,
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        WooxClient::new(
            config.get_str("BASE_URL", DEFAULT_BASE_URL),
            config.get("WOOX_API_KEY").map(str::to_string),
            config.get("WOOX_API_SECRET").map(str::to_string),
        )
    }

    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some() && self.api_secret.is_some()
    }

    /// Hex HMAC-SHA256 of `timestamp + method + path + body`.
    fn sign(
        &self,
        timestamp_ms: i64,
        method: &str,
        path: &str,
        body: &str,
    ) -> Result<String, ExchangeError> {
        let secret = self.api_secret.as_ref().ok_or_else(|| {
            ExchangeError::Authentication("API secret is required for authenticated requests".into())
        })?;
        let payload = format!("{}{}{}{}", timestamp_ms, method, path, body);
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| ExchangeError::Authentication(e.to_string()))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    async fn send_once(
        &self,
        method: &Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        authenticated: bool,
    ) -> Result<Value, ExchangeError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.request(method.clone(), &url);

        if !query.is_empty() {
            request = request.query(query);
        }

        let body_str = match body {
            Some(value) => serde_json::to_string(value)
                .map_err(|e| ExchangeError::InvalidParameter(e.to_string()))?,
            None => String::new(),
        };

        if authenticated {
            let api_key = self.api_key.as_ref().ok_or_else(|| {
                ExchangeError::Authentication("API key is required for authenticated requests".into())
            })?;
            let timestamp = chrono::Utc::now().timestamp_millis();
            let signature = self.sign(timestamp, method.as_str(), path, &body_str)?;
            request = request
                .header("x-api-key", api_key)
                .header("x-api-signature", signature)
                .header("x-api-timestamp", timestamp.to_string())
                .header("Cache-Control", "no-cache");
        }

        if body.is_some() {
            request = request
                .header("Content-Type", "application/json")
                .body(body_str);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;
        let payload: Value = response
            .json()
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;

        if !payload.get("success").and_then(Value::as_bool).unwrap_or(true) {
            let code = payload.get("code").and_then(Value::as_i64).unwrap_or(-1000);
            let message = payload
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Unknown error")
                .to_string();
            return Err(ExchangeError::from_code(code, message));
        }
        Ok(payload)
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
        authenticated: bool,
    ) -> Result<Value, ExchangeError> {
        let mut attempt = 0;
        loop {
            match self
                .send_once(&method, path, query, body.as_ref(), authenticated)
                .await
            {
                Ok(payload) => {
                    debug!("{} {} succeeded on attempt {}", method, path, attempt + 1);
                    return Ok(payload);
                }
                Err(e) => match self.retry.classify(&e, attempt) {
                    RetryDecision::Retry(delay) => {
                        warn!(
                            "{} {} failed (attempt {}), retrying in {:?}: {}",
                            method,
                            path,
                            attempt + 1,
                            delay,
                            e
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    RetryDecision::Fail => {
                        error!("{} {} failed: {}", method, path, e.user_message());
                        return Err(e);
                    }
                },
            }
        }
    }
}

#[async_trait]
impl ExchangeGateway for WooxClient {
    async fn get_orderbook(
        &self,
        symbol: &str,
        max_level: u32,
    ) -> Result<OrderbookLevels, ExchangeError> {
        let path = format!("/v1/public/orderbook/{}", symbol);
        let payload = self
            .request(
                Method::GET,
                &path,
                &[("max_level", max_level.to_string())],
                None,
                false,
            )
            .await?;
        Ok(OrderbookLevels {
            bids: parse_levels(payload.get("bids")),
            asks: parse_levels(payload.get("asks")),
            timestamp: payload.get("timestamp").and_then(as_f64),
        })
    }

    async fn get_market_trades(
        &self,
        symbol: &str,
        limit: u32,
    ) -> Result<Vec<MarketTrade>, ExchangeError> {
        let payload = self
            .request(
                Method::GET,
                "/v1/public/market_trades",
                &[("symbol", symbol.to_string()), ("limit", limit.to_string())],
                None,
                false,
            )
            .await?;
        let trades = payload
            .get("rows")
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| {
                        Some(MarketTrade {
                            price: as_f64(row.get("executed_price")?)?,
                            quantity: as_f64(row.get("executed_quantity")?)?,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(trades)
    }

    async fn get_balances(&self) -> Result<Vec<TokenBalance>, ExchangeError> {
        let payload = self
            .request(Method::GET, "/v3/balances", &[], None, true)
            .await?;
        let balances = payload
            .pointer("/data/holding")
            .and_then(Value::as_array)
            .map(|holdings| {
                holdings
                    .iter()
                    .filter_map(|h| {
                        Some(TokenBalance {
                            token: h.get("token")?.as_str()?.to_string(),
                            holding: h.get("holding").and_then(as_f64)?,
                            average_open_price: h.get("averageOpenPrice").and_then(as_f64),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(balances)
    }

    async fn get_positions(&self) -> Result<Vec<ExchangePosition>, ExchangeError> {
        let payload = self
            .request(Method::GET, "/v3/positions", &[], None, true)
            .await?;
        let positions = payload
            .pointer("/data/positions")
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .filter_map(|p| {
                        Some(ExchangePosition {
                            symbol: p.get("symbol")?.as_str()?.to_string(),
                            holding: p.get("holding").and_then(as_f64)?,
                            average_open_price: p.get("averageOpenPrice").and_then(as_f64)?,
                            timestamp: p.get("timestamp").and_then(as_f64),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(positions)
    }

    async fn get_account_info(&self) -> Result<AccountInfo, ExchangeError> {
        let payload = self
            .request(Method::GET, "/v3/accountinfo", &[], None, true)
            .await?;
        Ok(AccountInfo {
            total_collateral: payload
                .pointer("/data/totalCollateral")
                .and_then(as_f64)
                .unwrap_or(0.0),
        })
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<String, ExchangeError> {
        let mut body = json!({
            "symbol": order.symbol,
            "side": order.side.as_str(),
            "type": order.order_type.as_str(),
            "price": order.price.to_string(),
            "quantity": order.quantity.to_string(),
        });
        if order.reduce_only {
            body["reduceOnly"] = json!(true);
        }
        if let Some(id) = &order.client_order_id {
            body["clientOrderId"] = json!(id);
        }

        let payload = self
            .request(Method::POST, "/v3/trade/order", &[], Some(body), true)
            .await?;
        payload
            .pointer("/data/orderId")
            .map(|id| match id {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .ok_or_else(|| ExchangeError::Server("order response missing orderId".into()))
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), ExchangeError> {
        self.request(
            Method::DELETE,
            "/v3/trade/order",
            &[
                ("symbol", symbol.to_string()),
                ("orderId", order_id.to_string()),
            ],
            None,
            true,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_with_secret() -> WooxClient {
        WooxClient::new(
            DEFAULT_BASE_URL.to_string(),
            Some("key".into()),
            Some("secret".into()),
        )
    }

    #[test]
    fn test_signature_shape_and_determinism() {
        let client = client_with_secret();
        let a = client.sign(1700000000000, "POST", "/v3/trade/order", "{}").unwrap();
        let b = client.sign(1700000000000, "POST", "/v3/trade/order", "{}").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));

        let c = client.sign(1700000000000, "POST", "/v3/trade/order", "{\"q\":1}").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_sign_without_secret_fails() {
        let client = WooxClient::new(DEFAULT_BASE_URL.to_string(), Some("key".into()), None);
        assert!(matches!(
            client.sign(0, "GET", "/v3/balances", ""),
            Err(ExchangeError::Authentication(_))
        ));
    }

    #[test]
    fn test_as_f64_number_and_string() {
        assert_eq!(as_f64(&json!(1.5)), Some(1.5));
        assert_eq!(as_f64(&json!("1.5")), Some(1.5));
        assert_eq!(as_f64(&json!(null)), None);
        assert_eq!(as_f64(&json!("abc")), None);
    }

    #[test]
    fn test_parse_levels_mixed_types() {
        let raw = json!([
            {"price": "100.5", "quantity": 2},
            {"price": 101.0, "quantity": "3.5"},
            {"price": "bad", "quantity": 1},
        ]);
        let levels = parse_levels(Some(&raw));
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0].price, 100.5);
        assert_eq!(levels[0].quantity, 2.0);
        assert_eq!(levels[1].quantity, 3.5);
    }
}
