//! Bybit v5 linear-perpetual client.
//!
//! Transport failures on 429/5xx retry up to `max_retries` times with a flat
//! delay plus uniform jitter; a non-zero retCode in the body is an
//! application error and is surfaced immediately.

use crate::domain::errors::ExchangeError;
use crate::domain::exchange::{ExchangeFill, ExchangeOrder, ExchangePosition};
use crate::domain::ports::ExchangeClient;
use crate::domain::types::Side;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use rand::Rng;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, warn};

const MAINNET_URL: &str = "https://api.bybit.com";
const TESTNET_URL: &str = "https://api-testnet.bybit.com";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct BybitConfig {
    pub testnet: bool,
    pub api_key: String,
    pub api_secret: String,
    pub recv_window: u32,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub timeout_sec: u64,
}

impl Default for BybitConfig {
    fn default() -> Self {
        Self {
            testnet: true,
            api_key: String::new(),
            api_secret: String::new(),
            recv_window: 5000,
            max_retries: 3,
            retry_delay_ms: 100,
            timeout_sec: 10,
        }
    }
}

pub struct BybitClient {
    config: BybitConfig,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg", default)]
    ret_msg: String,
    #[serde(default)]
    result: Value,
}

#[derive(Debug, Deserialize)]
struct OrderCreateResult {
    #[serde(rename = "orderId")]
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct ListResult<T> {
    #[serde(default = "Vec::new")]
    list: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct PositionItem {
    symbol: String,
    side: String,
    size: String,
    #[serde(rename = "avgPrice", default)]
    avg_price: String,
    #[serde(rename = "markPrice", default)]
    mark_price: String,
    #[serde(rename = "unrealisedPnl", default)]
    unrealised_pnl: String,
    #[serde(default)]
    leverage: String,
    #[serde(rename = "stopLoss", default)]
    stop_loss: String,
    #[serde(rename = "takeProfit", default)]
    take_profit: String,
}

#[derive(Debug, Deserialize)]
struct OrderItem {
    #[serde(rename = "orderId")]
    order_id: String,
    #[serde(rename = "orderLinkId", default)]
    order_link_id: String,
    symbol: String,
    side: String,
    #[serde(rename = "orderType", default)]
    order_type: String,
    #[serde(default)]
    price: String,
    #[serde(default)]
    qty: String,
    #[serde(rename = "reduceOnly", default)]
    reduce_only: bool,
    #[serde(rename = "orderStatus", default)]
    order_status: String,
    #[serde(rename = "cumExecQty", default)]
    cum_exec_qty: String,
    #[serde(rename = "createdTime", default)]
    created_time: String,
    #[serde(rename = "updatedTime", default)]
    updated_time: String,
}

#[derive(Debug, Deserialize)]
struct FillItem {
    #[serde(rename = "execId")]
    exec_id: String,
    #[serde(rename = "orderId")]
    order_id: String,
    symbol: String,
    side: String,
    #[serde(rename = "execQty", default)]
    exec_qty: String,
    #[serde(rename = "execPrice", default)]
    exec_price: String,
    #[serde(rename = "execFee", default)]
    exec_fee: String,
    #[serde(rename = "feeCurrency", default)]
    fee_currency: String,
    #[serde(rename = "execTime", default)]
    exec_time: String,
}

fn num(s: &str) -> f64 {
    s.parse::<f64>().unwrap_or(0.0)
}

fn opt_num(s: &str) -> Option<f64> {
    if s.is_empty() {
        None
    } else {
        s.parse::<f64>().ok().filter(|v| *v != 0.0)
    }
}

fn ts_millis(s: &str) -> DateTime<Utc> {
    s.parse::<i64>()
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now)
}

fn side_to_wire(side: Side) -> &'static str {
    match side {
        Side::Buy => "Buy",
        Side::Sell => "Sell",
    }
}

fn side_from_wire(s: &str) -> Result<Side, ExchangeError> {
    match s {
        "Buy" => Ok(Side::Buy),
        "Sell" => Ok(Side::Sell),
        other => Err(ExchangeError::InvalidResponse(format!(
            "unknown side: {}",
            other
        ))),
    }
}

impl BybitClient {
    pub fn new(config: BybitConfig) -> Result<Self, ExchangeError> {
        let base_url = if config.testnet {
            TESTNET_URL.to_string()
        } else {
            MAINNET_URL.to_string()
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_sec))
            .build()?;
        Ok(Self {
            config,
            base_url,
            client,
        })
    }

    fn sign(&self, timestamp: i64, payload: &str) -> String {
        let prefix = format!(
            "{}{}{}",
            timestamp, self.config.api_key, self.config.recv_window
        );
        let mut mac = HmacSha256::new_from_slice(self.config.api_secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(prefix.as_bytes());
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn query_string(params: &Value) -> String {
        let Some(map) = params.as_object() else {
            return String::new();
        };
        map.iter()
            .map(|(k, v)| {
                let v = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                format!("{}={}", k, v)
            })
            .collect::<Vec<_>>()
            .join("&")
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        params: Value,
    ) -> Result<Value, ExchangeError> {
        let url = format!("{}{}", self.base_url, path);
        let mut last_error = String::new();

        for attempt in 0..self.config.max_retries {
            if attempt > 0 {
                let delay_ms = {
                    let mut rng = rand::rng();
                    self.config.retry_delay_ms
                        + rng.random_range(0..=self.config.retry_delay_ms)
                };
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }

            let timestamp = Utc::now().timestamp_millis();
            let (request, payload) = if method == Method::GET {
                let query = Self::query_string(&params);
                let full_url = if query.is_empty() {
                    url.clone()
                } else {
                    format!("{}?{}", url, query)
                };
                (self.client.get(full_url), query)
            } else {
                let body = params.to_string();
                (self.client.post(&url).body(body.clone()), body)
            };

            let signature = self.sign(timestamp, &payload);
            let request = request
                .header("X-BAPI-API-KEY", &self.config.api_key)
                .header("X-BAPI-SIGN", signature)
                .header("X-BAPI-TIMESTAMP", timestamp.to_string())
                .header("X-BAPI-RECV-WINDOW", self.config.recv_window.to_string())
                .header("Content-Type", "application/json");

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    let err = ExchangeError::Transport(e);
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    last_error = err.to_string();
                    warn!(path, attempt, error = %err, "bybit request transport failure");
                    continue;
                }
            };

            let status = response.status();
            if status.as_u16() == 429 || status.is_server_error() {
                last_error = format!("http status {}", status);
                warn!(path, attempt, %status, "bybit throttled/unavailable, retrying");
                continue;
            }
            if let Err(e) = response.error_for_status_ref() {
                return Err(ExchangeError::Transport(e));
            }

            let envelope: ApiEnvelope = response.json().await?;
            if envelope.ret_code != 0 {
                return Err(ExchangeError::Api {
                    ret_code: envelope.ret_code,
                    message: envelope.ret_msg,
                });
            }
            debug!(path, attempt, "bybit request ok");
            return Ok(envelope.result);
        }

        Err(ExchangeError::RetriesExhausted {
            attempts: self.config.max_retries,
            last_error,
        })
    }

    fn parse<T: for<'de> Deserialize<'de>>(value: Value) -> Result<T, ExchangeError> {
        serde_json::from_value(value)
            .map_err(|e| ExchangeError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl ExchangeClient for BybitClient {
    async fn get_server_time(&self) -> Result<DateTime<Utc>, ExchangeError> {
        let result = self
            .request(Method::GET, "/v5/market/time", json!({}))
            .await?;
        let seconds = result
            .get("timeSecond")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| {
                ExchangeError::InvalidResponse("missing timeSecond".to_string())
            })?;
        Utc.timestamp_opt(seconds, 0)
            .single()
            .ok_or_else(|| ExchangeError::InvalidResponse("bad timeSecond".to_string()))
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        qty: f64,
        reduce_only: bool,
        client_order_id: Option<&str>,
    ) -> Result<ExchangeOrder, ExchangeError> {
        let mut payload = json!({
            "category": "linear",
            "symbol": symbol,
            "side": side_to_wire(side),
            "orderType": "Market",
            "qty": qty.to_string(),
            "reduceOnly": reduce_only,
        });
        if let Some(link_id) = client_order_id {
            payload["orderLinkId"] = json!(link_id);
        }

        let result = self.request(Method::POST, "/v5/order/create", payload).await?;
        let created: OrderCreateResult = Self::parse(result)?;
        let now = Utc::now();
        Ok(ExchangeOrder {
            order_id: created.order_id.clone(),
            client_order_id: client_order_id
                .map(str::to_string)
                .unwrap_or(created.order_id),
            symbol: symbol.to_string(),
            side,
            order_type: "Market".to_string(),
            price: 0.0,
            qty,
            reduce_only,
            status: "New".to_string(),
            filled_qty: 0.0,
            created_at: now,
            updated_at: now,
        })
    }

    async fn place_stop_loss(
        &self,
        symbol: &str,
        side: Side,
        stop_price: f64,
        qty: f64,
        client_order_id: Option<&str>,
    ) -> Result<ExchangeOrder, ExchangeError> {
        let opposite = side.opposite();
        let mut payload = json!({
            "category": "linear",
            "symbol": symbol,
            "side": side_to_wire(opposite),
            "orderType": "Market",
            "stopLoss": stop_price.to_string(),
            "qty": qty.to_string(),
            "reduceOnly": true,
        });
        if let Some(link_id) = client_order_id {
            payload["orderLinkId"] = json!(link_id);
        }

        let result = self.request(Method::POST, "/v5/order/create", payload).await?;
        let created: OrderCreateResult = Self::parse(result)?;
        let now = Utc::now();
        Ok(ExchangeOrder {
            order_id: created.order_id.clone(),
            client_order_id: client_order_id
                .map(str::to_string)
                .unwrap_or(created.order_id),
            symbol: symbol.to_string(),
            side: opposite,
            order_type: "Market".to_string(),
            price: stop_price,
            qty,
            reduce_only: true,
            status: "New".to_string(),
            filled_qty: 0.0,
            created_at: now,
            updated_at: now,
        })
    }

    async fn place_take_profit(
        &self,
        symbol: &str,
        side: Side,
        tp_price: f64,
        qty: f64,
        client_order_id: Option<&str>,
    ) -> Result<ExchangeOrder, ExchangeError> {
        let opposite = side.opposite();
        let mut payload = json!({
            "category": "linear",
            "symbol": symbol,
            "side": side_to_wire(opposite),
            "orderType": "Limit",
            "price": tp_price.to_string(),
            "takeProfit": tp_price.to_string(),
            "qty": qty.to_string(),
            "reduceOnly": true,
        });
        if let Some(link_id) = client_order_id {
            payload["orderLinkId"] = json!(link_id);
        }

        let result = self.request(Method::POST, "/v5/order/create", payload).await?;
        let created: OrderCreateResult = Self::parse(result)?;
        let now = Utc::now();
        Ok(ExchangeOrder {
            order_id: created.order_id.clone(),
            client_order_id: client_order_id
                .map(str::to_string)
                .unwrap_or(created.order_id),
            symbol: symbol.to_string(),
            side: opposite,
            order_type: "Limit".to_string(),
            price: tp_price,
            qty,
            reduce_only: true,
            status: "New".to_string(),
            filled_qty: 0.0,
            created_at: now,
            updated_at: now,
        })
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<bool, ExchangeError> {
        let payload = json!({
            "category": "linear",
            "symbol": symbol,
            "orderId": order_id,
        });
        match self.request(Method::POST, "/v5/order/cancel", payload).await {
            Ok(_) => Ok(true),
            Err(ExchangeError::Api { ret_code, message }) => {
                warn!(symbol, order_id, ret_code, message, "cancel refused");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn cancel_replace_order(
        &self,
        symbol: &str,
        order_id: &str,
        new_qty: Option<f64>,
        new_price: Option<f64>,
    ) -> Result<ExchangeOrder, ExchangeError> {
        let mut payload = json!({
            "category": "linear",
            "symbol": symbol,
            "orderId": order_id,
        });
        if let Some(qty) = new_qty {
            payload["qty"] = json!(qty.to_string());
        }
        if let Some(price) = new_price {
            payload["price"] = json!(price.to_string());
        }

        let result = self.request(Method::POST, "/v5/order/amend", payload).await?;
        let amended: OrderCreateResult = Self::parse(result)?;
        let now = Utc::now();
        Ok(ExchangeOrder {
            order_id: amended.order_id.clone(),
            client_order_id: amended.order_id,
            symbol: symbol.to_string(),
            side: Side::Buy,
            order_type: String::new(),
            price: new_price.unwrap_or(0.0),
            qty: new_qty.unwrap_or(0.0),
            reduce_only: false,
            status: "New".to_string(),
            filled_qty: 0.0,
            created_at: now,
            updated_at: now,
        })
    }

    async fn attach_stop_loss(
        &self,
        symbol: &str,
        order_id: &str,
        stop_price: f64,
    ) -> Result<bool, ExchangeError> {
        let payload = json!({
            "category": "linear",
            "symbol": symbol,
            "orderId": order_id,
            "stopLoss": stop_price.to_string(),
        });
        match self.request(Method::POST, "/v5/order/amend", payload).await {
            Ok(_) => Ok(true),
            Err(ExchangeError::Api { ret_code, message }) => {
                warn!(symbol, order_id, ret_code, message, "stop-loss amend refused");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn panic_close_position(
        &self,
        symbol: &str,
        side: Side,
        qty: f64,
    ) -> Result<ExchangeOrder, ExchangeError> {
        let opposite = side.opposite();
        let payload = json!({
            "category": "linear",
            "symbol": symbol,
            "side": side_to_wire(opposite),
            "orderType": "Market",
            "qty": qty.to_string(),
            "reduceOnly": true,
        });

        let result = self.request(Method::POST, "/v5/order/create", payload).await?;
        let created: OrderCreateResult = Self::parse(result)?;
        let now = Utc::now();
        Ok(ExchangeOrder {
            order_id: created.order_id.clone(),
            client_order_id: created.order_id,
            symbol: symbol.to_string(),
            side: opposite,
            order_type: "Market".to_string(),
            price: 0.0,
            qty,
            reduce_only: true,
            status: "New".to_string(),
            filled_qty: 0.0,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_positions(&self) -> Result<Vec<ExchangePosition>, ExchangeError> {
        let params = json!({ "category": "linear", "settleCoin": "USDT" });
        let result = self.request(Method::GET, "/v5/position/list", params).await?;
        let parsed: ListResult<PositionItem> = Self::parse(result)?;

        let mut positions = Vec::new();
        for item in parsed.list {
            let qty = num(&item.size);
            if qty == 0.0 {
                continue;
            }
            positions.push(ExchangePosition {
                symbol: item.symbol,
                side: side_from_wire(&item.side)?,
                qty,
                avg_entry_price: num(&item.avg_price),
                mark_price: num(&item.mark_price),
                unrealized_pnl: num(&item.unrealised_pnl),
                leverage: if item.leverage.is_empty() {
                    1.0
                } else {
                    num(&item.leverage)
                },
                stop_loss_price: opt_num(&item.stop_loss),
                take_profit_price: opt_num(&item.take_profit),
            });
        }
        Ok(positions)
    }

    async fn get_open_orders(
        &self,
        symbol: Option<&str>,
    ) -> Result<Vec<ExchangeOrder>, ExchangeError> {
        let mut params = json!({ "category": "linear", "settleCoin": "USDT" });
        if let Some(symbol) = symbol {
            params["symbol"] = json!(symbol);
        }
        let result = self.request(Method::GET, "/v5/order/realtime", params).await?;
        let parsed: ListResult<OrderItem> = Self::parse(result)?;

        let mut orders = Vec::new();
        for item in parsed.list {
            orders.push(ExchangeOrder {
                side: side_from_wire(&item.side)?,
                order_id: item.order_id.clone(),
                client_order_id: if item.order_link_id.is_empty() {
                    item.order_id
                } else {
                    item.order_link_id
                },
                symbol: item.symbol,
                order_type: item.order_type,
                price: num(&item.price),
                qty: num(&item.qty),
                reduce_only: item.reduce_only,
                status: item.order_status,
                filled_qty: num(&item.cum_exec_qty),
                created_at: ts_millis(&item.created_time),
                updated_at: ts_millis(&item.updated_time),
            });
        }
        Ok(orders)
    }

    async fn get_fills(
        &self,
        symbol: Option<&str>,
        limit: u32,
    ) -> Result<Vec<ExchangeFill>, ExchangeError> {
        let mut params = json!({ "category": "linear", "limit": limit });
        if let Some(symbol) = symbol {
            params["symbol"] = json!(symbol);
        }
        let result = self
            .request(Method::GET, "/v5/execution/list", params)
            .await?;
        let parsed: ListResult<FillItem> = Self::parse(result)?;

        let mut fills = Vec::new();
        for item in parsed.list {
            fills.push(ExchangeFill {
                side: side_from_wire(&item.side)?,
                fill_id: item.exec_id,
                order_id: item.order_id,
                symbol: item.symbol,
                qty: num(&item.exec_qty),
                price: num(&item.exec_price),
                fee: num(&item.exec_fee),
                fee_asset: if item.fee_currency.is_empty() {
                    "USDT".to_string()
                } else {
                    item.fee_currency
                },
                created_at: ts_millis(&item.exec_time),
            });
        }
        Ok(fills)
    }
}

#[async_trait]
impl crate::domain::ports::MarketDataProvider for BybitClient {
    async fn snapshot(&self, symbol: &str) -> anyhow::Result<crate::domain::types::MarketSnapshot> {
        #[derive(Debug, Deserialize)]
        struct TickerItem {
            #[serde(rename = "bid1Price", default)]
            bid1_price: String,
            #[serde(rename = "ask1Price", default)]
            ask1_price: String,
            #[serde(rename = "lastPrice", default)]
            last_price: String,
        }

        let started = std::time::Instant::now();
        let params = json!({ "category": "linear", "symbol": symbol });
        let result = self
            .request(Method::GET, "/v5/market/tickers", params)
            .await?;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        let parsed: ListResult<TickerItem> = Self::parse(result)?;
        let ticker = parsed.list.into_iter().next().ok_or_else(|| {
            ExchangeError::InvalidResponse(format!("no ticker for {}", symbol))
        })?;

        Ok(crate::domain::types::MarketSnapshot {
            symbol: symbol.to_string(),
            bid: num(&ticker.bid1_price),
            ask: num(&ticker.ask1_price),
            last: num(&ticker.last_price),
            latency_ms,
            timestamp: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_over_payload() {
        let client = BybitClient::new(BybitConfig {
            api_key: "key".to_string(),
            api_secret: "secret".to_string(),
            ..BybitConfig::default()
        })
        .unwrap();

        let a = client.sign(1700000000000, "category=linear");
        let b = client.sign(1700000000000, "category=linear");
        let c = client.sign(1700000000000, "category=linear&symbol=BTCUSDT");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn query_string_renders_scalars_unquoted() {
        let params = json!({ "category": "linear", "limit": 50 });
        let qs = BybitClient::query_string(&params);
        assert!(qs.contains("category=linear"));
        assert!(qs.contains("limit=50"));
    }

    #[test]
    fn wire_numbers_parse_leniently() {
        assert_eq!(num("1.5"), 1.5);
        assert_eq!(num(""), 0.0);
        assert_eq!(opt_num(""), None);
        assert_eq!(opt_num("0"), None);
        assert_eq!(opt_num("98.5"), Some(98.5));
    }
}
