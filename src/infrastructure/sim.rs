//! Deterministic-enough stand-ins for the live exchange and quote feed.
//!
//! `SimulatedMarketData` random-walks a per-symbol anchor price;
//! `SimulatedExchange` keeps positions and orders in memory, records every
//! call, and exposes failure toggles so tests can drive the repair paths.

use crate::domain::errors::ExchangeError;
use crate::domain::exchange::{ExchangeFill, ExchangeOrder, ExchangePosition};
use crate::domain::ports::{ExchangeClient, MarketDataProvider};
use crate::domain::types::{MarketSnapshot, Side};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

pub struct SimulatedMarketData {
    base_price: f64,
    anchors: RwLock<HashMap<String, f64>>,
}

impl SimulatedMarketData {
    pub fn new(base_price: f64) -> Self {
        Self {
            base_price,
            anchors: RwLock::new(HashMap::new()),
        }
    }

    /// Pin a symbol's anchor, e.g. to steer a test toward a stop.
    pub async fn set_price(&self, symbol: &str, price: f64) {
        self.anchors.write().await.insert(symbol.to_string(), price);
    }
}

impl Default for SimulatedMarketData {
    fn default() -> Self {
        Self::new(100.0)
    }
}

#[async_trait]
impl MarketDataProvider for SimulatedMarketData {
    async fn snapshot(&self, symbol: &str) -> Result<MarketSnapshot> {
        let mut anchors = self.anchors.write().await;
        let anchor = anchors.entry(symbol.to_string()).or_insert(self.base_price);

        let (price, half_spread, last_offset, latency_ms) = {
            let mut rng = rand::rng();
            let drift: f64 = rng.random_range(-0.002..=0.002);
            let price = *anchor * (1.0 + drift);
            let half_spread = price * rng.random_range(0.00005..=0.00025);
            let last_offset: f64 = rng.random_range(-0.0002..=0.0002);
            let latency_ms: f64 = rng.random_range(50.0..=200.0);
            (price, half_spread, last_offset, latency_ms)
        };
        *anchor = price;

        Ok(MarketSnapshot {
            symbol: symbol.to_string(),
            bid: price - half_spread,
            ask: price + half_spread,
            last: price * (1.0 + last_offset),
            latency_ms,
            timestamp: Utc::now(),
        })
    }
}

#[derive(Default)]
pub struct SimulatedExchange {
    positions: RwLock<Vec<ExchangePosition>>,
    open_orders: RwLock<Vec<ExchangeOrder>>,
    placed: RwLock<Vec<ExchangeOrder>>,
    panic_closes: RwLock<Vec<ExchangeOrder>>,
    fail_attach: AtomicBool,
    fail_panic_close: AtomicBool,
}

impl SimulatedExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_position(&self, position: ExchangePosition) {
        self.positions.write().await.push(position);
    }

    pub async fn seed_open_order(&self, order: ExchangeOrder) {
        self.open_orders.write().await.push(order);
    }

    pub fn set_attach_fails(&self, fails: bool) {
        self.fail_attach.store(fails, Ordering::SeqCst);
    }

    pub fn set_panic_close_fails(&self, fails: bool) {
        self.fail_panic_close.store(fails, Ordering::SeqCst);
    }

    /// Every order placed through the client, in submission order.
    pub async fn placed_orders(&self) -> Vec<ExchangeOrder> {
        self.placed.read().await.clone()
    }

    pub async fn panic_close_calls(&self) -> Vec<ExchangeOrder> {
        self.panic_closes.read().await.clone()
    }

    fn make_order(
        symbol: &str,
        side: Side,
        order_type: &str,
        price: f64,
        qty: f64,
        reduce_only: bool,
        client_order_id: Option<&str>,
    ) -> ExchangeOrder {
        let order_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        ExchangeOrder {
            client_order_id: client_order_id
                .map(str::to_string)
                .unwrap_or_else(|| order_id.clone()),
            order_id,
            symbol: symbol.to_string(),
            side,
            order_type: order_type.to_string(),
            price,
            qty,
            reduce_only,
            status: "New".to_string(),
            filled_qty: 0.0,
            created_at: now,
            updated_at: now,
        }
    }
}

#[async_trait]
impl ExchangeClient for SimulatedExchange {
    async fn get_server_time(&self) -> Result<DateTime<Utc>, ExchangeError> {
        Ok(Utc::now())
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        qty: f64,
        reduce_only: bool,
        client_order_id: Option<&str>,
    ) -> Result<ExchangeOrder, ExchangeError> {
        let order =
            Self::make_order(symbol, side, "Market", 0.0, qty, reduce_only, client_order_id);
        self.placed.write().await.push(order.clone());
        Ok(order)
    }

    async fn place_stop_loss(
        &self,
        symbol: &str,
        side: Side,
        stop_price: f64,
        qty: f64,
        client_order_id: Option<&str>,
    ) -> Result<ExchangeOrder, ExchangeError> {
        let order = Self::make_order(
            symbol,
            side.opposite(),
            "Market",
            stop_price,
            qty,
            true,
            client_order_id,
        );
        self.placed.write().await.push(order.clone());
        Ok(order)
    }

    async fn place_take_profit(
        &self,
        symbol: &str,
        side: Side,
        tp_price: f64,
        qty: f64,
        client_order_id: Option<&str>,
    ) -> Result<ExchangeOrder, ExchangeError> {
        let order = Self::make_order(
            symbol,
            side.opposite(),
            "Limit",
            tp_price,
            qty,
            true,
            client_order_id,
        );
        self.placed.write().await.push(order.clone());
        Ok(order)
    }

    async fn cancel_order(&self, _symbol: &str, order_id: &str) -> Result<bool, ExchangeError> {
        let mut open = self.open_orders.write().await;
        let before = open.len();
        open.retain(|o| o.order_id != order_id);
        Ok(open.len() < before)
    }

    async fn cancel_replace_order(
        &self,
        _symbol: &str,
        order_id: &str,
        new_qty: Option<f64>,
        new_price: Option<f64>,
    ) -> Result<ExchangeOrder, ExchangeError> {
        let mut open = self.open_orders.write().await;
        let Some(order) = open.iter_mut().find(|o| o.order_id == order_id) else {
            return Err(ExchangeError::Api {
                ret_code: 110001,
                message: "order not exists".to_string(),
            });
        };
        if let Some(qty) = new_qty {
            order.qty = qty;
        }
        if let Some(price) = new_price {
            order.price = price;
        }
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn attach_stop_loss(
        &self,
        symbol: &str,
        _order_id: &str,
        stop_price: f64,
    ) -> Result<bool, ExchangeError> {
        if self.fail_attach.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let mut positions = self.positions.write().await;
        if let Some(pos) = positions.iter_mut().find(|p| p.symbol == symbol) {
            pos.stop_loss_price = Some(stop_price);
        }
        Ok(true)
    }

    async fn panic_close_position(
        &self,
        symbol: &str,
        side: Side,
        qty: f64,
    ) -> Result<ExchangeOrder, ExchangeError> {
        if self.fail_panic_close.load(Ordering::SeqCst) {
            return Err(ExchangeError::Api {
                ret_code: 110017,
                message: "reduce-only rejected".to_string(),
            });
        }
        let order = Self::make_order(symbol, side.opposite(), "Market", 0.0, qty, true, None);
        self.panic_closes.write().await.push(order.clone());
        self.positions.write().await.retain(|p| p.symbol != symbol);
        Ok(order)
    }

    async fn get_positions(&self) -> Result<Vec<ExchangePosition>, ExchangeError> {
        Ok(self.positions.read().await.clone())
    }

    async fn get_open_orders(
        &self,
        symbol: Option<&str>,
    ) -> Result<Vec<ExchangeOrder>, ExchangeError> {
        let open = self.open_orders.read().await;
        Ok(open
            .iter()
            .filter(|o| symbol.map(|s| o.symbol == s).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn get_fills(
        &self,
        _symbol: Option<&str>,
        _limit: u32,
    ) -> Result<Vec<ExchangeFill>, ExchangeError> {
        Ok(Vec::new())
    }
}
