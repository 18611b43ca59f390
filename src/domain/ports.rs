use crate::domain::errors::ExchangeError;
use crate::domain::exchange::{ExchangeFill, ExchangeOrder, ExchangePosition};
use crate::domain::types::{MarketSnapshot, Side};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Contract every exchange adapter must honor. All mutating calls are
/// against the linear-perpetual category; protective orders are always
/// reduce-only on the opposite side of the position they guard.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn get_server_time(&self) -> Result<DateTime<Utc>, ExchangeError>;

    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        qty: f64,
        reduce_only: bool,
        client_order_id: Option<&str>,
    ) -> Result<ExchangeOrder, ExchangeError>;

    async fn place_stop_loss(
        &self,
        symbol: &str,
        side: Side,
        stop_price: f64,
        qty: f64,
        client_order_id: Option<&str>,
    ) -> Result<ExchangeOrder, ExchangeError>;

    async fn place_take_profit(
        &self,
        symbol: &str,
        side: Side,
        tp_price: f64,
        qty: f64,
        client_order_id: Option<&str>,
    ) -> Result<ExchangeOrder, ExchangeError>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<bool, ExchangeError>;

    async fn cancel_replace_order(
        &self,
        symbol: &str,
        order_id: &str,
        new_qty: Option<f64>,
        new_price: Option<f64>,
    ) -> Result<ExchangeOrder, ExchangeError>;

    /// Amend an existing order to carry a stop-loss. Returns false when the
    /// exchange refuses the amendment.
    async fn attach_stop_loss(
        &self,
        symbol: &str,
        order_id: &str,
        stop_price: f64,
    ) -> Result<bool, ExchangeError>;

    /// Market reduce-only close of the full position, opposite side.
    async fn panic_close_position(
        &self,
        symbol: &str,
        side: Side,
        qty: f64,
    ) -> Result<ExchangeOrder, ExchangeError>;

    async fn get_positions(&self) -> Result<Vec<ExchangePosition>, ExchangeError>;

    async fn get_open_orders(
        &self,
        symbol: Option<&str>,
    ) -> Result<Vec<ExchangeOrder>, ExchangeError>;

    async fn get_fills(
        &self,
        symbol: Option<&str>,
        limit: u32,
    ) -> Result<Vec<ExchangeFill>, ExchangeError>;
}

/// Quote source for the pre-trade filters and the position monitor.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn snapshot(&self, symbol: &str) -> Result<MarketSnapshot>;
}
