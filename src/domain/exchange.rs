//! Exchange-facing models returned by the [`ExchangeClient`] port.
//!
//! These carry parsed values; turning Bybit's string-encoded decimals into
//! numbers is the adapter's job.
//!
//! [`ExchangeClient`]: crate::domain::ports::ExchangeClient

use crate::domain::types::Side;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeOrder {
    pub order_id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: String,
    pub price: f64,
    pub qty: f64,
    pub reduce_only: bool,
    /// Exchange-native status string ("New", "PartiallyFilled", ...).
    pub status: String,
    pub filled_qty: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub symbol: String,
    pub side: Side,
    pub qty: f64,
    pub avg_entry_price: f64,
    pub mark_price: f64,
    pub unrealized_pnl: f64,
    pub leverage: f64,
    pub stop_loss_price: Option<f64>,
    pub take_profit_price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeFill {
    pub fill_id: String,
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub qty: f64,
    pub price: f64,
    pub fee: f64,
    pub fee_asset: String,
    pub created_at: DateTime<Utc>,
}
