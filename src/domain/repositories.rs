//! Storage contract.
//!
//! One logical trait covers all durable relations; the sqlite implementation
//! backs production and an in-memory implementation backs tests and mock
//! mode. Uniqueness rules enforced by every backend:
//!
//! - `orders.client_order_id` is unique
//! - `positions` are unique per (va_id, symbol)
//! - `daily_pnl` is unique per (va_id, date)
//! - `trade_stats` is unique per va_id
//! - `incidents` and `governor_events` are append-only

use crate::domain::account::{
    DailyPnl, EquitySnapshot, GovernorEvent, Incident, TradeStats, VirtualAccount,
};
use crate::domain::types::{Fill, Order, OrderStatus, Position, TradeRecord};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

#[async_trait]
pub trait TradeStore: Send + Sync {
    // Virtual accounts
    async fn create_virtual_account(&self, va: &VirtualAccount) -> Result<()>;
    async fn get_virtual_account(&self, va_id: &str) -> Result<Option<VirtualAccount>>;
    async fn update_virtual_account(&self, va: &VirtualAccount) -> Result<()>;
    async fn list_virtual_accounts(&self) -> Result<Vec<VirtualAccount>>;

    // Orders
    async fn create_order(&self, order: &Order) -> Result<()>;
    async fn get_order(&self, id: &str) -> Result<Option<Order>>;
    async fn get_order_by_client_id(&self, client_order_id: &str) -> Result<Option<Order>>;
    async fn get_order_by_exchange_id(&self, exchange_order_id: &str) -> Result<Option<Order>>;
    async fn update_order(&self, order: &Order) -> Result<()>;
    /// Orders still in an open status, optionally scoped to one account.
    async fn open_orders(&self, va_id: Option<&str>) -> Result<Vec<Order>>;
    async fn orders_for_symbol(&self, symbol: &str) -> Result<Vec<Order>>;
    async fn update_order_status(
        &self,
        id: &str,
        status: OrderStatus,
        filled_qty: f64,
    ) -> Result<()>;

    // Positions
    async fn upsert_position(&self, position: &Position) -> Result<()>;
    async fn get_position(&self, va_id: &str, symbol: &str) -> Result<Option<Position>>;
    async fn delete_position(&self, va_id: &str, symbol: &str) -> Result<()>;
    async fn positions(&self, va_id: Option<&str>) -> Result<Vec<Position>>;

    // Fills and trades
    async fn record_fill(&self, fill: &Fill) -> Result<()>;
    async fn record_trade(&self, trade: &TradeRecord) -> Result<()>;
    async fn trades_for_va(&self, va_id: &str) -> Result<Vec<TradeRecord>>;

    // Equity accounting
    async fn record_equity_snapshot(&self, snapshot: &EquitySnapshot) -> Result<()>;
    async fn upsert_daily_pnl(&self, entry: &DailyPnl) -> Result<()>;
    async fn get_daily_pnl(&self, va_id: &str, date: NaiveDate) -> Result<Option<DailyPnl>>;
    async fn upsert_trade_stats(&self, stats: &TradeStats) -> Result<()>;
    async fn get_trade_stats(&self, va_id: &str) -> Result<Option<TradeStats>>;

    // Audit trail
    async fn record_incident(&self, incident: &Incident) -> Result<()>;
    async fn recent_incidents(&self, limit: i64) -> Result<Vec<Incident>>;
    async fn record_governor_event(&self, event: &GovernorEvent) -> Result<()>;
}
