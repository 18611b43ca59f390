//! In-memory [`TradeStore`] used by tests and mock mode. Mirrors the sqlite
//! schema semantics, including its uniqueness constraints.

use crate::domain::account::{
    DailyPnl, EquitySnapshot, GovernorEvent, Incident, TradeStats, VirtualAccount,
};
use crate::domain::repositories::TradeStore;
use crate::domain::types::{Fill, Order, OrderStatus, Position, TradeRecord};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    vas: HashMap<String, VirtualAccount>,
    orders: HashMap<String, Order>,
    positions: HashMap<(String, String), Position>,
    fills: Vec<Fill>,
    trades: Vec<TradeRecord>,
    snapshots: Vec<EquitySnapshot>,
    daily_pnl: HashMap<(String, NaiveDate), DailyPnl>,
    trade_stats: HashMap<String, TradeStats>,
    incidents: Vec<Incident>,
    governor_events: Vec<GovernorEvent>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TradeStore for MemoryStore {
    async fn create_virtual_account(&self, va: &VirtualAccount) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.vas.contains_key(&va.va_id) {
            anyhow::bail!("virtual account {} already exists", va.va_id);
        }
        inner.vas.insert(va.va_id.clone(), va.clone());
        Ok(())
    }

    async fn get_virtual_account(&self, va_id: &str) -> Result<Option<VirtualAccount>> {
        Ok(self.inner.read().await.vas.get(va_id).cloned())
    }

    async fn update_virtual_account(&self, va: &VirtualAccount) -> Result<()> {
        self.inner
            .write()
            .await
            .vas
            .insert(va.va_id.clone(), va.clone());
        Ok(())
    }

    async fn list_virtual_accounts(&self) -> Result<Vec<VirtualAccount>> {
        let mut vas: Vec<_> = self.inner.read().await.vas.values().cloned().collect();
        vas.sort_by(|a, b| a.va_id.cmp(&b.va_id));
        Ok(vas)
    }

    async fn create_order(&self, order: &Order) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner
            .orders
            .values()
            .any(|o| o.client_order_id == order.client_order_id)
        {
            anyhow::bail!("duplicate client_order_id {}", order.client_order_id);
        }
        inner.orders.insert(order.id.clone(), order.clone());
        Ok(())
    }

    async fn get_order(&self, id: &str) -> Result<Option<Order>> {
        Ok(self.inner.read().await.orders.get(id).cloned())
    }

    async fn get_order_by_client_id(&self, client_order_id: &str) -> Result<Option<Order>> {
        Ok(self
            .inner
            .read()
            .await
            .orders
            .values()
            .find(|o| o.client_order_id == client_order_id)
            .cloned())
    }

    async fn get_order_by_exchange_id(&self, exchange_order_id: &str) -> Result<Option<Order>> {
        Ok(self
            .inner
            .read()
            .await
            .orders
            .values()
            .find(|o| o.exchange_order_id.as_deref() == Some(exchange_order_id))
            .cloned())
    }

    async fn update_order(&self, order: &Order) -> Result<()> {
        self.inner
            .write()
            .await
            .orders
            .insert(order.id.clone(), order.clone());
        Ok(())
    }

    async fn open_orders(&self, va_id: Option<&str>) -> Result<Vec<Order>> {
        let inner = self.inner.read().await;
        let mut orders: Vec<_> = inner
            .orders
            .values()
            .filter(|o| o.status.is_open())
            .filter(|o| va_id.map(|va| o.va_id == va).unwrap_or(true))
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }

    async fn orders_for_symbol(&self, symbol: &str) -> Result<Vec<Order>> {
        let inner = self.inner.read().await;
        let mut orders: Vec<_> = inner
            .orders
            .values()
            .filter(|o| o.symbol == symbol)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }

    async fn update_order_status(
        &self,
        id: &str,
        status: OrderStatus,
        filled_qty: f64,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(order) = inner.orders.get_mut(id) {
            order.status = status;
            order.filled_qty = filled_qty;
            order.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn upsert_position(&self, position: &Position) -> Result<()> {
        self.inner.write().await.positions.insert(
            (position.va_id.clone(), position.symbol.clone()),
            position.clone(),
        );
        Ok(())
    }

    async fn get_position(&self, va_id: &str, symbol: &str) -> Result<Option<Position>> {
        Ok(self
            .inner
            .read()
            .await
            .positions
            .get(&(va_id.to_string(), symbol.to_string()))
            .cloned())
    }

    async fn delete_position(&self, va_id: &str, symbol: &str) -> Result<()> {
        self.inner
            .write()
            .await
            .positions
            .remove(&(va_id.to_string(), symbol.to_string()));
        Ok(())
    }

    async fn positions(&self, va_id: Option<&str>) -> Result<Vec<Position>> {
        let inner = self.inner.read().await;
        let mut positions: Vec<_> = inner
            .positions
            .values()
            .filter(|p| va_id.map(|va| p.va_id == va).unwrap_or(true))
            .cloned()
            .collect();
        positions.sort_by(|a, b| (&a.va_id, &a.symbol).cmp(&(&b.va_id, &b.symbol)));
        Ok(positions)
    }

    async fn record_fill(&self, fill: &Fill) -> Result<()> {
        self.inner.write().await.fills.push(fill.clone());
        Ok(())
    }

    async fn record_trade(&self, trade: &TradeRecord) -> Result<()> {
        self.inner.write().await.trades.push(trade.clone());
        Ok(())
    }

    async fn trades_for_va(&self, va_id: &str) -> Result<Vec<TradeRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .trades
            .iter()
            .filter(|t| t.va_id == va_id)
            .cloned()
            .collect())
    }

    async fn record_equity_snapshot(&self, snapshot: &EquitySnapshot) -> Result<()> {
        self.inner.write().await.snapshots.push(snapshot.clone());
        Ok(())
    }

    async fn upsert_daily_pnl(&self, entry: &DailyPnl) -> Result<()> {
        self.inner
            .write()
            .await
            .daily_pnl
            .insert((entry.va_id.clone(), entry.date), entry.clone());
        Ok(())
    }

    async fn get_daily_pnl(&self, va_id: &str, date: NaiveDate) -> Result<Option<DailyPnl>> {
        Ok(self
            .inner
            .read()
            .await
            .daily_pnl
            .get(&(va_id.to_string(), date))
            .cloned())
    }

    async fn upsert_trade_stats(&self, stats: &TradeStats) -> Result<()> {
        self.inner
            .write()
            .await
            .trade_stats
            .insert(stats.va_id.clone(), stats.clone());
        Ok(())
    }

    async fn get_trade_stats(&self, va_id: &str) -> Result<Option<TradeStats>> {
        Ok(self.inner.read().await.trade_stats.get(va_id).cloned())
    }

    async fn record_incident(&self, incident: &Incident) -> Result<()> {
        self.inner.write().await.incidents.push(incident.clone());
        Ok(())
    }

    async fn recent_incidents(&self, limit: i64) -> Result<Vec<Incident>> {
        let inner = self.inner.read().await;
        Ok(inner
            .incidents
            .iter()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn record_governor_event(&self, event: &GovernorEvent) -> Result<()> {
        self.inner.write().await.governor_events.push(event.clone());
        Ok(())
    }
}
