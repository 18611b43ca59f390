use crate::application::execution::governor::Governor;
use crate::application::execution::signal_router::SignalRouter;
use crate::application::risk::RiskManager;
use crate::domain::account::{DailyPnl, EquitySnapshot, Incident, IncidentType, Severity};
use crate::domain::ports::ExchangeClient;
use crate::domain::repositories::TradeStore;
use crate::domain::types::{
    EntryType, Fill, Order, OrderPlan, OrderStatus, Position, Side, TradeRecord,
    POSITION_EPSILON,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Orders stuck in SUBMITTED longer than this are cancelled locally; the
/// reconciler re-checks exchange truth on its next pass.
const STALE_ORDER_SECS: i64 = 30;

#[derive(Debug, Clone)]
pub struct OrderManagerConfig {
    /// Default protective stop distance in percent of entry, used when an
    /// order reaches a position without carrying its own stop.
    pub stop_loss_percentage: f64,
    /// Fill orders locally after a short random delay instead of waiting on
    /// exchange truth. On for mock mode and tests.
    pub simulate_fills: bool,
}

/// Owns the order lifecycle: submission, protective-order attachment, fill
/// application, and the local stale-order guard. Fills feed realized P&L to
/// the governor and the risk manager.
pub struct OrderManager {
    store: Arc<dyn TradeStore>,
    exchange: Arc<dyn ExchangeClient>,
    governor: Arc<Governor>,
    risk: Arc<RwLock<RiskManager>>,
    router: Arc<SignalRouter>,
    config: OrderManagerConfig,
    last_client_ms: AtomicI64,
}

impl OrderManager {
    pub fn new(
        store: Arc<dyn TradeStore>,
        exchange: Arc<dyn ExchangeClient>,
        governor: Arc<Governor>,
        risk: Arc<RwLock<RiskManager>>,
        router: Arc<SignalRouter>,
        config: OrderManagerConfig,
    ) -> Self {
        Self {
            store,
            exchange,
            governor,
            risk,
            router,
            config,
            last_client_ms: AtomicI64::new(0),
        }
    }

    /// `ORD-{va}-{millis}`, strictly increasing even within a millisecond.
    fn next_client_order_id(&self, va_id: &str, now: DateTime<Utc>) -> String {
        let now_ms = now.timestamp_millis();
        let ms = self
            .last_client_ms
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(last.max(now_ms - 1) + 1)
            })
            .map(|last| last.max(now_ms - 1) + 1)
            .unwrap_or(now_ms);
        format!("ORD-{}-{}", va_id, ms)
    }

    fn default_stop_loss(&self, entry_price: f64, side: Side) -> f64 {
        let pct = self.config.stop_loss_percentage / 100.0;
        match side {
            Side::Buy => entry_price * (1.0 - pct),
            Side::Sell => entry_price * (1.0 + pct),
        }
    }

    /// Submit a sized entry. The order row is persisted as SUBMITTED before
    /// any exchange call so a crash mid-submit leaves an auditable record.
    pub async fn submit_order(
        self: &Arc<Self>,
        plan: &OrderPlan,
        qty: f64,
        now: DateTime<Utc>,
    ) -> Result<Order> {
        let abs_qty = qty.abs();
        let sl_price = plan
            .stop_loss
            .map(|spec| spec.resolved_price(plan.entry_price, plan.side));

        let mut order = Order {
            id: Uuid::new_v4().to_string(),
            va_id: plan.va_id.clone(),
            symbol: plan.symbol.clone(),
            side: plan.side,
            order_type: plan.entry_type,
            qty: abs_qty,
            price: plan.entry_price,
            reduce_only: false,
            client_order_id: self.next_client_order_id(&plan.va_id, now),
            exchange_order_id: None,
            status: OrderStatus::Submitted,
            filled_qty: 0.0,
            stop_loss_price: sl_price,
            sl_order_id: None,
            tp_order_id: None,
            created_at: now,
            updated_at: now,
        };
        self.store
            .create_order(&order)
            .await
            .context("failed to persist order before submission")?;

        let placed = self
            .exchange
            .place_market_order(
                &plan.symbol,
                plan.side,
                abs_qty,
                false,
                Some(&order.client_order_id),
            )
            .await;

        let exchange_order = match placed {
            Ok(xo) => xo,
            Err(e) => {
                order.status = OrderStatus::Rejected;
                order.updated_at = now;
                self.store.update_order(&order).await?;
                return Err(e).context("exchange rejected entry order");
            }
        };
        order.exchange_order_id = Some(exchange_order.order_id.clone());

        if let Some(sl) = sl_price {
            match self
                .exchange
                .place_stop_loss(&plan.symbol, plan.side, sl, abs_qty, None)
                .await
            {
                Ok(sl_order) => order.sl_order_id = Some(sl_order.order_id),
                Err(e) => {
                    // The reconciler repairs missing stops; leave the trail.
                    warn!(
                        symbol = %plan.symbol,
                        order_id = %order.id,
                        error = %e,
                        "stop-loss placement failed"
                    );
                    let incident = Incident::new(
                        IncidentType::SlFailed,
                        Severity::High,
                        format!("stop-loss placement failed: {}", e),
                        now,
                    )
                    .with_va(&plan.va_id)
                    .with_symbol(&plan.symbol)
                    .with_order(&order.id);
                    self.store.record_incident(&incident).await?;
                }
            }
        }

        if let Some(tp) = plan.take_profit {
            match self
                .exchange
                .place_take_profit(&plan.symbol, plan.side, tp.price, abs_qty, None)
                .await
            {
                Ok(tp_order) => order.tp_order_id = Some(tp_order.order_id),
                Err(e) => warn!(
                    symbol = %plan.symbol,
                    order_id = %order.id,
                    error = %e,
                    "take-profit placement failed"
                ),
            }
        }

        self.store.update_order(&order).await?;
        info!(
            va_id = %plan.va_id,
            symbol = %plan.symbol,
            side = %plan.side,
            qty = abs_qty,
            client_order_id = %order.client_order_id,
            "order submitted"
        );

        self.maybe_simulate_fill(&order);
        Ok(order)
    }

    /// Reduce-only market close of the full position, used when a stop
    /// triggers against monitored prices.
    pub async fn submit_position_close(
        self: &Arc<Self>,
        position: &Position,
        price: f64,
        now: DateTime<Utc>,
    ) -> Result<Order> {
        let side = match position.side() {
            Some(side) => side.opposite(),
            None => anyhow::bail!("cannot close a flat position"),
        };
        let qty = position.qty.abs();

        let mut order = Order {
            id: Uuid::new_v4().to_string(),
            va_id: position.va_id.clone(),
            symbol: position.symbol.clone(),
            side,
            order_type: EntryType::Market,
            qty,
            price,
            reduce_only: true,
            client_order_id: self.next_client_order_id(&position.va_id, now),
            exchange_order_id: None,
            status: OrderStatus::Submitted,
            filled_qty: 0.0,
            stop_loss_price: None,
            sl_order_id: None,
            tp_order_id: None,
            created_at: now,
            updated_at: now,
        };
        self.store.create_order(&order).await?;

        match self
            .exchange
            .place_market_order(
                &position.symbol,
                side,
                qty,
                true,
                Some(&order.client_order_id),
            )
            .await
        {
            Ok(xo) => {
                order.exchange_order_id = Some(xo.order_id);
                self.store.update_order(&order).await?;
            }
            Err(e) => {
                order.status = OrderStatus::Rejected;
                self.store.update_order(&order).await?;
                return Err(e).context("exchange rejected close order");
            }
        }

        self.maybe_simulate_fill(&order);
        Ok(order)
    }

    /// Long positions stop out at or below the stop, shorts at or above.
    pub fn check_stop_loss(position: &Position, price: f64) -> bool {
        let Some(sl) = position.stop_loss_price else {
            return false;
        };
        if position.qty > 0.0 {
            price <= sl
        } else if position.qty < 0.0 {
            price >= sl
        } else {
            false
        }
    }

    /// Apply a fill notification. Promotes order status, records the fill,
    /// and routes to the close or open/add path.
    pub async fn process_fill(
        &self,
        order_id: &str,
        fill_price: f64,
        fill_qty: f64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let Some(mut order) = self.store.get_order(order_id).await? else {
            warn!(order_id, "fill for unknown order dropped");
            return Ok(());
        };
        if !order.status.is_open() {
            return Ok(());
        }

        let applied_qty = fill_qty.min(order.remaining_qty());
        if applied_qty <= 0.0 {
            return Ok(());
        }
        order.filled_qty += applied_qty;

        let next_status = if order.remaining_qty() < POSITION_EPSILON {
            OrderStatus::Filled
        } else {
            OrderStatus::PartialFill
        };
        if order.status.can_transition_to(next_status) {
            order.status = next_status;
        }
        order.updated_at = now;
        self.store.update_order(&order).await?;

        let fill = Fill {
            id: Uuid::new_v4().to_string(),
            order_id: order.id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            qty: applied_qty,
            price: fill_price,
            fee: 0.0,
            fee_asset: "USDT".to_string(),
            created_at: now,
        };
        self.store.record_fill(&fill).await?;

        let position = self
            .store
            .get_position(&order.va_id, &order.symbol)
            .await?;

        let closes_existing = position
            .as_ref()
            .map(|pos| Self::is_closing_order(&order, pos))
            .unwrap_or(false);

        if order.reduce_only || closes_existing {
            match position {
                Some(pos) => {
                    self.close_position(&order, pos, fill_price, applied_qty, now)
                        .await?
                }
                None => warn!(
                    order_id = %order.id,
                    symbol = %order.symbol,
                    "reduce-only fill without a local position"
                ),
            }
        } else {
            self.open_or_add_position(&order, position, fill_price, applied_qty, now)
                .await?;
        }

        Ok(())
    }

    fn is_closing_order(order: &Order, position: &Position) -> bool {
        (order.side == Side::Sell && position.qty > 0.0)
            || (order.side == Side::Buy && position.qty < 0.0)
    }

    async fn open_or_add_position(
        &self,
        order: &Order,
        existing: Option<Position>,
        fill_price: f64,
        fill_qty: f64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let signed_qty = order.side.sign() * fill_qty;

        let position = match existing {
            Some(mut pos) => {
                let total_cost =
                    pos.avg_entry_price * pos.qty.abs() + fill_price * fill_qty;
                let total_qty = pos.qty.abs() + fill_qty;
                pos.avg_entry_price = total_cost / total_qty;
                pos.qty += signed_qty;
                pos.current_price = fill_price;
                if order.stop_loss_price.is_some() {
                    pos.stop_loss_price = order.stop_loss_price;
                }
                pos.updated_at = now;
                pos
            }
            None => Position {
                va_id: order.va_id.clone(),
                symbol: order.symbol.clone(),
                qty: signed_qty,
                avg_entry_price: fill_price,
                current_price: fill_price,
                unrealized_pnl: 0.0,
                realized_pnl: 0.0,
                stop_loss_price: order
                    .stop_loss_price
                    .or_else(|| Some(self.default_stop_loss(fill_price, order.side))),
                opened_at: now,
                updated_at: now,
            },
        };
        self.store.upsert_position(&position).await?;

        let trade = TradeRecord {
            id: Uuid::new_v4().to_string(),
            va_id: order.va_id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            qty: fill_qty,
            price: fill_price,
            pnl: 0.0,
            order_id: order.id.clone(),
            executed_at: now,
        };
        self.store.record_trade(&trade).await?;

        self.risk.write().await.record_position(
            &order.va_id,
            &order.symbol,
            position.qty,
            position.avg_entry_price,
        );

        info!(
            va_id = %order.va_id,
            symbol = %order.symbol,
            qty = position.qty,
            avg_entry = position.avg_entry_price,
            "position opened/increased"
        );
        Ok(())
    }

    async fn close_position(
        &self,
        order: &Order,
        mut position: Position,
        fill_price: f64,
        fill_qty: f64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let close_qty = fill_qty.min(position.qty.abs());
        let pnl = if position.qty > 0.0 {
            (fill_price - position.avg_entry_price) * close_qty
        } else {
            (position.avg_entry_price - fill_price) * close_qty
        };

        let trade = TradeRecord {
            id: Uuid::new_v4().to_string(),
            va_id: order.va_id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            qty: close_qty,
            price: fill_price,
            pnl,
            order_id: order.id.clone(),
            executed_at: now,
        };
        self.store.record_trade(&trade).await?;

        position.qty += order.side.sign() * close_qty;
        position.realized_pnl += pnl;
        position.current_price = fill_price;
        position.updated_at = now;

        let flat = position.is_flat();
        if flat {
            self.store
                .delete_position(&order.va_id, &order.symbol)
                .await?;
            self.router.release_symbol(&order.va_id).await;
        } else {
            self.store.upsert_position(&position).await?;
        }

        self.governor
            .record_trade_result(&order.va_id, pnl, now)
            .await?;

        {
            let mut risk = self.risk.write().await;
            if let Err(e) = risk.record_trade_pnl(&order.va_id, &order.symbol, pnl, now) {
                error!(va_id = %order.va_id, error = %e, "pnl record dropped");
            }
            risk.record_position(
                &order.va_id,
                &order.symbol,
                if flat { 0.0 } else { position.qty },
                position.avg_entry_price,
            );

            if let Some(st) = risk.va_state(&order.va_id) {
                let snapshot = EquitySnapshot {
                    id: Uuid::new_v4().to_string(),
                    va_id: order.va_id.clone(),
                    virtual_equity: st.virtual_equity,
                    peak_equity: st.peak_virtual_equity,
                    daily_pnl: st.daily_pnl,
                    snapshot_at: now,
                };
                self.store.record_equity_snapshot(&snapshot).await?;

                let daily = DailyPnl {
                    va_id: order.va_id.clone(),
                    date: st.day_id.unwrap_or_else(|| now.date_naive()),
                    pnl: st.daily_pnl,
                    trades_count: st.daily_trades as i64,
                };
                self.store.upsert_daily_pnl(&daily).await?;
            }
        }

        info!(
            va_id = %order.va_id,
            symbol = %order.symbol,
            close_qty,
            pnl,
            flat,
            "position reduced/closed"
        );
        Ok(())
    }

    /// Stale guard: anything still SUBMITTED after the timeout is cancelled
    /// locally. Exchange truth wins on the next reconcile pass.
    pub async fn reconcile_orders(&self, now: DateTime<Utc>) -> Result<()> {
        let open = self.store.open_orders(None).await?;
        for mut order in open {
            if order.status == OrderStatus::Submitted
                && (now - order.created_at) > Duration::seconds(STALE_ORDER_SECS)
            {
                order.status = OrderStatus::Cancelled;
                order.updated_at = now;
                self.store.update_order(&order).await?;
                warn!(
                    order_id = %order.id,
                    client_order_id = %order.client_order_id,
                    "stale order cancelled locally"
                );
            }
        }
        Ok(())
    }

    fn maybe_simulate_fill(self: &Arc<Self>, order: &Order) {
        if !self.config.simulate_fills {
            return;
        }
        let manager = Arc::clone(self);
        let order_id = order.id.clone();
        let price = order.price;
        let qty = order.qty;
        let delay_ms = rand::rng().random_range(500..2000);
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            if let Err(e) = manager
                .process_fill(&order_id, price, qty, Utc::now())
                .await
            {
                error!(order_id = %order_id, error = %e, "simulated fill failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(qty: f64, sl: Option<f64>) -> Position {
        Position {
            va_id: "VA001".to_string(),
            symbol: "BTCUSDT".to_string(),
            qty,
            avg_entry_price: 100.0,
            current_price: 100.0,
            unrealized_pnl: 0.0,
            realized_pnl: 0.0,
            stop_loss_price: sl,
            opened_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn long_stop_triggers_at_or_below() {
        let pos = position(1.0, Some(98.0));
        assert!(OrderManager::check_stop_loss(&pos, 98.0));
        assert!(OrderManager::check_stop_loss(&pos, 97.5));
        assert!(!OrderManager::check_stop_loss(&pos, 98.01));
    }

    #[test]
    fn short_stop_triggers_at_or_above() {
        let pos = position(-1.0, Some(102.0));
        assert!(OrderManager::check_stop_loss(&pos, 102.0));
        assert!(OrderManager::check_stop_loss(&pos, 103.0));
        assert!(!OrderManager::check_stop_loss(&pos, 101.99));
    }

    #[test]
    fn missing_stop_never_triggers() {
        let pos = position(1.0, None);
        assert!(!OrderManager::check_stop_loss(&pos, 1.0));
    }
}
