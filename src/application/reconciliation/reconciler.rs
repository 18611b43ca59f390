use crate::application::risk::RiskManager;
use crate::domain::account::{Incident, IncidentType, Severity};
use crate::domain::exchange::ExchangePosition;
use crate::domain::ports::ExchangeClient;
use crate::domain::repositories::TradeStore;
use crate::domain::types::{OrderStatus, Side};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Default repair stop distance when the entry order's own stop is unknown:
/// 2% from entry, on the losing side of the position.
const REPAIR_SL_PCT: f64 = 0.02;

/// Pulls exchange truth and repairs local divergence. Every non-zero
/// exchange position must carry a stop-loss; when one cannot be attached the
/// position is panic-closed and the incident trail records why.
pub struct Reconciler {
    exchange: Arc<dyn ExchangeClient>,
    store: Arc<dyn TradeStore>,
    risk: Arc<RwLock<RiskManager>>,
}

impl Reconciler {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        store: Arc<dyn TradeStore>,
        risk: Arc<RwLock<RiskManager>>,
    ) -> Self {
        Self {
            exchange,
            store,
            risk,
        }
    }

    /// Upsert exchange open-order state onto local rows. Orders the
    /// exchange no longer reports are left to the stale guard.
    pub async fn reconcile_orders(&self) -> Result<()> {
        let exchange_orders = self.exchange.get_open_orders(None).await?;

        for xo in exchange_orders {
            let local = match self.store.get_order_by_exchange_id(&xo.order_id).await? {
                Some(order) => Some(order),
                None => self.store.get_order_by_client_id(&xo.client_order_id).await?,
            };
            let Some(order) = local else { continue };

            let Some(status) = OrderStatus::from_exchange(&xo.status) else {
                warn!(
                    order_id = %order.id,
                    exchange_status = %xo.status,
                    "unrecognized exchange order status"
                );
                continue;
            };

            if order.status != status || (order.filled_qty - xo.filled_qty).abs() > f64::EPSILON {
                if !order.status.can_transition_to(status) {
                    continue;
                }
                self.store
                    .update_order_status(&order.id, status, xo.filled_qty)
                    .await?;
                info!(
                    order_id = %order.id,
                    status = %status,
                    filled_qty = xo.filled_qty,
                    "order state reconciled from exchange"
                );
            }
        }
        Ok(())
    }

    /// One pass over exchange positions. Per-position failures are contained
    /// so a single bad symbol never aborts the rest of the pass.
    pub async fn reconcile_positions(&self, now: DateTime<Utc>) -> Result<()> {
        let positions = self.exchange.get_positions().await?;

        for xch_pos in positions {
            if xch_pos.qty == 0.0 {
                continue;
            }
            if let Err(e) = self.reconcile_one_position(&xch_pos, now).await {
                error!(
                    symbol = %xch_pos.symbol,
                    error = %e,
                    "position reconcile failed, continuing pass"
                );
            }
        }
        Ok(())
    }

    async fn reconcile_one_position(
        &self,
        xch_pos: &ExchangePosition,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let owner = {
            let risk = self.risk.read().await;
            risk.symbol_owner(&xch_pos.symbol).map(str::to_string)
        };

        if owner.is_none() {
            // Never auto-assign a silo; flag the divergence and move on to
            // stop-loss enforcement regardless.
            warn!(
                symbol = %xch_pos.symbol,
                qty = xch_pos.qty,
                "exchange position has no owning account"
            );
            let incident = Incident::new(
                IncidentType::ReconcileDivergence,
                Severity::Warning,
                format!(
                    "exchange position {} {} {} has no local owner",
                    xch_pos.symbol, xch_pos.side, xch_pos.qty
                ),
                now,
            )
            .with_symbol(&xch_pos.symbol)
            .with_metadata(json!({
                "position_qty": xch_pos.qty,
                "position_side": xch_pos.side.to_string(),
                "avg_entry_price": xch_pos.avg_entry_price,
            }));
            self.store.record_incident(&incident).await?;
        }

        if xch_pos.stop_loss_price.is_none() {
            self.enforce_stop_loss(xch_pos, owner.as_deref(), now).await?;
        }
        Ok(())
    }

    /// Restore the "every position has a stop" invariant: attach a stop to
    /// the entry order, or failing that, panic-close.
    async fn enforce_stop_loss(
        &self,
        xch_pos: &ExchangePosition,
        owner: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if let Some((order_id, entry_price, local_id)) = self.find_entry_order(xch_pos).await? {
            let stop_price = match xch_pos.side {
                Side::Buy => entry_price * (1.0 - REPAIR_SL_PCT),
                Side::Sell => entry_price * (1.0 + REPAIR_SL_PCT),
            };

            match self
                .exchange
                .attach_stop_loss(&xch_pos.symbol, &order_id, stop_price)
                .await
            {
                Ok(true) => {
                    info!(
                        symbol = %xch_pos.symbol,
                        order_id = %order_id,
                        stop_price,
                        "stop-loss attached during reconcile"
                    );
                    if let Some(local_id) = local_id
                        && let Some(mut order) = self.store.get_order(&local_id).await?
                    {
                        order.stop_loss_price = Some(stop_price);
                        order.updated_at = now;
                        self.store.update_order(&order).await?;
                    }
                    return Ok(());
                }
                Ok(false) => warn!(
                    symbol = %xch_pos.symbol,
                    order_id = %order_id,
                    "exchange refused stop-loss attachment"
                ),
                Err(e) => warn!(
                    symbol = %xch_pos.symbol,
                    order_id = %order_id,
                    error = %e,
                    "stop-loss attachment errored"
                ),
            }
        }

        self.panic_close(xch_pos, owner, now).await
    }

    /// Locate the entry order for an exchange position: prefer the local
    /// record, fall back to exchange open orders.
    async fn find_entry_order(
        &self,
        xch_pos: &ExchangePosition,
    ) -> Result<Option<(String, f64, Option<String>)>> {
        let local = self.store.orders_for_symbol(&xch_pos.symbol).await?;
        let entry = local
            .iter()
            .filter(|o| !o.reduce_only && o.exchange_order_id.is_some())
            .filter(|o| {
                matches!(
                    o.status,
                    OrderStatus::Submitted | OrderStatus::PartialFill | OrderStatus::Filled
                )
            })
            .max_by_key(|o| o.created_at);
        if let Some(order) = entry {
            let exchange_id = order.exchange_order_id.clone().unwrap_or_default();
            return Ok(Some((exchange_id, order.price, Some(order.id.clone()))));
        }

        let open = self.exchange.get_open_orders(Some(&xch_pos.symbol)).await?;
        let entry = open
            .into_iter()
            .find(|o| !o.reduce_only && matches!(o.status.as_str(), "New" | "PartiallyFilled"));
        Ok(entry.map(|o| (o.order_id, o.price, None)))
    }

    /// Forced reduce-only exit. Never retried within a pass; the incident
    /// trail carries enough to act on either outcome.
    async fn panic_close(
        &self,
        xch_pos: &ExchangePosition,
        owner: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match self
            .exchange
            .panic_close_position(&xch_pos.symbol, xch_pos.side, xch_pos.qty)
            .await
        {
            Ok(close_order) => {
                warn!(
                    symbol = %xch_pos.symbol,
                    side = %xch_pos.side,
                    qty = xch_pos.qty,
                    close_order_id = %close_order.order_id,
                    "position panic-closed: stop-loss could not be restored"
                );
                let mut incident = Incident::new(
                    IncidentType::PanicClose,
                    Severity::High,
                    format!(
                        "panic-closed position {} {} {}",
                        xch_pos.symbol, xch_pos.side, xch_pos.qty
                    ),
                    now,
                )
                .with_symbol(&xch_pos.symbol)
                .with_order(&close_order.order_id)
                .with_metadata(json!({
                    "position_qty": xch_pos.qty,
                    "position_side": xch_pos.side.to_string(),
                    "close_order_id": close_order.order_id,
                }));
                if let Some(va_id) = owner {
                    incident = incident.with_va(va_id);
                }
                self.store.record_incident(&incident).await?;
            }
            Err(e) => {
                error!(
                    symbol = %xch_pos.symbol,
                    error = %e,
                    "panic-close failed; position is unprotected"
                );
                let mut incident = Incident::new(
                    IncidentType::PanicCloseFailed,
                    Severity::Critical,
                    format!("failed to panic-close position {}: {}", xch_pos.symbol, e),
                    now,
                )
                .with_symbol(&xch_pos.symbol)
                .with_metadata(json!({ "error": e.to_string() }));
                if let Some(va_id) = owner {
                    incident = incident.with_va(va_id);
                }
                self.store.record_incident(&incident).await?;
            }
        }
        Ok(())
    }
}
