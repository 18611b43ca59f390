use crate::domain::account::{
    DailyPnl, EquitySnapshot, GovernorEvent, Incident, IncidentType, Severity, TradeStats,
    VirtualAccount,
};
use crate::domain::repositories::TradeStore;
use crate::domain::types::{
    EntryType, Fill, Order, OrderStatus, Position, Side, TradeRecord,
};
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

/// Production [`TradeStore`] backed by sqlite.
pub struct SqliteStore {
    database: Database,
}

impl SqliteStore {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

fn side_from_db(s: &str) -> Side {
    match s {
        "SELL" => Side::Sell,
        _ => Side::Buy,
    }
}

fn entry_type_from_db(s: &str) -> EntryType {
    match s {
        "STOP" => EntryType::Stop,
        "LIMIT" => EntryType::Limit,
        _ => EntryType::Market,
    }
}

fn status_from_db(s: &str) -> OrderStatus {
    match s {
        "NEW" => OrderStatus::New,
        "SUBMITTED" => OrderStatus::Submitted,
        "PARTIAL_FILL" => OrderStatus::PartialFill,
        "FILLED" => OrderStatus::Filled,
        "CANCELLED" => OrderStatus::Cancelled,
        _ => OrderStatus::Rejected,
    }
}

fn incident_type_from_db(s: &str) -> IncidentType {
    match s {
        "sl_failed" => IncidentType::SlFailed,
        "panic_close" => IncidentType::PanicClose,
        "panic_close_failed" => IncidentType::PanicCloseFailed,
        "va_not_registered" => IncidentType::VaNotRegistered,
        _ => IncidentType::ReconcileDivergence,
    }
}

fn severity_from_db(s: &str) -> Severity {
    match s {
        "info" => Severity::Info,
        "warning" => Severity::Warning,
        "critical" => Severity::Critical,
        _ => Severity::High,
    }
}

fn row_to_va(row: &SqliteRow) -> Result<VirtualAccount> {
    Ok(VirtualAccount {
        va_id: row.try_get("va_id")?,
        balance: row.try_get("balance")?,
        total_pnl: row.try_get("total_pnl")?,
        total_trades: row.try_get("total_trades")?,
        winning_trades: row.try_get("winning_trades")?,
        losing_trades: row.try_get("losing_trades")?,
        max_drawdown: row.try_get("max_drawdown")?,
        current_drawdown: row.try_get("current_drawdown")?,
        consecutive_losses: row.try_get("consecutive_losses")?,
        in_cooldown: row.try_get("in_cooldown")?,
        cooldown_until: row.try_get("cooldown_until")?,
        kill_switch: row.try_get("kill_switch")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_order(row: &SqliteRow) -> Result<Order> {
    let side: String = row.try_get("side")?;
    let order_type: String = row.try_get("order_type")?;
    let status: String = row.try_get("status")?;
    Ok(Order {
        id: row.try_get("id")?,
        va_id: row.try_get("va_id")?,
        symbol: row.try_get("symbol")?,
        side: side_from_db(&side),
        order_type: entry_type_from_db(&order_type),
        qty: row.try_get("qty")?,
        price: row.try_get("price")?,
        reduce_only: row.try_get("reduce_only")?,
        client_order_id: row.try_get("client_order_id")?,
        exchange_order_id: row.try_get("exchange_order_id")?,
        status: status_from_db(&status),
        filled_qty: row.try_get("filled_qty")?,
        stop_loss_price: row.try_get("stop_loss_price")?,
        sl_order_id: row.try_get("sl_order_id")?,
        tp_order_id: row.try_get("tp_order_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_position(row: &SqliteRow) -> Result<Position> {
    Ok(Position {
        va_id: row.try_get("va_id")?,
        symbol: row.try_get("symbol")?,
        qty: row.try_get("qty")?,
        avg_entry_price: row.try_get("avg_entry_price")?,
        current_price: row.try_get("current_price")?,
        unrealized_pnl: row.try_get("unrealized_pnl")?,
        realized_pnl: row.try_get("realized_pnl")?,
        stop_loss_price: row.try_get("stop_loss_price")?,
        opened_at: row.try_get("opened_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_trade(row: &SqliteRow) -> Result<TradeRecord> {
    let side: String = row.try_get("side")?;
    Ok(TradeRecord {
        id: row.try_get("id")?,
        va_id: row.try_get("va_id")?,
        symbol: row.try_get("symbol")?,
        side: side_from_db(&side),
        qty: row.try_get("qty")?,
        price: row.try_get("price")?,
        pnl: row.try_get("pnl")?,
        order_id: row.try_get("order_id")?,
        executed_at: row.try_get("executed_at")?,
    })
}

fn row_to_incident(row: &SqliteRow) -> Result<Incident> {
    let incident_type: String = row.try_get("incident_type")?;
    let severity: String = row.try_get("severity")?;
    let metadata: Option<String> = row.try_get("metadata")?;
    Ok(Incident {
        id: row.try_get("id")?,
        incident_type: incident_type_from_db(&incident_type),
        severity: severity_from_db(&severity),
        description: row.try_get("description")?,
        va_id: row.try_get("va_id")?,
        symbol: row.try_get("symbol")?,
        order_id: row.try_get("order_id")?,
        metadata: metadata
            .and_then(|m| serde_json::from_str(&m).ok())
            .unwrap_or(serde_json::Value::Null),
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl TradeStore for SqliteStore {
    async fn create_virtual_account(&self, va: &VirtualAccount) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO virtual_accounts (
                va_id, balance, total_pnl, total_trades, winning_trades,
                losing_trades, max_drawdown, current_drawdown, consecutive_losses,
                in_cooldown, cooldown_until, kill_switch, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(&va.va_id)
        .bind(va.balance)
        .bind(va.total_pnl)
        .bind(va.total_trades)
        .bind(va.winning_trades)
        .bind(va.losing_trades)
        .bind(va.max_drawdown)
        .bind(va.current_drawdown)
        .bind(va.consecutive_losses)
        .bind(va.in_cooldown)
        .bind(va.cooldown_until)
        .bind(va.kill_switch)
        .bind(va.created_at)
        .bind(va.updated_at)
        .execute(&self.database.pool)
        .await
        .context("failed to create virtual account")?;
        Ok(())
    }

    async fn get_virtual_account(&self, va_id: &str) -> Result<Option<VirtualAccount>> {
        let row = sqlx::query("SELECT * FROM virtual_accounts WHERE va_id = $1")
            .bind(va_id)
            .fetch_optional(&self.database.pool)
            .await
            .context("failed to load virtual account")?;
        row.as_ref().map(row_to_va).transpose()
    }

    async fn update_virtual_account(&self, va: &VirtualAccount) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE virtual_accounts SET
                balance = $2, total_pnl = $3, total_trades = $4,
                winning_trades = $5, losing_trades = $6, max_drawdown = $7,
                current_drawdown = $8, consecutive_losses = $9, in_cooldown = $10,
                cooldown_until = $11, kill_switch = $12, updated_at = $13
            WHERE va_id = $1
            "#,
        )
        .bind(&va.va_id)
        .bind(va.balance)
        .bind(va.total_pnl)
        .bind(va.total_trades)
        .bind(va.winning_trades)
        .bind(va.losing_trades)
        .bind(va.max_drawdown)
        .bind(va.current_drawdown)
        .bind(va.consecutive_losses)
        .bind(va.in_cooldown)
        .bind(va.cooldown_until)
        .bind(va.kill_switch)
        .bind(va.updated_at)
        .execute(&self.database.pool)
        .await
        .context("failed to update virtual account")?;
        Ok(())
    }

    async fn list_virtual_accounts(&self) -> Result<Vec<VirtualAccount>> {
        let rows = sqlx::query("SELECT * FROM virtual_accounts ORDER BY va_id")
            .fetch_all(&self.database.pool)
            .await?;
        rows.iter().map(row_to_va).collect()
    }

    async fn create_order(&self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, va_id, symbol, side, order_type, qty, price, reduce_only,
                client_order_id, exchange_order_id, status, filled_qty,
                stop_loss_price, sl_order_id, tp_order_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(&order.id)
        .bind(&order.va_id)
        .bind(&order.symbol)
        .bind(order.side.to_string())
        .bind(order.order_type.to_string())
        .bind(order.qty)
        .bind(order.price)
        .bind(order.reduce_only)
        .bind(&order.client_order_id)
        .bind(&order.exchange_order_id)
        .bind(order.status.to_string())
        .bind(order.filled_qty)
        .bind(order.stop_loss_price)
        .bind(&order.sl_order_id)
        .bind(&order.tp_order_id)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.database.pool)
        .await
        .context("failed to create order")?;
        Ok(())
    }

    async fn get_order(&self, id: &str) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT * FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.database.pool)
            .await?;
        row.as_ref().map(row_to_order).transpose()
    }

    async fn get_order_by_client_id(&self, client_order_id: &str) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT * FROM orders WHERE client_order_id = $1")
            .bind(client_order_id)
            .fetch_optional(&self.database.pool)
            .await?;
        row.as_ref().map(row_to_order).transpose()
    }

    async fn get_order_by_exchange_id(&self, exchange_order_id: &str) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT * FROM orders WHERE exchange_order_id = $1")
            .bind(exchange_order_id)
            .fetch_optional(&self.database.pool)
            .await?;
        row.as_ref().map(row_to_order).transpose()
    }

    async fn update_order(&self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE orders SET
                status = $2, filled_qty = $3, exchange_order_id = $4,
                stop_loss_price = $5, sl_order_id = $6, tp_order_id = $7,
                updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(&order.id)
        .bind(order.status.to_string())
        .bind(order.filled_qty)
        .bind(&order.exchange_order_id)
        .bind(order.stop_loss_price)
        .bind(&order.sl_order_id)
        .bind(&order.tp_order_id)
        .bind(order.updated_at)
        .execute(&self.database.pool)
        .await
        .context("failed to update order")?;
        Ok(())
    }

    async fn open_orders(&self, va_id: Option<&str>) -> Result<Vec<Order>> {
        let rows = match va_id {
            Some(va_id) => {
                sqlx::query(
                    r#"
                    SELECT * FROM orders
                    WHERE va_id = $1 AND status IN ('NEW', 'SUBMITTED', 'PARTIAL_FILL')
                    ORDER BY created_at
                    "#,
                )
                .bind(va_id)
                .fetch_all(&self.database.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT * FROM orders
                    WHERE status IN ('NEW', 'SUBMITTED', 'PARTIAL_FILL')
                    ORDER BY created_at
                    "#,
                )
                .fetch_all(&self.database.pool)
                .await?
            }
        };
        rows.iter().map(row_to_order).collect()
    }

    async fn orders_for_symbol(&self, symbol: &str) -> Result<Vec<Order>> {
        let rows = sqlx::query("SELECT * FROM orders WHERE symbol = $1 ORDER BY created_at")
            .bind(symbol)
            .fetch_all(&self.database.pool)
            .await?;
        rows.iter().map(row_to_order).collect()
    }

    async fn update_order_status(
        &self,
        id: &str,
        status: OrderStatus,
        filled_qty: f64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE orders SET status = $2, filled_qty = $3, updated_at = CURRENT_TIMESTAMP WHERE id = $1",
        )
        .bind(id)
        .bind(status.to_string())
        .bind(filled_qty)
        .execute(&self.database.pool)
        .await
        .context("failed to update order status")?;
        Ok(())
    }

    async fn upsert_position(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions (
                va_id, symbol, qty, avg_entry_price, current_price,
                unrealized_pnl, realized_pnl, stop_loss_price, opened_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT(va_id, symbol) DO UPDATE SET
                qty = excluded.qty,
                avg_entry_price = excluded.avg_entry_price,
                current_price = excluded.current_price,
                unrealized_pnl = excluded.unrealized_pnl,
                realized_pnl = excluded.realized_pnl,
                stop_loss_price = excluded.stop_loss_price,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&position.va_id)
        .bind(&position.symbol)
        .bind(position.qty)
        .bind(position.avg_entry_price)
        .bind(position.current_price)
        .bind(position.unrealized_pnl)
        .bind(position.realized_pnl)
        .bind(position.stop_loss_price)
        .bind(position.opened_at)
        .bind(position.updated_at)
        .execute(&self.database.pool)
        .await
        .context("failed to upsert position")?;
        Ok(())
    }

    async fn get_position(&self, va_id: &str, symbol: &str) -> Result<Option<Position>> {
        let row = sqlx::query("SELECT * FROM positions WHERE va_id = $1 AND symbol = $2")
            .bind(va_id)
            .bind(symbol)
            .fetch_optional(&self.database.pool)
            .await?;
        row.as_ref().map(row_to_position).transpose()
    }

    async fn delete_position(&self, va_id: &str, symbol: &str) -> Result<()> {
        sqlx::query("DELETE FROM positions WHERE va_id = $1 AND symbol = $2")
            .bind(va_id)
            .bind(symbol)
            .execute(&self.database.pool)
            .await
            .context("failed to delete position")?;
        Ok(())
    }

    async fn positions(&self, va_id: Option<&str>) -> Result<Vec<Position>> {
        let rows = match va_id {
            Some(va_id) => {
                sqlx::query("SELECT * FROM positions WHERE va_id = $1 ORDER BY symbol")
                    .bind(va_id)
                    .fetch_all(&self.database.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM positions ORDER BY va_id, symbol")
                    .fetch_all(&self.database.pool)
                    .await?
            }
        };
        rows.iter().map(row_to_position).collect()
    }

    async fn record_fill(&self, fill: &Fill) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO fills (id, order_id, symbol, side, qty, price, fee, fee_asset, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&fill.id)
        .bind(&fill.order_id)
        .bind(&fill.symbol)
        .bind(fill.side.to_string())
        .bind(fill.qty)
        .bind(fill.price)
        .bind(fill.fee)
        .bind(&fill.fee_asset)
        .bind(fill.created_at)
        .execute(&self.database.pool)
        .await
        .context("failed to record fill")?;
        Ok(())
    }

    async fn record_trade(&self, trade: &TradeRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trades (id, va_id, symbol, side, qty, price, pnl, order_id, executed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&trade.id)
        .bind(&trade.va_id)
        .bind(&trade.symbol)
        .bind(trade.side.to_string())
        .bind(trade.qty)
        .bind(trade.price)
        .bind(trade.pnl)
        .bind(&trade.order_id)
        .bind(trade.executed_at)
        .execute(&self.database.pool)
        .await
        .context("failed to record trade")?;
        Ok(())
    }

    async fn trades_for_va(&self, va_id: &str) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query("SELECT * FROM trades WHERE va_id = $1 ORDER BY executed_at")
            .bind(va_id)
            .fetch_all(&self.database.pool)
            .await?;
        rows.iter().map(row_to_trade).collect()
    }

    async fn record_equity_snapshot(&self, snapshot: &EquitySnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO equity_snapshots (id, va_id, virtual_equity, peak_equity, daily_pnl, snapshot_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&snapshot.id)
        .bind(&snapshot.va_id)
        .bind(snapshot.virtual_equity)
        .bind(snapshot.peak_equity)
        .bind(snapshot.daily_pnl)
        .bind(snapshot.snapshot_at)
        .execute(&self.database.pool)
        .await
        .context("failed to record equity snapshot")?;
        Ok(())
    }

    async fn upsert_daily_pnl(&self, entry: &DailyPnl) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO daily_pnl (va_id, date, pnl, trades_count)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT(va_id, date) DO UPDATE SET
                pnl = excluded.pnl,
                trades_count = excluded.trades_count
            "#,
        )
        .bind(&entry.va_id)
        .bind(entry.date)
        .bind(entry.pnl)
        .bind(entry.trades_count)
        .execute(&self.database.pool)
        .await
        .context("failed to upsert daily pnl")?;
        Ok(())
    }

    async fn get_daily_pnl(&self, va_id: &str, date: NaiveDate) -> Result<Option<DailyPnl>> {
        let row = sqlx::query("SELECT * FROM daily_pnl WHERE va_id = $1 AND date = $2")
            .bind(va_id)
            .bind(date)
            .fetch_optional(&self.database.pool)
            .await?;
        Ok(match row {
            Some(row) => Some(DailyPnl {
                va_id: row.try_get("va_id")?,
                date: row.try_get("date")?,
                pnl: row.try_get("pnl")?,
                trades_count: row.try_get("trades_count")?,
            }),
            None => None,
        })
    }

    async fn upsert_trade_stats(&self, stats: &TradeStats) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trade_stats (
                va_id, consecutive_wins, consecutive_losses, total_wins, total_losses, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT(va_id) DO UPDATE SET
                consecutive_wins = excluded.consecutive_wins,
                consecutive_losses = excluded.consecutive_losses,
                total_wins = excluded.total_wins,
                total_losses = excluded.total_losses,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&stats.va_id)
        .bind(stats.consecutive_wins)
        .bind(stats.consecutive_losses)
        .bind(stats.total_wins)
        .bind(stats.total_losses)
        .bind(stats.updated_at)
        .execute(&self.database.pool)
        .await
        .context("failed to upsert trade stats")?;
        Ok(())
    }

    async fn get_trade_stats(&self, va_id: &str) -> Result<Option<TradeStats>> {
        let row = sqlx::query("SELECT * FROM trade_stats WHERE va_id = $1")
            .bind(va_id)
            .fetch_optional(&self.database.pool)
            .await?;
        Ok(match row {
            Some(row) => Some(TradeStats {
                va_id: row.try_get("va_id")?,
                consecutive_wins: row.try_get("consecutive_wins")?,
                consecutive_losses: row.try_get("consecutive_losses")?,
                total_wins: row.try_get("total_wins")?,
                total_losses: row.try_get("total_losses")?,
                updated_at: row.try_get("updated_at")?,
            }),
            None => None,
        })
    }

    async fn record_incident(&self, incident: &Incident) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO incidents (
                id, incident_type, severity, description, va_id, symbol,
                order_id, metadata, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&incident.id)
        .bind(incident.incident_type.as_str())
        .bind(incident.severity.as_str())
        .bind(&incident.description)
        .bind(&incident.va_id)
        .bind(&incident.symbol)
        .bind(&incident.order_id)
        .bind(incident.metadata.to_string())
        .bind(incident.created_at)
        .execute(&self.database.pool)
        .await
        .context("failed to record incident")?;
        Ok(())
    }

    async fn recent_incidents(&self, limit: i64) -> Result<Vec<Incident>> {
        let rows = sqlx::query("SELECT * FROM incidents ORDER BY created_at DESC LIMIT $1")
            .bind(limit)
            .fetch_all(&self.database.pool)
            .await?;
        rows.iter().map(row_to_incident).collect()
    }

    async fn record_governor_event(&self, event: &GovernorEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO governor_events (
                id, va_id, symbol, event_type, description, cooldown_ms, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&event.id)
        .bind(&event.va_id)
        .bind(&event.symbol)
        .bind(&event.event_type)
        .bind(&event.description)
        .bind(event.cooldown_ms)
        .bind(event.created_at)
        .execute(&self.database.pool)
        .await
        .context("failed to record governor event")?;
        Ok(())
    }
}
