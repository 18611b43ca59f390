use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Connection pool wrapper; owns schema initialization.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("failed to connect to SQLite database")?;

        info!("connected to database: {}", db_url);

        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS virtual_accounts (
                va_id TEXT PRIMARY KEY,
                balance REAL NOT NULL,
                total_pnl REAL NOT NULL DEFAULT 0.0,
                total_trades INTEGER NOT NULL DEFAULT 0,
                winning_trades INTEGER NOT NULL DEFAULT 0,
                losing_trades INTEGER NOT NULL DEFAULT 0,
                max_drawdown REAL NOT NULL DEFAULT 0.0,
                current_drawdown REAL NOT NULL DEFAULT 0.0,
                consecutive_losses INTEGER NOT NULL DEFAULT 0,
                in_cooldown INTEGER NOT NULL DEFAULT 0,
                cooldown_until TEXT,
                kill_switch INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create virtual_accounts table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                id TEXT PRIMARY KEY,
                va_id TEXT NOT NULL REFERENCES virtual_accounts(va_id),
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                order_type TEXT NOT NULL,
                qty REAL NOT NULL,
                price REAL NOT NULL,
                reduce_only INTEGER NOT NULL DEFAULT 0,
                client_order_id TEXT NOT NULL UNIQUE,
                exchange_order_id TEXT,
                status TEXT NOT NULL,
                filled_qty REAL NOT NULL DEFAULT 0.0,
                stop_loss_price REAL,
                sl_order_id TEXT,
                tp_order_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_orders_symbol ON orders (symbol);
            CREATE INDEX IF NOT EXISTS idx_orders_status ON orders (status);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create orders table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                va_id TEXT NOT NULL REFERENCES virtual_accounts(va_id),
                symbol TEXT NOT NULL,
                qty REAL NOT NULL,
                avg_entry_price REAL NOT NULL,
                current_price REAL NOT NULL DEFAULT 0.0,
                unrealized_pnl REAL NOT NULL DEFAULT 0.0,
                realized_pnl REAL NOT NULL DEFAULT 0.0,
                stop_loss_price REAL,
                opened_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (va_id, symbol)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create positions table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS fills (
                id TEXT PRIMARY KEY,
                order_id TEXT NOT NULL REFERENCES orders(id),
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                qty REAL NOT NULL,
                price REAL NOT NULL,
                fee REAL NOT NULL DEFAULT 0.0,
                fee_asset TEXT NOT NULL DEFAULT 'USDT',
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create fills table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id TEXT PRIMARY KEY,
                va_id TEXT NOT NULL REFERENCES virtual_accounts(va_id),
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                qty REAL NOT NULL,
                price REAL NOT NULL,
                pnl REAL NOT NULL DEFAULT 0.0,
                order_id TEXT NOT NULL,
                executed_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trades_va ON trades (va_id, executed_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create trades table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS equity_snapshots (
                id TEXT PRIMARY KEY,
                va_id TEXT NOT NULL REFERENCES virtual_accounts(va_id),
                virtual_equity REAL NOT NULL,
                peak_equity REAL NOT NULL,
                daily_pnl REAL NOT NULL,
                snapshot_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create equity_snapshots table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS daily_pnl (
                va_id TEXT NOT NULL REFERENCES virtual_accounts(va_id),
                date TEXT NOT NULL,
                pnl REAL NOT NULL DEFAULT 0.0,
                trades_count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (va_id, date)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create daily_pnl table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_stats (
                va_id TEXT PRIMARY KEY REFERENCES virtual_accounts(va_id),
                consecutive_wins INTEGER NOT NULL DEFAULT 0,
                consecutive_losses INTEGER NOT NULL DEFAULT 0,
                total_wins INTEGER NOT NULL DEFAULT 0,
                total_losses INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create trade_stats table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS incidents (
                id TEXT PRIMARY KEY,
                incident_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                description TEXT NOT NULL,
                va_id TEXT,
                symbol TEXT,
                order_id TEXT,
                metadata TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_incidents_created ON incidents (created_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create incidents table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS governor_events (
                id TEXT PRIMARY KEY,
                va_id TEXT NOT NULL,
                symbol TEXT,
                event_type TEXT NOT NULL,
                description TEXT NOT NULL,
                cooldown_ms INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("failed to create governor_events table")?;

        info!("database schema initialized");
        Ok(())
    }
}
