//! Headless multi-account execution engine.
//!
//! Boots the storage, risk, governor, and reconciliation stack, then runs
//! the signal loop until SIGINT/SIGTERM. In mock mode a simulated quote feed
//! drives the breakout strategy so the whole pipeline exercises end to end
//! without touching a live venue.

use anyhow::Result;
use chrono::Utc;
use silotrade::application::execution::{
    EngineConfig, ExecutionLoop, FilterConfig, Governor, GovernorConfig, MarketFilters,
    OrderManager, OrderManagerConfig, SignalContext, SignalRouter,
};
use silotrade::application::reconciliation::Reconciler;
use silotrade::application::risk::{MarketConstraints, RiskConfig, RiskManager};
use silotrade::application::strategy::{StrategyConfig, VolatilityBreakoutStrategy};
use silotrade::config::{Mode, Settings};
use silotrade::domain::account::VirtualAccount;
use silotrade::domain::ports::{ExchangeClient, MarketDataProvider};
use silotrade::domain::repositories::TradeStore;
use silotrade::domain::types::{Candle, OrderPlan};
use silotrade::infrastructure::bybit::{BybitClient, BybitConfig};
use silotrade::infrastructure::persistence::{Database, SqliteStore};
use silotrade::infrastructure::sim::{SimulatedExchange, SimulatedMarketData};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{info, warn, Level};
use tracing_subscriber::prelude::*;

/// Bar length for the mock-mode candle aggregator.
const FEED_BAR_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("silotrade {} starting", env!("CARGO_PKG_VERSION"));

    let settings = Settings::from_env()?;
    info!(
        mode = ?settings.mode,
        symbols = ?settings.symbols,
        accounts = ?settings.virtual_accounts,
        "configuration loaded"
    );

    let database = Database::new(&settings.database_url()).await?;
    let store: Arc<dyn TradeStore> = Arc::new(SqliteStore::new(database));

    seed_accounts(&store, &settings).await?;

    let risk = Arc::new(RwLock::new(build_risk_manager(&store, &settings).await?));

    let (exchange, market_data): (Arc<dyn ExchangeClient>, Arc<dyn MarketDataProvider>) =
        match settings.mode {
            Mode::Mock => (
                Arc::new(SimulatedExchange::new()),
                Arc::new(SimulatedMarketData::default()),
            ),
            Mode::Live => {
                let client = Arc::new(BybitClient::new(BybitConfig {
                    testnet: settings.exchange.testnet,
                    api_key: settings.exchange.api_key.clone(),
                    api_secret: settings.exchange.api_secret.clone(),
                    recv_window: settings.exchange.recv_window,
                    max_retries: settings.exchange.max_retries,
                    retry_delay_ms: settings.exchange.retry_delay_ms,
                    timeout_sec: settings.exchange.timeout_sec,
                })?);
                (client.clone(), client)
            }
        };

    let governor = Arc::new(Governor::new(
        store.clone(),
        GovernorConfig {
            max_loss_cooldown: settings.execution.max_loss_cooldown,
            cooldown_duration: chrono::Duration::seconds(
                settings.execution.cooldown_duration_seconds as i64,
            ),
            max_open_positions_per_va: settings.execution.max_open_positions_per_va,
        },
    ));
    let router = Arc::new(SignalRouter::new(store.clone()));
    let order_manager = Arc::new(OrderManager::new(
        store.clone(),
        exchange.clone(),
        governor.clone(),
        risk.clone(),
        router.clone(),
        OrderManagerConfig {
            stop_loss_percentage: settings.execution.stop_loss_percentage,
            simulate_fills: settings.mode == Mode::Mock,
        },
    ));
    let reconciler = Arc::new(Reconciler::new(exchange.clone(), store.clone(), risk.clone()));
    let filters = Arc::new(MarketFilters::new(FilterConfig {
        max_spread_bps: settings.execution.max_spread_bps,
        max_slippage_bps: settings.execution.max_slippage_bps,
        max_latency_ms: settings.execution.max_latency_ms,
        trading_window_start: settings.execution.trading_window_start,
        trading_window_end: settings.execution.trading_window_end,
        window_utc_offset_minutes: settings.execution.trading_window_utc_offset_minutes,
    }));

    let ctx = SignalContext {
        store: store.clone(),
        router,
        governor,
        filters,
        order_manager,
        risk,
        market_data: market_data.clone(),
        reconciler,
        config: EngineConfig {
            kill_switch_enabled: settings.execution.kill_switch_enabled,
            reconcile_interval: std::time::Duration::from_secs(
                settings.execution.reconcile_interval_seconds,
            ),
            cooldown_duration: chrono::Duration::seconds(
                settings.execution.cooldown_duration_seconds as i64,
            ),
            signal_queue_depth: settings.execution.signal_queue_depth,
        },
    };

    let (execution_loop, signal_tx, running_tx) = ExecutionLoop::new(ctx);
    let loop_handle = tokio::spawn(execution_loop.run());
    info!("execution loop running");

    if settings.mode == Mode::Mock {
        tokio::spawn(run_signal_feed(
            market_data,
            settings.clone(),
            signal_tx.clone(),
            running_tx.subscribe(),
        ));
        info!("mock signal feed running");
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = running_tx.send(false);
    drop(signal_tx);

    let _ = loop_handle.await;
    info!("silotrade stopped");
    Ok(())
}

async fn seed_accounts(store: &Arc<dyn TradeStore>, settings: &Settings) -> Result<()> {
    for va_id in &settings.virtual_accounts {
        if store.get_virtual_account(va_id).await?.is_none() {
            let va = VirtualAccount::new(va_id, settings.allocation_per_va, Utc::now());
            store.create_virtual_account(&va).await?;
            info!(va_id, allocation = settings.allocation_per_va, "virtual account created");
        }
    }
    Ok(())
}

/// The risk manager's in-memory book is rebuilt from storage on boot so a
/// restart mid-position keeps symbol ownership intact.
async fn build_risk_manager(
    store: &Arc<dyn TradeStore>,
    settings: &Settings,
) -> Result<RiskManager> {
    let config = RiskConfig {
        max_daily_loss: settings.risk.max_daily_loss,
        max_drawdown_pct: settings.risk.max_drawdown_pct,
        max_trades_per_day: settings.risk.max_trades_per_day,
        risk_per_trade_pct: settings.risk.risk_per_trade_pct,
        default_leverage: settings.risk.default_leverage,
        max_leverage: settings.risk.max_leverage,
        daily_reset_hour_utc: settings.risk.daily_reset_hour_utc,
        max_symbol_exposure_pct_real_equity: settings.risk.max_symbol_exposure_pct_real_equity,
        constraints: MarketConstraints {
            min_qty: settings.risk.min_qty,
            min_notional: settings.risk.min_notional,
        },
    };
    let mut risk = RiskManager::new(config, settings.risk.real_equity);

    for va_id in &settings.virtual_accounts {
        let equity = store
            .get_virtual_account(va_id)
            .await?
            .map(|va| va.balance)
            .unwrap_or(settings.allocation_per_va);
        risk.register_va(va_id, equity);
    }
    for position in store.positions(None).await? {
        risk.record_position(
            &position.va_id,
            &position.symbol,
            position.qty,
            position.avg_entry_price,
        );
    }
    Ok(risk)
}

/// Mock-mode producer: aggregates simulated quotes into short bars and runs
/// the breakout strategy, one account per symbol in round-robin.
async fn run_signal_feed(
    market_data: Arc<dyn MarketDataProvider>,
    settings: Settings,
    signal_tx: mpsc::Sender<OrderPlan>,
    running: watch::Receiver<bool>,
) {
    let strategy = VolatilityBreakoutStrategy::new(StrategyConfig {
        lookback_candles: settings.strategy.lookback_candles,
        tp_mode: settings.strategy.tp_mode,
        fixed_tp_r: settings.strategy.fixed_tp_r,
        sl_range_mult: settings.strategy.sl_range_mult,
        min_stop_distance: settings.strategy.min_stop_distance,
        risk_tag: settings.strategy.risk_tag.clone(),
    });

    let history_cap = settings.strategy.lookback_candles * 4 + 8;
    let mut history: Vec<VecDeque<Candle>> = settings
        .symbols
        .iter()
        .map(|_| VecDeque::with_capacity(history_cap))
        .collect();

    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
    let mut bar_open: Vec<Option<Candle>> = settings.symbols.iter().map(|_| None).collect();

    loop {
        ticker.tick().await;
        if !*running.borrow() {
            break;
        }

        for (idx, symbol) in settings.symbols.iter().enumerate() {
            let snapshot = match market_data.snapshot(symbol).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(symbol, error = %e, "feed quote failed");
                    continue;
                }
            };
            let price = snapshot.last;
            let now = snapshot.timestamp;

            let bar = bar_open[idx].get_or_insert_with(|| Candle {
                symbol: symbol.clone(),
                open_time: now,
                close_time: now,
                open: price,
                high: price,
                low: price,
                close: price,
            });
            bar.high = bar.high.max(price);
            bar.low = bar.low.min(price);
            bar.close = price;
            bar.close_time = now;

            if (now - bar.open_time).num_seconds() < FEED_BAR_SECS as i64 {
                continue;
            }

            let Some(closed) = bar_open[idx].take() else {
                continue;
            };
            let deque = &mut history[idx];
            if deque.len() == history_cap {
                deque.pop_front();
            }
            deque.push_back(closed);

            let candles: Vec<Candle> = deque.iter().cloned().collect();
            let va_id = &settings.virtual_accounts[idx % settings.virtual_accounts.len()];
            if let Some(plan) = strategy.evaluate(va_id, symbol, Utc::now(), &candles) {
                info!(
                    va_id = %plan.va_id,
                    symbol = %plan.symbol,
                    side = %plan.side,
                    entry = plan.entry_price,
                    "strategy signal"
                );
                if signal_tx.send(plan).await.is_err() {
                    return;
                }
            }
        }
    }
}
