use crate::application::execution::filters::MarketFilters;
use crate::application::execution::governor::{Governor, GovernorDecision};
use crate::application::execution::order_manager::OrderManager;
use crate::application::execution::signal_router::{RouteDecision, SignalRouter};
use crate::application::reconciliation::Reconciler;
use crate::application::risk::RiskManager;
use crate::domain::account::{Incident, IncidentType, Severity};
use crate::domain::errors::RiskError;
use crate::domain::ports::MarketDataProvider;
use crate::domain::repositories::TradeStore;
use crate::domain::types::{OrderPlan, ReviewResult};
use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// How often the position monitor re-prices open positions.
const MONITOR_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Operator-level kill switch: every signal is dropped while set.
    pub kill_switch_enabled: bool,
    pub reconcile_interval: Duration,
    /// Cooldown pushed into the risk manager when the governor trips.
    pub cooldown_duration: ChronoDuration,
    pub signal_queue_depth: usize,
}

/// Everything a signal needs on its way to the exchange. Cheap to clone;
/// each background task carries its own copy.
#[derive(Clone)]
pub struct SignalContext {
    pub store: Arc<dyn TradeStore>,
    pub router: Arc<SignalRouter>,
    pub governor: Arc<Governor>,
    pub filters: Arc<MarketFilters>,
    pub order_manager: Arc<OrderManager>,
    pub risk: Arc<RwLock<RiskManager>>,
    pub market_data: Arc<dyn MarketDataProvider>,
    pub reconciler: Arc<Reconciler>,
    pub config: EngineConfig,
}

impl SignalContext {
    /// Gate sequence for one signal. A rejection at any gate drops the
    /// signal with a log line; errors are contained by the caller.
    pub async fn handle_signal(&self, plan: OrderPlan) -> Result<()> {
        let now = Utc::now();

        if self.config.kill_switch_enabled {
            warn!(va_id = %plan.va_id, "kill switch enabled, signal dropped");
            return Ok(());
        }

        match self.router.can_trade_symbol(&plan.va_id, &plan.symbol).await? {
            RouteDecision::Accept => {}
            RouteDecision::Reject { claimed_symbol } => {
                info!(
                    va_id = %plan.va_id,
                    symbol = %plan.symbol,
                    claimed = %claimed_symbol,
                    "signal rejected: account already trading another symbol"
                );
                return Ok(());
            }
        }

        match self.governor.can_trade(&plan.va_id, now).await? {
            GovernorDecision::Allow => {}
            GovernorDecision::Deny { reason } => {
                info!(va_id = %plan.va_id, reason, "governor rejected signal");
                return Ok(());
            }
            GovernorDecision::CooldownActivated { reason, .. } => {
                self.risk.write().await.apply_governor_breach(
                    &plan.va_id,
                    &plan.symbol,
                    now,
                    self.config.cooldown_duration,
                );
                warn!(va_id = %plan.va_id, reason, "governor cooldown activated");
                return Ok(());
            }
        }

        match self.governor.check_throttle(&plan.va_id).await? {
            GovernorDecision::Allow => {}
            decision => {
                info!(va_id = %plan.va_id, ?decision, "throttle rejected signal");
                return Ok(());
            }
        }

        let snapshot = self.market_data.snapshot(&plan.symbol).await?;
        let verdict = self
            .filters
            .check_all(&snapshot, Some(plan.entry_price), now);
        if let crate::application::execution::filters::FilterVerdict::Fail { reason } = verdict {
            info!(va_id = %plan.va_id, symbol = %plan.symbol, reason, "filters rejected signal");
            return Ok(());
        }

        let review = {
            let mut risk = self.risk.write().await;
            risk.review_orderplan(&plan, now, true)
        };
        let qty = match review {
            Ok(ReviewResult::Approved { qty }) => qty,
            Ok(ReviewResult::Rejected { reason }) => {
                info!(
                    va_id = %plan.va_id,
                    symbol = %plan.symbol,
                    reason = reason.as_str(),
                    "risk manager rejected signal"
                );
                return Ok(());
            }
            Err(RiskError::VaNotRegistered(va_id)) => {
                error!(va_id, "signal for unregistered account dropped");
                let incident = Incident::new(
                    IncidentType::VaNotRegistered,
                    Severity::High,
                    format!("signal for unregistered account {}", va_id),
                    now,
                )
                .with_va(va_id)
                .with_symbol(&plan.symbol);
                self.store.record_incident(&incident).await?;
                return Ok(());
            }
        };

        self.order_manager.submit_order(&plan, qty, now).await?;
        Ok(())
    }

    /// Re-price every open position and fire stops that have triggered.
    pub async fn monitor_positions(&self) -> Result<()> {
        let positions = self.store.positions(None).await?;

        for mut position in positions {
            let snapshot = match self.market_data.snapshot(&position.symbol).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(symbol = %position.symbol, error = %e, "quote fetch failed");
                    continue;
                }
            };
            let price = snapshot.last;

            position.current_price = price;
            position.unrealized_pnl = if position.qty > 0.0 {
                (price - position.avg_entry_price) * position.qty
            } else {
                (position.avg_entry_price - price) * position.qty.abs()
            };
            position.updated_at = Utc::now();
            self.store.upsert_position(&position).await?;

            if OrderManager::check_stop_loss(&position, price) {
                warn!(
                    va_id = %position.va_id,
                    symbol = %position.symbol,
                    price,
                    stop = position.stop_loss_price,
                    "stop-loss triggered"
                );
                if let Err(e) = self
                    .order_manager
                    .submit_position_close(&position, price, Utc::now())
                    .await
                {
                    error!(
                        va_id = %position.va_id,
                        symbol = %position.symbol,
                        error = %e,
                        "stop-loss close submission failed"
                    );
                }
            }
        }
        Ok(())
    }
}

/// Long-lived coordinator: one signal consumer plus the reconcile and
/// position-monitor tickers, all checking the same running flag.
pub struct ExecutionLoop {
    ctx: SignalContext,
    signal_rx: mpsc::Receiver<OrderPlan>,
    running_rx: watch::Receiver<bool>,
}

impl ExecutionLoop {
    /// Build the loop plus the handles the rest of the process uses to feed
    /// signals and request shutdown.
    pub fn new(
        ctx: SignalContext,
    ) -> (Self, mpsc::Sender<OrderPlan>, watch::Sender<bool>) {
        let (signal_tx, signal_rx) = mpsc::channel(ctx.config.signal_queue_depth);
        let (running_tx, running_rx) = watch::channel(true);
        (
            Self {
                ctx,
                signal_rx,
                running_rx,
            },
            signal_tx,
            running_tx,
        )
    }

    pub async fn run(self) {
        let ExecutionLoop {
            ctx,
            mut signal_rx,
            running_rx,
        } = self;

        let consumer: JoinHandle<()> = {
            let ctx = ctx.clone();
            let mut running = running_rx.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        maybe_plan = signal_rx.recv() => {
                            match maybe_plan {
                                Some(plan) => {
                                    if let Err(e) = ctx.handle_signal(plan).await {
                                        // One bad signal must never kill the loop.
                                        error!(error = %e, "signal processing failed");
                                    }
                                }
                                None => break,
                            }
                        }
                        _ = running.changed() => {
                            if !*running.borrow() {
                                break;
                            }
                        }
                    }
                }
                info!("signal consumer stopped");
            })
        };

        let reconcile_ticker: JoinHandle<()> = {
            let ctx = ctx.clone();
            let running = running_rx.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(ctx.config.reconcile_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if !*running.borrow() {
                        break;
                    }
                    if let Err(e) = ctx.order_manager.reconcile_orders(Utc::now()).await {
                        error!(error = %e, "stale-order sweep failed");
                    }
                    if let Err(e) = ctx.reconciler.reconcile_orders().await {
                        error!(error = %e, "order reconcile failed");
                    }
                    if let Err(e) = ctx.reconciler.reconcile_positions(Utc::now()).await {
                        error!(error = %e, "position reconcile failed");
                    }
                }
                info!("reconcile ticker stopped");
            })
        };

        let monitor_ticker: JoinHandle<()> = {
            let ctx = ctx.clone();
            let running = running_rx.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(MONITOR_INTERVAL);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if !*running.borrow() {
                        break;
                    }
                    if let Err(e) = ctx.monitor_positions().await {
                        error!(error = %e, "position monitor pass failed");
                    }
                }
                info!("position monitor stopped");
            })
        };

        join_all([consumer, reconcile_ticker, monitor_ticker]).await;
        info!("execution loop stopped");
    }
}
