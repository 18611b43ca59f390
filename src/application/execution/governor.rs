use crate::domain::account::{GovernorEvent, TradeStats};
use crate::domain::repositories::TradeStore;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Outcome of a governor gate. `CooldownActivated` tells the caller to
/// propagate the breach into the risk manager's blocked-until map.
#[derive(Debug, Clone, PartialEq)]
pub enum GovernorDecision {
    Allow,
    Deny { reason: String },
    CooldownActivated { reason: String, until: DateTime<Utc> },
}

impl GovernorDecision {
    pub fn is_allow(&self) -> bool {
        matches!(self, GovernorDecision::Allow)
    }
}

#[derive(Debug, Clone)]
pub struct GovernorConfig {
    /// Consecutive losses before a cooldown activates.
    pub max_loss_cooldown: i64,
    pub cooldown_duration: Duration,
    pub max_open_positions_per_va: usize,
}

/// Per-account short-horizon protection, complementary to the risk
/// manager's portfolio invariants. Operates on the durable account rows so
/// cooldown state survives restarts.
pub struct Governor {
    store: Arc<dyn TradeStore>,
    config: GovernorConfig,
}

impl Governor {
    pub fn new(store: Arc<dyn TradeStore>, config: GovernorConfig) -> Self {
        Self { store, config }
    }

    pub async fn can_trade(&self, va_id: &str, now: DateTime<Utc>) -> Result<GovernorDecision> {
        let Some(mut va) = self.store.get_virtual_account(va_id).await? else {
            return Ok(GovernorDecision::Deny {
                reason: format!("virtual account {} not found", va_id),
            });
        };

        if va.in_cooldown {
            if let Some(until) = va.cooldown_until
                && now < until
            {
                let remaining = (until - now).num_seconds();
                return Ok(GovernorDecision::Deny {
                    reason: format!("in cooldown for {}s due to consecutive losses", remaining),
                });
            }
            // Cooldown served; clear it and forgive the streak.
            va.in_cooldown = false;
            va.cooldown_until = None;
            va.consecutive_losses = 0;
            va.updated_at = now;
            self.store.update_virtual_account(&va).await?;
            info!(va_id, "cooldown expired, account re-enabled");
        }

        if va.consecutive_losses >= self.config.max_loss_cooldown {
            let until = now + self.config.cooldown_duration;
            va.in_cooldown = true;
            va.cooldown_until = Some(until);
            va.updated_at = now;
            self.store.update_virtual_account(&va).await?;

            let event = GovernorEvent {
                id: Uuid::new_v4().to_string(),
                va_id: va_id.to_string(),
                symbol: None,
                event_type: "loss_cooldown".to_string(),
                description: format!(
                    "cooldown activated after {} consecutive losses",
                    va.consecutive_losses
                ),
                cooldown_ms: self.config.cooldown_duration.num_milliseconds(),
                created_at: now,
            };
            self.store.record_governor_event(&event).await?;
            warn!(
                va_id,
                losses = va.consecutive_losses,
                until = %until,
                "loss cooldown activated"
            );

            return Ok(GovernorDecision::CooldownActivated {
                reason: format!(
                    "cooldown activated: {} consecutive losses",
                    va.consecutive_losses
                ),
                until,
            });
        }

        Ok(GovernorDecision::Allow)
    }

    pub async fn check_throttle(&self, va_id: &str) -> Result<GovernorDecision> {
        let positions = self.store.positions(Some(va_id)).await?;
        if positions.len() >= self.config.max_open_positions_per_va {
            return Ok(GovernorDecision::Deny {
                reason: format!(
                    "max positions ({}) reached",
                    self.config.max_open_positions_per_va
                ),
            });
        }
        Ok(GovernorDecision::Allow)
    }

    /// Fold a realized result into the account totals. Wins reset the loss
    /// streak and the running drawdown; losses extend both.
    pub async fn record_trade_result(
        &self,
        va_id: &str,
        pnl: f64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let Some(mut va) = self.store.get_virtual_account(va_id).await? else {
            warn!(va_id, "trade result for unknown account dropped");
            return Ok(());
        };

        va.total_trades += 1;
        va.total_pnl += pnl;
        va.balance += pnl;

        if pnl > 0.0 {
            va.winning_trades += 1;
            va.consecutive_losses = 0;
            if va.current_drawdown < 0.0 {
                va.current_drawdown = 0.0;
            }
        } else {
            va.losing_trades += 1;
            va.consecutive_losses += 1;
            va.current_drawdown += pnl;
            if va.current_drawdown < va.max_drawdown {
                va.max_drawdown = va.current_drawdown;
            }
        }
        va.updated_at = now;
        self.store.update_virtual_account(&va).await?;

        let stats = match self.store.get_trade_stats(va_id).await? {
            Some(mut stats) => {
                if pnl > 0.0 {
                    stats.consecutive_wins += 1;
                    stats.consecutive_losses = 0;
                    stats.total_wins += 1;
                } else {
                    stats.consecutive_wins = 0;
                    stats.consecutive_losses += 1;
                    stats.total_losses += 1;
                }
                stats.updated_at = now;
                stats
            }
            None => TradeStats {
                va_id: va_id.to_string(),
                consecutive_wins: if pnl > 0.0 { 1 } else { 0 },
                consecutive_losses: if pnl > 0.0 { 0 } else { 1 },
                total_wins: if pnl > 0.0 { 1 } else { 0 },
                total_losses: if pnl > 0.0 { 0 } else { 1 },
                updated_at: now,
            },
        };
        self.store.upsert_trade_stats(&stats).await?;

        Ok(())
    }
}
