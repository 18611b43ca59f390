use crate::application::risk::sizing::{MarketConstraints, SizeCalculator};
use crate::domain::errors::RiskError;
use crate::domain::types::{OrderPlan, RejectReason, ReviewResult, Side};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Absolute magnitude compared against -daily_pnl; 0 disables the check.
    pub max_daily_loss: f64,
    pub max_drawdown_pct: f64,
    pub max_trades_per_day: u32,
    pub risk_per_trade_pct: f64,
    pub default_leverage: f64,
    pub max_leverage: f64,
    pub daily_reset_hour_utc: u32,
    pub max_symbol_exposure_pct_real_equity: f64,
    pub constraints: MarketConstraints,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_daily_loss: 0.0,
            max_drawdown_pct: 0.30,
            max_trades_per_day: 10,
            risk_per_trade_pct: 0.01,
            default_leverage: 3.0,
            max_leverage: 5.0,
            daily_reset_hour_utc: 0,
            max_symbol_exposure_pct_real_equity: 1.0,
            constraints: MarketConstraints::default(),
        }
    }
}

/// Per-account risk state. Virtual equity tracks realized P&L against the
/// allocation; the kill switch latches and is never cleared here.
#[derive(Debug, Clone, PartialEq)]
pub struct VaState {
    pub virtual_equity: f64,
    pub peak_virtual_equity: f64,
    pub daily_pnl: f64,
    pub daily_trades: u32,
    pub day_id: Option<NaiveDate>,
    pub consecutive_losses: u32,
    pub kill_switch: bool,
}

impl VaState {
    fn new(virtual_equity: f64) -> Self {
        Self {
            virtual_equity,
            peak_virtual_equity: virtual_equity,
            daily_pnl: 0.0,
            daily_trades: 0,
            day_id: None,
            consecutive_losses: 0,
            kill_switch: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct BookPosition {
    va_id: String,
    symbol: String,
    qty: f64,
    avg_entry_price: f64,
}

impl BookPosition {
    fn notional(&self) -> f64 {
        self.qty.abs() * self.avg_entry_price
    }

    fn side(&self) -> Option<Side> {
        if self.qty > 0.0 {
            Some(Side::Buy)
        } else if self.qty < 0.0 {
            Some(Side::Sell)
        } else {
            None
        }
    }
}

/// Central pre-trade gate and the authoritative in-memory view of VA state,
/// open positions, and symbol ownership.
///
/// Synchronous; callers share it behind a single async lock so every
/// review/record is atomic with respect to the maps.
pub struct RiskManager {
    config: RiskConfig,
    real_equity: f64,
    sizer: SizeCalculator,
    va: HashMap<String, VaState>,
    positions: HashMap<(String, String), BookPosition>,
    symbol_owner: HashMap<String, String>,
    blocked_until: HashMap<(String, String), DateTime<Utc>>,
}

impl RiskManager {
    pub fn new(config: RiskConfig, real_equity: f64) -> Self {
        let sizer = SizeCalculator::new(
            config.risk_per_trade_pct,
            config.default_leverage,
            config.max_leverage,
            config.constraints,
        );
        Self {
            config,
            real_equity,
            sizer,
            va: HashMap::new(),
            positions: HashMap::new(),
            symbol_owner: HashMap::new(),
            blocked_until: HashMap::new(),
        }
    }

    pub fn register_va(&mut self, va_id: &str, virtual_equity: f64) {
        self.va.insert(va_id.to_string(), VaState::new(virtual_equity));
    }

    pub fn is_registered(&self, va_id: &str) -> bool {
        self.va.contains_key(va_id)
    }

    pub fn va_state(&self, va_id: &str) -> Option<&VaState> {
        self.va.get(va_id)
    }

    pub fn kill_switch(&self, va_id: &str) -> Result<bool, RiskError> {
        self.va
            .get(va_id)
            .map(|st| st.kill_switch)
            .ok_or_else(|| RiskError::VaNotRegistered(va_id.to_string()))
    }

    pub fn symbol_owner(&self, symbol: &str) -> Option<&str> {
        self.symbol_owner.get(symbol).map(|s| s.as_str())
    }

    pub fn position_qty(&self, va_id: &str, symbol: &str) -> Option<(f64, f64)> {
        self.positions
            .get(&(va_id.to_string(), symbol.to_string()))
            .map(|p| (p.qty, p.avg_entry_price))
    }

    /// Bar the (VA, symbol) pair from new entries until now + cooldown.
    pub fn apply_governor_breach(
        &mut self,
        va_id: &str,
        symbol: &str,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) {
        self.blocked_until
            .insert((va_id.to_string(), symbol.to_string()), now + cooldown);
    }

    /// Fold a realized trade result into the account. Latches the kill
    /// switch on max drawdown or non-positive equity.
    pub fn record_trade_pnl(
        &mut self,
        va_id: &str,
        symbol: &str,
        pnl: f64,
        now: DateTime<Utc>,
    ) -> Result<(), RiskError> {
        let day_id = self.day_id(now);
        let max_drawdown_pct = self.config.max_drawdown_pct;
        let st = self
            .va
            .get_mut(va_id)
            .ok_or_else(|| RiskError::VaNotRegistered(va_id.to_string()))?;
        Self::roll_day(st, day_id);

        st.virtual_equity += pnl;
        st.daily_pnl += pnl;

        if pnl < 0.0 {
            st.consecutive_losses += 1;
        } else {
            st.consecutive_losses = 0;
        }

        st.peak_virtual_equity = st.peak_virtual_equity.max(st.virtual_equity);
        if st.peak_virtual_equity > 0.0 {
            let drawdown = 1.0 - (st.virtual_equity / st.peak_virtual_equity);
            if drawdown >= max_drawdown_pct {
                st.kill_switch = true;
                warn!(
                    va_id,
                    symbol,
                    drawdown_pct = drawdown * 100.0,
                    "kill switch latched: max drawdown breached"
                );
            }
        }

        if st.virtual_equity <= 0.0 {
            st.kill_switch = true;
            warn!(va_id, symbol, "kill switch latched: virtual equity exhausted");
        }

        Ok(())
    }

    /// Upsert the book from a fill. A zero quantity removes the position and
    /// releases symbol ownership when no other live position remains.
    pub fn record_position(
        &mut self,
        va_id: &str,
        symbol: &str,
        qty: f64,
        avg_entry_price: f64,
    ) {
        let key = (va_id.to_string(), symbol.to_string());
        if qty == 0.0 {
            self.positions.remove(&key);
            let owned_by_va = self.symbol_owner.get(symbol).map(|o| o == va_id).unwrap_or(false);
            if owned_by_va && !self.any_position_for_symbol(symbol) {
                self.symbol_owner.remove(symbol);
            }
            return;
        }

        self.positions.insert(
            key,
            BookPosition {
                va_id: va_id.to_string(),
                symbol: symbol.to_string(),
                qty,
                avg_entry_price,
            },
        );
        self.symbol_owner
            .insert(symbol.to_string(), va_id.to_string());
    }

    /// Gatekeeper. Checks run in a fixed order and the first failure wins;
    /// with `reserve` the approval also consumes a daily trade slot and
    /// claims the symbol.
    pub fn review_orderplan(
        &mut self,
        plan: &OrderPlan,
        now: DateTime<Utc>,
        reserve: bool,
    ) -> Result<ReviewResult, RiskError> {
        let day_id = self.day_id(now);
        if !self.va.contains_key(&plan.va_id) {
            return Err(RiskError::VaNotRegistered(plan.va_id.clone()));
        }

        {
            let st = self.va.get_mut(&plan.va_id).expect("checked above");
            Self::roll_day(st, day_id);
        }
        let st = self.va.get(&plan.va_id).expect("checked above");

        if st.kill_switch {
            return Ok(ReviewResult::Rejected {
                reason: RejectReason::KillSwitch,
            });
        }

        let stop_loss = match plan.stop_loss {
            Some(spec) => spec,
            None => {
                return Ok(ReviewResult::Rejected {
                    reason: RejectReason::StopLossRequired,
                });
            }
        };

        if stop_loss.is_fixed() && plan.take_profit.is_none() {
            return Ok(ReviewResult::Rejected {
                reason: RejectReason::TakeProfitRequiredForFixed,
            });
        }

        let block_key = (plan.va_id.clone(), plan.symbol.clone());
        if let Some(until) = self.blocked_until.get(&block_key)
            && now < *until
        {
            return Ok(ReviewResult::Rejected {
                reason: RejectReason::CooldownActive,
            });
        }

        if self.config.max_daily_loss > 0.0 && -st.daily_pnl >= self.config.max_daily_loss {
            return Ok(ReviewResult::Rejected {
                reason: RejectReason::MaxDailyLoss,
            });
        }

        if st.daily_trades >= self.config.max_trades_per_day {
            return Ok(ReviewResult::Rejected {
                reason: RejectReason::MaxTradesPerDay,
            });
        }

        if let Some(owner) = self.symbol_owner.get(&plan.symbol)
            && owner != &plan.va_id
        {
            return Ok(ReviewResult::Rejected {
                reason: RejectReason::SymbolOwnedByOtherVa,
            });
        }

        if let Some(pos) = self.positions.get(&block_key)
            && let Some(side) = pos.side()
            && side != plan.side
        {
            return Ok(ReviewResult::Rejected {
                reason: RejectReason::OpposingExposureNotAllowed,
            });
        }

        let qty = match self.sizer.calculate_qty(
            plan,
            st.virtual_equity,
            st.consecutive_losses,
            None,
        ) {
            Ok(qty) => qty,
            Err(reason) => return Ok(ReviewResult::Rejected { reason }),
        };

        if self.would_breach_symbol_exposure_cap(&plan.symbol, qty.abs() * plan.entry_price) {
            return Ok(ReviewResult::Rejected {
                reason: RejectReason::NetExposureCap,
            });
        }

        if reserve {
            let st = self.va.get_mut(&plan.va_id).expect("checked above");
            st.daily_trades += 1;
            self.symbol_owner
                .entry(plan.symbol.clone())
                .or_insert_with(|| plan.va_id.clone());
            info!(
                va_id = %plan.va_id,
                symbol = %plan.symbol,
                side = %plan.side,
                qty,
                "order plan approved"
            );
        }

        Ok(ReviewResult::Approved { qty })
    }

    fn would_breach_symbol_exposure_cap(&self, symbol: &str, add_notional: f64) -> bool {
        if self.config.max_symbol_exposure_pct_real_equity <= 0.0 {
            return true;
        }
        let cap = self.real_equity * self.config.max_symbol_exposure_pct_real_equity;
        if cap <= 0.0 {
            return true;
        }
        let existing: f64 = self
            .positions
            .values()
            .filter(|p| p.symbol == symbol)
            .map(BookPosition::notional)
            .sum();
        existing + add_notional > cap
    }

    fn any_position_for_symbol(&self, symbol: &str) -> bool {
        self.positions
            .values()
            .any(|p| p.symbol == symbol && p.qty != 0.0)
    }

    /// Trading day identifier: UTC shifted back by the reset hour, so a
    /// reset hour of 8 rolls the day at 08:00 UTC.
    fn day_id(&self, now: DateTime<Utc>) -> NaiveDate {
        (now - Duration::hours(self.config.daily_reset_hour_utc as i64)).date_naive()
    }

    fn roll_day(st: &mut VaState, day_id: NaiveDate) {
        match st.day_id {
            None => st.day_id = Some(day_id),
            Some(current) if current != day_id => {
                st.day_id = Some(day_id);
                st.daily_pnl = 0.0;
                st.daily_trades = 0;
            }
            Some(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{EntryType, StopLossSpec, TakeProfitSpec};
    use chrono::TimeZone;

    fn plan(va: &str, symbol: &str, side: Side) -> OrderPlan {
        OrderPlan {
            va_id: va.to_string(),
            symbol: symbol.to_string(),
            side,
            entry_type: EntryType::Market,
            entry_price: 100.0,
            risk_tag: "test".to_string(),
            stop_loss: Some(StopLossSpec::Fixed { price: 99.0 }),
            take_profit: Some(TakeProfitSpec { price: 102.0 }),
        }
    }

    fn manager() -> RiskManager {
        let mut rm = RiskManager::new(RiskConfig::default(), 10_000.0);
        rm.register_va("VA001", 1000.0);
        rm
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, h, m, 0).unwrap()
    }

    #[test]
    fn unregistered_va_is_an_invariant_violation() {
        let mut rm = manager();
        let err = rm
            .review_orderplan(&plan("VA999", "BTCUSDT", Side::Buy), at(12, 0), false)
            .unwrap_err();
        assert_eq!(err, RiskError::VaNotRegistered("VA999".to_string()));
    }

    #[test]
    fn missing_stop_loss_rejects_before_missing_take_profit() {
        let mut rm = manager();
        let mut p = plan("VA001", "BTCUSDT", Side::Buy);
        p.stop_loss = None;
        p.take_profit = None;
        let result = rm.review_orderplan(&p, at(12, 0), false).unwrap();
        assert_eq!(result.reason(), Some(RejectReason::StopLossRequired));
    }

    #[test]
    fn fixed_stop_requires_take_profit() {
        let mut rm = manager();
        let mut p = plan("VA001", "BTCUSDT", Side::Buy);
        p.take_profit = None;
        let result = rm.review_orderplan(&p, at(12, 0), false).unwrap();
        assert_eq!(
            result.reason(),
            Some(RejectReason::TakeProfitRequiredForFixed)
        );
    }

    #[test]
    fn trailing_stop_needs_no_take_profit() {
        let mut rm = manager();
        let mut p = plan("VA001", "BTCUSDT", Side::Buy);
        p.stop_loss = Some(StopLossSpec::Trailing { trail_by: 1.0 });
        p.take_profit = None;
        let result = rm.review_orderplan(&p, at(12, 0), false).unwrap();
        assert!(result.is_approved());
    }

    #[test]
    fn kill_switch_shadows_every_other_reject() {
        let mut rm = manager();
        // Exhaust equity: kill switch latches.
        rm.record_trade_pnl("VA001", "BTCUSDT", -1000.0, at(12, 0)).unwrap();
        let mut p = plan("VA001", "BTCUSDT", Side::Buy);
        p.stop_loss = None;
        let result = rm.review_orderplan(&p, at(12, 1), false).unwrap();
        assert_eq!(result.reason(), Some(RejectReason::KillSwitch));
    }

    #[test]
    fn cooldown_blocks_until_expiry() {
        let mut rm = manager();
        rm.apply_governor_breach("VA001", "BTCUSDT", at(12, 0), Duration::minutes(5));

        let blocked = rm
            .review_orderplan(&plan("VA001", "BTCUSDT", Side::Buy), at(12, 4), false)
            .unwrap();
        assert_eq!(blocked.reason(), Some(RejectReason::CooldownActive));

        let clear = rm
            .review_orderplan(&plan("VA001", "BTCUSDT", Side::Buy), at(12, 5), false)
            .unwrap();
        assert!(clear.is_approved());
    }

    #[test]
    fn review_without_reserve_is_idempotent() {
        let mut rm = manager();
        let p = plan("VA001", "BTCUSDT", Side::Buy);
        let first = rm.review_orderplan(&p, at(12, 0), false).unwrap();
        let second = rm.review_orderplan(&p, at(12, 0), false).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn opposing_exposure_is_rejected() {
        let mut rm = manager();
        rm.record_position("VA001", "BTCUSDT", 1.0, 100.0);
        let result = rm
            .review_orderplan(&plan("VA001", "BTCUSDT", Side::Sell), at(12, 0), false)
            .unwrap();
        assert_eq!(
            result.reason(),
            Some(RejectReason::OpposingExposureNotAllowed)
        );
    }

    #[test]
    fn flat_position_releases_symbol_ownership() {
        let mut rm = manager();
        rm.register_va("VA002", 1000.0);
        rm.record_position("VA001", "BTCUSDT", 1.0, 100.0);
        assert_eq!(rm.symbol_owner("BTCUSDT"), Some("VA001"));

        rm.record_position("VA001", "BTCUSDT", 0.0, 100.0);
        assert_eq!(rm.symbol_owner("BTCUSDT"), None);

        let result = rm
            .review_orderplan(&plan("VA002", "BTCUSDT", Side::Buy), at(12, 0), false)
            .unwrap();
        assert!(result.is_approved());
    }

    #[test]
    fn zero_exposure_cap_blocks_everything() {
        let mut config = RiskConfig::default();
        config.max_symbol_exposure_pct_real_equity = 0.0;
        let mut rm = RiskManager::new(config, 10_000.0);
        rm.register_va("VA001", 1000.0);
        let result = rm
            .review_orderplan(&plan("VA001", "BTCUSDT", Side::Buy), at(12, 0), false)
            .unwrap();
        assert_eq!(result.reason(), Some(RejectReason::NetExposureCap));
    }
}
