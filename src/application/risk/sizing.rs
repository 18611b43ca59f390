use crate::domain::types::{OrderPlan, RejectReason, Side};

/// Exchange-imposed floors on order size.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarketConstraints {
    pub min_qty: f64,
    pub min_notional: f64,
}

/// Risk-adjusted position sizing.
///
/// Quantity is the per-trade risk budget divided by the per-unit stop
/// distance, capped by leverage, then decayed while the account is on a
/// losing streak. Pure; the risk manager owns all state.
#[derive(Debug, Clone)]
pub struct SizeCalculator {
    risk_per_trade_pct: f64,
    default_leverage: f64,
    max_leverage: f64,
    constraints: MarketConstraints,
}

impl SizeCalculator {
    pub fn new(
        risk_per_trade_pct: f64,
        default_leverage: f64,
        max_leverage: f64,
        constraints: MarketConstraints,
    ) -> Self {
        Self {
            risk_per_trade_pct,
            default_leverage,
            max_leverage,
            constraints,
        }
    }

    /// Loss-decay multiplier. Ties go to the stricter tier.
    fn decay(consecutive_losses: u32) -> f64 {
        if consecutive_losses >= 4 {
            0.25
        } else if consecutive_losses >= 2 {
            0.5
        } else {
            1.0
        }
    }

    /// Signed quantity for the plan, negative for sells.
    pub fn calculate_qty(
        &self,
        plan: &OrderPlan,
        virtual_equity: f64,
        consecutive_losses: u32,
        leverage: Option<f64>,
    ) -> Result<f64, RejectReason> {
        if virtual_equity <= 0.0 {
            return Err(RejectReason::VirtualEquityNonPositive);
        }

        let lev = leverage.unwrap_or(self.default_leverage).min(self.max_leverage);
        if lev <= 0.0 {
            return Err(RejectReason::LeverageNonPositive);
        }

        let stop_loss = plan.stop_loss.ok_or(RejectReason::StopLossRequired)?;
        let resolved_sl = stop_loss.resolved_price(plan.entry_price, plan.side);
        let per_unit_risk = (plan.entry_price - resolved_sl).abs();
        if per_unit_risk <= 0.0 {
            return Err(RejectReason::StopLossDistanceZero);
        }

        let risk_budget = virtual_equity * self.risk_per_trade_pct;
        let raw_qty = risk_budget / per_unit_risk;

        let max_notional = virtual_equity * lev;
        let qty_cap = max_notional / plan.entry_price;

        let mut qty = raw_qty.min(qty_cap);
        qty *= Self::decay(consecutive_losses);

        if qty < self.constraints.min_qty {
            return Err(RejectReason::BelowMinQty);
        }
        if qty * plan.entry_price < self.constraints.min_notional {
            return Err(RejectReason::BelowMinNotional);
        }

        if plan.side == Side::Sell {
            qty = -qty;
        }
        Ok(qty)
    }
}
