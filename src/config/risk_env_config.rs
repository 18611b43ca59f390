//! Risk layer configuration: sizing, leverage caps, daily limits, exposure.

use super::env;
use anyhow::Result;

#[derive(Debug, Clone)]
pub struct RiskEnvConfig {
    pub risk_per_trade_pct: f64,
    pub default_leverage: f64,
    pub max_leverage: f64,
    pub max_drawdown_pct: f64,
    /// Absolute loss magnitude; 0 disables the daily-loss gate.
    pub max_daily_loss: f64,
    pub max_trades_per_day: u32,
    pub daily_reset_hour_utc: u32,
    pub max_symbol_exposure_pct_real_equity: f64,
    pub min_qty: f64,
    pub min_notional: f64,
    /// Actual account equity backing all silos combined.
    pub real_equity: f64,
}

impl RiskEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            risk_per_trade_pct: env::parse_f64("RISK_PER_TRADE_PCT", 0.01)?,
            default_leverage: env::parse_f64("DEFAULT_LEVERAGE", 3.0)?,
            max_leverage: env::parse_f64("MAX_LEVERAGE", 5.0)?,
            max_drawdown_pct: env::parse_f64("MAX_DRAWDOWN_PCT", 0.30)?,
            max_daily_loss: env::parse_f64("MAX_DAILY_LOSS", 0.0)?,
            max_trades_per_day: env::parse_u32("MAX_TRADES_PER_DAY", 10)?,
            daily_reset_hour_utc: env::parse_u32("DAILY_RESET_HOUR_UTC", 0)?,
            max_symbol_exposure_pct_real_equity: env::parse_f64(
                "MAX_SYMBOL_EXPOSURE_PCT_REAL_EQUITY",
                1.0,
            )?,
            min_qty: env::parse_f64("MIN_QTY", 0.0)?,
            min_notional: env::parse_f64("MIN_NOTIONAL", 0.0)?,
            real_equity: env::parse_f64("REAL_EQUITY", 10_000.0)?,
        })
    }
}
