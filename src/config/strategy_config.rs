//! Breakout strategy configuration.

use super::env;
use crate::application::strategy::TpMode;
use anyhow::Result;

#[derive(Debug, Clone)]
pub struct StrategyEnvConfig {
    pub lookback_candles: usize,
    pub tp_mode: TpMode,
    pub fixed_tp_r: f64,
    pub sl_range_mult: f64,
    pub min_stop_distance: f64,
    pub risk_tag: String,
}

impl StrategyEnvConfig {
    pub fn from_env() -> Result<Self> {
        let tp_mode = match env::parse_string("TP_MODE", "fixed").to_lowercase().as_str() {
            "trailing" => TpMode::Trailing,
            _ => TpMode::Fixed,
        };
        Ok(Self {
            lookback_candles: env::parse_usize("LOOKBACK_CANDLES", 20)?,
            tp_mode,
            fixed_tp_r: env::parse_f64("FIXED_TP_R", 1.8)?,
            sl_range_mult: env::parse_f64("SL_RANGE_MULT", 1.0)?,
            min_stop_distance: env::parse_f64("MIN_STOP_DISTANCE", 0.0)?,
            risk_tag: env::parse_string("RISK_TAG", "vol_breakout_5m_closed"),
        })
    }
}
