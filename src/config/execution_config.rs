//! Execution layer configuration: governor, filters, reconcile cadence.

use super::env;
use anyhow::{Context, Result};
use chrono::NaiveTime;

#[derive(Debug, Clone)]
pub struct ExecutionEnvConfig {
    pub max_loss_cooldown: i64,
    pub cooldown_duration_seconds: u64,
    pub max_spread_bps: f64,
    pub max_slippage_bps: f64,
    pub max_latency_ms: f64,
    pub trading_window_start: NaiveTime,
    pub trading_window_end: NaiveTime,
    pub trading_window_utc_offset_minutes: i32,
    pub reconcile_interval_seconds: u64,
    pub kill_switch_enabled: bool,
    pub max_position_size: f64,
    pub max_open_positions_per_va: usize,
    /// Default protective stop distance in percent of entry.
    pub stop_loss_percentage: f64,
    pub signal_queue_depth: usize,
}

fn parse_window_time(key: &str, default: &str) -> Result<NaiveTime> {
    let raw = env::parse_string(key, default);
    NaiveTime::parse_from_str(&raw, "%H:%M")
        .context(format!("{} must be HH:MM, got '{}'", key, raw))
}

impl ExecutionEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            max_loss_cooldown: env::parse_i64("MAX_LOSS_COOLDOWN", 3)?,
            cooldown_duration_seconds: env::parse_u64("COOLDOWN_DURATION_SECONDS", 300)?,
            max_spread_bps: env::parse_f64("MAX_SPREAD_BPS", 10.0)?,
            max_slippage_bps: env::parse_f64("MAX_SLIPPAGE_BPS", 5.0)?,
            max_latency_ms: env::parse_f64("MAX_LATENCY_MS", 500.0)?,
            trading_window_start: parse_window_time("TRADING_WINDOW_START", "09:30")?,
            trading_window_end: parse_window_time("TRADING_WINDOW_END", "16:00")?,
            trading_window_utc_offset_minutes: env::parse_i32(
                "TRADING_WINDOW_UTC_OFFSET_MINUTES",
                0,
            )?,
            reconcile_interval_seconds: env::parse_u64("RECONCILE_INTERVAL_SECONDS", 5)?,
            kill_switch_enabled: env::parse_bool("KILL_SWITCH_ENABLED", false),
            max_position_size: env::parse_f64("MAX_POSITION_SIZE", 10_000.0)?,
            max_open_positions_per_va: env::parse_usize("MAX_OPEN_POSITIONS_PER_VA", 5)?,
            stop_loss_percentage: env::parse_f64("STOP_LOSS_PERCENTAGE", 2.0)?,
            signal_queue_depth: env::parse_usize("SIGNAL_QUEUE_DEPTH", 256)?,
        })
    }
}
