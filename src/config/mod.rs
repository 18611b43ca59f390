//! Process configuration.
//!
//! Loaded once from environment variables (with `.env` support via dotenvy in
//! main) and threaded through constructors; read-only after first load.

mod env;
mod exchange_config;
mod execution_config;
mod risk_env_config;
mod strategy_config;

pub use exchange_config::ExchangeEnvConfig;
pub use execution_config::ExecutionEnvConfig;
pub use risk_env_config::RiskEnvConfig;
pub use strategy_config::StrategyEnvConfig;

use anyhow::Result;
use std::str::FromStr;

/// Execution mode: simulated exchange + quote feed, or live Bybit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Mock,
    Live,
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mock" => Ok(Mode::Mock),
            "live" => Ok(Mode::Live),
            _ => anyhow::bail!("invalid MODE: {}. Must be 'mock' or 'live'", s),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub mode: Mode,
    pub database_path: String,
    pub symbols: Vec<String>,
    pub virtual_accounts: Vec<String>,
    /// Equity assigned to each silo at startup.
    pub allocation_per_va: f64,
    pub exchange: ExchangeEnvConfig,
    pub risk: RiskEnvConfig,
    pub execution: ExecutionEnvConfig,
    pub strategy: StrategyEnvConfig,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let mode = Mode::from_str(&env::parse_string("MODE", "mock"))?;
        let settings = Self {
            mode,
            database_path: env::parse_string("DATABASE_PATH", "trading.db"),
            symbols: env::parse_list("SYMBOLS", "BTCUSDT,ETHUSDT"),
            virtual_accounts: env::parse_list("VIRTUAL_ACCOUNTS", "VA001,VA002,VA003"),
            allocation_per_va: env::parse_f64("ALLOCATION_PER_VA", 1000.0)?,
            exchange: ExchangeEnvConfig::from_env()?,
            risk: RiskEnvConfig::from_env()?,
            execution: ExecutionEnvConfig::from_env()?,
            strategy: StrategyEnvConfig::from_env()?,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.risk.max_daily_loss < 0.0 {
            anyhow::bail!("MAX_DAILY_LOSS must be zero (disabled) or positive");
        }
        if self.risk.max_leverage <= 0.0 || self.risk.default_leverage <= 0.0 {
            anyhow::bail!("leverage settings must be positive");
        }
        if self.risk.risk_per_trade_pct <= 0.0 {
            anyhow::bail!("RISK_PER_TRADE_PCT must be positive");
        }
        if self.risk.real_equity <= 0.0 {
            anyhow::bail!("REAL_EQUITY must be positive");
        }
        if self.virtual_accounts.is_empty() {
            anyhow::bail!("VIRTUAL_ACCOUNTS must name at least one account");
        }
        if self.mode == Mode::Live && self.exchange.api_key.is_empty() {
            anyhow::bail!("API_KEY is required in live mode");
        }
        Ok(())
    }

    pub fn database_url(&self) -> String {
        format!("sqlite://{}", self.database_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::risk::MarketConstraints;
    use crate::application::strategy::TpMode;
    use chrono::NaiveTime;

    /// Baseline settings for tests that do not want env coupling.
    pub(crate) fn test_settings() -> Settings {
        Settings {
            mode: Mode::Mock,
            database_path: ":memory:".to_string(),
            symbols: vec!["BTCUSDT".to_string()],
            virtual_accounts: vec!["VA001".to_string()],
            allocation_per_va: 1000.0,
            exchange: ExchangeEnvConfig {
                testnet: true,
                api_key: String::new(),
                api_secret: String::new(),
                recv_window: 5000,
                max_retries: 3,
                retry_delay_ms: 100,
                timeout_sec: 10,
            },
            risk: RiskEnvConfig {
                risk_per_trade_pct: 0.01,
                default_leverage: 3.0,
                max_leverage: 5.0,
                max_drawdown_pct: 0.30,
                max_daily_loss: 0.0,
                max_trades_per_day: 10,
                daily_reset_hour_utc: 0,
                max_symbol_exposure_pct_real_equity: 1.0,
                min_qty: 0.0,
                min_notional: 0.0,
                real_equity: 10_000.0,
            },
            execution: ExecutionEnvConfig {
                max_loss_cooldown: 3,
                cooldown_duration_seconds: 300,
                max_spread_bps: 10.0,
                max_slippage_bps: 5.0,
                max_latency_ms: 500.0,
                trading_window_start: NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
                trading_window_end: NaiveTime::from_hms_opt(23, 59, 0).unwrap(),
                trading_window_utc_offset_minutes: 0,
                reconcile_interval_seconds: 5,
                kill_switch_enabled: false,
                max_position_size: 10_000.0,
                max_open_positions_per_va: 5,
                stop_loss_percentage: 2.0,
                signal_queue_depth: 64,
            },
            strategy: StrategyEnvConfig {
                lookback_candles: 20,
                tp_mode: TpMode::Fixed,
                fixed_tp_r: 1.8,
                sl_range_mult: 1.0,
                min_stop_distance: 0.0,
                risk_tag: "vol_breakout_5m_closed".to_string(),
            },
        }
    }

    #[test]
    fn negative_daily_loss_is_rejected() {
        let mut settings = test_settings();
        settings.risk.max_daily_loss = -5.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn live_mode_requires_credentials() {
        let mut settings = test_settings();
        settings.mode = Mode::Live;
        assert!(settings.validate().is_err());
        settings.exchange.api_key = "key".to_string();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn market_constraints_carry_through() {
        let settings = test_settings();
        let constraints = MarketConstraints {
            min_qty: settings.risk.min_qty,
            min_notional: settings.risk.min_notional,
        };
        assert_eq!(constraints.min_qty, 0.0);
        assert_eq!(settings.database_url(), "sqlite://:memory:");
    }
}
