//! Exchange connectivity configuration.

use super::env;
use anyhow::Result;

#[derive(Debug, Clone)]
pub struct ExchangeEnvConfig {
    pub testnet: bool,
    pub api_key: String,
    pub api_secret: String,
    pub recv_window: u32,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub timeout_sec: u64,
}

impl ExchangeEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            testnet: env::parse_bool("TESTNET", true),
            api_key: env::parse_string("API_KEY", ""),
            api_secret: env::parse_string("API_SECRET", ""),
            recv_window: env::parse_u32("RECV_WINDOW", 5000)?,
            max_retries: env::parse_u32("MAX_RETRIES", 3)?,
            retry_delay_ms: env::parse_u64("RETRY_DELAY_MS", 100)?,
            timeout_sec: env::parse_u64("TIMEOUT_SEC", 10)?,
        })
    }
}
