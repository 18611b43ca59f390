//! Small env-parsing helpers shared by the config sub-modules.

use anyhow::{Context, Result};
use std::env;

pub fn parse_f64(key: &str, default: f64) -> Result<f64> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<f64>()
        .context(format!("failed to parse {}", key))
}

pub fn parse_u32(key: &str, default: u32) -> Result<u32> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<u32>()
        .context(format!("failed to parse {}", key))
}

pub fn parse_u64(key: &str, default: u64) -> Result<u64> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<u64>()
        .context(format!("failed to parse {}", key))
}

pub fn parse_i64(key: &str, default: i64) -> Result<i64> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<i64>()
        .context(format!("failed to parse {}", key))
}

pub fn parse_i32(key: &str, default: i32) -> Result<i32> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<i32>()
        .context(format!("failed to parse {}", key))
}

pub fn parse_usize(key: &str, default: usize) -> Result<usize> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<usize>()
        .context(format!("failed to parse {}", key))
}

pub fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<bool>()
        .unwrap_or(default)
}

pub fn parse_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

pub fn parse_list(key: &str, default: &str) -> Vec<String> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
