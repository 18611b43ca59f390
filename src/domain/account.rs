use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Durable per-account state the governor operates on. One row per silo;
/// created by the operator, mutated only on trade events and cooldown
/// transitions, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualAccount {
    pub va_id: String,
    pub balance: f64,
    pub total_pnl: f64,
    pub total_trades: i64,
    pub winning_trades: i64,
    pub losing_trades: i64,
    pub max_drawdown: f64,
    pub current_drawdown: f64,
    pub consecutive_losses: i64,
    pub in_cooldown: bool,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub kill_switch: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VirtualAccount {
    pub fn new(va_id: impl Into<String>, balance: f64, now: DateTime<Utc>) -> Self {
        Self {
            va_id: va_id.into(),
            balance,
            total_pnl: 0.0,
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            max_drawdown: 0.0,
            current_drawdown: 0.0,
            consecutive_losses: 0,
            in_cooldown: false,
            cooldown_until: None,
            kill_switch: false,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquitySnapshot {
    pub id: String,
    pub va_id: String,
    pub virtual_equity: f64,
    pub peak_equity: f64,
    pub daily_pnl: f64,
    pub snapshot_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPnl {
    pub va_id: String,
    pub date: NaiveDate,
    pub pnl: f64,
    pub trades_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeStats {
    pub va_id: String,
    pub consecutive_wins: i64,
    pub consecutive_losses: i64,
    pub total_wins: i64,
    pub total_losses: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncidentType {
    SlFailed,
    PanicClose,
    PanicCloseFailed,
    ReconcileDivergence,
    VaNotRegistered,
}

impl IncidentType {
    pub fn as_str(self) -> &'static str {
        match self {
            IncidentType::SlFailed => "sl_failed",
            IncidentType::PanicClose => "panic_close",
            IncidentType::PanicCloseFailed => "panic_close_failed",
            IncidentType::ReconcileDivergence => "reconcile_divergence",
            IncidentType::VaNotRegistered => "va_not_registered",
        }
    }
}

impl fmt::Display for IncidentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Append-only audit record for anything that needed human eyes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub incident_type: IncidentType,
    pub severity: Severity,
    pub description: String,
    pub va_id: Option<String>,
    pub symbol: Option<String>,
    pub order_id: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Incident {
    pub fn new(
        incident_type: IncidentType,
        severity: Severity,
        description: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            incident_type,
            severity,
            description: description.into(),
            va_id: None,
            symbol: None,
            order_id: None,
            metadata: serde_json::Value::Null,
            created_at: now,
        }
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn with_va(mut self, va_id: impl Into<String>) -> Self {
        self.va_id = Some(va_id.into());
        self
    }

    pub fn with_order(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Append-only record of a governor activation (cooldown, throttle).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernorEvent {
    pub id: String,
    pub va_id: String,
    pub symbol: Option<String>,
    pub event_type: String,
    pub description: String,
    pub cooldown_ms: i64,
    pub created_at: DateTime<Utc>,
}
