use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Positions whose absolute quantity falls below this are considered flat.
pub const POSITION_EPSILON: f64 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Sign applied to quantities held on this side.
    pub fn sign(self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    Market,
    Stop,
    Limit,
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryType::Market => write!(f, "MARKET"),
            EntryType::Stop => write!(f, "STOP"),
            EntryType::Limit => write!(f, "LIMIT"),
        }
    }
}

/// Order lifecycle. Transitions are monotonic: an order never leaves a
/// terminal state and never reverts from Filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    Submitted,
    PartialFill,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }

    pub fn is_open(self) -> bool {
        matches!(
            self,
            OrderStatus::New | OrderStatus::Submitted | OrderStatus::PartialFill
        )
    }

    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        if self == next {
            return true;
        }
        match self {
            OrderStatus::New => true,
            OrderStatus::Submitted => next != OrderStatus::New,
            OrderStatus::PartialFill => matches!(
                next,
                OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
            ),
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected => false,
        }
    }

    /// Map a Bybit v5 order status string onto the local machine.
    pub fn from_exchange(status: &str) -> Option<OrderStatus> {
        match status {
            "New" | "Created" | "Untriggered" => Some(OrderStatus::Submitted),
            "PartiallyFilled" => Some(OrderStatus::PartialFill),
            "Filled" => Some(OrderStatus::Filled),
            "Cancelled" | "Deactivated" => Some(OrderStatus::Cancelled),
            "Rejected" => Some(OrderStatus::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::New => "NEW",
            OrderStatus::Submitted => "SUBMITTED",
            OrderStatus::PartialFill => "PARTIAL_FILL",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Rejected => "REJECTED",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

/// Protective stop specification carried by an order plan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum StopLossSpec {
    Fixed { price: f64 },
    Trailing { trail_by: f64 },
}

impl StopLossSpec {
    /// Absolute stop price for a given entry and side. A trailing stop sits
    /// `trail_by` below the entry for longs and above it for shorts.
    pub fn resolved_price(&self, entry_price: f64, side: Side) -> f64 {
        match *self {
            StopLossSpec::Fixed { price } => price,
            StopLossSpec::Trailing { trail_by } => match side {
                Side::Buy => entry_price - trail_by,
                Side::Sell => entry_price + trail_by,
            },
        }
    }

    pub fn is_fixed(&self) -> bool {
        matches!(self, StopLossSpec::Fixed { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TakeProfitSpec {
    pub price: f64,
}

/// Immutable intent to trade, produced by a strategy and reviewed by the
/// risk manager before any order is created from it.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderPlan {
    pub va_id: String,
    pub symbol: String,
    pub side: Side,
    pub entry_type: EntryType,
    pub entry_price: f64,
    pub risk_tag: String,
    pub stop_loss: Option<StopLossSpec>,
    pub take_profit: Option<TakeProfitSpec>,
}

/// Why a plan was turned away. The string forms are stable and appear in
/// logs and persisted incident records; do not rename them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    KillSwitch,
    StopLossRequired,
    TakeProfitRequiredForFixed,
    CooldownActive,
    MaxDailyLoss,
    MaxTradesPerDay,
    SymbolOwnedByOtherVa,
    OpposingExposureNotAllowed,
    VirtualEquityNonPositive,
    LeverageNonPositive,
    StopLossDistanceZero,
    BelowMinQty,
    BelowMinNotional,
    NetExposureCap,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::KillSwitch => "kill_switch",
            RejectReason::StopLossRequired => "stop_loss_required",
            RejectReason::TakeProfitRequiredForFixed => "take_profit_required_for_fixed",
            RejectReason::CooldownActive => "cooldown_active",
            RejectReason::MaxDailyLoss => "max_daily_loss",
            RejectReason::MaxTradesPerDay => "max_trades_per_day",
            RejectReason::SymbolOwnedByOtherVa => "symbol_owned_by_other_va",
            RejectReason::OpposingExposureNotAllowed => "opposing_exposure_not_allowed",
            RejectReason::VirtualEquityNonPositive => "virtual_equity_non_positive",
            RejectReason::LeverageNonPositive => "leverage_non_positive",
            RejectReason::StopLossDistanceZero => "stop_loss_distance_zero",
            RejectReason::BelowMinQty => "below_min_qty",
            RejectReason::BelowMinNotional => "below_min_notional",
            RejectReason::NetExposureCap => "net_exposure_cap",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a risk review.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReviewResult {
    Approved { qty: f64 },
    Rejected { reason: RejectReason },
}

impl ReviewResult {
    pub fn is_approved(&self) -> bool {
        matches!(self, ReviewResult::Approved { .. })
    }

    pub fn qty(&self) -> Option<f64> {
        match self {
            ReviewResult::Approved { qty } => Some(*qty),
            ReviewResult::Rejected { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            ReviewResult::Approved { .. } => None,
            ReviewResult::Rejected { reason } => Some(*reason),
        }
    }
}

/// Durable record of a submitted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub va_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: EntryType,
    pub qty: f64,
    pub price: f64,
    pub reduce_only: bool,
    pub client_order_id: String,
    pub exchange_order_id: Option<String>,
    pub status: OrderStatus,
    pub filled_qty: f64,
    pub stop_loss_price: Option<f64>,
    pub sl_order_id: Option<String>,
    pub tp_order_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn remaining_qty(&self) -> f64 {
        (self.qty - self.filled_qty).max(0.0)
    }
}

/// Completed trade leg with its realized P&L delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    pub va_id: String,
    pub symbol: String,
    pub side: Side,
    pub qty: f64,
    pub price: f64,
    pub pnl: f64,
    pub order_id: String,
    pub executed_at: DateTime<Utc>,
}

/// Immutable exchange execution record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub id: String,
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub qty: f64,
    pub price: f64,
    pub fee: f64,
    pub fee_asset: String,
    pub created_at: DateTime<Utc>,
}

/// Net position derived from fills, keyed by (va_id, symbol).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub va_id: String,
    pub symbol: String,
    pub qty: f64,
    pub avg_entry_price: f64,
    pub current_price: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub stop_loss_price: Option<f64>,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    pub fn side(&self) -> Option<Side> {
        if self.qty > 0.0 {
            Some(Side::Buy)
        } else if self.qty < 0.0 {
            Some(Side::Sell)
        } else {
            None
        }
    }

    pub fn notional(&self) -> f64 {
        self.qty.abs() * self.avg_entry_price
    }

    pub fn is_flat(&self) -> bool {
        self.qty.abs() < POSITION_EPSILON
    }
}

/// Point-in-time quote used by the pre-trade filters and position monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
    pub latency_ms: f64,
    pub timestamp: DateTime<Utc>,
}

impl MarketSnapshot {
    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }

    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    /// Spread in basis points of mid. A zero mid reports zero spread so a
    /// degenerate quote does not divide by zero.
    pub fn spread_bps(&self) -> f64 {
        let mid = self.mid();
        if mid == 0.0 {
            return 0.0;
        }
        (self.spread() / mid) * 10_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_display_and_opposite() {
        assert_eq!(Side::Buy.to_string(), "BUY");
        assert_eq!(Side::Sell.to_string(), "SELL");
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }

    #[test]
    fn status_machine_is_monotonic() {
        assert!(OrderStatus::Submitted.can_transition_to(OrderStatus::PartialFill));
        assert!(OrderStatus::PartialFill.can_transition_to(OrderStatus::Filled));
        assert!(!OrderStatus::Filled.can_transition_to(OrderStatus::Submitted));
        assert!(!OrderStatus::Cancelled.can_transition_to(OrderStatus::Filled));
        assert!(!OrderStatus::PartialFill.can_transition_to(OrderStatus::Submitted));
    }

    #[test]
    fn trailing_stop_resolves_by_side() {
        let spec = StopLossSpec::Trailing { trail_by: 2.5 };
        assert_eq!(spec.resolved_price(100.0, Side::Buy), 97.5);
        assert_eq!(spec.resolved_price(100.0, Side::Sell), 102.5);

        let fixed = StopLossSpec::Fixed { price: 95.0 };
        assert_eq!(fixed.resolved_price(100.0, Side::Buy), 95.0);
    }

    #[test]
    fn zero_mid_quote_reports_zero_spread() {
        let snap = MarketSnapshot {
            symbol: "BTCUSDT".to_string(),
            bid: 0.0,
            ask: 0.0,
            last: 0.0,
            latency_ms: 10.0,
            timestamp: Utc::now(),
        };
        assert_eq!(snap.spread_bps(), 0.0);
    }

    #[test]
    fn position_side_follows_qty_sign() {
        let mut pos = Position {
            va_id: "VA001".to_string(),
            symbol: "BTCUSDT".to_string(),
            qty: 1.5,
            avg_entry_price: 100.0,
            current_price: 100.0,
            unrealized_pnl: 0.0,
            realized_pnl: 0.0,
            stop_loss_price: None,
            opened_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(pos.side(), Some(Side::Buy));
        assert_eq!(pos.notional(), 150.0);

        pos.qty = -1.5;
        assert_eq!(pos.side(), Some(Side::Sell));

        pos.qty = 0.00005;
        assert!(pos.is_flat());
    }
}
