//! Risk manager scenarios: sizing decay, daily reset, symbol ownership, and
//! the exposure cap.

use chrono::{DateTime, TimeZone, Utc};
use silotrade::application::risk::{MarketConstraints, RiskConfig, RiskManager};
use silotrade::domain::types::{
    EntryType, OrderPlan, RejectReason, ReviewResult, Side, StopLossSpec, TakeProfitSpec,
};

fn plan_with_stop(va: &str, symbol: &str, entry: f64, sl: f64) -> OrderPlan {
    OrderPlan {
        va_id: va.to_string(),
        symbol: symbol.to_string(),
        side: Side::Buy,
        entry_type: EntryType::Market,
        entry_price: entry,
        risk_tag: "vol_breakout_5m_closed".to_string(),
        stop_loss: Some(StopLossSpec::Fixed { price: sl }),
        take_profit: Some(TakeProfitSpec { price: entry + 2.0 * (entry - sl) }),
    }
}

fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

fn approved_qty(result: ReviewResult) -> f64 {
    match result {
        ReviewResult::Approved { qty } => qty,
        ReviewResult::Rejected { reason } => panic!("unexpected rejection: {}", reason),
    }
}

#[test]
fn size_decays_with_consecutive_losses() {
    let config = RiskConfig {
        risk_per_trade_pct: 0.01,
        constraints: MarketConstraints {
            min_qty: 0.0,
            min_notional: 0.0,
        },
        ..RiskConfig::default()
    };
    let mut rm = RiskManager::new(config, 100_000.0);
    rm.register_va("VA001", 1000.0);
    let now = at(2025, 1, 1, 12, 0);
    let plan = plan_with_stop("VA001", "BTCUSDT", 100.0, 99.0);

    // Fresh account: 1000 * 0.01 / 1 = 10.
    let qty = approved_qty(rm.review_orderplan(&plan, now, false).unwrap());
    assert!((qty - 10.0).abs() < 1e-9);

    // Two losses of -1: equity 998, decay 0.5 -> 4.99.
    rm.record_trade_pnl("VA001", "BTCUSDT", -1.0, now).unwrap();
    rm.record_trade_pnl("VA001", "BTCUSDT", -1.0, now).unwrap();
    let qty = approved_qty(rm.review_orderplan(&plan, now, false).unwrap());
    assert!((qty - 4.99).abs() < 1e-9);

    // Two more: equity 996, decay 0.25 -> 2.49.
    rm.record_trade_pnl("VA001", "BTCUSDT", -1.0, now).unwrap();
    rm.record_trade_pnl("VA001", "BTCUSDT", -1.0, now).unwrap();
    let qty = approved_qty(rm.review_orderplan(&plan, now, false).unwrap());
    assert!((qty - 2.49).abs() < 1e-9);
}

#[test]
fn a_win_clears_the_decay() {
    let mut rm = RiskManager::new(RiskConfig::default(), 100_000.0);
    rm.register_va("VA001", 1000.0);
    let now = at(2025, 1, 1, 12, 0);

    rm.record_trade_pnl("VA001", "BTCUSDT", -1.0, now).unwrap();
    rm.record_trade_pnl("VA001", "BTCUSDT", -1.0, now).unwrap();
    rm.record_trade_pnl("VA001", "BTCUSDT", 3.0, now).unwrap();

    let plan = plan_with_stop("VA001", "BTCUSDT", 100.0, 99.0);
    let qty = approved_qty(rm.review_orderplan(&plan, now, false).unwrap());
    // Equity back to 1001, no decay.
    assert!((qty - 10.01).abs() < 1e-9);
}

#[test]
fn daily_trade_budget_resets_at_midnight_utc() {
    let config = RiskConfig {
        max_trades_per_day: 1,
        daily_reset_hour_utc: 0,
        ..RiskConfig::default()
    };
    let mut rm = RiskManager::new(config, 100_000.0);
    rm.register_va("VA001", 1000.0);
    let plan = plan_with_stop("VA001", "BTCUSDT", 100.0, 99.0);

    let result = rm
        .review_orderplan(&plan, at(2025, 1, 1, 23, 59), true)
        .unwrap();
    assert!(result.is_approved());

    let result = rm
        .review_orderplan(&plan, at(2025, 1, 1, 23, 59), true)
        .unwrap();
    assert_eq!(result.reason(), Some(RejectReason::MaxTradesPerDay));

    let result = rm
        .review_orderplan(&plan, at(2025, 1, 2, 0, 1), true)
        .unwrap();
    assert!(result.is_approved());
}

#[test]
fn day_roll_resets_daily_pnl() {
    let config = RiskConfig {
        max_daily_loss: 5.0,
        ..RiskConfig::default()
    };
    let mut rm = RiskManager::new(config, 100_000.0);
    rm.register_va("VA001", 1000.0);
    let plan = plan_with_stop("VA001", "BTCUSDT", 100.0, 99.0);

    rm.record_trade_pnl("VA001", "BTCUSDT", -6.0, at(2025, 1, 1, 12, 0))
        .unwrap();
    let result = rm
        .review_orderplan(&plan, at(2025, 1, 1, 13, 0), false)
        .unwrap();
    assert_eq!(result.reason(), Some(RejectReason::MaxDailyLoss));

    // Next trading day: the daily counters start fresh.
    let result = rm
        .review_orderplan(&plan, at(2025, 1, 2, 9, 0), false)
        .unwrap();
    assert!(result.is_approved());
}

#[test]
fn shifted_reset_hour_defines_the_trading_day() {
    let config = RiskConfig {
        max_trades_per_day: 1,
        daily_reset_hour_utc: 8,
        ..RiskConfig::default()
    };
    let mut rm = RiskManager::new(config, 100_000.0);
    rm.register_va("VA001", 1000.0);
    let plan = plan_with_stop("VA001", "BTCUSDT", 100.0, 99.0);

    assert!(rm
        .review_orderplan(&plan, at(2025, 1, 1, 7, 0), true)
        .unwrap()
        .is_approved());

    // 07:30 is still the same trading day (day rolls at 08:00).
    let result = rm
        .review_orderplan(&plan, at(2025, 1, 1, 7, 30), true)
        .unwrap();
    assert_eq!(result.reason(), Some(RejectReason::MaxTradesPerDay));

    // 08:01 starts the next trading day.
    assert!(rm
        .review_orderplan(&plan, at(2025, 1, 1, 8, 1), true)
        .unwrap()
        .is_approved());
}

#[test]
fn one_virtual_account_per_symbol() {
    let mut rm = RiskManager::new(RiskConfig::default(), 100_000.0);
    rm.register_va("VA001", 1000.0);
    rm.register_va("VA002", 1000.0);
    rm.record_position("VA001", "BTCUSDT", 1.0, 100.0);

    let plan = plan_with_stop("VA002", "BTCUSDT", 100.0, 99.0);
    let result = rm
        .review_orderplan(&plan, at(2025, 1, 1, 12, 0), false)
        .unwrap();
    assert_eq!(result.reason(), Some(RejectReason::SymbolOwnedByOtherVa));

    // The owner itself can still add on the same side.
    let plan = plan_with_stop("VA001", "BTCUSDT", 100.0, 99.0);
    assert!(rm
        .review_orderplan(&plan, at(2025, 1, 1, 12, 0), false)
        .unwrap()
        .is_approved());
}

#[test]
fn net_exposure_cap_counts_existing_notional() {
    let config = RiskConfig {
        max_symbol_exposure_pct_real_equity: 0.10,
        ..RiskConfig::default()
    };
    let mut rm = RiskManager::new(config, 1000.0); // cap = 100
    rm.register_va("VA001", 1000.0);
    rm.record_position("VA001", "BTCUSDT", 0.9, 100.0); // notional 90

    // Wide stop keeps the sized qty small: 1000 * 0.01 / 50 = 0.2 units,
    // 20 notional. 90 + 20 > 100 -> blocked.
    let plan = plan_with_stop("VA001", "BTCUSDT", 100.0, 50.0);
    let result = rm
        .review_orderplan(&plan, at(2025, 1, 1, 12, 0), false)
        .unwrap();
    assert_eq!(result.reason(), Some(RejectReason::NetExposureCap));

    // With 80 notional already held, the same order squeaks under the cap.
    rm.record_position("VA001", "BTCUSDT", 0.8, 100.0);
    assert!(rm
        .review_orderplan(&plan, at(2025, 1, 1, 12, 0), false)
        .unwrap()
        .is_approved());
}

#[test]
fn reserve_claims_symbol_and_consumes_trade_slot() {
    let config = RiskConfig {
        max_trades_per_day: 2,
        ..RiskConfig::default()
    };
    let mut rm = RiskManager::new(config, 100_000.0);
    rm.register_va("VA001", 1000.0);
    rm.register_va("VA002", 1000.0);
    let now = at(2025, 1, 1, 12, 0);

    assert!(rm
        .review_orderplan(&plan_with_stop("VA001", "BTCUSDT", 100.0, 99.0), now, true)
        .unwrap()
        .is_approved());
    assert_eq!(rm.symbol_owner("BTCUSDT"), Some("VA001"));

    // The reservation alone blocks the other account.
    let result = rm
        .review_orderplan(&plan_with_stop("VA002", "BTCUSDT", 100.0, 99.0), now, true)
        .unwrap();
    assert_eq!(result.reason(), Some(RejectReason::SymbolOwnedByOtherVa));
}

#[test]
fn drawdown_latches_the_kill_switch() {
    let config = RiskConfig {
        max_drawdown_pct: 0.10,
        ..RiskConfig::default()
    };
    let mut rm = RiskManager::new(config, 100_000.0);
    rm.register_va("VA001", 1000.0);
    let now = at(2025, 1, 1, 12, 0);

    // Build a peak, then give well over 10% of it back.
    rm.record_trade_pnl("VA001", "BTCUSDT", 100.0, now).unwrap();
    rm.record_trade_pnl("VA001", "BTCUSDT", -200.0, now).unwrap();

    let result = rm
        .review_orderplan(&plan_with_stop("VA001", "BTCUSDT", 100.0, 99.0), now, false)
        .unwrap();
    assert_eq!(result.reason(), Some(RejectReason::KillSwitch));
}
