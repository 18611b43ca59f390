//! End-to-end strategy scenarios over fixed candle series.

use chrono::{DateTime, Duration, TimeZone, Utc};
use silotrade::application::strategy::{StrategyConfig, TpMode, VolatilityBreakoutStrategy};
use silotrade::domain::types::{Candle, Side, StopLossSpec};

fn candle(t0: DateTime<Utc>, offset_min: i64, o: f64, h: f64, l: f64, c: f64) -> Candle {
    let open_time = t0 + Duration::minutes(offset_min);
    Candle {
        symbol: "BTCUSDT".to_string(),
        open_time,
        close_time: open_time + Duration::minutes(5),
        open: o,
        high: h,
        low: l,
        close: c,
    }
}

fn base_series(t0: DateTime<Utc>) -> Vec<Candle> {
    vec![
        candle(t0, 0, 100.0, 101.0, 99.0, 100.0),
        candle(t0, 5, 100.0, 102.0, 99.0, 101.0),
        candle(t0, 10, 101.0, 103.0, 100.0, 102.0),
        candle(t0, 15, 102.0, 104.0, 101.0, 105.0),
    ]
}

fn strategy() -> VolatilityBreakoutStrategy {
    VolatilityBreakoutStrategy::new(StrategyConfig {
        lookback_candles: 3,
        tp_mode: TpMode::Fixed,
        fixed_tp_r: 1.7,
        sl_range_mult: 1.0,
        min_stop_distance: 0.0,
        risk_tag: "vol_breakout_5m_closed".to_string(),
    })
}

#[test]
fn breakout_buy_with_lookback_three() {
    let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
    let candles = base_series(t0);

    let plan = strategy()
        .evaluate("VA001", "BTCUSDT", t0 + Duration::minutes(20), &candles)
        .expect("close 105 above reference high 103 must signal");

    assert_eq!(plan.side, Side::Buy);
    assert_eq!(plan.entry_price, 105.0);

    // Reference ranges: (101-99)=2, (102-99)=3, (103-100)=3; mean = 8/3.
    let stop_distance: f64 = 8.0 / 3.0;
    let Some(StopLossSpec::Fixed { price: sl }) = plan.stop_loss else {
        panic!("fixed tp mode must emit a fixed stop");
    };
    assert!((sl - (105.0 - stop_distance)).abs() < 1e-9);
    assert!((sl - 102.333_333_333_333_33).abs() < 1e-6);

    let tp = plan.take_profit.expect("fixed tp mode must emit a target");
    assert!((tp.price - (105.0 + 1.7 * stop_distance)).abs() < 1e-9);
    assert!((tp.price - 109.533_333_333_333_33).abs() < 1e-6);
}

#[test]
fn no_lookahead_gating_around_bar_close() {
    let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
    let mut candles = base_series(t0);
    // A newer candle closing at t0+25m with close 109.
    candles.push(candle(t0, 20, 105.0, 110.0, 104.0, 109.0));

    let strategy = strategy();

    // At t0+24m59s the newer candle has not closed: the evaluation sees the
    // earlier window and the 105 trigger.
    let just_before = t0 + Duration::minutes(24) + Duration::seconds(59);
    let plan = strategy.evaluate("VA001", "BTCUSDT", just_before, &candles);
    assert_eq!(plan.map(|p| p.entry_price), Some(105.0));

    // At t0+25m the candle is closed and becomes the trigger.
    let plan = strategy
        .evaluate("VA001", "BTCUSDT", t0 + Duration::minutes(25), &candles)
        .expect("closed candle becomes the trigger");
    assert_eq!(plan.entry_price, 109.0);
}

#[test]
fn short_history_emits_nothing() {
    let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
    let candles = base_series(t0);

    // as_of before the last candle closes leaves only 3 bars; lookback 3
    // needs 4.
    let plan = strategy().evaluate("VA001", "BTCUSDT", t0 + Duration::minutes(16), &candles);
    assert!(plan.is_none());
}

#[test]
fn min_stop_distance_floors_a_quiet_market() {
    let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
    // Ranges of 0.2 each; breakout close above 100.1.
    let candles = vec![
        candle(t0, 0, 100.0, 100.1, 99.9, 100.0),
        candle(t0, 5, 100.0, 100.1, 99.9, 100.0),
        candle(t0, 10, 100.0, 100.1, 99.9, 100.0),
        candle(t0, 15, 100.0, 101.0, 100.0, 101.0),
    ];

    let strategy = VolatilityBreakoutStrategy::new(StrategyConfig {
        lookback_candles: 3,
        tp_mode: TpMode::Fixed,
        fixed_tp_r: 1.7,
        sl_range_mult: 1.0,
        min_stop_distance: 1.5,
        risk_tag: "vol_breakout_5m_closed".to_string(),
    });
    let plan = strategy
        .evaluate("VA001", "BTCUSDT", t0 + Duration::minutes(20), &candles)
        .expect("breakout above the quiet range");

    let Some(StopLossSpec::Fixed { price: sl }) = plan.stop_loss else {
        panic!("fixed stop expected");
    };
    // avg range 0.2 would give a 0.2 stop; the floor of 1.5 wins.
    assert!((sl - (101.0 - 1.5)).abs() < 1e-9);
}
