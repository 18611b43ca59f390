use crate::domain::types::{
    Candle, EntryType, OrderPlan, Side, StopLossSpec, TakeProfitSpec,
};
use chrono::{DateTime, Utc};

/// Take-profit handling for breakout entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TpMode {
    /// Fixed target at `fixed_tp_r` multiples of the stop distance.
    Fixed,
    /// No target; the stop trails the entry by the stop distance.
    Trailing,
}

#[derive(Debug, Clone)]
pub struct StrategyConfig {
    pub lookback_candles: usize,
    pub tp_mode: TpMode,
    pub fixed_tp_r: f64,
    pub sl_range_mult: f64,
    pub min_stop_distance: f64,
    pub risk_tag: String,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            lookback_candles: 20,
            tp_mode: TpMode::Fixed,
            fixed_tp_r: 1.8,
            sl_range_mult: 1.0,
            min_stop_distance: 0.0,
            risk_tag: "vol_breakout_5m_closed".to_string(),
        }
    }
}

/// Volatility breakout over closed bars.
///
/// The last N+1 eligible candles split into a reference window (first N) and
/// a trigger bar (last). A close above the reference high buys, below the
/// reference low sells; the stop distance is the average reference range
/// scaled by `sl_range_mult`, floored at `min_stop_distance`.
///
/// Only candles whose close_time is at or before `as_of` are eligible, so
/// evaluating mid-bar can never look ahead.
#[derive(Debug, Clone)]
pub struct VolatilityBreakoutStrategy {
    config: StrategyConfig,
}

impl VolatilityBreakoutStrategy {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config }
    }

    pub fn evaluate(
        &self,
        va_id: &str,
        symbol: &str,
        as_of: DateTime<Utc>,
        candles: &[Candle],
    ) -> Option<OrderPlan> {
        let closed: Vec<&Candle> = candles
            .iter()
            .filter(|c| c.symbol == symbol && c.close_time <= as_of)
            .collect();

        let needed = self.config.lookback_candles + 1;
        if closed.len() < needed {
            return None;
        }

        let window = &closed[closed.len() - needed..];
        let (reference, trigger) = (&window[..window.len() - 1], window[window.len() - 1]);

        let prev_high = reference.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let prev_low = reference.iter().map(|c| c.low).fold(f64::MAX, f64::min);

        let side = if trigger.close > prev_high {
            Side::Buy
        } else if trigger.close < prev_low {
            Side::Sell
        } else {
            return None;
        };

        let avg_range =
            reference.iter().map(|c| c.range()).sum::<f64>() / reference.len() as f64;
        let stop_distance = (avg_range * self.config.sl_range_mult)
            .max(self.config.min_stop_distance);

        let entry_price = trigger.close;
        let (sl_price, tp_price) = match side {
            Side::Buy => (
                entry_price - stop_distance,
                entry_price + self.config.fixed_tp_r * stop_distance,
            ),
            Side::Sell => (
                entry_price + stop_distance,
                entry_price - self.config.fixed_tp_r * stop_distance,
            ),
        };

        let (stop_loss, take_profit) = match self.config.tp_mode {
            TpMode::Fixed => (
                StopLossSpec::Fixed { price: sl_price },
                Some(TakeProfitSpec { price: tp_price }),
            ),
            TpMode::Trailing => (
                StopLossSpec::Trailing {
                    trail_by: stop_distance,
                },
                None,
            ),
        };

        Some(OrderPlan {
            va_id: va_id.to_string(),
            symbol: symbol.to_string(),
            side,
            entry_type: EntryType::Market,
            entry_price,
            risk_tag: self.config.risk_tag.clone(),
            stop_loss: Some(stop_loss),
            take_profit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn candle(
        symbol: &str,
        open_time: DateTime<Utc>,
        minutes: i64,
        o: f64,
        h: f64,
        l: f64,
        c: f64,
    ) -> Candle {
        Candle {
            symbol: symbol.to_string(),
            open_time,
            close_time: open_time + Duration::minutes(minutes),
            open: o,
            high: h,
            low: l,
            close: c,
        }
    }

    fn series(symbol: &str) -> (DateTime<Utc>, Vec<Candle>) {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let stride = Duration::minutes(5);
        let bars = vec![
            candle(symbol, t0, 5, 100.0, 101.0, 99.0, 100.0),
            candle(symbol, t0 + stride, 5, 100.0, 102.0, 99.0, 101.0),
            candle(symbol, t0 + stride * 2, 5, 101.0, 103.0, 100.0, 102.0),
            candle(symbol, t0 + stride * 3, 5, 102.0, 104.0, 101.0, 105.0),
        ];
        (t0, bars)
    }

    fn config(lookback: usize) -> StrategyConfig {
        StrategyConfig {
            lookback_candles: lookback,
            tp_mode: TpMode::Fixed,
            fixed_tp_r: 1.7,
            sl_range_mult: 1.0,
            min_stop_distance: 0.0,
            risk_tag: "test".to_string(),
        }
    }

    #[test]
    fn breakout_above_reference_high_buys() {
        let (t0, bars) = series("BTCUSDT");
        let strategy = VolatilityBreakoutStrategy::new(config(3));

        let plan = strategy
            .evaluate("VA001", "BTCUSDT", t0 + Duration::minutes(20), &bars)
            .expect("breakout close above reference high should signal");

        assert_eq!(plan.side, Side::Buy);
        assert_eq!(plan.entry_price, 105.0);

        // avg range over reference = mean(2, 3, 3) = 8/3
        let stop_distance = 8.0 / 3.0;
        match plan.stop_loss {
            Some(StopLossSpec::Fixed { price }) => {
                assert!((price - (105.0 - stop_distance)).abs() < 1e-9)
            }
            other => panic!("expected fixed stop, got {:?}", other),
        }
        let tp = plan.take_profit.expect("fixed mode carries a target");
        assert!((tp.price - (105.0 + 1.7 * stop_distance)).abs() < 1e-9);
    }

    #[test]
    fn mid_bar_evaluation_never_sees_the_forming_candle() {
        let (t0, mut bars) = series("BTCUSDT");
        bars.push(candle(
            "BTCUSDT",
            t0 + Duration::minutes(20),
            5,
            105.0,
            110.0,
            104.0,
            109.0,
        ));
        let strategy = VolatilityBreakoutStrategy::new(config(3));

        // One second before the new bar closes it must not count; the older
        // window alone still signals off the 105 close.
        let just_before = t0 + Duration::minutes(24) + Duration::seconds(59);
        let plan = strategy.evaluate("VA001", "BTCUSDT", just_before, &bars);
        assert_eq!(plan.map(|p| p.entry_price), Some(105.0));

        let at_close = t0 + Duration::minutes(25);
        let plan = strategy
            .evaluate("VA001", "BTCUSDT", at_close, &bars)
            .expect("newly closed bar becomes the trigger");
        assert_eq!(plan.entry_price, 109.0);
    }

    #[test]
    fn too_few_closed_candles_is_silent() {
        let (t0, bars) = series("BTCUSDT");
        let strategy = VolatilityBreakoutStrategy::new(config(5));
        assert!(strategy
            .evaluate("VA001", "BTCUSDT", t0 + Duration::minutes(20), &bars)
            .is_none());
    }

    #[test]
    fn close_inside_reference_range_is_silent() {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let stride = Duration::minutes(5);
        let bars = vec![
            candle("BTCUSDT", t0, 5, 100.0, 104.0, 96.0, 100.0),
            candle("BTCUSDT", t0 + stride, 5, 100.0, 104.0, 96.0, 101.0),
            candle("BTCUSDT", t0 + stride * 2, 5, 101.0, 104.0, 96.0, 100.0),
            candle("BTCUSDT", t0 + stride * 3, 5, 100.0, 103.0, 97.0, 102.0),
        ];
        let strategy = VolatilityBreakoutStrategy::new(config(3));
        assert!(strategy
            .evaluate("VA001", "BTCUSDT", t0 + Duration::minutes(20), &bars)
            .is_none());
    }

    #[test]
    fn sell_breakout_uses_trailing_spec_when_configured() {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let stride = Duration::minutes(5);
        let bars = vec![
            candle("ETHUSDT", t0, 5, 100.0, 101.0, 99.0, 100.0),
            candle("ETHUSDT", t0 + stride, 5, 100.0, 102.0, 99.0, 101.0),
            candle("ETHUSDT", t0 + stride * 2, 5, 101.0, 103.0, 100.0, 102.0),
            candle("ETHUSDT", t0 + stride * 3, 5, 102.0, 102.0, 95.0, 96.0),
        ];
        let mut cfg = config(3);
        cfg.tp_mode = TpMode::Trailing;
        let strategy = VolatilityBreakoutStrategy::new(cfg);

        let plan = strategy
            .evaluate("VA002", "ETHUSDT", t0 + Duration::minutes(20), &bars)
            .expect("close below reference low should signal");

        assert_eq!(plan.side, Side::Sell);
        assert!(matches!(
            plan.stop_loss,
            Some(StopLossSpec::Trailing { .. })
        ));
        assert!(plan.take_profit.is_none());
    }

    #[test]
    fn other_symbols_never_leak_into_the_window() {
        let (t0, mut bars) = series("BTCUSDT");
        // A wildly different symbol closing in the same window must not
        // affect BTCUSDT's reference range.
        bars.insert(
            2,
            candle("DOGEUSDT", t0 + Duration::minutes(5), 5, 1.0, 500.0, 0.5, 1.0),
        );
        let strategy = VolatilityBreakoutStrategy::new(config(3));
        let plan = strategy
            .evaluate("VA001", "BTCUSDT", t0 + Duration::minutes(20), &bars)
            .expect("still signals");
        assert_eq!(plan.entry_price, 105.0);
    }
}
