use crate::domain::types::MarketSnapshot;
use chrono::{DateTime, FixedOffset, NaiveTime, Utc};

/// Verdict from a quote-quality check. `check_all` reports the first
/// failing predicate's reason and stops there.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterVerdict {
    Pass,
    Fail { reason: String },
}

impl FilterVerdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, FilterVerdict::Pass)
    }

    fn fail(reason: String) -> Self {
        FilterVerdict::Fail { reason }
    }
}

#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub max_spread_bps: f64,
    pub max_slippage_bps: f64,
    pub max_latency_ms: f64,
    pub trading_window_start: NaiveTime,
    pub trading_window_end: NaiveTime,
    /// Fixed offset applied before the window comparison. Zero means the
    /// window bounds are UTC; equity-style venues set their local offset.
    pub window_utc_offset_minutes: i32,
}

/// Stateless quote-quality gate. No side effects, no I/O.
#[derive(Debug, Clone)]
pub struct MarketFilters {
    config: FilterConfig,
}

impl MarketFilters {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    pub fn spread_ok(&self, snapshot: &MarketSnapshot) -> FilterVerdict {
        let spread_bps = snapshot.spread_bps();
        if spread_bps > self.config.max_spread_bps {
            return FilterVerdict::fail(format!(
                "spread {:.2}bps exceeds max {}bps",
                spread_bps, self.config.max_spread_bps
            ));
        }
        FilterVerdict::Pass
    }

    pub fn latency_ok(&self, snapshot: &MarketSnapshot) -> FilterVerdict {
        if snapshot.latency_ms > self.config.max_latency_ms {
            return FilterVerdict::fail(format!(
                "latency {:.1}ms exceeds max {}ms",
                snapshot.latency_ms, self.config.max_latency_ms
            ));
        }
        FilterVerdict::Pass
    }

    pub fn slippage_ok(&self, expected_price: f64, snapshot: &MarketSnapshot) -> FilterVerdict {
        let slippage_bps =
            ((snapshot.last - expected_price) / expected_price).abs() * 10_000.0;
        if slippage_bps > self.config.max_slippage_bps {
            return FilterVerdict::fail(format!(
                "slippage {:.2}bps exceeds max {}bps",
                slippage_bps, self.config.max_slippage_bps
            ));
        }
        FilterVerdict::Pass
    }

    /// Wall-clock window check, inclusive at both bounds, HH:MM resolution.
    pub fn window_ok(&self, now: DateTime<Utc>) -> FilterVerdict {
        let offset = FixedOffset::east_opt(self.config.window_utc_offset_minutes * 60)
            .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is valid"));
        let local = now.with_timezone(&offset).time();
        let start = self.config.trading_window_start;
        let end = self.config.trading_window_end;
        if local < start || local > end {
            return FilterVerdict::fail(format!(
                "outside trading window {}-{}",
                start.format("%H:%M"),
                end.format("%H:%M")
            ));
        }
        FilterVerdict::Pass
    }

    /// Conjunction in spread -> latency -> window -> slippage order,
    /// short-circuiting on the first failure. Slippage only runs when an
    /// expected price is supplied.
    pub fn check_all(
        &self,
        snapshot: &MarketSnapshot,
        expected_price: Option<f64>,
        now: DateTime<Utc>,
    ) -> FilterVerdict {
        let spread = self.spread_ok(snapshot);
        if !spread.is_pass() {
            return spread;
        }
        let latency = self.latency_ok(snapshot);
        if !latency.is_pass() {
            return latency;
        }
        let window = self.window_ok(now);
        if !window.is_pass() {
            return window;
        }
        if let Some(expected) = expected_price {
            let slippage = self.slippage_ok(expected, snapshot);
            if !slippage.is_pass() {
                return slippage;
            }
        }
        FilterVerdict::Pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config() -> FilterConfig {
        FilterConfig {
            max_spread_bps: 10.0,
            max_slippage_bps: 5.0,
            max_latency_ms: 500.0,
            trading_window_start: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            trading_window_end: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            window_utc_offset_minutes: 0,
        }
    }

    fn snapshot(bid: f64, ask: f64, last: f64, latency_ms: f64) -> MarketSnapshot {
        MarketSnapshot {
            symbol: "BTCUSDT".to_string(),
            bid,
            ask,
            last,
            latency_ms,
            timestamp: Utc::now(),
        }
    }

    fn in_window() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 2, 12, 0, 0).unwrap()
    }

    #[test]
    fn clean_quote_passes_all() {
        let filters = MarketFilters::new(config());
        let snap = snapshot(99.99, 100.01, 100.0, 50.0);
        assert!(filters.check_all(&snap, Some(100.0), in_window()).is_pass());
    }

    #[test]
    fn wide_spread_fails_first() {
        let filters = MarketFilters::new(config());
        // 1.0 wide on mid 100 = 100bps, also stale latency; spread reported.
        let snap = snapshot(99.5, 100.5, 100.0, 9999.0);
        match filters.check_all(&snap, None, in_window()) {
            FilterVerdict::Fail { reason } => assert!(reason.contains("spread")),
            FilterVerdict::Pass => panic!("expected failure"),
        }
    }

    #[test]
    fn latency_gate() {
        let filters = MarketFilters::new(config());
        let snap = snapshot(99.99, 100.01, 100.0, 501.0);
        match filters.check_all(&snap, None, in_window()) {
            FilterVerdict::Fail { reason } => assert!(reason.contains("latency")),
            FilterVerdict::Pass => panic!("expected failure"),
        }
    }

    #[test]
    fn slippage_only_checked_with_expected_price() {
        let filters = MarketFilters::new(config());
        // last 101 vs expected 100 = 100bps of slippage
        let snap = snapshot(100.99, 101.01, 101.0, 50.0);
        assert!(filters.check_all(&snap, None, in_window()).is_pass());
        match filters.check_all(&snap, Some(100.0), in_window()) {
            FilterVerdict::Fail { reason } => assert!(reason.contains("slippage")),
            FilterVerdict::Pass => panic!("expected failure"),
        }
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let filters = MarketFilters::new(config());
        let at_open = Utc.with_ymd_and_hms(2025, 1, 2, 9, 30, 0).unwrap();
        let at_close = Utc.with_ymd_and_hms(2025, 1, 2, 16, 0, 0).unwrap();
        let before = Utc.with_ymd_and_hms(2025, 1, 2, 9, 29, 59).unwrap();

        assert!(filters.window_ok(at_open).is_pass());
        assert!(filters.window_ok(at_close).is_pass());
        assert!(!filters.window_ok(before).is_pass());
    }

    #[test]
    fn window_respects_configured_offset() {
        let mut cfg = config();
        cfg.window_utc_offset_minutes = -300; // UTC-5
        let filters = MarketFilters::new(cfg);

        // 13:00 UTC = 08:00 local, before the 09:30 open.
        let utc_morning = Utc.with_ymd_and_hms(2025, 1, 2, 13, 0, 0).unwrap();
        assert!(!filters.window_ok(utc_morning).is_pass());

        // 15:00 UTC = 10:00 local, inside the window.
        let utc_midday = Utc.with_ymd_and_hms(2025, 1, 2, 15, 0, 0).unwrap();
        assert!(filters.window_ok(utc_midday).is_pass());
    }

    #[test]
    fn degenerate_zero_mid_passes_spread() {
        let filters = MarketFilters::new(config());
        let snap = snapshot(0.0, 0.0, 0.0, 50.0);
        assert!(filters.spread_ok(&snap).is_pass());
    }
}
