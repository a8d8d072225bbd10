//! Load rates for the throttling gate.
//!
//! Rates come from the delta between two consecutive counter observations.
//! On the first observation, or when a counter went backwards (stats reset,
//! server restart), the cumulative counter divided by server uptime is used
//! instead.

use crate::collector::ServerCounters;

/// Compute i64 delta, returning `None` on counter regression (stats reset).
pub fn di64(curr: i64, prev: i64) -> Option<i64> {
    (curr >= prev).then_some(curr - prev)
}

/// Compute f64 delta, returning `None` on counter regression (stats reset).
pub fn df64(curr: f64, prev: f64) -> Option<f64> {
    (curr >= prev).then_some(curr - prev)
}

/// Per-second load rates derived from [`ServerCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoadRates {
    pub tps: f64,
    pub block_io_per_second: f64,
    /// `true` when computed from a delta, `false` for the uptime fallback.
    pub from_delta: bool,
}

/// Rate tracking state: the previous counter observation.
#[derive(Debug, Default)]
pub struct LoadRateState {
    prev: Option<ServerCounters>,
}

impl LoadRateState {
    /// Records `curr` and returns the rates since the previous observation.
    pub fn observe(&mut self, curr: ServerCounters) -> LoadRates {
        let rates = self
            .prev
            .and_then(|prev| delta_rates(&prev, &curr))
            .unwrap_or_else(|| cumulative_rates(&curr));
        self.prev = Some(curr);
        rates
    }
}

fn block_io(c: &ServerCounters) -> i64 {
    c.blks_read.saturating_add(c.blks_written)
}

fn delta_rates(prev: &ServerCounters, curr: &ServerCounters) -> Option<LoadRates> {
    let dt = df64(curr.uptime_seconds, prev.uptime_seconds)?;
    if dt <= 0.0 {
        return None;
    }
    let dx = di64(curr.xact_total, prev.xact_total)?;
    let dio = di64(block_io(curr), block_io(prev))?;
    Some(LoadRates {
        tps: dx as f64 / dt,
        block_io_per_second: dio as f64 / dt,
        from_delta: true,
    })
}

fn cumulative_rates(curr: &ServerCounters) -> LoadRates {
    if curr.uptime_seconds <= 0.0 {
        return LoadRates::default();
    }
    LoadRates {
        tps: curr.xact_total.max(0) as f64 / curr.uptime_seconds,
        block_io_per_second: block_io(curr).max(0) as f64 / curr.uptime_seconds,
        from_delta: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters(xact: i64, read: i64, written: i64, uptime: f64) -> ServerCounters {
        ServerCounters {
            xact_total: xact,
            blks_read: read,
            blks_written: written,
            uptime_seconds: uptime,
        }
    }

    #[test]
    fn first_observation_uses_uptime_average() {
        let mut state = LoadRateState::default();
        let rates = state.observe(counters(1_000, 300, 200, 100.0));
        assert!(!rates.from_delta);
        assert_eq!(rates.tps, 10.0);
        assert_eq!(rates.block_io_per_second, 5.0);
    }

    #[test]
    fn later_observations_use_delta() {
        let mut state = LoadRateState::default();
        state.observe(counters(1_000, 0, 0, 100.0));
        let rates = state.observe(counters(61_000, 6_000, 0, 160.0));
        assert!(rates.from_delta);
        assert_eq!(rates.tps, 1_000.0);
        assert_eq!(rates.block_io_per_second, 100.0);
    }

    #[test]
    fn counter_reset_falls_back_to_uptime_average() {
        let mut state = LoadRateState::default();
        state.observe(counters(90_000, 0, 0, 9_000.0));
        // Server restarted: counters and uptime start over.
        let rates = state.observe(counters(500, 0, 0, 50.0));
        assert!(!rates.from_delta);
        assert_eq!(rates.tps, 10.0);
    }

    #[test]
    fn delta_helpers_reject_regression() {
        assert_eq!(di64(10, 4), Some(6));
        assert_eq!(di64(3, 4), None);
        assert_eq!(df64(1.5, 0.5), Some(1.0));
        assert_eq!(df64(0.5, 1.5), None);
    }
}
