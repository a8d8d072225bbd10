//! Next fire time of a periodic job.
//!
//! Jitter is folded into the scheduled time so a job never sleeps inside its
//! own unit of work.

use std::time::{Duration, Instant};

/// Longest delay a job is ever scheduled out; larger intervals are clamped.
pub const MAX_DELAY: Duration = Duration::from_secs(30 * 86_400);

/// `now + interval + U[0, jitter_max)`, never more than [`MAX_DELAY`] ahead.
pub fn next_fire(now: Instant, interval: Duration, jitter_max: Duration) -> Instant {
    let delay = jittered(interval, jitter_max, rand::random::<f64>());
    now.checked_add(delay).unwrap_or(now)
}

/// Interval stretched by `unit × jitter_max`, `unit` clamped to `[0, 1]`.
pub fn jittered(interval: Duration, jitter_max: Duration, unit: f64) -> Duration {
    let jitter = jitter_max.min(MAX_DELAY).mul_f64(unit.clamp(0.0, 1.0));
    interval.saturating_add(jitter).min(MAX_DELAY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_bounds() {
        let interval = Duration::from_secs(60);
        let jitter = Duration::from_secs(10);
        assert_eq!(jittered(interval, jitter, 0.0), interval);
        assert_eq!(jittered(interval, jitter, 0.5), Duration::from_secs(65));
        assert_eq!(jittered(interval, jitter, 7.0), Duration::from_secs(70));
        assert_eq!(jittered(interval, Duration::ZERO, 0.9), interval);

        let now = Instant::now();
        for _ in 0..100 {
            let at = next_fire(now, interval, jitter);
            assert!(at >= now + interval && at <= now + interval + jitter);
        }
    }

    #[test]
    fn huge_intervals_are_clamped() {
        let huge = Duration::from_secs(u64::MAX);
        assert_eq!(jittered(huge, huge, 1.0), MAX_DELAY);

        let now = Instant::now();
        assert_eq!(next_fire(now, huge, huge), now + MAX_DELAY);
    }
}
