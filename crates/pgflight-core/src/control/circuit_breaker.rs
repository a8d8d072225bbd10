//! Circuit breaker over collection attempt history.
//!
//! Pure: the decision depends only on the history slice, the settings and
//! the evaluation time, so it can be called concurrently with writers of the
//! attempt log.

use crate::config::BreakerSettings;
use crate::storage::model::{CollectionAttempt, CollectionType, SkipReason};

#[derive(Debug, Clone, PartialEq)]
pub struct BreakerDecision {
    /// `true` when the next attempt must be skipped.
    pub open: bool,
    /// Average duration of the sampled attempts; `None` without samples or
    /// when the breaker is disabled.
    pub avg_ms: Option<f64>,
    pub samples: usize,
    pub threshold_ms: f64,
}

impl BreakerDecision {
    pub fn skip_reason(&self) -> Option<SkipReason> {
        match (self.open, self.avg_ms) {
            (true, Some(avg_ms)) => Some(SkipReason::CircuitBreaker {
                avg_ms,
                threshold_ms: self.threshold_ms,
            }),
            _ => None,
        }
    }
}

/// Averages the duration of the last K successful, non-skipped, finished
/// attempts of `collection_type` started inside the lookback window.
pub fn evaluate(
    history: &[CollectionAttempt],
    collection_type: CollectionType,
    settings: &BreakerSettings,
    now_ms: i64,
) -> BreakerDecision {
    let closed = BreakerDecision {
        open: false,
        avg_ms: None,
        samples: 0,
        threshold_ms: settings.threshold_ms,
    };
    if !settings.enabled || settings.sample_count == 0 {
        return closed;
    }

    let window_start = now_ms - settings.window.as_millis() as i64;
    let mut candidates: Vec<(i64, u64)> = history
        .iter()
        .filter(|a| {
            a.collection_type == collection_type
                && a.success
                && !a.is_skipped()
                && a.started_at_ms >= window_start
        })
        .filter_map(|a| a.duration_ms.map(|d| (a.started_at_ms, d)))
        .collect();
    if candidates.is_empty() {
        return closed;
    }

    candidates.sort_by(|a, b| b.0.cmp(&a.0));
    candidates.truncate(settings.sample_count);

    let samples = candidates.len();
    let avg_ms = candidates.iter().map(|(_, d)| *d as f64).sum::<f64>() / samples as f64;
    BreakerDecision {
        open: avg_ms > settings.threshold_ms,
        avg_ms: Some(avg_ms),
        samples,
        threshold_ms: settings.threshold_ms,
    }
}

pub fn should_skip(
    history: &[CollectionAttempt],
    collection_type: CollectionType,
    settings: &BreakerSettings,
    now_ms: i64,
) -> bool {
    evaluate(history, collection_type, settings, now_ms).open
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::model::Mode;
    use std::time::Duration;

    fn settings() -> BreakerSettings {
        BreakerSettings {
            enabled: true,
            threshold_ms: 1000.0,
            window: Duration::from_secs(15 * 60),
            sample_count: 3,
        }
    }

    fn attempt(id: u64, started_at_ms: i64, duration_ms: u64) -> CollectionAttempt {
        let mut a = CollectionAttempt::new(id, CollectionType::Sample, Mode::Normal, started_at_ms);
        a.finished_at_ms = Some(started_at_ms + duration_ms as i64);
        a.duration_ms = Some(duration_ms);
        a.success = true;
        a
    }

    const NOW: i64 = 10_000_000;

    #[test]
    fn k_slow_attempts_open_the_breaker() {
        let history: Vec<_> = (0..3).map(|i| attempt(i, NOW - 60_000 * (i as i64 + 1), 1500)).collect();
        let decision = evaluate(&history, CollectionType::Sample, &settings(), NOW);
        assert!(decision.open);
        assert_eq!(decision.samples, 3);
        assert_eq!(decision.avg_ms, Some(1500.0));
        assert!(matches!(
            decision.skip_reason(),
            Some(SkipReason::CircuitBreaker { .. })
        ));
    }

    #[test]
    fn fast_attempts_keep_it_closed() {
        let history: Vec<_> = (0..3).map(|i| attempt(i, NOW - 60_000 * (i as i64 + 1), 200)).collect();
        assert!(!should_skip(&history, CollectionType::Sample, &settings(), NOW));
    }

    #[test]
    fn only_the_latest_k_are_averaged() {
        let mut history = vec![
            attempt(1, NOW - 240_000, 9000),
            attempt(2, NOW - 180_000, 100),
            attempt(3, NOW - 120_000, 100),
            attempt(4, NOW - 60_000, 100),
        ];
        assert!(!should_skip(&history, CollectionType::Sample, &settings(), NOW));

        history.push(attempt(5, NOW - 30_000, 5000));
        // (5000 + 100 + 100) / 3
        let decision = evaluate(&history, CollectionType::Sample, &settings(), NOW);
        assert!(decision.open);
    }

    #[test]
    fn skipped_failed_and_old_attempts_are_ignored() {
        let mut skipped = attempt(1, NOW - 1000, 5000);
        skipped.skip_reason = Some(SkipReason::CheckpointActive);
        let mut failed = attempt(2, NOW - 2000, 5000);
        failed.success = false;
        let old = attempt(3, NOW - 16 * 60_000, 5000);
        let mut inflight = attempt(4, NOW - 500, 5000);
        inflight.duration_ms = None;
        let mut flush = attempt(5, NOW - 3000, 5000);
        flush.collection_type = CollectionType::Flush;

        let history = vec![skipped, failed, old, inflight, flush];
        let decision = evaluate(&history, CollectionType::Sample, &settings(), NOW);
        assert!(!decision.open);
        assert_eq!(decision.samples, 0);
    }

    #[test]
    fn disabled_breaker_never_opens() {
        let history: Vec<_> = (0..3).map(|i| attempt(i, NOW - 1000, 60_000)).collect();
        let settings = BreakerSettings {
            enabled: false,
            ..settings()
        };
        assert!(!should_skip(&history, CollectionType::Sample, &settings, NOW));
    }
}
