//! Collection attempt history.
//!
//! Attempts live in memory while in flight. Finished attempts (including
//! skips) are appended to the `attempts` segment log and reloaded on open,
//! so the circuit breaker and mode controller keep their history across
//! restarts.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use tracing::warn;

use super::StoreError;
use super::model::{CollectionAttempt, CollectionType, Mode};
use super::segment::{RetentionResult, SegmentLog, SegmentRecord};

const PREFIX: &str = "attempts";

impl SegmentRecord for CollectionAttempt {
    fn timestamp(&self) -> i64 {
        self.started_at_secs()
    }
}

#[derive(Debug)]
struct State {
    next_id: u64,
    /// Oldest first.
    attempts: Vec<CollectionAttempt>,
}

#[derive(Debug)]
pub struct AttemptLog {
    log: SegmentLog<CollectionAttempt>,
    state: Mutex<State>,
}

impl AttemptLog {
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        let log: SegmentLog<CollectionAttempt> = SegmentLog::open(dir, PREFIX)?;
        let mut attempts = log.read_all()?;
        attempts.sort_by_key(|a| (a.started_at_ms, a.id));
        let next_id = attempts.iter().map(|a| a.id).max().map_or(1, |id| id + 1);
        Ok(Self {
            log,
            state: Mutex::new(State { next_id, attempts }),
        })
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a new in-flight attempt and returns a copy of it.
    pub fn begin(
        &self,
        collection_type: CollectionType,
        mode: Mode,
        now_ms: i64,
    ) -> CollectionAttempt {
        let mut state = self.state();
        let attempt = CollectionAttempt::new(state.next_id, collection_type, mode, now_ms);
        state.next_id += 1;
        state.attempts.push(attempt.clone());
        attempt
    }

    /// Stores the final state of an attempt started with [`AttemptLog::begin`].
    ///
    /// Fills in `finished_at_ms`/`duration_ms` when the caller left them unset.
    pub fn finish(&self, mut attempt: CollectionAttempt, now_ms: i64) -> Result<CollectionAttempt, StoreError> {
        let finished = *attempt.finished_at_ms.get_or_insert(now_ms);
        if attempt.duration_ms.is_none() {
            attempt.duration_ms = Some((finished - attempt.started_at_ms).max(0) as u64);
        }

        {
            let mut state = self.state();
            match state.attempts.iter_mut().rev().find(|a| a.id == attempt.id) {
                Some(slot) => *slot = attempt.clone(),
                None => {
                    warn!(id = attempt.id, "finishing unknown attempt");
                    state.attempts.push(attempt.clone());
                }
            }
        }
        self.log.append(&attempt)?;
        Ok(attempt)
    }

    /// Up to `limit` most recent attempts (newest first), optionally of one type.
    pub fn recent(&self, collection_type: Option<CollectionType>, limit: usize) -> Vec<CollectionAttempt> {
        self.state()
            .attempts
            .iter()
            .rev()
            .filter(|a| collection_type.is_none_or(|t| a.collection_type == t))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Attempts of `collection_type` started at or after `since_ms`, newest first.
    pub fn since(&self, collection_type: CollectionType, since_ms: i64) -> Vec<CollectionAttempt> {
        self.state()
            .attempts
            .iter()
            .rev()
            .filter(|a| a.collection_type == collection_type && a.started_at_ms >= since_ms)
            .cloned()
            .collect()
    }

    /// A non-stale in-flight attempt of `collection_type`, if any.
    ///
    /// In-flight attempts older than `stale_after` are treated as abandoned.
    pub fn inflight(
        &self,
        collection_type: CollectionType,
        now_ms: i64,
        stale_after: Duration,
    ) -> Option<CollectionAttempt> {
        let stale_ms = stale_after.as_millis() as i64;
        self.state()
            .attempts
            .iter()
            .rev()
            .find(|a| {
                a.collection_type == collection_type
                    && a.is_inflight()
                    && now_ms - a.started_at_ms < stale_ms
            })
            .cloned()
    }

    /// Number of sample attempts skipped by the circuit breaker since `since_ms`.
    pub fn breaker_skips_since(&self, since_ms: i64) -> usize {
        self.state()
            .attempts
            .iter()
            .filter(|a| {
                a.collection_type == CollectionType::Sample
                    && a.started_at_ms >= since_ms
                    && a.skip_reason.as_ref().is_some_and(|r| r.is_circuit_breaker())
            })
            .count()
    }

    /// Deletes finished attempts started strictly before `cutoff_ms`.
    pub fn purge_before(&self, cutoff_ms: i64) -> Result<RetentionResult, StoreError> {
        self.state()
            .attempts
            .retain(|a| a.is_inflight() || a.started_at_ms >= cutoff_ms);
        // Segment retention works in whole seconds; rounding down never drops
        // an attempt at or after the cutoff.
        let cutoff_secs = cutoff_ms.div_euclid(1000);
        self.log.retain_after(cutoff_secs)
    }

    pub fn len(&self) -> usize {
        self.state().attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::model::SkipReason;
    use tempfile::tempdir;

    fn skip(log: &AttemptLog, at_ms: i64, reason: SkipReason) {
        let mut a = log.begin(CollectionType::Sample, Mode::Normal, at_ms);
        a.skip_reason = Some(reason);
        a.success = true;
        log.finish(a, at_ms).unwrap();
    }

    #[test]
    fn finished_attempts_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let log = AttemptLog::open(dir.path()).unwrap();
            let mut a = log.begin(CollectionType::Flush, Mode::Normal, 10_000);
            a.success = true;
            let a = log.finish(a, 10_250).unwrap();
            assert_eq!(a.duration_ms, Some(250));
        }

        let log = AttemptLog::open(dir.path()).unwrap();
        let recent = log.recent(None, 10);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].collection_type, CollectionType::Flush);
        assert_eq!(log.begin(CollectionType::Sample, Mode::Normal, 20_000).id, 2);
    }

    #[test]
    fn inflight_ignores_stale_and_finished_attempts() {
        let dir = tempdir().unwrap();
        let log = AttemptLog::open(dir.path()).unwrap();
        let stale = Duration::from_secs(600);

        let a = log.begin(CollectionType::Sample, Mode::Normal, 0);
        assert!(log.inflight(CollectionType::Sample, 1_000, stale).is_some());
        assert!(log.inflight(CollectionType::Flush, 1_000, stale).is_none());
        assert!(log.inflight(CollectionType::Sample, 600_000, stale).is_none());

        log.finish(a, 2_000).unwrap();
        assert!(log.inflight(CollectionType::Sample, 2_500, stale).is_none());
    }

    #[test]
    fn breaker_skips_are_counted_inside_window() {
        let dir = tempdir().unwrap();
        let log = AttemptLog::open(dir.path()).unwrap();
        let breaker = SkipReason::CircuitBreaker {
            avg_ms: 1500.0,
            threshold_ms: 1000.0,
        };
        skip(&log, 1_000, breaker.clone());
        skip(&log, 61_000, breaker.clone());
        skip(&log, 121_000, SkipReason::CheckpointActive);

        assert_eq!(log.breaker_skips_since(0), 2);
        assert_eq!(log.breaker_skips_since(60_000), 1);
    }

    #[test]
    fn purge_keeps_inflight_attempts() {
        let dir = tempdir().unwrap();
        let log = AttemptLog::open(dir.path()).unwrap();
        skip(&log, 1_000, SkipReason::Disabled);
        let _running = log.begin(CollectionType::Archive, Mode::Normal, 2_000);
        skip(&log, 9_000_000, SkipReason::Disabled);

        log.purge_before(5_000_000).unwrap();
        assert_eq!(log.len(), 2);
        assert!(log.recent(Some(CollectionType::Sample), 10)[0].started_at_ms == 9_000_000);
    }
}
