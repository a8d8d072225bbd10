//! Sampling cycle.
//!
//! ```text
//! SCHEDULED ──► PRECHECK ──┬──► SKIPPED (skip reason recorded)
//!                          │
//!                          └──► RUNNING ──┬──► COMPLETED (success, section counts)
//!                                         └──► FAILED    (fatal error recorded)
//! ```
//!
//! Jitter is applied by the scheduler when computing the next fire time,
//! not inside the cycle.
//!
//! RUNNING executes the sections enabled by the current mode. Each section
//! gets a fresh [`SectionBudget`]; a section that fails or overruns its
//! budget is recorded in the attempt and the cycle continues. Only errors
//! outside a section (server version, precheck signals, ring write) fail the
//! cycle.

pub mod sections;

use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::collector::{SectionBudget, SurfaceError, TargetSurface};
use crate::config::{ConfigStore, RecorderConfig};
use crate::control::mode::RECOVERY_FACTOR;
use crate::control::{ModeController, ModeInputs, ModeTransition, PrecheckInput, PrecheckOutcome, run_prechecks};
use crate::rates::LoadRateState;
use crate::storage::model::{
    CollectionAttempt, CollectionType, Mode, Section, SectionReport, SectionStatus, SkipReason,
};
use crate::storage::{AttemptLog, RingBuffer, SlotWrite, StoreError, WriteSummary};
use sections::{LockCapture, capture_locks, capture_sessions, capture_wait_events};

/// Error type for a sampling cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectError {
    /// One section failed; recorded in the attempt, never aborts the cycle.
    Transient {
        section: Section,
        message: String,
        timed_out: bool,
    },
    /// Failure outside any section; the attempt is marked failed.
    Fatal(String),
}

impl std::fmt::Display for CollectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectError::Transient {
                section, message, ..
            } => write!(f, "{} section failed: {}", section, message),
            CollectError::Fatal(msg) => write!(f, "collection failed: {}", msg),
        }
    }
}

impl std::error::Error for CollectError {}

impl From<StoreError> for CollectError {
    fn from(e: StoreError) -> Self {
        CollectError::Fatal(e.to_string())
    }
}

impl From<SurfaceError> for CollectError {
    fn from(e: SurfaceError) -> Self {
        CollectError::Fatal(e.to_string())
    }
}

/// Result of one completed (or skipped) cycle.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub attempt: CollectionAttempt,
    /// Ring write, `None` when the cycle was skipped.
    pub write: Option<WriteSummary>,
    /// Mode switch decided after this cycle; applies from the next one.
    pub mode_change: Option<ModeTransition>,
}

/// Runs sampling cycles against one target.
pub struct Sampler<S: TargetSurface> {
    surface: S,
    rates: LoadRateState,
    last_connection_pct: Option<f64>,
}

impl<S: TargetSurface> Sampler<S> {
    pub fn new(surface: S) -> Self {
        Self {
            surface,
            rates: LoadRateState::default(),
            last_connection_pct: None,
        }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    /// Runs one cycle at `now_ms` and records its attempt.
    ///
    /// Skips and section failures are returned as a successful outcome. A
    /// fatal error is recorded in the attempt log and then returned.
    pub fn run_cycle(
        &mut self,
        store: &ConfigStore,
        ring: &RingBuffer,
        attempts: &AttemptLog,
        now_ms: i64,
    ) -> Result<CycleOutcome, CollectError> {
        let config = store.snapshot();
        // Looked up before registering this cycle, so it cannot find itself.
        let inflight = attempts.inflight(CollectionType::Sample, now_ms, config.dedup.stale_after);
        let mut attempt = attempts.begin(CollectionType::Sample, config.mode.current, now_ms);
        let started = Instant::now();

        let result = self.execute(&config, ring, attempts, inflight.as_ref(), &mut attempt, now_ms);

        let duration_ms = started.elapsed().as_millis() as u64;
        attempt.duration_ms = Some(duration_ms);
        attempt.finished_at_ms = Some(now_ms + duration_ms as i64);
        let (write, fatal) = match result {
            Ok(write) => (write, None),
            Err(e) => (None, Some(e)),
        };
        match &fatal {
            Some(e) => {
                error!(error = %e, "sampling cycle failed");
                attempt.success = false;
                attempt.error_message = Some(e.to_string());
            }
            None => attempt.success = true,
        }
        let attempt = attempts.finish(attempt, now_ms + duration_ms as i64)?;

        let mode_change = self.update_mode(store, &config, attempts, now_ms);
        if let Some(e) = fatal {
            return Err(e);
        }

        debug!(
            attempt = attempt.id,
            mode = %attempt.mode,
            duration_ms,
            skipped = attempt.is_skipped(),
            sections = attempt.sections_total,
            succeeded = attempt.sections_succeeded,
            "sampling cycle finished"
        );
        Ok(CycleOutcome {
            attempt,
            write,
            mode_change,
        })
    }

    fn execute(
        &mut self,
        config: &RecorderConfig,
        ring: &RingBuffer,
        attempts: &AttemptLog,
        inflight: Option<&CollectionAttempt>,
        attempt: &mut CollectionAttempt,
        now_ms: i64,
    ) -> Result<Option<WriteSummary>, CollectError> {
        if !config.enabled {
            attempt.skip_reason = Some(SkipReason::Disabled);
            return Ok(None);
        }

        let window_start = now_ms - config.breaker.window.as_millis() as i64;
        let history = attempts.since(CollectionType::Sample, window_start);
        let input = PrecheckInput {
            config,
            collection_type: CollectionType::Sample,
            history: &history,
            inflight,
            now_ms,
        };
        let outcome = run_prechecks(&mut self.surface, &mut self.rates, &input)
            .map_err(|e| CollectError::Fatal(format!("precheck: {}", e)))?;
        if let Some(stats) = outcome.observations().connections {
            self.last_connection_pct = Some(stats.active_pct());
        }
        if let PrecheckOutcome::Skip(reason, _) = outcome {
            info!(reason = reason.tag(), detail = %reason, "sampling cycle skipped");
            attempt.skip_reason = Some(reason);
            return Ok(None);
        }

        self.surface.server_version()?;

        let epoch_seconds = now_ms.div_euclid(1000);
        let slot_id = ring.slot_for(epoch_seconds);
        let caps = ring.row_capacities();
        let timeout = config.sampler.section_timeout;
        let mode = config.mode.current;
        let mut write = SlotWrite::default();

        if mode.enables(Section::WaitEvents) {
            let (result, duration_ms) =
                self.timed(Section::WaitEvents, timeout, |s, b| capture_wait_events(s, b));
            let status = match result {
                Ok(rows) => {
                    let status = SectionStatus::Captured {
                        rows: rows.len().min(caps.wait_events),
                    };
                    write.wait_events = Some(rows);
                    status
                }
                Err(status) => status,
            };
            attempt.push_section(report(Section::WaitEvents, status, duration_ms));
        }

        if mode.enables(Section::Sessions) {
            let limit = caps.sessions;
            let max_len = config.sampler.query_max_length;
            let (result, duration_ms) = self.timed(Section::Sessions, timeout, |s, b| {
                capture_sessions(s, limit, max_len, b)
            });
            let status = match result {
                Ok(rows) => {
                    let status = SectionStatus::Captured {
                        rows: rows.len().min(caps.sessions),
                    };
                    write.sessions = Some(rows);
                    status
                }
                Err(status) => status,
            };
            attempt.push_section(report(Section::Sessions, status, duration_ms));
        }

        if mode.enables(Section::Locks) {
            let threshold = config.sampler.lock_storm_threshold;
            let max_len = config.sampler.query_max_length;
            let (result, duration_ms) = self.timed(Section::Locks, timeout, |s, b| {
                capture_locks(s, threshold, max_len, b)
            });
            let status = match result {
                Ok(LockCapture::Rows(rows)) => {
                    let status = SectionStatus::Captured {
                        rows: rows.len().min(caps.locks),
                    };
                    write.locks = Some(rows);
                    status
                }
                Ok(LockCapture::StormGuard { blocked, threshold }) => {
                    warn!(blocked, threshold, "lock storm, lock capture skipped");
                    write.locks = Some(Vec::new());
                    SectionStatus::Skipped {
                        reason: format!(
                            "lock storm: {} blocked sessions above threshold {}",
                            blocked, threshold
                        ),
                    }
                }
                Err(status) => status,
            };
            attempt.push_section(report(Section::Locks, status, duration_ms));
        }

        let summary = ring.write(slot_id, epoch_seconds, write)?;
        if summary.dropped_rows > 0 {
            debug!(
                slot_id,
                dropped = summary.dropped_rows,
                "rows beyond slot capacity dropped"
            );
        }
        Ok(Some(summary))
    }

    /// Runs one section under a fresh budget.
    ///
    /// Rows returned after the budget ran out are discarded and the section
    /// is reported as timed out.
    fn timed<T>(
        &mut self,
        section: Section,
        timeout: Duration,
        capture: impl FnOnce(&mut dyn TargetSurface, &SectionBudget) -> Result<T, CollectError>,
    ) -> (Result<T, SectionStatus>, u64) {
        let budget = SectionBudget::new(timeout);
        let result = capture(&mut self.surface, &budget);
        let duration_ms = budget.elapsed().as_millis() as u64;

        let result = match result {
            Ok(_) if budget.expired() => {
                warn!(%section, duration_ms, "section exceeded its time budget, rows discarded");
                Err(SectionStatus::TimedOut)
            }
            Ok(rows) => Ok(rows),
            Err(CollectError::Transient { timed_out: true, .. }) => {
                warn!(%section, duration_ms, "section timed out");
                Err(SectionStatus::TimedOut)
            }
            Err(e) => {
                warn!(%section, error = %e, "section failed");
                Err(SectionStatus::Failed {
                    error: e.to_string(),
                })
            }
        };
        (result, duration_ms)
    }

    fn update_mode(
        &self,
        store: &ConfigStore,
        config: &RecorderConfig,
        attempts: &AttemptLog,
        now_ms: i64,
    ) -> Option<ModeTransition> {
        let current = config.mode.current;
        // Without any connection observation yet, hold the connection-driven state.
        let connection_pct = self.last_connection_pct.unwrap_or(match current {
            Mode::Light => config.mode.warning_connection_pct * RECOVERY_FACTOR,
            _ => 0.0,
        });
        let window_start = now_ms - config.mode.window.as_millis() as i64;
        let inputs = ModeInputs {
            current,
            connection_pct,
            breaker_skips: attempts.breaker_skips_since(window_start),
        };
        ModeController::apply(store, &config.mode, inputs)
    }
}

fn report(section: Section, status: SectionStatus, duration_ms: u64) -> SectionReport {
    SectionReport {
        section,
        status,
        duration_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::MockSurface;
    use crate::config::keys;
    use tempfile::tempdir;

    const NOW: i64 = 1_700_000_040_000;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: ConfigStore,
        ring: RingBuffer,
        attempts: AttemptLog,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new();
        let ring = RingBuffer::from_settings(&store.snapshot().ring).unwrap();
        let attempts = AttemptLog::open(dir.path()).unwrap();
        Fixture {
            _dir: dir,
            store,
            ring,
            attempts,
        }
    }

    #[test]
    fn full_cycle_fills_the_slot() {
        let f = fixture();
        let mut sampler = Sampler::new(MockSurface::typical());
        let outcome = sampler.run_cycle(&f.store, &f.ring, &f.attempts, NOW).unwrap();

        let attempt = &outcome.attempt;
        assert!(attempt.success);
        assert_eq!(attempt.sections_total, 3);
        assert_eq!(attempt.sections_succeeded, 3);

        let write = outcome.write.unwrap();
        let slot = f.ring.read_slot(write.slot_id).unwrap();
        assert_eq!(slot.epoch_seconds, NOW / 1000);
        assert_eq!(slot.wait_events.len(), 3);
        assert_eq!(slot.sessions.len(), 4);
        assert_eq!(slot.locks.len(), 2);
        assert_eq!(f.attempts.recent(None, 1)[0].id, attempt.id);
    }

    #[test]
    fn one_failing_section_does_not_fail_the_cycle() {
        let f = fixture();
        let mut sampler = Sampler::new(MockSurface::typical().fail_section(Section::Sessions));
        let outcome = sampler.run_cycle(&f.store, &f.ring, &f.attempts, NOW).unwrap();

        let attempt = &outcome.attempt;
        assert!(attempt.success);
        assert_eq!(attempt.sections_succeeded, attempt.sections_total - 1);
        assert!(matches!(
            attempt.sections[1].status,
            SectionStatus::Failed { .. }
        ));

        let slot = f.ring.read_slot(outcome.write.unwrap().slot_id).unwrap();
        assert!(slot.sessions.is_empty());
        assert_eq!(slot.wait_events.len(), 3);
    }

    #[test]
    fn timed_out_section_is_recorded() {
        let f = fixture();
        let mut sampler = Sampler::new(MockSurface::typical().time_out_section(Section::Locks));
        let outcome = sampler.run_cycle(&f.store, &f.ring, &f.attempts, NOW).unwrap();
        assert_eq!(outcome.attempt.sections[2].status, SectionStatus::TimedOut);
        assert_eq!(outcome.attempt.sections_succeeded, 2);
    }

    #[test]
    fn lock_storm_writes_no_lock_rows() {
        let f = fixture();
        // Leave stale lock rows in the slot first.
        let mut sampler = Sampler::new(MockSurface::typical());
        let first = sampler.run_cycle(&f.store, &f.ring, &f.attempts, NOW).unwrap();
        assert_eq!(f.ring.read_slot(first.write.unwrap().slot_id).unwrap().locks.len(), 2);

        let mut sampler = Sampler::new(MockSurface::lock_storm(200));
        let outcome = sampler.run_cycle(&f.store, &f.ring, &f.attempts, NOW + 1000).unwrap();

        let locks = &outcome.attempt.sections[2];
        assert!(matches!(locks.status, SectionStatus::Skipped { .. }));
        assert_eq!(outcome.attempt.sections_succeeded, 3);
        let slot = f.ring.read_slot(outcome.write.unwrap().slot_id).unwrap();
        assert!(slot.locks.is_empty());
        assert!(!sampler.surface().called("blocked_sessions"));
    }

    #[test]
    fn disabled_recorder_records_a_skip() {
        let f = fixture();
        f.store.set(keys::ENABLED, false);
        let mut sampler = Sampler::new(MockSurface::typical());
        let outcome = sampler.run_cycle(&f.store, &f.ring, &f.attempts, NOW).unwrap();

        assert_eq!(outcome.attempt.skip_reason, Some(SkipReason::Disabled));
        assert!(outcome.write.is_none());
        assert!(sampler.surface().calls.is_empty());
        assert_eq!(f.ring.occupied(NOW / 1000), 0);
    }

    #[test]
    fn emergency_mode_only_captures_wait_events() {
        let f = fixture();
        f.store.set(keys::MODE_CURRENT, "emergency");
        f.store.set(keys::MODE_AUTO, false);
        let mut sampler = Sampler::new(MockSurface::typical());
        let outcome = sampler.run_cycle(&f.store, &f.ring, &f.attempts, NOW).unwrap();

        assert_eq!(outcome.attempt.mode, Mode::Emergency);
        assert_eq!(outcome.attempt.sections_total, 1);
        assert_eq!(outcome.attempt.sections[0].section, Section::WaitEvents);
        assert!(!sampler.surface().called("sessions"));
    }

    #[test]
    fn unsupported_server_fails_the_attempt() {
        let f = fixture();
        let mut surface = MockSurface::typical();
        surface.version = 90600;
        let mut sampler = Sampler::new(surface);

        let err = sampler.run_cycle(&f.store, &f.ring, &f.attempts, NOW).unwrap_err();
        assert!(matches!(err, CollectError::Fatal(_)));

        let recorded = &f.attempts.recent(None, 1)[0];
        assert!(!recorded.success);
        assert!(recorded.error_message.as_deref().unwrap_or("").contains("unsupported"));
    }

    #[test]
    fn high_connection_usage_moves_to_light_mode() {
        let f = fixture();
        let mut surface = MockSurface::typical();
        surface.connections.active = 65;
        let mut sampler = Sampler::new(surface);

        let outcome = sampler.run_cycle(&f.store, &f.ring, &f.attempts, NOW).unwrap();
        // The cycle itself still ran in normal mode.
        assert_eq!(outcome.attempt.mode, Mode::Normal);
        assert_eq!(outcome.attempt.sections_total, 3);
        assert_eq!(outcome.mode_change.map(|t| t.to), Some(Mode::Light));
        assert_eq!(f.store.snapshot().mode.current, Mode::Light);
    }

    #[test]
    fn repeated_breaker_skips_escalate_to_emergency() {
        let f = fixture();
        for i in 0..3 {
            let mut a = f.attempts.begin(CollectionType::Sample, Mode::Normal, NOW - 600_000 + i * 60_000);
            a.success = true;
            a.duration_ms = Some(5_000);
            f.attempts.finish(a, NOW - 595_000 + i * 60_000).unwrap();
        }

        let mut sampler = Sampler::new(MockSurface::typical());
        let mut last = None;
        for i in 0..3 {
            let outcome = sampler
                .run_cycle(&f.store, &f.ring, &f.attempts, NOW + i * 60_000)
                .unwrap();
            assert!(outcome.attempt.skip_reason.as_ref().is_some_and(|r| r.is_circuit_breaker()));
            last = outcome.mode_change.or(last);
        }
        assert_eq!(last.map(|t| t.to), Some(Mode::Emergency));
        assert_eq!(f.store.snapshot().mode.current, Mode::Emergency);
    }
}
