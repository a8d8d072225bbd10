//! Precheck gates of a sampling cycle.
//!
//! Every gate is a pure function of already-fetched signals and can be tested
//! on its own. [`run_prechecks`] evaluates them in order, fetching each signal
//! from the target only when the gates before it have passed:
//!
//! 1. circuit breaker (attempt history, no server access)
//! 2. health (replay lag, checkpoint, backup, statistics churn)
//! 3. deduplication (local in-flight attempt, other recorder sessions)
//! 4. load shedding (active connection percentage)
//! 5. load throttling (transaction and block I/O rates)
//! 6. idle skip (opt-in)
//!
//! The first gate that fires decides the [`SkipReason`].

use std::time::Duration;

use super::circuit_breaker;
use crate::collector::{
    ConnectionStats, HealthSignals, SectionBudget, SurfaceError, TargetSurface,
};
use crate::config::{
    HealthSettings, IdleSettings, RecorderConfig, SheddingSettings, ThrottleSettings,
};
use crate::rates::{LoadRateState, LoadRates};
use crate::storage::model::{CollectionAttempt, CollectionType, SkipReason};

pub fn check_breaker(
    history: &[CollectionAttempt],
    collection_type: CollectionType,
    config: &RecorderConfig,
    now_ms: i64,
) -> Option<SkipReason> {
    circuit_breaker::evaluate(history, collection_type, &config.breaker, now_ms).skip_reason()
}

pub fn check_health(signals: &HealthSignals, settings: &HealthSettings) -> Option<SkipReason> {
    if let Some(lag) = signals.replay_lag_seconds
        && lag > settings.max_replay_lag_seconds
    {
        return Some(SkipReason::ReplicationLag {
            lag_seconds: lag,
            max_seconds: settings.max_replay_lag_seconds,
        });
    }
    if settings.skip_on_checkpoint && signals.checkpoint_active {
        return Some(SkipReason::CheckpointActive);
    }
    if settings.skip_on_backup && signals.backup_active {
        return Some(SkipReason::BackupActive);
    }
    if let Some(churn) = signals.stats_churn
        && churn > settings.max_stats_churn
    {
        return Some(SkipReason::StatsChurn {
            ratio: churn,
            max_ratio: settings.max_stats_churn,
        });
    }
    None
}

/// Advisory only: two processes can still race past this check.
pub fn check_dedup(inflight: Option<&CollectionAttempt>, other_recorders: u32) -> Option<SkipReason> {
    if let Some(attempt) = inflight {
        return Some(SkipReason::AlreadyRunning {
            holder: format!("attempt {} started at {}ms", attempt.id, attempt.started_at_ms),
        });
    }
    if other_recorders > 0 {
        return Some(SkipReason::AlreadyRunning {
            holder: format!("{} other recorder session(s) on the server", other_recorders),
        });
    }
    None
}

pub fn check_shedding(stats: &ConnectionStats, settings: &SheddingSettings) -> Option<SkipReason> {
    let pct = stats.active_pct();
    (settings.enabled && pct > settings.max_connection_pct).then(|| SkipReason::LoadShedding {
        connection_pct: pct,
        max_pct: settings.max_connection_pct,
    })
}

pub fn check_throttle(rates: &LoadRates, settings: &ThrottleSettings) -> Option<SkipReason> {
    if !settings.enabled {
        return None;
    }
    if rates.tps > settings.max_tps {
        return Some(SkipReason::LoadThrottling {
            metric: "transactions".to_string(),
            rate: rates.tps,
            max_rate: settings.max_tps,
        });
    }
    if rates.block_io_per_second > settings.max_block_io_per_second {
        return Some(SkipReason::LoadThrottling {
            metric: "block_io".to_string(),
            rate: rates.block_io_per_second,
            max_rate: settings.max_block_io_per_second,
        });
    }
    None
}

pub fn check_idle(stats: &ConnectionStats, settings: &IdleSettings) -> Option<SkipReason> {
    (settings.enabled && stats.active < settings.min_active_connections).then(|| SkipReason::Idle {
        active: stats.active,
        min_active: settings.min_active_connections,
    })
}

/// Inputs of one precheck run.
#[derive(Debug, Clone, Copy)]
pub struct PrecheckInput<'a> {
    pub config: &'a RecorderConfig,
    pub collection_type: CollectionType,
    /// Attempt history covering at least the breaker window.
    pub history: &'a [CollectionAttempt],
    /// Non-stale in-flight attempt of the same type, found before this one began.
    pub inflight: Option<&'a CollectionAttempt>,
    pub now_ms: i64,
}

/// Signals fetched while running the gates.
#[derive(Debug, Clone, Default)]
pub struct Observations {
    pub health: Option<HealthSignals>,
    pub connections: Option<ConnectionStats>,
    pub rates: Option<LoadRates>,
}

#[derive(Debug, Clone)]
pub enum PrecheckOutcome {
    Proceed(Observations),
    Skip(SkipReason, Observations),
}

impl PrecheckOutcome {
    pub fn observations(&self) -> &Observations {
        match self {
            PrecheckOutcome::Proceed(o) | PrecheckOutcome::Skip(_, o) => o,
        }
    }

    pub fn skip_reason(&self) -> Option<&SkipReason> {
        match self {
            PrecheckOutcome::Proceed(_) => None,
            PrecheckOutcome::Skip(reason, _) => Some(reason),
        }
    }
}

/// Runs the gates in order; the first one that fires wins.
///
/// A server error while fetching a signal is returned as is; it happens
/// outside any capture section.
pub fn run_prechecks(
    surface: &mut dyn TargetSurface,
    rate_state: &mut LoadRateState,
    input: &PrecheckInput<'_>,
) -> Result<PrecheckOutcome, SurfaceError> {
    let config = input.config;
    let timeout = config.sampler.section_timeout;
    let mut seen = Observations::default();

    if let Some(reason) = check_breaker(input.history, input.collection_type, config, input.now_ms) {
        return Ok(PrecheckOutcome::Skip(reason, seen));
    }

    let health = surface.health(&budget(timeout))?;
    let verdict = check_health(&health, &config.health);
    seen.health = Some(health);
    if let Some(reason) = verdict {
        return Ok(PrecheckOutcome::Skip(reason, seen));
    }

    let other_recorders = match input.inflight {
        Some(_) => 0,
        None => surface.other_recorders(&budget(timeout))?,
    };
    if let Some(reason) = check_dedup(input.inflight, other_recorders) {
        return Ok(PrecheckOutcome::Skip(reason, seen));
    }

    let connections = surface.connection_stats(&budget(timeout))?;
    seen.connections = Some(connections);
    if let Some(reason) = check_shedding(&connections, &config.shedding) {
        return Ok(PrecheckOutcome::Skip(reason, seen));
    }

    if config.throttle.enabled {
        let rates = rate_state.observe(surface.counters(&budget(timeout))?);
        seen.rates = Some(rates);
        if let Some(reason) = check_throttle(&rates, &config.throttle) {
            return Ok(PrecheckOutcome::Skip(reason, seen));
        }
    }

    if let Some(reason) = check_idle(&connections, &config.idle) {
        return Ok(PrecheckOutcome::Skip(reason, seen));
    }

    Ok(PrecheckOutcome::Proceed(seen))
}

fn budget(timeout: Duration) -> SectionBudget {
    SectionBudget::new(timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::MockSurface;
    use crate::config::ConfigStore;
    use crate::config::keys;
    use crate::storage::model::Mode;

    const NOW: i64 = 1_700_000_000_000;

    fn run(surface: &mut MockSurface, config: &RecorderConfig) -> PrecheckOutcome {
        let mut rates = LoadRateState::default();
        let input = PrecheckInput {
            config,
            collection_type: CollectionType::Sample,
            history: &[],
            inflight: None,
            now_ms: NOW,
        };
        run_prechecks(surface, &mut rates, &input).unwrap()
    }

    #[test]
    fn typical_server_passes_every_gate() {
        let mut surface = MockSurface::typical();
        let outcome = run(&mut surface, &RecorderConfig::default());
        assert!(outcome.skip_reason().is_none());
        assert!(outcome.observations().connections.is_some());
        assert!(outcome.observations().rates.is_some());
    }

    #[test]
    fn breaker_fires_before_touching_the_server() {
        let config = RecorderConfig::default();
        let history: Vec<CollectionAttempt> = (0..3)
            .map(|i| {
                let mut a = CollectionAttempt::new(i, CollectionType::Sample, Mode::Normal, NOW - 60_000);
                a.finished_at_ms = Some(NOW - 57_000);
                a.duration_ms = Some(3_000);
                a.success = true;
                a
            })
            .collect();
        let mut surface = MockSurface::typical();
        let mut rates = LoadRateState::default();
        let input = PrecheckInput {
            config: &config,
            collection_type: CollectionType::Sample,
            history: &history,
            inflight: None,
            now_ms: NOW,
        };

        let outcome = run_prechecks(&mut surface, &mut rates, &input).unwrap();
        assert!(matches!(
            outcome.skip_reason(),
            Some(SkipReason::CircuitBreaker { .. })
        ));
        assert!(surface.calls.is_empty());
    }

    #[test]
    fn lagging_replica_is_skipped() {
        let mut surface = MockSurface::replica_lagging(900.0);
        let outcome = run(&mut surface, &RecorderConfig::default());
        assert!(matches!(
            outcome.skip_reason(),
            Some(SkipReason::ReplicationLag { lag_seconds, .. }) if *lag_seconds == 900.0
        ));
    }

    #[test]
    fn overloaded_server_is_shed() {
        let mut surface = MockSurface::overloaded();
        let outcome = run(&mut surface, &RecorderConfig::default());
        assert!(matches!(
            outcome.skip_reason(),
            Some(SkipReason::LoadShedding { .. })
        ));
        assert!(!surface.called("counters"));
    }

    #[test]
    fn other_recorder_session_deduplicates() {
        let mut surface = MockSurface::typical();
        surface.other_recorders = 1;
        let outcome = run(&mut surface, &RecorderConfig::default());
        assert!(matches!(
            outcome.skip_reason(),
            Some(SkipReason::AlreadyRunning { .. })
        ));
    }

    #[test]
    fn idle_skip_is_opt_in() {
        let store = ConfigStore::new();
        let mut surface = MockSurface::idle();
        assert!(run(&mut surface, &store.snapshot()).skip_reason().is_none());

        store.set(keys::IDLE_ENABLED, true);
        let mut surface = MockSurface::idle();
        assert!(matches!(
            run(&mut surface, &store.snapshot()).skip_reason(),
            Some(SkipReason::Idle { active: 0, min_active: 1 })
        ));
    }

    #[test]
    fn health_gate_order_and_switches() {
        let settings = RecorderConfig::default().health;
        let signals = HealthSignals {
            replay_lag_seconds: None,
            checkpoint_active: true,
            backup_active: true,
            stats_churn: Some(0.9),
        };
        assert_eq!(
            check_health(&signals, &settings),
            Some(SkipReason::CheckpointActive)
        );

        let settings = HealthSettings {
            skip_on_checkpoint: false,
            skip_on_backup: false,
            ..settings
        };
        assert!(matches!(
            check_health(&signals, &settings),
            Some(SkipReason::StatsChurn { .. })
        ));
    }

    #[test]
    fn throttle_checks_both_rates() {
        let settings = RecorderConfig::default().throttle;
        let calm = LoadRates {
            tps: 500.0,
            block_io_per_second: 1_000.0,
            from_delta: true,
        };
        assert!(check_throttle(&calm, &settings).is_none());

        let io_heavy = LoadRates {
            block_io_per_second: 80_000.0,
            ..calm
        };
        assert!(matches!(
            check_throttle(&io_heavy, &settings),
            Some(SkipReason::LoadThrottling { metric, .. }) if metric == "block_io"
        ));
    }

    #[test]
    fn throttle_uses_rate_since_previous_cycle() {
        let config = RecorderConfig::default();
        let mut surface = MockSurface::typical();
        let mut rates = LoadRateState::default();
        let input = PrecheckInput {
            config: &config,
            collection_type: CollectionType::Sample,
            history: &[],
            inflight: None,
            now_ms: NOW,
        };

        let first = run_prechecks(&mut surface, &mut rates, &input).unwrap();
        assert!(first.skip_reason().is_none());
        assert!(!first.observations().rates.unwrap().from_delta);

        // A burst far above the limit barely moves the uptime average.
        surface.advance(60.0, 20_000.0, 100.0);
        let second = run_prechecks(&mut surface, &mut rates, &input).unwrap();
        let observed = second.observations().rates.unwrap();
        assert!(observed.from_delta);
        assert_eq!(observed.tps, 20_000.0);
        assert!(matches!(
            second.skip_reason(),
            Some(SkipReason::LoadThrottling { metric, .. }) if metric == "transactions"
        ));
    }

    #[test]
    fn local_inflight_attempt_deduplicates() {
        let running = CollectionAttempt::new(7, CollectionType::Sample, Mode::Normal, NOW - 5_000);
        assert!(matches!(
            check_dedup(Some(&running), 0),
            Some(SkipReason::AlreadyRunning { holder }) if holder.contains("attempt 7")
        ));
        assert!(check_dedup(None, 0).is_none());
    }
}
