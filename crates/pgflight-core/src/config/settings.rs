//! Typed configuration snapshot and startup validation.

use std::time::Duration;

use tracing::warn;

use super::store::ConfigStore;
use super::{ConfigError, keys};
use crate::storage::model::Mode;

/// Upper bound for any interval or jitter key, in seconds (30 days).
pub const MAX_JOB_INTERVAL_SECONDS: u64 = 30 * 86_400;

/// Ring buffer layout.
#[derive(Debug, Clone, PartialEq)]
pub struct RingSettings {
    /// Requested slot count (clamped to `[min_slots, max_slots]`).
    pub slots: usize,
    pub min_slots: usize,
    pub max_slots: usize,
    /// Width of one time bucket in seconds.
    pub slot_interval_seconds: u64,
    pub wait_rows_per_slot: usize,
    pub session_rows_per_slot: usize,
    pub lock_rows_per_slot: usize,
}

impl RingSettings {
    /// Slot count actually provisioned.
    pub fn effective_slots(&self) -> usize {
        self.slots.clamp(self.min_slots, self.max_slots.max(self.min_slots))
    }

    /// Retention horizon: `slots × slot_interval` seconds.
    pub fn horizon_seconds(&self) -> u64 {
        self.effective_slots() as u64 * self.slot_interval_seconds
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplerSettings {
    pub jitter_max_seconds: u64,
    /// Time budget of each capture section.
    pub section_timeout: Duration,
    /// Blocked-session count above which lock capture is skipped.
    pub lock_storm_threshold: usize,
    pub query_max_length: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BreakerSettings {
    pub enabled: bool,
    pub threshold_ms: f64,
    pub window: Duration,
    /// Number of recent successful attempts averaged (K).
    pub sample_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthSettings {
    pub max_replay_lag_seconds: f64,
    pub skip_on_checkpoint: bool,
    pub skip_on_backup: bool,
    pub max_stats_churn: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DedupSettings {
    /// In-flight attempts older than this are considered abandoned.
    pub stale_after: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SheddingSettings {
    pub enabled: bool,
    pub max_connection_pct: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThrottleSettings {
    pub enabled: bool,
    pub max_tps: f64,
    pub max_block_io_per_second: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdleSettings {
    pub enabled: bool,
    pub min_active_connections: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModeSettings {
    pub auto: bool,
    pub current: Mode,
    pub warning_connection_pct: f64,
    pub trip_breaker_skips: usize,
    pub window: Duration,
    pub normal_interval_seconds: u64,
    pub light_interval_seconds: u64,
    pub emergency_interval_seconds: u64,
}

impl ModeSettings {
    pub fn interval_for(&self, mode: Mode) -> Duration {
        Duration::from_secs(match mode {
            Mode::Normal => self.normal_interval_seconds,
            Mode::Light => self.light_interval_seconds,
            Mode::Emergency => self.emergency_interval_seconds,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveSettings {
    pub enabled: bool,
    pub interval_seconds: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetentionSettings {
    pub aggregate_days: u32,
    pub archive_days: u32,
    pub attempt_days: u32,
}

/// Immutable snapshot of every setting, taken once per cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct RecorderConfig {
    pub enabled: bool,
    pub ring: RingSettings,
    pub sampler: SamplerSettings,
    pub breaker: BreakerSettings,
    pub health: HealthSettings,
    pub dedup: DedupSettings,
    pub shedding: SheddingSettings,
    pub throttle: ThrottleSettings,
    pub idle: IdleSettings,
    pub mode: ModeSettings,
    pub flush_interval_seconds: u64,
    pub archive: ArchiveSettings,
    pub cleanup_interval_seconds: u64,
    pub retention: RetentionSettings,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self::from_store(&ConfigStore::new())
    }
}

impl RecorderConfig {
    /// Reads every setting from the store, falling back to defaults.
    pub fn from_store(store: &ConfigStore) -> Self {
        let current = store
            .raw(keys::MODE_CURRENT)
            .and_then(|raw| match raw.parse::<Mode>() {
                Ok(mode) => Some(mode),
                Err(e) => {
                    warn!(error = %e, "invalid mode.current, using normal");
                    None
                }
            })
            .unwrap_or_default();

        Self {
            enabled: store.get_bool(keys::ENABLED, true),
            ring: RingSettings {
                slots: store.get(keys::RING_SLOTS, 120),
                min_slots: store.get(keys::RING_MIN_SLOTS, 72),
                max_slots: store.get(keys::RING_MAX_SLOTS, 2880),
                slot_interval_seconds: store.get(keys::RING_SLOT_INTERVAL, 60),
                wait_rows_per_slot: store.get(keys::RING_WAIT_ROWS, 100),
                session_rows_per_slot: store.get(keys::RING_SESSION_ROWS, 25),
                lock_rows_per_slot: store.get(keys::RING_LOCK_ROWS, 100),
            },
            sampler: SamplerSettings {
                jitter_max_seconds: store.get(keys::SAMPLER_JITTER_MAX, 10),
                section_timeout: Duration::from_millis(
                    store.get(keys::SAMPLER_SECTION_TIMEOUT, 1000),
                ),
                lock_storm_threshold: store.get(keys::SAMPLER_LOCK_STORM, 50),
                query_max_length: store.get(keys::SAMPLER_QUERY_MAX_LEN, 1024),
            },
            breaker: BreakerSettings {
                enabled: store.get_bool(keys::BREAKER_ENABLED, true),
                threshold_ms: store.get(keys::BREAKER_THRESHOLD_MS, 1000.0),
                window: minutes(store.get(keys::BREAKER_WINDOW_MINUTES, 15)),
                sample_count: store.get(keys::BREAKER_SAMPLE_COUNT, 3),
            },
            health: HealthSettings {
                max_replay_lag_seconds: store.get(keys::HEALTH_MAX_REPLAY_LAG, 300.0),
                skip_on_checkpoint: store.get_bool(keys::HEALTH_SKIP_ON_CHECKPOINT, true),
                skip_on_backup: store.get_bool(keys::HEALTH_SKIP_ON_BACKUP, true),
                max_stats_churn: store.get(keys::HEALTH_MAX_STATS_CHURN, 0.5),
            },
            dedup: DedupSettings {
                stale_after: Duration::from_secs(store.get(keys::DEDUP_STALE_AFTER, 600)),
            },
            shedding: SheddingSettings {
                enabled: store.get_bool(keys::SHEDDING_ENABLED, true),
                max_connection_pct: store.get(keys::SHEDDING_MAX_PCT, 70.0),
            },
            throttle: ThrottleSettings {
                enabled: store.get_bool(keys::THROTTLE_ENABLED, true),
                max_tps: store.get(keys::THROTTLE_MAX_TPS, 10_000.0),
                max_block_io_per_second: store.get(keys::THROTTLE_MAX_BLOCK_IO, 50_000.0),
            },
            idle: IdleSettings {
                enabled: store.get_bool(keys::IDLE_ENABLED, false),
                min_active_connections: store.get(keys::IDLE_MIN_ACTIVE, 1),
            },
            mode: ModeSettings {
                auto: store.get_bool(keys::MODE_AUTO, true),
                current,
                warning_connection_pct: store.get(keys::MODE_WARNING_PCT, 60.0),
                trip_breaker_skips: store.get(keys::MODE_TRIP_SKIPS, 3),
                window: minutes(store.get(keys::MODE_WINDOW_MINUTES, 10)),
                normal_interval_seconds: store.get(keys::MODE_NORMAL_INTERVAL, 60),
                light_interval_seconds: store.get(keys::MODE_LIGHT_INTERVAL, 120),
                emergency_interval_seconds: store.get(keys::MODE_EMERGENCY_INTERVAL, 300),
            },
            flush_interval_seconds: store.get(keys::FLUSH_INTERVAL, 300),
            archive: ArchiveSettings {
                enabled: store.get_bool(keys::ARCHIVE_ENABLED, true),
                interval_seconds: store.get(keys::ARCHIVE_INTERVAL, 900),
            },
            cleanup_interval_seconds: store.get(keys::CLEANUP_INTERVAL, 3600),
            retention: RetentionSettings {
                aggregate_days: store.get(keys::RETENTION_AGGREGATE_DAYS, 30),
                archive_days: store.get(keys::RETENTION_ARCHIVE_DAYS, 7),
                attempt_days: store.get(keys::RETENTION_ATTEMPT_DAYS, 7),
            },
        }
    }

    /// Ring retention horizon.
    pub fn horizon(&self) -> Duration {
        Duration::from_secs(self.ring.horizon_seconds())
    }

    /// Sampling interval of the configured current mode.
    pub fn sample_interval(&self) -> Duration {
        self.mode.interval_for(self.mode.current)
    }

    /// Checks the persisted layout and job cadences.
    ///
    /// Returns warnings for settings that were adjusted (slot clamping) and
    /// an error for anything that would lose data or cannot run.
    pub fn validate(&self) -> Result<Vec<String>, ConfigError> {
        let mut warnings = Vec::new();
        let ring = &self.ring;

        if ring.min_slots == 0 || ring.min_slots > ring.max_slots {
            return Err(ConfigError::Invariant(format!(
                "ring slot bounds [{}, {}] are empty",
                ring.min_slots, ring.max_slots
            )));
        }
        if ring.effective_slots() != ring.slots {
            warnings.push(format!(
                "{} = {} clamped to {}",
                keys::RING_SLOTS,
                ring.slots,
                ring.effective_slots()
            ));
        }
        require_positive(keys::RING_SLOT_INTERVAL, ring.slot_interval_seconds as f64)?;
        require_positive(keys::RING_WAIT_ROWS, ring.wait_rows_per_slot as f64)?;
        require_positive(keys::RING_SESSION_ROWS, ring.session_rows_per_slot as f64)?;
        require_positive(keys::RING_LOCK_ROWS, ring.lock_rows_per_slot as f64)?;
        require_positive(
            keys::SAMPLER_SECTION_TIMEOUT,
            self.sampler.section_timeout.as_millis() as f64,
        )?;
        require_positive(keys::SAMPLER_QUERY_MAX_LEN, self.sampler.query_max_length as f64)?;
        require_positive(keys::BREAKER_THRESHOLD_MS, self.breaker.threshold_ms)?;
        require_positive(keys::BREAKER_SAMPLE_COUNT, self.breaker.sample_count as f64)?;
        require_positive(keys::MODE_TRIP_SKIPS, self.mode.trip_breaker_skips as f64)?;
        require_positive(keys::MODE_NORMAL_INTERVAL, self.mode.normal_interval_seconds as f64)?;
        require_positive(keys::MODE_LIGHT_INTERVAL, self.mode.light_interval_seconds as f64)?;
        require_positive(
            keys::MODE_EMERGENCY_INTERVAL,
            self.mode.emergency_interval_seconds as f64,
        )?;
        require_positive(keys::FLUSH_INTERVAL, self.flush_interval_seconds as f64)?;
        require_positive(keys::CLEANUP_INTERVAL, self.cleanup_interval_seconds as f64)?;
        require_positive(
            keys::RETENTION_AGGREGATE_DAYS,
            self.retention.aggregate_days as f64,
        )?;
        require_positive(keys::RETENTION_ARCHIVE_DAYS, self.retention.archive_days as f64)?;
        require_positive(keys::RETENTION_ATTEMPT_DAYS, self.retention.attempt_days as f64)?;

        if !(self.mode.warning_connection_pct > 0.0 && self.mode.warning_connection_pct <= 100.0)
        {
            return Err(ConfigError::InvalidValue {
                key: keys::MODE_WARNING_PCT.to_string(),
                value: self.mode.warning_connection_pct.to_string(),
                reason: "must be within (0, 100]".to_string(),
            });
        }

        for (key, seconds) in [
            (keys::RING_SLOT_INTERVAL, ring.slot_interval_seconds),
            (keys::CLEANUP_INTERVAL, self.cleanup_interval_seconds),
            (keys::SAMPLER_JITTER_MAX, self.sampler.jitter_max_seconds),
            (keys::MODE_NORMAL_INTERVAL, self.mode.normal_interval_seconds),
            (keys::MODE_LIGHT_INTERVAL, self.mode.light_interval_seconds),
            (keys::MODE_EMERGENCY_INTERVAL, self.mode.emergency_interval_seconds),
        ] {
            if seconds > MAX_JOB_INTERVAL_SECONDS {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: seconds.to_string(),
                    reason: format!("must be at most {}s", MAX_JOB_INTERVAL_SECONDS),
                });
            }
        }

        let horizon = ring.horizon_seconds();
        if self.flush_interval_seconds >= horizon {
            return Err(ConfigError::Invariant(format!(
                "{} ({}s) must be shorter than the ring retention horizon ({}s = {} slots x {}s), \
                 otherwise samples are overwritten before they are flushed",
                keys::FLUSH_INTERVAL,
                self.flush_interval_seconds,
                horizon,
                ring.effective_slots(),
                ring.slot_interval_seconds
            )));
        }
        if self.archive.enabled && self.archive.interval_seconds >= horizon {
            return Err(ConfigError::Invariant(format!(
                "{} ({}s) must be shorter than the ring retention horizon ({}s)",
                keys::ARCHIVE_INTERVAL,
                self.archive.interval_seconds,
                horizon
            )));
        }
        if self.mode.normal_interval_seconds < ring.slot_interval_seconds {
            warnings.push(format!(
                "{} ({}s) is shorter than {} ({}s); consecutive samples share a slot",
                keys::MODE_NORMAL_INTERVAL,
                self.mode.normal_interval_seconds,
                keys::RING_SLOT_INTERVAL,
                ring.slot_interval_seconds
            ));
        }

        Ok(warnings)
    }
}

fn minutes(n: u64) -> Duration {
    Duration::from_secs(n * 60)
}

fn require_positive(key: &str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_cleanly() {
        let config = RecorderConfig::default();
        assert_eq!(config.ring.effective_slots(), 120);
        assert_eq!(config.ring.horizon_seconds(), 7200);
        assert_eq!(config.validate().unwrap(), Vec::<String>::new());
    }

    #[test]
    fn slot_count_is_clamped_with_warning() {
        let store = ConfigStore::new();
        store.set(keys::RING_SLOTS, 10);
        let config = store.snapshot();

        assert_eq!(config.ring.effective_slots(), 72);
        let warnings = config.validate().unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("clamped to 72"));
    }

    #[test]
    fn flush_cadence_must_be_inside_horizon() {
        let store = ConfigStore::new();
        store.set(keys::RING_SLOTS, 72);
        store.set(keys::RING_SLOT_INTERVAL, 60);
        store.set(keys::FLUSH_INTERVAL, 72 * 60);

        match store.snapshot().validate() {
            Err(ConfigError::Invariant(msg)) => assert!(msg.contains("flush.interval_seconds")),
            other => panic!("expected invariant violation, got {:?}", other),
        }
    }

    #[test]
    fn absurd_intervals_are_rejected() {
        let store = ConfigStore::new();
        store.set(keys::CLEANUP_INTERVAL, u64::MAX);

        match store.snapshot().validate() {
            Err(ConfigError::InvalidValue { key, .. }) => assert_eq!(key, keys::CLEANUP_INTERVAL),
            other => panic!("expected invalid value, got {:?}", other),
        }

        store.set(keys::CLEANUP_INTERVAL, MAX_JOB_INTERVAL_SECONDS);
        assert!(store.snapshot().validate().is_ok());
    }

    #[test]
    fn disabled_archive_skips_cadence_check() {
        let store = ConfigStore::new();
        store.set(keys::ARCHIVE_INTERVAL, 1_000_000);
        assert!(store.snapshot().validate().is_err());

        store.set(keys::ARCHIVE_ENABLED, false);
        assert!(store.snapshot().validate().is_ok());
    }

    #[test]
    fn zero_row_capacity_is_rejected() {
        let store = ConfigStore::new();
        store.set(keys::RING_LOCK_ROWS, 0);
        assert!(matches!(
            store.snapshot().validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == keys::RING_LOCK_ROWS
        ));
    }

    #[test]
    fn mode_interval_follows_current_mode() {
        let store = ConfigStore::new();
        store.set(keys::MODE_CURRENT, "emergency");
        let config = store.snapshot();
        assert_eq!(config.mode.current, Mode::Emergency);
        assert_eq!(config.sample_interval(), Duration::from_secs(300));
    }
}
