//! Configuration key names.

pub const ENABLED: &str = "enabled";

pub const RING_SLOTS: &str = "ring.slots";
pub const RING_MIN_SLOTS: &str = "ring.min_slots";
pub const RING_MAX_SLOTS: &str = "ring.max_slots";
pub const RING_SLOT_INTERVAL: &str = "ring.slot_interval_seconds";
pub const RING_WAIT_ROWS: &str = "ring.wait_rows_per_slot";
pub const RING_SESSION_ROWS: &str = "ring.session_rows_per_slot";
pub const RING_LOCK_ROWS: &str = "ring.lock_rows_per_slot";

pub const SAMPLER_JITTER_MAX: &str = "sampler.jitter_max_seconds";
pub const SAMPLER_SECTION_TIMEOUT: &str = "sampler.section_timeout_ms";
pub const SAMPLER_LOCK_STORM: &str = "sampler.lock_storm_threshold";
pub const SAMPLER_QUERY_MAX_LEN: &str = "sampler.query_max_length";

pub const BREAKER_ENABLED: &str = "breaker.enabled";
pub const BREAKER_THRESHOLD_MS: &str = "breaker.threshold_ms";
pub const BREAKER_WINDOW_MINUTES: &str = "breaker.window_minutes";
pub const BREAKER_SAMPLE_COUNT: &str = "breaker.sample_count";

pub const HEALTH_MAX_REPLAY_LAG: &str = "health.max_replay_lag_seconds";
pub const HEALTH_SKIP_ON_CHECKPOINT: &str = "health.skip_on_checkpoint";
pub const HEALTH_SKIP_ON_BACKUP: &str = "health.skip_on_backup";
pub const HEALTH_MAX_STATS_CHURN: &str = "health.max_stats_churn";

pub const DEDUP_STALE_AFTER: &str = "dedup.stale_after_seconds";

pub const SHEDDING_ENABLED: &str = "shedding.enabled";
pub const SHEDDING_MAX_PCT: &str = "shedding.max_connection_pct";

pub const THROTTLE_ENABLED: &str = "throttle.enabled";
pub const THROTTLE_MAX_TPS: &str = "throttle.max_tps";
pub const THROTTLE_MAX_BLOCK_IO: &str = "throttle.max_block_io_per_second";

pub const IDLE_ENABLED: &str = "idle.enabled";
pub const IDLE_MIN_ACTIVE: &str = "idle.min_active_connections";

pub const MODE_AUTO: &str = "mode.auto";
pub const MODE_CURRENT: &str = "mode.current";
pub const MODE_WARNING_PCT: &str = "mode.warning_connection_pct";
pub const MODE_TRIP_SKIPS: &str = "mode.trip_breaker_skips";
pub const MODE_WINDOW_MINUTES: &str = "mode.window_minutes";
pub const MODE_NORMAL_INTERVAL: &str = "mode.normal.interval_seconds";
pub const MODE_LIGHT_INTERVAL: &str = "mode.light.interval_seconds";
pub const MODE_EMERGENCY_INTERVAL: &str = "mode.emergency.interval_seconds";

pub const FLUSH_INTERVAL: &str = "flush.interval_seconds";
pub const ARCHIVE_ENABLED: &str = "archive.enabled";
pub const ARCHIVE_INTERVAL: &str = "archive.interval_seconds";
pub const CLEANUP_INTERVAL: &str = "cleanup.interval_seconds";

pub const RETENTION_AGGREGATE_DAYS: &str = "retention.aggregate_days";
pub const RETENTION_ARCHIVE_DAYS: &str = "retention.archive_days";
pub const RETENTION_ATTEMPT_DAYS: &str = "retention.attempt_days";
