//! Recorder facade.
//!
//! Wires the config store, the ring buffer, the durable stores, the control
//! loop and the periodic jobs together. Every operation takes `&self`, so a
//! single `Arc<Recorder>` can be shared by one thread per job.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::collector::TargetSurface;
use crate::config::{ConfigError, ConfigStore, RecorderConfig, keys};
use crate::control::{BreakerDecision, circuit_breaker};
use crate::jobs::{ArchiveJob, ArchiveReport, Cleanup, CleanupReport, FlushJob, FlushReport};
use crate::sampler::{CollectError, CycleOutcome, Sampler};
use crate::storage::model::{CollectionAttempt, CollectionType, Mode};
use crate::storage::{AggregateStore, ArchiveStore, AttemptLog, RingBuffer, StoreError};

#[derive(Debug)]
pub enum RecorderError {
    Config(ConfigError),
    Store(StoreError),
    Collect(CollectError),
}

impl std::fmt::Display for RecorderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecorderError::Config(e) => write!(f, "{}", e),
            RecorderError::Store(e) => write!(f, "{}", e),
            RecorderError::Collect(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for RecorderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RecorderError::Config(e) => Some(e),
            RecorderError::Store(e) => Some(e),
            RecorderError::Collect(e) => Some(e),
        }
    }
}

impl From<ConfigError> for RecorderError {
    fn from(e: ConfigError) -> Self {
        RecorderError::Config(e)
    }
}

impl From<StoreError> for RecorderError {
    fn from(e: StoreError) -> Self {
        RecorderError::Store(e)
    }
}

impl From<CollectError> for RecorderError {
    fn from(e: CollectError) -> Self {
        RecorderError::Collect(e)
    }
}

/// Point-in-time view of the recorder for health dashboards.
#[derive(Debug, Clone)]
pub struct RecorderStatus {
    pub enabled: bool,
    pub mode: Mode,
    pub auto_mode: bool,
    pub sample_interval: Duration,
    pub breaker: BreakerDecision,
    pub ring_capacity: usize,
    pub ring_occupied: usize,
    pub ring_oldest: Option<i64>,
    pub last_sample: Option<CollectionAttempt>,
    pub flush_watermark: Option<i64>,
    pub archive_watermark: Option<i64>,
}

pub struct Recorder<S: TargetSurface> {
    data_dir: PathBuf,
    config: ConfigStore,
    ring: RingBuffer,
    aggregates: AggregateStore,
    archive: ArchiveStore,
    attempts: AttemptLog,
    sampler: Mutex<Sampler<S>>,
    flush_job: Mutex<FlushJob>,
    archive_job: Mutex<ArchiveJob>,
}

impl<S: TargetSurface> Recorder<S> {
    /// Validates the configuration, provisions the ring and opens the
    /// durable stores under `data_dir`.
    pub fn open(
        data_dir: impl Into<PathBuf>,
        config: ConfigStore,
        surface: S,
    ) -> Result<Self, RecorderError> {
        let data_dir = data_dir.into();
        let snapshot = config.snapshot();
        for warning in snapshot.validate()? {
            warn!("{}", warning);
        }
        std::fs::create_dir_all(&data_dir).map_err(StoreError::from)?;

        let ring = RingBuffer::from_settings(&snapshot.ring)?;
        let recorder = Self {
            aggregates: AggregateStore::open(&data_dir)?,
            archive: ArchiveStore::open(&data_dir)?,
            attempts: AttemptLog::open(&data_dir)?,
            flush_job: Mutex::new(FlushJob::new(&data_dir)),
            archive_job: Mutex::new(ArchiveJob::new(&data_dir)),
            sampler: Mutex::new(Sampler::new(surface)),
            ring,
            config,
            data_dir,
        };
        info!(
            data_dir = %recorder.data_dir.display(),
            slots = recorder.ring.capacity(),
            slot_interval_s = recorder.ring.slot_interval_seconds(),
            horizon_s = recorder.ring.horizon_seconds(),
            mode = %snapshot.mode.current,
            "recorder opened"
        );
        Ok(recorder)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }

    pub fn aggregates(&self) -> &AggregateStore {
        &self.aggregates
    }

    pub fn archive_store(&self) -> &ArchiveStore {
        &self.archive
    }

    pub fn attempts(&self) -> &AttemptLog {
        &self.attempts
    }

    /// Interval until the next sample, from the current mode.
    pub fn sample_interval(&self) -> Duration {
        self.config.snapshot().sample_interval()
    }

    pub fn sample(&self) -> Result<CycleOutcome, RecorderError> {
        self.sample_at(now_ms())
    }

    pub fn sample_at(&self, now_ms: i64) -> Result<CycleOutcome, RecorderError> {
        let mut sampler = lock(&self.sampler);
        Ok(sampler.run_cycle(&self.config, &self.ring, &self.attempts, now_ms)?)
    }

    pub fn flush(&self) -> Result<FlushReport, RecorderError> {
        self.flush_at(now_ms())
    }

    pub fn flush_at(&self, now_ms: i64) -> Result<FlushReport, RecorderError> {
        let job = lock(&self.flush_job);
        self.record(CollectionType::Flush, now_ms, || {
            job.run(&self.ring, &self.aggregates, now_ms.div_euclid(1000))
        })
    }

    /// Runs the archive job; `None` when archiving is disabled.
    pub fn archive(&self) -> Result<Option<ArchiveReport>, RecorderError> {
        self.archive_at(now_ms())
    }

    pub fn archive_at(&self, now_ms: i64) -> Result<Option<ArchiveReport>, RecorderError> {
        if !self.config.snapshot().archive.enabled {
            return Ok(None);
        }
        let job = lock(&self.archive_job);
        self.record(CollectionType::Archive, now_ms, || {
            job.run(&self.ring, &self.archive, now_ms.div_euclid(1000))
        })
        .map(Some)
    }

    pub fn cleanup(&self) -> Result<CleanupReport, RecorderError> {
        self.cleanup_at(now_ms())
    }

    pub fn cleanup_at(&self, now_ms: i64) -> Result<CleanupReport, RecorderError> {
        let retention = self.config.snapshot().retention;
        self.record(CollectionType::Cleanup, now_ms, || {
            Cleanup::run(
                &retention,
                &self.aggregates,
                &self.archive,
                &self.attempts,
                now_ms,
            )
        })
    }

    pub fn status(&self) -> Result<RecorderStatus, RecorderError> {
        self.status_at(now_ms())
    }

    pub fn status_at(&self, now_ms: i64) -> Result<RecorderStatus, RecorderError> {
        let config = self.config.snapshot();
        let now = now_ms.div_euclid(1000);
        let window_start = now_ms - config.breaker.window.as_millis() as i64;
        let history = self.attempts.since(CollectionType::Sample, window_start);

        Ok(RecorderStatus {
            enabled: config.enabled,
            mode: config.mode.current,
            auto_mode: config.mode.auto,
            sample_interval: config.sample_interval(),
            breaker: circuit_breaker::evaluate(
                &history,
                CollectionType::Sample,
                &config.breaker,
                now_ms,
            ),
            ring_capacity: self.ring.capacity(),
            ring_occupied: self.ring.occupied(now),
            ring_oldest: self.ring.oldest_live(now),
            last_sample: self
                .attempts
                .recent(Some(CollectionType::Sample), 1)
                .into_iter()
                .next(),
            flush_watermark: lock(&self.flush_job).watermark()?,
            archive_watermark: lock(&self.archive_job).watermark()?,
        })
    }

    pub fn enable(&self) {
        self.config.set(keys::ENABLED, true);
        info!("recorder enabled");
    }

    /// Later cycles record a `Disabled` skip until re-enabled.
    pub fn disable(&self) {
        self.config.set(keys::ENABLED, false);
        info!("recorder disabled");
    }

    /// Re-provisions the ring with `slots` slots.
    ///
    /// Every buffered sample is discarded. The new size must lie inside the
    /// configured slot bounds and keep the flush and archive cadences below
    /// the new horizon; otherwise nothing changes.
    pub fn resize_ring(&self, slots: usize) -> Result<(), RecorderError> {
        let current = self.config.snapshot();
        if slots < current.ring.min_slots || slots > current.ring.max_slots {
            return Err(ConfigError::InvalidValue {
                key: keys::RING_SLOTS.to_string(),
                value: slots.to_string(),
                reason: format!(
                    "must be within [{}, {}]",
                    current.ring.min_slots, current.ring.max_slots
                ),
            }
            .into());
        }

        self.config.set(keys::RING_SLOTS, slots);
        if let Err(e) = RecorderConfig::from_store(&self.config).validate() {
            self.config.set(keys::RING_SLOTS, current.ring.slots);
            return Err(e.into());
        }

        let previous = self.ring.capacity();
        self.ring.resize(slots)?;
        warn!(
            from = previous,
            to = slots,
            horizon_s = self.ring.horizon_seconds(),
            "ring buffer resized, buffered samples discarded"
        );
        Ok(())
    }

    /// Runs a promotion or maintenance job under a recorded attempt.
    fn record<T>(
        &self,
        collection_type: CollectionType,
        now_ms: i64,
        job: impl FnOnce() -> Result<T, StoreError>,
    ) -> Result<T, RecorderError> {
        let mode = self.config.snapshot().mode.current;
        let mut attempt = self.attempts.begin(collection_type, mode, now_ms);
        let started = std::time::Instant::now();
        let result = job();

        let duration_ms = started.elapsed().as_millis() as u64;
        attempt.duration_ms = Some(duration_ms);
        match &result {
            Ok(_) => attempt.success = true,
            Err(e) => {
                warn!(job = %collection_type, error = %e, "job failed");
                attempt.error_message = Some(e.to_string());
            }
        }
        self.attempts.finish(attempt, now_ms + duration_ms as i64)?;
        Ok(result?)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
