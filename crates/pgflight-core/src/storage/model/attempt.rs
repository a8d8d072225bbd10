//! Collection attempt history records.
//!
//! One `CollectionAttempt` is written per job cycle, skipped or not. The
//! circuit breaker, the deduplication gate and the mode controller all read
//! this history; only cleanup deletes it.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::mode::{Mode, Section};

/// Kind of periodic job an attempt belongs to.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
pub enum CollectionType {
    Sample,
    Flush,
    Archive,
    Cleanup,
}

impl CollectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionType::Sample => "sample",
            CollectionType::Flush => "flush",
            CollectionType::Archive => "archive",
            CollectionType::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for CollectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a cycle was deliberately not run.
///
/// A skip is a recorded no-op, never an error.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub enum SkipReason {
    /// Collection disabled by configuration.
    Disabled,
    /// Moving average duration of recent attempts exceeded the threshold.
    CircuitBreaker { avg_ms: f64, threshold_ms: f64 },
    /// Standby replay lag is above the configured limit.
    ReplicationLag { lag_seconds: f64, max_seconds: f64 },
    CheckpointActive,
    BackupActive,
    /// Auxiliary statistics surface is evicting entries faster than the limit.
    StatsChurn { ratio: f64, max_ratio: f64 },
    /// Another attempt of the same type is still running.
    AlreadyRunning { holder: String },
    /// Active connections as a percentage of `max_connections` above the limit.
    LoadShedding { connection_pct: f64, max_pct: f64 },
    /// Transaction or block I/O rate above the limit.
    LoadThrottling {
        metric: String,
        rate: f64,
        max_rate: f64,
    },
    /// Fewer active connections than the idle floor.
    Idle { active: u32, min_active: u32 },
}

impl SkipReason {
    /// Short machine-friendly tag, stable across releases.
    pub fn tag(&self) -> &'static str {
        match self {
            SkipReason::Disabled => "disabled",
            SkipReason::CircuitBreaker { .. } => "circuit_breaker",
            SkipReason::ReplicationLag { .. } => "replication_lag",
            SkipReason::CheckpointActive => "checkpoint_active",
            SkipReason::BackupActive => "backup_active",
            SkipReason::StatsChurn { .. } => "stats_churn",
            SkipReason::AlreadyRunning { .. } => "already_running",
            SkipReason::LoadShedding { .. } => "load_shedding",
            SkipReason::LoadThrottling { .. } => "load_throttling",
            SkipReason::Idle { .. } => "idle",
        }
    }

    pub fn is_circuit_breaker(&self) -> bool {
        matches!(self, SkipReason::CircuitBreaker { .. })
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Disabled => write!(f, "collection disabled"),
            SkipReason::CircuitBreaker {
                avg_ms,
                threshold_ms,
            } => write!(
                f,
                "circuit breaker open: recent avg {:.0}ms exceeds {:.0}ms",
                avg_ms, threshold_ms
            ),
            SkipReason::ReplicationLag {
                lag_seconds,
                max_seconds,
            } => write!(
                f,
                "replica replay lag {:.0}s exceeds {:.0}s",
                lag_seconds, max_seconds
            ),
            SkipReason::CheckpointActive => write!(f, "checkpoint in progress"),
            SkipReason::BackupActive => write!(f, "backup in progress"),
            SkipReason::StatsChurn { ratio, max_ratio } => write!(
                f,
                "statistics churn {:.2} exceeds {:.2}",
                ratio, max_ratio
            ),
            SkipReason::AlreadyRunning { holder } => {
                write!(f, "another collection is running ({})", holder)
            }
            SkipReason::LoadShedding {
                connection_pct,
                max_pct,
            } => write!(
                f,
                "load shedding: {:.1}% of connections active, limit {:.1}%",
                connection_pct, max_pct
            ),
            SkipReason::LoadThrottling {
                metric,
                rate,
                max_rate,
            } => write!(
                f,
                "load throttling: {} at {:.1}/s, limit {:.1}/s",
                metric, rate, max_rate
            ),
            SkipReason::Idle { active, min_active } => write!(
                f,
                "idle: {} active connections, floor {}",
                active, min_active
            ),
        }
    }
}

/// Outcome of one capture section.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub enum SectionStatus {
    /// Section captured `rows` rows (after top-N truncation).
    Captured { rows: usize },
    /// Section failed; the rest of the cycle continued.
    Failed { error: String },
    /// Section exceeded its time budget and its rows were discarded.
    TimedOut,
    /// Section deliberately wrote nothing (e.g. lock storm guard).
    Skipped { reason: String },
}

impl SectionStatus {
    /// Whether the section finished without error.
    pub fn succeeded(&self) -> bool {
        matches!(
            self,
            SectionStatus::Captured { .. } | SectionStatus::Skipped { .. }
        )
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct SectionReport {
    pub section: Section,
    pub status: SectionStatus,
    pub duration_ms: u64,
}

/// One job cycle.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct CollectionAttempt {
    /// Monotonic id, unique within an attempt log.
    pub id: u64,
    pub collection_type: CollectionType,
    /// Mode the cycle ran under.
    pub mode: Mode,
    /// Start time (milliseconds since Unix epoch).
    pub started_at_ms: i64,
    /// End time (milliseconds since Unix epoch). `None` while in flight.
    pub finished_at_ms: Option<i64>,
    pub duration_ms: Option<u64>,
    pub success: bool,
    pub skip_reason: Option<SkipReason>,
    pub sections_total: u32,
    pub sections_succeeded: u32,
    pub sections: Vec<SectionReport>,
    pub error_message: Option<String>,
}

impl CollectionAttempt {
    pub fn new(id: u64, collection_type: CollectionType, mode: Mode, started_at_ms: i64) -> Self {
        Self {
            id,
            collection_type,
            mode,
            started_at_ms,
            finished_at_ms: None,
            duration_ms: None,
            success: false,
            skip_reason: None,
            sections_total: 0,
            sections_succeeded: 0,
            sections: Vec::new(),
            error_message: None,
        }
    }

    pub fn is_inflight(&self) -> bool {
        self.finished_at_ms.is_none()
    }

    pub fn is_skipped(&self) -> bool {
        self.skip_reason.is_some()
    }

    /// Start time in whole seconds since Unix epoch.
    pub fn started_at_secs(&self) -> i64 {
        self.started_at_ms.div_euclid(1000)
    }

    /// Records a section outcome and keeps the section counters in step.
    pub fn push_section(&mut self, report: SectionReport) {
        self.sections_total += 1;
        if report.status.succeeded() {
            self.sections_succeeded += 1;
        }
        self.sections.push(report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_section_counts_only_successes() {
        let mut attempt = CollectionAttempt::new(1, CollectionType::Sample, Mode::Normal, 0);
        attempt.push_section(SectionReport {
            section: Section::WaitEvents,
            status: SectionStatus::Captured { rows: 3 },
            duration_ms: 1,
        });
        attempt.push_section(SectionReport {
            section: Section::Sessions,
            status: SectionStatus::TimedOut,
            duration_ms: 1000,
        });
        attempt.push_section(SectionReport {
            section: Section::Locks,
            status: SectionStatus::Skipped {
                reason: "lock storm".to_string(),
            },
            duration_ms: 2,
        });

        assert_eq!(attempt.sections_total, 3);
        assert_eq!(attempt.sections_succeeded, 2);
    }

    #[test]
    fn skip_reason_display_is_readable() {
        let reason = SkipReason::LoadShedding {
            connection_pct: 82.5,
            max_pct: 70.0,
        };
        assert_eq!(
            reason.to_string(),
            "load shedding: 82.5% of connections active, limit 70.0%"
        );
        assert_eq!(reason.tag(), "load_shedding");
    }
}
