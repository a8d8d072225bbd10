//! Durable rolled-up summaries (Tier 2) and raw archive records (Tier 1.5).

use serde::{Deserialize, Serialize};
use std::fmt;

use super::rows::{LockRow, SessionRow, WaitEventRow};

/// Grouping dimension of an aggregate window.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dimension {
    /// Keyed by `wait_event_type:wait_event`.
    /// count = waiting sessions summed over slots, avg/max = waiters per slot.
    WaitEvent,
    /// Keyed by `blocker_query_id->blocked_query_id (mode)`.
    /// count = blocked occurrences, avg/max = blocked wait seconds.
    LockPair,
    /// Keyed by query id.
    /// count = session observations, avg/max = query running seconds.
    Query,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Dimension::WaitEvent => "wait_event",
            Dimension::LockPair => "lock_pair",
            Dimension::Query => "query",
        })
    }
}

/// One rolled-up group over `[start_time, end_time]`.
///
/// Created only by the flush job; immutable afterwards except for deletion
/// by cleanup.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct AggregateWindow {
    /// Capture time of the first slot in the window (seconds since Unix epoch).
    pub start_time: i64,
    /// Capture time of the last slot in the window; also the flush watermark.
    pub end_time: i64,
    pub dimension: Dimension,
    pub key: String,
    /// Number of ring slots the window covers.
    pub slots: u32,
    pub count: u64,
    pub avg: f64,
    pub max: f64,
}

/// Full-resolution copy of one slot's child rows.
///
/// Created only by the archive job; immutable afterwards except for deletion
/// by cleanup.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct ArchiveRecord {
    pub slot_id: usize,
    /// Capture time of the slot (seconds since Unix epoch).
    pub epoch_seconds: i64,
    /// Time the record was archived (seconds since Unix epoch).
    pub archived_at: i64,
    pub wait_events: Vec<WaitEventRow>,
    pub sessions: Vec<SessionRow>,
    pub locks: Vec<LockRow>,
}
