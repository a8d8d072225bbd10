//! Child rows held by each ring-buffer slot.
//!
//! Every row type has a `Default` value that doubles as the tombstone: a
//! slot position past the live row count holds a default row with its string
//! buffers emptied. `reset` clears in place so string capacity is reused on
//! the next overwrite instead of being reallocated.

use serde::{Deserialize, Serialize};

/// Common behaviour of rows stored in fixed-capacity slot blocks.
pub trait SlotRow: Default + Clone {
    /// Clears every field back to the tombstone value, keeping allocations.
    fn reset(&mut self);

    /// Ranking key used when more rows arrive than the block can hold.
    /// Higher values are kept first.
    fn relevance(&self) -> i64;
}

/// Sessions currently waiting on one wait event.
///
/// Source: `pg_stat_activity` grouped by `wait_event_type, wait_event`.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct WaitEventRow {
    /// Backend type the waiting sessions belong to (client backend, autovacuum worker, ...).
    pub backend_type: String,
    /// Wait event class (`Lock`, `LWLock`, `IO`, ...).
    pub wait_event_type: String,
    /// Specific wait event name.
    pub wait_event: String,
    /// Number of sessions observed in this wait at capture time.
    pub count: u32,
}

impl SlotRow for WaitEventRow {
    fn reset(&mut self) {
        self.backend_type.clear();
        self.wait_event_type.clear();
        self.wait_event.clear();
        self.count = 0;
    }

    fn relevance(&self) -> i64 {
        self.count as i64
    }
}

impl WaitEventRow {
    /// Grouping key used by aggregation (`type:event`).
    pub fn key(&self) -> String {
        format!("{}:{}", self.wait_event_type, self.wait_event)
    }
}

/// One non-idle session at capture time.
///
/// Source: `pg_stat_activity`.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct SessionRow {
    pub pid: i32,
    pub datname: String,
    pub usename: String,
    pub application_name: String,
    pub backend_type: String,
    /// Session state (active, idle in transaction, ...).
    pub state: String,
    pub wait_event_type: String,
    pub wait_event: String,
    /// Query identifier. Falls back to an xxh3 fingerprint of the query text
    /// when the server does not expose `query_id`.
    pub query_id: i64,
    /// Query text, truncated to `sampler.query_max_length`.
    pub query: String,
    /// Current query start (seconds since Unix epoch, 0 if unknown).
    pub query_start: i64,
    /// Transaction start (seconds since Unix epoch, 0 if none).
    pub xact_start: i64,
    /// Seconds the current query has been running at capture time.
    pub query_age_seconds: i64,
}

impl SlotRow for SessionRow {
    fn reset(&mut self) {
        self.pid = 0;
        self.datname.clear();
        self.usename.clear();
        self.application_name.clear();
        self.backend_type.clear();
        self.state.clear();
        self.wait_event_type.clear();
        self.wait_event.clear();
        self.query_id = 0;
        self.query.clear();
        self.query_start = 0;
        self.xact_start = 0;
        self.query_age_seconds = 0;
    }

    fn relevance(&self) -> i64 {
        self.query_age_seconds
    }
}

/// One blocked session together with the session blocking it.
///
/// Built in two passes: blocked sessions and their blocker pids first,
/// then blocker details resolved by pid.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct LockRow {
    pub blocked_pid: i32,
    pub blocked_usename: String,
    pub blocked_query_id: i64,
    pub blocked_query: String,
    /// Seconds the blocked session has been waiting.
    pub blocked_wait_seconds: i64,
    /// Lock type requested by the blocked session (relation, transactionid, ...).
    pub lock_type: String,
    /// Lock mode requested by the blocked session.
    pub lock_mode: String,
    /// Relation name or lock object the blocked session waits on.
    pub lock_target: String,
    pub blocker_pid: i32,
    pub blocker_usename: String,
    pub blocker_state: String,
    pub blocker_query_id: i64,
    pub blocker_query: String,
}

impl SlotRow for LockRow {
    fn reset(&mut self) {
        self.blocked_pid = 0;
        self.blocked_usename.clear();
        self.blocked_query_id = 0;
        self.blocked_query.clear();
        self.blocked_wait_seconds = 0;
        self.lock_type.clear();
        self.lock_mode.clear();
        self.lock_target.clear();
        self.blocker_pid = 0;
        self.blocker_usename.clear();
        self.blocker_state.clear();
        self.blocker_query_id = 0;
        self.blocker_query.clear();
    }

    fn relevance(&self) -> i64 {
        self.blocked_wait_seconds
    }
}

impl LockRow {
    /// Grouping key used by aggregation: blocker query -> blocked query, with lock mode.
    pub fn pair_key(&self) -> String {
        format!(
            "{}->{} ({})",
            self.blocker_query_id, self.blocked_query_id, self.lock_mode
        )
    }
}
