//! The poll-based surface of the monitored server.

use std::time::{Duration, Instant};

use super::SurfaceError;
use crate::storage::model::{SessionRow, WaitEventRow};

/// Monotonic server-wide counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ServerCounters {
    /// Committed + rolled back transactions since stats reset.
    pub xact_total: i64,
    /// Blocks read from disk.
    pub blks_read: i64,
    /// Blocks written (checkpointer + bgwriter + backends).
    pub blks_written: i64,
    /// Seconds since the server started.
    pub uptime_seconds: f64,
}

/// Client connection usage.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConnectionStats {
    /// Client backends in state `active`.
    pub active: u32,
    /// All client backends.
    pub total: u32,
    pub max_connections: u32,
}

impl ConnectionStats {
    /// Active connections as a percentage of `max_connections`.
    pub fn active_pct(&self) -> f64 {
        if self.max_connections == 0 {
            return 0.0;
        }
        self.active as f64 * 100.0 / self.max_connections as f64
    }
}

/// Signals read by the health gate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthSignals {
    /// Replay lag of a standby; `None` on a primary.
    pub replay_lag_seconds: Option<f64>,
    pub checkpoint_active: bool,
    pub backup_active: bool,
    /// Fraction of the statement statistics table evicted since the previous
    /// check; `None` when the extension is unavailable.
    pub stats_churn: Option<f64>,
}

/// Pass 1 of lock capture: one session waiting on a heavyweight lock.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockedSession {
    pub pid: i32,
    pub usename: String,
    pub query_id: i64,
    pub query: String,
    pub wait_seconds: i64,
    pub lock_type: String,
    pub lock_mode: String,
    pub lock_target: String,
    /// Pids holding or queued ahead for the lock.
    pub blocker_pids: Vec<i32>,
}

/// Pass 2 of lock capture: details of one blocking session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockerDetail {
    pub pid: i32,
    pub usename: String,
    pub state: String,
    pub query_id: i64,
    pub query: String,
}

/// Time budget of one section (or precheck query).
///
/// Created fresh for every section, so a slow section cannot consume the
/// next one's time.
#[derive(Debug, Clone, Copy)]
pub struct SectionBudget {
    started: Instant,
    limit: Duration,
}

impl SectionBudget {
    pub fn new(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.limit.saturating_sub(self.started.elapsed())
    }

    pub fn expired(&self) -> bool {
        self.started.elapsed() >= self.limit
    }
}

/// Read access to the monitored server.
///
/// Every call takes the budget of the section it runs for. Implementations
/// are expected to stop work at the deadline and return
/// [`SurfaceError::Timeout`].
pub trait TargetSurface: Send {
    /// `server_version_num`; fails with [`SurfaceError::Unsupported`] for
    /// versions the recorder cannot read.
    fn server_version(&mut self) -> Result<i32, SurfaceError>;

    fn counters(&mut self, budget: &SectionBudget) -> Result<ServerCounters, SurfaceError>;

    fn connection_stats(&mut self, budget: &SectionBudget) -> Result<ConnectionStats, SurfaceError>;

    fn health(&mut self, budget: &SectionBudget) -> Result<HealthSignals, SurfaceError>;

    /// Number of other recorder sessions currently running on the server.
    fn other_recorders(&mut self, budget: &SectionBudget) -> Result<u32, SurfaceError>;

    /// Non-idle sessions grouped by wait event.
    fn wait_events(&mut self, budget: &SectionBudget) -> Result<Vec<WaitEventRow>, SurfaceError>;

    /// Up to `limit` non-idle client sessions, longest running first.
    fn sessions(
        &mut self,
        limit: usize,
        budget: &SectionBudget,
    ) -> Result<Vec<SessionRow>, SurfaceError>;

    /// Cheap count of sessions waiting on heavyweight locks.
    fn blocked_count(&mut self, budget: &SectionBudget) -> Result<usize, SurfaceError>;

    fn blocked_sessions(&mut self, budget: &SectionBudget)
    -> Result<Vec<BlockedSession>, SurfaceError>;

    fn blocker_details(
        &mut self,
        pids: &[i32],
        budget: &SectionBudget,
    ) -> Result<Vec<BlockerDetail>, SurfaceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_pct_handles_zero_capacity() {
        let stats = ConnectionStats {
            active: 5,
            total: 10,
            max_connections: 0,
        };
        assert_eq!(stats.active_pct(), 0.0);

        let stats = ConnectionStats {
            max_connections: 20,
            ..stats
        };
        assert_eq!(stats.active_pct(), 25.0);
    }

    #[test]
    fn budget_expires() {
        let budget = SectionBudget::new(Duration::ZERO);
        assert!(budget.expired());
        assert_eq!(budget.remaining(), Duration::ZERO);

        let budget = SectionBudget::new(Duration::from_secs(60));
        assert!(!budget.expired());
    }
}
