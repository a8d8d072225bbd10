//! Pre-built server states for testing.
//!
//! These scenarios model the load situations the control loop must react to.

use super::MockSurface;
use crate::collector::traits::{BlockedSession, BlockerDetail, ConnectionStats, ServerCounters};
use crate::storage::model::{SessionRow, WaitEventRow};

fn wait(backend_type: &str, wait_event_type: &str, wait_event: &str, count: u32) -> WaitEventRow {
    WaitEventRow {
        backend_type: backend_type.to_string(),
        wait_event_type: wait_event_type.to_string(),
        wait_event: wait_event.to_string(),
        count,
    }
}

fn session(pid: i32, state: &str, wait: (&str, &str), query_id: i64, query: &str, age: i64) -> SessionRow {
    SessionRow {
        pid,
        datname: "shop".to_string(),
        usename: "app".to_string(),
        application_name: "api".to_string(),
        backend_type: "client backend".to_string(),
        state: state.to_string(),
        wait_event_type: wait.0.to_string(),
        wait_event: wait.1.to_string(),
        query_id,
        query: query.to_string(),
        query_start: 1_700_000_000 - age,
        xact_start: 1_700_000_000 - age,
        query_age_seconds: age,
    }
}

fn blocked(pid: i32, query_id: i64, wait_seconds: i64, blockers: &[i32]) -> BlockedSession {
    BlockedSession {
        pid,
        usename: "app".to_string(),
        query_id,
        query: "UPDATE orders SET status = $1 WHERE id = $2".to_string(),
        wait_seconds,
        lock_type: "transactionid".to_string(),
        lock_mode: "ShareLock".to_string(),
        lock_target: String::new(),
        blocker_pids: blockers.to_vec(),
    }
}

impl MockSurface {
    /// A healthy primary with moderate activity and one blocking chain.
    ///
    /// Includes: three wait events, four running sessions, two sessions
    /// blocked behind an idle-in-transaction backend.
    pub fn typical() -> Self {
        let mut surface = Self::new();
        surface.counters = ServerCounters {
            xact_total: 5_000_000,
            blks_read: 2_000_000,
            blks_written: 800_000,
            uptime_seconds: 86_400.0,
        };
        surface.connections = ConnectionStats {
            active: 12,
            total: 40,
            max_connections: 100,
        };
        surface.wait_events = vec![
            wait("client backend", "Lock", "transactionid", 2),
            wait("client backend", "IO", "DataFileRead", 3),
            wait("client backend", "LWLock", "WALWrite", 1),
        ];
        surface.sessions = vec![
            session(101, "active", ("IO", "DataFileRead"), 7001, "SELECT * FROM orders WHERE customer_id = $1", 3),
            session(102, "active", ("Lock", "transactionid"), 7002, "UPDATE orders SET status = $1 WHERE id = $2", 14),
            session(103, "active", ("Lock", "transactionid"), 7002, "UPDATE orders SET status = $1 WHERE id = $2", 9),
            session(104, "idle in transaction", ("Client", "ClientRead"), 7003, "UPDATE orders SET total = total + $1 WHERE id = $2", 41),
        ];
        surface.blocked = vec![blocked(102, 7002, 14, &[104]), blocked(103, 7002, 9, &[104])];
        surface.blockers = vec![BlockerDetail {
            pid: 104,
            usename: "batch".to_string(),
            state: "idle in transaction".to_string(),
            query_id: 7003,
            query: "UPDATE orders SET total = total + $1 WHERE id = $2".to_string(),
        }];
        surface
    }

    /// Hundreds of sessions queued behind one lock holder.
    pub fn lock_storm(blocked_sessions: usize) -> Self {
        let mut surface = Self::typical();
        surface.blocked = (0..blocked_sessions)
            .map(|i| blocked(1000 + i as i32, 7002, 30, &[104]))
            .collect();
        surface.wait_events[0].count = blocked_sessions as u32;
        surface
    }

    /// Connection slots nearly exhausted.
    pub fn overloaded() -> Self {
        let mut surface = Self::typical();
        surface.connections = ConnectionStats {
            active: 85,
            total: 97,
            max_connections: 100,
        };
        surface
    }

    /// Nothing running.
    pub fn idle() -> Self {
        let mut surface = Self::new();
        surface.counters.uptime_seconds = 3600.0;
        surface.connections = ConnectionStats {
            active: 0,
            total: 2,
            max_connections: 100,
        };
        surface
    }

    /// A standby replaying far behind its primary.
    pub fn replica_lagging(lag_seconds: f64) -> Self {
        let mut surface = Self::typical();
        surface.health.replay_lag_seconds = Some(lag_seconds);
        surface
    }
}
