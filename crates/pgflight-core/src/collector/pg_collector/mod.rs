//! PostgreSQL implementation of [`TargetSurface`].
//!
//! Reads the statistics views over a single connection:
//! - `pg_stat_activity`: sessions, wait events, blocked sessions, connection usage
//! - `pg_locks`: ungranted lock of each blocked session
//! - `pg_stat_database` + `pg_stat_bgwriter`/`pg_stat_io`: monotonic counters
//! - `pg_stat_statements_info`: statistics churn (PostgreSQL 14+, optional)
//!
//! ## Time budgets
//!
//! Before each call the session `statement_timeout` is set to the remaining
//! budget of the calling section. A cancelled statement (SQLSTATE 57014) is
//! reported as [`SurfaceError::Timeout`] and keeps the connection; any other
//! query error drops the connection so the next call reconnects.

mod queries;

use postgres::error::SqlState;
use postgres::{Client, NoTls, Row};
use tracing::{debug, info};

use super::SurfaceError;
use super::traits::{
    BlockedSession, BlockerDetail, ConnectionStats, HealthSignals, SectionBudget, ServerCounters,
    TargetSurface,
};
use crate::storage::model::{SessionRow, WaitEventRow};
use queries::{
    build_blocked_count_query, build_blocked_sessions_query, build_blocker_details_query,
    build_connection_stats_query, build_counters_query, build_health_query,
    build_other_recorders_query, build_sessions_query, build_statements_dealloc_query,
    build_wait_events_query,
};

/// `application_name` of recorder sessions, used by the dedup gate.
pub const APPLICATION_NAME: &str = "pgflight";

/// Oldest supported server (`backend_type` and `pg_blocking_pids` are required).
const MIN_SERVER_VERSION: i32 = 100000;

/// Connects using the standard environment variables:
/// - PGHOST (default: localhost)
/// - PGPORT (default: 5432)
/// - PGUSER (default: $USER)
/// - PGPASSWORD (default: empty)
/// - PGDATABASE (default: same as PGUSER)
pub struct PostgresSurface {
    connection_string: String,
    client: Option<Client>,
    last_error: Option<String>,
    server_version_num: Option<i32>,
    /// Last `pg_stat_statements_info.dealloc` observation.
    statements_dealloc: Option<i64>,
}

impl PostgresSurface {
    pub fn from_env() -> Result<Self, SurfaceError> {
        let user = std::env::var("PGUSER")
            .or_else(|_| std::env::var("USER"))
            .map_err(|_| SurfaceError::Connection("PGUSER or USER not set".to_string()))?;

        let host = std::env::var("PGHOST").unwrap_or_else(|_| "localhost".to_string());
        let port = std::env::var("PGPORT").unwrap_or_else(|_| "5432".to_string());
        let password = std::env::var("PGPASSWORD").unwrap_or_default();
        let database = std::env::var("PGDATABASE").unwrap_or_else(|_| user.clone());

        Ok(Self::with_connection_string(build_connection_string(
            &host, &port, &user, &password, &database,
        )))
    }

    pub fn with_connection_string(connection_string: String) -> Self {
        Self {
            connection_string,
            client: None,
            last_error: None,
            server_version_num: None,
            statements_dealloc: None,
        }
    }

    /// Returns the last error message, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Ensures the connection is established, reconnecting if needed.
    fn ensure_connected(&mut self) -> Result<(), SurfaceError> {
        if self.client.is_some() {
            return Ok(());
        }

        match Client::connect(&self.connection_string, NoTls) {
            Ok(mut client) => {
                // Determine server version once per (re)connect.
                self.server_version_num = client
                    .query_one("SHOW server_version_num", &[])
                    .ok()
                    .and_then(|row| row.try_get::<_, String>(0).ok())
                    .and_then(|v| v.parse::<i32>().ok());
                self.statements_dealloc = None;

                info!(server_version_num = ?self.server_version_num, "connected to PostgreSQL");
                self.client = Some(client);
                self.last_error = None;
                Ok(())
            }
            Err(e) => {
                let msg = format_postgres_error(&e);
                self.last_error = Some(msg.clone());
                self.server_version_num = None;
                Err(SurfaceError::Connection(msg))
            }
        }
    }

    /// Runs `f` under the section budget.
    fn run<T>(
        &mut self,
        section: &'static str,
        budget: &SectionBudget,
        f: impl FnOnce(&mut Client, Option<i32>) -> Result<T, postgres::Error>,
    ) -> Result<T, SurfaceError> {
        self.ensure_connected()?;
        if budget.expired() {
            return Err(SurfaceError::Timeout {
                section: section.to_string(),
            });
        }
        let timeout_ms = budget.remaining().as_millis().max(1);
        let version = self.server_version_num;
        let Some(client) = self.client.as_mut() else {
            return Err(SurfaceError::Connection("not connected".to_string()));
        };

        let result = client
            .batch_execute(&format!("SET statement_timeout = {}", timeout_ms))
            .and_then(|_| f(client, version));
        result.map_err(|e| self.fail(section, &e))
    }

    fn fail(&mut self, section: &'static str, e: &postgres::Error) -> SurfaceError {
        if e.code() == Some(&SqlState::QUERY_CANCELED) {
            debug!(section, "statement cancelled by section budget");
            return SurfaceError::Timeout {
                section: section.to_string(),
            };
        }
        let msg = format_postgres_error(e);
        self.last_error = Some(msg.clone());
        self.client = None;
        self.server_version_num = None;
        SurfaceError::Query(msg)
    }
}

impl TargetSurface for PostgresSurface {
    fn server_version(&mut self) -> Result<i32, SurfaceError> {
        self.ensure_connected()?;
        match self.server_version_num {
            Some(v) if v >= MIN_SERVER_VERSION => Ok(v),
            Some(v) => Err(SurfaceError::Unsupported(format!(
                "server_version_num {} is older than {}",
                v, MIN_SERVER_VERSION
            ))),
            None => Err(SurfaceError::Unsupported(
                "server_version_num unavailable".to_string(),
            )),
        }
    }

    fn counters(&mut self, budget: &SectionBudget) -> Result<ServerCounters, SurfaceError> {
        let row = self.run("counters", budget, |c, v| {
            c.query_one(&build_counters_query(v), &[])
        })?;
        Ok(ServerCounters {
            xact_total: row.try_get(0).unwrap_or(0),
            blks_read: row.try_get(1).unwrap_or(0),
            blks_written: row.try_get(2).unwrap_or(0),
            uptime_seconds: row.try_get(3).unwrap_or(0.0),
        })
    }

    fn connection_stats(&mut self, budget: &SectionBudget) -> Result<ConnectionStats, SurfaceError> {
        let row = self.run("connection_stats", budget, |c, _| {
            c.query_one(build_connection_stats_query(), &[])
        })?;
        Ok(ConnectionStats {
            active: row.try_get::<_, i64>(0).unwrap_or(0) as u32,
            total: row.try_get::<_, i64>(1).unwrap_or(0) as u32,
            max_connections: row.try_get::<_, i64>(2).unwrap_or(0) as u32,
        })
    }

    fn health(&mut self, budget: &SectionBudget) -> Result<HealthSignals, SurfaceError> {
        let (row, dealloc) = self.run("health", budget, |c, v| {
            let row = c.query_one(&build_health_query(v), &[])?;
            // Missing extension is not an error; churn is simply unknown.
            let dealloc = if v.unwrap_or(0) >= 140000 {
                c.query_opt(build_statements_dealloc_query(), &[])
                    .ok()
                    .flatten()
                    .and_then(|r| Some((r.try_get::<_, i64>(0).ok()?, r.try_get::<_, i64>(1).ok()?)))
            } else {
                None
            };
            Ok((row, dealloc))
        })?;

        let stats_churn = dealloc.map(|(dealloc, max)| {
            let previous = self.statements_dealloc.replace(dealloc).unwrap_or(dealloc);
            churn_ratio(previous, dealloc, max)
        });

        Ok(HealthSignals {
            replay_lag_seconds: row.try_get::<_, Option<f64>>(0).unwrap_or(None),
            checkpoint_active: row.try_get(1).unwrap_or(false),
            backup_active: row.try_get(2).unwrap_or(false),
            stats_churn,
        })
    }

    fn other_recorders(&mut self, budget: &SectionBudget) -> Result<u32, SurfaceError> {
        let row = self.run("other_recorders", budget, |c, _| {
            c.query_one(build_other_recorders_query(), &[&APPLICATION_NAME])
        })?;
        Ok(row.try_get::<_, i64>(0).unwrap_or(0) as u32)
    }

    fn wait_events(&mut self, budget: &SectionBudget) -> Result<Vec<WaitEventRow>, SurfaceError> {
        let rows = self.run("wait_events", budget, |c, _| {
            c.query(build_wait_events_query(), &[])
        })?;
        Ok(rows.iter().filter_map(parse_wait_event_row).collect())
    }

    fn sessions(
        &mut self,
        limit: usize,
        budget: &SectionBudget,
    ) -> Result<Vec<SessionRow>, SurfaceError> {
        let limit = limit as i64;
        let rows = self.run("sessions", budget, |c, v| {
            c.query(&build_sessions_query(v), &[&limit])
        })?;
        Ok(rows.iter().filter_map(parse_session_row).collect())
    }

    fn blocked_count(&mut self, budget: &SectionBudget) -> Result<usize, SurfaceError> {
        let row = self.run("blocked_count", budget, |c, _| {
            c.query_one(build_blocked_count_query(), &[])
        })?;
        Ok(row.try_get::<_, i64>(0).unwrap_or(0).max(0) as usize)
    }

    fn blocked_sessions(
        &mut self,
        budget: &SectionBudget,
    ) -> Result<Vec<BlockedSession>, SurfaceError> {
        let rows = self.run("blocked_sessions", budget, |c, v| {
            c.query(&build_blocked_sessions_query(v), &[])
        })?;
        Ok(rows.iter().filter_map(parse_blocked_row).collect())
    }

    fn blocker_details(
        &mut self,
        pids: &[i32],
        budget: &SectionBudget,
    ) -> Result<Vec<BlockerDetail>, SurfaceError> {
        if pids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self.run("blocker_details", budget, |c, v| {
            c.query(&build_blocker_details_query(v), &[&pids])
        })?;
        Ok(rows.iter().filter_map(parse_blocker_row).collect())
    }
}

/// Safely parses a single row of the wait events query.
fn parse_wait_event_row(row: &Row) -> Option<WaitEventRow> {
    Some(WaitEventRow {
        backend_type: row.try_get(0).unwrap_or_default(),
        wait_event_type: row.try_get(1).ok()?,
        wait_event: row.try_get(2).ok()?,
        count: row.try_get::<_, i64>(3).unwrap_or(0) as u32,
    })
}

fn parse_session_row(row: &Row) -> Option<SessionRow> {
    Some(SessionRow {
        pid: row.try_get(0).ok()?,
        datname: row.try_get(1).unwrap_or_default(),
        usename: row.try_get(2).unwrap_or_default(),
        application_name: row.try_get(3).unwrap_or_default(),
        backend_type: row.try_get(4).unwrap_or_default(),
        state: row.try_get(5).unwrap_or_default(),
        wait_event_type: row.try_get(6).unwrap_or_default(),
        wait_event: row.try_get(7).unwrap_or_default(),
        query_id: row.try_get(8).unwrap_or(0),
        query: row.try_get(9).unwrap_or_default(),
        query_start: row.try_get(10).unwrap_or(0),
        xact_start: row.try_get(11).unwrap_or(0),
        query_age_seconds: row.try_get(12).unwrap_or(0),
    })
}

fn parse_blocked_row(row: &Row) -> Option<BlockedSession> {
    Some(BlockedSession {
        pid: row.try_get(0).ok()?,
        usename: row.try_get(1).unwrap_or_default(),
        query_id: row.try_get(2).unwrap_or(0),
        query: row.try_get(3).unwrap_or_default(),
        wait_seconds: row.try_get(4).unwrap_or(0),
        lock_type: row.try_get(5).unwrap_or_default(),
        lock_mode: row.try_get(6).unwrap_or_default(),
        lock_target: row.try_get(7).unwrap_or_default(),
        blocker_pids: row.try_get(8).unwrap_or_default(),
    })
}

fn parse_blocker_row(row: &Row) -> Option<BlockerDetail> {
    Some(BlockerDetail {
        pid: row.try_get(0).ok()?,
        usename: row.try_get(1).unwrap_or_default(),
        state: row.try_get(2).unwrap_or_default(),
        query_id: row.try_get(3).unwrap_or(0),
        query: row.try_get(4).unwrap_or_default(),
    })
}

/// Fraction of the statements table evicted between two observations.
///
/// A counter that went backwards (stats reset) counts as no churn.
fn churn_ratio(previous: i64, current: i64, max_entries: i64) -> f64 {
    if max_entries <= 0 {
        return 0.0;
    }
    (current - previous).max(0) as f64 / max_entries as f64
}

fn build_connection_string(
    host: &str,
    port: &str,
    user: &str,
    password: &str,
    database: &str,
) -> String {
    let mut conn = format!(
        "host={} port={} user={} dbname={} application_name={}",
        host, port, user, database, APPLICATION_NAME
    );
    if !password.is_empty() {
        conn.push_str(&format!(" password={}", password));
    }
    conn
}

/// Formats PostgreSQL error message for display.
fn format_postgres_error(e: &postgres::Error) -> String {
    if let Some(db_error) = e.as_db_error() {
        format!("{}: {}", db_error.severity(), db_error.message())
    } else {
        let msg = e.to_string();
        if msg.contains("Connection refused") {
            "connection refused".to_string()
        } else if msg.contains("password authentication failed") {
            "password authentication failed".to_string()
        } else if msg.contains("does not exist") {
            msg.split("FATAL:")
                .last()
                .unwrap_or(&msg)
                .trim()
                .to_string()
        } else {
            msg
        }
    }
}
