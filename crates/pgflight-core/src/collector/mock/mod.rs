//! In-memory [`TargetSurface`] for tests and `--mock` runs.

mod scenarios;

use std::collections::{HashSet, VecDeque};

use super::traits::{
    BlockedSession, BlockerDetail, ConnectionStats, HealthSignals, SectionBudget, ServerCounters,
    TargetSurface,
};
use super::SurfaceError;
use crate::storage::model::{Section, SessionRow, WaitEventRow};

/// Scripted server state.
///
/// Fields are public so tests can shape the state directly; the scenario
/// constructors in `scenarios.rs` provide realistic starting points.
#[derive(Debug, Clone, Default)]
pub struct MockSurface {
    pub version: i32,
    pub counters: ServerCounters,
    pub connections: ConnectionStats,
    pub health: HealthSignals,
    pub other_recorders: u32,
    pub wait_events: Vec<WaitEventRow>,
    pub sessions: Vec<SessionRow>,
    pub blocked: Vec<BlockedSession>,
    pub blockers: Vec<BlockerDetail>,
    /// Sections whose calls fail with a query error.
    pub failing: HashSet<Section>,
    /// Sections whose calls report a timeout.
    pub timing_out: HashSet<Section>,
    /// Most recent surface calls, oldest first (`"wait_events"`, `"blocked_sessions"`, ...).
    pub calls: VecDeque<&'static str>,
}

/// Calls kept in [`MockSurface::calls`]; older entries are dropped.
pub const CALL_LOG_LIMIT: usize = 256;

impl MockSurface {
    pub fn new() -> Self {
        Self {
            version: 160000,
            connections: ConnectionStats {
                active: 0,
                total: 0,
                max_connections: 100,
            },
            ..Default::default()
        }
    }

    /// Makes every call for `section` fail.
    pub fn fail_section(mut self, section: Section) -> Self {
        self.failing.insert(section);
        self
    }

    /// Makes every call for `section` time out.
    pub fn time_out_section(mut self, section: Section) -> Self {
        self.timing_out.insert(section);
        self
    }

    /// Advances the monotonic counters as if `seconds` passed at the given rates.
    pub fn advance(&mut self, seconds: f64, tps: f64, block_io_per_second: f64) {
        self.counters.uptime_seconds += seconds;
        self.counters.xact_total += (tps * seconds) as i64;
        self.counters.blks_read += (block_io_per_second * seconds) as i64;
    }

    pub fn called(&self, name: &str) -> bool {
        self.calls.iter().any(|c| *c == name)
    }

    fn record(&mut self, name: &'static str) {
        if self.calls.len() == CALL_LOG_LIMIT {
            self.calls.pop_front();
        }
        self.calls.push_back(name);
    }

    fn section_call(&mut self, name: &'static str, section: Section) -> Result<(), SurfaceError> {
        self.record(name);
        if self.timing_out.contains(&section) {
            return Err(SurfaceError::Timeout {
                section: section.name().to_string(),
            });
        }
        if self.failing.contains(&section) {
            return Err(SurfaceError::Query(format!("injected failure in {}", name)));
        }
        Ok(())
    }
}

impl TargetSurface for MockSurface {
    fn server_version(&mut self) -> Result<i32, SurfaceError> {
        self.record("server_version");
        if self.version < 100000 {
            return Err(SurfaceError::Unsupported(format!(
                "server_version_num {}",
                self.version
            )));
        }
        Ok(self.version)
    }

    fn counters(&mut self, _budget: &SectionBudget) -> Result<ServerCounters, SurfaceError> {
        self.record("counters");
        Ok(self.counters)
    }

    fn connection_stats(
        &mut self,
        _budget: &SectionBudget,
    ) -> Result<ConnectionStats, SurfaceError> {
        self.record("connection_stats");
        Ok(self.connections)
    }

    fn health(&mut self, _budget: &SectionBudget) -> Result<HealthSignals, SurfaceError> {
        self.record("health");
        Ok(self.health.clone())
    }

    fn other_recorders(&mut self, _budget: &SectionBudget) -> Result<u32, SurfaceError> {
        self.record("other_recorders");
        Ok(self.other_recorders)
    }

    fn wait_events(&mut self, _budget: &SectionBudget) -> Result<Vec<WaitEventRow>, SurfaceError> {
        self.section_call("wait_events", Section::WaitEvents)?;
        Ok(self.wait_events.clone())
    }

    fn sessions(
        &mut self,
        limit: usize,
        _budget: &SectionBudget,
    ) -> Result<Vec<SessionRow>, SurfaceError> {
        self.section_call("sessions", Section::Sessions)?;
        let mut sessions = self.sessions.clone();
        sessions.sort_by(|a, b| b.query_age_seconds.cmp(&a.query_age_seconds));
        sessions.truncate(limit);
        Ok(sessions)
    }

    fn blocked_count(&mut self, _budget: &SectionBudget) -> Result<usize, SurfaceError> {
        self.section_call("blocked_count", Section::Locks)?;
        Ok(self.blocked.len())
    }

    fn blocked_sessions(
        &mut self,
        _budget: &SectionBudget,
    ) -> Result<Vec<BlockedSession>, SurfaceError> {
        self.section_call("blocked_sessions", Section::Locks)?;
        Ok(self.blocked.clone())
    }

    fn blocker_details(
        &mut self,
        pids: &[i32],
        _budget: &SectionBudget,
    ) -> Result<Vec<BlockerDetail>, SurfaceError> {
        self.section_call("blocker_details", Section::Locks)?;
        Ok(self
            .blockers
            .iter()
            .filter(|b| pids.contains(&b.pid))
            .cloned()
            .collect())
    }
}
