//! Capture sections of a sampling cycle.
//!
//! Each section reads one part of the server state through the surface and
//! returns rows ready for the ring buffer. Sections never touch the ring or
//! the attempt log; [`super::Sampler`] isolates their failures.

use std::collections::HashMap;

use xxhash_rust::xxh3::xxh3_64;

use super::CollectError;
use crate::collector::{BlockerDetail, SectionBudget, SurfaceError, TargetSurface};
use crate::storage::model::{LockRow, Section, SessionRow, WaitEventRow};

/// Result of the lock section.
#[derive(Debug, Clone, PartialEq)]
pub enum LockCapture {
    Rows(Vec<LockRow>),
    /// More blocked sessions than the storm threshold; nothing captured.
    StormGuard { blocked: usize, threshold: usize },
}

fn transient(section: Section, e: SurfaceError) -> CollectError {
    CollectError::Transient {
        section,
        message: e.to_string(),
        timed_out: matches!(e, SurfaceError::Timeout { .. }),
    }
}

pub fn capture_wait_events(
    surface: &mut dyn TargetSurface,
    budget: &SectionBudget,
) -> Result<Vec<WaitEventRow>, CollectError> {
    surface
        .wait_events(budget)
        .map_err(|e| transient(Section::WaitEvents, e))
}

pub fn capture_sessions(
    surface: &mut dyn TargetSurface,
    limit: usize,
    query_max_length: usize,
    budget: &SectionBudget,
) -> Result<Vec<SessionRow>, CollectError> {
    let mut sessions = surface
        .sessions(limit, budget)
        .map_err(|e| transient(Section::Sessions, e))?;
    for s in &mut sessions {
        if s.query_id == 0 && !s.query.is_empty() {
            s.query_id = fingerprint(&s.query);
        }
        truncate_query(&mut s.query, query_max_length);
    }
    Ok(sessions)
}

/// Two-pass lock capture.
///
/// A cheap count runs first; above `storm_threshold` blocked sessions the
/// section stops there. Otherwise pass 1 lists blocked sessions with their
/// blocker pids, and pass 2 fetches details of just those blockers by pid.
pub fn capture_locks(
    surface: &mut dyn TargetSurface,
    storm_threshold: usize,
    query_max_length: usize,
    budget: &SectionBudget,
) -> Result<LockCapture, CollectError> {
    let blocked = surface
        .blocked_count(budget)
        .map_err(|e| transient(Section::Locks, e))?;
    if blocked > storm_threshold {
        return Ok(LockCapture::StormGuard {
            blocked,
            threshold: storm_threshold,
        });
    }
    if blocked == 0 {
        return Ok(LockCapture::Rows(Vec::new()));
    }

    let sessions = surface
        .blocked_sessions(budget)
        .map_err(|e| transient(Section::Locks, e))?;

    let mut pids: Vec<i32> = sessions
        .iter()
        .flat_map(|s| s.blocker_pids.iter().copied())
        .collect();
    pids.sort_unstable();
    pids.dedup();

    let details: HashMap<i32, BlockerDetail> = surface
        .blocker_details(&pids, budget)
        .map_err(|e| transient(Section::Locks, e))?
        .into_iter()
        .map(|d| (d.pid, d))
        .collect();

    let mut rows = Vec::new();
    for s in &sessions {
        let blocked_query_id = resolve_query_id(s.query_id, &s.query);
        for pid in &s.blocker_pids {
            let blocker = details.get(pid);
            let mut row = LockRow {
                blocked_pid: s.pid,
                blocked_usename: s.usename.clone(),
                blocked_query_id,
                blocked_query: s.query.clone(),
                blocked_wait_seconds: s.wait_seconds,
                lock_type: s.lock_type.clone(),
                lock_mode: s.lock_mode.clone(),
                lock_target: s.lock_target.clone(),
                blocker_pid: *pid,
                ..Default::default()
            };
            if let Some(b) = blocker {
                row.blocker_usename = b.usename.clone();
                row.blocker_state = b.state.clone();
                row.blocker_query_id = resolve_query_id(b.query_id, &b.query);
                row.blocker_query = b.query.clone();
            }
            truncate_query(&mut row.blocked_query, query_max_length);
            truncate_query(&mut row.blocker_query, query_max_length);
            rows.push(row);
        }
    }
    Ok(LockCapture::Rows(rows))
}

fn resolve_query_id(query_id: i64, query: &str) -> i64 {
    if query_id != 0 || query.is_empty() {
        query_id
    } else {
        fingerprint(query)
    }
}

/// Stable query id for servers that do not report one: xxh3 of the query
/// text with whitespace runs collapsed.
pub fn fingerprint(query: &str) -> i64 {
    let normalized = query.split_whitespace().collect::<Vec<_>>().join(" ");
    xxh3_64(normalized.as_bytes()) as i64
}

/// Truncates to at most `max_len` bytes on a char boundary.
pub fn truncate_query(query: &mut String, max_len: usize) {
    if query.len() <= max_len {
        return;
    }
    let mut cut = max_len;
    while !query.is_char_boundary(cut) {
        cut -= 1;
    }
    query.truncate(cut);
}
