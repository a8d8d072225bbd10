//! Tier 2: durable aggregate windows.

use std::path::Path;

use super::model::{AggregateWindow, Dimension};
use super::segment::{RetentionResult, SegmentLog, SegmentRecord};
use super::StoreError;

const PREFIX: &str = "aggregates";

impl SegmentRecord for AggregateWindow {
    fn timestamp(&self) -> i64 {
        self.end_time
    }
}

/// Append-only store of [`AggregateWindow`]s, one segment per hour of `end_time`.
#[derive(Debug)]
pub struct AggregateStore {
    log: SegmentLog<AggregateWindow>,
}

impl AggregateStore {
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        Ok(Self {
            log: SegmentLog::open(dir, PREFIX)?,
        })
    }

    pub fn append(&self, windows: &[AggregateWindow]) -> Result<(), StoreError> {
        self.log.append_all(windows)
    }

    /// Windows whose `end_time` lies in `[start, end]`, optionally limited to
    /// one dimension, ordered by `end_time` then key.
    pub fn windows_between(
        &self,
        start: i64,
        end: i64,
        dimension: Option<Dimension>,
    ) -> Result<Vec<AggregateWindow>, StoreError> {
        let mut windows: Vec<AggregateWindow> = self
            .log
            .read_between(start, end)?
            .into_iter()
            .filter(|w| dimension.is_none_or(|d| w.dimension == d))
            .collect();
        windows.sort_by(|a, b| {
            a.end_time
                .cmp(&b.end_time)
                .then(a.dimension.cmp(&b.dimension))
                .then_with(|| a.key.cmp(&b.key))
        });
        Ok(windows)
    }

    /// Highest `max` per key across `[start, end]` for one dimension,
    /// largest first.
    pub fn top(
        &self,
        dimension: Dimension,
        start: i64,
        end: i64,
        limit: usize,
    ) -> Result<Vec<AggregateWindow>, StoreError> {
        let mut windows = self.windows_between(start, end, Some(dimension))?;
        windows.sort_by(|a, b| b.max.total_cmp(&a.max).then_with(|| a.key.cmp(&b.key)));
        let mut seen = std::collections::HashSet::new();
        windows.retain(|w| seen.insert(w.key.clone()));
        windows.truncate(limit);
        Ok(windows)
    }

    /// Deletes windows whose `end_time` is strictly older than `cutoff`.
    pub fn purge_before(&self, cutoff: i64) -> Result<RetentionResult, StoreError> {
        self.log.retain_after(cutoff)
    }
}
