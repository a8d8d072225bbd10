//! Tier 1.5: raw copies of ring slots kept beyond the ring horizon.

use std::path::Path;

use super::model::ArchiveRecord;
use super::segment::{RetentionResult, SegmentLog, SegmentRecord};
use super::StoreError;

const PREFIX: &str = "archive";

impl SegmentRecord for ArchiveRecord {
    fn timestamp(&self) -> i64 {
        self.epoch_seconds
    }
}

#[derive(Debug)]
pub struct ArchiveStore {
    log: SegmentLog<ArchiveRecord>,
}

impl ArchiveStore {
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        Ok(Self {
            log: SegmentLog::open(dir, PREFIX)?,
        })
    }

    pub fn append(&self, records: &[ArchiveRecord]) -> Result<(), StoreError> {
        self.log.append_all(records)
    }

    /// Records captured in `[start, end]`, oldest first.
    pub fn records_between(&self, start: i64, end: i64) -> Result<Vec<ArchiveRecord>, StoreError> {
        let mut records = self.log.read_between(start, end)?;
        records.sort_by_key(|r| r.epoch_seconds);
        Ok(records)
    }

    /// Deletes records captured strictly before `cutoff`.
    pub fn purge_before(&self, cutoff: i64) -> Result<RetentionResult, StoreError> {
        self.log.retain_after(cutoff)
    }
}
