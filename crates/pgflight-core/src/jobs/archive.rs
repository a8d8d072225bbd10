//! Archive job: ring buffer (Tier 1) to raw archive (Tier 1.5).

use std::path::Path;

use tracing::{debug, info};

use super::warn_on_wrap;
use crate::storage::model::ArchiveRecord;
use crate::storage::{ArchiveStore, RingBuffer, StoreError, Watermark};

const WATERMARK: &str = "archive";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArchiveReport {
    pub records: usize,
    pub watermark: Option<i64>,
    pub lost_seconds: i64,
}

pub struct ArchiveJob {
    watermark: Watermark,
}

impl ArchiveJob {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            watermark: Watermark::new(data_dir, WATERMARK),
        }
    }

    pub fn watermark(&self) -> Result<Option<i64>, StoreError> {
        self.watermark.load()
    }

    /// Copies every live slot captured after the watermark, rows unchanged.
    pub fn run(
        &self,
        ring: &RingBuffer,
        store: &ArchiveStore,
        now: i64,
    ) -> Result<ArchiveReport, StoreError> {
        let previous = self.watermark.load()?;
        let lost_seconds = warn_on_wrap("archive", ring, previous);

        let records: Vec<ArchiveRecord> = ring
            .slots_since(previous.unwrap_or(i64::MIN), now)
            .into_iter()
            .map(|slot| ArchiveRecord {
                slot_id: slot.slot_id,
                epoch_seconds: slot.epoch_seconds,
                archived_at: now,
                wait_events: slot.wait_events.rows().to_vec(),
                sessions: slot.sessions.rows().to_vec(),
                locks: slot.locks.rows().to_vec(),
            })
            .collect();
        let Some(end) = records.last().map(|r| r.epoch_seconds) else {
            debug!(watermark = ?previous, "archive: no new slots");
            return Ok(ArchiveReport {
                watermark: previous,
                lost_seconds,
                ..ArchiveReport::default()
            });
        };

        store.append(&records)?;
        self.watermark.store(end)?;

        info!(records = records.len(), watermark = end, "archived ring buffer");
        Ok(ArchiveReport {
            records: records.len(),
            watermark: Some(end),
            lost_seconds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SlotWrite;
    use crate::storage::model::SessionRow;
    use crate::storage::ring::RowCapacities;
    use tempfile::tempdir;

    const T0: i64 = 1_700_000_040;

    fn ring() -> RingBuffer {
        let caps = RowCapacities {
            wait_events: 4,
            sessions: 4,
            locks: 4,
        };
        RingBuffer::new(10, 60, caps).unwrap()
    }

    fn sample(ring: &RingBuffer, epoch: i64, pids: &[i32]) {
        let sessions = pids
            .iter()
            .map(|&pid| SessionRow {
                pid,
                query: format!("SELECT {}", pid),
                ..SessionRow::default()
            })
            .collect();
        let rows = SlotWrite {
            sessions: Some(sessions),
            ..SlotWrite::default()
        };
        ring.write(ring.slot_for(epoch), epoch, rows).unwrap();
    }

    #[test]
    fn copies_raw_rows_once() {
        let dir = tempdir().unwrap();
        let store = ArchiveStore::open(dir.path()).unwrap();
        let job = ArchiveJob::new(dir.path());
        let ring = ring();
        sample(&ring, T0, &[1, 2]);
        sample(&ring, T0 + 60, &[3]);

        let report = job.run(&ring, &store, T0 + 90).unwrap();
        assert_eq!(report.records, 2);
        assert_eq!(report.watermark, Some(T0 + 60));

        let records = store.records_between(T0, T0 + 60).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].sessions.len(), 2);
        assert_eq!(records[0].sessions[1].query, "SELECT 2");
        assert_eq!(records[1].archived_at, T0 + 90);

        assert_eq!(job.run(&ring, &store, T0 + 100).unwrap().records, 0);
        assert_eq!(store.records_between(T0, T0 + 60).unwrap().len(), 2);
    }
}
