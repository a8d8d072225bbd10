//! Flush job: ring buffer (Tier 1) to aggregate windows (Tier 2).

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, info};

use super::warn_on_wrap;
use crate::storage::model::{AggregateWindow, Dimension};
use crate::storage::{AggregateStore, RingBuffer, Slot, StoreError, Watermark};

const WATERMARK: &str = "flush";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushReport {
    /// Slots rolled up by this run.
    pub slots: usize,
    /// Aggregate windows written.
    pub windows: usize,
    /// Watermark after the run.
    pub watermark: Option<i64>,
    /// Seconds of samples overwritten before they could be flushed.
    pub lost_seconds: i64,
}

pub struct FlushJob {
    watermark: Watermark,
}

impl FlushJob {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            watermark: Watermark::new(data_dir, WATERMARK),
        }
    }

    pub fn watermark(&self) -> Result<Option<i64>, StoreError> {
        self.watermark.load()
    }

    /// Rolls up every live slot captured after the watermark.
    ///
    /// Aggregates are appended before the watermark moves; a crash in
    /// between re-flushes the same slots on the next run.
    pub fn run(
        &self,
        ring: &RingBuffer,
        store: &AggregateStore,
        now: i64,
    ) -> Result<FlushReport, StoreError> {
        let previous = self.watermark.load()?;
        let lost_seconds = warn_on_wrap("flush", ring, previous);

        let slots = ring.slots_since(previous.unwrap_or(i64::MIN), now);
        let Some(last) = slots.last() else {
            debug!(watermark = ?previous, "flush: no new slots");
            return Ok(FlushReport {
                watermark: previous,
                lost_seconds,
                ..FlushReport::default()
            });
        };
        let end = last.epoch_seconds;

        let windows = aggregate(&slots);
        store.append(&windows)?;
        self.watermark.store(end)?;

        info!(
            slots = slots.len(),
            windows = windows.len(),
            watermark = end,
            "flushed ring buffer"
        );
        Ok(FlushReport {
            slots: slots.len(),
            windows: windows.len(),
            watermark: Some(end),
            lost_seconds,
        })
    }
}

#[derive(Default)]
struct Acc {
    count: u64,
    sum: f64,
    max: f64,
    observations: u64,
}

impl Acc {
    fn add(&mut self, count: u64, value: f64) {
        if self.observations == 0 || value > self.max {
            self.max = value;
        }
        self.count += count;
        self.sum += value;
        self.observations += 1;
    }
}

/// Groups slots (oldest first) into one window per dimension key.
pub fn aggregate(slots: &[Slot]) -> Vec<AggregateWindow> {
    let (Some(first), Some(last)) = (slots.first(), slots.last()) else {
        return Vec::new();
    };
    let n = slots.len();

    let mut waits: BTreeMap<String, Acc> = BTreeMap::new();
    let mut pairs: BTreeMap<String, Acc> = BTreeMap::new();
    let mut queries: BTreeMap<String, Acc> = BTreeMap::new();

    for slot in slots {
        // Wait events are reported per backend type; fold them per slot first.
        let mut per_slot: BTreeMap<String, u64> = BTreeMap::new();
        for row in slot.wait_events.rows() {
            *per_slot.entry(row.key()).or_default() += u64::from(row.count);
        }
        for (key, waiters) in per_slot {
            waits.entry(key).or_default().add(waiters, waiters as f64);
        }

        for row in slot.locks.rows() {
            pairs
                .entry(row.pair_key())
                .or_default()
                .add(1, row.blocked_wait_seconds as f64);
        }

        for row in slot.sessions.rows().iter().filter(|s| s.query_id != 0) {
            queries
                .entry(row.query_id.to_string())
                .or_default()
                .add(1, row.query_age_seconds as f64);
        }
    }

    let window = |dimension: Dimension, key: String, acc: Acc, divisor: u64| AggregateWindow {
        start_time: first.epoch_seconds,
        end_time: last.epoch_seconds,
        dimension,
        key,
        slots: n as u32,
        count: acc.count,
        avg: acc.sum / divisor.max(1) as f64,
        max: acc.max,
    };

    let mut out = Vec::with_capacity(waits.len() + pairs.len() + queries.len());
    // Waiters per slot over the whole window, slots without the event count as zero.
    out.extend(
        waits
            .into_iter()
            .map(|(key, acc)| window(Dimension::WaitEvent, key, acc, n as u64)),
    );
    out.extend(pairs.into_iter().map(|(key, acc)| {
        let observations = acc.observations;
        window(Dimension::LockPair, key, acc, observations)
    }));
    out.extend(queries.into_iter().map(|(key, acc)| {
        let observations = acc.observations;
        window(Dimension::Query, key, acc, observations)
    }));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SlotWrite;
    use crate::storage::model::{LockRow, SessionRow, WaitEventRow};
    use crate::storage::ring::RowCapacities;
    use tempfile::tempdir;

    const T0: i64 = 1_700_000_040;

    fn ring() -> RingBuffer {
        let caps = RowCapacities {
            wait_events: 10,
            sessions: 10,
            locks: 10,
        };
        RingBuffer::new(10, 60, caps).unwrap()
    }

    fn wait(backend: &str, event: &str, count: u32) -> WaitEventRow {
        WaitEventRow {
            backend_type: backend.to_string(),
            wait_event_type: "Lock".to_string(),
            wait_event: event.to_string(),
            count,
        }
    }

    fn write(ring: &RingBuffer, epoch: i64, rows: SlotWrite) {
        ring.write(ring.slot_for(epoch), epoch, rows).unwrap();
    }

    fn sample(ring: &RingBuffer, epoch: i64, waiters: u32) {
        write(
            ring,
            epoch,
            SlotWrite {
                wait_events: Some(vec![
                    wait("client backend", "transactionid", waiters),
                    wait("autovacuum worker", "transactionid", 1),
                ]),
                sessions: Some(vec![SessionRow {
                    pid: 10,
                    query_id: 42,
                    query_age_seconds: 5 + waiters as i64,
                    ..SessionRow::default()
                }]),
                locks: Some(vec![LockRow {
                    blocked_query_id: 7,
                    blocker_query_id: 8,
                    lock_mode: "ShareLock".to_string(),
                    blocked_wait_seconds: 30,
                    ..LockRow::default()
                }]),
            },
        );
    }

    #[test]
    fn rolls_up_each_dimension() {
        let ring = ring();
        sample(&ring, T0, 3);
        sample(&ring, T0 + 60, 5);

        let windows = aggregate(&ring.slots_since(i64::MIN, T0 + 60));
        assert_eq!(windows.len(), 3);

        let wait = &windows[0];
        assert_eq!(wait.dimension, Dimension::WaitEvent);
        assert_eq!(wait.key, "Lock:transactionid");
        assert_eq!((wait.start_time, wait.end_time, wait.slots), (T0, T0 + 60, 2));
        assert_eq!(wait.count, 10);
        assert_eq!(wait.avg, 5.0);
        assert_eq!(wait.max, 6.0);

        let pair = &windows[1];
        assert_eq!(pair.dimension, Dimension::LockPair);
        assert_eq!(pair.key, "8->7 (ShareLock)");
        assert_eq!((pair.count, pair.avg, pair.max), (2, 30.0, 30.0));

        let query = &windows[2];
        assert_eq!(query.key, "42");
        assert_eq!((query.count, query.avg, query.max), (2, 9.0, 10.0));
    }

    #[test]
    fn second_run_without_new_data_is_a_noop() {
        let dir = tempdir().unwrap();
        let store = AggregateStore::open(dir.path()).unwrap();
        let job = FlushJob::new(dir.path());
        let ring = ring();
        sample(&ring, T0, 3);

        let first = job.run(&ring, &store, T0 + 10).unwrap();
        assert_eq!(first.slots, 1);
        assert_eq!(first.watermark, Some(T0));

        let second = job.run(&ring, &store, T0 + 20).unwrap();
        assert_eq!(second.windows, 0);
        assert_eq!(store.windows_between(i64::MIN, i64::MAX, None).unwrap().len(), first.windows);

        sample(&ring, T0 + 60, 4);
        let third = job.run(&ring, &store, T0 + 70).unwrap();
        assert_eq!(third.slots, 1);
        assert_eq!(third.watermark, Some(T0 + 60));
    }

    #[test]
    fn watermark_survives_reopen() {
        let dir = tempdir().unwrap();
        let store = AggregateStore::open(dir.path()).unwrap();
        let ring = ring();
        sample(&ring, T0, 3);
        FlushJob::new(dir.path()).run(&ring, &store, T0 + 10).unwrap();

        let reopened = FlushJob::new(dir.path());
        assert_eq!(reopened.watermark().unwrap(), Some(T0));
        assert_eq!(reopened.run(&ring, &store, T0 + 20).unwrap().slots, 0);
    }

    #[test]
    fn reports_samples_lost_to_wraparound() {
        let dir = tempdir().unwrap();
        let store = AggregateStore::open(dir.path()).unwrap();
        let job = FlushJob::new(dir.path());
        let ring = ring();
        sample(&ring, T0, 3);
        job.run(&ring, &store, T0).unwrap();

        // Sampling every minute for 15 minutes on a 10-slot ring reuses
        // the slots of T0+60..T0+300 before the next flush.
        for minute in 1..=15 {
            sample(&ring, T0 + minute * 60, 1);
        }
        let report = job.run(&ring, &store, T0 + 900).unwrap();
        assert_eq!(ring.newest_evicted(), Some(T0 + 300));
        assert_eq!(report.lost_seconds, 300);
        assert_eq!(report.slots, 10);
    }

    #[test]
    fn idle_gap_longer_than_horizon_loses_nothing() {
        let dir = tempdir().unwrap();
        let store = AggregateStore::open(dir.path()).unwrap();
        let job = FlushJob::new(dir.path());
        let ring = ring();
        sample(&ring, T0, 3);
        job.run(&ring, &store, T0).unwrap();

        sample(&ring, T0 + 900, 1);
        let report = job.run(&ring, &store, T0 + 900).unwrap();
        assert_eq!(report.lost_seconds, 0);
        assert_eq!(report.slots, 1);
        assert_eq!(report.watermark, Some(T0 + 900));
    }
}
