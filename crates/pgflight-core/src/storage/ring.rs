//! Tier 1: fixed-capacity circular time-series store.
//!
//! The ring holds `N` pre-allocated slots. A sample taken at `epoch` lands in
//! slot `floor(epoch / interval) mod N`, so two timestamps collide exactly
//! when they fall in the same bucket modulo `N`; the collision is how old data
//! is evicted. Each slot owns fixed-size row blocks that are cleared and
//! refilled in place on every write, so memory stays constant no matter how
//! many sessions the target reports.
//!
//! Every slot sits behind its own lock: a writer replaces one slot
//! atomically and readers (flush, archive, queries) only ever see a fully
//! written slot. The outer lock is taken exclusively only by [`RingBuffer::resize`].

use std::cmp::Reverse;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{RwLock, RwLockReadGuard};

use chrono::{DateTime, Utc};

use super::StoreError;
use super::model::{LockRow, SessionRow, SlotRow, WaitEventRow};
use crate::config::RingSettings;

/// Maps a timestamp to its slot: `floor(epoch / interval) mod capacity`.
pub fn slot_for(epoch_seconds: i64, interval_seconds: u64, capacity: usize) -> usize {
    let interval = interval_seconds.max(1) as i64;
    let bucket = epoch_seconds.div_euclid(interval);
    bucket.rem_euclid(capacity.max(1) as i64) as usize
}

/// Fixed-capacity block of child rows.
///
/// Positions `[0, len)` hold live rows; the rest hold reset tombstone rows.
#[derive(Clone, Debug, PartialEq)]
pub struct RowBlock<T: SlotRow> {
    rows: Box<[T]>,
    len: usize,
}

impl<T: SlotRow> RowBlock<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rows: (0..capacity).map(|_| T::default()).collect(),
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.rows.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Live rows.
    pub fn rows(&self) -> &[T] {
        &self.rows[..self.len]
    }

    pub fn clear(&mut self) {
        for row in &mut self.rows[..self.len] {
            row.reset();
        }
        self.len = 0;
    }

    /// Replaces the block contents, keeping the most relevant rows when
    /// `incoming` exceeds capacity. Returns the number of rows dropped.
    pub fn fill(&mut self, mut incoming: Vec<T>) -> usize {
        let capacity = self.capacity();
        let dropped = incoming.len().saturating_sub(capacity);
        if dropped > 0 {
            incoming.sort_by_key(|row| Reverse(row.relevance()));
            incoming.truncate(capacity);
        }

        let previous = self.len;
        for (dst, src) in self.rows.iter_mut().zip(incoming.iter()) {
            dst.clone_from(src);
        }
        let filled = incoming.len();
        if previous > filled {
            for row in &mut self.rows[filled..previous] {
                row.reset();
            }
        }
        self.len = filled;
        dropped
    }
}

/// Row capacity of each child block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RowCapacities {
    pub wait_events: usize,
    pub sessions: usize,
    pub locks: usize,
}

impl RowCapacities {
    pub fn from_settings(settings: &RingSettings) -> Self {
        Self {
            wait_events: settings.wait_rows_per_slot,
            sessions: settings.session_rows_per_slot,
            locks: settings.lock_rows_per_slot,
        }
    }
}

/// One time bucket of the ring.
#[derive(Clone, Debug, PartialEq)]
pub struct Slot {
    pub slot_id: usize,
    /// Capture time of the current occupant (seconds since Unix epoch).
    pub epoch_seconds: i64,
    /// `None` until the slot is first written.
    pub captured_at: Option<DateTime<Utc>>,
    pub wait_events: RowBlock<WaitEventRow>,
    pub sessions: RowBlock<SessionRow>,
    pub locks: RowBlock<LockRow>,
}

impl Slot {
    fn empty(slot_id: usize, caps: RowCapacities) -> Self {
        Self {
            slot_id,
            epoch_seconds: 0,
            captured_at: None,
            wait_events: RowBlock::with_capacity(caps.wait_events),
            sessions: RowBlock::with_capacity(caps.sessions),
            locks: RowBlock::with_capacity(caps.locks),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.captured_at.is_none()
    }
}

/// Rows to place into a slot. A `None` section is written as empty.
#[derive(Debug, Default, Clone)]
pub struct SlotWrite {
    pub wait_events: Option<Vec<WaitEventRow>>,
    pub sessions: Option<Vec<SessionRow>>,
    pub locks: Option<Vec<LockRow>>,
}

/// What a write did to its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSummary {
    pub slot_id: usize,
    /// Capture time of the occupant that was overwritten, if any.
    pub evicted_epoch: Option<i64>,
    /// Rows dropped by top-N truncation, across all sections.
    pub dropped_rows: usize,
}

pub struct RingBuffer {
    slot_interval_seconds: u64,
    row_caps: RowCapacities,
    slots: RwLock<Vec<RwLock<Slot>>>,
    /// Newest capture time overwritten by a sample from a later bucket.
    newest_evicted: AtomicI64,
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("slot_interval_seconds", &self.slot_interval_seconds)
            .field("row_caps", &self.row_caps)
            .finish()
    }
}

impl RingBuffer {
    /// Provisions `capacity` empty slots.
    pub fn new(
        capacity: usize,
        slot_interval_seconds: u64,
        row_caps: RowCapacities,
    ) -> Result<Self, StoreError> {
        if capacity == 0 || slot_interval_seconds == 0 {
            return Err(StoreError::InvalidLayout(format!(
                "capacity {} and slot interval {}s must both be positive",
                capacity, slot_interval_seconds
            )));
        }
        Ok(Self {
            slot_interval_seconds,
            row_caps,
            slots: RwLock::new(provision(capacity, row_caps)),
            newest_evicted: AtomicI64::new(i64::MIN),
        })
    }

    /// Provisions the ring described by the settings, clamping the slot count.
    pub fn from_settings(settings: &RingSettings) -> Result<Self, StoreError> {
        Self::new(
            settings.effective_slots(),
            settings.slot_interval_seconds,
            RowCapacities::from_settings(settings),
        )
    }

    fn slots(&self) -> RwLockReadGuard<'_, Vec<RwLock<Slot>>> {
        self.slots.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.slots().len()
    }

    pub fn slot_interval_seconds(&self) -> u64 {
        self.slot_interval_seconds
    }

    pub fn row_capacities(&self) -> RowCapacities {
        self.row_caps
    }

    /// Retention horizon: `capacity × interval` seconds.
    pub fn horizon_seconds(&self) -> i64 {
        self.capacity() as i64 * self.slot_interval_seconds as i64
    }

    /// Slot a sample taken at `epoch_seconds` belongs to.
    pub fn slot_for(&self, epoch_seconds: i64) -> usize {
        slot_for(epoch_seconds, self.slot_interval_seconds, self.capacity())
    }

    /// Overwrites slot metadata and every child row of `slot_id`.
    ///
    /// Sections not supplied are cleared, so nothing from the previous
    /// occupant survives.
    pub fn write(
        &self,
        slot_id: usize,
        epoch_seconds: i64,
        rows: SlotWrite,
    ) -> Result<WriteSummary, StoreError> {
        let slots = self.slots();
        let expected = slot_for(epoch_seconds, self.slot_interval_seconds, slots.len());
        if slot_id != expected {
            return Err(StoreError::SlotMismatch {
                slot_id,
                expected,
                epoch_seconds,
            });
        }

        let mut slot = slots[slot_id].write().unwrap_or_else(|e| e.into_inner());
        let evicted_epoch = (!slot.is_empty()).then_some(slot.epoch_seconds);
        let interval = self.slot_interval_seconds as i64;
        if let Some(evicted) = evicted_epoch
            && evicted.div_euclid(interval) != epoch_seconds.div_euclid(interval)
        {
            self.newest_evicted.fetch_max(evicted, Ordering::SeqCst);
        }

        slot.epoch_seconds = epoch_seconds;
        slot.captured_at = DateTime::from_timestamp(epoch_seconds, 0);

        let mut dropped_rows = 0;
        match rows.wait_events {
            Some(v) => dropped_rows += slot.wait_events.fill(v),
            None => slot.wait_events.clear(),
        }
        match rows.sessions {
            Some(v) => dropped_rows += slot.sessions.fill(v),
            None => slot.sessions.clear(),
        }
        match rows.locks {
            Some(v) => dropped_rows += slot.locks.fill(v),
            None => slot.locks.clear(),
        }

        Ok(WriteSummary {
            slot_id,
            evicted_epoch,
            dropped_rows,
        })
    }

    /// Copy of one slot, regardless of age. `None` for an out-of-range id.
    pub fn read_slot(&self, slot_id: usize) -> Option<Slot> {
        let slots = self.slots();
        slots
            .get(slot_id)
            .map(|slot| slot.read().unwrap_or_else(|e| e.into_inner()).clone())
    }

    /// Newest capture time evicted by wrap-around, if any slot was ever reused.
    ///
    /// Rewrites within the same bucket are not evictions.
    pub fn newest_evicted(&self) -> Option<i64> {
        let epoch = self.newest_evicted.load(Ordering::SeqCst);
        (epoch != i64::MIN).then_some(epoch)
    }

    /// Live slots captured strictly after `after_epoch`, oldest first.
    pub fn slots_since(&self, after_epoch: i64, now: i64) -> Vec<Slot> {
        let horizon = self.horizon_seconds();
        let slots = self.slots();
        let mut out: Vec<Slot> = slots
            .iter()
            .filter_map(|slot| {
                let slot = slot.read().unwrap_or_else(|e| e.into_inner());
                let live = !slot.is_empty()
                    && slot.epoch_seconds > after_epoch
                    && now - slot.epoch_seconds <= horizon;
                live.then(|| slot.clone())
            })
            .collect();
        out.sort_by_key(|s| s.epoch_seconds);
        out
    }

    /// Number of slots holding live data at `now`.
    pub fn occupied(&self, now: i64) -> usize {
        let horizon = self.horizon_seconds();
        self.slots()
            .iter()
            .filter(|slot| {
                let slot = slot.read().unwrap_or_else(|e| e.into_inner());
                !slot.is_empty() && now - slot.epoch_seconds <= horizon
            })
            .count()
    }

    /// Capture time of the oldest live slot.
    pub fn oldest_live(&self, now: i64) -> Option<i64> {
        let horizon = self.horizon_seconds();
        self.slots()
            .iter()
            .filter_map(|slot| {
                let slot = slot.read().unwrap_or_else(|e| e.into_inner());
                (!slot.is_empty() && now - slot.epoch_seconds <= horizon)
                    .then_some(slot.epoch_seconds)
            })
            .min()
    }

    /// Clears and re-provisions every slot with a new capacity.
    ///
    /// Destructive and administrative only: all buffered samples are lost.
    pub fn resize(&self, new_capacity: usize) -> Result<(), StoreError> {
        if new_capacity == 0 {
            return Err(StoreError::InvalidLayout(
                "ring capacity must be positive".to_string(),
            ));
        }
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        *slots = provision(new_capacity, self.row_caps);
        self.newest_evicted.store(i64::MIN, Ordering::SeqCst);
        Ok(())
    }
}

fn provision(capacity: usize, caps: RowCapacities) -> Vec<RwLock<Slot>> {
    (0..capacity)
        .map(|id| RwLock::new(Slot::empty(id, caps)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> RowCapacities {
        RowCapacities {
            wait_events: 4,
            sessions: 2,
            locks: 3,
        }
    }

    fn wait(event: &str, count: u32) -> WaitEventRow {
        WaitEventRow {
            backend_type: "client backend".to_string(),
            wait_event_type: "Lock".to_string(),
            wait_event: event.to_string(),
            count,
        }
    }

    fn write_at(ring: &RingBuffer, epoch: i64, rows: SlotWrite) -> WriteSummary {
        ring.write(ring.slot_for(epoch), epoch, rows).unwrap()
    }

    #[test]
    fn slot_for_buckets_modulo_capacity() {
        assert_eq!(slot_for(0, 60, 4), 0);
        assert_eq!(slot_for(59, 60, 4), 0);
        assert_eq!(slot_for(60, 60, 4), 1);
        assert_eq!(slot_for(240, 60, 4), 0);
        assert_eq!(slot_for(-1, 60, 4), 3);
    }

    #[test]
    fn overwrite_leaves_only_new_occupant() {
        let ring = RingBuffer::new(4, 60, caps()).unwrap();
        write_at(
            &ring,
            0,
            SlotWrite {
                wait_events: Some(vec![wait("relation", 3), wait("tuple", 1)]),
                sessions: Some(vec![SessionRow {
                    pid: 10,
                    ..SessionRow::default()
                }]),
                locks: Some(vec![LockRow::default()]),
            },
        );

        let summary = write_at(
            &ring,
            240,
            SlotWrite {
                wait_events: Some(vec![wait("transactionid", 7)]),
                ..SlotWrite::default()
            },
        );
        assert_eq!(summary.evicted_epoch, Some(0));
        assert_eq!(ring.newest_evicted(), Some(0));

        let slot = ring.read_slot(0).unwrap();
        assert_eq!(slot.epoch_seconds, 240);
        assert_eq!(slot.wait_events.rows(), &[wait("transactionid", 7)]);
        assert!(slot.sessions.is_empty());
        assert!(slot.locks.is_empty());
    }

    #[test]
    fn same_bucket_rewrite_and_idle_gap_evict_nothing() {
        let ring = RingBuffer::new(4, 60, caps()).unwrap();
        write_at(&ring, 0, SlotWrite::default());
        write_at(&ring, 30, SlotWrite::default());
        assert_eq!(ring.newest_evicted(), None);

        // Long idle gap landing in an unused slot.
        write_at(&ring, 10_000 * 60 + 120, SlotWrite::default());
        assert_eq!(ring.newest_evicted(), None);

        ring.resize(8).unwrap();
        write_at(&ring, 480, SlotWrite::default());
        assert_eq!(ring.newest_evicted(), None);
    }

    #[test]
    fn no_residue_survives_in_tombstone_positions() {
        let mut block: RowBlock<WaitEventRow> = RowBlock::with_capacity(4);
        block.fill(vec![wait("a", 1), wait("b", 2), wait("c", 3)]);
        block.fill(vec![wait("d", 9)]);

        assert_eq!(block.len(), 1);
        assert!(block.rows[1..].iter().all(|r| *r == WaitEventRow::default()));
    }

    #[test]
    fn fill_keeps_most_relevant_rows() {
        let mut block: RowBlock<WaitEventRow> = RowBlock::with_capacity(2);
        let dropped = block.fill(vec![wait("low", 1), wait("high", 9), wait("mid", 5)]);

        assert_eq!(dropped, 1);
        let kept: Vec<&str> = block.rows().iter().map(|r| r.wait_event.as_str()).collect();
        assert_eq!(kept, vec!["high", "mid"]);
    }

    #[test]
    fn write_rejects_wrong_slot() {
        let ring = RingBuffer::new(4, 60, caps()).unwrap();
        let err = ring.write(2, 60, SlotWrite::default()).unwrap_err();
        assert!(matches!(
            err,
            StoreError::SlotMismatch {
                slot_id: 2,
                expected: 1,
                ..
            }
        ));
    }

    #[test]
    fn end_to_end_four_slots() {
        let ring = RingBuffer::new(4, 60, caps()).unwrap();
        let mut slots = Vec::new();
        for t in [0, 60, 120, 180, 240] {
            slots.push(ring.slot_for(t));
            write_at(
                &ring,
                t,
                SlotWrite {
                    wait_events: Some(vec![wait(&format!("t{}", t), 1)]),
                    ..SlotWrite::default()
                },
            );
        }
        assert_eq!(slots, vec![0, 1, 2, 3, 0]);

        let slot0 = ring.read_slot(0).unwrap();
        assert_eq!(slot0.epoch_seconds, 240);
        assert_eq!(slot0.wait_events.rows()[0].wait_event, "t240");

        let since_zero = ring.slots_since(-1, 240);
        assert_eq!(since_zero.len(), 4);
        assert!(since_zero.iter().all(|s| s.epoch_seconds != 0));
        assert!(
            since_zero
                .iter()
                .flat_map(|s| s.wait_events.rows())
                .all(|r| r.wait_event != "t0")
        );
    }

    #[test]
    fn retention_horizon_bounds_visibility() {
        let ring = RingBuffer::new(4, 60, caps()).unwrap();
        write_at(&ring, 60, SlotWrite::default());

        // Visible up to t + N×interval.
        assert_eq!(ring.slots_since(0, 60 + 240).len(), 1);
        assert_eq!(ring.occupied(60 + 240), 1);
        // Evictable afterwards even though nothing overwrote it.
        assert!(ring.slots_since(0, 60 + 241).is_empty());
        assert_eq!(ring.oldest_live(60 + 241), None);
    }

    #[test]
    fn resize_clears_everything() {
        let ring = RingBuffer::new(4, 60, caps()).unwrap();
        write_at(&ring, 0, SlotWrite::default());
        ring.resize(8).unwrap();

        assert_eq!(ring.capacity(), 8);
        assert_eq!(ring.horizon_seconds(), 480);
        assert_eq!(ring.occupied(0), 0);
        assert!(ring.resize(0).is_err());
    }

    #[test]
    fn from_settings_clamps_capacity() {
        let settings = crate::config::RecorderConfig::default().ring;
        let settings = RingSettings {
            slots: 5000,
            ..settings
        };
        let ring = RingBuffer::from_settings(&settings).unwrap();
        assert_eq!(ring.capacity(), 2880);
        assert_eq!(ring.row_capacities().sessions, 25);
    }
}
