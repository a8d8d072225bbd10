//! Data models for the storage tiers.
//!
//! - [`rows`]: child rows owned by ring-buffer slots
//! - [`mode`]: operating modes and capture sections
//! - [`attempt`]: collection attempt history
//! - [`aggregate`]: rolled-up windows and raw archive records
//!
//! # Architecture
//!
//! ```text
//! RingBuffer (Tier 1, memory, N slots overwritten in place)
//!   └── Slot
//!         ├── wait_events: [WaitEventRow; W]
//!         ├── sessions:    [SessionRow; S]
//!         └── locks:       [LockRow; L]
//!
//!        │ flush (watermark)                 │ archive (watermark)
//!        ▼                                   ▼
//! AggregateWindow (Tier 2, segments)   ArchiveRecord (Tier 1.5, segments)
//! ```

mod aggregate;
mod attempt;
mod mode;
mod rows;

pub use aggregate::{AggregateWindow, ArchiveRecord, Dimension};
pub use attempt::{
    CollectionAttempt, CollectionType, SectionReport, SectionStatus, SkipReason,
};
pub use mode::{Mode, Section};
pub use rows::{LockRow, SessionRow, SlotRow, WaitEventRow};
