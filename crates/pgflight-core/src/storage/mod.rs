//! Storage tiers.
//!
//! - [`ring`]: Tier 1, fixed-capacity in-memory ring buffer
//! - [`aggregates`]: Tier 2, rolled-up windows produced by flush
//! - [`archive`]: Tier 1.5, raw slot copies produced by archive
//! - [`attempts`]: collection attempt history
//! - [`segment`] / [`watermark`]: on-disk primitives shared by the durable tiers

pub mod aggregates;
pub mod archive;
pub mod attempts;
pub mod model;
pub mod ring;
pub mod segment;
pub mod watermark;

pub use aggregates::AggregateStore;
pub use archive::ArchiveStore;
pub use attempts::AttemptLog;
pub use ring::{RingBuffer, Slot, SlotWrite, WriteSummary};
pub use segment::{RetentionResult, SegmentLog, SegmentRecord};
pub use watermark::Watermark;

/// Error type for the storage layer.
#[derive(Debug)]
pub enum StoreError {
    /// Filesystem operation failed.
    Io(std::io::Error),
    /// Record could not be serialized.
    Encode(String),
    /// Stored data could not be decoded.
    Corrupt(String),
    /// A write targeted a slot other than the one its timestamp maps to.
    SlotMismatch {
        slot_id: usize,
        expected: usize,
        epoch_seconds: i64,
    },
    /// Ring dimensions are unusable (zero capacity or interval).
    InvalidLayout(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "storage I/O error: {}", e),
            StoreError::Encode(msg) => write!(f, "storage encode error: {}", msg),
            StoreError::Corrupt(msg) => write!(f, "storage corrupt: {}", msg),
            StoreError::SlotMismatch {
                slot_id,
                expected,
                epoch_seconds,
            } => write!(
                f,
                "slot {} does not match capture time {} (expected slot {})",
                slot_id, epoch_seconds, expected
            ),
            StoreError::InvalidLayout(msg) => write!(f, "invalid ring layout: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}
