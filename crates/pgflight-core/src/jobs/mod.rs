//! Periodic promotion and maintenance jobs.
//!
//! Flush and archive follow the same watermark pattern: read every live ring
//! slot captured after the last recorded watermark, write the durable copy,
//! then advance the watermark. Both run without any lock across the ring;
//! each slot read sees a fully written sample.

pub mod archive;
pub mod cleanup;
pub mod flush;
pub mod schedule;

pub use archive::{ArchiveJob, ArchiveReport};
pub use cleanup::{Cleanup, CleanupReport};
pub use flush::{FlushJob, FlushReport};
pub use schedule::next_fire;

use tracing::warn;

use crate::storage::RingBuffer;

/// Seconds of samples overwritten since `watermark`, logging when non-zero.
///
/// Only slots actually reused by a later sample count: an idle or restarted
/// recorder loses nothing even when the watermark is older than the horizon.
fn warn_on_wrap(job: &str, ring: &RingBuffer, watermark: Option<i64>) -> i64 {
    let (Some(watermark), Some(evicted)) = (watermark, ring.newest_evicted()) else {
        return 0;
    };
    let lost = evicted - watermark;
    if lost > 0 {
        warn!(
            job,
            watermark,
            newest_evicted = evicted,
            lost_seconds = lost,
            horizon_seconds = ring.horizon_seconds(),
            "ring buffer wrapped before promotion, samples lost"
        );
        return lost;
    }
    0
}
