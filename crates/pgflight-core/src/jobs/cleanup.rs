//! Retention cleanup over the durable stores.
//!
//! Only data strictly older than each retention cutoff is removed, so the
//! current ring slot and any in-flight attempt are never touched.

use tracing::info;

use crate::config::RetentionSettings;
use crate::storage::{AggregateStore, ArchiveStore, AttemptLog, RetentionResult, StoreError};

const DAY_SECONDS: i64 = 86_400;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanupReport {
    pub aggregates: RetentionResult,
    pub archive: RetentionResult,
    pub attempts: RetentionResult,
}

impl CleanupReport {
    pub fn records_removed(&self) -> usize {
        self.aggregates.records_removed + self.archive.records_removed + self.attempts.records_removed
    }
}

pub struct Cleanup;

impl Cleanup {
    pub fn run(
        retention: &RetentionSettings,
        aggregates: &AggregateStore,
        archive: &ArchiveStore,
        attempts: &AttemptLog,
        now_ms: i64,
    ) -> Result<CleanupReport, StoreError> {
        let now = now_ms.div_euclid(1000);
        let report = CleanupReport {
            aggregates: aggregates.purge_before(cutoff(now, retention.aggregate_days))?,
            archive: archive.purge_before(cutoff(now, retention.archive_days))?,
            attempts: attempts
                .purge_before(cutoff(now, retention.attempt_days) * 1000)?,
        };

        let bytes_freed =
            report.aggregates.bytes_freed + report.archive.bytes_freed + report.attempts.bytes_freed;
        info!(
            aggregates = report.aggregates.records_removed,
            archive = report.archive.records_removed,
            attempts = report.attempts.records_removed,
            bytes_freed,
            "retention cleanup finished"
        );
        Ok(report)
    }
}

fn cutoff(now: i64, days: u32) -> i64 {
    now - i64::from(days) * DAY_SECONDS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecorderConfig;
    use crate::storage::model::{
        AggregateWindow, ArchiveRecord, CollectionType, Dimension, Mode,
    };
    use tempfile::tempdir;

    const NOW: i64 = 1_700_000_000;

    fn window(end_time: i64) -> AggregateWindow {
        AggregateWindow {
            start_time: end_time - 300,
            end_time,
            dimension: Dimension::WaitEvent,
            key: "Lock:tuple".to_string(),
            slots: 5,
            count: 1,
            avg: 0.2,
            max: 1.0,
        }
    }

    #[test]
    fn removes_only_data_past_each_retention() {
        let dir = tempdir().unwrap();
        let aggregates = AggregateStore::open(&dir.path().join("agg")).unwrap();
        let archive = ArchiveStore::open(&dir.path().join("arc")).unwrap();
        let attempts = AttemptLog::open(&dir.path().join("att")).unwrap();
        let retention = RecorderConfig::default().retention;

        // 40 and 10 days old: only the first passes the 30-day aggregate retention.
        aggregates
            .append(&[window(NOW - 40 * DAY_SECONDS), window(NOW - 10 * DAY_SECONDS)])
            .unwrap();
        archive
            .append(&[
                ArchiveRecord {
                    epoch_seconds: NOW - 10 * DAY_SECONDS,
                    ..ArchiveRecord::default()
                },
                ArchiveRecord {
                    epoch_seconds: NOW - DAY_SECONDS,
                    ..ArchiveRecord::default()
                },
            ])
            .unwrap();
        let old = attempts.begin(CollectionType::Sample, Mode::Normal, (NOW - 8 * DAY_SECONDS) * 1000);
        attempts.finish(old, (NOW - 8 * DAY_SECONDS) * 1000 + 50).unwrap();
        let recent = attempts.begin(CollectionType::Sample, Mode::Normal, (NOW - 60) * 1000);
        attempts.finish(recent, (NOW - 60) * 1000 + 50).unwrap();
        let _running = attempts.begin(CollectionType::Flush, Mode::Normal, NOW * 1000);

        let report = Cleanup::run(&retention, &aggregates, &archive, &attempts, NOW * 1000).unwrap();

        assert_eq!(report.aggregates.records_removed, 1);
        assert_eq!(report.archive.records_removed, 1);
        assert_eq!(report.attempts.records_removed, 1);
        assert_eq!(report.records_removed(), 3);
        assert_eq!(aggregates.windows_between(i64::MIN, i64::MAX, None).unwrap().len(), 1);
        assert_eq!(attempts.len(), 2);
    }

    #[test]
    fn cutoff_is_whole_days() {
        assert_eq!(cutoff(NOW, 7), NOW - 604_800);
    }
}
