//! Append-only hourly segment files for the durable tiers.
//!
//! Each store writes records into `<prefix>_YYYY-MM-DD_HH.seg`, where the
//! hour is taken from the record's own timestamp. Record framing:
//!
//! ```text
//! ┌──────────────┬──────────────┬────────────────────────────────┐
//! │ len: u32 LE  │ crc32: u32 LE│ zstd(postcard(record)) [len]   │
//! └──────────────┴──────────────┴────────────────────────────────┘
//! ```
//!
//! A torn tail (crash mid-append) or a checksum mismatch ends the readable
//! part of a segment; [`SegmentLog::open`] truncates such tails.
//! Retention deletes whole segments that end before the cutoff and rewrites
//! the one straddling it (atomically, via `.tmp` + rename).

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Timelike};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::StoreError;

const FRAME_HEADER: usize = 8;
const SEGMENT_EXT: &str = "seg";
const SEGMENT_SECONDS: i64 = 3600;
const ZSTD_LEVEL: i32 = 3;

/// A record that can be stored in a segment log.
pub trait SegmentRecord: Serialize + DeserializeOwned {
    /// Record time in seconds since Unix epoch; selects the segment and
    /// drives retention.
    fn timestamp(&self) -> i64;
}

/// Result of a retention pass over one log.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetentionResult {
    pub segments_removed: usize,
    pub segments_rewritten: usize,
    pub records_removed: usize,
    pub bytes_freed: u64,
}

struct OpenSegment {
    start: i64,
    file: File,
}

/// Append-only record log split into hourly segment files.
pub struct SegmentLog<T: SegmentRecord> {
    dir: PathBuf,
    prefix: String,
    current: Mutex<Option<OpenSegment>>,
    _record: PhantomData<fn() -> T>,
}

impl<T: SegmentRecord> std::fmt::Debug for SegmentLog<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentLog")
            .field("dir", &self.dir)
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl<T: SegmentRecord> SegmentLog<T> {
    /// Opens (creating if needed) the log `prefix` inside `dir`.
    ///
    /// Leftover `.tmp` files are removed and corrupt segment tails are truncated.
    pub fn open(dir: impl Into<PathBuf>, prefix: &str) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let log = Self {
            dir,
            prefix: prefix.to_string(),
            current: Mutex::new(None),
            _record: PhantomData,
        };

        for entry in fs::read_dir(&log.dir)?.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "tmp") && log.owns(&path) {
                let _ = fs::remove_file(&path);
            }
        }
        for (_, path) in log.segments()? {
            recover_segment(&path)?;
        }
        Ok(log)
    }

    fn owns(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(&format!("{}_", self.prefix)))
    }

    fn segment_path(&self, start: i64) -> PathBuf {
        let name = match DateTime::from_timestamp(start, 0) {
            Some(t) => format!(
                "{}_{}_{:02}.{}",
                self.prefix,
                t.format("%Y-%m-%d"),
                t.hour(),
                SEGMENT_EXT
            ),
            None => format!("{}_{}.{}", self.prefix, start, SEGMENT_EXT),
        };
        self.dir.join(name)
    }

    /// Segment files of this log with their start times, oldest first.
    fn segments(&self) -> Result<Vec<(i64, PathBuf)>, StoreError> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.extension().is_some_and(|ext| ext == SEGMENT_EXT) {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some(start) = parse_segment_start(name, &self.prefix) {
                out.push((start, path));
            }
        }
        out.sort_by_key(|(start, _)| *start);
        Ok(out)
    }

    /// Appends `records` and syncs the touched segment(s) once.
    pub fn append_all(&self, records: &[T]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        for record in records {
            let start = record.timestamp().div_euclid(SEGMENT_SECONDS) * SEGMENT_SECONDS;
            let reuse = current.as_ref().is_some_and(|seg| seg.start == start);
            if !reuse {
                if let Some(seg) = current.take() {
                    seg.file.sync_data()?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(self.segment_path(start))?;
                *current = Some(OpenSegment { start, file });
            }
            let frame = encode_frame(record)?;
            if let Some(seg) = current.as_mut() {
                seg.file.write_all(&frame)?;
            }
        }
        if let Some(seg) = current.as_ref() {
            seg.file.sync_data()?;
        }
        Ok(())
    }

    pub fn append(&self, record: &T) -> Result<(), StoreError> {
        self.append_all(std::slice::from_ref(record))
    }

    /// Every readable record, in segment order then append order.
    pub fn read_all(&self) -> Result<Vec<T>, StoreError> {
        let mut out = Vec::new();
        for (_, path) in self.segments()? {
            out.extend(read_segment::<T>(&path)?);
        }
        Ok(out)
    }

    /// Records with `start <= timestamp <= end`.
    pub fn read_between(&self, start: i64, end: i64) -> Result<Vec<T>, StoreError> {
        let mut out = Vec::new();
        for (seg_start, path) in self.segments()? {
            if seg_start + SEGMENT_SECONDS <= start || seg_start > end {
                continue;
            }
            out.extend(
                read_segment::<T>(&path)?
                    .into_iter()
                    .filter(|r| r.timestamp() >= start && r.timestamp() <= end),
            );
        }
        Ok(out)
    }

    /// Deletes every record strictly older than `cutoff`.
    pub fn retain_after(&self, cutoff: i64) -> Result<RetentionResult, StoreError> {
        let mut result = RetentionResult::default();
        // Hold the append handle so no writer races a rewrite.
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());

        for (start, path) in self.segments()? {
            if start >= cutoff {
                continue;
            }
            if current.as_ref().is_some_and(|seg| seg.start == start) {
                *current = None;
            }

            let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            let records = read_segment::<T>(&path)?;

            if start + SEGMENT_SECONDS <= cutoff {
                fs::remove_file(&path)?;
                result.segments_removed += 1;
                result.records_removed += records.len();
                result.bytes_freed += size;
                continue;
            }

            let before = records.len();
            let kept: Vec<T> = records
                .into_iter()
                .filter(|r| r.timestamp() >= cutoff)
                .collect();
            if kept.len() == before {
                continue;
            }
            let new_size = rewrite_segment(&path, &kept)?;
            result.segments_rewritten += 1;
            result.records_removed += before - kept.len();
            result.bytes_freed += size.saturating_sub(new_size);
        }

        debug!(
            prefix = %self.prefix,
            removed = result.records_removed,
            segments_removed = result.segments_removed,
            "segment retention applied"
        );
        Ok(result)
    }
}

fn encode_frame<T: Serialize>(record: &T) -> Result<Vec<u8>, StoreError> {
    let raw = postcard::to_allocvec(record).map_err(|e| StoreError::Encode(e.to_string()))?;
    let payload = zstd::bulk::compress(&raw, ZSTD_LEVEL)?;
    let crc = crc32fast::hash(&payload);

    let mut frame = Vec::with_capacity(FRAME_HEADER + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&crc.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T, StoreError> {
    let raw = zstd::stream::decode_all(payload)?;
    postcard::from_bytes(&raw).map_err(|e| StoreError::Corrupt(e.to_string()))
}

/// Walks frames and returns `(valid_end, payload ranges)`.
fn scan_frames(data: &[u8]) -> (usize, Vec<(usize, usize)>) {
    let mut pos = 0usize;
    let mut frames = Vec::new();
    while pos + FRAME_HEADER <= data.len() {
        let len = u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
            as usize;
        let crc =
            u32::from_le_bytes([data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]]);
        let body = pos + FRAME_HEADER;
        if body + len > data.len() || crc32fast::hash(&data[body..body + len]) != crc {
            break;
        }
        frames.push((body, body + len));
        pos = body + len;
    }
    (pos, frames)
}

fn read_segment<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
    let mut data = Vec::new();
    match File::open(path) {
        Ok(mut f) => {
            f.read_to_end(&mut data)?;
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    }

    let (_, frames) = scan_frames(&data);
    let mut records = Vec::with_capacity(frames.len());
    for (from, to) in frames {
        match decode_payload::<T>(&data[from..to]) {
            Ok(r) => records.push(r),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "undecodable record, skipping rest of segment");
                break;
            }
        }
    }
    Ok(records)
}

/// Truncates garbage after the last valid frame.
fn recover_segment(path: &Path) -> Result<(), StoreError> {
    let data = fs::read(path)?;
    let (valid_end, frames) = scan_frames(&data);
    if valid_end < data.len() {
        warn!(
            path = %path.display(),
            garbage_bytes = data.len() - valid_end,
            valid_records = frames.len(),
            "segment corruption detected, truncating"
        );
        OpenOptions::new()
            .write(true)
            .open(path)?
            .set_len(valid_end as u64)?;
    }
    Ok(())
}

fn rewrite_segment<T: Serialize>(path: &Path, records: &[T]) -> Result<u64, StoreError> {
    if records.is_empty() {
        fs::remove_file(path)?;
        return Ok(0);
    }
    let mut buf = Vec::new();
    for record in records {
        buf.extend_from_slice(&encode_frame(record)?);
    }
    let tmp = path.with_extension("tmp");
    {
        let mut f = File::create(&tmp)?;
        f.write_all(&buf)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(buf.len() as u64)
}

/// Parses `<prefix>_YYYY-MM-DD_HH.seg` into the segment start (epoch seconds).
fn parse_segment_start(filename: &str, prefix: &str) -> Option<i64> {
    let rest = filename
        .strip_prefix(prefix)?
        .strip_prefix('_')?
        .strip_suffix(".seg")?;
    let (date, hour) = rest.rsplit_once('_')?;
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let hour: u32 = hour.parse().ok()?;
    Some(date.and_hms_opt(hour, 0, 0)?.and_utc().timestamp())
}
