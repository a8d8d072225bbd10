//! Persistent progress markers of the flush and archive jobs.
//!
//! A watermark is the capture time (epoch seconds) of the newest slot a job
//! has already consumed. It is stored as decimal text in `<name>.watermark`
//! and replaced atomically (write `.tmp`, fsync, rename), so a crash leaves
//! either the old or the new value.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use super::StoreError;

#[derive(Debug, Clone)]
pub struct Watermark {
    path: PathBuf,
}

impl Watermark {
    pub fn new(dir: &Path, name: &str) -> Self {
        Self {
            path: dir.join(format!("{}.watermark", name)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last stored value, `None` if the job never ran.
    pub fn load(&self) -> Result<Option<i64>, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        text.trim().parse::<i64>().map(Some).map_err(|e| {
            StoreError::Corrupt(format!("{}: {}", self.path.display(), e))
        })
    }

    pub fn store(&self, value: i64) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("watermark.tmp");
        {
            let mut f = File::create(&tmp)?;
            writeln!(f, "{}", value)?;
            f.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_watermark_is_none() {
        let dir = tempdir().unwrap();
        let mark = Watermark::new(dir.path(), "flush");
        assert_eq!(mark.load().unwrap(), None);
    }

    #[test]
    fn store_replaces_previous_value() {
        let dir = tempdir().unwrap();
        let mark = Watermark::new(dir.path(), "archive");
        mark.store(1_700_000_000).unwrap();
        mark.store(1_700_000_060).unwrap();

        assert_eq!(mark.load().unwrap(), Some(1_700_000_060));
        assert!(!dir.path().join("archive.watermark.tmp").exists());
    }

    #[test]
    fn garbage_is_reported_as_corrupt() {
        let dir = tempdir().unwrap();
        let mark = Watermark::new(dir.path(), "flush");
        fs::write(mark.path(), "yesterday").unwrap();
        assert!(matches!(mark.load(), Err(StoreError::Corrupt(_))));
    }
}
