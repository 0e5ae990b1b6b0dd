//! Update scheduling and the single-writer run lock.
//!
//! The ingestion pipeline itself assumes it is the only writer. `pcl update`
//! enforces that with a [`RunLock`] and, when invoked with `--scheduled`,
//! only runs on the configured days.

use std::fs::{File, OpenOptions, TryLockError};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{Datelike, NaiveDate};

use crate::config::ScheduleConfig;

impl ScheduleConfig {
    /// True when `date` falls on the configured day of a configured month.
    pub fn is_due(&self, date: NaiveDate) -> bool {
        date.day() == self.day && self.months.contains(&date.month())
    }
}

/// Exclusive lock file held for the duration of an update run.
///
/// Holds an OS advisory lock on the file, so a second process fails to
/// acquire it while the first is alive. The lock is released when the
/// holder exits, even after a crash, and a leftover file is reused. The
/// file is removed on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    _file: File,
}

impl RunLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("Failed to open lock {}", path.display()))?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => bail!(
                "another update appears to be running (lock file {} is held)",
                path.display()
            ),
            Err(TryLockError::Error(e)) => {
                return Err(e).with_context(|| format!("Failed to lock {}", path.display()))
            }
        }

        file.set_len(0)
            .and_then(|()| writeln!(file, "{}", std::process::id()))
            .with_context(|| format!("Failed to write lock {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            _file: file,
        })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release run lock");
        }
    }
}
