use crate::errors::{CoreError, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const LOCK_FILE_NAME: &str = "fileledger.lock";

/// Holder of a data directory, as recorded in its lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOwner {
    pub pid: u32,
    pub purpose: String,
    pub acquired_at: DateTime<Utc>,
}

impl fmt::Display for LockOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pid {} ({}) since {}",
            self.pid,
            self.purpose,
            self.acquired_at.to_rfc3339()
        )
    }
}

/// Exclusive hold on a data directory, released on drop.
#[derive(Debug)]
pub struct DataDirLock {
    path: PathBuf,
    owner: LockOwner,
    file: File,
}

impl DataDirLock {
    pub fn acquire<P: AsRef<Path>>(data_dir: P, purpose: &str) -> Result<Self> {
        let dir = data_dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(LOCK_FILE_NAME);
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)?;

        if let Err(source) = file.try_lock_exclusive() {
            let holder = Self::holder(dir)
                .map(|owner| owner.to_string())
                .unwrap_or_else(|| "another process".to_string());
            return Err(CoreError::Locked {
                dir: dir.to_path_buf(),
                holder,
                source,
            });
        }

        // Only the holder rewrites the record, so a stale one is replaced here.
        let owner = LockOwner {
            pid: std::process::id(),
            purpose: purpose.to_string(),
            acquired_at: Utc::now(),
        };
        let record = serde_json::to_vec(&owner).map_err(io::Error::from)?;
        file.set_len(0)?;
        file.write_all(&record)?;
        file.sync_data()?;
        debug!(path = %path.display(), holder = %owner, "Acquired data directory lock");

        Ok(Self { path, owner, file })
    }

    /// The owner recorded in `data_dir`'s lock file, if one is readable.
    pub fn holder<P: AsRef<Path>>(data_dir: P) -> Option<LockOwner> {
        let record = fs::read(data_dir.as_ref().join(LOCK_FILE_NAME)).ok()?;
        serde_json::from_slice(&record).ok()
    }

    pub fn owner(&self) -> &LockOwner {
        &self.owner
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DataDirLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
        let _ = self.file.unlock();
    }
}
