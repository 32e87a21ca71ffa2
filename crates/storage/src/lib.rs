//! Whole-document snapshot persistence.
//!
//! Each piece of fileledger state (the chain, the contract map, the
//! verification records) is stored as one JSON document that is rewritten in
//! full on every mutation. There is no append log and no partial update.

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::NamedTempFile;

/// Storage errors
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Malformed snapshot at {location}: {source}")]
    Malformed {
        location: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Write rejected by {location}")]
    WriteRejected { location: String },
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Abstract snapshot store holding a single document of type `T`.
pub trait SnapshotStore<T>: Send + Sync {
    /// Read the stored document. `Ok(None)` when nothing has been written yet.
    fn load(&self) -> Result<Option<T>>;

    /// Replace the stored document.
    fn save(&self, document: &T) -> Result<()>;

    /// Human-readable location, used in log lines.
    fn describe(&self) -> String;
}

/// Load a document, treating unreadable snapshots like missing ones.
///
/// A crash mid-write or a hand-edited file must not keep the process from
/// starting; the caller falls back to fresh state and the problem is logged.
pub fn load_or_fresh<T, S>(store: &S) -> Option<T>
where
    S: SnapshotStore<T> + ?Sized,
{
    match store.load() {
        Ok(Some(document)) => Some(document),
        Ok(None) => {
            tracing::debug!(store = %store.describe(), "No snapshot found, starting fresh");
            None
        }
        Err(err) => {
            tracing::warn!(
                store = %store.describe(),
                error = %err,
                "Discarding unreadable snapshot, starting fresh"
            );
            None
        }
    }
}

/// JSON file backend.
///
/// Writes go to a temporary file in the same directory which is then renamed
/// over the target, so readers only ever see a complete document.
pub struct JsonFileStore<T> {
    path: PathBuf,
    _document: PhantomData<fn() -> T>,
}

impl<T> JsonFileStore<T> {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            _document: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<T> SnapshotStore<T> for JsonFileStore<T>
where
    T: Serialize + DeserializeOwned,
{
    fn load(&self) -> Result<Option<T>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StorageError::Malformed {
                location: self.describe(),
                source,
            })
    }

    fn save(&self, document: &T) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut tmp, document)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|err| err.error)?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory testing backend.
///
/// Keeps the serialized bytes rather than the value, so a reload goes through
/// serde exactly like the file backend does.
pub struct MemoryStore<T> {
    name: String,
    bytes: RwLock<Option<Vec<u8>>>,
    reject_writes: AtomicBool,
    _document: PhantomData<fn() -> T>,
}

impl<T> MemoryStore<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bytes: RwLock::new(None),
            reject_writes: AtomicBool::new(false),
            _document: PhantomData,
        }
    }

    /// Make every subsequent `save` fail (or succeed again).
    pub fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Overwrite the stored bytes directly, e.g. with a truncated document.
    pub fn put_raw(&self, bytes: impl Into<Vec<u8>>) {
        *self.bytes.write() = Some(bytes.into());
    }

    /// Stored bytes, if any.
    pub fn raw(&self) -> Option<Vec<u8>> {
        self.bytes.read().clone()
    }
}

impl<T> SnapshotStore<T> for MemoryStore<T>
where
    T: Serialize + DeserializeOwned,
{
    fn load(&self) -> Result<Option<T>> {
        match self.bytes.read().as_deref() {
            None => Ok(None),
            Some(bytes) => {
                serde_json::from_slice(bytes)
                    .map(Some)
                    .map_err(|source| StorageError::Malformed {
                        location: self.describe(),
                        source,
                    })
            }
        }
    }

    fn save(&self, document: &T) -> Result<()> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(StorageError::WriteRejected {
                location: self.describe(),
            });
        }
        let bytes = serde_json::to_vec(document)?;
        *self.bytes.write() = Some(bytes);
        Ok(())
    }

    fn describe(&self) -> String {
        format!("memory:{}", self.name)
    }
}
