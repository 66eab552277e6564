//! File-based storage backend.
//!
//! The outbox lives in a directory of its own:
//!
//! ```text
//! <store_path>/
//! ├─ outbox.json       # Current queue and failed entries
//! ├─ outbox.json.tmp   # Staging file for atomic replacement
//! └─ outbox.lock       # Advisory lock for single-owner access
//! ```
//!
//! The lock file ensures only one process drains a given outbox.

use crate::backend::StoreBackend;
use crate::error::{StoreError, StoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

const STATE_FILE: &str = "outbox.json";
const STATE_TEMP: &str = "outbox.json.tmp";
const LOCK_FILE: &str = "outbox.lock";

/// Configuration for the file-backed store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding the outbox files.
    pub path: PathBuf,
    /// Whether to fsync the staging file and directory on every write.
    pub sync_on_write: bool,
}

impl StoreConfig {
    /// Creates a configuration for the given directory.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sync_on_write: true,
        }
    }

    /// Sets whether writes are fsynced.
    ///
    /// Disabling this trades crash safety for speed and is only meant for
    /// tests.
    pub fn with_sync_on_write(mut self, sync: bool) -> Self {
        self.sync_on_write = sync;
        self
    }
}

/// A file-based storage backend.
///
/// # Durability
///
/// `persist` uses the write-then-rename pattern:
/// 1. Write the image to `outbox.json.tmp`
/// 2. Sync the staging file to disk
/// 3. Rename it over `outbox.json`
/// 4. Fsync the directory so the rename itself is durable
///
/// A crash at any point leaves either the old or the new image in place.
///
/// # Example
///
/// ```no_run
/// use outbox_store::{FileBackend, OutboxStore, StoreConfig};
///
/// let backend = FileBackend::open(&StoreConfig::new("data/outbox")).unwrap();
/// let store = OutboxStore::open(Box::new(backend)).unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    sync_on_write: bool,
    /// Lock file handle (held for exclusive access).
    _lock_file: File,
}

impl FileBackend {
    /// Opens or creates the store directory and acquires its lock.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The path exists and is not a directory
    /// - Another process holds the lock (returns `Locked`)
    /// - I/O errors occur
    pub fn open(config: &StoreConfig) -> StoreResult<Self> {
        let path = config.path.as_path();
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(StoreError::InvalidLocation(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked {
                path: path.to_path_buf(),
            });
        }

        // A leftover staging file is an unfinished write; the committed image wins.
        let temp = path.join(STATE_TEMP);
        if temp.exists() {
            tracing::warn!(path = %temp.display(), "discarding unfinished outbox write");
            fs::remove_file(&temp)?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            sync_on_write: config.sync_on_write,
            _lock_file: lock_file,
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path of the committed image.
    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.path.join(STATE_FILE)
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> StoreResult<()> {
        let dir = File::open(&self.path)?;
        dir.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> StoreResult<()> {
        // NTFS journaling covers rename durability.
        Ok(())
    }
}

impl StoreBackend for FileBackend {
    fn load(&self) -> StoreResult<Option<Vec<u8>>> {
        let mut file = match File::open(self.state_path()) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        if data.is_empty() {
            return Ok(None);
        }
        Ok(Some(data))
    }

    fn persist(&mut self, data: &[u8]) -> StoreResult<()> {
        let temp_path = self.path.join(STATE_TEMP);

        let mut file = File::create(&temp_path)?;
        file.write_all(data)?;
        if self.sync_on_write {
            file.sync_all()?;
        }
        drop(file);

        fs::rename(&temp_path, self.state_path())?;

        if self.sync_on_write {
            self.sync_directory()?;
        }
        Ok(())
    }
}
