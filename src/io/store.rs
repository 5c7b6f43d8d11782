//! Durable key/value storage for the session.
//!
//! Plays the role browser storage plays for the web client: the token, the
//! cached launch credential, relayed launch data, the developer override
//! and the cached profile all live here under fixed keys (see
//! [`crate::model::session`]).
//!
//! [`FileStore`] keeps everything in one `session.json` file. Writes take
//! an advisory lock, re-read the file, apply the change and replace the file
//! atomically, so concurrent processes get last-write-wins per key rather
//! than torn files.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use indexmap::IndexMap;
use tempfile::NamedTempFile;

use crate::io::lock::{LockError, StoreLock};

/// File name of the session store inside the client home.
pub const STORE_FILE: &str = "session.json";

/// Error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("could not read {path}: {source}")]
    ReadError { path: PathBuf, source: io::Error },
    #[error("could not write {path}: {source}")]
    WriteError { path: PathBuf, source: io::Error },
    #[error("could not encode session store: {0}")]
    EncodeError(#[from] serde_json::Error),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// String key/value storage shared by every part of the client.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Process-local store. Used for tests and embeddings without a disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<IndexMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, IndexMap<String, String>>, StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store poisoned".to_string()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries()?.shift_remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File store
// ---------------------------------------------------------------------------

/// JSON-file store living in the client home directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
    path: PathBuf,
}

impl FileStore {
    /// Open (creating the directory if needed) the store in `dir`.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(dir).map_err(|e| StoreError::WriteError {
            path: dir.to_path_buf(),
            source: e,
        })?;
        Ok(FileStore {
            dir: dir.to_path_buf(),
            path: dir.join(STORE_FILE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every entry. A missing file is an empty store; a corrupted file
    /// is backed up as `.bak` and treated as empty.
    pub fn read_all(&self) -> Result<IndexMap<String, String>, StoreError> {
        if !self.path.exists() {
            return Ok(IndexMap::new());
        }
        let content = fs::read_to_string(&self.path).map_err(|e| StoreError::ReadError {
            path: self.path.clone(),
            source: e,
        })?;
        match serde_json::from_str(&content) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                let bak = self.path.with_extension("json.bak");
                let _ = fs::copy(&self.path, &bak);
                log::warn!(
                    "could not parse {} (backed up as {}): {}",
                    self.path.display(),
                    bak.display(),
                    e
                );
                Ok(IndexMap::new())
            }
        }
    }

    fn update<F>(&self, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut IndexMap<String, String>),
    {
        let _lock = StoreLock::acquire_default(&self.dir)?;
        let mut entries = self.read_all()?;
        apply(&mut entries);
        let content = serde_json::to_string_pretty(&entries)?;
        atomic_write(&self.path, content.as_bytes()).map_err(|e| StoreError::WriteError {
            path: self.path.clone(),
            source: e,
        })
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read_all()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.update(|entries| {
            entries.shift_remove(key);
        })
    }
}

/// Run store work on tokio's blocking pool.
///
/// A [`FileStore`] write can wait up to the lock timeout for another
/// process; async callers go through here so that wait never parks the
/// runtime's only worker thread.
pub async fn offload<T, F>(work: F) -> Result<T, StoreError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| StoreError::Unavailable(format!("store task failed: {}", e)))
}

/// Replace `path` with `content` via a temp file in the same directory.
pub fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
