//! Core StateStore implementation

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::DOCUMENT_EXTENSION;
use crate::error::StoreError;

const LOCK_FILE: &str = ".lock";

/// Directory-backed store of whole JSON documents
#[derive(Debug, Clone)]
pub struct StateStore {
    /// Directory holding one file per document
    root: PathBuf,
}

impl StateStore {
    /// Open or create a state store at the given directory
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = path.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, e))?;
        debug!(?root, "StateStore::open: opened store");
        Ok(Self { root })
    }

    /// Directory this store writes into
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File path backing the named document
    pub fn path_for(&self, name: &str) -> Result<PathBuf, StoreError> {
        validate_name(name)?;
        Ok(self.root.join(format!("{}.{}", name, DOCUMENT_EXTENSION)))
    }

    /// Whether the named document has been written
    pub fn exists(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.path_for(name)?.exists())
    }

    /// Read the whole document, `None` if it was never written
    ///
    /// Reads do not take the lock: a rename-based save is never observed half
    /// written. Use [`lock`](Self::lock) to read a document you intend to modify.
    pub fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, StoreError> {
        let path = self.path_for(name)?;
        debug!(?path, "StateStore::load: called");
        read_document(&path)
    }

    /// Replace the whole document
    ///
    /// The new content is written to a temp file in the store directory, synced,
    /// then renamed over the old document, so readers see either the previous or
    /// the new version and never a partial write.
    pub fn save<T: Serialize>(&self, name: &str, value: &T) -> Result<(), StoreError> {
        debug!(%name, "StateStore::save: called");
        self.lock()?.save(name, value)
    }

    /// Delete the named document, returning whether it existed
    pub fn remove(&self, name: &str) -> Result<bool, StoreError> {
        debug!(%name, "StateStore::remove: called");
        self.lock()?.remove(name)
    }

    /// Take the store's exclusive lock
    ///
    /// Blocks until no other holder remains, in this or any other process. A
    /// load, modify, save cycle run through the returned guard cannot interleave
    /// with another writer. Do not call `save` or `remove` on the store while
    /// holding the guard: the lock is not reentrant.
    pub fn lock(&self) -> Result<StoreLock<'_>, StoreError> {
        let path = self.root.join(LOCK_FILE);
        debug!(?path, "StateStore::lock: called");
        let lock_err = |source| StoreError::Lock {
            path: path.clone(),
            source,
        };

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(lock_err)?;
        FileExt::lock_exclusive(&file).map_err(lock_err)?;

        Ok(StoreLock { store: self, file })
    }
}

/// Exclusive access to a [`StateStore`], released on drop
#[derive(Debug)]
pub struct StoreLock<'a> {
    store: &'a StateStore,
    file: File,
}

impl StoreLock<'_> {
    /// Read the whole document under the lock
    pub fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, StoreError> {
        let path = self.store.path_for(name)?;
        debug!(?path, "StoreLock::load: called");
        read_document(&path)
    }

    /// Atomically replace the whole document under the lock
    pub fn save<T: Serialize>(&self, name: &str, value: &T) -> Result<(), StoreError> {
        let path = self.store.path_for(name)?;
        debug!(?path, "StoreLock::save: called");

        let root = self.store.root();
        let content = serde_json::to_vec_pretty(value).map_err(|e| StoreError::serialization(&path, e))?;

        let mut tmp = NamedTempFile::new_in(root).map_err(|e| StoreError::io(root, e))?;
        tmp.write_all(&content)
            .map_err(|e| StoreError::io(tmp.path().to_path_buf(), e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| StoreError::io(tmp.path().to_path_buf(), e))?;
        tmp.persist(&path).map_err(|e| StoreError::io(&path, e.error))?;

        debug!(?path, bytes = content.len(), "StoreLock::save: document written");
        Ok(())
    }

    /// Delete the named document under the lock
    pub fn remove(&self, name: &str) -> Result<bool, StoreError> {
        let path = self.store.path_for(name)?;
        debug!(?path, "StoreLock::remove: called");
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    pub fn store(&self) -> &StateStore {
        self.store
    }
}

impl Drop for StoreLock<'_> {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(error = %e, "Failed to release state store lock");
        }
    }
}

fn read_document<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let content = match fs::read(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(?path, "StateStore::load: document does not exist");
            return Ok(None);
        }
        Err(e) => return Err(StoreError::io(path, e)),
    };

    let value = serde_json::from_slice(&content).map_err(|e| StoreError::serialization(path, e))?;
    debug!(?path, bytes = content.len(), "StateStore::load: document read");
    Ok(Some(value))
}

fn validate_name(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}
