//! Cache directory access.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::info;

use snapcache_core::CacheKey;

use crate::error::{Result, StorageError};
use crate::models::{decode, encode, CacheEntry, DecodeError};

/// File extension of committed entries. Temporary files never carry it.
pub const ENTRY_EXTENSION: &str = "entry";

/// File-per-entry response store rooted at a cache directory.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    /// Opens the store at `root`, creating the directory if needed.
    ///
    /// Fails if the directory cannot be created or listed. This is the only
    /// storage failure that should stop the proxy.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        fs::read_dir(&root)?;

        info!("Opened cache directory at {:?}", root);
        Ok(Self { root })
    }

    /// Returns the cache directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the file an entry for `key` is stored in.
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.root
            .join(key.shard())
            .join(format!("{}.{}", key, ENTRY_EXTENSION))
    }

    /// Looks up the entry for `key`.
    ///
    /// Returns `Ok(None)` if nothing is stored and an error if the entry file
    /// is unreadable or corrupt.
    pub fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let path = self.entry_path(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match decode(key, &bytes) {
            Ok(entry) => Ok(Some(entry)),
            Err(DecodeError::Json(e)) => Err(StorageError::Json(e)),
            Err(DecodeError::Invalid(reason)) => Err(StorageError::Corrupt {
                path: path.display().to_string(),
                reason,
            }),
        }
    }

    /// Returns true if an entry file exists for `key`.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entry_path(key).is_file()
    }

    /// Stores `entry`, replacing any previous entry for the same key.
    ///
    /// The new contents are written to a temporary file beside the target
    /// and renamed into place. Concurrent writers of the same key race;
    /// the last rename wins.
    pub fn put(&self, entry: &CacheEntry) -> Result<()> {
        let path = self.entry_path(&entry.key);
        let dir = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir)?;

        let contents = encode(entry)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&contents)?;
        tmp.as_file().sync_data()?;
        tmp.persist(&path).map_err(|e| StorageError::Io(e.error))?;

        tracing::trace!("Stored {} bytes for {} at {:?}", contents.len(), entry.target, path);
        Ok(())
    }

    /// Deletes the entry for `key`. Returns false if there was none.
    pub fn remove(&self, key: &CacheKey) -> Result<bool> {
        match fs::remove_file(self.entry_path(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Counts committed entries.
    pub fn len(&self) -> Result<usize> {
        let mut count = 0;
        for shard in fs::read_dir(&self.root)? {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            for file in fs::read_dir(shard.path())? {
                let path = file?.path();
                if path.extension().is_some_and(|ext| ext == ENTRY_EXTENSION) {
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    /// Returns true if no entries are stored.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
