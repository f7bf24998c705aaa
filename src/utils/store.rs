use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::to_string_pretty;
use tempfile::NamedTempFile;

use crate::errors::{StorageReadError, StorageWriteError};
use crate::models::{RecipientId, Snapshot};

// Reads a JSON document, treating a missing or zero-length file as absent.
fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageReadError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StorageReadError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    if contents.trim().is_empty() {
        return Ok(None);
    }

    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|source| StorageReadError::Malformed {
            path: path.to_path_buf(),
            source,
        })
}

// Writes into a temp file next to the target, then renames it over the target,
// so a crash mid-write leaves the previous document intact.
fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StorageWriteError> {
    let io_error = |source: std::io::Error| StorageWriteError::Io {
        path: path.to_path_buf(),
        source,
    };

    let contents = to_string_pretty(value).map_err(|source| StorageWriteError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(io_error)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(io_error)?;
    tmp.write_all(contents.as_bytes()).map_err(io_error)?;
    tmp.as_file().sync_all().map_err(io_error)?;
    tmp.persist(path).map_err(|e| io_error(e.error))?;
    Ok(())
}

/// Last observed grade listing, kept as a JSON array on disk.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` on first run. Corrupt content is an error, never a cold start.
    pub fn load(&self) -> Result<Option<Snapshot>, StorageReadError> {
        let snapshot: Option<Snapshot> = read_json(&self.path)?;
        match &snapshot {
            Some(records) => debug!("Loaded {} records from {}", records.len(), self.path.display()),
            None => info!("No previous snapshot at {}", self.path.display()),
        }
        Ok(snapshot)
    }

    pub fn save(&self, snapshot: &Snapshot) -> Result<(), StorageWriteError> {
        write_json(&self.path, snapshot)?;
        debug!("Saved {} records to {}", snapshot.len(), self.path.display());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscription {
    Added,
    AlreadySubscribed,
}

/// Append-only list of chat ids that receive broadcast notifications.
#[derive(Debug)]
pub struct SubscriberStore {
    path: PathBuf,
    ids: Mutex<Vec<RecipientId>>,
}

impl SubscriberStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageReadError> {
        let path = path.into();
        let ids: Vec<RecipientId> = read_json(&path)?.unwrap_or_default();
        info!("Loaded {} subscribers from {}", ids.len(), path.display());
        Ok(Self {
            path,
            ids: Mutex::new(ids),
        })
    }

    pub fn all(&self) -> Vec<RecipientId> {
        self.lock().clone()
    }

    pub fn subscribe(&self, id: RecipientId) -> Result<Subscription, StorageWriteError> {
        let mut ids = self.lock();
        if ids.contains(&id) {
            return Ok(Subscription::AlreadySubscribed);
        }

        ids.push(id);
        if let Err(e) = write_json(&self.path, ids.as_slice()) {
            ids.pop();
            return Err(e);
        }
        Ok(Subscription::Added)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<RecipientId>> {
        // The list stays consistent even if a holder panicked; recover it.
        self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
