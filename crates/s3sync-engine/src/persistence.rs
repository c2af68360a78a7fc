//! JSON file persistence
//!
//! [`JsonFileStore`] persists a serializable value as an indented JSON
//! document. All operations are serialized by a per-store mutex, and
//! missing parent directories are created on save. `load` distinguishes
//! "file does not exist" from real failures because a missing state file
//! is the expected first-run condition, not an error.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// Errors from loading or saving a persisted document.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The backing file does not exist yet. Non-fatal on first run.
    #[error("state file not found: {0}")]
    NotFound(PathBuf),

    #[error("state file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state file serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("cannot resolve home directory for default state path")]
    NoHomeDir,
}

/// A mutex-serialized JSON document on disk.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    /// Creates a store at `base_dir/file_name`.
    pub fn new(base_dir: &Path, file_name: &str) -> Self {
        Self {
            path: base_dir.join(file_name),
            lock: Mutex::new(()),
        }
    }

    /// Creates a store at `~/file_name`, the default location for the
    /// sync-state document.
    pub fn in_home_dir(file_name: &str) -> Result<Self, PersistenceError> {
        let home = dirs::home_dir().ok_or(PersistenceError::NoHomeDir)?;
        Ok(Self::new(&home, file_name))
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serializes `value` as indented JSON and writes it out, creating
    /// parent directories as needed.
    pub async fn save<T: Serialize>(&self, value: &T) -> Result<(), PersistenceError> {
        let _guard = self.lock.lock().await;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let body = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(&self.path, body).await?;
        debug!(path = %self.path.display(), "state saved");
        Ok(())
    }

    /// Reads and deserializes the document.
    ///
    /// Returns [`PersistenceError::NotFound`] when the file is absent.
    pub async fn load<T: DeserializeOwned>(&self) -> Result<T, PersistenceError> {
        let _guard = self.lock.lock().await;

        let body = match tokio::fs::read(&self.path).await {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(PersistenceError::NotFound(self.path.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        Ok(serde_json::from_slice(&body)?)
    }

    /// Deletes the backing file. Deleting an absent file is a no-op.
    pub async fn clean(&self) -> Result<(), PersistenceError> {
        let _guard = self.lock.lock().await;

        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
