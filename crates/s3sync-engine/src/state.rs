//! Persistent per-object sync state
//!
//! [`SyncState`] maps remote keys to the entity tag last observed when the
//! downloader wrote the corresponding local file. It is the coordination
//! surface between the two sync halves:
//!
//! - the downloader skips objects whose etag is unchanged and consults the
//!   map to decide whether a local file *originated* from the remote
//!   (ownership-based deletion on writeable mounts);
//! - removing an entry on local deletion makes a reappearing remote key
//!   look changed, so it is re-downloaded.
//!
//! A key is present iff the local file was written by the downloader at
//! least once and not since recorded as deleted locally. Every mutation is
//! followed by a write-through save; a crash between a local write and the
//! save therefore biases toward re-download, which is safe.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use dashmap::DashMap;
use tracing::{info, warn};

use s3sync_core::keymap::to_remote_key;
use s3sync_core::mounts::MountConfiguration;
use s3sync_core::ports::object_store::RemoteObject;

use crate::persistence::{JsonFileStore, PersistenceError};

/// Default file name of the persisted state document, resolved under the
/// user's home directory.
pub const STATE_FILE_NAME: &str = "s3-synchronizer-state";

/// Thread-safe remote-key → etag map with write-through persistence.
#[derive(Debug)]
pub struct SyncState {
    etags: DashMap<String, String>,
    store: JsonFileStore,
}

impl SyncState {
    /// Loads previously persisted state from `store`.
    ///
    /// A missing file is the normal first-run condition and yields an
    /// empty map. An unreadable or corrupt file also yields an empty map:
    /// the only cost is re-downloading objects, which is always safe.
    pub async fn load(store: JsonFileStore) -> Self {
        let etags = match store.load::<HashMap<String, String>>().await {
            Ok(map) => {
                info!(entries = map.len(), path = %store.path().display(), "loaded sync state");
                map.into_iter().collect()
            }
            Err(PersistenceError::NotFound(path)) => {
                info!(path = %path.display(), "no sync state file yet, starting empty");
                DashMap::new()
            }
            Err(e) => {
                warn!(error = %e, "could not load sync state, starting empty");
                DashMap::new()
            }
        };

        Self { etags, store }
    }

    /// Records that `key` was downloaded with `etag` into the local tree.
    pub async fn record_download(&self, key: &str, etag: &str) {
        self.etags.insert(key.to_string(), etag.to_string());
        self.persist().await;
    }

    /// Records that the local mirror of a remote object was deleted.
    ///
    /// The entry is removed, so if the key reappears remotely it counts as
    /// changed and gets downloaded again.
    pub async fn record_local_deletion(&self, local_path: &Path, cfg: &MountConfiguration) {
        let key = to_remote_key(local_path, &cfg.prefix, &cfg.destination);
        self.etags.remove(&key);
        self.persist().await;
    }

    /// Whether `obj` must be (re)downloaded: true when the key was never
    /// seen, or when the stored etag differs from the listed one.
    pub fn has_file_changed_in_remote(&self, obj: &RemoteObject) -> bool {
        match self.etags.get(&obj.key) {
            Some(stored) => *stored != obj.etag,
            None => true,
        }
    }

    /// Whether the file at `local_path` was written by the downloader.
    /// Files that were created locally are not in the map.
    pub fn is_file_downloaded_from_remote(&self, local_path: &Path, cfg: &MountConfiguration) -> bool {
        let key = to_remote_key(local_path, &cfg.prefix, &cfg.destination);
        self.etags.contains_key(&key)
    }

    /// Drops all entries and deletes the persisted file.
    pub async fn clean(&self) {
        self.etags.clear();
        if let Err(e) = self.store.clean().await {
            warn!(error = %e, "failed to remove sync state file");
        }
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.etags.len()
    }

    /// True when no keys are tracked.
    pub fn is_empty(&self) -> bool {
        self.etags.is_empty()
    }

    /// Write-through save. Failures leave the in-memory map authoritative
    /// for the running process and are logged.
    async fn persist(&self) {
        let snapshot: BTreeMap<String, String> = self
            .etags
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        if let Err(e) = self.store.save(&snapshot).await {
            warn!(error = %e, "failed to persist sync state");
        }
    }
}
