//! Remote→local download cycles
//!
//! One cycle lists the mount's prefix page by page, downloads objects that
//! are missing or changed locally (interleaved with the listing), and then
//! deletes local files that are no longer present remotely, subject to the
//! ownership rule: on a writeable mount, only files that originally came
//! from the remote are deleted, since locally created files belong to the
//! uploader.
//!
//! ## Failure semantics
//!
//! List failures back off and retry without aborting the cycle. Per-object
//! download errors are collected in the cycle stats and reported; the next
//! cycle retries them. Filesystem errors during the deletion walk are
//! logged and the walk continues.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use s3sync_core::config::SyncSettings;
use s3sync_core::keymap::to_local_path;
use s3sync_core::mounts::MountConfiguration;
use s3sync_core::ports::object_store::{IObjectStore, ObjectPage, RemoteObject};

use crate::fswalk::collect_tree;
use crate::state::SyncState;

/// Per-cycle download statistics.
#[derive(Debug, Clone)]
pub struct DownloadStats {
    /// When the cycle started.
    pub started: Instant,
    /// Wall-clock duration of the cycle.
    pub elapsed: Duration,
    /// Number of objects downloaded.
    pub files_retrieved: u64,
    /// Total bytes downloaded.
    pub bytes_retrieved: u64,
    /// Keys that failed to download this cycle.
    pub error_keys: Vec<String>,
}

impl DownloadStats {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            elapsed: Duration::ZERO,
            files_retrieved: 0,
            bytes_retrieved: 0,
            error_keys: Vec::new(),
        }
    }

    /// Logs a one-line cycle summary, plus the keys that errored.
    pub fn log_summary(&self, cfg: &MountConfiguration) {
        let seconds = self.elapsed.as_secs_f64().max(f64::EPSILON);
        let mb_per_s = self.bytes_retrieved as f64 / 1e6 / seconds;
        info!(
            bucket = %cfg.bucket,
            destination = %cfg.destination.display(),
            files = self.files_retrieved,
            bytes = self.bytes_retrieved,
            mb_per_s,
            "download cycle completed"
        );
        for key in &self.error_keys {
            warn!(%key, "object failed to download this cycle");
        }
    }
}

/// Runs one download cycle and logs its summary.
pub async fn download_files(
    store: &dyn IObjectStore,
    state: &SyncState,
    cfg: &MountConfiguration,
    settings: &SyncSettings,
) {
    debug!(
        bucket = %cfg.bucket,
        prefix = %cfg.prefix,
        destination = %cfg.destination.display(),
        "starting download"
    );
    let stats = sync_remote_to_local(store, state, cfg, settings).await;
    stats.log_summary(cfg);
}

/// One complete remote→local cycle: list, download, reconcile deletions.
pub async fn sync_remote_to_local(
    store: &dyn IObjectStore,
    state: &SyncState,
    cfg: &MountConfiguration,
    settings: &SyncSettings,
) -> DownloadStats {
    let mut stats = DownloadStats::new();

    if let Err(e) = tokio::fs::create_dir_all(&cfg.destination).await {
        warn!(
            destination = %cfg.destination.display(),
            error = %e,
            "cannot create mount destination"
        );
    }

    // Accumulate all listed objects across pages; the accumulated listing
    // drives the deletion phase after the downloads.
    let mut listed: Vec<RemoteObject> = Vec::new();
    let mut continuation: Option<String> = None;

    loop {
        let page = match store
            .list_objects(&cfg.bucket, cfg.list_prefix(), continuation.clone())
            .await
        {
            Ok(page) => page,
            Err(e) => {
                warn!(bucket = %cfg.bucket, error = %e, "failed to list objects, retrying");
                tokio::time::sleep(settings.list_retry_backoff).await;
                continue;
            }
        };

        let ObjectPage {
            objects,
            next_token,
            truncated,
        } = page;

        download_all_objects(&objects, store, state, cfg, &mut stats).await;
        listed.extend(objects);

        continuation = next_token;
        if !truncated {
            break;
        }
    }

    delete_local_files_not_in_remote(&listed, state, cfg).await;

    stats.elapsed = stats.started.elapsed();
    stats
}

/// Downloads every object of one listing page that is missing locally or
/// changed remotely. Directory-marker keys (trailing `/`) are skipped.
async fn download_all_objects(
    objects: &[RemoteObject],
    store: &dyn IObjectStore,
    state: &SyncState,
    cfg: &MountConfiguration,
    stats: &mut DownloadStats,
) {
    for obj in objects {
        if obj.key.ends_with('/') {
            continue;
        }

        let dest = to_local_path(&obj.key, &cfg.prefix, &cfg.destination);

        if let Some(parent) = dest.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!(key = %obj.key, error = %e, "cannot create parent directory");
                stats.error_keys.push(obj.key.clone());
                continue;
            }
        }

        let exists = tokio::fs::try_exists(&dest).await.unwrap_or(false);
        if exists && !state.has_file_changed_in_remote(obj) {
            debug!(key = %obj.key, "local copy up to date, skipping download");
            continue;
        }

        match store.download_object(&cfg.bucket, &obj.key, &dest).await {
            Ok(bytes) => {
                debug!(key = %obj.key, dest = %dest.display(), bytes, "downloaded");
                stats.files_retrieved += 1;
                stats.bytes_retrieved += bytes;
                state.record_download(&obj.key, &obj.etag).await;
            }
            Err(e) => {
                warn!(key = %obj.key, error = %e, "download failed");
                stats.error_keys.push(obj.key.clone());
            }
        }
    }
}

/// Deletes local files that are absent from the accumulated remote
/// listing, applying the ownership rule for writeable mounts.
async fn delete_local_files_not_in_remote(
    listed: &[RemoteObject],
    state: &SyncState,
    cfg: &MountConfiguration,
) {
    let expected: HashSet<PathBuf> = listed
        .iter()
        .filter(|obj| !obj.key.ends_with('/'))
        .map(|obj| to_local_path(&obj.key, &cfg.prefix, &cfg.destination))
        .collect();

    let tree = collect_tree(&cfg.destination).await;

    for file in tree.files {
        if expected.contains(&file) {
            continue;
        }

        // On a writeable mount a file the downloader never wrote was
        // created locally; the uploader owns its propagation.
        if cfg.writeable && !state.is_file_downloaded_from_remote(&file, cfg) {
            debug!(path = %file.display(), "locally created file, leaving in place");
            continue;
        }

        match tokio::fs::remove_file(&file).await {
            Ok(()) => {
                debug!(path = %file.display(), "removed local file absent from remote");
                state.record_local_deletion(&file, cfg).await;
            }
            Err(e) => {
                warn!(path = %file.display(), error = %e, "failed to remove local file");
            }
        }
    }
}
