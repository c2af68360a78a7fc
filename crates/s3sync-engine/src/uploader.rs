//! Local→remote upload watching
//!
//! Only writeable mounts get an uploader. Two nested loops cooperate:
//!
//! - The **supervisor** owns two signal channels, `start` and `stop`. On
//!   every `start` signal it constructs a fresh [`DirectoryWatcher`] and
//!   launches a watcher loop for it. It terminates when its configured
//!   lifetime expires.
//! - The **watcher loop** first walks the destination tree, registering
//!   every existing directory and enqueueing each for a catch-up crawl,
//!   then multiplexes the stop signal, the crawl queue, and the watcher's
//!   event and error streams.
//!
//! ## Catch-up crawls
//!
//! When a directory is created together with its children in one
//! operation, the children's CREATE events can fire before the watch on
//! the new directory is attached, so the events are never delivered.
//! Every newly watched directory is therefore also enqueued for a crawl
//! that uploads whatever already exists inside it. Uploads are idempotent
//! under the size guard, so a file reached both by an event and by a
//! crawl is still uploaded once.
//!
//! ## Loop avoidance
//!
//! A file whose local size equals the remote object's size is not
//! uploaded: the remote etag changes on every write even for identical
//! content, so uploading would trigger a re-download and then another
//! upload, indefinitely. Empty files are not uploaded either; the
//! downloader may create a file before streaming its content into it.
//!
//! ## Watcher resets
//!
//! After a directory rename some platforms deliver CREATE/WRITE events
//! for paths under the old name. When a stat for an event path reports
//! not-found, the loop signals `stop` and then `start`, and the
//! supervisor rebuilds the watcher from the current on-disk tree.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use s3sync_core::config::SyncSettings;
use s3sync_core::keymap::to_remote_key;
use s3sync_core::mounts::MountConfiguration;
use s3sync_core::ports::object_store::{IObjectStore, UploadOptions};

use crate::fswalk::collect_tree;
use crate::watcher::{DirectoryWatcher, WatchEvent, WatchOp, WatchRegistry};

/// Capacity of the per-loop catch-up crawl queue.
const CRAWL_CHANNEL_CAPACITY: usize = 1000;

/// Capacity of the per-loop stop-signal channel.
const STOP_CHANNEL_CAPACITY: usize = 1000;

/// Why a watcher loop ended.
enum LoopExit {
    /// A stop signal arrived (reset or supervisor shutdown).
    Stopped,
    /// The configured lifetime elapsed.
    TimedOut,
}

/// Spawns the upload supervisor for one writeable mount.
pub fn spawn_upload_watcher(
    tracker: &TaskTracker,
    store: Arc<dyn IObjectStore>,
    cfg: MountConfiguration,
    settings: SyncSettings,
) {
    let worker = Arc::new(UploadWorker {
        store,
        cfg,
        settings,
        tracker: tracker.clone(),
    });
    tracker.spawn(run_supervisor(worker));
}

/// Shared context for one mount's upload tasks.
pub struct UploadWorker {
    store: Arc<dyn IObjectStore>,
    cfg: MountConfiguration,
    settings: SyncSettings,
    tracker: TaskTracker,
}

/// Supervisor loop: builds a fresh watcher (and watcher loop) for every
/// `start` signal until the lifetime expires.
async fn run_supervisor(worker: Arc<UploadWorker>) {
    let cfg = &worker.cfg;

    // The destination normally exists by the time a watcher starts, but
    // the uploader must not depend on a download having run first.
    if let Err(e) = tokio::fs::create_dir_all(&cfg.destination).await {
        warn!(
            destination = %cfg.destination.display(),
            error = %e,
            "cannot create mount destination for upload watching"
        );
    }

    let deadline = worker
        .settings
        .stop_upload_watchers_after
        .map(|d| Instant::now() + d);

    let (start_tx, mut start_rx) = mpsc::channel::<()>(1);

    // Kick off the first watcher loop.
    let _ = start_tx.send(()).await;

    loop {
        tokio::select! {
            _ = maybe_deadline(deadline) => {
                debug!(destination = %cfg.destination.display(), "upload supervisor lifetime reached");
                break;
            }
            _ = start_rx.recv() => {
                match DirectoryWatcher::new() {
                    Ok(watcher) => {
                        let (stop_tx, stop_rx) = mpsc::channel::<()>(STOP_CHANNEL_CAPACITY);
                        worker.tracker.spawn(run_watcher_loop(
                            Arc::clone(&worker),
                            watcher,
                            stop_rx,
                            stop_tx,
                            start_tx.clone(),
                            deadline,
                        ));
                    }
                    Err(e) => {
                        warn!(error = %e, "cannot create directory watcher");
                    }
                }
            }
        }
    }
}

/// Inner watcher loop: registers the existing tree, then processes crawl
/// requests and filesystem events until stopped or timed out.
async fn run_watcher_loop(
    worker: Arc<UploadWorker>,
    mut watcher: DirectoryWatcher,
    mut stop_rx: mpsc::Receiver<()>,
    stop_tx: mpsc::Sender<()>,
    start_tx: mpsc::Sender<()>,
    deadline: Option<Instant>,
) {
    let (crawl_tx, mut crawl_rx) = mpsc::channel::<PathBuf>(CRAWL_CHANNEL_CAPACITY);

    // Register every directory that already exists; each registration
    // enqueues a catch-up crawl, so the initial tree is also uploaded
    // (no-ops for files the remote already has, via the size guard).
    worker
        .register_tree(&mut watcher.registry, &worker.cfg.destination, &crawl_tx)
        .await;

    let exit = loop {
        tokio::select! {
            _ = maybe_deadline(deadline) => break LoopExit::TimedOut,

            _ = stop_rx.recv() => break LoopExit::Stopped,

            Some(dir) = crawl_rx.recv() => {
                worker.crawl_dir(&mut watcher.registry, &dir, &crawl_tx).await;
            }

            Some(event) = watcher.events.recv() => {
                worker
                    .process_event(&mut watcher.registry, event, &crawl_tx, &stop_tx, &start_tx)
                    .await;
            }

            Some(err) = watcher.errors.recv() => {
                warn!(error = %err, "filesystem watcher error");
            }
        }
    };

    match exit {
        LoopExit::Stopped => debug!("watcher loop received stop signal"),
        LoopExit::TimedOut => debug!("watcher loop lifetime reached"),
    }
    watcher.stop();
}

impl UploadWorker {
    /// Builds a worker outside the supervisor, for callers that drive
    /// uploads directly.
    pub fn new(
        store: Arc<dyn IObjectStore>,
        cfg: MountConfiguration,
        settings: SyncSettings,
    ) -> Self {
        Self {
            store,
            cfg,
            settings,
            tracker: TaskTracker::new(),
        }
    }

    /// Handles one filesystem event according to the mount's rules.
    async fn process_event(
        &self,
        registry: &mut WatchRegistry,
        event: WatchEvent,
        crawl_tx: &mpsc::Sender<PathBuf>,
        stop_tx: &mpsc::Sender<()>,
        start_tx: &mpsc::Sender<()>,
    ) {
        if is_excluded(&event.path) {
            return;
        }

        debug!(path = %event.path.display(), op = ?event.op, "filesystem event");

        match event.op {
            WatchOp::Rename | WatchOp::Remove => {
                if registry.is_being_watched(&event.path) {
                    // A watched directory was renamed or deleted; the
                    // event carries its old name. Drop the watch and
                    // remove the remote subtree under the old mapping.
                    registry.unwatch_dir(&event.path);
                    if let Err(e) = self.delete_remote_subtree(&event.path).await {
                        warn!(
                            path = %event.path.display(),
                            error = %e,
                            "failed to delete remote directory subtree"
                        );
                    }
                } else {
                    let key = to_remote_key(&event.path, &self.cfg.prefix, &self.cfg.destination);
                    match self.store.delete_object(&self.cfg.bucket, &key).await {
                        Ok(()) => debug!(%key, "deleted remote object"),
                        Err(e) => warn!(%key, error = %e, "failed to delete remote object"),
                    }
                }
            }

            WatchOp::Create | WatchOp::Write => {
                match tokio::fs::metadata(&event.path).await {
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        // CREATE/WRITE for a path that does not exist:
                        // stale events under an old name after a
                        // directory rename. Rebuild the watcher from the
                        // current tree.
                        info!(
                            path = %event.path.display(),
                            "event for missing path, resetting watcher"
                        );
                        let _ = stop_tx.send(()).await;
                        let _ = start_tx.send(()).await;
                    }
                    Err(e) => {
                        warn!(path = %event.path.display(), error = %e, "unable to stat event path");
                    }
                    Ok(md) if md.is_dir() => {
                        if event.op == WatchOp::Create {
                            debug!(path = %event.path.display(), "new directory, watching");
                            self.register_tree(registry, &event.path, crawl_tx).await;
                        }
                    }
                    Ok(_) => {
                        self.upload_to_remote(&event.path).await;
                    }
                }
            }

            WatchOp::Chmod => {}
        }
    }

    /// Registers every directory beneath (and including) `root` and
    /// enqueues each newly watched one for a catch-up crawl.
    async fn register_tree(
        &self,
        registry: &mut WatchRegistry,
        root: &Path,
        crawl_tx: &mpsc::Sender<PathBuf>,
    ) {
        let tree = collect_tree(root).await;
        for dir in &tree.dirs {
            self.register_dir(registry, dir, crawl_tx);
        }
    }

    /// Registers one directory if it is not watched yet.
    fn register_dir(&self, registry: &mut WatchRegistry, dir: &Path, crawl_tx: &mpsc::Sender<PathBuf>) {
        if registry.is_being_watched(dir) {
            return;
        }
        if let Err(e) = registry.watch_dir(dir) {
            warn!(path = %dir.display(), error = %e, "cannot watch directory");
            return;
        }
        // The walk that found this directory uploads its files, so a
        // dropped enqueue on overflow loses no coverage.
        match crawl_tx.try_send(dir.to_path_buf()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                debug!(path = %dir.display(), "crawl queue full, skipping enqueue");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Crawls a directory: registers unseen subdirectories and uploads
    /// every file found, closing the race between directory creation and
    /// watch attachment.
    async fn crawl_dir(
        &self,
        registry: &mut WatchRegistry,
        dir: &Path,
        crawl_tx: &mpsc::Sender<PathBuf>,
    ) {
        debug!(path = %dir.display(), "crawling directory for files the watcher may have missed");
        let tree = collect_tree(dir).await;

        for sub in &tree.dirs {
            self.register_dir(registry, sub, crawl_tx);
        }
        for file in &tree.files {
            self.upload_to_remote(file).await;
        }
    }

    /// Uploads one file, subject to the loop-avoidance guards.
    ///
    /// Skipped when the file is empty, and when its size equals the
    /// remote object's size for the same key.
    pub async fn upload_to_remote(&self, path: &Path) {
        // Catch-up crawls reach files without going through the event
        // rules, so the exclusion list applies here as well.
        if is_excluded(path) {
            return;
        }

        let key = to_remote_key(path, &self.cfg.prefix, &self.cfg.destination);

        let size = match tokio::fs::metadata(path).await {
            Ok(md) => md.len(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot stat file for upload");
                return;
            }
        };

        if size == 0 {
            debug!(path = %path.display(), "empty file, skipping upload");
            return;
        }

        if let Some(remote_size) = self.remote_object_size(&key).await {
            if remote_size == size as i64 {
                debug!(path = %path.display(), %key, "size unchanged since last sync, skipping upload");
                return;
            }
        }

        let kms_key_id = self.cfg.kms_key_id.trim();
        let options = UploadOptions {
            kms_key_id: (!kms_key_id.is_empty()).then(|| kms_key_id.to_string()),
        };

        match self
            .store
            .upload_object(&self.cfg.bucket, &key, path, &options)
            .await
        {
            Ok(()) => debug!(path = %path.display(), %key, "uploaded"),
            Err(e) => warn!(path = %path.display(), %key, error = %e, "upload failed"),
        }
    }

    /// Size of the remote object at `key`, or `None` when it does not
    /// exist. Listing failures back off and retry.
    async fn remote_object_size(&self, key: &str) -> Option<i64> {
        loop {
            match self.store.list_objects(&self.cfg.bucket, key, None).await {
                Ok(page) => {
                    return page.objects.into_iter().find(|o| o.key == key).map(|o| o.size);
                }
                Err(e) => {
                    warn!(%key, error = %e, "failed to probe remote object size, retrying");
                    tokio::time::sleep(self.settings.size_probe_backoff).await;
                }
            }
        }
    }

    /// Deletes every remote object under the mapped prefix of a local
    /// directory, then the prefix-marker key itself.
    pub async fn delete_remote_subtree(&self, dir: &Path) -> Result<()> {
        let dir_key = format!(
            "{}/",
            to_remote_key(dir, &self.cfg.prefix, &self.cfg.destination)
        );
        debug!(prefix = %dir_key, "deleting remote subtree");

        let mut continuation: Option<String> = None;
        loop {
            let page = match self
                .store
                .list_objects(&self.cfg.bucket, &dir_key, continuation.clone())
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    warn!(prefix = %dir_key, error = %e, "failed to list subtree, retrying");
                    tokio::time::sleep(self.settings.list_retry_backoff).await;
                    continue;
                }
            };

            let keys: Vec<String> = page.objects.iter().map(|o| o.key.clone()).collect();
            if !keys.is_empty() {
                let outcome = match self.store.delete_objects(&self.cfg.bucket, keys).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!(prefix = %dir_key, error = %e, "batch delete failed, retrying");
                        tokio::time::sleep(self.settings.list_retry_backoff).await;
                        continue;
                    }
                };

                if !outcome.errors.is_empty() {
                    if outcome.deleted.is_empty() {
                        // The whole batch failed; back off and retry the page.
                        warn!(
                            prefix = %dir_key,
                            errors = outcome.errors.len(),
                            "batch delete rejected every key, retrying"
                        );
                        tokio::time::sleep(self.settings.list_retry_backoff).await;
                        continue;
                    }
                    for err in &outcome.errors {
                        warn!(key = %err.key, message = %err.message, "failed to delete remote object");
                    }
                }
            }

            continuation = page.next_token;
            if !page.truncated {
                break;
            }
        }

        // The directory may also exist as a marker object without the
        // trailing slash.
        let marker = dir_key.trim_end_matches('/');
        self.store.delete_object(&self.cfg.bucket, marker).await?;

        Ok(())
    }
}

/// Sleeps until `deadline`, or forever when unbounded.
async fn maybe_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

/// Paths that never propagate to the remote: recycle-bin contents and
/// editor scratch files.
fn is_excluded(path: &Path) -> bool {
    if path
        .components()
        .any(|c| c.as_os_str() == "$RECYCLE.BIN")
    {
        return true;
    }
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("swp") | Some("tmp")
    )
}
