//! Directory watching
//!
//! Wraps the `notify` crate to monitor directories for changes, converting
//! raw OS events into [`WatchEvent`] values that the uploader consumes.
//!
//! Watches are per-directory and non-recursive: the OS reports events for
//! all files directly inside a watched directory, and recursive coverage
//! is achieved by the uploader registering every subdirectory it finds.
//!
//! ## Architecture
//!
//! ```text
//! inotify / kqueue
//!       │
//!       ▼
//!  DirectoryWatcher ──→ mpsc::channel ──→ upload watcher loop
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Capacity of the event and error channels.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Filesystem operation kinds the uploader reacts to.
///
/// This is the internal representation, decoupled from the `notify`
/// crate's raw event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOp {
    Create,
    Write,
    Remove,
    Rename,
    Chmod,
}

/// A filesystem change event for a single path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub op: WatchOp,
}

impl WatchEvent {
    fn new(path: PathBuf, op: WatchOp) -> Self {
        Self { path, op }
    }
}

/// The set of directories currently subscribed to the OS event source.
///
/// Kept separate from the channel halves so the watcher loop can register
/// directories while it multiplexes the receivers.
pub struct WatchRegistry {
    watcher: RecommendedWatcher,
    watched: HashSet<PathBuf>,
}

impl WatchRegistry {
    /// Subscribes `path` (a directory) to the event source. Idempotent:
    /// re-adding a watched path is a no-op.
    pub fn watch_dir(&mut self, path: &Path) -> Result<()> {
        if self.watched.contains(path) {
            debug!(path = %path.display(), "directory already watched");
            return Ok(());
        }

        self.watcher
            .watch(path, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch directory: {}", path.display()))?;
        self.watched.insert(path.to_path_buf());
        debug!(path = %path.display(), "watching directory");
        Ok(())
    }

    /// Unsubscribes `path`. A no-op when the path was never watched.
    ///
    /// The OS-level unwatch can fail when the directory was already
    /// removed; the set is updated regardless.
    pub fn unwatch_dir(&mut self, path: &Path) {
        if !self.watched.remove(path) {
            return;
        }
        if let Err(e) = self.watcher.unwatch(path) {
            debug!(path = %path.display(), error = %e, "unwatch after removal");
        }
        debug!(path = %path.display(), "stopped watching directory");
    }

    /// Whether `path` is currently subscribed.
    pub fn is_being_watched(&self, path: &Path) -> bool {
        self.watched.contains(path)
    }

    /// Number of subscribed directories.
    pub fn watched_count(&self) -> usize {
        self.watched.len()
    }
}

/// Watches directories for changes using the OS-native mechanism.
///
/// Events and errors arrive on the public receiver halves; directory
/// subscriptions go through [`WatchRegistry`]. Dropping the watcher tears
/// down all OS watches.
pub struct DirectoryWatcher {
    pub registry: WatchRegistry,
    pub events: mpsc::Receiver<WatchEvent>,
    pub errors: mpsc::Receiver<notify::Error>,
}

impl DirectoryWatcher {
    /// Creates a watcher with empty subscriptions.
    pub fn new() -> Result<Self> {
        let (event_tx, event_rx) = mpsc::channel::<WatchEvent>(EVENT_CHANNEL_CAPACITY);
        let (error_tx, error_rx) = mpsc::channel::<notify::Error>(EVENT_CHANNEL_CAPACITY);

        let watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    for mapped in map_notify_event(&event) {
                        if event_tx.blocking_send(mapped).is_err() {
                            warn!("watch event dropped (receiver closed)");
                        }
                    }
                }
                Err(err) => {
                    if error_tx.blocking_send(err).is_err() {
                        warn!("watch error dropped (receiver closed)");
                    }
                }
            },
            notify::Config::default(),
        )
        .context("failed to create filesystem watcher")?;

        Ok(Self {
            registry: WatchRegistry {
                watcher,
                watched: HashSet::new(),
            },
            events: event_rx,
            errors: error_rx,
        })
    }

    /// Stops watching. All OS watches are released.
    pub fn stop(self) {
        debug!(watched = self.registry.watched_count(), "watcher stopped");
    }
}

/// Converts a `notify::Event` into zero or more [`WatchEvent`]s.
///
/// Rename handling mirrors the OS semantics the uploader expects: the
/// old name surfaces as `Rename`, the new name as `Create`. Access
/// events are ignored.
fn map_notify_event(event: &notify::Event) -> Vec<WatchEvent> {
    let paths = &event.paths;
    let Some(first) = paths.first() else {
        return Vec::new();
    };

    match &event.kind {
        EventKind::Create(_) => vec![WatchEvent::new(first.clone(), WatchOp::Create)],

        EventKind::Remove(_) => vec![WatchEvent::new(first.clone(), WatchOp::Remove)],

        EventKind::Modify(ModifyKind::Data(_)) => {
            vec![WatchEvent::new(first.clone(), WatchOp::Write)]
        }

        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            vec![WatchEvent::new(first.clone(), WatchOp::Rename)]
        }

        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            vec![WatchEvent::new(first.clone(), WatchOp::Create)]
        }

        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() >= 2 => vec![
            WatchEvent::new(paths[0].clone(), WatchOp::Rename),
            WatchEvent::new(paths[1].clone(), WatchOp::Create),
        ],

        EventKind::Modify(ModifyKind::Name(_)) => {
            vec![WatchEvent::new(first.clone(), WatchOp::Rename)]
        }

        EventKind::Modify(ModifyKind::Metadata(_)) => {
            vec![WatchEvent::new(first.clone(), WatchOp::Chmod)]
        }

        EventKind::Modify(_) => vec![WatchEvent::new(first.clone(), WatchOp::Write)],

        _ => {
            debug!(kind = ?event.kind, "ignoring event kind");
            Vec::new()
        }
    }
}
