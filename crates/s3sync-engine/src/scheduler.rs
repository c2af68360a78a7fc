//! Recurring download scheduling
//!
//! For each mount in recurring mode two cooperative tasks run on the
//! shared tracker: a *producer* that executes download cycles and pushes
//! their stats onto a bounded channel, and a *reporter* that drains the
//! channel and logs summaries. The producer sleeps `download_interval`
//! between cycles and terminates once the configured lifetime (if any)
//! has elapsed; the reporter terminates when the stats channel closes.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::debug;

use s3sync_core::config::SyncSettings;
use s3sync_core::mounts::MountConfiguration;
use s3sync_core::ports::object_store::IObjectStore;

use crate::downloader::{sync_remote_to_local, DownloadStats};
use crate::state::SyncState;

/// Capacity of the per-mount stats channel.
const STATS_CHANNEL_CAPACITY: usize = 50;

/// Spawns the recurring producer/reporter pair for one mount.
///
/// Both tasks register with `tracker` so the orchestrator's wait covers
/// them. With no lifetime bound the producer runs until the process ends.
pub fn spawn_recurring_downloads(
    tracker: &TaskTracker,
    store: Arc<dyn IObjectStore>,
    state: Arc<SyncState>,
    cfg: MountConfiguration,
    settings: SyncSettings,
) {
    let (stats_tx, mut stats_rx) = mpsc::channel::<DownloadStats>(STATS_CHANNEL_CAPACITY);
    let reporter_cfg = cfg.clone();

    tracker.spawn(async move {
        let started = Instant::now();

        loop {
            let stats = sync_remote_to_local(store.as_ref(), &state, &cfg, &settings).await;

            if stats_tx.send(stats).await.is_err() {
                break;
            }

            if let Some(stop_after) = settings.stop_downloads_after {
                if started.elapsed() > stop_after {
                    debug!(
                        destination = %cfg.destination.display(),
                        "recurring downloads reached configured lifetime"
                    );
                    break;
                }
            }

            tokio::time::sleep(settings.download_interval).await;
        }
    });

    tracker.spawn(async move {
        while let Some(stats) = stats_rx.recv().await {
            stats.log_summary(&reporter_cfg);
        }
    });
}
