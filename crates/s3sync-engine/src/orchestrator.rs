//! Mount orchestration
//!
//! Decodes the mount list, deduplicates it, and fans each unique mount out
//! to a consumer task through a bounded channel. The consumer builds a
//! store client per mount (pinned to the bucket's region, optionally under
//! an assumed role), runs or schedules downloads, and spawns the uploader
//! for writeable mounts. All spawned work registers with a
//! [`TaskTracker`]; [`run_mounts`] returns once every worker has finished,
//! which for unbounded recurring mounts means it runs for the process
//! lifetime.
//!
//! Only configuration errors abort orchestration; everything that goes
//! wrong for a single mount is logged and confined to that mount.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use s3sync_core::config::SyncSettings;
use s3sync_core::mounts::{decode_mounts, MountConfiguration};
use s3sync_core::ports::object_store::{IObjectStore, IStoreBuilder};

use crate::downloader::download_files;
use crate::scheduler::spawn_recurring_downloads;
use crate::state::SyncState;
use crate::uploader::spawn_upload_watcher;

/// Capacity of the mount configuration channel.
const MOUNTS_CHANNEL_CAPACITY: usize = 50;

/// Decodes `mounts_json` and drives sync workers for every unique mount.
///
/// Fails fast when the JSON is not a valid mount array; all other errors
/// stay local to their mount. Blocks until all scheduled work completes.
pub async fn run_mounts(
    mounts_json: &str,
    builder: Arc<dyn IStoreBuilder>,
    state: Arc<SyncState>,
    settings: SyncSettings,
) -> Result<()> {
    let mounts = decode_mounts(mounts_json)?;
    info!(mounts = mounts.len(), "mount configuration decoded");

    let tracker = TaskTracker::new();
    let (mounts_tx, mounts_rx) = mpsc::channel::<MountConfiguration>(MOUNTS_CHANNEL_CAPACITY);

    tracker.spawn(consume_mounts(
        mounts_rx,
        builder,
        state,
        settings.clone(),
        tracker.clone(),
    ));

    let mut seen: HashSet<String> = HashSet::new();
    for mount in &mounts {
        if !seen.insert(mount.identity()) {
            debug!(id = %mount.id, "duplicate mount, skipping");
            continue;
        }

        let cfg = MountConfiguration::derive(mount, &settings.destination_base);
        if mounts_tx.send(cfg).await.is_err() {
            break;
        }
    }

    // Closing the channel lets the consumer drain and exit, which in turn
    // lets wait() complete once every worker it spawned has finished.
    drop(mounts_tx);
    tracker.close();
    tracker.wait().await;

    Ok(())
}

/// Single consumer: pulls mount configurations and starts their workers.
async fn consume_mounts(
    mut mounts_rx: mpsc::Receiver<MountConfiguration>,
    builder: Arc<dyn IStoreBuilder>,
    state: Arc<SyncState>,
    settings: SyncSettings,
    tracker: TaskTracker,
) {
    while let Some(cfg) = mounts_rx.recv().await {
        debug!(
            bucket = %cfg.bucket,
            prefix = %cfg.prefix,
            destination = %cfg.destination.display(),
            writeable = cfg.writeable,
            "processing mount configuration"
        );

        let role_arn = cfg.role_arn.trim();
        let role = (!role_arn.is_empty()).then(|| role_arn.to_string());

        let store = match builder.build(&settings.region, role.as_deref()).await {
            Ok(store) => store,
            Err(e) => {
                error!(
                    bucket = %cfg.bucket,
                    error = %e,
                    "cannot build store client, skipping mount"
                );
                continue;
            }
        };

        let store = pin_to_bucket_region(&*builder, store, &cfg, role.as_deref(), &settings).await;

        if settings.recurring_downloads {
            spawn_recurring_downloads(
                &tracker,
                Arc::clone(&store),
                Arc::clone(&state),
                cfg.clone(),
                settings.clone(),
            );
        } else {
            download_files(store.as_ref(), &state, &cfg, &settings).await;
        }

        if cfg.writeable {
            spawn_upload_watcher(&tracker, store, cfg, settings.clone());
        }
    }
}

/// Rebuilds the store client pinned to the bucket's actual region.
/// Resolution failures keep the already-built client.
async fn pin_to_bucket_region(
    builder: &dyn IStoreBuilder,
    store: Arc<dyn IObjectStore>,
    cfg: &MountConfiguration,
    role: Option<&str>,
    settings: &SyncSettings,
) -> Arc<dyn IObjectStore> {
    match store.bucket_region(&cfg.bucket).await {
        Ok(region) if region != settings.region => {
            info!(bucket = %cfg.bucket, %region, "pinning store client to bucket region");
            match builder.build(&region, role).await {
                Ok(pinned) => pinned,
                Err(e) => {
                    warn!(
                        bucket = %cfg.bucket,
                        error = %e,
                        "cannot rebuild client for bucket region, keeping configured region"
                    );
                    store
                }
            }
        }
        Ok(_) => store,
        Err(e) => {
            warn!(
                bucket = %cfg.bucket,
                error = %e,
                "cannot resolve bucket region, keeping configured region"
            );
            store
        }
    }
}
