//! Runtime settings
//!
//! Typed settings structs with defaults matching the shipped binary.
//! Intervals and backoffs are [`Duration`]s so tests can shrink them
//! without touching the engine.

use std::path::PathBuf;
use std::time::Duration;

/// Settings that govern the per-mount sync loops.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Region used for the initial session before bucket pinning.
    pub region: String,
    /// Base directory; each mount syncs into `<base>/<mount id>`.
    pub destination_base: PathBuf,
    /// Whether downloads repeat on an interval or run once.
    pub recurring_downloads: bool,
    /// Pause between recurring download cycles.
    pub download_interval: Duration,
    /// Lifetime bound for recurring downloads, `None` = run forever.
    pub stop_downloads_after: Option<Duration>,
    /// Lifetime bound for upload watchers, `None` = run forever.
    pub stop_upload_watchers_after: Option<Duration>,
    /// Backoff before retrying a failed remote listing.
    pub list_retry_backoff: Duration,
    /// Backoff before retrying the upload size probe.
    pub size_probe_backoff: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            destination_base: PathBuf::from("./"),
            recurring_downloads: false,
            download_interval: Duration::from_secs(60),
            stop_downloads_after: None,
            stop_upload_watchers_after: None,
            list_retry_backoff: Duration::from_secs(10),
            size_probe_backoff: Duration::from_secs(5),
        }
    }
}

/// Multipart transfer tuning handed to the object-store adapter.
#[derive(Debug, Clone, Copy)]
pub struct TransferSettings {
    /// Size of each transfer part in bytes.
    pub part_size: u64,
    /// Number of parts transferred concurrently.
    pub concurrency: usize,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            part_size: 100 * 1024 * 1024,
            concurrency: 20,
        }
    }
}
