//! s3-synchronizer - Bidirectional S3 ⇄ filesystem synchronization
//!
//! For every configured mount the synchronizer downloads the remote prefix
//! into `<destination>/<mount id>` (once, or on an interval), and for
//! writeable mounts watches the directory and propagates local changes
//! back to S3.
//!
//! Long flag names keep the legacy camelCase spelling so existing
//! invocations keep working unchanged.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use s3sync_core::config::{SyncSettings, TransferSettings};
use s3sync_engine::orchestrator::run_mounts;
use s3sync_engine::persistence::JsonFileStore;
use s3sync_engine::state::{SyncState, STATE_FILE_NAME};
use s3sync_store::S3StoreBuilder;

#[derive(Debug, Parser)]
#[command(
    name = "s3-synchronizer",
    version,
    about = "Keep local directories in sync with S3 prefixes"
)]
struct Cli {
    /// JSON array describing the mounts, e.g.
    /// [{"id":"some-id","bucket":"some-bucket","prefix":"some/prefix","writeable":false,"kmsArn":"some-kms-key-arn"}]
    #[arg(long = "defaultS3Mounts", default_value = "")]
    default_s3_mounts: String,

    /// AWS region for the initial session
    #[arg(long, default_value = "us-east-1")]
    region: String,

    /// AWS credentials profile; empty resolves via environment variables,
    /// the default profile, then EC2 instance metadata
    #[arg(long, default_value = "")]
    profile: String,

    /// Base directory to sync into; each mount gets a subdirectory
    #[arg(long, default_value = "./")]
    destination: PathBuf,

    /// Number of multipart transfer parts moved concurrently
    #[arg(long, default_value_t = 20)]
    concurrency: usize,

    /// Periodically re-download changes from S3
    #[arg(long = "recurringDownloads")]
    recurring_downloads: bool,

    /// Stop recurring downloads after this many seconds; zero or negative
    /// means continue indefinitely
    #[arg(
        long = "stopRecurringDownloadsAfter",
        default_value_t = -1,
        allow_hyphen_values = true
    )]
    stop_recurring_downloads_after: i64,

    /// Seconds between download cycles when recurringDownloads is set
    #[arg(long = "downloadInterval", default_value_t = 60)]
    download_interval: i64,

    /// Print debug information
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    if cli.download_interval <= 0 {
        bail!(
            "incorrect downloadInterval {} specified; the downloadInterval must be a positive integer",
            cli.download_interval
        );
    }

    info!(
        region = %cli.region,
        destination = %cli.destination.display(),
        concurrency = cli.concurrency,
        recurring_downloads = cli.recurring_downloads,
        stop_recurring_downloads_after = cli.stop_recurring_downloads_after,
        download_interval = cli.download_interval,
        "starting s3-synchronizer"
    );

    let settings = SyncSettings {
        region: cli.region,
        destination_base: cli.destination,
        recurring_downloads: cli.recurring_downloads,
        download_interval: Duration::from_secs(cli.download_interval as u64),
        stop_downloads_after: (cli.stop_recurring_downloads_after > 0)
            .then(|| Duration::from_secs(cli.stop_recurring_downloads_after as u64)),
        ..SyncSettings::default()
    };

    let transfer = TransferSettings {
        concurrency: cli.concurrency,
        ..TransferSettings::default()
    };

    let store_file = JsonFileStore::in_home_dir(STATE_FILE_NAME)
        .context("cannot resolve the sync-state file location")?;
    let state = Arc::new(SyncState::load(store_file).await);

    let builder = Arc::new(S3StoreBuilder::new(cli.profile, transfer));

    run_mounts(&cli.default_s3_mounts, builder, state, settings).await
}
