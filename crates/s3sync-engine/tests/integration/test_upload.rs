//! Local→remote upload tests
//!
//! Guard behavior is driven directly through [`UploadWorker`]; the
//! watcher-loop scenarios run end to end against the real filesystem
//! event source with polling assertions.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::task::TaskTracker;

use s3sync_engine::downloader::sync_remote_to_local;
use s3sync_engine::uploader::{spawn_upload_watcher, UploadWorker};

use crate::common::*;

const E2E_DEADLINE: Duration = Duration::from_secs(15);

#[tokio::test]
async fn test_upload_sends_file_content() {
    let dir = TempDir::new().unwrap();
    let store = InMemoryObjectStore::new();
    let cfg = mount_cfg(&dir.path().join("m"), true);
    std::fs::create_dir_all(&cfg.destination).unwrap();

    let path = cfg.destination.join("test-local3.txt");
    std::fs::write(&path, test_content(3)).unwrap();

    let worker = UploadWorker::new(Arc::new(store.clone()), cfg, fast_settings());
    worker.upload_to_remote(&path).await;

    assert_eq!(store.put_count(), 1);
    let key = format!("{TEST_PREFIX}/test-local3.txt");
    assert_eq!(
        store.object_bytes(TEST_BUCKET, &key).unwrap(),
        test_content(3).into_bytes()
    );
}

#[tokio::test]
async fn test_empty_file_is_not_uploaded() {
    let dir = TempDir::new().unwrap();
    let store = InMemoryObjectStore::new();
    let cfg = mount_cfg(&dir.path().join("m"), true);
    std::fs::create_dir_all(&cfg.destination).unwrap();

    let path = cfg.destination.join("empty.txt");
    std::fs::write(&path, b"").unwrap();

    let worker = UploadWorker::new(Arc::new(store.clone()), cfg, fast_settings());
    worker.upload_to_remote(&path).await;

    assert_eq!(store.put_count(), 0);
    assert!(store.object_keys(TEST_BUCKET).is_empty());
}

#[tokio::test]
async fn test_equal_size_skips_upload() {
    let dir = TempDir::new().unwrap();
    let store = InMemoryObjectStore::new();
    let cfg = mount_cfg(&dir.path().join("m"), true);
    std::fs::create_dir_all(&cfg.destination).unwrap();

    let key = format!("{TEST_PREFIX}/same.txt");
    store.seed_object(TEST_BUCKET, &key, b"eight ch");

    let path = cfg.destination.join("same.txt");
    std::fs::write(&path, b"EIGHT CH").unwrap();

    let worker = UploadWorker::new(Arc::new(store.clone()), cfg, fast_settings());
    worker.upload_to_remote(&path).await;

    assert_eq!(store.put_count(), 0, "size-equal files must not re-upload");
}

#[tokio::test]
async fn test_downloaded_file_does_not_bounce_back() {
    let dir = TempDir::new().unwrap();
    let store = InMemoryObjectStore::new();
    seed_test_objects(&store, 1);

    let cfg = mount_cfg(&dir.path().join("m"), true);
    let state = fresh_state(dir.path()).await;
    let settings = fast_settings();

    sync_remote_to_local(&store, &state, &cfg, &settings).await;
    let downloaded = cfg.destination.join("test0.txt");
    assert!(downloaded.exists());

    // The CREATE event the download fires would land here; the size guard
    // must produce zero uploads.
    let worker = UploadWorker::new(Arc::new(store.clone()), cfg, settings);
    worker.upload_to_remote(&downloaded).await;

    assert_eq!(store.put_count(), 0);
}

#[tokio::test]
async fn test_kms_key_is_forwarded() {
    let dir = TempDir::new().unwrap();
    let store = InMemoryObjectStore::new();
    let mut cfg = mount_cfg(&dir.path().join("m"), true);
    cfg.kms_key_id = "arn:aws:kms:us-east-1:111122223333:key/test".to_string();
    std::fs::create_dir_all(&cfg.destination).unwrap();

    let path = cfg.destination.join("secret.txt");
    std::fs::write(&path, b"cipher me").unwrap();

    let worker = UploadWorker::new(Arc::new(store.clone()), cfg, fast_settings());
    worker.upload_to_remote(&path).await;

    assert_eq!(
        store.last_kms_key().as_deref(),
        Some("arn:aws:kms:us-east-1:111122223333:key/test")
    );
}

#[tokio::test]
async fn test_delete_remote_subtree_removes_prefix_and_marker() {
    let dir = TempDir::new().unwrap();
    let store = InMemoryObjectStore::new();
    let cfg = mount_cfg(&dir.path().join("m"), true);

    store.seed_object(TEST_BUCKET, &format!("{TEST_PREFIX}/gone/a.txt"), b"a");
    store.seed_object(TEST_BUCKET, &format!("{TEST_PREFIX}/gone/sub/b.txt"), b"b");
    store.seed_object(TEST_BUCKET, &format!("{TEST_PREFIX}/gone"), b"");
    store.seed_object(TEST_BUCKET, &format!("{TEST_PREFIX}/kept.txt"), b"kept");

    let local_dir = cfg.destination.join("gone");
    let worker = UploadWorker::new(Arc::new(store.clone()), cfg, fast_settings());
    worker.delete_remote_subtree(&local_dir).await.unwrap();

    assert_eq!(
        store.object_keys(TEST_BUCKET),
        vec![format!("{TEST_PREFIX}/kept.txt")]
    );
}

// ----------------------------------------------------------------------
// End-to-end watcher scenarios
// ----------------------------------------------------------------------

#[tokio::test]
async fn test_watcher_uploads_created_file() {
    let dir = TempDir::new().unwrap();
    let store = InMemoryObjectStore::new();
    let cfg = mount_cfg(&dir.path().join("m"), true);
    std::fs::create_dir_all(&cfg.destination).unwrap();

    let tracker = TaskTracker::new();
    spawn_upload_watcher(
        &tracker,
        Arc::new(store.clone()),
        cfg.clone(),
        fast_settings(),
    );

    // Give the watcher loop a moment to register the tree.
    tokio::time::sleep(Duration::from_millis(300)).await;

    std::fs::write(cfg.destination.join("test-local3.txt"), test_content(3)).unwrap();

    let key = format!("{TEST_PREFIX}/test-local3.txt");
    let uploaded = wait_until(E2E_DEADLINE, || {
        store.object_bytes(TEST_BUCKET, &key).as_deref() == Some(test_content(3).as_bytes())
    })
    .await;
    assert!(uploaded, "created file never arrived in the store");
}

#[tokio::test]
async fn test_watcher_catch_up_crawl_uploads_preexisting_files() {
    let dir = TempDir::new().unwrap();
    let store = InMemoryObjectStore::new();
    let cfg = mount_cfg(&dir.path().join("m"), true);

    // Files exist before the watcher starts; only the catch-up crawl can
    // find them.
    std::fs::create_dir_all(cfg.destination.join("pre/existing")).unwrap();
    std::fs::write(cfg.destination.join("pre/existing/old.txt"), b"was here").unwrap();

    let tracker = TaskTracker::new();
    spawn_upload_watcher(
        &tracker,
        Arc::new(store.clone()),
        cfg.clone(),
        fast_settings(),
    );

    let key = format!("{TEST_PREFIX}/pre/existing/old.txt");
    let uploaded = wait_until(E2E_DEADLINE, || {
        store.object_bytes(TEST_BUCKET, &key).as_deref() == Some(b"was here".as_slice())
    })
    .await;
    assert!(uploaded, "pre-existing file never arrived in the store");
}

#[tokio::test]
async fn test_watcher_directory_rename_moves_remote_subtree() {
    let dir = TempDir::new().unwrap();
    let store = InMemoryObjectStore::new();
    let cfg = mount_cfg(&dir.path().join("m"), true);

    let nested = cfg.destination.join("nested-l1/nested-l2/nested-l3");
    std::fs::create_dir_all(&nested).unwrap();
    std::fs::write(nested.join("deep.txt"), test_content(9)).unwrap();

    let tracker = TaskTracker::new();
    spawn_upload_watcher(
        &tracker,
        Arc::new(store.clone()),
        cfg.clone(),
        fast_settings(),
    );

    let old_key = format!("{TEST_PREFIX}/nested-l1/nested-l2/nested-l3/deep.txt");
    let uploaded = wait_until(E2E_DEADLINE, || {
        store.object_bytes(TEST_BUCKET, &old_key).is_some()
    })
    .await;
    assert!(uploaded, "initial crawl never uploaded the nested file");

    std::fs::rename(
        &nested,
        cfg.destination.join("nested-l1/nested-l2/nested-l3-renamed"),
    )
    .unwrap();

    let new_key = format!("{TEST_PREFIX}/nested-l1/nested-l2/nested-l3-renamed/deep.txt");
    let moved = wait_until(E2E_DEADLINE, || {
        store.object_bytes(TEST_BUCKET, &old_key).is_none()
            && store.object_bytes(TEST_BUCKET, &new_key).as_deref()
                == Some(test_content(9).as_bytes())
    })
    .await;
    assert!(moved, "rename did not move the remote subtree");
}

#[tokio::test]
async fn test_watcher_move_out_of_mount_deletes_remote_object() {
    let dir = TempDir::new().unwrap();
    let outside = TempDir::new().unwrap();
    let store = InMemoryObjectStore::new();
    let cfg = mount_cfg(&dir.path().join("m"), true);

    std::fs::create_dir_all(&cfg.destination).unwrap();
    std::fs::write(cfg.destination.join("test-local3.txt"), test_content(3)).unwrap();

    let tracker = TaskTracker::new();
    spawn_upload_watcher(
        &tracker,
        Arc::new(store.clone()),
        cfg.clone(),
        fast_settings(),
    );

    let key = format!("{TEST_PREFIX}/test-local3.txt");
    let uploaded = wait_until(E2E_DEADLINE, || {
        store.object_bytes(TEST_BUCKET, &key).is_some()
    })
    .await;
    assert!(uploaded, "initial crawl never uploaded the file");

    std::fs::rename(
        cfg.destination.join("test-local3.txt"),
        outside.path().join("test-local3.txt"),
    )
    .unwrap();

    let deleted = wait_until(E2E_DEADLINE, || {
        store.object_bytes(TEST_BUCKET, &key).is_none()
    })
    .await;
    assert!(deleted, "move out of the mount did not delete the remote object");
}

#[tokio::test]
async fn test_watcher_scratch_files_are_ignored() {
    let dir = TempDir::new().unwrap();
    let store = InMemoryObjectStore::new();
    let cfg = mount_cfg(&dir.path().join("m"), true);
    std::fs::create_dir_all(&cfg.destination).unwrap();

    let tracker = TaskTracker::new();
    spawn_upload_watcher(
        &tracker,
        Arc::new(store.clone()),
        cfg.clone(),
        fast_settings(),
    );
    tokio::time::sleep(Duration::from_millis(300)).await;

    std::fs::write(cfg.destination.join("buffer.swp"), b"scratch").unwrap();
    std::fs::write(cfg.destination.join("real.txt"), b"payload").unwrap();

    let real_key = format!("{TEST_PREFIX}/real.txt");
    let uploaded = wait_until(E2E_DEADLINE, || {
        store.object_bytes(TEST_BUCKET, &real_key).is_some()
    })
    .await;
    assert!(uploaded);

    let keys = store.object_keys(TEST_BUCKET);
    assert!(
        !keys.iter().any(|k| k.ends_with(".swp")),
        "scratch file must not propagate: {keys:?}"
    );
}
