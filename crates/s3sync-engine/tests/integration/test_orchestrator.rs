//! Mount orchestration tests

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use s3sync_engine::orchestrator::run_mounts;

use crate::common::*;

fn mounts_json(id: &str, writeable: bool) -> String {
    format!(
        r#"[{{"id":"{id}","bucket":"{TEST_BUCKET}","prefix":"{TEST_PREFIX}","writeable":{writeable}}}]"#
    )
}

#[tokio::test]
async fn test_invalid_mount_json_is_fatal() {
    let dir = TempDir::new().unwrap();
    let store = InMemoryObjectStore::new();
    let builder = Arc::new(InMemoryStoreBuilder::new(store));
    let state = Arc::new(fresh_state(dir.path()).await);

    let result = run_mounts("some invalid json", builder, state, fast_settings()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_empty_mounts_complete_cleanly() {
    let dir = TempDir::new().unwrap();
    let store = InMemoryObjectStore::new();
    let builder = Arc::new(InMemoryStoreBuilder::new(store));
    let state = Arc::new(fresh_state(dir.path()).await);

    run_mounts("", builder.clone(), state, fast_settings())
        .await
        .unwrap();
    assert!(builder.builds().is_empty());
}

#[tokio::test]
async fn test_single_mount_initial_download() {
    let dir = TempDir::new().unwrap();
    let store = InMemoryObjectStore::new();
    seed_test_objects(&store, 5);
    let builder = Arc::new(InMemoryStoreBuilder::new(store));
    let state = Arc::new(fresh_state(dir.path()).await);

    let settings = s3sync_core::config::SyncSettings {
        destination_base: dir.path().to_path_buf(),
        ..fast_settings()
    };

    run_mounts(&mounts_json("m", false), builder, state, settings)
        .await
        .unwrap();

    for i in 0..5 {
        let path = dir.path().join("m").join(format!("test{i}.txt"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), test_content(i));
    }
}

#[tokio::test]
async fn test_duplicate_mounts_are_processed_once() {
    let dir = TempDir::new().unwrap();
    let store = InMemoryObjectStore::new();
    seed_test_objects(&store, 1);
    let builder = Arc::new(InMemoryStoreBuilder::new(store));
    let state = Arc::new(fresh_state(dir.path()).await);

    let settings = s3sync_core::config::SyncSettings {
        destination_base: dir.path().to_path_buf(),
        ..fast_settings()
    };

    let json = format!(
        r#"[{{"id":"m","bucket":"{TEST_BUCKET}","prefix":"{TEST_PREFIX}"}},
            {{"id":"m","bucket":"{TEST_BUCKET}","prefix":"{TEST_PREFIX}"}}]"#
    );
    run_mounts(&json, builder.clone(), state, settings)
        .await
        .unwrap();

    assert_eq!(builder.builds().len(), 1, "duplicate mount must be skipped");
}

#[tokio::test]
async fn test_multiple_mounts_download_into_their_destinations() {
    let dir = TempDir::new().unwrap();
    let store = InMemoryObjectStore::new();
    seed_test_objects(&store, 2);
    let builder = Arc::new(InMemoryStoreBuilder::new(store));
    let state = Arc::new(fresh_state(dir.path()).await);

    let settings = s3sync_core::config::SyncSettings {
        destination_base: dir.path().to_path_buf(),
        ..fast_settings()
    };

    let json = format!(
        r#"[{{"id":"m1","bucket":"{TEST_BUCKET}","prefix":"{TEST_PREFIX}"}},
            {{"id":"m2","bucket":"{TEST_BUCKET}","prefix":"{TEST_PREFIX}"}}]"#
    );
    run_mounts(&json, builder, state, settings).await.unwrap();

    assert!(dir.path().join("m1/test0.txt").exists());
    assert!(dir.path().join("m2/test0.txt").exists());
}

#[tokio::test]
async fn test_role_arn_reaches_the_store_builder() {
    let dir = TempDir::new().unwrap();
    let store = InMemoryObjectStore::new();
    let builder = Arc::new(InMemoryStoreBuilder::new(store));
    let state = Arc::new(fresh_state(dir.path()).await);

    let settings = s3sync_core::config::SyncSettings {
        destination_base: dir.path().to_path_buf(),
        ..fast_settings()
    };

    let json = format!(
        r#"[{{"id":"m","bucket":"{TEST_BUCKET}","prefix":"{TEST_PREFIX}","roleArn":"arn:aws:iam::111122223333:role/study"}}]"#
    );
    run_mounts(&json, builder.clone(), state, settings)
        .await
        .unwrap();

    let builds = builder.builds();
    assert!(!builds.is_empty());
    assert_eq!(
        builds[0].1.as_deref(),
        Some("arn:aws:iam::111122223333:role/study")
    );
}

#[tokio::test]
async fn test_store_is_rebuilt_for_the_bucket_region() {
    let dir = TempDir::new().unwrap();
    let store = InMemoryObjectStore::new();
    store.set_region("eu-west-1");
    let builder = Arc::new(InMemoryStoreBuilder::new(store));
    let state = Arc::new(fresh_state(dir.path()).await);

    let settings = s3sync_core::config::SyncSettings {
        destination_base: dir.path().to_path_buf(),
        ..fast_settings()
    };

    run_mounts(&mounts_json("m", false), builder.clone(), state, settings)
        .await
        .unwrap();

    let regions: Vec<String> = builder.builds().into_iter().map(|(r, _)| r).collect();
    assert_eq!(regions, vec!["us-east-1".to_string(), "eu-west-1".to_string()]);
}

#[tokio::test]
async fn test_recurring_downloads_pick_up_remote_changes() {
    let dir = TempDir::new().unwrap();
    let store = InMemoryObjectStore::new();
    seed_test_objects(&store, 2);
    let builder = Arc::new(InMemoryStoreBuilder::new(store.clone()));
    let state = Arc::new(fresh_state(dir.path()).await);

    let settings = s3sync_core::config::SyncSettings {
        destination_base: dir.path().to_path_buf(),
        recurring_downloads: true,
        download_interval: Duration::from_millis(100),
        stop_downloads_after: Some(Duration::from_millis(800)),
        ..fast_settings()
    };

    let json = mounts_json("m", false);
    let handle = tokio::spawn(async move { run_mounts(&json, builder, state, settings).await });

    // Let the first cycle land, then change the remote.
    let local = dir.path().join("m/test1.txt");
    assert!(wait_until(Duration::from_secs(5), || local.exists()).await);
    store.seed_object(
        TEST_BUCKET,
        &format!("{TEST_PREFIX}/test1.txt"),
        updated_content(1).as_bytes(),
    );

    tokio::time::timeout(Duration::from_secs(30), handle)
        .await
        .expect("bounded recurring downloads must terminate")
        .unwrap()
        .unwrap();

    assert_eq!(
        std::fs::read_to_string(&local).unwrap(),
        updated_content(1)
    );
}

#[tokio::test]
async fn test_bidirectional_mount_round_trips_a_local_create() {
    let dir = TempDir::new().unwrap();
    let store = InMemoryObjectStore::new();
    seed_test_objects(&store, 1);
    let builder = Arc::new(InMemoryStoreBuilder::new(store.clone()));
    let state = Arc::new(fresh_state(dir.path()).await);

    let settings = s3sync_core::config::SyncSettings {
        destination_base: dir.path().to_path_buf(),
        recurring_downloads: true,
        download_interval: Duration::from_millis(150),
        stop_downloads_after: Some(Duration::from_secs(3)),
        stop_upload_watchers_after: Some(Duration::from_secs(3)),
        ..fast_settings()
    };

    let json = mounts_json("m", true);
    let handle = tokio::spawn(async move { run_mounts(&json, builder, state, settings).await });

    let destination = dir.path().join("m");
    assert!(wait_until(Duration::from_secs(5), || destination
        .join("test0.txt")
        .exists())
    .await);

    std::fs::write(destination.join("test-local3.txt"), test_content(3)).unwrap();

    let key = format!("{TEST_PREFIX}/test-local3.txt");
    let uploaded = wait_until(Duration::from_secs(10), || {
        store.object_bytes(TEST_BUCKET, &key).as_deref() == Some(test_content(3).as_bytes())
    })
    .await;
    assert!(uploaded, "local create never reached the store");

    tokio::time::timeout(Duration::from_secs(30), handle)
        .await
        .expect("bounded workers must terminate")
        .unwrap()
        .unwrap();

    // The file stayed put (it is locally owned) and the size guard kept
    // the downloader→uploader loop from echoing: exactly one upload.
    assert!(destination.join("test-local3.txt").exists());
    assert_eq!(store.put_count(), 1);
}
