//! End-to-end tests for ingestion
//!
//! Upload validation, canonical placement, background transcoding and the
//! provisional/active/failed lifecycle.

mod common;

use common::{
    normalized_len, TestEnv, TestEnvOptions, TranscoderMode, CLIP_BYTES, DEFAULT_DURATION,
};
use signsphere_asset_server::assets::{
    AssetError, AssetFilters, AssetStore, Pagination, ProcessingState, SqliteAssetStore,
};
use signsphere_asset_server::ingestion::{IngestOptions, IngestRequest, IngestStatus};
use std::sync::atomic::Ordering;

// =============================================================================
// Happy path
// =============================================================================

#[tokio::test]
async fn test_ingest_places_file_and_activates_after_transcode() {
    let env = TestEnv::spawn();

    let receipt = env.ingest("hello.mp4", "male", CLIP_BYTES).await.unwrap();
    assert_eq!(receipt.status, IngestStatus::Processing);
    let expected_path = env
        .media_path
        .join("male-model")
        .join("hello")
        .join("hello.mp4");
    assert_eq!(receipt.storage_path, expected_path);

    env.settle().await;
    let asset = env.asset(receipt.asset_id);
    assert_eq!(asset.processing_state(), ProcessingState::Active);
    assert_eq!(asset.filename, "hello.mp4");
    assert_eq!(asset.display_name, "hello");
    assert_eq!(asset.mime_type, "video/mp4");
    assert_eq!(asset.file_extension, "mp4");
    assert_eq!(asset.duration_seconds, Some(DEFAULT_DURATION));
    assert_eq!(asset.width, Some(1280));
    assert_eq!(asset.height, Some(720));
    assert_eq!(asset.file_size_bytes, normalized_len(CLIP_BYTES));
    assert!(asset.processing_error.is_none());

    // Only the normalized file is left, in its own folder
    assert_eq!(env.media_files(), vec![expected_path.clone()]);
    let stored = std::fs::read(&expected_path).unwrap();
    assert!(stored.starts_with(CLIP_BYTES));
}

#[tokio::test]
async fn test_ingest_keeps_supplied_metadata() {
    let env = TestEnv::spawn();
    let receipt = env
        .ingest_request(
            IngestRequest {
                data: CLIP_BYTES.to_vec(),
                filename: "Thank You.MP4".to_string(),
                variant: "female".to_string(),
                display_name: Some("Thank you".to_string()),
                description: Some("Flat hand from chin, forward".to_string()),
                tags: Some("greeting,polite".to_string()),
                content_type: Some("phrase".to_string()),
            },
            IngestOptions::default(),
        )
        .await
        .unwrap();

    // Extension match is case-insensitive, the stored file always ends in .mp4
    assert_eq!(
        receipt.storage_path,
        env.media_path
            .join("female-model")
            .join("Thank You")
            .join("Thank You.mp4")
    );

    let asset = env.wait_for(receipt.asset_id).await;
    assert_eq!(asset.filename, "Thank You.MP4");
    assert_eq!(asset.display_name, "Thank you");
    assert_eq!(asset.tags.as_deref(), Some("greeting,polite"));
    assert_eq!(asset.content_type.as_deref(), Some("phrase"));
}

#[tokio::test]
async fn test_ingest_returns_before_transcode_finishes() {
    let gate = std::sync::Arc::new(tokio::sync::Semaphore::new(0));
    let env = TestEnv::with_options(TestEnvOptions {
        gate: Some(gate.clone()),
        ..Default::default()
    });

    let receipt = env.ingest("wait.mp4", "male", CLIP_BYTES).await.unwrap();
    env.transcoder.started.notified().await;

    let asset = env.asset(receipt.asset_id);
    assert_eq!(asset.processing_state(), ProcessingState::Provisional);
    assert_eq!(asset.file_size_bytes, CLIP_BYTES.len() as i64);

    // Provisional assets are already searchable
    let found = env
        .repository
        .search(&AssetFilters::default(), Pagination::default())
        .unwrap();
    assert_eq!(found.len(), 1);

    gate.add_permits(1);
    let asset = env.wait_for(receipt.asset_id).await;
    assert_eq!(asset.processing_state(), ProcessingState::Active);
}

// =============================================================================
// Validation
// =============================================================================

#[tokio::test]
async fn test_invalid_uploads_are_rejected_before_any_io() {
    let env = TestEnv::with_options(TestEnvOptions {
        max_upload_bytes: 16,
        ..Default::default()
    });

    let cases: Vec<(&str, &str, &[u8])> = vec![
        ("clip.avi", "male", b"small"),
        ("clip", "male", b"small"),
        (".mp4", "male", b"small"),
        ("clip.mp4", "unknown", b"small"),
        ("clip.mp4", "female", b""),
        ("clip.mp4", "female", b"this is more than sixteen bytes"),
    ];
    for (filename, variant, data) in cases {
        let err = env.ingest(filename, variant, data).await.unwrap_err();
        assert!(
            matches!(err, AssetError::Validation(_)),
            "{} / {} gave {:?}",
            filename,
            variant,
            err
        );
    }

    assert!(env.media_files().is_empty());
    assert!(std::fs::read_dir(&env.media_path).unwrap().next().is_none());
    assert!(env.store.list_all().unwrap().is_empty());
}

#[tokio::test]
async fn test_non_video_content_is_rejected() {
    let env = TestEnv::spawn();
    let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
    let err = env.ingest("sneaky.mp4", "male", &png).await.unwrap_err();
    assert!(matches!(err, AssetError::Validation(_)));
    assert!(env.media_files().is_empty());
}

// =============================================================================
// Storage failures
// =============================================================================

#[tokio::test]
async fn test_unwritable_asset_folder_is_a_storage_error() {
    let env = TestEnv::spawn();
    // A regular file where the asset folder should go
    let variant_dir = env.media_path.join("male-model");
    std::fs::create_dir_all(&variant_dir).unwrap();
    let blocker = variant_dir.join("hello");
    std::fs::write(&blocker, b"in the way").unwrap();

    let err = env.ingest("hello.mp4", "male", CLIP_BYTES).await.unwrap_err();
    assert!(matches!(err, AssetError::Storage { .. }), "{:?}", err);

    assert!(env.store.list_all().unwrap().is_empty());
    assert_eq!(env.media_files(), vec![blocker]);
    assert_eq!(env.queue.pending(), 0);
}

#[tokio::test]
async fn test_failed_raw_write_leaves_no_catalog_row() {
    let env = TestEnv::spawn();
    // The folder exists but the file path is taken by a directory
    let target = env
        .media_path
        .join("female-model")
        .join("bye")
        .join("bye.mp4");
    std::fs::create_dir_all(&target).unwrap();

    let err = env.ingest("bye.mp4", "female", CLIP_BYTES).await.unwrap_err();
    match err {
        AssetError::Storage { path, .. } => assert_eq!(path, target),
        other => panic!("expected a storage error, got {:?}", other),
    }

    assert!(env.store.list_all().unwrap().is_empty());
    assert!(env.media_files().is_empty());
    assert_eq!(env.transcoder.calls.load(Ordering::SeqCst), 0);

    // The same clip goes through once the path is free
    std::fs::remove_dir(&target).unwrap();
    let asset = env.ingest_active("bye.mp4", "female", CLIP_BYTES).await;
    assert_eq!(asset.processing_state(), ProcessingState::Active);
}

// =============================================================================
// Collisions
// =============================================================================

#[tokio::test]
async fn test_same_name_and_variant_conflicts() {
    let env = TestEnv::spawn();
    let first = env.ingest_active("hello.mp4", "male", CLIP_BYTES).await;
    let before = std::fs::read(&first.storage_path).unwrap();

    let err = env
        .ingest("hello.mp4", "male", b"a different clip")
        .await
        .unwrap_err();
    assert!(matches!(err, AssetError::Conflict(_)));

    // Nothing was overwritten and no second row exists
    assert_eq!(std::fs::read(&first.storage_path).unwrap(), before);
    assert_eq!(env.store.list_all().unwrap().len(), 1);

    // The other variant has its own namespace
    let other = env.ingest("hello.mp4", "female", CLIP_BYTES).await.unwrap();
    assert_ne!(other.storage_path.to_string_lossy(), first.storage_path);
}

#[tokio::test]
async fn test_reject_duplicates_option() {
    let env = TestEnv::spawn();
    let first = env.ingest_active("hello.mp4", "male", CLIP_BYTES).await;

    // Same size as the stored clip, different name
    let same_size = vec![b'x'; first.file_size_bytes as usize];
    let request = |filename: &str| IngestRequest {
        data: same_size.clone(),
        filename: filename.to_string(),
        variant: "male".to_string(),
        ..Default::default()
    };
    let reject = IngestOptions {
        reject_duplicates: true,
    };

    let err = env
        .ingest_request(request("greeting.mp4"), reject)
        .await
        .unwrap_err();
    assert!(matches!(err, AssetError::Conflict(_)));
    assert_eq!(env.store.list_all().unwrap().len(), 1);

    // Detection is advisory unless asked for
    env.ingest_request(request("greeting.mp4"), IngestOptions::default())
        .await
        .unwrap();

    // Nothing in the other variant to match
    env.ingest_request(
        IngestRequest {
            variant: "female".to_string(),
            ..request("hello.mp4")
        },
        reject,
    )
    .await
    .unwrap();
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_transcode_failure_deactivates_and_keeps_raw_file() {
    let env = TestEnv::with_options(TestEnvOptions {
        mode: TranscoderMode::Fail,
        ..Default::default()
    });

    let receipt = env.ingest("broken.mp4", "female", CLIP_BYTES).await.unwrap();
    env.settle().await;

    let asset = env.asset(receipt.asset_id);
    assert_eq!(asset.processing_state(), ProcessingState::Failed);
    assert!(!asset.is_active);
    assert!(asset.duration_seconds.is_none());
    assert!(asset
        .processing_error
        .as_deref()
        .unwrap()
        .contains("Invalid data found"));

    // The raw upload and the partial output are left for inspection
    assert_eq!(std::fs::read(&receipt.storage_path).unwrap(), CLIP_BYTES);
    assert_eq!(env.media_files().len(), 2);

    // Failed assets are hidden from the default search
    let found = env
        .repository
        .search(&AssetFilters::default(), Pagination::default())
        .unwrap();
    assert!(found.is_empty());
    let all = AssetFilters {
        is_active: None,
        ..Default::default()
    };
    assert_eq!(env.repository.count(&all).unwrap(), 1);
}

#[tokio::test]
async fn test_missing_duration_is_a_failure() {
    let env = TestEnv::with_options(TestEnvOptions {
        probe_duration: None,
        ..Default::default()
    });

    let receipt = env.ingest("still.mp4", "male", CLIP_BYTES).await.unwrap();
    env.settle().await;

    let asset = env.asset(receipt.asset_id);
    assert_eq!(asset.processing_state(), ProcessingState::Failed);
    assert_eq!(std::fs::read(&receipt.storage_path).unwrap(), CLIP_BYTES);
}

// =============================================================================
// Restart
// =============================================================================

#[tokio::test]
async fn test_catalog_survives_reopen_and_resume_finishes_pending() {
    let env = TestEnv::spawn();
    let done = env.ingest_active("done.mp4", "male", CLIP_BYTES).await;

    // Close the pool, then ingest: the task is lost like in a crash
    env.queue.shutdown().await;
    let pending = env.ingest("pending.mp4", "male", CLIP_BYTES).await.unwrap();
    assert!(env.asset(pending.asset_id).is_provisional());

    let reopened = SqliteAssetStore::open(&env.db_path).unwrap();
    assert_eq!(reopened.get_asset(done.id).unwrap().unwrap(), done);
    assert_eq!(reopened.list_provisional().unwrap().len(), 1);
    drop(reopened);

    let report = resume_on(&env).await;
    assert_eq!(report.requeued, vec![pending.asset_id]);
    assert!(report.failed.is_empty());
}

/// Build a live pool over `env`'s store and resume its provisional assets.
async fn resume_on(env: &TestEnv) -> signsphere_asset_server::ingestion::ResumeReport {
    use signsphere_asset_server::ingestion::{
        FileHandler, IngestionManager, StorageLayout, TranscodeQueue, TranscodeWorker,
    };
    use std::sync::Arc;

    let worker = Arc::new(TranscodeWorker::new(
        env.store.clone(),
        env.locks.clone(),
        env.transcoder.clone(),
        Arc::new(common::FakeProber {
            duration_seconds: Some(DEFAULT_DURATION),
        }),
    ));
    let queue = Arc::new(TranscodeQueue::start(worker, 1));
    let manager = IngestionManager::new(
        env.store.clone(),
        env.locks.clone(),
        StorageLayout::new(&env.media_path),
        FileHandler::new(1024),
        queue.clone(),
    );
    let calls_before = env.transcoder.calls.load(Ordering::SeqCst);
    let report = manager.resume_pending().await.unwrap();
    queue.drain().await;
    assert_eq!(
        env.transcoder.calls.load(Ordering::SeqCst),
        calls_before + report.requeued.len()
    );
    for id in &report.requeued {
        assert!(env.asset(*id).is_active);
        assert!(env.asset(*id).duration_seconds.is_some());
    }
    report
}
