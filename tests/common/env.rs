//! Test environment lifecycle
//!
//! Wires the real store, repository, queue and ingestion manager the way the
//! binary does, with fake media tools. Temp files go away on drop.

use super::constants::*;
use super::fakes::{FakeProber, FakeTranscoder, TranscoderMode};
use signsphere_asset_server::assets::{
    Asset, AssetError, AssetLocks, AssetRepository, AssetStore, SqliteAssetStore,
};
use signsphere_asset_server::ingestion::{
    FileHandler, IngestOptions, IngestReceipt, IngestRequest, IngestionManager, StorageLayout,
    TranscodeQueue, TranscodeWorker,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use walkdir::WalkDir;

pub struct TestEnvOptions {
    pub pool_size: usize,
    pub mode: TranscoderMode,
    pub probe_duration: Option<f64>,
    pub transcode_delay: Duration,
    pub gate: Option<Arc<Semaphore>>,
    pub max_upload_bytes: u64,
}

impl Default for TestEnvOptions {
    fn default() -> Self {
        Self {
            pool_size: 2,
            mode: TranscoderMode::Normalize,
            probe_duration: Some(DEFAULT_DURATION),
            transcode_delay: Duration::ZERO,
            gate: None,
            max_upload_bytes: MAX_UPLOAD_BYTES,
        }
    }
}

#[allow(dead_code)]
pub struct TestEnv {
    pub store: Arc<SqliteAssetStore>,
    pub locks: Arc<AssetLocks>,
    pub repository: AssetRepository,
    pub manager: IngestionManager,
    pub queue: Arc<TranscodeQueue>,
    pub transcoder: Arc<FakeTranscoder>,
    pub media_path: PathBuf,
    pub db_path: PathBuf,

    // Keep the directory alive until drop
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestEnv {
    /// Must be called from within a tokio runtime.
    pub fn spawn() -> Self {
        Self::with_options(TestEnvOptions::default())
    }

    pub fn with_options(options: TestEnvOptions) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("assets.db");
        let media_path = temp_dir.path().join("media");
        std::fs::create_dir_all(&media_path).expect("Failed to create media dir");

        let store = Arc::new(SqliteAssetStore::open(&db_path).expect("Failed to open store"));
        let locks = Arc::new(AssetLocks::new());
        let transcoder = Arc::new(FakeTranscoder::new(
            options.mode,
            options.transcode_delay,
            options.gate,
        ));
        let worker = Arc::new(TranscodeWorker::new(
            store.clone(),
            locks.clone(),
            transcoder.clone(),
            Arc::new(FakeProber {
                duration_seconds: options.probe_duration,
            }),
        ));
        let queue = Arc::new(TranscodeQueue::start(worker, options.pool_size));
        let manager = IngestionManager::new(
            store.clone(),
            locks.clone(),
            StorageLayout::new(&media_path),
            FileHandler::new(options.max_upload_bytes),
            queue.clone(),
        );
        let repository = AssetRepository::new(store.clone(), locks.clone());

        Self {
            store,
            locks,
            repository,
            manager,
            queue,
            transcoder,
            media_path,
            db_path,
            _temp_dir: temp_dir,
        }
    }

    pub async fn ingest(
        &self,
        filename: &str,
        variant: &str,
        data: &[u8],
    ) -> Result<IngestReceipt, AssetError> {
        self.ingest_request(
            IngestRequest {
                data: data.to_vec(),
                filename: filename.to_string(),
                variant: variant.to_string(),
                ..Default::default()
            },
            IngestOptions::default(),
        )
        .await
    }

    pub async fn ingest_request(
        &self,
        request: IngestRequest,
        options: IngestOptions,
    ) -> Result<IngestReceipt, AssetError> {
        self.manager.ingest(request, options).await
    }

    /// Ingest and wait until the clip is transcoded.
    pub async fn ingest_active(&self, filename: &str, variant: &str, data: &[u8]) -> Asset {
        let receipt = self
            .ingest(filename, variant, data)
            .await
            .expect("ingest failed");
        self.wait_for(receipt.asset_id).await
    }

    /// Poll until the asset leaves the provisional state.
    pub async fn wait_for(&self, asset_id: i64) -> Asset {
        for _ in 0..200 {
            let asset = self.asset(asset_id);
            if !asset.is_provisional() {
                return asset;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("asset {} is still provisional", asset_id);
    }

    /// Finish every queued transcode. The queue is closed afterwards.
    pub async fn settle(&self) {
        self.queue.drain().await;
    }

    pub fn asset(&self, asset_id: i64) -> Asset {
        self.store
            .get_asset(asset_id)
            .expect("store failure")
            .expect("asset not found")
    }

    pub fn media_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkDir::new(&self.media_path)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();
        files.sort();
        files
    }
}
