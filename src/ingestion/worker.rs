//! Normalizes one provisional asset and reconciles its catalog row.
//!
//! Per asset: provisional -> normalizing -> {active, failed}. A failure
//! deactivates the asset, records the cause and leaves partial artifacts in
//! place. Nothing is retried here.

use super::converter::{MediaProber, TranscodeError, Transcoder};
use super::layout::StorageLayout;
use crate::assets::{Asset, AssetError, AssetId, AssetLocks, AssetStore, TranscodeResult};
use crate::metrics;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// One unit of work for the transcode pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeTask {
    pub asset_id: AssetId,
    pub storage_path: PathBuf,
}

impl TranscodeTask {
    pub fn for_asset(asset: &Asset) -> Self {
        Self {
            asset_id: asset.id,
            storage_path: PathBuf::from(&asset.storage_path),
        }
    }
}

/// What happened to a task, published once it is done.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TranscodeOutcome {
    Completed {
        asset_id: AssetId,
        duration_seconds: f64,
    },
    Failed {
        asset_id: AssetId,
        error: String,
    },
    /// The row changed under the task (deleted, deactivated, already done).
    Skipped {
        asset_id: AssetId,
        reason: String,
    },
}

impl TranscodeOutcome {
    pub fn asset_id(&self) -> AssetId {
        match self {
            Self::Completed { asset_id, .. }
            | Self::Failed { asset_id, .. }
            | Self::Skipped { asset_id, .. } => *asset_id,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Skipped { .. } => "skipped",
        }
    }
}

pub struct TranscodeWorker {
    store: Arc<dyn AssetStore>,
    locks: Arc<AssetLocks>,
    transcoder: Arc<dyn Transcoder>,
    prober: Arc<dyn MediaProber>,
}

impl TranscodeWorker {
    pub fn new(
        store: Arc<dyn AssetStore>,
        locks: Arc<AssetLocks>,
        transcoder: Arc<dyn Transcoder>,
        prober: Arc<dyn MediaProber>,
    ) -> Self {
        Self {
            store,
            locks,
            transcoder,
            prober,
        }
    }

    /// Run one task to completion. Never returns an error: failures end up in
    /// the catalog and in the returned outcome.
    pub async fn process(&self, task: &TranscodeTask) -> TranscodeOutcome {
        let started = Instant::now();
        // Held across the whole transcode so deletes and re-ingests wait
        let _guard = self.locks.lock(&task.storage_path).await;

        let outcome = match self.load_pending(task) {
            Ok(Some(asset)) => self.normalize_and_record(&asset).await,
            Ok(None) => TranscodeOutcome::Skipped {
                asset_id: task.asset_id,
                reason: "asset is no longer pending".to_string(),
            },
            Err(e) => self.fail(task.asset_id, e),
        };
        metrics::record_transcode(outcome.label(), started.elapsed());
        outcome
    }

    /// Re-read the row under the lock; `None` when there is nothing to do.
    fn load_pending(&self, task: &TranscodeTask) -> Result<Option<Asset>, AssetError> {
        let Some(asset) = self.store.get_asset(task.asset_id)? else {
            debug!("Asset {} was deleted before transcoding", task.asset_id);
            return Ok(None);
        };
        if !asset.is_active || asset.duration_seconds.is_some() {
            debug!(
                "Asset {} is {}, nothing to transcode",
                asset.id,
                asset.processing_state().as_str()
            );
            return Ok(None);
        }
        if Path::new(&asset.storage_path) != task.storage_path {
            warn!(
                "Asset {} moved from {:?} to {}, skipping stale task",
                asset.id, task.storage_path, asset.storage_path
            );
            return Ok(None);
        }
        Ok(Some(asset))
    }

    async fn normalize_and_record(&self, asset: &Asset) -> TranscodeOutcome {
        info!("Transcoding asset {} ({})", asset.id, asset.storage_path);
        let result = match self.normalize(asset).await {
            Ok(result) => result,
            Err(e) => return self.fail(asset.id, e),
        };

        match self.store.complete_transcode(asset.id, &result) {
            Ok(true) => {
                info!(
                    "Asset {} is active: {:.2}s, {:#}",
                    asset.id,
                    result.duration_seconds,
                    byte_unit::Byte::from(result.file_size_bytes as u64)
                );
                TranscodeOutcome::Completed {
                    asset_id: asset.id,
                    duration_seconds: result.duration_seconds,
                }
            }
            Ok(false) => TranscodeOutcome::Skipped {
                asset_id: asset.id,
                reason: "asset was deactivated while transcoding".to_string(),
            },
            Err(e) => self.fail(asset.id, AssetError::Store(e)),
        }
    }

    async fn normalize(&self, asset: &Asset) -> Result<TranscodeResult, AssetError> {
        let input = PathBuf::from(&asset.storage_path);
        let output = StorageLayout::temp_output_path(&input);

        self.transcoder.transcode(&input, &output).await?;

        let info = self.prober.probe(&output).await?;
        let duration_seconds = info
            .duration_seconds
            .filter(|d| *d > 0.0)
            .ok_or(TranscodeError::MissingDuration)?;

        let size = tokio::fs::metadata(&output)
            .await
            .map_err(|e| AssetError::storage(&output, e))?
            .len();
        if size == 0 {
            return Err(TranscodeError::InvalidOutput(format!("{:?} is empty", output)).into());
        }

        // Replaces the raw upload in one step, the path never goes missing
        tokio::fs::rename(&output, &input)
            .await
            .map_err(|e| AssetError::storage(&input, e))?;

        Ok(TranscodeResult {
            file_size_bytes: size as i64,
            duration_seconds,
            width: info.width,
            height: info.height,
        })
    }

    fn fail(&self, asset_id: AssetId, err: AssetError) -> TranscodeOutcome {
        let message = err.to_string();
        error!("Transcoding asset {} failed: {}", asset_id, message);
        match self.store.mark_failed(asset_id, &message) {
            Ok(true) => {}
            Ok(false) => warn!("Asset {} vanished before it could be marked failed", asset_id),
            Err(e) => error!("Failed to mark asset {} as failed: {:#}", asset_id, e),
        }
        TranscodeOutcome::Failed {
            asset_id,
            error: message,
        }
    }
}
