//! Ingestion entry point: validate, store, register, hand off to the pool.
//!
//! The caller gets a receipt as soon as the raw upload is on disk and a
//! provisional row exists. Transcoding happens later on the queue.

use super::file_handler::{remove_file_and_empty_dir, FileHandler};
use super::layout::StorageLayout;
use super::queue::TranscodeQueue;
use super::worker::TranscodeTask;
use crate::assets::{
    is_unique_violation, Asset, AssetError, AssetId, AssetLocks, AssetStore, DuplicateDetector,
    NewAsset, Variant,
};
use crate::metrics;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A raw clip plus the metadata supplied with it.
#[derive(Debug, Clone, Default)]
pub struct IngestRequest {
    pub data: Vec<u8>,
    pub filename: String,
    pub variant: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub tags: Option<String>,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestOptions {
    /// Refuse the upload when the duplicate detector finds anything.
    pub reject_duplicates: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Processing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReceipt {
    pub asset_id: AssetId,
    pub storage_path: PathBuf,
    pub status: IngestStatus,
}

/// Result of re-queueing assets left provisional by a previous run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResumeReport {
    pub requeued: Vec<AssetId>,
    pub failed: Vec<AssetId>,
}

pub struct IngestionManager {
    store: Arc<dyn AssetStore>,
    locks: Arc<AssetLocks>,
    layout: StorageLayout,
    file_handler: FileHandler,
    duplicates: DuplicateDetector,
    queue: Arc<TranscodeQueue>,
}

impl IngestionManager {
    pub fn new(
        store: Arc<dyn AssetStore>,
        locks: Arc<AssetLocks>,
        layout: StorageLayout,
        file_handler: FileHandler,
        queue: Arc<TranscodeQueue>,
    ) -> Self {
        let duplicates = DuplicateDetector::new(store.clone());
        Self {
            store,
            locks,
            layout,
            file_handler,
            duplicates,
            queue,
        }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn find_duplicates(
        &self,
        filename: &str,
        variant: Variant,
        file_size: Option<i64>,
    ) -> Result<Vec<Asset>, AssetError> {
        self.duplicates.find_duplicates(filename, variant, file_size)
    }

    pub async fn ingest(
        &self,
        request: IngestRequest,
        options: IngestOptions,
    ) -> Result<IngestReceipt, AssetError> {
        match self.ingest_inner(request, options).await {
            Ok((receipt, variant)) => {
                metrics::record_ingest(variant.as_str());
                Ok(receipt)
            }
            Err(e) => {
                metrics::record_ingest_rejection(e.kind());
                warn!("Ingest rejected: {}", e);
                Err(e)
            }
        }
    }

    async fn ingest_inner(
        &self,
        request: IngestRequest,
        options: IngestOptions,
    ) -> Result<(IngestReceipt, Variant), AssetError> {
        let variant = Variant::parse(&request.variant).ok_or_else(|| {
            AssetError::Validation(format!(
                "Unknown model type {:?}, expected male or female",
                request.variant
            ))
        })?;
        let upload = self
            .file_handler
            .validate_upload(&request.filename, &request.data)?;
        let file_size = request.data.len() as i64;

        if options.reject_duplicates {
            let found = self
                .duplicates
                .find_duplicates(&upload.filename, variant, Some(file_size))?;
            if !found.is_empty() {
                let ids: Vec<String> = found.iter().map(|a| a.id.to_string()).collect();
                return Err(AssetError::Conflict(format!(
                    "{} looks like a duplicate of asset(s) {}",
                    upload.filename,
                    ids.join(", ")
                )));
            }
        }

        let storage_path = self.layout.asset_path(variant, &upload.stem);
        let guard = self.locks.lock(&storage_path).await;

        if let Some(existing) = self
            .store
            .get_asset_by_path(&storage_path.to_string_lossy())?
        {
            return Err(AssetError::Conflict(format!(
                "{:?} is already owned by asset {}",
                storage_path, existing.id
            )));
        }

        self.layout.prepare(variant, &upload.stem).await?;
        if let Err(e) = self
            .file_handler
            .write_file(&storage_path, &request.data)
            .await
        {
            self.discard(&storage_path).await;
            return Err(e.into());
        }

        let display_name = request
            .display_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| upload.stem.clone());
        let new_asset = NewAsset {
            filename: upload.filename,
            display_name,
            storage_path: storage_path.to_string_lossy().into_owned(),
            file_size_bytes: file_size,
            variant,
            description: request.description,
            tags: request.tags,
            content_type: request.content_type,
        };
        let asset_id = match self.store.create_asset(&new_asset) {
            Ok(id) => id,
            Err(e) => {
                self.discard(&storage_path).await;
                if is_unique_violation(&e) {
                    return Err(AssetError::Conflict(format!(
                        "{:?} is already owned by another asset",
                        storage_path
                    )));
                }
                return Err(AssetError::Store(e));
            }
        };
        drop(guard);

        info!(
            "Ingested asset {} ({}, {:#}) at {:?}",
            asset_id,
            variant,
            byte_unit::Byte::from(file_size as u64),
            storage_path
        );
        let task = TranscodeTask {
            asset_id,
            storage_path: storage_path.clone(),
        };
        if !self.queue.enqueue(task) {
            warn!(
                "Could not queue transcode of asset {}, it stays provisional until resumed",
                asset_id
            );
        }

        Ok((
            IngestReceipt {
                asset_id,
                storage_path,
                status: IngestStatus::Processing,
            },
            variant,
        ))
    }

    /// Remove a raw upload that never got a catalog row.
    async fn discard(&self, storage_path: &Path) {
        for warning in remove_file_and_empty_dir(storage_path).await {
            warn!("Leftover after failed ingest: {}", warning);
        }
    }

    /// Re-queue provisional assets whose task was lost with a previous run.
    /// Rows whose raw file is gone are marked failed instead.
    pub async fn resume_pending(&self) -> Result<ResumeReport, AssetError> {
        let mut report = ResumeReport::default();
        for asset in self.store.list_provisional()? {
            let task = TranscodeTask::for_asset(&asset);
            let exists = tokio::fs::try_exists(&task.storage_path)
                .await
                .unwrap_or(false);
            if exists && self.queue.enqueue(task) {
                debug!("Re-queued provisional asset {}", asset.id);
                report.requeued.push(asset.id);
                continue;
            }

            let reason = if exists {
                "transcode queue is closed"
            } else {
                "raw upload is missing"
            };
            match self
                .store
                .mark_failed(asset.id, &format!("Not resumed: {}", reason))
            {
                Ok(_) => report.failed.push(asset.id),
                Err(e) => error!("Failed to mark asset {} as failed: {:#}", asset.id, e),
            }
        }
        if !report.requeued.is_empty() || !report.failed.is_empty() {
            info!(
                "Resumed {} provisional assets, {} marked failed",
                report.requeued.len(),
                report.failed.len()
            );
        }
        Ok(report)
    }
}
