//! Catalog operations on top of the asset store.
//!
//! Deletes take the asset's lock, so they wait for an in-flight transcode of
//! the same asset instead of racing it. File cleanup is best-effort: failures
//! come back as warnings and the catalog change still happens.

use super::error::{is_unique_violation, AssetError};
use super::locks::AssetLocks;
use super::models::{
    Asset, AssetFilters, AssetId, AssetStatistics, AssetUpdate, NewAsset, Pagination, Variant,
};
use super::store::AssetStore;
use crate::ingestion::{remove_file_and_empty_dir, CleanupWarning, StorageLayout};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteOutcome {
    pub asset_id: AssetId,
    pub hard: bool,
    pub warnings: Vec<CleanupWarning>,
}

/// One page of search results plus the total number of matches.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetPage {
    pub assets: Vec<Asset>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Clone)]
pub struct AssetRepository {
    store: Arc<dyn AssetStore>,
    locks: Arc<AssetLocks>,
}

impl AssetRepository {
    pub fn new(store: Arc<dyn AssetStore>, locks: Arc<AssetLocks>) -> Self {
        Self { store, locks }
    }

    pub fn store(&self) -> &Arc<dyn AssetStore> {
        &self.store
    }

    pub fn create(&self, asset: &NewAsset) -> Result<Asset, AssetError> {
        let id = self.store.create_asset(asset).map_err(|e| {
            if is_unique_violation(&e) {
                AssetError::Conflict(format!(
                    "{} is already owned by another asset",
                    asset.storage_path
                ))
            } else {
                AssetError::Store(e)
            }
        })?;
        self.get(id)
    }

    pub fn get(&self, id: AssetId) -> Result<Asset, AssetError> {
        self.store.get_asset(id)?.ok_or(AssetError::NotFound(id))
    }

    /// Update metadata. Only supplied fields change.
    pub async fn update(&self, id: AssetId, update: &AssetUpdate) -> Result<Asset, AssetError> {
        if let Some(name) = &update.display_name {
            if name.trim().is_empty() {
                return Err(AssetError::Validation(
                    "display_name must not be empty".to_string(),
                ));
            }
        }
        let asset = self.get(id)?;
        let _guard = self.locks.lock(Path::new(&asset.storage_path)).await;
        if update.is_active == Some(true) {
            self.check_reactivation(&self.get(id)?).await?;
        }
        if !self.store.update_asset(id, update)? {
            return Err(AssetError::NotFound(id));
        }
        self.get(id)
    }

    /// An inactive row may only come back when it holds a normalized file
    /// that is still on disk. Caller holds the asset lock.
    async fn check_reactivation(&self, asset: &Asset) -> Result<(), AssetError> {
        if asset.is_active {
            return Ok(());
        }
        if asset.duration_seconds.is_none() || asset.processing_error.is_some() {
            return Err(AssetError::Conflict(format!(
                "asset {} never finished normalization, ingest it again instead",
                asset.id
            )));
        }
        let present = tokio::fs::try_exists(&asset.storage_path)
            .await
            .unwrap_or(false);
        if !present {
            return Err(AssetError::Conflict(format!(
                "asset {} has no file at {}",
                asset.id, asset.storage_path
            )));
        }
        Ok(())
    }

    pub fn search(
        &self,
        filters: &AssetFilters,
        pagination: Pagination,
    ) -> Result<Vec<Asset>, AssetError> {
        Ok(self.store.search_assets(filters, pagination)?)
    }

    pub fn count(&self, filters: &AssetFilters) -> Result<usize, AssetError> {
        Ok(self.store.count_assets(filters)?)
    }

    pub fn search_page(
        &self,
        filters: &AssetFilters,
        pagination: Pagination,
    ) -> Result<AssetPage, AssetError> {
        Ok(AssetPage {
            assets: self.search(filters, pagination)?,
            total: self.count(filters)?,
            limit: pagination.limit,
            offset: pagination.offset,
        })
    }

    /// Every active asset of one variant.
    pub fn list_by_variant(&self, variant: Variant) -> Result<Vec<Asset>, AssetError> {
        let filters = AssetFilters {
            variant: Some(variant),
            ..Default::default()
        };
        self.search(
            &filters,
            Pagination {
                limit: usize::MAX,
                offset: 0,
            },
        )
    }

    pub fn statistics(&self) -> Result<AssetStatistics, AssetError> {
        Ok(self.store.statistics()?)
    }

    /// Remove the files and deactivate the row. `None` for unknown ids.
    pub async fn soft_delete(&self, id: AssetId) -> Result<Option<DeleteOutcome>, AssetError> {
        self.delete(id, false).await
    }

    /// Remove the files and the row. `None` for unknown ids.
    pub async fn hard_delete(&self, id: AssetId) -> Result<Option<DeleteOutcome>, AssetError> {
        self.delete(id, true).await
    }

    async fn delete(&self, id: AssetId, hard: bool) -> Result<Option<DeleteOutcome>, AssetError> {
        let Some(asset) = self.store.get_asset(id)? else {
            return Ok(None);
        };
        let storage_path = Path::new(&asset.storage_path);
        let _guard = self.locks.lock(storage_path).await;

        // Another delete may have won the lock first
        if self.store.get_asset(id)?.is_none() {
            return Ok(None);
        }

        let mut warnings =
            remove_file_and_empty_dir(&StorageLayout::temp_output_path(storage_path)).await;
        warnings.extend(remove_file_and_empty_dir(storage_path).await);

        let changed = if hard {
            self.store.delete_asset(id)?
        } else {
            self.store.deactivate_asset(id)?
        };
        if !changed {
            return Ok(None);
        }

        if warnings.is_empty() {
            info!(
                "{} deleted asset {} ({})",
                if hard { "Hard" } else { "Soft" },
                id,
                asset.storage_path
            );
        } else {
            warn!(
                "{} deleted asset {} with {} cleanup warnings",
                if hard { "Hard" } else { "Soft" },
                id,
                warnings.len()
            );
        }
        Ok(Some(DeleteOutcome {
            asset_id: id,
            hard,
            warnings,
        }))
    }
}
