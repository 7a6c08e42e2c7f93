//! Canonical on-disk locations of assets.
//!
//! Every asset owns one folder: `<base>/<variant>-model/<name>/<name>.mp4`.
//! Paths are a pure function of `(variant, name)`, so re-uploading the same
//! name resolves to the same path and collides instead of being renamed.

use super::file_handler::FileHandlerError;
use crate::assets::{Variant, ASSET_EXTENSION};
use std::path::{Path, PathBuf};

/// Suffix of the scratch file the transcoder writes beside the raw upload.
pub const PROCESSED_SUFFIX: &str = "_processed";

#[derive(Debug, Clone)]
pub struct StorageLayout {
    base: PathBuf,
}

impl StorageLayout {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn variant_dir(&self, variant: Variant) -> PathBuf {
        self.base.join(variant.partition_dir())
    }

    pub fn asset_dir(&self, variant: Variant, asset_name: &str) -> PathBuf {
        self.variant_dir(variant).join(asset_name)
    }

    /// Canonical path of the asset's media file. Touches nothing.
    pub fn asset_path(&self, variant: Variant, asset_name: &str) -> PathBuf {
        self.asset_dir(variant, asset_name)
            .join(format!("{}.{}", asset_name, ASSET_EXTENSION))
    }

    /// Same as [`Self::asset_path`], creating the asset folder when missing.
    pub async fn prepare(
        &self,
        variant: Variant,
        asset_name: &str,
    ) -> Result<PathBuf, FileHandlerError> {
        let dir = self.asset_dir(variant, asset_name);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| FileHandlerError::Io {
                path: dir.clone(),
                source,
            })?;
        Ok(self.asset_path(variant, asset_name))
    }

    /// Scratch output path beside a stored asset.
    pub fn temp_output_path(storage_path: &Path) -> PathBuf {
        let stem = storage_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        storage_path.with_file_name(format!(
            "{}{}.{}",
            stem, PROCESSED_SUFFIX, ASSET_EXTENSION
        ))
    }
}
