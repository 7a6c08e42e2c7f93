//! Storage integrity scan: compares the catalog with the media tree.

use super::models::AssetId;
use super::store::AssetStore;
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingFile {
    pub asset_id: AssetId,
    pub storage_path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    /// Active assets whose media file is gone.
    pub missing_files: Vec<MissingFile>,
    /// Files under the media root that no asset row points at.
    pub orphan_files: Vec<PathBuf>,
    pub assets_checked: usize,
    pub files_scanned: usize,
    pub scan_duration_ms: u64,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.missing_files.is_empty() && self.orphan_files.is_empty()
    }
}

pub struct IntegrityScanner {
    store: Arc<dyn AssetStore>,
    media_root: PathBuf,
}

impl IntegrityScanner {
    pub fn new(store: Arc<dyn AssetStore>, media_root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            media_root: media_root.into(),
        }
    }

    /// Walks the whole media tree; blocking.
    pub fn scan(&self) -> Result<IntegrityReport> {
        let started = Instant::now();
        let assets = self.store.list_all().context("Failed to list assets")?;
        let referenced: HashSet<&Path> = assets
            .iter()
            .map(|a| Path::new(a.storage_path.as_str()))
            .collect();

        let missing_files: Vec<MissingFile> = assets
            .iter()
            .filter(|a| a.is_active && !Path::new(&a.storage_path).is_file())
            .map(|a| MissingFile {
                asset_id: a.id,
                storage_path: PathBuf::from(&a.storage_path),
            })
            .collect();

        let mut orphan_files = Vec::new();
        let mut files_scanned = 0;
        if self.media_root.is_dir() {
            for entry in WalkDir::new(&self.media_root).follow_links(false) {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!("Skipping unreadable entry during scan: {}", e);
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                files_scanned += 1;
                if !referenced.contains(entry.path()) {
                    orphan_files.push(entry.path().to_path_buf());
                }
            }
        } else {
            warn!("Media root {:?} does not exist", self.media_root);
        }
        orphan_files.sort();

        let report = IntegrityReport {
            missing_files,
            orphan_files,
            assets_checked: assets.len(),
            files_scanned,
            scan_duration_ms: started.elapsed().as_millis() as u64,
        };
        if report.is_clean() {
            info!(
                "Storage check passed: {} assets, {} files",
                report.assets_checked, report.files_scanned
            );
        } else {
            warn!(
                "Storage check found {} missing files and {} orphan files",
                report.missing_files.len(),
                report.orphan_files.len()
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{NewAsset, SqliteAssetStore, Variant};
    use crate::ingestion::StorageLayout;

    #[test]
    fn reports_missing_and_orphan_files() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path());
        let store = Arc::new(SqliteAssetStore::in_memory().unwrap());

        let insert = |name: &str, write: bool| {
            let path = layout.asset_path(Variant::Female, name);
            if write {
                std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                std::fs::write(&path, b"video").unwrap();
            }
            store
                .create_asset(&NewAsset {
                    filename: format!("{}.mp4", name),
                    display_name: name.to_string(),
                    storage_path: path.to_string_lossy().into_owned(),
                    file_size_bytes: 5,
                    variant: Variant::Female,
                    description: None,
                    tags: None,
                    content_type: None,
                })
                .unwrap()
        };
        insert("present", true);
        let missing = insert("missing", false);

        let orphan = layout.asset_path(Variant::Male, "stray");
        std::fs::create_dir_all(orphan.parent().unwrap()).unwrap();
        std::fs::write(&orphan, b"video").unwrap();

        let report = IntegrityScanner::new(store, dir.path()).scan().unwrap();
        assert!(!report.is_clean());
        assert_eq!(report.assets_checked, 2);
        assert_eq!(report.files_scanned, 2);
        assert_eq!(report.missing_files.len(), 1);
        assert_eq!(report.missing_files[0].asset_id, missing);
        assert_eq!(report.orphan_files, vec![orphan]);
    }

    #[test]
    fn empty_catalog_and_tree_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteAssetStore::in_memory().unwrap());
        let report = IntegrityScanner::new(store, dir.path()).scan().unwrap();
        assert!(report.is_clean());
        assert_eq!(report.files_scanned, 0);
    }
}
