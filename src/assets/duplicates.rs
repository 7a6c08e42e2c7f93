//! Advisory duplicate detection.
//!
//! Only active assets of the same variant are ever considered. Results are
//! the union of three rules, kept in the order they were found:
//! 1. same filename (and same size when one is given)
//! 2. display name equal to the filename without its extension
//! 3. same size, when one is given

use super::error::AssetError;
use super::models::{Asset, Variant};
use super::store::AssetStore;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct DuplicateDetector {
    store: Arc<dyn AssetStore>,
}

impl DuplicateDetector {
    pub fn new(store: Arc<dyn AssetStore>) -> Self {
        Self { store }
    }

    pub fn find_duplicates(
        &self,
        filename: &str,
        variant: Variant,
        file_size: Option<i64>,
    ) -> Result<Vec<Asset>, AssetError> {
        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        let mut add_all = |assets: Vec<Asset>| {
            for asset in assets {
                if seen.insert(asset.id) {
                    duplicates.push(asset);
                }
            }
        };

        add_all(self.store.find_by_filename(filename, variant, file_size)?);

        if let Some(stem) = display_name_of(filename) {
            add_all(self.store.find_by_display_name(stem, variant)?);
        }

        if let Some(size) = file_size {
            add_all(self.store.find_by_size(size, variant)?);
        }

        debug!(
            "Found {} possible duplicates of {} ({})",
            duplicates.len(),
            filename,
            variant
        );
        Ok(duplicates)
    }
}

/// The display name an upload called `filename` would get.
fn display_name_of(filename: &str) -> Option<&str> {
    Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
}
