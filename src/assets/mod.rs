mod duplicates;
mod error;
mod integrity;
mod locks;
mod models;
mod repository;
mod schema;
mod store;

pub use duplicates::DuplicateDetector;
pub use error::{is_unique_violation, AssetError};
pub use integrity::{IntegrityReport, IntegrityScanner, MissingFile};
pub use locks::{AssetLockGuard, AssetLocks};
pub use models::{
    Asset, AssetFilters, AssetId, AssetStatistics, AssetUpdate, NewAsset, Pagination,
    ProcessingState, TranscodeResult, Variant, ASSET_EXTENSION, ASSET_MIME_TYPE,
    DEFAULT_PAGE_LIMIT,
};
pub use repository::{AssetPage, AssetRepository, DeleteOutcome};
pub use store::{AssetStore, SqliteAssetStore};

#[cfg(feature = "mock")]
pub use store::MockAssetStore;
