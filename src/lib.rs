//! SignSphere Asset Server Library
//!
//! Ingestion pipeline and catalog for sign-language video clips, exposed for
//! the binary and for integration tests.

pub mod assets;
pub mod config;
pub mod ingestion;
pub mod metrics;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use assets::{
    Asset, AssetError, AssetRepository, AssetStore, IntegrityScanner, SqliteAssetStore, Variant,
};
pub use config::{AppConfig, CliConfig, FileConfig};
pub use ingestion::{IngestOptions, IngestRequest, IngestionManager, TranscodeQueue};
