//! Data models for the asset catalog.
//!
//! An asset is one sign-language clip, stored once per variant under its own
//! folder. Its lifecycle is derived from the row itself:
//! 1. Provisional: raw upload on disk, row active, no duration yet
//! 2. Active: normalized file in place, duration recorded
//! 3. Failed: normalization failed, row deactivated with the error kept
//! 4. Inactive: soft-deleted by an operator

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type AssetId = i64;

/// Mime type of every stored asset.
pub const ASSET_MIME_TYPE: &str = "video/mp4";

/// Extension of every stored asset, without the dot.
pub const ASSET_EXTENSION: &str = "mp4";

/// Model style the clip was recorded with. Duplicate checks and the storage
/// layout never cross variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Male,
    Female,
}

impl Variant {
    pub const ALL: [Variant; 2] = [Variant::Male, Variant::Female];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "male" => Some(Self::Male),
            "female" => Some(Self::Female),
            _ => None,
        }
    }

    /// Name of the directory holding every asset of this variant.
    pub fn partition_dir(&self) -> &'static str {
        match self {
            Self::Male => "male-model",
            Self::Female => "female-model",
        }
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing state derived from the stored columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingState {
    Provisional,
    Active,
    Failed,
    Inactive,
}

impl ProcessingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provisional => "PROVISIONAL",
            Self::Active => "ACTIVE",
            Self::Failed => "FAILED",
            Self::Inactive => "INACTIVE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: AssetId,
    pub filename: String,
    pub display_name: String,
    pub storage_path: String,
    pub file_size_bytes: i64,
    pub duration_seconds: Option<f64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub variant: Variant,
    pub mime_type: String,
    pub file_extension: String,
    pub description: Option<String>,
    pub tags: Option<String>,
    pub content_type: Option<String>,
    pub is_active: bool,
    /// Why normalization failed, when it did.
    pub processing_error: Option<String>,
    /// Unix milliseconds.
    pub created_at: i64,
    /// Unix milliseconds, unset until the first mutation.
    pub updated_at: Option<i64>,
}

impl Asset {
    pub fn processing_state(&self) -> ProcessingState {
        match (self.is_active, self.duration_seconds, &self.processing_error) {
            (true, None, _) => ProcessingState::Provisional,
            (true, Some(_), _) => ProcessingState::Active,
            (false, _, Some(_)) => ProcessingState::Failed,
            (false, _, None) => ProcessingState::Inactive,
        }
    }

    pub fn is_provisional(&self) -> bool {
        self.processing_state() == ProcessingState::Provisional
    }
}

/// Attributes of a freshly ingested asset.
#[derive(Debug, Clone)]
pub struct NewAsset {
    pub filename: String,
    pub display_name: String,
    pub storage_path: String,
    pub file_size_bytes: i64,
    pub variant: Variant,
    pub description: Option<String>,
    pub tags: Option<String>,
    pub content_type: Option<String>,
}

/// Partial metadata update. `None` leaves the column untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetUpdate {
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub tags: Option<String>,
    pub content_type: Option<String>,
    pub is_active: Option<bool>,
}

impl AssetUpdate {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.description.is_none()
            && self.tags.is_none()
            && self.content_type.is_none()
            && self.is_active.is_none()
    }
}

/// Metadata recorded once normalization succeeds.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeResult {
    pub file_size_bytes: i64,
    pub duration_seconds: f64,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

/// Search filters. Every field is optional; set fields AND together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetFilters {
    pub variant: Option<Variant>,
    pub content_type: Option<String>,
    /// `None` matches active and inactive rows alike.
    pub is_active: Option<bool>,
    pub min_duration: Option<f64>,
    pub max_duration: Option<f64>,
    pub min_size: Option<i64>,
    pub max_size: Option<i64>,
    /// Case-insensitive substring over description, tags, filename and
    /// display name.
    pub search_text: Option<String>,
}

impl Default for AssetFilters {
    fn default() -> Self {
        Self {
            variant: None,
            content_type: None,
            is_active: Some(true),
            min_duration: None,
            max_duration: None,
            min_size: None,
            max_size: None,
            search_text: None,
        }
    }
}

pub const DEFAULT_PAGE_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: usize,
    pub offset: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetStatistics {
    pub total_assets: usize,
    pub active_assets: usize,
    pub active_by_variant: BTreeMap<Variant, usize>,
    pub total_size_bytes: i64,
    pub total_duration_seconds: f64,
}
