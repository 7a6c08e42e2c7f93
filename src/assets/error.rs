use super::models::AssetId;
use crate::ingestion::{FileHandlerError, TranscodeError};
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the asset catalog and the ingestion pipeline.
#[derive(Debug, Error)]
pub enum AssetError {
    /// Bad input, rejected before any I/O.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The storage path is already owned by another asset, or the caller
    /// asked to block on detected duplicates.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error at {path:?}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Asset {0} not found")]
    NotFound(AssetId),

    /// Only raised inside the transcoding worker.
    #[error("Transcode failure: {0}")]
    Transcode(#[from] TranscodeError),

    #[error("Catalog error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl AssetError {
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// Short, stable label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Conflict(_) => "conflict",
            Self::Storage { .. } => "storage",
            Self::NotFound(_) => "not_found",
            Self::Transcode(_) => "transcode",
            Self::Store(_) => "catalog",
        }
    }
}

impl From<FileHandlerError> for AssetError {
    fn from(err: FileHandlerError) -> Self {
        match err {
            FileHandlerError::Io { path, source } => Self::Storage { path, source },
            other => Self::Validation(other.to_string()),
        }
    }
}

/// Returns true when `err` wraps a SQLite UNIQUE constraint violation.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<rusqlite::Error>(),
            Some(rusqlite::Error::SqliteFailure(e, _))
                if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        )
    })
}
