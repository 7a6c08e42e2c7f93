//! Database schema for the asset catalog.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

/// V 0
pub const ASSETS_TABLE_V_0: Table = Table {
    name: "assets",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("filename", &SqlType::Text, non_null = true),
        sqlite_column!("display_name", &SqlType::Text, non_null = true),
        sqlite_column!(
            "storage_path",
            &SqlType::Text,
            non_null = true,
            is_unique = true
        ),
        sqlite_column!(
            "file_size_bytes",
            &SqlType::Integer,
            non_null = true,
            check = Some("file_size_bytes > 0")
        ),
        sqlite_column!(
            "duration_seconds",
            &SqlType::Real,
            check = Some("duration_seconds IS NULL OR duration_seconds > 0")
        ),
        sqlite_column!("width", &SqlType::Integer),
        sqlite_column!("height", &SqlType::Integer),
        sqlite_column!(
            "variant",
            &SqlType::Text,
            non_null = true,
            check = Some("variant IN ('male', 'female')")
        ),
        sqlite_column!("mime_type", &SqlType::Text, non_null = true),
        sqlite_column!("file_extension", &SqlType::Text, non_null = true),
        sqlite_column!("description", &SqlType::Text),
        sqlite_column!("tags", &SqlType::Text),
        sqlite_column!("content_type", &SqlType::Text),
        sqlite_column!(
            "is_active",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("1")
        ),
        sqlite_column!("processing_error", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("updated_at", &SqlType::Integer),
    ],
    indices: &[
        ("idx_assets_filename", "filename"),
        ("idx_assets_variant", "variant"),
        ("idx_assets_content_type", "content_type"),
        ("idx_assets_is_active", "is_active"),
        ("idx_assets_file_size", "file_size_bytes"),
    ],
    unique_constraints: &[],
};

pub const VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[ASSETS_TABLE_V_0],
    migration: None,
}];
