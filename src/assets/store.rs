//! SQLite store for the asset catalog.

use super::models::{
    Asset, AssetFilters, AssetId, AssetStatistics, AssetUpdate, NewAsset, Pagination,
    TranscodeResult, Variant, ASSET_EXTENSION, ASSET_MIME_TYPE,
};
use super::schema::VERSIONED_SCHEMAS;
use crate::sqlite_persistence::open_versioned;
use anyhow::{anyhow, Context, Result};
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

/// Trait for asset catalog storage operations.
///
/// Every `find_*` lookup only considers active rows of one variant.
#[cfg_attr(feature = "mock", mockall::automock)]
pub trait AssetStore: Send + Sync {
    /// Insert a provisional asset and return its id.
    fn create_asset(&self, asset: &NewAsset) -> Result<AssetId>;

    fn get_asset(&self, id: AssetId) -> Result<Option<Asset>>;

    fn get_asset_by_path(&self, storage_path: &str) -> Result<Option<Asset>>;

    /// Apply a partial metadata update. Returns false for unknown ids.
    fn update_asset(&self, id: AssetId, update: &AssetUpdate) -> Result<bool>;

    /// Record normalized metadata on a still-active asset.
    fn complete_transcode(&self, id: AssetId, result: &TranscodeResult) -> Result<bool>;

    /// Deactivate an asset and remember why processing failed.
    fn mark_failed(&self, id: AssetId, error: &str) -> Result<bool>;

    /// Soft delete. Clears any processing error, the row reads as inactive.
    fn deactivate_asset(&self, id: AssetId) -> Result<bool>;

    /// Hard delete.
    fn delete_asset(&self, id: AssetId) -> Result<bool>;

    fn search_assets(&self, filters: &AssetFilters, pagination: Pagination) -> Result<Vec<Asset>>;

    fn count_assets(&self, filters: &AssetFilters) -> Result<usize>;

    fn find_by_filename(
        &self,
        filename: &str,
        variant: Variant,
        file_size: Option<i64>,
    ) -> Result<Vec<Asset>>;

    fn find_by_display_name(&self, display_name: &str, variant: Variant) -> Result<Vec<Asset>>;

    fn find_by_size(&self, file_size: i64, variant: Variant) -> Result<Vec<Asset>>;

    /// Active assets still waiting for normalization.
    fn list_provisional(&self) -> Result<Vec<Asset>>;

    /// Every row, active or not.
    fn list_all(&self) -> Result<Vec<Asset>>;

    fn statistics(&self) -> Result<AssetStatistics>;
}

const ASSET_COLUMNS: &str = "id, filename, display_name, storage_path, file_size_bytes, \
    duration_seconds, width, height, variant, mime_type, file_extension, description, tags, \
    content_type, is_active, processing_error, created_at, updated_at";

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Escapes LIKE wildcards so user text matches literally.
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Builds the WHERE clause (including the keyword, or empty) and its
/// positional parameters.
fn build_where(filters: &AssetFilters) -> (String, Vec<Value>) {
    let mut clauses: Vec<&'static str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(variant) = filters.variant {
        clauses.push("variant = ?");
        values.push(Value::Text(variant.as_str().to_string()));
    }
    if let Some(content_type) = &filters.content_type {
        clauses.push("content_type = ?");
        values.push(Value::Text(content_type.clone()));
    }
    if let Some(is_active) = filters.is_active {
        clauses.push("is_active = ?");
        values.push(Value::Integer(is_active as i64));
    }
    if let Some(min) = filters.min_duration {
        clauses.push("duration_seconds >= ?");
        values.push(Value::Real(min));
    }
    if let Some(max) = filters.max_duration {
        clauses.push("duration_seconds <= ?");
        values.push(Value::Real(max));
    }
    if let Some(min) = filters.min_size {
        clauses.push("file_size_bytes >= ?");
        values.push(Value::Integer(min));
    }
    if let Some(max) = filters.max_size {
        clauses.push("file_size_bytes <= ?");
        values.push(Value::Integer(max));
    }
    if let Some(text) = filters.search_text.as_deref().filter(|t| !t.is_empty()) {
        clauses.push(
            "(unicode_lower(description) LIKE ? ESCAPE '\\' \
             OR unicode_lower(tags) LIKE ? ESCAPE '\\' \
             OR unicode_lower(filename) LIKE ? ESCAPE '\\' \
             OR unicode_lower(display_name) LIKE ? ESCAPE '\\')",
        );
        let pattern = format!("%{}%", escape_like(&text.to_lowercase()));
        for _ in 0..4 {
            values.push(Value::Text(pattern.clone()));
        }
    }

    if clauses.is_empty() {
        (String::new(), values)
    } else {
        (format!("WHERE {}", clauses.join(" AND ")), values)
    }
}

/// Registers `unicode_lower(text)`. SQLite's own `lower()` and `LIKE` only
/// fold ASCII letters.
fn register_functions(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "unicode_lower",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let text: Option<String> = ctx.get(0)?;
            Ok(text.map(|t| t.to_lowercase()))
        },
    )
    .context("Failed to register unicode_lower")
}

/// SQLite implementation of AssetStore.
#[derive(Clone)]
pub struct SqliteAssetStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAssetStore {
    /// Open or create an asset database.
    pub fn open(path: &Path) -> Result<Self> {
        let is_new = !path.exists();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open asset database: {:?}", path))?;
        let version = open_versioned(&conn, VERSIONED_SCHEMAS, is_new)?;
        register_functions(&conn)?;
        info!("Opened asset database {:?} (schema v{})", path, version);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database (for testing).
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        open_versioned(&conn, VERSIONED_SCHEMAS, true)?;
        register_functions(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Asset database mutex poisoned"))
    }

    fn row_to_asset(row: &rusqlite::Row) -> rusqlite::Result<Asset> {
        let variant_str: String = row.get("variant")?;
        let variant = Variant::parse(&variant_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                8,
                Type::Text,
                format!("Unknown variant '{}'", variant_str).into(),
            )
        })?;
        Ok(Asset {
            id: row.get("id")?,
            filename: row.get("filename")?,
            display_name: row.get("display_name")?,
            storage_path: row.get("storage_path")?,
            file_size_bytes: row.get("file_size_bytes")?,
            duration_seconds: row.get("duration_seconds")?,
            width: row.get("width")?,
            height: row.get("height")?,
            variant,
            mime_type: row.get("mime_type")?,
            file_extension: row.get("file_extension")?,
            description: row.get("description")?,
            tags: row.get("tags")?,
            content_type: row.get("content_type")?,
            is_active: row.get::<_, i32>("is_active")? != 0,
            processing_error: row.get("processing_error")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn query_assets(&self, sql: &str, values: Vec<Value>) -> Result<Vec<Asset>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let assets = stmt
            .query_map(params_from_iter(values), Self::row_to_asset)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(assets)
    }
}

impl AssetStore for SqliteAssetStore {
    fn create_asset(&self, asset: &NewAsset) -> Result<AssetId> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO assets (
                filename, display_name, storage_path, file_size_bytes, variant,
                mime_type, file_extension, description, tags, content_type,
                is_active, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1, ?11)
            "#,
            params![
                asset.filename,
                asset.display_name,
                asset.storage_path,
                asset.file_size_bytes,
                asset.variant.as_str(),
                ASSET_MIME_TYPE,
                ASSET_EXTENSION,
                asset.description,
                asset.tags,
                asset.content_type,
                now_millis(),
            ],
        )
        .with_context(|| format!("Failed to create asset {}", asset.storage_path))?;
        Ok(conn.last_insert_rowid())
    }

    fn get_asset(&self, id: AssetId) -> Result<Option<Asset>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM assets WHERE id = ?1", ASSET_COLUMNS),
            params![id],
            Self::row_to_asset,
        )
        .optional()
        .with_context(|| format!("Failed to read asset {}", id))
    }

    fn get_asset_by_path(&self, storage_path: &str) -> Result<Option<Asset>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM assets WHERE storage_path = ?1", ASSET_COLUMNS),
            params![storage_path],
            Self::row_to_asset,
        )
        .optional()
        .with_context(|| format!("Failed to read asset at {}", storage_path))
    }

    fn update_asset(&self, id: AssetId, update: &AssetUpdate) -> Result<bool> {
        let mut sets: Vec<&'static str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(display_name) = &update.display_name {
            sets.push("display_name = ?");
            values.push(Value::Text(display_name.clone()));
        }
        if let Some(description) = &update.description {
            sets.push("description = ?");
            values.push(Value::Text(description.clone()));
        }
        if let Some(tags) = &update.tags {
            sets.push("tags = ?");
            values.push(Value::Text(tags.clone()));
        }
        if let Some(content_type) = &update.content_type {
            sets.push("content_type = ?");
            values.push(Value::Text(content_type.clone()));
        }
        if let Some(is_active) = update.is_active {
            sets.push("is_active = ?");
            values.push(Value::Integer(is_active as i64));
        }

        if sets.is_empty() {
            return Ok(self.get_asset(id)?.is_some());
        }

        sets.push("updated_at = ?");
        values.push(Value::Integer(now_millis()));
        values.push(Value::Integer(id));

        let conn = self.conn()?;
        let changed = conn
            .execute(
                &format!("UPDATE assets SET {} WHERE id = ?", sets.join(", ")),
                params_from_iter(values),
            )
            .with_context(|| format!("Failed to update asset {}", id))?;
        Ok(changed > 0)
    }

    fn complete_transcode(&self, id: AssetId, result: &TranscodeResult) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                r#"
                UPDATE assets
                SET file_size_bytes = ?1, duration_seconds = ?2, width = ?3, height = ?4,
                    processing_error = NULL, updated_at = ?5
                WHERE id = ?6 AND is_active = 1
                "#,
                params![
                    result.file_size_bytes,
                    result.duration_seconds,
                    result.width,
                    result.height,
                    now_millis(),
                    id,
                ],
            )
            .with_context(|| format!("Failed to complete asset {}", id))?;
        Ok(changed > 0)
    }

    fn mark_failed(&self, id: AssetId, error: &str) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE assets SET is_active = 0, processing_error = ?1, updated_at = ?2 WHERE id = ?3",
                params![error, now_millis(), id],
            )
            .with_context(|| format!("Failed to mark asset {} as failed", id))?;
        Ok(changed > 0)
    }

    fn deactivate_asset(&self, id: AssetId) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE assets SET is_active = 0, processing_error = NULL, updated_at = ?1 WHERE id = ?2",
                params![now_millis(), id],
            )
            .with_context(|| format!("Failed to deactivate asset {}", id))?;
        Ok(changed > 0)
    }

    fn delete_asset(&self, id: AssetId) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn
            .execute("DELETE FROM assets WHERE id = ?1", params![id])
            .with_context(|| format!("Failed to delete asset {}", id))?;
        Ok(changed > 0)
    }

    fn search_assets(&self, filters: &AssetFilters, pagination: Pagination) -> Result<Vec<Asset>> {
        let (where_clause, mut values) = build_where(filters);
        // SQLite reads a negative LIMIT as unbounded
        values.push(Value::Integer(i64::try_from(pagination.limit).unwrap_or(-1)));
        values.push(Value::Integer(pagination.offset as i64));
        self.query_assets(
            &format!(
                "SELECT {} FROM assets {} ORDER BY id LIMIT ? OFFSET ?",
                ASSET_COLUMNS, where_clause
            ),
            values,
        )
        .context("Failed to search assets")
    }

    fn count_assets(&self, filters: &AssetFilters) -> Result<usize> {
        let (where_clause, values) = build_where(filters);
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM assets {}", where_clause),
                params_from_iter(values),
                |row| row.get(0),
            )
            .context("Failed to count assets")?;
        Ok(count as usize)
    }

    fn find_by_filename(
        &self,
        filename: &str,
        variant: Variant,
        file_size: Option<i64>,
    ) -> Result<Vec<Asset>> {
        let mut sql = format!(
            "SELECT {} FROM assets WHERE is_active = 1 AND variant = ? AND filename = ?",
            ASSET_COLUMNS
        );
        let mut values = vec![
            Value::Text(variant.as_str().to_string()),
            Value::Text(filename.to_string()),
        ];
        if let Some(size) = file_size {
            sql.push_str(" AND file_size_bytes = ?");
            values.push(Value::Integer(size));
        }
        sql.push_str(" ORDER BY id");
        self.query_assets(&sql, values)
    }

    fn find_by_display_name(&self, display_name: &str, variant: Variant) -> Result<Vec<Asset>> {
        self.query_assets(
            &format!(
                "SELECT {} FROM assets WHERE is_active = 1 AND variant = ? AND display_name = ? ORDER BY id",
                ASSET_COLUMNS
            ),
            vec![
                Value::Text(variant.as_str().to_string()),
                Value::Text(display_name.to_string()),
            ],
        )
    }

    fn find_by_size(&self, file_size: i64, variant: Variant) -> Result<Vec<Asset>> {
        self.query_assets(
            &format!(
                "SELECT {} FROM assets WHERE is_active = 1 AND variant = ? AND file_size_bytes = ? ORDER BY id",
                ASSET_COLUMNS
            ),
            vec![
                Value::Text(variant.as_str().to_string()),
                Value::Integer(file_size),
            ],
        )
    }

    fn list_provisional(&self) -> Result<Vec<Asset>> {
        self.query_assets(
            &format!(
                "SELECT {} FROM assets WHERE is_active = 1 AND duration_seconds IS NULL ORDER BY id",
                ASSET_COLUMNS
            ),
            Vec::new(),
        )
    }

    fn list_all(&self) -> Result<Vec<Asset>> {
        self.query_assets(
            &format!("SELECT {} FROM assets ORDER BY id", ASSET_COLUMNS),
            Vec::new(),
        )
    }

    fn statistics(&self) -> Result<AssetStatistics> {
        let conn = self.conn()?;
        let (total_assets, active_assets, total_size_bytes, total_duration_seconds) = conn
            .query_row(
                r#"
                SELECT
                    COUNT(*),
                    COALESCE(SUM(CASE WHEN is_active = 1 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN is_active = 1 THEN file_size_bytes ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN is_active = 1 THEN duration_seconds ELSE 0 END), 0.0)
                FROM assets
                "#,
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, f64>(3)?,
                    ))
                },
            )
            .context("Failed to compute asset statistics")?;

        let mut active_by_variant: BTreeMap<Variant, usize> =
            Variant::ALL.iter().map(|v| (*v, 0)).collect();
        let mut stmt = conn.prepare(
            "SELECT variant, COUNT(*) FROM assets WHERE is_active = 1 GROUP BY variant",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (variant, count) = row?;
            if let Some(variant) = Variant::parse(&variant) {
                active_by_variant.insert(variant, count as usize);
            }
        }

        Ok(AssetStatistics {
            total_assets: total_assets as usize,
            active_assets: active_assets as usize,
            active_by_variant,
            total_size_bytes,
            total_duration_seconds,
        })
    }
}
