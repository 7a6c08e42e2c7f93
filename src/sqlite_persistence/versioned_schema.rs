use anyhow::{bail, Context, Result};
use rusqlite::{params, types::Type, Connection};
use tracing::info;

pub const BASE_DB_VERSION: usize = 99999;

#[macro_export]
macro_rules! sqlite_column {
    ($name:expr, $sql_type:expr $(, $field:ident = $value:expr)*) => {
        {
            // Only mutated when optional field assignments are passed (e.g. `non_null = true`)
            #[allow(unused_mut)]
            let mut column = Column {
                name: $name,
                sql_type: $sql_type,
                is_primary_key: false,
                non_null: false,
                is_unique: false,
                default_value: None,
                check: None,
            };
            $(
                column.$field = $value;
            )*
            column
        }
    };
}

#[derive(Debug, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Integer,
    Real,
    Blob,
}

impl SqlType {
    fn as_sql(&self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
            SqlType::Blob => "BLOB",
        }
    }

    fn parse(s: &str) -> Option<&'static SqlType> {
        match s {
            "TEXT" => Some(&SqlType::Text),
            "INTEGER" => Some(&SqlType::Integer),
            "REAL" => Some(&SqlType::Real),
            "BLOB" => Some(&SqlType::Blob),
            _ => None,
        }
    }
}

pub struct Column<'a, S: AsRef<str>> {
    pub name: S,
    pub sql_type: &'a SqlType,
    pub is_primary_key: bool,
    pub non_null: bool,
    pub is_unique: bool,
    pub default_value: Option<S>,
    /// Column-level CHECK expression, without the surrounding parentheses.
    pub check: Option<S>,
}

pub struct Table {
    pub name: &'static str,
    pub columns: &'static [Column<'static, &'static str>],
    pub indices: &'static [(&'static str, &'static str)],
    pub unique_constraints: &'static [&'static [&'static str]],
}

impl Table {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        let mut create_sql = format!("CREATE TABLE {} (", self.name);
        for (column_index, column) in self.columns.iter().enumerate() {
            if column_index > 0 {
                create_sql.push_str(", ");
            }
            create_sql.push_str(&format!("{} {}", column.name, column.sql_type.as_sql()));
            if column.is_primary_key {
                create_sql.push_str(" PRIMARY KEY");
            }
            if column.non_null {
                create_sql.push_str(" NOT NULL");
            }
            if column.is_unique {
                create_sql.push_str(" UNIQUE");
            }
            if let Some(default_value) = column.default_value {
                create_sql.push_str(&format!(" DEFAULT {}", default_value));
            }
            if let Some(check) = column.check {
                create_sql.push_str(&format!(" CHECK ({})", check));
            }
        }

        for unique_constraint in self.unique_constraints {
            create_sql.push_str(&format!(", UNIQUE ({})", unique_constraint.join(", ")));
        }
        create_sql.push_str(");");
        conn.execute(&create_sql, params![])?;

        for (index_name, column_name) in self.indices {
            conn.execute(
                &format!(
                    "CREATE INDEX {} ON {}({});",
                    index_name, self.name, column_name
                ),
                params![],
            )?;
        }
        Ok(())
    }

    fn validate(&self, conn: &Connection) -> Result<()> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", self.name))?;
        let actual_columns: Vec<Column<'_, String>> = stmt
            .query_map(params![], |row| {
                let type_name = row.get::<_, String>(2)?;
                let sql_type = SqlType::parse(&type_name).ok_or_else(|| {
                    rusqlite::Error::InvalidColumnType(2, type_name.clone(), Type::Text)
                })?;
                Ok(Column {
                    name: row.get::<usize, String>(1)?,
                    sql_type,
                    non_null: row.get::<_, i32>(3)? == 1,
                    default_value: row.get::<_, Option<String>>(4)?,
                    is_primary_key: row.get::<_, i32>(5)? == 1,
                    is_unique: false,
                    check: None,
                })
            })?
            .collect::<rusqlite::Result<_>>()
            .with_context(|| format!("Failed to read columns of table {}", self.name))?;

        if actual_columns.len() != self.columns.len() {
            bail!(
                "Table {} has {} columns, expected {}. Found column names: {}, expected: {}",
                self.name,
                actual_columns.len(),
                self.columns.len(),
                actual_columns
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                self.columns
                    .iter()
                    .map(|c| c.name)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        for (actual, expected) in actual_columns.iter().zip(self.columns.iter()) {
            if actual.name != expected.name {
                bail!(
                    "Table {} Column name mismatch: expected {}, got {}",
                    self.name,
                    expected.name,
                    actual.name
                );
            }
            if actual.sql_type != expected.sql_type {
                bail!(
                    "Table {} Column {} type mismatch: expected {:?}, got {:?}",
                    self.name,
                    expected.name,
                    expected.sql_type,
                    actual.sql_type
                );
            }
            if actual.non_null != expected.non_null {
                bail!(
                    "Table {} Column {} non-null mismatch: expected {}, got {}",
                    self.name,
                    expected.name,
                    expected.non_null,
                    actual.non_null
                );
            }
            // Default values might be wrapped in parentheses
            if actual
                .default_value
                .as_ref()
                .map(strip_leading_and_trailing_parentheses)
                != expected
                    .default_value
                    .map(strip_leading_and_trailing_parentheses)
            {
                bail!(
                    "Table {} Column {} default value mismatch: expected {:?}, got {:?}",
                    self.name,
                    expected.name,
                    expected.default_value,
                    actual.default_value
                );
            }
            if actual.is_primary_key != expected.is_primary_key {
                bail!(
                    "Table {} Column {} primary key mismatch: expected {}, got {}",
                    self.name,
                    expected.name,
                    expected.is_primary_key,
                    actual.is_primary_key
                );
            }
        }

        for (index_name, _columns) in self.indices {
            let index_exists: bool = conn
                .query_row(
                    "SELECT 1 FROM sqlite_master WHERE type='index' AND name=?1 AND tbl_name=?2",
                    params![index_name, self.name],
                    |_| Ok(true),
                )
                .unwrap_or(false);
            if !index_exists {
                bail!("Table {} is missing index '{}'", self.name, index_name);
            }
        }

        self.validate_unique_constraints(conn)?;
        self.validate_checks(conn)
    }

    fn validate_unique_constraints(&self, conn: &Connection) -> Result<()> {
        let expected_sets: Vec<Vec<&str>> = self
            .columns
            .iter()
            .filter(|c| c.is_unique)
            .map(|c| vec![c.name])
            .chain(self.unique_constraints.iter().map(|cols| cols.to_vec()))
            .collect();
        if expected_sets.is_empty() {
            return Ok(());
        }

        // SQLite stores unique constraints as indices with unique=1
        let mut stmt = conn.prepare(&format!("PRAGMA index_list({})", self.name))?;
        let unique_indices: Vec<String> = stmt
            .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, i32>(2)?)))?
            .filter_map(|r| r.ok())
            .filter(|(_, is_unique)| *is_unique == 1)
            .map(|(name, _)| name)
            .collect();

        let mut unique_index_columns: Vec<Vec<String>> = Vec::new();
        for index_name in &unique_indices {
            let mut idx_stmt = conn.prepare(&format!("PRAGMA index_info({})", index_name))?;
            let mut cols: Vec<String> = idx_stmt
                .query_map([], |row| row.get::<_, String>(2))?
                .filter_map(|r| r.ok())
                .collect();
            cols.sort();
            unique_index_columns.push(cols);
        }

        for mut expected in expected_sets {
            expected.sort();
            let found = unique_index_columns
                .iter()
                .any(|actual| actual.iter().map(|s| s.as_str()).eq(expected.iter().copied()));
            if !found {
                bail!(
                    "Table {} is missing unique constraint on columns ({})",
                    self.name,
                    expected.join(", ")
                );
            }
        }
        Ok(())
    }

    fn validate_checks(&self, conn: &Connection) -> Result<()> {
        if self.columns.iter().all(|c| c.check.is_none()) {
            return Ok(());
        }
        let table_sql: String = conn
            .query_row(
                "SELECT sql FROM sqlite_master WHERE type='table' AND name=?1",
                params![self.name],
                |row| row.get(0),
            )
            .with_context(|| format!("Failed to read definition of table {}", self.name))?;
        let normalized = normalize_sql(&table_sql);
        for column in self.columns {
            if let Some(check) = column.check {
                if !normalized.contains(&normalize_sql(&format!("CHECK ({})", check))) {
                    bail!(
                        "Table {} column {} is missing check constraint: {}",
                        self.name,
                        column.name,
                        check
                    );
                }
            }
        }
        Ok(())
    }
}

fn strip_leading_and_trailing_parentheses<S: AsRef<str>>(s: S) -> String {
    let s = s.as_ref();
    if s.starts_with('(') && s.ends_with(')') {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

fn normalize_sql(sql: &str) -> String {
    sql.chars().filter(|c| !c.is_whitespace()).collect()
}

pub struct VersionedSchema {
    pub version: usize,
    pub tables: &'static [Table],
    pub migration: Option<fn(&Connection) -> Result<()>>,
}

impl VersionedSchema {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            table.create(conn)?;
        }
        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + self.version),
            [],
        )?;
        Ok(())
    }

    pub fn validate(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            table.validate(conn)?;
        }
        Ok(())
    }
}

/// Opens the schema stored in `conn`, creating the latest version on a fresh
/// database, validating the stored version and running pending migrations.
///
/// Returns the schema version the database ends up at.
pub fn open_versioned(
    conn: &Connection,
    schemas: &'static [VersionedSchema],
    is_new: bool,
) -> Result<usize> {
    let latest = schemas.last().context("No schema versions defined")?;
    if is_new {
        latest.create(conn)?;
    }

    let db_version = conn
        .query_row("PRAGMA user_version;", [], |row| row.get::<usize, i64>(0))
        .context("Failed to read database version")?
        - BASE_DB_VERSION as i64;

    if db_version < 0 {
        bail!(
            "Database version {} is too old, does not contain base db version {}",
            db_version,
            BASE_DB_VERSION
        );
    }
    let version = db_version as usize;
    if version >= schemas.len() {
        bail!("Database version {} is too new", db_version);
    }
    schemas
        .get(version)
        .context("Failed to get schema")?
        .validate(conn)?;

    migrate_if_needed(conn, schemas, version)
}

fn migrate_if_needed(
    conn: &Connection,
    schemas: &'static [VersionedSchema],
    version: usize,
) -> Result<usize> {
    let mut latest_from = version;
    for schema in schemas.iter().skip(version + 1) {
        if let Some(migration_fn) = schema.migration {
            info!(
                "Migrating db from version {} to {}",
                latest_from, schema.version
            );
            migration_fn(conn)?;
            latest_from = schema.version;
        }
    }
    conn.execute(
        &format!("PRAGMA user_version = {}", BASE_DB_VERSION + latest_from),
        [],
    )?;
    Ok(latest_from)
}
