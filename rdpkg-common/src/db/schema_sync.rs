//! Typed schema definitions and automatic column synchronization
//!
//! Table layouts are data: a [`TableDefinition`] holds column and index specs
//! and renders DDL/DML from them, so `CREATE TABLE` and `ALTER TABLE ADD
//! COLUMN` share one source of truth. Identifiers are validated and quoted;
//! values always travel as bound parameters.
//!
//! # Usage
//!
//! ```rust,ignore
//! let table = TableDefinition::new("block20")?
//!     .column(ColumnDefinition::new("fid", "INTEGER").primary_key().autoincrement())
//!     .column(ColumnDefinition::new("geoid", "TEXT").not_null().unique());
//! sqlx::query(&table.create_sql()).execute(&pool).await?;
//!
//! // Later: widen in place, only adding what is missing
//! SchemaSync::sync_table(&pool, &table.with_column(ColumnDefinition::new("cvap_total", "REAL"))).await?;
//! ```

use crate::{Error, Result};
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Validate an SQL identifier and return it double-quoted
pub fn quote_ident(name: &str) -> Result<String> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::InvalidInput(format!("invalid SQL identifier '{}'", name)));
    }
    Ok(format!("\"{}\"", name))
}

/// Column definition with SQL constraints
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    /// Column name
    pub name: String,
    /// SQL type (e.g., "TEXT", "INTEGER", "REAL", "MULTIPOLYGON")
    pub sql_type: String,
    /// NOT NULL constraint
    pub not_null: bool,
    /// PRIMARY KEY constraint
    pub primary_key: bool,
    /// AUTOINCREMENT (only meaningful on an INTEGER PRIMARY KEY)
    pub autoincrement: bool,
    /// UNIQUE constraint
    pub unique: bool,
    /// DEFAULT value (SQL literal)
    pub default_value: Option<String>,
}

impl ColumnDefinition {
    /// Create new column definition
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            not_null: false,
            primary_key: false,
            autoincrement: false,
            unique: false,
            default_value: None,
        }
    }

    /// Mark column as PRIMARY KEY
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn autoincrement(mut self) -> Self {
        self.autoincrement = true;
        self
    }

    /// Mark column as NOT NULL
    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    /// Mark column as UNIQUE
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Set DEFAULT value
    pub fn default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Column clause for CREATE TABLE
    fn create_clause(&self) -> Result<String> {
        let mut sql = format!("{} {}", quote_ident(&self.name)?, self.sql_type);
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
            if self.autoincrement {
                sql.push_str(" AUTOINCREMENT");
            }
        }
        if self.not_null {
            sql.push_str(" NOT NULL");
        }
        if self.unique {
            sql.push_str(" UNIQUE");
        }
        if let Some(default) = &self.default_value {
            sql.push_str(&format!(" DEFAULT {}", default));
        }
        Ok(sql)
    }
}

/// Secondary index definition
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDefinition {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// Complete layout of one table
#[derive(Debug, Clone, PartialEq)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    pub indexes: Vec<IndexDefinition>,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        quote_ident(&name)?;
        Ok(Self {
            name,
            columns: Vec::new(),
            indexes: Vec::new(),
        })
    }

    pub fn column(mut self, column: ColumnDefinition) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_column(&self, column: ColumnDefinition) -> Self {
        self.clone().column(column)
    }

    /// Ordered index over `columns`, named `idx_{table}_{columns}`
    pub fn index(mut self, columns: &[&str], unique: bool) -> Self {
        self.indexes.push(IndexDefinition {
            name: format!("idx_{}_{}", self.name, columns.join("_")),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique,
        });
        self
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn create_sql(&self) -> Result<String> {
        let clauses = self
            .columns
            .iter()
            .map(ColumnDefinition::create_clause)
            .collect::<Result<Vec<_>>>()?;
        Ok(format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            quote_ident(&self.name)?,
            clauses.join(",\n    ")
        ))
    }

    pub fn create_index_sql(&self) -> Result<Vec<String>> {
        self.indexes
            .iter()
            .map(|index| {
                let columns = index
                    .columns
                    .iter()
                    .map(|c| quote_ident(c))
                    .collect::<Result<Vec<_>>>()?;
                Ok(format!(
                    "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
                    if index.unique { "UNIQUE " } else { "" },
                    quote_ident(&index.name)?,
                    quote_ident(&self.name)?,
                    columns.join(", ")
                ))
            })
            .collect()
    }

    /// `INSERT INTO t (a, b) VALUES (?, ?)` for the given columns
    pub fn insert_sql(&self, columns: &[&str]) -> Result<String> {
        let quoted = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Result<Vec<_>>>()?;
        let placeholders = vec!["?"; columns.len()].join(", ");
        Ok(format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&self.name)?,
            quoted.join(", "),
            placeholders
        ))
    }
}

/// `UPDATE t SET a = ?, b = ? WHERE key = ?`
pub fn update_by_key_sql(table: &str, key: &str, columns: &[&str]) -> Result<String> {
    let assignments = columns
        .iter()
        .map(|c| Ok(format!("{} = ?", quote_ident(c)?)))
        .collect::<Result<Vec<_>>>()?;
    Ok(format!(
        "UPDATE {} SET {} WHERE {} = ?",
        quote_ident(table)?,
        assignments.join(", "),
        quote_ident(key)?
    ))
}

/// Actual column from database introspection (PRAGMA table_info result)
#[derive(Debug, Clone)]
pub struct ActualColumn {
    /// Column ID (position in table)
    pub cid: i32,
    /// Column name
    pub name: String,
    /// SQL type from PRAGMA table_info
    pub type_name: String,
    /// NOT NULL constraint
    pub not_null: bool,
    /// DEFAULT value
    pub default_value: Option<String>,
    /// PRIMARY KEY flag
    pub pk: bool,
}

/// Schema drift detected between expected and actual schema
#[derive(Debug, Clone)]
pub enum SchemaDrift {
    /// Column missing from database
    MissingColumn {
        table: String,
        column: ColumnDefinition,
    },
    /// Column type mismatch (cannot auto-fix)
    TypeMismatch {
        table: String,
        column: String,
        expected: String,
        actual: String,
    },
}

/// Schema introspection - read actual database schema
pub struct SchemaIntrospector;

impl SchemaIntrospector {
    /// Read actual columns from a table, in cid order
    pub async fn introspect_table(pool: &SqlitePool, table_name: &str) -> Result<Vec<ActualColumn>> {
        let rows = sqlx::query(
            "SELECT cid, name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?)",
        )
        .bind(table_name)
        .fetch_all(pool)
        .await?;

        let mut columns: Vec<ActualColumn> = rows
            .iter()
            .map(|row| ActualColumn {
                cid: row.get("cid"),
                name: row.get("name"),
                type_name: row.get("type"),
                not_null: row.get::<i32, _>("notnull") != 0,
                default_value: row.get("dflt_value"),
                pk: row.get::<i32, _>("pk") != 0,
            })
            .collect();

        columns.sort_by_key(|c| c.cid);
        Ok(columns)
    }

    /// Check if table exists
    pub async fn table_exists(pool: &SqlitePool, table_name: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM sqlite_master
                WHERE type='table' AND name = ?
            )
            "#,
        )
        .bind(table_name)
        .fetch_one(pool)
        .await?;

        Ok(exists)
    }

    /// Names of the columns a table currently has
    pub async fn column_names(pool: &SqlitePool, table_name: &str) -> Result<HashSet<String>> {
        let names: Vec<String> = sqlx::query_scalar("SELECT name FROM pragma_table_info(?)")
            .bind(table_name)
            .fetch_all(pool)
            .await?;
        Ok(names.into_iter().collect())
    }

    pub async fn column_exists(pool: &SqlitePool, table_name: &str, column: &str) -> Result<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?")
                .bind(table_name)
                .bind(column)
                .fetch_one(pool)
                .await?;
        Ok(count > 0)
    }
}

/// Schema comparison - detect drift between expected and actual
pub struct SchemaDiff;

impl SchemaDiff {
    pub fn compare(
        table_name: &str,
        expected: &[ColumnDefinition],
        actual: &[ActualColumn],
    ) -> Vec<SchemaDrift> {
        let mut drift = Vec::new();

        for expected_col in expected {
            match actual.iter().find(|c| c.name == expected_col.name) {
                Some(actual_col) => {
                    if !Self::types_compatible(&expected_col.sql_type, &actual_col.type_name) {
                        drift.push(SchemaDrift::TypeMismatch {
                            table: table_name.to_string(),
                            column: expected_col.name.clone(),
                            expected: expected_col.sql_type.clone(),
                            actual: actual_col.type_name.clone(),
                        });
                    }
                }
                None => drift.push(SchemaDrift::MissingColumn {
                    table: table_name.to_string(),
                    column: expected_col.clone(),
                }),
            }
        }

        drift
    }

    /// Check if SQL types are compatible (SQLite type affinity rules)
    fn types_compatible(expected: &str, actual: &str) -> bool {
        let exp = expected.to_uppercase();
        let act = actual.to_uppercase();

        if exp == act {
            return true;
        }

        let int = |t: &str| t.contains("INT");
        let text = |t: &str| t.contains("TEXT") || t.contains("CHAR") || t.contains("CLOB");
        let real = |t: &str| t.contains("REAL") || t.contains("FLOAT") || t.contains("DOUBLE");

        (int(&exp) && int(&act)) || (text(&exp) && text(&act)) || (real(&exp) && real(&act))
    }
}

/// Schema synchronization - apply additive schema changes
pub struct SchemaSync;

impl SchemaSync {
    /// Add every column of `table` that the database table lacks
    ///
    /// Returns the names of the columns added. Type mismatches are logged and
    /// left alone; column removal and constraint changes are never attempted.
    pub async fn sync_table(pool: &SqlitePool, table: &TableDefinition) -> Result<Vec<String>> {
        debug!("Schema sync: Checking table '{}'", table.name);

        if !SchemaIntrospector::table_exists(pool, &table.name).await? {
            return Err(Error::NotFound(format!("table '{}'", table.name)));
        }

        let actual = SchemaIntrospector::introspect_table(pool, &table.name).await?;
        let drift = SchemaDiff::compare(&table.name, &table.columns, &actual);

        let mut added = Vec::new();
        for change in drift {
            match change {
                SchemaDrift::MissingColumn { table, column } => {
                    Self::add_column(pool, &table, &column).await?;
                    added.push(column.name);
                }
                SchemaDrift::TypeMismatch {
                    table,
                    column,
                    expected,
                    actual,
                } => {
                    warn!(
                        "Type mismatch in {}.{}: expected '{}', found '{}'; leaving as is",
                        table, column, expected, actual
                    );
                }
            }
        }

        if !added.is_empty() {
            info!(table = %table.name, columns = added.len(), "Added missing columns");
        }
        Ok(added)
    }

    /// Add missing column to table via ALTER TABLE ADD COLUMN
    async fn add_column(pool: &SqlitePool, table: &str, column: &ColumnDefinition) -> Result<()> {
        let mut sql = format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            quote_ident(table)?,
            quote_ident(&column.name)?,
            column.sql_type
        );

        // SQLite cannot add PRIMARY KEY or UNIQUE columns, nor NOT NULL without a default
        if column.primary_key || column.unique {
            warn!(
                "Cannot add constrained column {}.{} via ALTER TABLE; adding it unconstrained",
                table, column.name
            );
        }
        match (&column.default_value, column.not_null) {
            (Some(default), true) => sql.push_str(&format!(" NOT NULL DEFAULT {}", default)),
            (Some(default), false) => sql.push_str(&format!(" DEFAULT {}", default)),
            (None, true) => warn!(
                "Cannot add NOT NULL column {}.{} without DEFAULT; adding it nullable",
                table, column.name
            ),
            (None, false) => {}
        }

        debug!("Adding column: {}.{} ({})", table, column.name, column.sql_type);

        match sqlx::query(&sql).execute(pool).await {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.message().contains("duplicate column") => {
                debug!("Column {}.{} already present", table, column.name);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
