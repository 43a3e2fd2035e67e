//! Column overlays on existing layers
//!
//! The shared pattern behind CVAP, voter-file and equivalency imports: add
//! the missing columns to a layer, then `UPDATE ... WHERE key = ?` in nine
//! roughly equal batches, reporting progress after each one.

use crate::services::package_writer::FieldValue;
use crate::utils::text::decode_field;
use rdpkg_common::db::schema_sync::{update_by_key_sql, ColumnDefinition, SchemaSync, TableDefinition};
use rdpkg_common::{Cancelled, Progress};
use sqlx::SqlitePool;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Number of batches an overlay update is split into
pub const OVERLAY_BATCHES: usize = 9;

/// Errors from the batched update itself
#[derive(Debug, Error)]
pub enum BatchUpdateError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Schema(#[from] rdpkg_common::Error),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// Errors from voter-file and equivalency imports
#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("CSV error in {file}: {message}")]
    Csv { file: String, message: String },

    #[error("{file} has no '{column}' column")]
    MissingColumn { file: String, column: String },

    #[error("Target layer '{0}' is missing from the package")]
    MissingTable(String),

    #[error("{file}: column '{column}' would overwrite {owner}")]
    ColumnConflict { file: String, column: String, owner: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Common(#[from] rdpkg_common::Error),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl From<BatchUpdateError> for OverlayError {
    fn from(e: BatchUpdateError) -> Self {
        match e {
            BatchUpdateError::Database(e) => OverlayError::Database(e),
            BatchUpdateError::Schema(e) => OverlayError::Common(e),
            BatchUpdateError::Cancelled(c) => OverlayError::Cancelled(c),
        }
    }
}

/// Field delimiter implied by a file's extension
pub fn delimiter_for(path: &Path) -> u8 {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("txt") | Some("psv") => b'|',
        Some("tsv") => b'\t',
        _ => b',',
    }
}

/// A delimited file read fully into memory, fields trimmed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DelimitedTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl DelimitedTable {
    /// Index of a header, compared case-insensitively
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h.eq_ignore_ascii_case(name))
    }

    pub fn require(&self, file: &Path, name: &str) -> Result<usize, OverlayError> {
        self.column(name).ok_or_else(|| OverlayError::MissingColumn {
            file: file.display().to_string(),
            column: name.to_string(),
        })
    }
}

/// Read a delimited file, tolerating Latin-1 text and ragged rows
pub fn read_delimited(path: &Path) -> Result<DelimitedTable, OverlayError> {
    let file = path.display().to_string();
    let csv_err = |e: csv::Error| OverlayError::Csv {
        file: file.clone(),
        message: e.to_string(),
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter_for(path))
        .flexible(true)
        .from_path(path)
        .map_err(csv_err)?;
    let headers = reader.byte_headers().map_err(csv_err)?.iter().map(decode_field).collect();

    let mut rows = Vec::new();
    let mut record = csv::ByteRecord::new();
    while reader.read_byte_record(&mut record).map_err(csv_err)? {
        rows.push(record.iter().map(decode_field).collect());
    }
    debug!(file = %file, rows = rows.len(), "Read delimited file");
    Ok(DelimitedTable { headers, rows })
}

/// One keyed row of new column values, aligned with the update's columns
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedValues {
    pub key: String,
    pub values: Vec<FieldValue>,
}

/// Add any of `columns` missing from `table`; returns the names added
pub async fn add_columns(
    pool: &SqlitePool,
    table: &str,
    columns: &[(String, &'static str)],
) -> Result<Vec<String>, BatchUpdateError> {
    let mut definition = TableDefinition::new(table)?;
    for (name, sql_type) in columns {
        definition = definition.column(ColumnDefinition::new(name.clone(), *sql_type));
    }
    Ok(SchemaSync::sync_table(pool, &definition).await?)
}

/// Batch size giving [`OVERLAY_BATCHES`] roughly equal batches
pub fn batch_size(rows: usize) -> usize {
    rows.div_ceil(OVERLAY_BATCHES).max(1)
}

/// Apply keyed updates in batches; returns the number of rows changed
pub async fn update_in_batches(
    pool: &SqlitePool,
    table: &str,
    key_column: &str,
    columns: &[&str],
    rows: Vec<KeyedValues>,
    progress: &Progress,
) -> Result<u64, BatchUpdateError> {
    let sql = update_by_key_sql(table, key_column, columns)?;
    let size = batch_size(rows.len());
    let batches = rows.len().div_ceil(size);
    let mut changed = 0u64;

    let mut rows = rows.into_iter().peekable();
    let mut done = 0usize;
    while rows.peek().is_some() {
        let mut tx = pool.begin().await?;
        for row in rows.by_ref().take(size) {
            let mut query = sqlx::query(&sql);
            for value in row.values {
                query = value.bind(query);
            }
            changed += query.bind(row.key).execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;

        done += 1;
        debug!(table, batch = done, batches, "Overlay batch committed");
        progress.step(done, batches)?;
    }

    if batches == 0 {
        progress.checkpoint(100.0)?;
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio_util::sync::CancellationToken;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db(rows: usize) -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query("CREATE TABLE block20 (fid INTEGER PRIMARY KEY, geoid TEXT UNIQUE)")
            .execute(&pool)
            .await
            .unwrap();
        for i in 0..rows {
            sqlx::query("INSERT INTO block20 (geoid) VALUES (?)")
                .bind(format!("{:015}", i))
                .execute(&pool)
                .await
                .unwrap();
        }
        pool
    }

    fn recording() -> (Progress, Arc<Mutex<Vec<f64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (
            Progress::new(move |v| sink.lock().unwrap().push(v), CancellationToken::new()),
            seen,
        )
    }

    #[test]
    fn test_delimiter_for() {
        assert_eq!(delimiter_for(Path::new("equiv.txt")), b'|');
        assert_eq!(delimiter_for(Path::new("equiv.PSV")), b'|');
        assert_eq!(delimiter_for(Path::new("equiv.tsv")), b'\t');
        assert_eq!(delimiter_for(Path::new("equiv.csv")), b',');
        assert_eq!(delimiter_for(Path::new("equiv")), b',');
    }

    #[test]
    fn test_read_delimited_latin1() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("names.psv");
        std::fs::write(&path, b"GEOID|Name\n440010101001000|Pe\xf1a \n440010101001001|\n").unwrap();

        let table = read_delimited(&path).unwrap();
        assert_eq!(table.column("geoid"), Some(0));
        assert_eq!(table.rows[0], vec!["440010101001000".to_string(), "Peña".to_string()]);
        assert_eq!(table.rows[1][1], "");
        assert!(table.require(&path, "district").is_err());
    }

    #[test]
    fn test_batch_size() {
        assert_eq!(batch_size(0), 1);
        assert_eq!(batch_size(9), 1);
        assert_eq!(batch_size(100), 12);
    }

    #[tokio::test]
    async fn test_nine_batches_with_progress() {
        let pool = setup_test_db(100).await;
        let added = add_columns(&pool, "block20", &[("reg_total".to_string(), "INTEGER")])
            .await
            .unwrap();
        assert_eq!(added, vec!["reg_total".to_string()]);

        let rows = (0..100)
            .map(|i| KeyedValues {
                key: format!("{:015}", i),
                values: vec![FieldValue::Integer(i as i64)],
            })
            .collect();
        let (progress, seen) = recording();
        let changed = update_in_batches(&pool, "block20", "geoid", &["reg_total"], rows, &progress)
            .await
            .unwrap();
        assert_eq!(changed, 100);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 9);
        assert_eq!(*seen.last().unwrap(), 100.0);

        let total: i64 = sqlx::query_scalar("SELECT SUM(reg_total) FROM block20")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(total, (0..100).sum::<i64>());
    }

    #[tokio::test]
    async fn test_cancel_stops_after_first_batch() {
        let pool = setup_test_db(18).await;
        add_columns(&pool, "block20", &[("x".to_string(), "INTEGER")])
            .await
            .unwrap();
        let token = CancellationToken::new();
        let progress = Progress::new(|_| {}, token.clone());
        token.cancel();

        let rows = (0..18)
            .map(|i| KeyedValues {
                key: format!("{:015}", i),
                values: vec![FieldValue::Integer(1)],
            })
            .collect();
        let result = update_in_batches(&pool, "block20", "geoid", &["x"], rows, &progress).await;
        assert!(matches!(result, Err(BatchUpdateError::Cancelled(_))));

        let updated: i64 = sqlx::query_scalar("SELECT COUNT(x) FROM block20")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(updated, 2);
    }
}
