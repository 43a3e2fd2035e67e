//! Layer writer
//!
//! Creates a geography layer if needed and bulk-loads its records in one
//! transaction, writing GeoPackage geometry blobs and the matching RTree
//! rows. A layer that already holds features is left untouched, so the same
//! package can be extended by later runs. Failures are returned in the
//! [`LayerWriteOutcome`] rather than raised.

use crate::services::gpkg_geometry::{encode_multipolygon, extent, merge_extent, Extent};
use geo::MultiPolygon;
use rdpkg_common::db::init::NAD83_SRS_ID;
use rdpkg_common::db::layers::{create_layer, feature_count, layer_table, rtree_name, update_extent, GEOMETRY_COLUMN};
use rdpkg_common::db::migrations::record_provenance;
use rdpkg_common::db::schema_sync::{quote_ident, SchemaSync, TableDefinition};
use rdpkg_common::geography::Geography;
use rdpkg_common::DecennialYear;
use serde::Serialize;
use sqlx::sqlite::{Sqlite, SqliteArguments};
use sqlx::query::Query;
use sqlx::SqlitePool;
use std::collections::HashMap;
use tracing::{info, warn};

/// A column value bound into an insert or update
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(v) => Some(*v as f64),
            FieldValue::Real(v) => Some(*v),
            _ => None,
        }
    }

    pub fn from_option_f64(value: Option<f64>) -> Self {
        value.map(FieldValue::Real).unwrap_or(FieldValue::Null)
    }

    /// Bind onto a query
    pub fn bind<'q>(
        self,
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        match self {
            FieldValue::Null => query.bind(None::<i64>),
            FieldValue::Integer(v) => query.bind(v),
            FieldValue::Real(v) => query.bind(v),
            FieldValue::Text(v) => query.bind(v),
        }
    }
}

/// One feature to be written: id, attribute values, polygon
#[derive(Debug, Clone, PartialEq)]
pub struct LayerRecord {
    pub geoid: String,
    pub values: HashMap<&'static str, FieldValue>,
    pub geometry: Option<MultiPolygon<f64>>,
}

/// Result of writing one layer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerWriteOutcome {
    pub table: String,
    pub success: bool,
    pub rows_written: usize,
    /// Layer already held features and was left as is
    pub skipped: bool,
    pub error: Option<String>,
}

impl LayerWriteOutcome {
    fn failed(table: &str, error: impl std::fmt::Display) -> Self {
        Self {
            table: table.to_string(),
            success: false,
            rows_written: 0,
            skipped: false,
            error: Some(error.to_string()),
        }
    }
}

/// Create (if needed) and populate the layer for `geography`
pub async fn write_layer(
    pool: &SqlitePool,
    geography: &Geography,
    year: DecennialYear,
    records: Vec<LayerRecord>,
) -> LayerWriteOutcome {
    let table_name = geography.table_name(year);
    match try_write_layer(pool, geography, year, records).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(layer = %table_name, error = %e, "Layer write failed");
            LayerWriteOutcome::failed(&table_name, e)
        }
    }
}

async fn try_write_layer(
    pool: &SqlitePool,
    geography: &Geography,
    year: DecennialYear,
    records: Vec<LayerRecord>,
) -> rdpkg_common::Result<LayerWriteOutcome> {
    let table = layer_table(geography, year)?;

    if !create_layer(pool, &table, geography.display_name).await? {
        let added = SchemaSync::sync_table(pool, &table).await?;
        if !added.is_empty() {
            info!(layer = %table.name, columns = ?added, "Widened existing layer");
        }
        if feature_count(pool, &table.name).await? > 0 {
            info!(layer = %table.name, "Layer already populated, skipping");
            return Ok(LayerWriteOutcome {
                table: table.name.clone(),
                success: true,
                rows_written: 0,
                skipped: true,
                error: None,
            });
        }
    }

    let (rows_written, bounds) = insert_records(pool, &table, records).await?;
    if let Some(bounds) = bounds {
        update_extent(pool, &table.name, bounds).await?;
    }

    record_provenance(
        pool,
        &format!("layer:{}", table.name),
        &serde_json::json!({ "rows": rows_written }),
    )
    .await?;

    info!(layer = %table.name, rows = rows_written, "Layer written");
    Ok(LayerWriteOutcome {
        table: table.name.clone(),
        success: true,
        rows_written,
        skipped: false,
        error: None,
    })
}

async fn insert_records(
    pool: &SqlitePool,
    table: &TableDefinition,
    records: Vec<LayerRecord>,
) -> rdpkg_common::Result<(usize, Option<Extent>)> {
    let columns: Vec<&str> = table
        .column_names()
        .filter(|c| *c != "fid" && *c != GEOMETRY_COLUMN && *c != "geoid")
        .collect();
    let mut insert_columns = vec!["geoid"];
    insert_columns.extend(columns.iter().copied());
    insert_columns.push(GEOMETRY_COLUMN);

    let insert_sql = table.insert_sql(&insert_columns)?;
    let rtree_sql = format!(
        "INSERT INTO {} (id, minx, maxx, miny, maxy) VALUES (?, ?, ?, ?, ?)",
        quote_ident(&rtree_name(&table.name))?
    );

    let mut bounds: Option<Extent> = None;
    let mut written = 0usize;
    let mut tx = pool.begin().await?;

    for mut record in records {
        let feature_extent = record.geometry.as_ref().and_then(extent);
        let blob = record
            .geometry
            .as_ref()
            .map(|g| encode_multipolygon(g, NAD83_SRS_ID as i32));

        let mut query = sqlx::query(&insert_sql).bind(record.geoid);
        for column in &columns {
            let value = record.values.remove(*column).unwrap_or(FieldValue::Null);
            query = value.bind(query);
        }
        let result = query.bind(blob).execute(&mut *tx).await?;

        if let Some((min_x, min_y, max_x, max_y)) = feature_extent {
            sqlx::query(&rtree_sql)
                .bind(result.last_insert_rowid())
                .bind(min_x)
                .bind(max_x)
                .bind(min_y)
                .bind(max_y)
                .execute(&mut *tx)
                .await?;
        }

        bounds = merge_extent(bounds, feature_extent);
        written += 1;
    }

    tx.commit().await?;
    Ok((written, bounds))
}
