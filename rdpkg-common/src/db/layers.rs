//! Geography layer schemas
//!
//! Single source of truth for the feature table of one (geography, year):
//! `fid`, unique `geoid`, the geography's own fields, the population field
//! set, percentages, and a MULTIPOLYGON `geom` column. [`create_layer`] also
//! registers the layer with the GeoPackage catalogue tables and installs the
//! spatial index and maintenance triggers.

use crate::db::init::NAD83_SRS_ID;
use crate::db::schema_sync::{quote_ident, ColumnDefinition, SchemaIntrospector, TableDefinition};
use crate::geography::{FieldSpec, Geography};
use crate::population::{percent_fields, population_fields};
use crate::state::DecennialYear;
use crate::Result;
use sqlx::SqlitePool;
use tracing::info;

/// Geometry column name of every layer
pub const GEOMETRY_COLUMN: &str = "geom";

fn field_column(field: &FieldSpec) -> ColumnDefinition {
    let column = ColumnDefinition::new(field.name, field.sql_type.as_sql());
    if field.nullable {
        column
    } else {
        column.not_null()
    }
}

/// Feature table definition for a geography and census year
pub fn layer_table(geography: &Geography, year: DecennialYear) -> Result<TableDefinition> {
    let mut table = TableDefinition::new(geography.table_name(year))?
        .column(ColumnDefinition::new("fid", "INTEGER").primary_key().autoincrement())
        .column(ColumnDefinition::new("geoid", "TEXT").not_null().unique());

    for field in geography.fields {
        table = table.column(field_column(field));
    }
    for field in population_fields(year) {
        table = table.column(field_column(&field));
    }
    for pct in percent_fields() {
        table = table.column(ColumnDefinition::new(pct.name, "REAL"));
    }
    table = table.column(ColumnDefinition::new(GEOMETRY_COLUMN, "MULTIPOLYGON"));

    for index in geography.indexes {
        table = table.index(index.columns, index.unique);
    }
    Ok(table)
}

/// Name of the RTree virtual table backing a layer's spatial index
pub fn rtree_name(table: &str) -> String {
    format!("rtree_{}_{}", table, GEOMETRY_COLUMN)
}

/// Create and register a layer. Returns `false` if it already existed.
pub async fn create_layer(
    pool: &SqlitePool,
    table: &TableDefinition,
    description: &str,
) -> Result<bool> {
    if SchemaIntrospector::table_exists(pool, &table.name).await? {
        info!(layer = %table.name, "Layer already exists, leaving it in place");
        return Ok(false);
    }

    let mut tx = pool.begin().await?;

    sqlx::query(&table.create_sql()?).execute(&mut *tx).await?;
    for index_sql in table.create_index_sql()? {
        sqlx::query(&index_sql).execute(&mut *tx).await?;
    }

    sqlx::query(
        r#"
        INSERT INTO gpkg_contents (table_name, data_type, identifier, description, srs_id)
        VALUES (?, 'features', ?, ?, ?)
        "#,
    )
    .bind(&table.name)
    .bind(&table.name)
    .bind(description)
    .bind(NAD83_SRS_ID)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO gpkg_geometry_columns (table_name, column_name, geometry_type_name, srs_id, z, m)
        VALUES (?, ?, 'MULTIPOLYGON', ?, 0, 0)
        "#,
    )
    .bind(&table.name)
    .bind(GEOMETRY_COLUMN)
    .bind(NAD83_SRS_ID)
    .execute(&mut *tx)
    .await?;

    sqlx::query("INSERT INTO gpkg_ogr_contents (table_name, feature_count) VALUES (?, 0)")
        .bind(&table.name)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO gpkg_extensions (table_name, column_name, extension_name, definition, scope)
        VALUES (?, ?, 'gpkg_rtree_index', 'http://www.geopackage.org/spec120/#extension_rtree', 'write-only')
        "#,
    )
    .bind(&table.name)
    .bind(GEOMETRY_COLUMN)
    .execute(&mut *tx)
    .await?;

    for statement in index_and_trigger_sql(&table.name)? {
        sqlx::query(&statement).execute(&mut *tx).await?;
    }

    tx.commit().await?;
    info!(layer = %table.name, columns = table.columns.len(), "Created layer");
    Ok(true)
}

/// RTree table plus the geometry, spatial-index and feature-count triggers
fn index_and_trigger_sql(table: &str) -> Result<Vec<String>> {
    let quoted = quote_ident(table)?;
    let rtree = quote_ident(&rtree_name(table))?;
    let geom = quote_ident(GEOMETRY_COLUMN)?;

    Ok(vec![
        format!("CREATE VIRTUAL TABLE {rtree} USING rtree(id, minx, maxx, miny, maxy)"),
        // GeoPackage binary geometries start with the ASCII magic "GP"
        format!(
            "CREATE TRIGGER \"rdpkg_{table}_geom_insert\" BEFORE INSERT ON {quoted} \
             WHEN NEW.{geom} IS NOT NULL AND (length(NEW.{geom}) < 8 OR substr(NEW.{geom}, 1, 2) != X'4750') \
             BEGIN SELECT RAISE(ABORT, 'invalid GeoPackage geometry in {table}'); END"
        ),
        format!(
            "CREATE TRIGGER \"rdpkg_{table}_geom_update\" BEFORE UPDATE OF {geom} ON {quoted} \
             WHEN NEW.{geom} IS NOT NULL AND (length(NEW.{geom}) < 8 OR substr(NEW.{geom}, 1, 2) != X'4750') \
             BEGIN SELECT RAISE(ABORT, 'invalid GeoPackage geometry in {table}'); END"
        ),
        format!(
            "CREATE TRIGGER \"rtree_{table}_geom_delete\" AFTER DELETE ON {quoted} \
             WHEN OLD.{geom} NOT NULL \
             BEGIN DELETE FROM {rtree} WHERE id = OLD.fid; END"
        ),
        format!(
            "CREATE TRIGGER \"trigger_insert_feature_count_{table}\" AFTER INSERT ON {quoted} \
             BEGIN UPDATE gpkg_ogr_contents SET feature_count = feature_count + 1 \
             WHERE lower(table_name) = lower('{table}'); END"
        ),
        format!(
            "CREATE TRIGGER \"trigger_delete_feature_count_{table}\" AFTER DELETE ON {quoted} \
             BEGIN UPDATE gpkg_ogr_contents SET feature_count = feature_count - 1 \
             WHERE lower(table_name) = lower('{table}'); END"
        ),
    ])
}

/// Record a layer's extent in `gpkg_contents`
pub async fn update_extent(
    pool: &SqlitePool,
    table: &str,
    extent: (f64, f64, f64, f64),
) -> Result<()> {
    let (min_x, min_y, max_x, max_y) = extent;
    sqlx::query(
        r#"
        UPDATE gpkg_contents
        SET min_x = ?, min_y = ?, max_x = ?, max_y = ?,
            last_change = strftime('%Y-%m-%dT%H:%M:%fZ','now')
        WHERE table_name = ?
        "#,
    )
    .bind(min_x)
    .bind(min_y)
    .bind(max_x)
    .bind(max_y)
    .bind(table)
    .execute(pool)
    .await?;
    Ok(())
}

/// Feature count as maintained by the triggers
pub async fn feature_count(pool: &SqlitePool, table: &str) -> Result<i64> {
    let count: Option<i64> =
        sqlx::query_scalar("SELECT feature_count FROM gpkg_ogr_contents WHERE table_name = ?")
            .bind(table)
            .fetch_optional(pool)
            .await?;
    Ok(count.unwrap_or(0))
}
