//! Package file creation and opening
//!
//! A package is an OGC GeoPackage: an SQLite file with the `gpkg_*` core
//! tables, the `gpkg_ogr_contents` feature-count side table, and one feature
//! table per geography layer. Creation is the only destructive operation in
//! the package lifecycle; everything after it is additive.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use tracing::info;

/// `GPKG` in ASCII
pub const GPKG_APPLICATION_ID: i64 = 0x4750_4B47;
/// GeoPackage 1.3.0
pub const GPKG_USER_VERSION: i64 = 10300;
/// NAD83 geographic, the TIGER/Line coordinate system
pub const NAD83_SRS_ID: i64 = 4269;

/// Create a fresh package, replacing any file at `path`
pub async fn create_package(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    if path.exists() {
        info!("Replacing existing package: {}", path.display());
        std::fs::remove_file(path)?;
    }

    let pool = connect(path, true).await?;

    sqlx::query(&format!("PRAGMA application_id = {}", GPKG_APPLICATION_ID))
        .execute(&pool)
        .await?;
    sqlx::query(&format!("PRAGMA user_version = {}", GPKG_USER_VERSION))
        .execute(&pool)
        .await?;

    create_core_tables(&pool).await?;
    info!("Initialized new package: {}", path.display());
    Ok(pool)
}

/// Open an existing package for additive updates
pub async fn open_package(path: &Path) -> Result<SqlitePool> {
    if !path.exists() {
        return Err(crate::Error::NotFound(format!("package {}", path.display())));
    }
    let pool = connect(path, false).await?;
    // Packages written by older builds may predate the provenance table
    create_provenance_table(&pool).await?;
    info!("Opened existing package: {}", path.display());
    Ok(pool)
}

/// Single-connection pool: one writer per pipeline step
async fn connect(path: &Path, create: bool) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(create)
        .busy_timeout(std::time::Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// GeoPackage core tables plus the provenance ledger
pub async fn create_core_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS gpkg_spatial_ref_sys (
            srs_name TEXT NOT NULL,
            srs_id INTEGER NOT NULL PRIMARY KEY,
            organization TEXT NOT NULL,
            organization_coordsys_id INTEGER NOT NULL,
            definition TEXT NOT NULL,
            description TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        INSERT OR IGNORE INTO gpkg_spatial_ref_sys
            (srs_name, srs_id, organization, organization_coordsys_id, definition, description)
        VALUES
            ('Undefined cartesian SRS', -1, 'NONE', -1, 'undefined', 'undefined cartesian coordinate reference system'),
            ('Undefined geographic SRS', 0, 'NONE', 0, 'undefined', 'undefined geographic coordinate reference system'),
            ('WGS 84 geodetic', 4326, 'EPSG', 4326,
             'GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0,AUTHORITY["EPSG","8901"]],UNIT["degree",0.0174532925199433,AUTHORITY["EPSG","9122"]],AUTHORITY["EPSG","4326"]]',
             'longitude/latitude coordinates in decimal degrees on the WGS 84 spheroid'),
            ('NAD83', 4269, 'EPSG', 4269,
             'GEOGCS["NAD83",DATUM["North_American_Datum_1983",SPHEROID["GRS 1980",6378137,298.257222101,AUTHORITY["EPSG","7019"]],AUTHORITY["EPSG","6269"]],PRIMEM["Greenwich",0,AUTHORITY["EPSG","8901"]],UNIT["degree",0.0174532925199433,AUTHORITY["EPSG","9122"]],AUTHORITY["EPSG","4269"]]',
             'TIGER/Line native coordinate system')
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS gpkg_contents (
            table_name TEXT NOT NULL PRIMARY KEY,
            data_type TEXT NOT NULL,
            identifier TEXT UNIQUE,
            description TEXT DEFAULT '',
            last_change DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
            min_x DOUBLE,
            min_y DOUBLE,
            max_x DOUBLE,
            max_y DOUBLE,
            srs_id INTEGER,
            CONSTRAINT fk_gc_r_srs_id FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys(srs_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS gpkg_geometry_columns (
            table_name TEXT NOT NULL,
            column_name TEXT NOT NULL,
            geometry_type_name TEXT NOT NULL,
            srs_id INTEGER NOT NULL,
            z TINYINT NOT NULL,
            m TINYINT NOT NULL,
            CONSTRAINT pk_geom_cols PRIMARY KEY (table_name, column_name),
            CONSTRAINT fk_gc_tn FOREIGN KEY (table_name) REFERENCES gpkg_contents(table_name),
            CONSTRAINT fk_gc_srs FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys (srs_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS gpkg_extensions (
            table_name TEXT,
            column_name TEXT,
            extension_name TEXT NOT NULL,
            definition TEXT NOT NULL,
            scope TEXT NOT NULL,
            CONSTRAINT ge_tce UNIQUE (table_name, column_name, extension_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS gpkg_ogr_contents (
            table_name TEXT NOT NULL PRIMARY KEY,
            feature_count INTEGER DEFAULT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    create_provenance_table(pool).await?;
    Ok(())
}

async fn create_provenance_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rdpkg_provenance (
            step TEXT PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            details TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_sets_geopackage_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("pkg.gpkg");
        let pool = create_package(&path).await.unwrap();

        let app_id: i64 = sqlx::query_scalar("PRAGMA application_id")
            .fetch_one(&pool)
            .await
            .unwrap();
        let version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(app_id, GPKG_APPLICATION_ID);
        assert_eq!(version, GPKG_USER_VERSION);

        let srs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM gpkg_spatial_ref_sys")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(srs, 4);
    }

    #[tokio::test]
    async fn test_create_replaces_and_open_requires_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pkg.gpkg");

        assert!(open_package(&path).await.is_err());

        let pool = create_package(&path).await.unwrap();
        sqlx::query("CREATE TABLE scratch (x INTEGER)")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;

        let pool = create_package(&path).await.unwrap();
        let scratch: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE name = 'scratch'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(scratch, 0);
        pool.close().await;

        assert!(open_package(&path).await.is_ok());
    }
}
