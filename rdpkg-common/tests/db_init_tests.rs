//! Package creation, layer registration and additive step tests

use rdpkg_common::db::init::{create_package, open_package};
use rdpkg_common::db::layers::{create_layer, feature_count, layer_table, update_extent};
use rdpkg_common::db::migrations::{applied_steps, run_step, MigrationStep, StepOutcome};
use rdpkg_common::db::schema_sync::{SchemaIntrospector, SchemaSync};
use rdpkg_common::geography::GeographyCatalog;
use rdpkg_common::{DecennialYear, Error};

#[tokio::test]
async fn test_package_with_all_applicable_layers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ct.gpkg");
    let pool = create_package(&path).await.unwrap();
    let catalog = GeographyCatalog::new();

    for geography in catalog.applicable("CT") {
        let table = layer_table(geography, DecennialYear::Y2020).unwrap();
        assert!(create_layer(&pool, &table, geography.display_name).await.unwrap());
    }

    let layers: Vec<String> = sqlx::query_scalar(
        "SELECT table_name FROM gpkg_contents WHERE data_type = 'features' ORDER BY table_name",
    )
    .fetch_all(&pool)
    .await
    .unwrap();
    assert!(layers.contains(&"block20".to_string()));
    assert!(layers.contains(&"concity20".to_string()));
    assert_eq!(layers.len(), catalog.applicable("CT").count());

    for layer in &layers {
        assert_eq!(feature_count(&pool, layer).await.unwrap(), 0);
    }
}

#[tokio::test]
async fn test_consolidated_city_skipped_outside_listed_states() {
    let catalog = GeographyCatalog::new();
    assert!(catalog.applicable("CA").all(|g| g.code != "concity"));
}

#[tokio::test]
async fn test_extent_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let pool = create_package(&dir.path().join("pkg.gpkg")).await.unwrap();
    let catalog = GeographyCatalog::new();
    let table = layer_table(catalog.get("county").unwrap(), DecennialYear::Y2020).unwrap();
    create_layer(&pool, &table, "County").await.unwrap();

    update_extent(&pool, "county20", (-73.7, 40.9, -71.8, 42.1)).await.unwrap();

    let (min_x, max_y): (f64, f64) =
        sqlx::query_as("SELECT min_x, max_y FROM gpkg_contents WHERE table_name = 'county20'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(min_x, -73.7);
    assert_eq!(max_y, 42.1);
}

#[tokio::test]
async fn test_reopened_package_keeps_provenance_and_adds_columns() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pkg.gpkg");
    let catalog = GeographyCatalog::new();
    let table = layer_table(catalog.get("tract").unwrap(), DecennialYear::Y2010).unwrap();

    {
        let pool = create_package(&path).await.unwrap();
        create_layer(&pool, &table, "Tract").await.unwrap();
        let step = MigrationStep::table_absent("layer:tract10", "tract10");
        // Table already exists, so the step is recorded as applied without running
        let outcome: StepOutcome<()> = run_step(&pool, &step, || async { Ok::<_, Error>(()) })
            .await
            .unwrap();
        assert_eq!(outcome, StepOutcome::AlreadyApplied);
        pool.close().await;
    }

    let pool = open_package(&path).await.unwrap();
    let extended = table.with_column(
        rdpkg_common::db::ColumnDefinition::new("reg_total", "INTEGER"),
    );
    let added = SchemaSync::sync_table(&pool, &extended).await.unwrap();
    assert_eq!(added, vec!["reg_total".to_string()]);
    assert!(SchemaIntrospector::column_exists(&pool, "tract10", "reg_total")
        .await
        .unwrap());

    let again = SchemaSync::sync_table(&pool, &extended).await.unwrap();
    assert!(again.is_empty());
    assert!(applied_steps(&pool).await.unwrap().is_empty());
}
