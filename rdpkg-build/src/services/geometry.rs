//! Geometry assembly
//!
//! Gives every geography level its polygons: from a TIGER/Line shapefile
//! when one is published, otherwise by dissolving block polygons on the
//! level's GEOID components. The polygons are then left-joined to the
//! tabulation rows by GEOID to produce the records a layer is written from.

use crate::services::package_writer::{FieldValue, LayerRecord};
use crate::services::tabulation::{TabulationRow, TabulationTable};
use geo::{BooleanOps, MultiPolygon};
use rdpkg_common::geography::{component, FieldSpec, Geography, SqlType};
use rdpkg_common::population::{percent_fields, population_fields, ratio};
use rdpkg_common::DecennialYear;
use shapefile::dbase::FieldValue as DbfValue;
use shapefile::Shape;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Geometry errors
#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("Shapefile error in {0}: {1}")]
    Shapefile(String, String),

    #[error("Shapefile {0} has no GEOID attribute")]
    MissingGeoid(String),
}

/// A polygon feature with its canonical id and name
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub geoid: String,
    pub name: Option<String>,
    pub geometry: Option<MultiPolygon<f64>>,
}

fn dbf_text(record: &shapefile::dbase::Record, field: &str) -> Option<String> {
    match record.get(field)? {
        DbfValue::Character(Some(s)) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        DbfValue::Numeric(Some(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Load polygons from a shapefile, renaming `GEOID{yy}`/`NAME{yy}` (or the
/// unsuffixed names) to the canonical `geoid`/`name`
pub fn load_shapefile(path: &Path, year: DecennialYear) -> Result<Vec<Feature>, GeometryError> {
    let file = path.display().to_string();
    let mut reader = shapefile::Reader::from_path(path)
        .map_err(|e| GeometryError::Shapefile(file.clone(), e.to_string()))?;

    let geoid_fields = [format!("GEOID{}", year.suffix()), "GEOID".to_string()];
    let name_fields = [format!("NAME{}", year.suffix()), "NAME".to_string()];

    let mut features = Vec::new();
    let mut skipped = 0usize;
    for result in reader.iter_shapes_and_records() {
        let (shape, record) =
            result.map_err(|e| GeometryError::Shapefile(file.clone(), e.to_string()))?;

        let geoid = geoid_fields
            .iter()
            .find_map(|f| dbf_text(&record, f))
            .ok_or_else(|| GeometryError::MissingGeoid(file.clone()))?;
        let name = name_fields.iter().find_map(|f| dbf_text(&record, f));

        let geometry = match shape {
            Shape::Polygon(polygon) => Some(MultiPolygon::<f64>::from(polygon)),
            Shape::NullShape => None,
            other => {
                skipped += 1;
                debug!(geoid = %geoid, shape = ?other.shapetype(), "Unsupported shape type");
                None
            }
        };

        features.push(Feature { geoid, name, geometry });
    }

    if skipped > 0 {
        warn!(file = %file, skipped, "Features with unsupported shape types kept without geometry");
    }
    info!(file = %file, features = features.len(), "Loaded shapefile");
    Ok(features)
}

/// Union a set of polygons by pairwise reduction
pub fn union_all(mut parts: Vec<MultiPolygon<f64>>) -> Option<MultiPolygon<f64>> {
    if parts.is_empty() {
        return None;
    }
    while parts.len() > 1 {
        let mut next = Vec::with_capacity(parts.len() / 2 + 1);
        let mut iter = parts.into_iter();
        while let Some(a) = iter.next() {
            match iter.next() {
                Some(b) => next.push(a.union(&b)),
                None => next.push(a),
            }
        }
        parts = next;
    }
    parts.pop()
}

/// Derive a level's polygons by dissolving blocks on its GEOID components
///
/// Each block's component values come from its tabulation row. Blocks with a
/// blank component, or one equal to the component's null sentinel, belong to
/// no unit at this level and are dropped. The GEOID is the concatenation of
/// the component values in the level's component order.
pub fn dissolve_blocks(
    geography: &Geography,
    blocks: &[Feature],
    table: &TabulationTable,
    block_sumlev: &str,
) -> Vec<Feature> {
    let mut groups: BTreeMap<String, Vec<MultiPolygon<f64>>> = BTreeMap::new();
    let mut unassigned = 0usize;

    for block in blocks {
        let Some(row) = table.row_by_geoid(block_sumlev, &block.geoid) else {
            unassigned += 1;
            continue;
        };
        let Some(key) = component_key(geography, table, row) else {
            unassigned += 1;
            continue;
        };
        let entry = groups.entry(key).or_default();
        if let Some(geometry) = &block.geometry {
            entry.push(geometry.clone());
        }
    }

    debug!(
        geography = geography.code,
        units = groups.len(),
        unassigned,
        "Dissolved blocks"
    );

    groups
        .into_iter()
        .map(|(geoid, parts)| Feature {
            geoid,
            name: None,
            geometry: union_all(parts),
        })
        .collect()
}

/// Concatenated component values, or `None` if any is blank or a sentinel
fn component_key(geography: &Geography, table: &TabulationTable, row: &TabulationRow) -> Option<String> {
    let mut key = String::with_capacity(geography.geoid_len());
    for name in geography.components {
        let value = table.attr(row, name)?;
        if component(name).and_then(|c| c.null_sentinel) == Some(value) {
            return None;
        }
        key.push_str(value);
    }
    Some(key)
}

fn typed_value(field: &FieldSpec, raw: Option<String>) -> FieldValue {
    let Some(raw) = raw else {
        return FieldValue::Null;
    };
    match field.sql_type {
        SqlType::Text => FieldValue::Text(raw),
        SqlType::Integer => raw.parse().map(FieldValue::Integer).unwrap_or(FieldValue::Null),
        SqlType::Real => raw.parse().map(FieldValue::Real).unwrap_or(FieldValue::Null),
    }
}

/// Left-join tabulation rows onto features by GEOID
///
/// Only the sources the geography's field specs declare are carried over;
/// population cells and derived percentages are added for every level.
pub fn join_tabulation(
    geography: &Geography,
    year: DecennialYear,
    features: Vec<Feature>,
    table: &TabulationTable,
) -> Vec<LayerRecord> {
    let counts = population_fields(year);
    let tabulated = geography
        .summary_levels
        .iter()
        .map(|s| table.rows_at(s).count())
        .sum::<usize>();
    if tabulated != features.len() {
        warn!(
            geography = geography.code,
            features = features.len(),
            tabulated,
            "Geometry and tabulation counts differ"
        );
    }

    let mut unmatched = 0usize;
    let records: Vec<LayerRecord> = features
        .into_iter()
        .map(|feature| {
            let row = geography
                .summary_levels
                .iter()
                .find_map(|s| table.row_by_geoid(s, &feature.geoid));

            let mut values: HashMap<&'static str, FieldValue> = HashMap::new();
            match row {
                Some(row) => {
                    for field in geography.fields {
                        let raw = field.resolve(|k| table.attr(row, k));
                        values.insert(field.name, typed_value(field, raw));
                    }
                    for field in &counts {
                        let value = field
                            .sources
                            .first()
                            .and_then(|s| table.count(row, s))
                            .map(FieldValue::Integer)
                            .unwrap_or(FieldValue::Null);
                        values.insert(field.name, value);
                    }
                    for pct in percent_fields() {
                        let value = ratio(
                            values.get(pct.numerator).and_then(FieldValue::as_f64),
                            values.get(pct.denominator).and_then(FieldValue::as_f64),
                        );
                        values.insert(pct.name, value.map(FieldValue::Real).unwrap_or(FieldValue::Null));
                    }
                }
                None => unmatched += 1,
            }

            if matches!(values.get("name"), None | Some(FieldValue::Null)) {
                if let Some(name) = feature.name {
                    values.insert("name", FieldValue::Text(name));
                }
            }

            LayerRecord {
                geoid: feature.geoid,
                values,
                geometry: feature.geometry,
            }
        })
        .collect();

    if unmatched > 0 {
        warn!(geography = geography.code, unmatched, "Features without a tabulation record");
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, Area};

    fn unit_square(x: f64, y: f64) -> MultiPolygon<f64> {
        MultiPolygon(vec![polygon![
            (x: x, y: y),
            (x: x + 1.0, y: y),
            (x: x + 1.0, y: y + 1.0),
            (x: x, y: y + 1.0),
            (x: x, y: y),
        ]])
    }

    #[test]
    fn test_union_all_merges_adjacent_squares() {
        let merged = union_all(vec![
            unit_square(0.0, 0.0),
            unit_square(1.0, 0.0),
            unit_square(2.0, 0.0),
        ])
        .unwrap();
        assert_eq!(merged.0.len(), 1);
        assert!((merged.unsigned_area() - 3.0).abs() < 1e-9);
        assert!(union_all(vec![]).is_none());
    }

    const ATTRS: &[&str] = &["STATE", "COUNTY", "TRACT", "BLOCK", "AIANHH", "NAME", "AREALAND", "FUNCSTAT"];

    fn block_row<'a>(geoid: &'a str, aianhh: &'a str) -> (&'a str, &'a str, Vec<&'a str>, Vec<Option<i64>>) {
        (
            "750",
            geoid,
            vec!["44", "001", &geoid[5..11], &geoid[11..], aianhh, "Block", "10", "A"],
            vec![Some(1)],
        )
    }

    fn block_feature(geoid: &str, x: f64) -> Feature {
        Feature {
            geoid: geoid.to_string(),
            name: None,
            geometry: Some(unit_square(x, 0.0)),
        }
    }

    fn block_table() -> TabulationTable {
        TabulationTable::from_records(
            DecennialYear::Y2020,
            ATTRS,
            &["P0020001"],
            vec![
                block_row("440010301001000", "0010"),
                block_row("440010301001001", "0010"),
                block_row("440010301001002", "9999"),
                block_row("440010301001003", ""),
                block_row("440010301001004", "0020"),
                (
                    "280",
                    "440010",
                    vec!["44", "", "", "", "0010", "Narragansett", "1234", "A"],
                    vec![Some(40)],
                ),
                ("040", "44", vec!["44", "", "", "", "", "Rhode Island", "", "A"], vec![Some(100)]),
            ],
        )
    }

    fn blocks() -> Vec<Feature> {
        vec![
            block_feature("440010301001000", 0.0),
            block_feature("440010301001001", 1.0),
            block_feature("440010301001002", 2.0),
            block_feature("440010301001003", 3.0),
            block_feature("440010301001004", 5.0),
            // Not tabulated
            block_feature("440010301001009", 7.0),
        ]
    }

    #[test]
    fn test_dissolve_groups_blocks_by_components() {
        let catalog = rdpkg_common::geography::GeographyCatalog::new();
        let aiannh = catalog.get("aiannh").unwrap();
        let units = dissolve_blocks(aiannh, &blocks(), &block_table(), "750");

        let ids: Vec<&str> = units.iter().map(|u| u.geoid.as_str()).collect();
        assert_eq!(ids, vec!["440010", "440020"]);
        assert!(units.iter().all(|u| u.geoid.len() == aiannh.geoid_len()));

        // Adjacent squares merge into one polygon
        let merged = units[0].geometry.as_ref().unwrap();
        assert_eq!(merged.0.len(), 1);
        assert!((merged.unsigned_area() - 2.0).abs() < 1e-9);
        assert!((units[1].geometry.as_ref().unwrap().unsigned_area() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_dissolve_state_covers_every_tabulated_block() {
        let catalog = rdpkg_common::geography::GeographyCatalog::new();
        let state = catalog.get("state").unwrap();
        let units = dissolve_blocks(state, &blocks(), &block_table(), "750");
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].geoid, "44");
        assert!((units[0].geometry.as_ref().unwrap().unsigned_area() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_join_carries_declared_fields_only() {
        let catalog = rdpkg_common::geography::GeographyCatalog::new();
        let aiannh = catalog.get("aiannh").unwrap();
        let table = block_table();
        let units = dissolve_blocks(aiannh, &blocks(), &table, "750");

        // Two dissolved units against one tabulated record
        let records = join_tabulation(aiannh, DecennialYear::Y2020, units, &table);
        assert_eq!(records.len(), 2);

        let matched = &records[0];
        assert_eq!(matched.geoid, "440010");
        assert_eq!(matched.values.get("name"), Some(&FieldValue::Text("Narragansett".into())));
        assert_eq!(matched.values.get("aland"), Some(&FieldValue::Integer(1234)));
        assert_eq!(matched.values.get("pop_total"), Some(&FieldValue::Integer(40)));
        assert_eq!(matched.values.get("pop_black"), Some(&FieldValue::Null));
        assert_eq!(matched.values.get("pct_black"), Some(&FieldValue::Null));
        assert!(!matched.values.contains_key("FUNCSTAT"));
        assert!(!matched.values.contains_key("funcstat"));
        assert!(matched.geometry.is_some());

        // No tabulation record: geometry kept, attributes empty
        let unmatched = &records[1];
        assert_eq!(unmatched.geoid, "440020");
        assert!(unmatched.values.is_empty());
        assert!(unmatched.geometry.is_some());
    }

    #[test]
    fn test_join_falls_back_to_feature_name() {
        let catalog = rdpkg_common::geography::GeographyCatalog::new();
        let county = catalog.get("county").unwrap();
        let features = vec![Feature {
            geoid: "44001".to_string(),
            name: Some("Bristol".to_string()),
            geometry: None,
        }];
        let records = join_tabulation(county, DecennialYear::Y2020, features, &block_table());
        assert_eq!(records[0].values.get("name"), Some(&FieldValue::Text("Bristol".into())));
    }

    #[test]
    fn test_load_shapefile_reports_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tl_2020_44_vtd20.shp");
        match load_shapefile(&path, DecennialYear::Y2020) {
            Err(GeometryError::Shapefile(file, _)) => assert!(file.ends_with("tl_2020_44_vtd20.shp")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_typed_value() {
        let aland = FieldSpec::integer("aland", &["AREALAND"]);
        assert_eq!(typed_value(&aland, Some("1234".into())), FieldValue::Integer(1234));
        assert_eq!(typed_value(&aland, Some("n/a".into())), FieldValue::Null);
        assert_eq!(typed_value(&aland, None), FieldValue::Null);
    }
}
