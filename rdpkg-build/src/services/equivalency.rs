//! Block equivalency overlay
//!
//! A delimited file mapping block GEOIDs to arbitrary attributes (district
//! assignments, precinct codes, ...). Every column other than the join column
//! is added to the block layer, typed by inspecting its values. Columns may
//! not collide with layer schema columns, CVAP or voter columns, or columns
//! another equivalency file already imported.

use crate::models::EquivalencyFile;
use crate::services::cvap::cvap_columns;
use crate::services::overlay::{add_columns, read_delimited, update_in_batches, DelimitedTable, KeyedValues, OverlayError};
use crate::services::package_writer::FieldValue;
use crate::services::voter_file::registration_columns;
use rdpkg_common::db::layers::layer_table;
use rdpkg_common::db::migrations::{provenance_details, run_step, MigrationStep, StepOutcome};
use rdpkg_common::db::schema_sync::SchemaIntrospector;
use rdpkg_common::geography::GeographyCatalog;
use rdpkg_common::{DecennialYear, Progress};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Storage class inferred for an imported column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferredType {
    Integer,
    Real,
    Text,
}

impl InferredType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            InferredType::Integer => "INTEGER",
            InferredType::Real => "REAL",
            InferredType::Text => "TEXT",
        }
    }

    /// Narrowest type holding every non-empty value; TEXT when there are none
    pub fn infer<'a>(values: impl IntoIterator<Item = &'a str>) -> Self {
        let mut inferred: Option<InferredType> = None;
        for value in values.into_iter().filter(|v| !v.is_empty()) {
            // Zero-padded codes keep their padding
            if value.len() > 1 && value.starts_with('0') && !value.starts_with("0.") {
                return InferredType::Text;
            }
            let this = if value.parse::<i64>().is_ok() {
                InferredType::Integer
            } else if value.parse::<f64>().is_ok() {
                InferredType::Real
            } else {
                return InferredType::Text;
            };
            inferred = Some(match (inferred, this) {
                (Some(InferredType::Real), _) | (_, InferredType::Real) => InferredType::Real,
                _ => InferredType::Integer,
            });
        }
        inferred.unwrap_or(InferredType::Text)
    }

    fn value(&self, raw: &str) -> FieldValue {
        if raw.is_empty() {
            return FieldValue::Null;
        }
        match self {
            InferredType::Integer => raw.parse().map(FieldValue::Integer).unwrap_or(FieldValue::Null),
            InferredType::Real => raw.parse().map(FieldValue::Real).unwrap_or(FieldValue::Null),
            InferredType::Text => FieldValue::Text(raw.to_string()),
        }
    }
}

/// Column name usable as an SQL identifier: lowercase, `[a-z0-9_]`, not digit-led
pub fn column_name(raw: &str) -> String {
    let mut name: String = raw
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

/// An imported column: source index, target name, type
#[derive(Debug, Clone, PartialEq)]
pub struct ImportColumn {
    pub index: usize,
    pub name: String,
    pub sql_type: InferredType,
}

/// Columns to import: the requested subset, or every non-join column
pub fn plan_columns(
    file: &EquivalencyFile,
    data: &DelimitedTable,
    join: usize,
) -> Result<Vec<ImportColumn>, OverlayError> {
    let indexes: Vec<usize> = match &file.columns {
        Some(subset) => subset
            .iter()
            .map(|c| data.require(&file.path, c))
            .collect::<Result<_, _>>()?,
        None => (0..data.headers.len()).filter(|&i| i != join).collect(),
    };

    Ok(indexes
        .into_iter()
        .map(|index| {
            let sql_type = InferredType::infer(
                data.rows
                    .iter()
                    .filter_map(|r| r.get(index))
                    .map(String::as_str),
            );
            ImportColumn {
                index,
                name: column_name(&data.headers[index]),
                sql_type,
            }
        })
        .collect())
}

/// Who owns each column an equivalency file must not write
pub fn reserved_columns(catalog: &GeographyCatalog) -> Result<HashMap<String, String>, OverlayError> {
    let mut reserved = HashMap::new();
    for year in [DecennialYear::Y2010, DecennialYear::Y2020] {
        for geography in catalog.all() {
            for name in layer_table(geography, year)?.column_names() {
                reserved.entry(name.to_string()).or_insert_with(|| "a layer column".to_string());
            }
        }
    }
    for name in cvap_columns() {
        reserved.insert(name, "a CVAP column".to_string());
    }
    for (name, _) in registration_columns() {
        reserved.insert(name, "a voter registration column".to_string());
    }
    Ok(reserved)
}

/// Reject duplicate names and names owned by the layer or another import
async fn check_conflicts(
    pool: &SqlitePool,
    table: &str,
    step: &str,
    file: &EquivalencyFile,
    columns: &[ImportColumn],
) -> Result<(), OverlayError> {
    let conflict = |column: &str, owner: String| OverlayError::ColumnConflict {
        file: file.path.display().to_string(),
        column: column.to_string(),
        owner,
    };

    let mut owners = reserved_columns(&GeographyCatalog::new())?;
    for (other, details) in provenance_details(pool, &format!("equivalency:{}:", table)).await? {
        if other == step {
            continue;
        }
        let imported = details["columns"].as_array().cloned().unwrap_or_default();
        for name in imported.iter().filter_map(|c| c.as_str()) {
            owners.insert(name.to_string(), format!("a column imported by {}", other));
        }
    }

    let mut seen = HashSet::new();
    for column in columns {
        if !seen.insert(column.name.as_str()) {
            return Err(conflict(&column.name, "another column of the same file".to_string()));
        }
        if let Some(owner) = owners.remove(&column.name) {
            return Err(conflict(&column.name, owner));
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct EquivalencyDetails {
    file: String,
    columns: Vec<String>,
    rows: u64,
}

/// Import an equivalency file onto `table`; `Ok(false)` when it was already imported
pub async fn import_equivalency(
    pool: &SqlitePool,
    table: &str,
    file: &EquivalencyFile,
    progress: &Progress,
) -> Result<bool, OverlayError> {
    if !SchemaIntrospector::table_exists(pool, table).await? {
        return Err(OverlayError::MissingTable(table.to_string()));
    }

    let data = read_delimited(&file.path)?;
    let join = data.require(&file.path, &file.join_column)?;
    let columns = plan_columns(file, &data, join)?;
    for column in &columns {
        debug!(column = %column.name, sql_type = column.sql_type.as_sql(), "Equivalency column");
    }
    progress.checkpoint(5.0)?;

    let step = MigrationStep::columns_absent(
        format!("equivalency:{}:{}", table, file.path.display()),
        table,
        columns.iter().map(|c| c.name.clone()),
    );
    check_conflicts(pool, table, &step.name, file, &columns).await?;
    let outcome = run_step(pool, &step, || async {
        let definitions: Vec<(String, &'static str)> =
            columns.iter().map(|c| (c.name.clone(), c.sql_type.as_sql())).collect();
        add_columns(pool, table, &definitions).await?;

        let rows: Vec<KeyedValues> = data
            .rows
            .iter()
            .filter_map(|row| {
                let key = row.get(join).filter(|k| !k.is_empty())?;
                Some(KeyedValues {
                    key: key.clone(),
                    values: columns
                        .iter()
                        .map(|c| c.sql_type.value(row.get(c.index).map(String::as_str).unwrap_or("")))
                        .collect(),
                })
            })
            .collect();

        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        let changed = update_in_batches(pool, table, "geoid", &names, rows, &progress.scoped(10.0, 100.0)).await?;
        info!(table, file = %file.path.display(), columns = names.len(), rows = changed, "Equivalency imported");

        Ok::<_, OverlayError>(EquivalencyDetails {
            file: file.path.display().to_string(),
            columns: columns.iter().map(|c| c.name.clone()).collect(),
            rows: changed,
        })
    })
    .await?;

    Ok(matches!(outcome, StepOutcome::Applied(_)))
}
