//! Voter registration overlay
//!
//! Block-level registration counts keyed by `geoid{yy}`. Raw party and
//! ethnicity columns are folded into canonical `reg_*` categories and
//! `pct_reg_*` shares of `reg_total`, then written onto the block layer.

use crate::services::overlay::{add_columns, read_delimited, update_in_batches, DelimitedTable, KeyedValues, OverlayError};
use crate::services::package_writer::FieldValue;
use rdpkg_common::db::migrations::{run_step, MigrationStep, StepOutcome};
use rdpkg_common::db::schema_sync::SchemaIntrospector;
use rdpkg_common::population::ratio;
use rdpkg_common::{DecennialYear, Progress};
use serde::Serialize;
use sqlx::SqlitePool;
use std::path::Path;
use tracing::{info, warn};

/// A canonical registration category and the raw columns summed into it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationCategory {
    pub name: &'static str,
    pub sources: &'static [&'static str],
}

const fn reg(name: &'static str, sources: &'static [&'static str]) -> RegistrationCategory {
    RegistrationCategory { name, sources }
}

pub const REGISTRATION_CATEGORIES: &[RegistrationCategory] = &[
    reg("reg_total", &["total_reg"]),
    reg("reg_dem", &["party_dem"]),
    reg("reg_rep", &["party_rep"]),
    reg("reg_npp", &["party_npp"]),
    reg("reg_oth", &["party_lib", "party_grn", "party_oth"]),
    reg("reg_white", &["eth2_european", "eth2_other_european"]),
    reg("reg_black", &["eth2_likely_african_american", "eth2_african"]),
    reg("reg_hispanic", &["eth1_hisp"]),
    reg(
        "reg_asian",
        &["eth2_chinese", "eth2_indian", "eth2_japanese", "eth2_korean", "eth2_vietnamese"],
    ),
    reg("reg_mena", &["eth2_arab", "eth2_persian", "eth2_turkish"]),
];

/// Columns the overlay adds, counts first
pub fn registration_columns() -> Vec<(String, &'static str)> {
    let counts = REGISTRATION_CATEGORIES.iter().map(|c| (c.name.to_string(), "INTEGER"));
    let shares = REGISTRATION_CATEGORIES
        .iter()
        .skip(1)
        .map(|c| (format!("pct_{}", c.name), "REAL"));
    counts.chain(shares).collect()
}

/// Join column name for a census year
pub fn join_column(year: DecennialYear) -> String {
    format!("geoid{}", year.suffix())
}

fn parse_count(raw: &str) -> Option<i64> {
    if raw.is_empty() {
        return None;
    }
    raw.parse::<i64>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().map(|v| v.round() as i64))
}

/// Canonical values for one row, aligned with [`registration_columns`]
fn registration_values(sources: &[Vec<usize>], row: &[String]) -> Vec<FieldValue> {
    let counts: Vec<Option<i64>> = sources
        .iter()
        .map(|indexes| {
            indexes
                .iter()
                .filter_map(|&i| row.get(i).and_then(|v| parse_count(v)))
                .fold(None, |acc, v| Some(acc.unwrap_or(0) + v))
        })
        .collect();

    let total = counts.first().copied().flatten().map(|v| v as f64);
    let shares = counts
        .iter()
        .skip(1)
        .map(|c| FieldValue::from_option_f64(ratio(c.map(|v| v as f64), total)));

    counts
        .iter()
        .map(|c| c.map(FieldValue::Integer).unwrap_or(FieldValue::Null))
        .chain(shares)
        .collect()
}

/// Column indexes per category, plus the source names not found
fn resolve_sources(data: &DelimitedTable) -> (Vec<Vec<usize>>, Vec<&'static str>) {
    let mut missing = Vec::new();
    let mut sources = Vec::with_capacity(REGISTRATION_CATEGORIES.len());
    for category in REGISTRATION_CATEGORIES {
        let mut indexes = Vec::with_capacity(category.sources.len());
        for source in category.sources {
            match data.column(source) {
                Some(i) => indexes.push(i),
                None => missing.push(*source),
            }
        }
        sources.push(indexes);
    }
    (sources, missing)
}

#[derive(Debug, Serialize)]
struct VoterDetails {
    file: String,
    rows: u64,
    missing_sources: Vec<&'static str>,
}

/// Import a voter file onto `table`; `Ok(false)` when already imported
pub async fn import_voter_file(
    pool: &SqlitePool,
    table: &str,
    year: DecennialYear,
    path: &Path,
    progress: &Progress,
) -> Result<bool, OverlayError> {
    if !SchemaIntrospector::table_exists(pool, table).await? {
        return Err(OverlayError::MissingTable(table.to_string()));
    }

    let step = MigrationStep::columns_absent(format!("voter:{}", table), table, ["reg_total"]);
    let outcome = run_step(pool, &step, || async {
        let data = read_delimited(path)?;
        let key = data.require(path, &join_column(year))?;

        let (sources, missing_sources) = resolve_sources(&data);
        if !missing_sources.is_empty() {
            warn!(file = %path.display(), columns = ?missing_sources, "Voter file lacks source columns");
        }
        progress.checkpoint(5.0)?;

        let columns = registration_columns();
        add_columns(pool, table, &columns).await?;

        let rows: Vec<KeyedValues> = data
            .rows
            .iter()
            .filter_map(|row| {
                let geoid = row.get(key).filter(|k| !k.is_empty())?;
                Some(KeyedValues {
                    key: geoid.clone(),
                    values: registration_values(&sources, row),
                })
            })
            .collect();

        let names: Vec<&str> = columns.iter().map(|(n, _)| n.as_str()).collect();
        let changed = update_in_batches(pool, table, "geoid", &names, rows, &progress.scoped(10.0, 100.0)).await?;
        info!(table, file = %path.display(), rows = changed, "Voter registration imported");

        Ok::<_, OverlayError>(VoterDetails {
            file: path.display().to_string(),
            rows: changed,
            missing_sources,
        })
    })
    .await?;

    Ok(matches!(outcome, StepOutcome::Applied(_)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_columns() {
        let columns = registration_columns();
        assert_eq!(columns[0], ("reg_total".to_string(), "INTEGER"));
        assert!(columns.iter().any(|(n, t)| n == "pct_reg_mena" && *t == "REAL"));
        assert!(!columns.iter().any(|(n, _)| n == "pct_reg_total"));
        assert_eq!(join_column(DecennialYear::Y2020), "geoid20");
    }

    #[test]
    fn test_values_combine_sources() {
        let data = DelimitedTable {
            headers: ["geoid20", "total_reg", "party_lib", "party_oth", "eth2_arab"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            rows: Vec::new(),
        };
        let (sources, missing) = resolve_sources(&data);
        assert!(missing.contains(&"party_grn"));

        let row: Vec<String> = ["440010101001000", "10", "2", "3", ""]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let values = registration_values(&sources, &row);
        let columns = registration_columns();
        let lookup = |name: &str| values[columns.iter().position(|(n, _)| n == name).unwrap()].clone();

        assert_eq!(lookup("reg_total"), FieldValue::Integer(10));
        assert_eq!(lookup("reg_oth"), FieldValue::Integer(5));
        assert_eq!(lookup("pct_reg_oth"), FieldValue::Real(0.5));
        assert_eq!(lookup("reg_mena"), FieldValue::Null);
        assert_eq!(lookup("pct_reg_mena"), FieldValue::Null);
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("12"), Some(12));
        assert_eq!(parse_count("12.0"), Some(12));
        assert_eq!(parse_count(""), None);
        assert_eq!(parse_count("n/a"), None);
    }
}
