//! Citizen voting-age population (CVAP) processing
//!
//! CVAP estimates are published per block group (and independently for a
//! few larger levels). Blocks get a share of their block group's estimate
//! in proportion to their PL population, with a three-tier fallback when the
//! weighting base is zero. Levels without a published file are then built
//! by summing block values on the level's id column.
//!
//! Every level is a [`MigrationStep`] guarded on `cvap_total` and its
//! provenance row, so a level that completed once is left alone.

use crate::services::archive::find_with_suffix;
use crate::services::downloader::DownloadError;
use crate::services::overlay::{add_columns, update_in_batches, BatchUpdateError, KeyedValues};
use crate::services::package_writer::FieldValue;
use crate::services::pl_layout::strip_geoid_prefix;
use crate::utils::text::decode_field;
use rdpkg_common::db::migrations::{run_step, MigrationStep, StepOutcome};
use rdpkg_common::db::schema_sync::{quote_ident, SchemaIntrospector};
use rdpkg_common::geography::{Geography, GeographyCatalog};
use rdpkg_common::population::ratio;
use rdpkg_common::{Cancelled, Progress, State};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// CVAP processing errors
#[derive(Debug, Error)]
pub enum CvapError {
    #[error("Download failed: {0}")]
    Download(#[from] DownloadError),

    #[error("CVAP archive has no {0}.csv")]
    MissingSource(String),

    #[error("CSV error in {file}: {message}")]
    Csv { file: String, message: String },

    #[error("CVAP requires the block layer, which is missing from the package")]
    MissingBlocks,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Common(#[from] rdpkg_common::Error),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl From<BatchUpdateError> for CvapError {
    fn from(e: BatchUpdateError) -> Self {
        match e {
            BatchUpdateError::Database(e) => CvapError::Database(e),
            BatchUpdateError::Schema(e) => CvapError::Common(e),
            BatchUpdateError::Cancelled(c) => CvapError::Cancelled(c),
        }
    }
}

/// A CVAP line category and the PL column it is weighted by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CvapCategory {
    pub key: &'static str,
    /// `lnnumber` in the published CSVs
    pub line: u32,
    /// PL column suffix after `pop_`/`vap_`; `None` for the derived other-multiracial base
    pub pl_base: Option<&'static str>,
}

const fn category(key: &'static str, line: u32, pl_base: Option<&'static str>) -> CvapCategory {
    CvapCategory { key, line, pl_base }
}

/// The 13 published categories, in `lnnumber` order
pub const CATEGORIES: [CvapCategory; 13] = [
    category("total", 1, Some("total")),
    category("nonhispanic", 2, Some("nonhispanic")),
    category("aian", 3, Some("aian")),
    category("asian", 4, Some("asian")),
    category("black", 5, Some("black")),
    category("nhpi", 6, Some("nhpi")),
    category("white", 7, Some("white")),
    category("aian_white", 8, Some("white_aian")),
    category("asian_white", 9, Some("white_asian")),
    category("black_white", 10, Some("white_black")),
    category("aian_black", 11, Some("black_aian")),
    category("other_mr", 12, None),
    category("hispanic", 13, Some("hispanic")),
];

const TOTAL: usize = 0;

/// Any-part categories and the categories they sum
pub const COMBINED: [(&str, &[&str]); 3] = [
    ("apblack", &["black", "black_white", "aian_black"]),
    ("apaian", &["aian", "aian_white", "aian_black"]),
    ("apasian", &["asian", "asian_white"]),
];

/// Multiracial sub-combinations CVAP reports on their own lines
const ENUMERATED_MULTIRACIAL: [&str; 4] = ["white_black", "white_aian", "white_asian", "black_aian"];

/// Which estimate a value belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Universe {
    /// Citizens, weighted by total population
    Citizen,
    /// Citizens of voting age, weighted by voting-age population
    VotingAge,
}

impl Universe {
    pub const ALL: [Universe; 2] = [Universe::Citizen, Universe::VotingAge];

    /// Output column prefix
    pub fn prefix(&self) -> &'static str {
        match self {
            Universe::Citizen => "cit",
            Universe::VotingAge => "cvap",
        }
    }

    /// PL column prefix of the weighting base
    pub fn pl_prefix(&self) -> &'static str {
        match self {
            Universe::Citizen => "pop",
            Universe::VotingAge => "vap",
        }
    }
}

fn index_of(key: &str) -> Option<usize> {
    CATEGORIES.iter().position(|c| c.key == key)
}

fn sum_present(values: impl IntoIterator<Item = Option<f64>>) -> Option<f64> {
    values.into_iter().flatten().fold(None, |acc, v| Some(acc.unwrap_or(0.0) + v))
}

/// CVAP values of one unit for every category of both universes
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CvapVector {
    pub citizen: [Option<f64>; 13],
    pub voting_age: [Option<f64>; 13],
}

impl CvapVector {
    pub fn values(&self, universe: Universe) -> &[Option<f64>; 13] {
        match universe {
            Universe::Citizen => &self.citizen,
            Universe::VotingAge => &self.voting_age,
        }
    }

    pub fn values_mut(&mut self, universe: Universe) -> &mut [Option<f64>; 13] {
        match universe {
            Universe::Citizen => &mut self.citizen,
            Universe::VotingAge => &mut self.voting_age,
        }
    }

    pub fn get(&self, universe: Universe, key: &str) -> Option<f64> {
        index_of(key).and_then(|i| self.values(universe)[i])
    }

    /// Any-part value for a combined category
    pub fn combined(&self, universe: Universe, parts: &[&str]) -> Option<f64> {
        sum_present(parts.iter().map(|p| self.get(universe, p)))
    }

    /// Element-wise sum; a missing value only counts when the other side has one
    pub fn accumulate(&mut self, other: &CvapVector) {
        for universe in Universe::ALL {
            let theirs = *other.values(universe);
            for (mine, theirs) in self.values_mut(universe).iter_mut().zip(theirs) {
                *mine = sum_present([*mine, theirs]);
            }
        }
    }

    /// Values aligned with [`cvap_columns`]
    pub fn column_values(&self) -> Vec<Option<f64>> {
        let mut out = Vec::with_capacity(cvap_columns().len());
        for universe in Universe::ALL {
            out.extend_from_slice(self.values(universe));
            for (_, parts) in COMBINED {
                out.push(self.combined(universe, parts));
            }
        }
        for universe in Universe::ALL {
            let total = self.values(universe)[TOTAL];
            for value in self.values(universe).iter().skip(1) {
                out.push(ratio(*value, total));
            }
            for (_, parts) in COMBINED {
                out.push(ratio(self.combined(universe, parts), total));
            }
        }
        out
    }
}

/// Every column CVAP adds to a layer: counts, any-part counts, then percentages
pub fn cvap_columns() -> Vec<String> {
    let mut columns = Vec::new();
    for universe in Universe::ALL {
        let p = universe.prefix();
        columns.extend(CATEGORIES.iter().map(|c| format!("{}_{}", p, c.key)));
        columns.extend(COMBINED.iter().map(|(name, _)| format!("{}_{}", p, name)));
    }
    for universe in Universe::ALL {
        let p = universe.prefix();
        columns.extend(CATEGORIES.iter().skip(1).map(|c| format!("pct_{}_{}", p, c.key)));
        columns.extend(COMBINED.iter().map(|(name, _)| format!("pct_{}_{}", p, name)));
    }
    columns
}

/// The 26 summable category columns, citizen first
pub fn base_columns() -> Vec<String> {
    Universe::ALL
        .iter()
        .flat_map(|u| CATEGORIES.iter().map(move |c| format!("{}_{}", u.prefix(), c.key)))
        .collect()
}

/// Share of `value` given to one block
///
/// 1. `weight / weight_total` when the block group's base is non-zero
/// 2. else `coarse_weight / coarse_weight_total`, the block's share of the
///    block group's total-population base for the same category
/// 3. else `equal_share`, one over the number of blocks in the group
///
/// `None` when the value is missing or no tier has a usable denominator.
pub fn allocate(
    value: Option<f64>,
    weight: f64,
    weight_total: f64,
    coarse_weight: f64,
    coarse_weight_total: f64,
    equal_share: Option<f64>,
) -> Option<f64> {
    let value = value?;
    if weight_total != 0.0 {
        return Some(value * weight / weight_total);
    }
    if coarse_weight_total != 0.0 {
        return Some(value * coarse_weight / coarse_weight_total);
    }
    equal_share
        .filter(|s| s.is_finite() && *s > 0.0)
        .map(|s| value * s)
}

/// PL weighting bases of one block
#[derive(Debug, Clone, PartialEq)]
pub struct BlockBase {
    pub geoid: String,
    /// Block group id (`bgid`)
    pub group: Option<String>,
    pub population: [f64; 13],
    pub voting_age: [f64; 13],
}

impl BlockBase {
    /// Build the per-category bases from PL columns looked up by name
    pub fn from_pl(geoid: String, group: Option<String>, pl: impl Fn(&str) -> Option<i64>) -> Self {
        let bases = |prefix: &str| -> [f64; 13] {
            let get = |suffix: &str| pl(&format!("{}_{}", prefix, suffix)).unwrap_or(0) as f64;
            let mut out = [0.0; 13];
            for (slot, c) in out.iter_mut().zip(CATEGORIES.iter()) {
                *slot = match c.pl_base {
                    Some(suffix) => get(suffix),
                    None => {
                        let enumerated: f64 = ENUMERATED_MULTIRACIAL.iter().map(|s| get(s)).sum();
                        (get("two") - enumerated).max(0.0)
                    }
                };
            }
            out
        };
        Self {
            geoid,
            group,
            population: bases(Universe::Citizen.pl_prefix()),
            voting_age: bases(Universe::VotingAge.pl_prefix()),
        }
    }

    fn bases(&self, universe: Universe) -> &[f64; 13] {
        match universe {
            Universe::Citizen => &self.population,
            Universe::VotingAge => &self.voting_age,
        }
    }
}

/// PL columns [`BlockBase::from_pl`] reads
pub fn pl_base_columns() -> Vec<String> {
    // The enumerated multiracial columns are already category bases
    let mut suffixes: Vec<&str> = CATEGORIES.iter().filter_map(|c| c.pl_base).collect();
    suffixes.push("two");
    Universe::ALL
        .iter()
        .flat_map(|u| suffixes.iter().map(move |s| format!("{}_{}", u.pl_prefix(), s)))
        .collect()
}

/// Spread block-group estimates over their blocks
///
/// Blocks outside any published block group get no values.
pub fn disaggregate(blocks: &[BlockBase], published: &HashMap<String, CvapVector>) -> Vec<(String, CvapVector)> {
    let mut groups: HashMap<&str, (usize, [f64; 13], [f64; 13])> = HashMap::new();
    for block in blocks {
        if let Some(group) = block.group.as_deref() {
            let entry = groups.entry(group).or_insert((0, [0.0; 13], [0.0; 13]));
            entry.0 += 1;
            for i in 0..13 {
                entry.1[i] += block.population[i];
                entry.2[i] += block.voting_age[i];
            }
        }
    }

    blocks
        .iter()
        .map(|block| {
            let mut vector = CvapVector::default();
            let group = block.group.as_deref();
            if let (Some(estimate), Some((count, pop_totals, vap_totals))) = (
                group.and_then(|g| published.get(g)),
                group.and_then(|g| groups.get(g)),
            ) {
                let equal_share = (*count > 0).then(|| 1.0 / *count as f64);
                for universe in Universe::ALL {
                    let totals = match universe {
                        Universe::Citizen => pop_totals,
                        Universe::VotingAge => vap_totals,
                    };
                    let bases = block.bases(universe);
                    let source = estimate.values(universe);
                    for (i, slot) in vector.values_mut(universe).iter_mut().enumerate() {
                        // Voting-age bases fall back to the category's total population
                        *slot = allocate(
                            source[i],
                            bases[i],
                            totals[i],
                            block.population[i],
                            pop_totals[i],
                            equal_share,
                        );
                    }
                }
            }
            (block.geoid.clone(), vector)
        })
        .collect()
}

/// Sum block vectors by the id of the level they belong to
pub fn aggregate(blocks: impl IntoIterator<Item = (Option<String>, CvapVector)>) -> BTreeMap<String, CvapVector> {
    let mut out: BTreeMap<String, CvapVector> = BTreeMap::new();
    for (id, vector) in blocks {
        if let Some(id) = id {
            out.entry(id).or_default().accumulate(&vector);
        }
    }
    out
}

fn parse_estimate(raw: &[u8]) -> Option<f64> {
    let text = decode_field(raw);
    let cleaned = text.replace(',', "");
    cleaned.parse::<f64>().ok()
}

/// Read a published CVAP CSV, keeping rows for one state
///
/// Keys are GEOIDs with the summary-level prefix stripped.
pub fn load_cvap_csv(path: &Path, state_fips: &str) -> Result<HashMap<String, CvapVector>, CvapError> {
    let file = path.display().to_string();
    let csv_err = |e: csv::Error| CvapError::Csv {
        file: file.clone(),
        message: e.to_string(),
    };

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(csv_err)?;
    let headers: Vec<String> = reader
        .byte_headers()
        .map_err(csv_err)?
        .iter()
        .map(|h| decode_field(h).to_ascii_lowercase())
        .collect();
    let column = |name: &str| {
        headers.iter().position(|h| h == name).ok_or_else(|| CvapError::Csv {
            file: file.clone(),
            message: format!("missing column '{}'", name),
        })
    };
    let geoid_col = column("geoid")?;
    let line_col = column("lnnumber")?;
    let cit_col = column("cit_est")?;
    let cvap_col = column("cvap_est")?;

    let mut out: HashMap<String, CvapVector> = HashMap::new();
    let mut record = csv::ByteRecord::new();
    while reader.read_byte_record(&mut record).map_err(csv_err)? {
        let raw_geoid = decode_field(record.get(geoid_col).unwrap_or_default());
        let geoid = strip_geoid_prefix(&raw_geoid);
        if !geoid.starts_with(state_fips) {
            continue;
        }
        let Some(line) = record
            .get(line_col)
            .map(decode_field)
            .and_then(|l| l.parse::<u32>().ok())
        else {
            continue;
        };
        let Some(index) = CATEGORIES.iter().position(|c| c.line == line) else {
            debug!(file = %file, line, "Unknown CVAP line number");
            continue;
        };

        let vector = out.entry(geoid.to_string()).or_default();
        vector.citizen[index] = record.get(cit_col).and_then(parse_estimate);
        vector.voting_age[index] = record.get(cvap_col).and_then(parse_estimate);
    }

    info!(file = %file, state = %state_fips, units = out.len(), "Loaded CVAP estimates");
    Ok(out)
}

/// How a level got its CVAP columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CvapMethod {
    Disaggregated,
    Published,
    Aggregated,
}

/// Result of processing one level
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CvapLevelOutcome {
    pub table: String,
    pub method: CvapMethod,
    /// False when the level already carried CVAP columns
    pub applied: bool,
    pub rows: u64,
}

/// Provenance payload for a CVAP step
#[derive(Debug, Serialize)]
struct StepDetails {
    method: CvapMethod,
    rows: u64,
}

/// Adds CVAP columns to every layer of a package
pub struct CvapProcessor<'a> {
    pool: &'a SqlitePool,
    catalog: &'a GeographyCatalog,
    state: &'a State,
    /// Extracted CSVs of the CVAP archive
    sources: Vec<PathBuf>,
}

impl<'a> CvapProcessor<'a> {
    pub fn new(pool: &'a SqlitePool, catalog: &'a GeographyCatalog, state: &'a State, sources: Vec<PathBuf>) -> Self {
        Self {
            pool,
            catalog,
            state,
            sources,
        }
    }

    fn load_source(&self, source: &str) -> Result<HashMap<String, CvapVector>, CvapError> {
        let path = find_with_suffix(&self.sources, &format!("{}.csv", source))
            .ok_or_else(|| CvapError::MissingSource(source.to_string()))?;
        load_cvap_csv(&path, self.state.fips())
    }

    /// Process blocks, then every other level present in the package
    pub async fn process(&self, progress: &Progress) -> Result<Vec<CvapLevelOutcome>, CvapError> {
        let block_table = self.catalog.block().table_name(self.state.year);
        if !SchemaIntrospector::table_exists(self.pool, &block_table).await? {
            return Err(CvapError::MissingBlocks);
        }

        let mut levels: Vec<&Geography> = Vec::new();
        for geography in self.catalog.applicable(self.state.code()) {
            if geography.is_block() {
                continue;
            }
            if SchemaIntrospector::table_exists(self.pool, &geography.table_name(self.state.year)).await? {
                levels.push(geography);
            } else {
                debug!(geography = geography.code, "Layer not in package, no CVAP");
            }
        }

        let steps = levels.len() + 1;
        let mut outcomes = Vec::with_capacity(steps);
        outcomes.push(
            self.disaggregate_blocks(&block_table, &progress.scoped(0.0, 100.0 / steps as f64))
                .await?,
        );

        for (i, geography) in levels.into_iter().enumerate() {
            let scoped = progress.scoped(
                100.0 * (i + 1) as f64 / steps as f64,
                100.0 * (i + 2) as f64 / steps as f64,
            );
            outcomes.push(self.process_level(geography, &block_table, &scoped).await?);
        }
        progress.checkpoint(100.0)?;
        Ok(outcomes)
    }

    fn step(table: &str) -> MigrationStep {
        MigrationStep::columns_absent(format!("cvap:{}", table), table, ["cvap_total"])
    }

    fn outcome(table: &str, method: CvapMethod, step: StepOutcome<StepDetails>) -> CvapLevelOutcome {
        match step {
            StepOutcome::Applied(details) => CvapLevelOutcome {
                table: table.to_string(),
                method,
                applied: true,
                rows: details.rows,
            },
            StepOutcome::AlreadyApplied => CvapLevelOutcome {
                table: table.to_string(),
                method,
                applied: false,
                rows: 0,
            },
        }
    }

    async fn disaggregate_blocks(&self, block_table: &str, progress: &Progress) -> Result<CvapLevelOutcome, CvapError> {
        let step = Self::step(block_table);
        let outcome = run_step(self.pool, &step, || async {
            let published = self.load_source("BlockGr")?;
            progress.checkpoint(10.0)?;
            let blocks = self.load_block_bases(block_table).await?;
            let vectors = disaggregate(&blocks, &published);
            let rows = self
                .write_vectors(block_table, vectors, &progress.scoped(20.0, 100.0))
                .await?;
            info!(table = %block_table, blocks = blocks.len(), rows, "Disaggregated CVAP to blocks");
            Ok::<_, CvapError>(StepDetails {
                method: CvapMethod::Disaggregated,
                rows,
            })
        })
        .await?;
        Ok(Self::outcome(block_table, CvapMethod::Disaggregated, outcome))
    }

    async fn process_level(
        &self,
        geography: &Geography,
        block_table: &str,
        progress: &Progress,
    ) -> Result<CvapLevelOutcome, CvapError> {
        let table = geography.table_name(self.state.year);
        let method = match geography.cvap_source {
            Some(_) => CvapMethod::Published,
            None => CvapMethod::Aggregated,
        };
        let step = Self::step(&table);

        let outcome = run_step(self.pool, &step, || async {
            let vectors: Vec<(String, CvapVector)> = match (geography.cvap_source, geography.block_id_field) {
                (Some(source), _) => self.load_source(source)?.into_iter().collect(),
                (None, Some(id_field)) => self
                    .aggregate_blocks(block_table, id_field)
                    .await?
                    .into_iter()
                    .collect(),
                (None, None) => {
                    warn!(geography = geography.code, "No CVAP source or block id column");
                    Vec::new()
                }
            };
            progress.checkpoint(20.0)?;
            let rows = self
                .write_vectors(&table, vectors, &progress.scoped(20.0, 100.0))
                .await?;
            info!(table = %table, method = ?method, rows, "CVAP columns written");
            Ok::<_, CvapError>(StepDetails { method, rows })
        })
        .await?;
        Ok(Self::outcome(&table, method, outcome))
    }

    async fn load_block_bases(&self, block_table: &str) -> Result<Vec<BlockBase>, CvapError> {
        let pl_columns = pl_base_columns();
        let mut select = vec![quote_ident("geoid")?, quote_ident("bgid")?];
        for column in &pl_columns {
            select.push(quote_ident(column)?);
        }
        let sql = format!("SELECT {} FROM {}", select.join(", "), quote_ident(block_table)?);

        let rows = sqlx::query(&sql).fetch_all(self.pool).await?;
        let mut blocks = Vec::with_capacity(rows.len());
        for row in rows {
            let geoid: String = row.try_get("geoid")?;
            let group: Option<String> = row.try_get("bgid")?;
            let mut pl: HashMap<&str, i64> = HashMap::new();
            for column in &pl_columns {
                if let Some(v) = row.try_get::<Option<i64>, _>(column.as_str())? {
                    pl.insert(column.as_str(), v);
                }
            }
            blocks.push(BlockBase::from_pl(geoid, group, |name| pl.get(name).copied()));
        }
        Ok(blocks)
    }

    async fn aggregate_blocks(
        &self,
        block_table: &str,
        id_field: &str,
    ) -> Result<BTreeMap<String, CvapVector>, CvapError> {
        let columns = base_columns();
        let mut select = vec![quote_ident(id_field)?];
        for column in &columns {
            select.push(quote_ident(column)?);
        }
        let sql = format!("SELECT {} FROM {}", select.join(", "), quote_ident(block_table)?);

        let rows = sqlx::query(&sql).fetch_all(self.pool).await?;
        let mut blocks = Vec::with_capacity(rows.len());
        for row in rows {
            let id: Option<String> = row.try_get(id_field)?;
            let mut vector = CvapVector::default();
            for (i, column) in columns.iter().enumerate() {
                let value: Option<f64> = row.try_get(column.as_str())?;
                match i.checked_sub(CATEGORIES.len()) {
                    None => vector.citizen[i] = value,
                    Some(j) => vector.voting_age[j] = value,
                }
            }
            blocks.push((id, vector));
        }
        Ok(aggregate(blocks))
    }

    async fn write_vectors(
        &self,
        table: &str,
        vectors: Vec<(String, CvapVector)>,
        progress: &Progress,
    ) -> Result<u64, CvapError> {
        let columns = cvap_columns();
        let definitions: Vec<(String, &'static str)> = columns.iter().map(|c| (c.clone(), "REAL")).collect();
        add_columns(self.pool, table, &definitions).await?;

        let rows: Vec<KeyedValues> = vectors
            .into_iter()
            .map(|(key, vector)| KeyedValues {
                key,
                values: vector
                    .column_values()
                    .into_iter()
                    .map(FieldValue::from_option_f64)
                    .collect(),
            })
            .collect();
        let names: Vec<&str> = columns.iter().map(String::as_str).collect();
        Ok(update_in_batches(self.pool, table, "geoid", &names, rows, progress).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(geoid: &str, group: &str, pop_total: i64, vap_total: i64) -> BlockBase {
        BlockBase::from_pl(geoid.to_string(), Some(group.to_string()), |name| match name {
            "pop_total" => Some(pop_total),
            "vap_total" => Some(vap_total),
            _ => Some(0),
        })
    }

    fn published(group: &str, cit_total: f64, cvap_total: f64) -> HashMap<String, CvapVector> {
        let mut vector = CvapVector::default();
        vector.citizen[TOTAL] = Some(cit_total);
        vector.voting_age[TOTAL] = Some(cvap_total);
        vector.citizen[index_of("nhpi").unwrap()] = Some(30.0);
        vector.voting_age[index_of("asian").unwrap()] = Some(12.0);
        HashMap::from([(group.to_string(), vector)])
    }

    #[test]
    fn test_allocate_tiers() {
        assert_eq!(allocate(Some(30.0), 10.0, 40.0, 0.0, 0.0, None), Some(7.5));
        assert_eq!(allocate(Some(30.0), 0.0, 0.0, 20.0, 40.0, Some(1.0 / 3.0)), Some(15.0));
        assert_eq!(allocate(Some(30.0), 0.0, 0.0, 0.0, 0.0, Some(1.0 / 3.0)), Some(10.0));
        assert_eq!(allocate(Some(30.0), 0.0, 0.0, 0.0, 0.0, None), None);
        assert_eq!(allocate(None, 1.0, 2.0, 1.0, 2.0, Some(0.5)), None);
    }

    #[test]
    fn test_scenario_one_block_group_three_blocks() {
        let blocks = vec![
            block("440010101001000", "440010101001", 10, 0),
            block("440010101001001", "440010101001", 10, 0),
            block("440010101001002", "440010101001", 20, 0),
        ];
        let out = disaggregate(&blocks, &published("440010101001", 30.0, 30.0));

        let cit: Vec<f64> = out.iter().map(|(_, v)| v.citizen[TOTAL].unwrap()).collect();
        assert_eq!(cit, vec![7.5, 7.5, 15.0]);

        // No VAP anywhere in the group: total population share
        let cvap: Vec<f64> = out.iter().map(|(_, v)| v.voting_age[TOTAL].unwrap()).collect();
        assert_eq!(cvap, vec![7.5, 7.5, 15.0]);

        // Category base zero at block and block-group level: equal shares
        let nhpi: Vec<f64> = out.iter().map(|(_, v)| v.get(Universe::Citizen, "nhpi").unwrap()).collect();
        assert_eq!(nhpi, vec![10.0, 10.0, 10.0]);
        let asian: Vec<f64> = out.iter().map(|(_, v)| v.get(Universe::VotingAge, "asian").unwrap()).collect();
        assert_eq!(asian, vec![4.0, 4.0, 4.0]);
    }

    #[test]
    fn test_voting_age_falls_back_to_category_population() {
        let base = |geoid: &str, pop_asian: i64| {
            BlockBase::from_pl(geoid.to_string(), Some("440010101001".to_string()), move |name| match name {
                "pop_total" => Some(50),
                "vap_total" => Some(40),
                "pop_asian" => Some(pop_asian),
                _ => Some(0),
            })
        };
        let blocks = vec![base("440010101001000", 1), base("440010101001001", 3)];
        let out = disaggregate(&blocks, &published("440010101001", 30.0, 30.0));

        // No voting-age Asians, but Asian population present: second tier
        let asian: Vec<f64> = out.iter().map(|(_, v)| v.get(Universe::VotingAge, "asian").unwrap()).collect();
        assert_eq!(asian, vec![3.0, 9.0]);
        let total: Vec<f64> = out.iter().map(|(_, v)| v.voting_age[TOTAL].unwrap()).collect();
        assert_eq!(total, vec![15.0, 15.0]);
    }

    #[test]
    fn test_block_outside_published_groups_gets_nothing() {
        let blocks = vec![
            block("440010101001000", "440010101001", 10, 10),
            BlockBase::from_pl("440010101002000".into(), None, |_| Some(5)),
        ];
        let out = disaggregate(&blocks, &published("440010101009", 30.0, 30.0));
        assert!(out.iter().all(|(_, v)| *v == CvapVector::default()));
    }

    #[test]
    fn test_other_multiracial_base() {
        let base = BlockBase::from_pl("1".into(), None, |name| match name {
            "pop_two" => Some(20),
            "pop_white_black" => Some(3),
            "pop_white_aian" => Some(4),
            "pop_white_asian" => Some(5),
            "pop_black_aian" => Some(1),
            _ => None,
        });
        let i = index_of("other_mr").unwrap();
        assert_eq!(base.population[i], 7.0);
        assert_eq!(base.voting_age[i], 0.0);
    }

    #[test]
    fn test_combined_and_percentages() {
        let mut v = CvapVector::default();
        v.citizen[TOTAL] = Some(100.0);
        v.citizen[index_of("black").unwrap()] = Some(10.0);
        v.citizen[index_of("black_white").unwrap()] = Some(2.0);
        assert_eq!(v.combined(Universe::Citizen, COMBINED[0].1), Some(12.0));
        assert_eq!(v.combined(Universe::VotingAge, COMBINED[0].1), None);

        let columns = cvap_columns();
        let values = v.column_values();
        assert_eq!(columns.len(), values.len());
        let lookup = |name: &str| values[columns.iter().position(|c| c == name).unwrap()];
        assert_eq!(lookup("cit_apblack"), Some(12.0));
        assert_eq!(lookup("pct_cit_black"), Some(0.1));
        assert_eq!(lookup("pct_cit_apblack"), Some(0.12));
        assert_eq!(lookup("pct_cvap_black"), None);
        assert!(!columns.iter().any(|c| c == "pct_cit_total"));
    }

    #[test]
    fn test_aggregate_sums_by_id() {
        let mut a = CvapVector::default();
        a.citizen[TOTAL] = Some(1.5);
        let mut b = CvapVector::default();
        b.citizen[TOTAL] = Some(2.5);
        b.voting_age[TOTAL] = Some(1.0);

        let out = aggregate(vec![
            (Some("A".to_string()), a),
            (Some("A".to_string()), b),
            (None, b),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out["A"].citizen[TOTAL], Some(4.0));
        assert_eq!(out["A"].voting_age[TOTAL], Some(1.0));
        assert_eq!(out["A"].citizen[1], None);
    }
}
