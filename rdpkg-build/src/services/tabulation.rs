//! PL 94-171 tabulation loader
//!
//! Reads a state's geographic header and numbered data segments, left-joins
//! the segments onto the header by logical record number, and derives one
//! canonical `geoid` per row.
//!
//! Only the header attributes and table cells the package consumes are kept
//! in memory; large states have several hundred thousand block records.

use crate::services::pl_layout::{
    geoid_components_2010, strip_geoid_prefix, HeaderFormat, PlLayout, JOIN_KEY,
    SEGMENT_DROPPED_COLUMNS,
};
use crate::utils::text::{decode_census_text, decode_field};
use rdpkg_common::geography::GeographyCatalog;
use rdpkg_common::population::population_fields;
use rdpkg_common::DecennialYear;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Tabulation errors
#[derive(Debug, Error)]
pub enum TabulationError {
    #[error("Geographic header not found: {0}")]
    MissingHeader(PathBuf),

    #[error("Malformed record in {file} line {line}: {message}")]
    Malformed {
        file: String,
        line: usize,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Header attributes every load keeps regardless of the catalog
const CORE_HEADER_COLUMNS: &[&str] = &["FILEID", "STUSAB", "SUMLEV", "GEOCOMP", "LOGRECNO", "GEOID"];

/// One merged census record
#[derive(Debug, Clone, PartialEq)]
pub struct TabulationRow {
    pub logrecno: String,
    pub sumlev: String,
    pub geocomp: String,
    pub geoid: String,
    attrs: Vec<String>,
    counts: Vec<Option<i64>>,
}

impl TabulationRow {
    /// Whether this is the whole-unit record rather than a geographic component
    pub fn is_primary(&self) -> bool {
        self.geocomp.is_empty() || self.geocomp == "00"
    }
}

/// Merged header + segment table for one state and year
#[derive(Debug, Clone)]
pub struct TabulationTable {
    pub year: DecennialYear,
    attr_index: HashMap<String, usize>,
    count_index: HashMap<String, usize>,
    rows: Vec<TabulationRow>,
    by_geoid: HashMap<(String, String), usize>,
}

impl TabulationTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[TabulationRow] {
        &self.rows
    }

    /// Primary records at a summary level, in file order
    pub fn rows_at<'a>(&'a self, sumlev: &'a str) -> impl Iterator<Item = &'a TabulationRow> + 'a {
        self.rows
            .iter()
            .filter(move |r| r.sumlev == sumlev && r.is_primary())
    }

    /// Primary record for a GEOID at a summary level
    pub fn row_by_geoid(&self, sumlev: &str, geoid: &str) -> Option<&TabulationRow> {
        self.by_geoid
            .get(&(sumlev.to_string(), geoid.to_string()))
            .map(|&i| &self.rows[i])
    }

    /// Header attribute, trimmed; `None` when absent or blank
    pub fn attr<'a>(&self, row: &'a TabulationRow, column: &str) -> Option<&'a str> {
        self.attr_index
            .get(column)
            .and_then(|&i| row.attrs.get(i))
            .map(|v| v.as_str())
            .filter(|v| !v.is_empty())
    }

    /// Table cell value
    pub fn count(&self, row: &TabulationRow, column: &str) -> Option<i64> {
        self.count_index
            .get(column)
            .and_then(|&i| row.counts.get(i).copied().flatten())
    }

    pub fn has_count_column(&self, column: &str) -> bool {
        self.count_index.contains_key(column)
    }
}

/// Primary records by (summary level, GEOID); the first record wins
fn index_geoids(rows: &[TabulationRow]) -> HashMap<(String, String), usize> {
    let mut by_geoid = HashMap::new();
    for (i, row) in rows.iter().enumerate() {
        if row.is_primary() && !row.geoid.is_empty() {
            by_geoid
                .entry((row.sumlev.clone(), row.geoid.clone()))
                .or_insert(i);
        }
    }
    by_geoid
}

#[cfg(test)]
impl TabulationTable {
    /// In-memory table; each record is `(sumlev, geoid, attrs, counts)` aligned
    /// with `attr_columns` and `count_columns`
    pub(crate) fn from_records(
        year: DecennialYear,
        attr_columns: &[&str],
        count_columns: &[&str],
        records: Vec<(&str, &str, Vec<&str>, Vec<Option<i64>>)>,
    ) -> Self {
        let rows: Vec<TabulationRow> = records
            .into_iter()
            .enumerate()
            .map(|(i, (sumlev, geoid, attrs, counts))| TabulationRow {
                logrecno: format!("{:07}", i + 1),
                sumlev: sumlev.to_string(),
                geocomp: "00".to_string(),
                geoid: geoid.to_string(),
                attrs: attrs.into_iter().map(String::from).collect(),
                counts,
            })
            .collect();
        let index = |columns: &[&str]| -> HashMap<String, usize> {
            columns.iter().enumerate().map(|(i, c)| (c.to_string(), i)).collect()
        };
        Self {
            year,
            attr_index: index(attr_columns),
            count_index: index(count_columns),
            by_geoid: index_geoids(&rows),
            rows,
        }
    }
}

/// Loads PL 94-171 files for one state and year
pub struct TabulationLoader {
    layout: PlLayout,
    state_code: String,
    header_columns: Option<HashSet<String>>,
    count_columns: Option<HashSet<String>>,
}

impl TabulationLoader {
    /// Loader keeping the header attributes the catalog consumes and the
    /// population cells for `year`
    pub fn new(catalog: &GeographyCatalog, state_code: &str, year: DecennialYear) -> Self {
        let mut header_columns: HashSet<String> =
            CORE_HEADER_COLUMNS.iter().map(|c| c.to_string()).collect();
        for geography in catalog.all() {
            header_columns.extend(geography.components.iter().map(|c| c.to_string()));
            header_columns.extend(geography.source_columns().into_iter().map(String::from));
        }
        let count_columns = population_fields(year)
            .iter()
            .flat_map(|f| f.sources.iter().map(|s| s.to_string()))
            .collect();

        Self {
            layout: PlLayout::new(year),
            state_code: state_code.to_ascii_lowercase(),
            header_columns: Some(header_columns),
            count_columns: Some(count_columns),
        }
    }

    /// Keep every header attribute and table cell
    pub fn retain_all(mut self) -> Self {
        self.header_columns = None;
        self.count_columns = None;
        self
    }

    fn keeps_header(&self, column: &str) -> bool {
        self.header_columns
            .as_ref()
            .map_or(true, |set| set.contains(column))
    }

    fn keeps_count(&self, column: &str) -> bool {
        self.count_columns
            .as_ref()
            .map_or(true, |set| set.contains(column))
    }

    /// Load and merge the files found anywhere under `dir`
    pub fn load(&self, dir: &Path) -> Result<TabulationTable, TabulationError> {
        let header_name = self.layout.header_file_name(&self.state_code);
        let header_path = find_file(dir, &header_name)
            .ok_or_else(|| TabulationError::MissingHeader(dir.join(&header_name)))?;

        let (attr_columns, mut rows) = self.read_header(&header_path)?;
        let attr_index: HashMap<String, usize> = attr_columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), i))
            .collect();
        let header_rows = rows.len();

        let mut count_index: HashMap<String, usize> = HashMap::new();
        for number in 1..=self.layout.segment_count() {
            let name = self.layout.segment_file_name(&self.state_code, number);
            let Some(path) = find_file(dir, &name) else {
                warn!(segment = number, file = %name, "Segment file missing, skipping");
                continue;
            };

            let (columns, mut values) = self.read_segment(&path, number)?;
            let offset = count_index.len();
            for (i, column) in columns.iter().enumerate() {
                count_index.insert(column.clone(), offset + i);
            }

            let mut unmatched = 0usize;
            for row in rows.iter_mut() {
                match values.remove(&row.logrecno) {
                    Some(cells) => row.counts.extend(cells),
                    None => {
                        unmatched += 1;
                        row.counts.extend(std::iter::repeat(None).take(columns.len()));
                    }
                }
            }
            if unmatched > 0 {
                warn!(segment = number, unmatched, "Header records without segment data");
            }
            if !values.is_empty() {
                warn!(segment = number, orphaned = values.len(), "Segment records without a header record");
            }
        }

        let by_geoid = index_geoids(&rows);

        debug_assert_eq!(rows.len(), header_rows);
        info!(
            state = %self.state_code,
            year = %self.layout.year,
            rows = rows.len(),
            cells = count_index.len(),
            "Loaded tabulation"
        );

        Ok(TabulationTable {
            year: self.layout.year,
            attr_index,
            count_index,
            rows,
            by_geoid,
        })
    }

    /// Parse the geographic header into rows with attributes and geoid
    fn read_header(&self, path: &Path) -> Result<(Vec<String>, Vec<TabulationRow>), TabulationError> {
        let bytes = std::fs::read(path)?;
        if std::str::from_utf8(&bytes).is_err() {
            warn!(file = %path.display(), "Header is not UTF-8, decoded as Latin-1");
        }

        let all_columns = self.layout.header_columns();
        let kept: Vec<(usize, &str)> = all_columns
            .iter()
            .enumerate()
            .filter(|(_, c)| self.keeps_header(c))
            .map(|(i, c)| (i, *c))
            .collect();
        let position = |name: &str| kept.iter().position(|(_, c)| *c == name);
        let (Some(sumlev_at), Some(geocomp_at), Some(logrecno_at)) =
            (position("SUMLEV"), position("GEOCOMP"), position(JOIN_KEY))
        else {
            return Err(TabulationError::Malformed {
                file: path.display().to_string(),
                line: 0,
                message: "layout lacks identifier columns".to_string(),
            });
        };

        let widths = self.layout.header_widths();
        let mut rows = Vec::new();

        for (line_no, line) in bytes.split(|&b| b == b'\n').enumerate() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let fields = match self.layout.header_format() {
                HeaderFormat::Delimited(delimiter) => {
                    split_delimited(&decode_census_text(line).0, delimiter as char)
                }
                HeaderFormat::FixedWidth => split_fixed(line, &widths),
            };
            if fields.len() < all_columns.len() {
                return Err(TabulationError::Malformed {
                    file: path.display().to_string(),
                    line: line_no + 1,
                    message: format!("expected {} fields, found {}", all_columns.len(), fields.len()),
                });
            }

            let attrs: Vec<String> = kept.iter().map(|(i, _)| fields[*i].trim().to_string()).collect();
            let geoid = self.derive_geoid(&attrs, &kept, sumlev_at);

            rows.push(TabulationRow {
                logrecno: attrs[logrecno_at].clone(),
                sumlev: attrs[sumlev_at].clone(),
                geocomp: attrs[geocomp_at].clone(),
                geoid,
                attrs,
                counts: Vec::new(),
            });
        }

        let columns = kept.iter().map(|(_, c)| c.to_string()).collect();
        Ok((columns, rows))
    }

    fn derive_geoid(&self, attrs: &[String], kept: &[(usize, &str)], sumlev_at: usize) -> String {
        let value = |name: &str| {
            kept.iter()
                .position(|(_, c)| *c == name)
                .map(|i| attrs[i].as_str())
                .unwrap_or("")
        };
        match self.layout.year {
            DecennialYear::Y2020 => strip_geoid_prefix(value("GEOID")).to_string(),
            DecennialYear::Y2010 => match geoid_components_2010(&attrs[sumlev_at]) {
                Some(components) => components.iter().map(|c| value(c)).collect(),
                None => String::new(),
            },
        }
    }

    /// Parse one segment into kept column names and cells keyed by LOGRECNO
    #[allow(clippy::type_complexity)]
    fn read_segment(
        &self,
        path: &Path,
        number: usize,
    ) -> Result<(Vec<String>, HashMap<String, Vec<Option<i64>>>), TabulationError> {
        let all_columns = self.layout.segment_columns(number);
        let (Some(key_at), Some(stusab_at)) = (
            all_columns.iter().position(|c| c == JOIN_KEY),
            all_columns.iter().position(|c| c == "STUSAB"),
        ) else {
            return Ok((Vec::new(), HashMap::new()));
        };
        let kept: Vec<(usize, String)> = all_columns
            .iter()
            .enumerate()
            .filter(|(_, c)| !SEGMENT_DROPPED_COLUMNS.contains(&c.as_str()) && self.keeps_count(c))
            .map(|(i, c)| (i, c.clone()))
            .collect();

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(self.layout.segment_delimiter())
            .from_path(path)
            .map_err(|e| csv_error(path, 0, e))?;

        let mut values = HashMap::new();
        let mut foreign = 0usize;
        for (line_no, record) in reader.byte_records().enumerate() {
            let record = record.map_err(|e| csv_error(path, line_no + 1, e))?;
            if record.len() < all_columns.len() {
                return Err(TabulationError::Malformed {
                    file: path.display().to_string(),
                    line: line_no + 1,
                    message: format!("expected {} fields, found {}", all_columns.len(), record.len()),
                });
            }
            if !decode_field(&record[stusab_at]).eq_ignore_ascii_case(&self.state_code) {
                foreign += 1;
                continue;
            }
            let key = decode_field(&record[key_at]);
            let cells = kept
                .iter()
                .map(|(i, _)| decode_field(&record[*i]).parse::<i64>().ok())
                .collect();
            values.insert(key, cells);
        }

        if foreign > 0 {
            warn!(segment = number, foreign, "Dropped segment records for another state");
        }
        debug!(segment = number, records = values.len(), "Read segment");
        let columns = kept.into_iter().map(|(_, c)| c).collect();
        Ok((columns, values))
    }
}

fn csv_error(path: &Path, line: usize, err: csv::Error) -> TabulationError {
    TabulationError::Malformed {
        file: path.display().to_string(),
        line,
        message: err.to_string(),
    }
}

fn split_delimited(line: &str, delimiter: char) -> Vec<String> {
    line.trim_end_matches(['\r', '\n'])
        .split(delimiter)
        .map(String::from)
        .collect()
}

/// Slice a fixed-width record by byte widths, then decode each field;
/// short lines are padded
fn split_fixed(line: &[u8], widths: &[usize]) -> Vec<String> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let mut fields = Vec::with_capacity(widths.len());
    let mut start = 0;
    for &width in widths {
        let end = (start + width).min(line.len());
        let begin = start.min(line.len());
        fields.push(decode_census_text(&line[begin..end]).0.into_owned());
        start += width;
    }
    fields
}

/// Case-insensitive recursive file lookup
pub fn find_file(dir: &Path, name: &str) -> Option<PathBuf> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .find(|e| e.file_name().to_string_lossy().eq_ignore_ascii_case(name))
        .map(|e| e.into_path())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_fixed_pads_short_lines() {
        let fields = split_fixed(b"ABCDE", &[2, 2, 3]);
        assert_eq!(fields, vec!["AB", "CD", "E"]);
        let fields = split_fixed(b"AB\r", &[2, 2]);
        assert_eq!(fields, vec!["AB", ""]);
    }

    #[test]
    fn test_split_fixed_counts_bytes() {
        // "ñ" is two bytes in UTF-8 and one in Latin-1
        let fields = split_fixed("ñaXY".as_bytes(), &[3, 2]);
        assert_eq!(fields, vec!["ña", "XY"]);
        let fields = split_fixed(b"Cata\xf1oXY", &[6, 2]);
        assert_eq!(fields, vec!["Cataño", "XY"]);
    }

    #[test]
    fn test_missing_header_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let loader = TabulationLoader::new(&GeographyCatalog::new(), "RI", DecennialYear::Y2020);
        assert!(matches!(
            loader.load(dir.path()),
            Err(TabulationError::MissingHeader(_))
        ));
    }
}
