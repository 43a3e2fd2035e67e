//! Geography catalog
//!
//! Declarative registry of the geography levels a package can contain. Every
//! other component is parameterised by a [`Geography`]: the tabulation loader
//! uses its summary levels and GEOID components, the geometry assembler its
//! shapefile layer (or, when there is none, its components for dissolving
//! blocks), the package writer its field specs and indexes, and the CVAP
//! processor its published source file or block id column.
//!
//! The catalog is built once and passed by reference; there is no global.

use crate::state::DecennialYear;
use crate::{Error, Result};

/// SQL storage class of a package column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Integer,
    Real,
    Text,
}

impl SqlType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
        }
    }
}

/// How a field gets its value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSource<'a> {
    /// Derived after load (percentages and the like)
    Computed,
    /// Copied from one source column
    Renamed(&'a str),
    /// Concatenation of several source columns (composite ids)
    Concatenated(&'a [&'static str]),
}

/// One output column of a geography table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub sql_type: SqlType,
    pub nullable: bool,
    /// Source value that means "not in any unit" (e.g. PLACE `99999`)
    pub null_sentinel: Option<&'static str>,
    pub sources: &'static [&'static str],
}

impl FieldSpec {
    pub const fn text(name: &'static str, sources: &'static [&'static str]) -> Self {
        Self {
            name,
            sql_type: SqlType::Text,
            nullable: true,
            null_sentinel: None,
            sources,
        }
    }

    pub const fn integer(name: &'static str, sources: &'static [&'static str]) -> Self {
        Self {
            name,
            sql_type: SqlType::Integer,
            nullable: true,
            null_sentinel: None,
            sources,
        }
    }

    pub const fn real(name: &'static str) -> Self {
        Self {
            name,
            sql_type: SqlType::Real,
            nullable: true,
            null_sentinel: None,
            sources: &[],
        }
    }

    pub const fn sentinel(mut self, value: &'static str) -> Self {
        self.null_sentinel = Some(value);
        self
    }

    pub fn source(&self) -> FieldSource<'_> {
        match self.sources {
            [] => FieldSource::Computed,
            [single] => FieldSource::Renamed(single),
            many => FieldSource::Concatenated(many),
        }
    }

    /// Build this field's value from source attributes
    ///
    /// Returns `None` for computed fields, when any source is missing or blank,
    /// or when the last source equals the null sentinel.
    pub fn resolve<'v>(&self, lookup: impl Fn(&str) -> Option<&'v str>) -> Option<String> {
        if self.sources.is_empty() {
            return None;
        }
        let mut out = String::new();
        for source in self.sources {
            let value = lookup(source)?.trim();
            if value.is_empty() {
                return None;
            }
            out.push_str(value);
        }
        if let (Some(sentinel), Some(last)) = (self.null_sentinel, self.sources.last()) {
            if lookup(last).map(str::trim) == Some(sentinel) {
                return None;
            }
        }
        Some(out)
    }
}

/// Secondary index on a geography table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSpec {
    pub columns: &'static [&'static str],
    pub unique: bool,
}

impl IndexSpec {
    pub const fn on(columns: &'static [&'static str]) -> Self {
        Self {
            columns,
            unique: false,
        }
    }
}

/// A FIPS code component used to build GEOIDs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeoComponent {
    /// Tabulation header column name
    pub name: &'static str,
    pub width: usize,
    /// Value meaning "not part of any unit at this level"
    pub null_sentinel: Option<&'static str>,
}

const COMPONENTS: &[GeoComponent] = &[
    GeoComponent { name: "STATE", width: 2, null_sentinel: None },
    GeoComponent { name: "COUNTY", width: 3, null_sentinel: None },
    GeoComponent { name: "COUSUB", width: 5, null_sentinel: Some("99999") },
    GeoComponent { name: "TRACT", width: 6, null_sentinel: None },
    GeoComponent { name: "BLKGRP", width: 1, null_sentinel: None },
    GeoComponent { name: "BLOCK", width: 4, null_sentinel: None },
    GeoComponent { name: "PLACE", width: 5, null_sentinel: Some("99999") },
    GeoComponent { name: "VTD", width: 6, null_sentinel: None },
    GeoComponent { name: "CONCIT", width: 5, null_sentinel: Some("99999") },
    GeoComponent { name: "AIANHH", width: 4, null_sentinel: Some("9999") },
    GeoComponent { name: "CD", width: 2, null_sentinel: None },
    GeoComponent { name: "SLDU", width: 3, null_sentinel: None },
    GeoComponent { name: "SLDL", width: 3, null_sentinel: None },
];

/// Look up a GEOID component by header column name
pub fn component(name: &str) -> Option<&'static GeoComponent> {
    COMPONENTS.iter().find(|c| c.name == name)
}

/// One administrative or statistical level
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Geography {
    /// Short code used on the command line and in layer names
    pub code: &'static str,
    /// Table-name stem
    pub name: &'static str,
    pub display_name: &'static str,
    pub summary_levels: &'static [&'static str],
    /// Ordered GEOID component header fields
    pub components: &'static [&'static str],
    /// TIGER/Line layer code; `None` means geometry is dissolved from blocks
    pub shapefile: Option<&'static str>,
    /// Published CVAP file stem; `None` means CVAP is aggregated from blocks
    pub cvap_source: Option<&'static str>,
    /// Block table column holding this level's id
    pub block_id_field: Option<&'static str>,
    pub fields: &'static [FieldSpec],
    pub indexes: &'static [IndexSpec],
    /// Restrict to these USPS codes; `None` applies everywhere
    pub states: Option<&'static [&'static str]>,
}

impl Geography {
    /// Expected GEOID length: the sum of component widths
    pub fn geoid_len(&self) -> usize {
        self.components
            .iter()
            .filter_map(|c| component(c))
            .map(|c| c.width)
            .sum()
    }

    pub fn applies_to(&self, state_code: &str) -> bool {
        match self.states {
            None => true,
            Some(codes) => codes.iter().any(|c| c.eq_ignore_ascii_case(state_code)),
        }
    }

    pub fn is_block(&self) -> bool {
        self.code == "block"
    }

    /// Table name for this geography in a package: `{name}{yy}`
    pub fn table_name(&self, year: DecennialYear) -> String {
        format!("{}{}", self.name, year.suffix())
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Source columns consumed by this geography's fields
    pub fn source_columns(&self) -> Vec<&'static str> {
        let mut out: Vec<&'static str> = Vec::new();
        for field in self.fields {
            for source in field.sources {
                if !out.contains(source) {
                    out.push(source);
                }
            }
        }
        out
    }
}

const NAME: FieldSpec = FieldSpec::text("name", &["NAME"]);
const ALAND: FieldSpec = FieldSpec::integer("aland", &["AREALAND"]);
const AWATER: FieldSpec = FieldSpec::integer("awater", &["AREAWATR"]);
const COUNTYID: FieldSpec = FieldSpec::text("countyid", &["STATE", "COUNTY"]);
const TRACTID: FieldSpec = FieldSpec::text("tractid", &["STATE", "COUNTY", "TRACT"]);

const BLOCK_FIELDS: &[FieldSpec] = &[
    NAME,
    FieldSpec::text("statefp", &["STATE"]),
    COUNTYID,
    TRACTID,
    FieldSpec::text("bgid", &["STATE", "COUNTY", "TRACT", "BLKGRP"]),
    FieldSpec::text("cousubid", &["STATE", "COUNTY", "COUSUB"]).sentinel("99999"),
    FieldSpec::text("placeid", &["STATE", "PLACE"]).sentinel("99999"),
    FieldSpec::text("vtdid", &["STATE", "COUNTY", "VTD"]),
    FieldSpec::text("concityid", &["STATE", "CONCIT"]).sentinel("99999"),
    FieldSpec::text("aiannhid", &["STATE", "AIANHH"]).sentinel("9999"),
    ALAND,
    AWATER,
];

const BLOCK_INDEXES: &[IndexSpec] = &[
    IndexSpec::on(&["bgid"]),
    IndexSpec::on(&["tractid"]),
    IndexSpec::on(&["countyid"]),
    IndexSpec::on(&["vtdid"]),
];

const COUNTY_CHILD_FIELDS: &[FieldSpec] = &[NAME, COUNTYID, ALAND, AWATER];
const BLOCKGROUP_FIELDS: &[FieldSpec] = &[NAME, COUNTYID, TRACTID, ALAND, AWATER];
const PLAIN_FIELDS: &[FieldSpec] = &[NAME, ALAND, AWATER];
const COUNTY_INDEX: &[IndexSpec] = &[IndexSpec::on(&["countyid"])];

const CONSOLIDATED_CITY_STATES: &[&str] = &["CT", "GA", "IN", "KS", "KY", "MT", "TN"];

fn builtin_geographies() -> Vec<Geography> {
    vec![
        Geography {
            code: "block",
            name: "block",
            display_name: "Census Block",
            summary_levels: &["750"],
            components: &["STATE", "COUNTY", "TRACT", "BLOCK"],
            shapefile: Some("tabblock"),
            cvap_source: None,
            block_id_field: None,
            fields: BLOCK_FIELDS,
            indexes: BLOCK_INDEXES,
            states: None,
        },
        Geography {
            code: "blockgroup",
            name: "blockgroup",
            display_name: "Census Block Group",
            summary_levels: &["150"],
            components: &["STATE", "COUNTY", "TRACT", "BLKGRP"],
            shapefile: Some("bg"),
            cvap_source: Some("BlockGr"),
            block_id_field: Some("bgid"),
            fields: BLOCKGROUP_FIELDS,
            indexes: COUNTY_INDEX,
            states: None,
        },
        Geography {
            code: "tract",
            name: "tract",
            display_name: "Census Tract",
            summary_levels: &["140"],
            components: &["STATE", "COUNTY", "TRACT"],
            shapefile: Some("tract"),
            cvap_source: Some("Tract"),
            block_id_field: Some("tractid"),
            fields: COUNTY_CHILD_FIELDS,
            indexes: COUNTY_INDEX,
            states: None,
        },
        Geography {
            code: "county",
            name: "county",
            display_name: "County",
            summary_levels: &["050"],
            components: &["STATE", "COUNTY"],
            shapefile: Some("county"),
            cvap_source: Some("County"),
            block_id_field: Some("countyid"),
            fields: PLAIN_FIELDS,
            indexes: &[],
            states: None,
        },
        Geography {
            code: "cousub",
            name: "cousub",
            display_name: "County Subdivision",
            summary_levels: &["060"],
            components: &["STATE", "COUNTY", "COUSUB"],
            shapefile: Some("cousub"),
            cvap_source: None,
            block_id_field: Some("cousubid"),
            fields: COUNTY_CHILD_FIELDS,
            indexes: COUNTY_INDEX,
            states: None,
        },
        Geography {
            code: "place",
            name: "place",
            display_name: "Place",
            summary_levels: &["160"],
            components: &["STATE", "PLACE"],
            shapefile: Some("place"),
            cvap_source: Some("Place"),
            block_id_field: Some("placeid"),
            fields: PLAIN_FIELDS,
            indexes: &[],
            states: None,
        },
        Geography {
            code: "vtd",
            name: "vtd",
            display_name: "Voting District",
            summary_levels: &["700"],
            components: &["STATE", "COUNTY", "VTD"],
            shapefile: Some("vtd"),
            cvap_source: None,
            block_id_field: Some("vtdid"),
            fields: COUNTY_CHILD_FIELDS,
            indexes: COUNTY_INDEX,
            states: None,
        },
        Geography {
            code: "concity",
            name: "concity",
            display_name: "Consolidated City",
            summary_levels: &["170"],
            components: &["STATE", "CONCIT"],
            shapefile: None,
            cvap_source: None,
            block_id_field: Some("concityid"),
            fields: PLAIN_FIELDS,
            indexes: &[],
            states: Some(CONSOLIDATED_CITY_STATES),
        },
        Geography {
            code: "aiannh",
            name: "aiannh",
            display_name: "American Indian/Alaska Native/Native Hawaiian Area",
            summary_levels: &["280"],
            components: &["STATE", "AIANHH"],
            shapefile: None,
            cvap_source: None,
            block_id_field: Some("aiannhid"),
            fields: PLAIN_FIELDS,
            indexes: &[],
            states: None,
        },
        Geography {
            code: "state",
            name: "state",
            display_name: "State",
            summary_levels: &["040"],
            components: &["STATE"],
            shapefile: None,
            cvap_source: Some("State"),
            block_id_field: Some("statefp"),
            fields: PLAIN_FIELDS,
            indexes: &[],
            states: None,
        },
    ]
}

/// Immutable registry of geography levels
#[derive(Debug, Clone)]
pub struct GeographyCatalog {
    geographies: Vec<Geography>,
}

impl Default for GeographyCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl GeographyCatalog {
    /// Catalog of the built-in levels, `block` first
    pub fn new() -> Self {
        Self {
            geographies: builtin_geographies(),
        }
    }

    pub fn get(&self, code: &str) -> Result<&Geography> {
        self.geographies
            .iter()
            .find(|g| g.code == code)
            .ok_or_else(|| Error::NotFound(format!("geography '{}'", code)))
    }

    /// All levels in insertion order
    pub fn all(&self) -> impl Iterator<Item = &Geography> {
        self.geographies.iter()
    }

    pub fn block(&self) -> &Geography {
        // Always constructed first by builtin_geographies()
        &self.geographies[0]
    }

    pub fn by_summary_level(&self, sumlev: &str) -> Option<&Geography> {
        self.geographies
            .iter()
            .find(|g| g.summary_levels.contains(&sumlev))
    }

    /// Levels that apply to a state, in insertion order
    pub fn applicable<'a>(&'a self, state_code: &'a str) -> impl Iterator<Item = &'a Geography> + 'a {
        self.geographies
            .iter()
            .filter(move |g| g.applies_to(state_code))
    }

    /// `{geography.name}{yy}`
    pub fn table_name(&self, code: &str, year: DecennialYear) -> Result<String> {
        Ok(self.get(code)?.table_name(year))
    }
}
