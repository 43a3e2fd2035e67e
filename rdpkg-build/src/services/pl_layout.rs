//! PL 94-171 file layouts
//!
//! Column layouts of the geographic header and the numbered data segments for
//! each decennial year. The 2020 header is pipe-delimited; the 2010 header is a
//! fixed-width record described by a byte-width table. Segment columns are the
//! five shared identifiers followed by the table cells in publication order.

use rdpkg_common::DecennialYear;

/// Identifier columns leading every data segment row
pub const SEGMENT_ID_COLUMNS: &[&str] = &["FILEID", "STUSAB", "CHARITER", "CIFSN", "LOGRECNO"];

/// Segment identifiers dropped before the join, plus the join key itself
pub const SEGMENT_DROPPED_COLUMNS: &[&str] = &["FILEID", "STUSAB", "CHARITER", "CIFSN", "LOGRECNO"];

/// Logical record number, the join key between header and segments
pub const JOIN_KEY: &str = "LOGRECNO";

const HEADER_2020: &[&str] = &[
    "FILEID", "STUSAB", "SUMLEV", "GEOVAR", "GEOCOMP", "CHARITER", "CIFSN", "LOGRECNO",
    "GEOID", "GEOCODE", "REGION", "DIVISION", "STATE", "STATENS", "COUNTY", "COUNTYCC",
    "COUNTYNS", "COUSUB", "COUSUBCC", "COUSUBNS", "SUBMCD", "SUBMCDCC", "SUBMCDNS",
    "ESTATE", "ESTATECC", "ESTATENS", "CONCIT", "CONCITCC", "CONCITNS", "PLACE", "PLACECC",
    "PLACENS", "TRACT", "BLKGRP", "BLOCK", "AIANHH", "AIHHTLI", "AIANHHFP", "AIANHHCC",
    "AIANHHNS", "AITS", "AITSFP", "AITSCC", "AITSNS", "TTRACT", "TBLKGRP", "ANRC", "ANRCCC",
    "ANRCNS", "CBSA", "MEMI", "CSA", "METDIV", "NECTA", "NMEMI", "CNECTA", "NECTADIV",
    "CBSAPCI", "NECTAPCI", "UA", "UATYPE", "UR", "CD116", "CD118", "CD119", "CD120", "CD121",
    "SLDU18", "SLDU22", "SLDU24", "SLDU26", "SLDU28", "SLDL18", "SLDL22", "SLDL24", "SLDL26",
    "SLDL28", "VTD", "VTDI", "ZCTA", "SDELM", "SDSEC", "SDUNI", "PUMA", "AREALAND",
    "AREAWATR", "BASENAME", "NAME", "FUNCSTAT", "GCUNI", "POP100", "HU100", "INTPTLAT",
    "INTPTLON", "LSADC", "PARTFLAG", "UGA",
];

/// (column, byte width) of the 500-byte 2010 header record
const HEADER_2010: &[(&str, usize)] = &[
    ("FILEID", 6), ("STUSAB", 2), ("SUMLEV", 3), ("GEOCOMP", 2), ("CHARITER", 3),
    ("CIFSN", 2), ("LOGRECNO", 7), ("REGION", 1), ("DIVISION", 1), ("STATE", 2),
    ("COUNTY", 3), ("COUNTYCC", 2), ("COUNTYSC", 2), ("COUSUB", 5), ("COUSUBCC", 2),
    ("COUSUBSC", 2), ("PLACE", 5), ("PLACECC", 2), ("PLACESC", 2), ("TRACT", 6),
    ("BLKGRP", 1), ("BLOCK", 4), ("IUC", 2), ("CONCIT", 5), ("CONCITCC", 2),
    ("CONCITSC", 2), ("AIANHH", 4), ("AIANHHFP", 5), ("AIANHHCC", 2), ("AIHHTLI", 1),
    ("AITSCE", 3), ("AITS", 5), ("AITSCC", 2), ("TTRACT", 6), ("TBLKGRP", 1),
    ("ANRC", 5), ("ANRCCC", 2), ("CBSA", 5), ("CBSASC", 2), ("METDIV", 5), ("CSA", 3),
    ("NECTA", 5), ("NECTASC", 2), ("NECTADIV", 5), ("CNECTA", 3), ("CBSAPCI", 1),
    ("NECTAPCI", 1), ("UA", 5), ("UASC", 2), ("UATYPE", 1), ("UR", 1), ("CD", 2),
    ("SLDU", 3), ("SLDL", 3), ("VTD", 6), ("VTDI", 1), ("RESERVE2", 3), ("ZCTA5", 5),
    ("SUBMCD", 5), ("SUBMCDCC", 2), ("SDELM", 5), ("SDSEC", 5), ("SDUNI", 5),
    ("AREALAND", 14), ("AREAWATR", 14), ("NAME", 90), ("FUNCSTAT", 1), ("GCUNI", 1),
    ("POP100", 9), ("HU100", 9), ("INTPTLAT", 11), ("INTPTLON", 12), ("LSADC", 2),
    ("PARTFLAG", 1), ("RESERVE3", 6), ("UGA", 5), ("STATENS", 8), ("COUNTYNS", 8),
    ("COUSUBNS", 8), ("PLACENS", 8), ("CONCITNS", 8), ("AIANHHNS", 8), ("AITSNS", 8),
    ("ANRCNS", 8), ("SUBMCDNS", 8), ("CD113", 2), ("CD114", 2), ("CD115", 2),
    ("SLDU2", 3), ("SLDU3", 3), ("SLDU4", 3), ("SLDL2", 3), ("SLDL3", 3), ("SLDL4", 3),
    ("AIANHHSC", 2), ("CSASC", 2), ("CNECTASC", 2), ("MEMI", 1), ("NMEMI", 1),
    ("PUMA", 5), ("RESERVED", 18),
];

/// Summary level → ordered GEOID components, used for 2010 rows
const GEOID_COMPONENTS_2010: &[(&str, &[&str])] = &[
    ("040", &["STATE"]),
    ("050", &["STATE", "COUNTY"]),
    ("060", &["STATE", "COUNTY", "COUSUB"]),
    ("140", &["STATE", "COUNTY", "TRACT"]),
    ("150", &["STATE", "COUNTY", "TRACT", "BLKGRP"]),
    ("160", &["STATE", "PLACE"]),
    ("170", &["STATE", "CONCIT"]),
    ("280", &["STATE", "AIANHH"]),
    ("500", &["STATE", "CD"]),
    ("610", &["STATE", "SLDU"]),
    ("620", &["STATE", "SLDL"]),
    ("700", &["STATE", "COUNTY", "VTD"]),
    ("750", &["STATE", "COUNTY", "TRACT", "BLOCK"]),
];

/// Length of the `SSSVVCCUS`-style prefix on 2020 and CVAP GEOIDs
pub const GEOID_PREFIX_LEN: usize = 9;

/// How header records are split into fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderFormat {
    Delimited(u8),
    FixedWidth,
}

/// One numbered PL table: `{prefix}{table:03}{cell:04}` for cells 1..=cells
#[derive(Debug, Clone, Copy)]
struct PlTable {
    prefix: char,
    table: u8,
    cells: u16,
}

const P1: PlTable = PlTable { prefix: 'P', table: 1, cells: 71 };
const P2: PlTable = PlTable { prefix: 'P', table: 2, cells: 73 };
const P3: PlTable = PlTable { prefix: 'P', table: 3, cells: 71 };
const P4: PlTable = PlTable { prefix: 'P', table: 4, cells: 73 };
const H1: PlTable = PlTable { prefix: 'H', table: 1, cells: 3 };
const P5: PlTable = PlTable { prefix: 'P', table: 5, cells: 10 };

impl PlTable {
    fn columns(&self) -> impl Iterator<Item = String> + '_ {
        (1..=self.cells).map(move |cell| format!("{}{:03}{:04}", self.prefix, self.table, cell))
    }
}

/// Layout of a state's PL files for one decennial year
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlLayout {
    pub year: DecennialYear,
}

impl PlLayout {
    pub fn new(year: DecennialYear) -> Self {
        Self { year }
    }

    pub fn header_format(&self) -> HeaderFormat {
        match self.year {
            DecennialYear::Y2020 => HeaderFormat::Delimited(b'|'),
            DecennialYear::Y2010 => HeaderFormat::FixedWidth,
        }
    }

    pub fn segment_delimiter(&self) -> u8 {
        match self.year {
            DecennialYear::Y2020 => b'|',
            DecennialYear::Y2010 => b',',
        }
    }

    pub fn header_columns(&self) -> Vec<&'static str> {
        match self.year {
            DecennialYear::Y2020 => HEADER_2020.to_vec(),
            DecennialYear::Y2010 => HEADER_2010.iter().map(|(name, _)| *name).collect(),
        }
    }

    /// Byte widths of the fixed-width header; empty for delimited years
    pub fn header_widths(&self) -> Vec<usize> {
        match self.year {
            DecennialYear::Y2020 => Vec::new(),
            DecennialYear::Y2010 => HEADER_2010.iter().map(|(_, width)| *width).collect(),
        }
    }

    pub fn segment_count(&self) -> usize {
        match self.year {
            DecennialYear::Y2020 => 3,
            DecennialYear::Y2010 => 2,
        }
    }

    /// Full column list of segment `number` (1-based)
    pub fn segment_columns(&self, number: usize) -> Vec<String> {
        let tables: &[PlTable] = match (self.year, number) {
            (_, 1) => &[P1, P2],
            (_, 2) => &[P3, P4, H1],
            (DecennialYear::Y2020, 3) => &[P5],
            _ => &[],
        };
        SEGMENT_ID_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(tables.iter().flat_map(|t| t.columns()))
            .collect()
    }

    pub fn header_file_name(&self, state_code: &str) -> String {
        format!("{}geo{}.pl", state_code.to_ascii_lowercase(), self.year)
    }

    pub fn segment_file_name(&self, state_code: &str, number: usize) -> String {
        format!(
            "{}{:05}{}.pl",
            state_code.to_ascii_lowercase(),
            number,
            self.year
        )
    }
}

/// Strip the summary-level prefix from a `7500000US...` style GEOID
pub fn strip_geoid_prefix(raw: &str) -> &str {
    let raw = raw.trim();
    raw.get(GEOID_PREFIX_LEN..).unwrap_or("")
}

/// GEOID components of a 2010 summary level; `None` for unlisted levels
pub fn geoid_components_2010(sumlev: &str) -> Option<&'static [&'static str]> {
    GEOID_COMPONENTS_2010
        .iter()
        .find(|(level, _)| *level == sumlev)
        .map(|(_, components)| *components)
}
