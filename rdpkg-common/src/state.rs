//! State descriptors
//!
//! A [`State`] is what the build entry point receives: which state, which
//! decennial year, and where the package file lives.

use crate::{Error, Result};
use std::path::PathBuf;

/// Static identity of a state or state-equivalent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateInfo {
    /// USPS code, e.g. `AL`
    pub code: &'static str,
    /// Two-digit FIPS code
    pub fips: &'static str,
    /// Display name as used in Census download paths
    pub name: &'static str,
}

const STATES: &[StateInfo] = &[
    StateInfo { code: "AL", fips: "01", name: "Alabama" },
    StateInfo { code: "AK", fips: "02", name: "Alaska" },
    StateInfo { code: "AZ", fips: "04", name: "Arizona" },
    StateInfo { code: "AR", fips: "05", name: "Arkansas" },
    StateInfo { code: "CA", fips: "06", name: "California" },
    StateInfo { code: "CO", fips: "08", name: "Colorado" },
    StateInfo { code: "CT", fips: "09", name: "Connecticut" },
    StateInfo { code: "DE", fips: "10", name: "Delaware" },
    StateInfo { code: "DC", fips: "11", name: "District of Columbia" },
    StateInfo { code: "FL", fips: "12", name: "Florida" },
    StateInfo { code: "GA", fips: "13", name: "Georgia" },
    StateInfo { code: "HI", fips: "15", name: "Hawaii" },
    StateInfo { code: "ID", fips: "16", name: "Idaho" },
    StateInfo { code: "IL", fips: "17", name: "Illinois" },
    StateInfo { code: "IN", fips: "18", name: "Indiana" },
    StateInfo { code: "IA", fips: "19", name: "Iowa" },
    StateInfo { code: "KS", fips: "20", name: "Kansas" },
    StateInfo { code: "KY", fips: "21", name: "Kentucky" },
    StateInfo { code: "LA", fips: "22", name: "Louisiana" },
    StateInfo { code: "ME", fips: "23", name: "Maine" },
    StateInfo { code: "MD", fips: "24", name: "Maryland" },
    StateInfo { code: "MA", fips: "25", name: "Massachusetts" },
    StateInfo { code: "MI", fips: "26", name: "Michigan" },
    StateInfo { code: "MN", fips: "27", name: "Minnesota" },
    StateInfo { code: "MS", fips: "28", name: "Mississippi" },
    StateInfo { code: "MO", fips: "29", name: "Missouri" },
    StateInfo { code: "MT", fips: "30", name: "Montana" },
    StateInfo { code: "NE", fips: "31", name: "Nebraska" },
    StateInfo { code: "NV", fips: "32", name: "Nevada" },
    StateInfo { code: "NH", fips: "33", name: "New Hampshire" },
    StateInfo { code: "NJ", fips: "34", name: "New Jersey" },
    StateInfo { code: "NM", fips: "35", name: "New Mexico" },
    StateInfo { code: "NY", fips: "36", name: "New York" },
    StateInfo { code: "NC", fips: "37", name: "North Carolina" },
    StateInfo { code: "ND", fips: "38", name: "North Dakota" },
    StateInfo { code: "OH", fips: "39", name: "Ohio" },
    StateInfo { code: "OK", fips: "40", name: "Oklahoma" },
    StateInfo { code: "OR", fips: "41", name: "Oregon" },
    StateInfo { code: "PA", fips: "42", name: "Pennsylvania" },
    StateInfo { code: "RI", fips: "44", name: "Rhode Island" },
    StateInfo { code: "SC", fips: "45", name: "South Carolina" },
    StateInfo { code: "SD", fips: "46", name: "South Dakota" },
    StateInfo { code: "TN", fips: "47", name: "Tennessee" },
    StateInfo { code: "TX", fips: "48", name: "Texas" },
    StateInfo { code: "UT", fips: "49", name: "Utah" },
    StateInfo { code: "VT", fips: "50", name: "Vermont" },
    StateInfo { code: "VA", fips: "51", name: "Virginia" },
    StateInfo { code: "WA", fips: "53", name: "Washington" },
    StateInfo { code: "WV", fips: "54", name: "West Virginia" },
    StateInfo { code: "WI", fips: "55", name: "Wisconsin" },
    StateInfo { code: "WY", fips: "56", name: "Wyoming" },
    StateInfo { code: "PR", fips: "72", name: "Puerto Rico" },
];

impl StateInfo {
    /// Look up a state by USPS code (case-insensitive)
    pub fn by_code(code: &str) -> Result<&'static StateInfo> {
        STATES
            .iter()
            .find(|s| s.code.eq_ignore_ascii_case(code))
            .ok_or_else(|| Error::NotFound(format!("state '{}'", code)))
    }

    /// Look up a state by two-digit FIPS code
    pub fn by_fips(fips: &str) -> Result<&'static StateInfo> {
        STATES
            .iter()
            .find(|s| s.fips == fips)
            .ok_or_else(|| Error::NotFound(format!("state FIPS '{}'", fips)))
    }

    /// All states in FIPS order
    pub fn all() -> &'static [StateInfo] {
        STATES
    }
}

/// Decennial census year supported by the PL 94-171 loaders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecennialYear {
    Y2010,
    Y2020,
}

impl DecennialYear {
    pub fn parse(year: &str) -> Result<Self> {
        match year.trim() {
            "2010" => Ok(Self::Y2010),
            "2020" => Ok(Self::Y2020),
            other => Err(Error::InvalidInput(format!(
                "unsupported decennial year '{}' (expected 2010 or 2020)",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Y2010 => "2010",
            Self::Y2020 => "2020",
        }
    }

    /// Two-digit suffix used in table names and TIGER column names
    pub fn suffix(&self) -> &'static str {
        &self.as_str()[2..]
    }

    /// Default ACS CVAP release paired with this census
    pub fn default_cvap_year(&self) -> u16 {
        match self {
            Self::Y2010 => 2012,
            Self::Y2020 => 2021,
        }
    }
}

impl std::fmt::Display for DecennialYear {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The state a package is built for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    pub info: &'static StateInfo,
    pub year: DecennialYear,
    /// GeoPackage file path
    pub gpkg_path: PathBuf,
}

impl State {
    pub fn new(code: &str, year: &str, gpkg_path: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            info: StateInfo::by_code(code)?,
            year: DecennialYear::parse(year)?,
            gpkg_path: gpkg_path.into(),
        })
    }

    pub fn code(&self) -> &'static str {
        self.info.code
    }

    pub fn fips(&self) -> &'static str {
        self.info.fips
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_code_and_fips() {
        let al = StateInfo::by_code("al").unwrap();
        assert_eq!(al.fips, "01");
        assert_eq!(StateInfo::by_fips("72").unwrap().code, "PR");
        assert!(matches!(StateInfo::by_code("XX"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_year_suffix() {
        assert_eq!(DecennialYear::parse("2020").unwrap().suffix(), "20");
        assert_eq!(DecennialYear::Y2010.suffix(), "10");
        assert!(DecennialYear::parse("2000").is_err());
    }

    #[test]
    fn test_state_descriptor() {
        let state = State::new("VT", "2010", "/tmp/vt.gpkg").unwrap();
        assert_eq!(state.fips(), "50");
        assert_eq!(state.year, DecennialYear::Y2010);
    }
}
