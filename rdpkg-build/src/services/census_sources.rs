//! Census download locations
//!
//! URL templates for the PL 94-171 archive, TIGER/Line shapefile archives and
//! the CVAP special tabulation. The host comes from configuration so mirrors
//! and local test servers can stand in for www2.census.gov.

use rdpkg_common::state::StateInfo;
use rdpkg_common::DecennialYear;

fn underscored(name: &str) -> String {
    name.replace(' ', "_")
}

/// PL 94-171 redistricting archive for a state
pub fn pl_archive_url(base: &str, state: &StateInfo, year: DecennialYear) -> String {
    let code = state.code.to_ascii_lowercase();
    match year {
        DecennialYear::Y2020 => format!(
            "{base}/programs-surveys/decennial/2020/data/01-Redistricting_File--PL_94-171/{}/{code}2020.pl.zip",
            underscored(state.name)
        ),
        DecennialYear::Y2010 => format!(
            "{base}/census_2010/01-Redistricting_File--PL_94-171/{}/{code}2010.pl.zip",
            underscored(state.name)
        ),
    }
}

/// TIGER/Line archive for one shapefile layer (`tabblock`, `bg`, `vtd`, ...)
pub fn tiger_url(base: &str, state: &StateInfo, year: DecennialYear, layer: &str) -> String {
    let fips = state.fips;
    match year {
        DecennialYear::Y2020 => format!(
            "{base}/geo/tiger/TIGER2020PL/STATE/{fips}_{}/{fips}/tl_2020_{fips}_{layer}20.zip",
            underscored(state.name).to_ascii_uppercase()
        ),
        DecennialYear::Y2010 => format!(
            "{base}/geo/pvs/tiger2010st/{fips}_{}/{fips}/tl_2010_{fips}_{layer}10.zip",
            underscored(state.name)
        ),
    }
}

/// CVAP special tabulation for the five-year ACS release ending in `cvap_year`
pub fn cvap_url(base: &str, cvap_year: u16) -> String {
    format!(
        "{base}/programs-surveys/decennial/rdo/datasets/{cvap_year}/{cvap_year}-cvap/CVAP_{}-{cvap_year}_ACS_csv_files.zip",
        cvap_year.saturating_sub(4)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://www2.census.gov";

    #[test]
    fn test_pl_urls() {
        let nh = StateInfo::by_code("NH").unwrap();
        assert_eq!(
            pl_archive_url(BASE, nh, DecennialYear::Y2020),
            "https://www2.census.gov/programs-surveys/decennial/2020/data/01-Redistricting_File--PL_94-171/New_Hampshire/nh2020.pl.zip"
        );
        assert_eq!(
            pl_archive_url(BASE, nh, DecennialYear::Y2010),
            "https://www2.census.gov/census_2010/01-Redistricting_File--PL_94-171/New_Hampshire/nh2010.pl.zip"
        );
    }

    #[test]
    fn test_tiger_urls() {
        let dc = StateInfo::by_code("DC").unwrap();
        assert_eq!(
            tiger_url(BASE, dc, DecennialYear::Y2020, "tabblock"),
            "https://www2.census.gov/geo/tiger/TIGER2020PL/STATE/11_DISTRICT_OF_COLUMBIA/11/tl_2020_11_tabblock20.zip"
        );
        assert_eq!(
            tiger_url(BASE, dc, DecennialYear::Y2010, "vtd"),
            "https://www2.census.gov/geo/pvs/tiger2010st/11_District_of_Columbia/11/tl_2010_11_vtd10.zip"
        );
    }

    #[test]
    fn test_cvap_url() {
        assert_eq!(
            cvap_url(BASE, 2021),
            "https://www2.census.gov/programs-surveys/decennial/rdo/datasets/2021/2021-cvap/CVAP_2017-2021_ACS_csv_files.zip"
        );
    }
}
