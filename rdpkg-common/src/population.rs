//! PL 94-171 population field registry
//!
//! Maps PL table cells onto the canonical population, voting-age and housing
//! columns every geography table carries, plus the percentage columns derived
//! from them. P2 and P4 share a layout, so the VAP fields mirror the total
//! population fields cell for cell.

use crate::geography::FieldSpec;
use crate::state::DecennialYear;

/// Total population (P2, Hispanic or Latino by race)
const POPULATION_FIELDS: &[FieldSpec] = &[
    FieldSpec::integer("pop_total", &["P0020001"]),
    FieldSpec::integer("pop_hispanic", &["P0020002"]),
    FieldSpec::integer("pop_nonhispanic", &["P0020003"]),
    FieldSpec::integer("pop_white", &["P0020005"]),
    FieldSpec::integer("pop_black", &["P0020006"]),
    FieldSpec::integer("pop_aian", &["P0020007"]),
    FieldSpec::integer("pop_asian", &["P0020008"]),
    FieldSpec::integer("pop_nhpi", &["P0020009"]),
    FieldSpec::integer("pop_other", &["P0020010"]),
    FieldSpec::integer("pop_two", &["P0020011"]),
    FieldSpec::integer("pop_white_black", &["P0020013"]),
    FieldSpec::integer("pop_white_aian", &["P0020014"]),
    FieldSpec::integer("pop_white_asian", &["P0020015"]),
    FieldSpec::integer("pop_black_aian", &["P0020018"]),
];

/// Voting-age population (P4)
const VAP_FIELDS: &[FieldSpec] = &[
    FieldSpec::integer("vap_total", &["P0040001"]),
    FieldSpec::integer("vap_hispanic", &["P0040002"]),
    FieldSpec::integer("vap_nonhispanic", &["P0040003"]),
    FieldSpec::integer("vap_white", &["P0040005"]),
    FieldSpec::integer("vap_black", &["P0040006"]),
    FieldSpec::integer("vap_aian", &["P0040007"]),
    FieldSpec::integer("vap_asian", &["P0040008"]),
    FieldSpec::integer("vap_nhpi", &["P0040009"]),
    FieldSpec::integer("vap_other", &["P0040010"]),
    FieldSpec::integer("vap_two", &["P0040011"]),
    FieldSpec::integer("vap_white_black", &["P0040013"]),
    FieldSpec::integer("vap_white_aian", &["P0040014"]),
    FieldSpec::integer("vap_white_asian", &["P0040015"]),
    FieldSpec::integer("vap_black_aian", &["P0040018"]),
];

/// Housing occupancy (H1)
const HOUSING_FIELDS: &[FieldSpec] = &[
    FieldSpec::integer("hu_total", &["H0010001"]),
    FieldSpec::integer("hu_occupied", &["H0010002"]),
    FieldSpec::integer("hu_vacant", &["H0010003"]),
];

/// Group quarters (P5), only published from 2020 on
const GROUP_QUARTERS_FIELDS: &[FieldSpec] = &[
    FieldSpec::integer("gq_total", &["P0050001"]),
    FieldSpec::integer("gq_institutional", &["P0050002"]),
    FieldSpec::integer("gq_noninstitutional", &["P0050007"]),
];

/// A percentage column: `numerator / denominator`, NULL when the denominator is zero
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PercentSpec {
    pub name: &'static str,
    pub numerator: &'static str,
    pub denominator: &'static str,
}

const fn pct(name: &'static str, numerator: &'static str, denominator: &'static str) -> PercentSpec {
    PercentSpec {
        name,
        numerator,
        denominator,
    }
}

const PERCENT_FIELDS: &[PercentSpec] = &[
    pct("pct_hispanic", "pop_hispanic", "pop_total"),
    pct("pct_nonhispanic", "pop_nonhispanic", "pop_total"),
    pct("pct_white", "pop_white", "pop_total"),
    pct("pct_black", "pop_black", "pop_total"),
    pct("pct_aian", "pop_aian", "pop_total"),
    pct("pct_asian", "pop_asian", "pop_total"),
    pct("pct_nhpi", "pop_nhpi", "pop_total"),
    pct("pct_other", "pop_other", "pop_total"),
    pct("pct_two", "pop_two", "pop_total"),
    pct("pct_vap_hispanic", "vap_hispanic", "vap_total"),
    pct("pct_vap_nonhispanic", "vap_nonhispanic", "vap_total"),
    pct("pct_vap_white", "vap_white", "vap_total"),
    pct("pct_vap_black", "vap_black", "vap_total"),
    pct("pct_vap_aian", "vap_aian", "vap_total"),
    pct("pct_vap_asian", "vap_asian", "vap_total"),
    pct("pct_vap_nhpi", "vap_nhpi", "vap_total"),
    pct("pct_vap_other", "vap_other", "vap_total"),
    pct("pct_vap_two", "vap_two", "vap_total"),
];

/// Count fields carried by every geography table for a census year
pub fn population_fields(year: DecennialYear) -> Vec<FieldSpec> {
    let mut fields: Vec<FieldSpec> = POPULATION_FIELDS
        .iter()
        .chain(VAP_FIELDS)
        .chain(HOUSING_FIELDS)
        .copied()
        .collect();
    if year == DecennialYear::Y2020 {
        fields.extend_from_slice(GROUP_QUARTERS_FIELDS);
    }
    fields
}

/// Percentage fields derived from [`population_fields`]
pub fn percent_fields() -> &'static [PercentSpec] {
    PERCENT_FIELDS
}

/// Ratio with the null rule used for every percentage column
pub fn ratio(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    match (numerator, denominator) {
        (Some(n), Some(d)) if d != 0.0 => {
            let r = n / d;
            r.is_finite().then_some(r)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_quarters_only_in_2020() {
        let f2010 = population_fields(DecennialYear::Y2010);
        let f2020 = population_fields(DecennialYear::Y2020);
        assert!(!f2010.iter().any(|f| f.name == "gq_total"));
        assert!(f2020.iter().any(|f| f.name == "gq_total"));
        assert_eq!(f2020.len(), f2010.len() + 3);
    }

    #[test]
    fn test_percent_fields_reference_known_columns() {
        let fields = population_fields(DecennialYear::Y2010);
        for p in percent_fields() {
            assert!(fields.iter().any(|f| f.name == p.numerator), "{}", p.numerator);
            assert!(fields.iter().any(|f| f.name == p.denominator), "{}", p.denominator);
        }
    }

    #[test]
    fn test_ratio_null_safety() {
        assert_eq!(ratio(Some(5.0), Some(10.0)), Some(0.5));
        assert_eq!(ratio(Some(5.0), Some(0.0)), None);
        assert_eq!(ratio(None, Some(3.0)), None);
        assert_eq!(ratio(Some(0.0), Some(0.0)), None);
    }
}
