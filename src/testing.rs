//! Shared fixtures for unit tests.

use polars::prelude::*;

use crate::loader::normalize_panel;
use crate::schema::*;

/// (city, state, river, first treated year, level, score, top5, bottom5)
pub(crate) const CITIES: [(&str, &str, &str, Option<i64>, &str, f64, i64, i64); 4] = [
    ("Agra", "Uttar Pradesh", "Yamuna", Some(1999), "Moderate", 450.0, 0, 1),
    ("Kanpur", "Uttar Pradesh", "Ganga", Some(2000), "Very High", 600.0, 1, 0),
    ("Patna", "Bihar", "Ganga", None, "Moderate", 500.0, 0, 0),
    ("Surat", "Gujarat", "Tapi", None, "High", 300.0, 0, 1),
];

pub(crate) const YEARS: [i64; 4] = [1998, 1999, 2000, 2001];

/// Raw 4-city × 4-year panel, year-major (deliberately not in sorted order).
pub(crate) fn toy_panel() -> DataFrame {
    let mut state = Vec::new();
    let mut river = Vec::new();
    let mut district = Vec::new();
    let mut city = Vec::new();
    let mut year = Vec::new();
    let mut nrcp = Vec::new();
    let mut bod = Vec::new();
    let mut fcoli = Vec::new();
    let mut lnfcoli = Vec::new();
    let mut dox = Vec::new();
    let mut score = Vec::new();
    let mut level = Vec::new();
    let mut top5 = Vec::new();
    let mut bottom5 = Vec::new();
    let mut pop = Vec::new();
    let mut lit_u = Vec::new();
    let mut povgap = Vec::new();
    let mut industries = Vec::new();

    for &y in &YEARS {
        for (i, &(c, s, r, first, l, sc, t5, b5)) in CITIES.iter().enumerate() {
            let treated = first.map(|f| y >= f).unwrap_or(false);
            let base = 3.0 + i as f64 + 0.25 * (y - 1998) as f64;
            state.push(s);
            river.push(r);
            district.push(c);
            city.push(c);
            year.push(y);
            nrcp.push(treated as i64);
            bod.push(base - if treated { 1.0 } else { 0.0 });
            let fc = 1000.0 * base;
            fcoli.push(fc);
            lnfcoli.push(fc.ln());
            dox.push(7.0 - 0.1 * base);
            score.push(sc);
            level.push(l);
            top5.push(t5);
            bottom5.push(b5);
            pop.push(1.0e5 * (i + 1) as f64 + 1.0e3 * (y - 1998) as f64);
            lit_u.push(0.6 + 0.01 * i as f64 + 0.005 * (y - 1998) as f64);
            povgap.push(0.2 - 0.01 * i as f64 + 0.003 * ((y * 7 + i as i64) % 5) as f64);
            industries.push((10 + 3 * i as i64 + (y - 1998) * (i as i64 % 2 + 1)) as f64);
        }
    }

    df!(
        ids::STATE => state,
        ids::RIVER => river,
        ids::DISTRICT => district,
        ids::CITY => city,
        ids::YEAR => year,
        treatment::NRCP => nrcp,
        pollutant::BOD => bod,
        pollutant::FCOLI => fcoli,
        pollutant::LN_FCOLI => lnfcoli,
        pollutant::DO => dox,
        corruption::SCORE => score,
        corruption::LEVEL => level,
        corruption::TOP5 => top5,
        corruption::BOTTOM5 => bottom5,
        controls::POP_URBAN => pop,
        controls::LIT_URBAN => lit_u,
        controls::POVGAP => povgap,
        controls::TOTAL_INDUSTRIES => industries,
    )
    .expect("toy panel columns have equal length")
}

pub(crate) fn normalized_toy_panel() -> DataFrame {
    normalize_panel(toy_panel()).expect("toy panel normalizes")
}

/// City description for [`synthetic_panel`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct City {
    pub name: &'static str,
    pub river: &'static str,
    pub first: Option<i32>,
    pub level: &'static str,
    pub score: f64,
}

impl City {
    pub(crate) const fn new(name: &'static str, first: Option<i32>, level: &'static str, score: f64) -> Self {
        Self {
            name,
            river: "Ganga",
            first,
            level,
            score,
        }
    }

    pub(crate) fn treated(&self, year: i32) -> bool {
        self.first.is_some_and(|f| year >= f)
    }

    /// Same rule as the derived corruption flag.
    pub(crate) fn corrupt(&self) -> bool {
        !(self.level == corruption::MODERATE && self.score <= corruption::SCORE_THRESHOLD)
    }
}

/// Balanced normalized panel whose every outcome column equals
/// `outcome(city index, year)`.
pub(crate) fn synthetic_panel(
    cities: &[City],
    years: std::ops::RangeInclusive<i32>,
    outcome: impl Fn(usize, i32) -> f64,
) -> DataFrame {
    let mut name = Vec::new();
    let mut river = Vec::new();
    let mut year = Vec::new();
    let mut nrcp = Vec::new();
    let mut y = Vec::new();
    let mut level = Vec::new();
    let mut score = Vec::new();
    let mut control = Vec::new();

    for (i, c) in cities.iter().enumerate() {
        for t in years.clone() {
            name.push(c.name);
            river.push(c.river);
            year.push(t);
            nrcp.push(c.treated(t) as i32 as f64);
            y.push(outcome(i, t));
            level.push(c.level);
            score.push(c.score);
            control.push(((i as i32 * 31 + t * 17) % 11) as f64);
        }
    }

    let n = y.len();
    let raw = df!(
        ids::STATE => name.clone(),
        ids::RIVER => river,
        ids::DISTRICT => name.clone(),
        ids::CITY => name,
        ids::YEAR => year,
        treatment::NRCP => nrcp,
        pollutant::BOD => y.clone(),
        pollutant::FCOLI => y.clone(),
        pollutant::LN_FCOLI => y.clone(),
        pollutant::DO => y,
        corruption::SCORE => score,
        corruption::LEVEL => level,
        corruption::TOP5 => vec![0.0; n],
        corruption::BOTTOM5 => vec![0.0; n],
        controls::POP_URBAN => control.clone(),
        controls::LIT_URBAN => control.clone(),
        controls::POVGAP => control.clone(),
        controls::TOTAL_INDUSTRIES => control,
    )
    .expect("synthetic panel columns have equal length");
    normalize_panel(raw).expect("synthetic panel normalizes")
}

/// Clean and derive variables with default options.
pub(crate) fn prepare(df: DataFrame) -> DataFrame {
    let cleaned = crate::cleaner::clean_panel(df, Default::default()).expect("panel cleans");
    crate::variables::construct_variables(cleaned).expect("variables construct")
}
