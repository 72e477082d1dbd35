use std::collections::{BTreeSet, HashMap};

use polars::prelude::*;
use tracing::debug;

use crate::error::PanelError;
use crate::schema::*;

/// Derive every analysis variable from a cleaned panel.
///
/// Pure function of its input: nothing is cached, so the result must be
/// recomputed whenever the upstream rows change (for instance after the
/// river filter).
pub fn construct_variables(df: DataFrame) -> Result<DataFrame, PanelError> {
    let mut df = df
        .lazy()
        .with_columns([
            col(ids::YEAR)
                .gt_eq(lit(derived::POST_YEAR))
                .cast(DataType::Int32)
                .alias(derived::POST),
            corruption_flag().alias(derived::CORRUPTION),
        ])
        .with_columns([(col(treatment::NRCP) * col(derived::POST).cast(DataType::Float64))
            .alias(derived::NRCP_POST)])
        .with_columns([(col(derived::NRCP_POST)
            * col(derived::CORRUPTION).cast(DataType::Float64))
        .alias(derived::NRCP_POST_CORRUPTION)])
        .collect()?;

    add_event_columns(&mut df)?;
    Ok(df)
}

/// `0` iff the city is classified Moderate with a score at or below the
/// threshold, `1` otherwise (a missing score counts as corrupt).
pub fn corruption_flag() -> Expr {
    when(
        col(corruption::LEVEL)
            .eq(lit(corruption::MODERATE))
            .and(col(corruption::SCORE).lt_eq(lit(corruption::SCORE_THRESHOLD))),
    )
    .then(lit(0))
    .otherwise(lit(1))
}

/// First year with `nrcp == 1`, per city. Never-treated cities are absent.
pub fn first_treatment_years(df: &DataFrame) -> Result<HashMap<String, i32>, PanelError> {
    let cities = df.column(ids::CITY)?.str()?;
    let years = df.column(ids::YEAR)?.i32()?;
    let nrcp = df.column(treatment::NRCP)?.f64()?;

    let mut first: HashMap<String, i32> = HashMap::new();
    for i in 0..df.height() {
        let (Some(city), Some(year), Some(treated)) = (cities.get(i), years.get(i), nrcp.get(i))
        else {
            continue;
        };
        if treated != 1.0 {
            continue;
        }
        first
            .entry(city.to_string())
            .and_modify(|y| *y = (*y).min(year))
            .or_insert(year);
    }
    Ok(first)
}

/// Dense 1-based rank of the distinct first-treatment years.
pub fn cohort_ids(first: &HashMap<String, i32>) -> HashMap<i32, usize> {
    let distinct: BTreeSet<i32> = first.values().copied().collect();
    distinct
        .into_iter()
        .enumerate()
        .map(|(i, year)| (year, i + 1))
        .collect()
}

/// Add first_treatment, cohort, ever_treated, event_time, the event dummies
/// and their interactions with the corruption score.
fn add_event_columns(df: &mut DataFrame) -> Result<(), PanelError> {
    let first = first_treatment_years(df)?;
    let cohorts = cohort_ids(&first);
    debug!(
        treated_cities = first.len(),
        cohorts = cohorts.len(),
        "derived treatment cohorts"
    );

    let n = df.height();
    let cities = df.column(ids::CITY)?.str()?;
    let years = df.column(ids::YEAR)?.i32()?;
    let scores = df.column(corruption::SCORE)?.f64()?;

    let mut first_col: Vec<Option<i32>> = Vec::with_capacity(n);
    let mut cohort_col: Vec<String> = Vec::with_capacity(n);
    let mut ever_col: Vec<i32> = Vec::with_capacity(n);
    let mut event_col: Vec<Option<i32>> = Vec::with_capacity(n);

    for i in 0..n {
        let first_year = cities.get(i).and_then(|c| first.get(c)).copied();
        first_col.push(first_year);
        ever_col.push(first_year.is_some() as i32);
        cohort_col.push(match first_year {
            Some(y) => cohorts[&y].to_string(),
            None => derived::CONTROL_COHORT.to_string(),
        });
        event_col.push(match (years.get(i), first_year) {
            (Some(year), Some(f)) => Some(year - f),
            _ => None,
        });
    }

    let mut new_columns: Vec<Column> = vec![
        Series::new(derived::FIRST_TREATMENT.into(), first_col).into(),
        Series::new(derived::COHORT.into(), cohort_col).into(),
        Series::new(derived::EVER_TREATED.into(), ever_col).into(),
    ];

    for offset in event::offsets() {
        let dummy: Vec<i32> = event_col
            .iter()
            .map(|t| (*t == Some(offset)) as i32)
            .collect();
        let interaction: Vec<Option<f64>> = dummy
            .iter()
            .enumerate()
            .map(|(i, &d)| scores.get(i).map(|s| d as f64 * s))
            .collect();
        new_columns.push(Series::new(event::dummy(offset).into(), dummy).into());
        new_columns.push(
            Series::new(event::score_interaction(offset).into(), interaction).into(),
        );
    }
    new_columns.push(Series::new(derived::EVENT_TIME.into(), event_col).into());

    for column in new_columns {
        df.with_column(column)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::cleaner::{clean_panel, CleanOptions};
    use crate::testing::normalized_toy_panel;

    fn prepared() -> DataFrame {
        let cleaned = clean_panel(normalized_toy_panel(), CleanOptions::default()).unwrap();
        construct_variables(cleaned).unwrap()
    }

    fn i32_values(df: &DataFrame, name: &str) -> Vec<Option<i32>> {
        df.column(name).unwrap().i32().unwrap().into_iter().collect()
    }

    #[test]
    fn test_post_matches_year_threshold() {
        let df = prepared();
        let years = i32_values(&df, ids::YEAR);
        let post = i32_values(&df, derived::POST);
        for (y, p) in years.iter().zip(&post) {
            assert_eq!(*p, Some((y.unwrap() >= 2000) as i32));
        }
    }

    #[test]
    fn test_corruption_rule_examples() {
        let df = df!(
            corruption::LEVEL => ["Moderate", "Moderate", "Severe", "Moderate", "High"],
            corruption::SCORE => [Some(450.0), Some(500.0), Some(100.0), None, Some(480.0)],
        )
        .unwrap();
        let out = df
            .lazy()
            .select([corruption_flag().alias(derived::CORRUPTION)])
            .collect()
            .unwrap();
        let flags: Vec<Option<i32>> = out
            .column(derived::CORRUPTION)
            .unwrap()
            .i32()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(flags, vec![Some(0), Some(1), Some(1), Some(1), Some(1)]);
    }

    #[test]
    fn test_corruption_threshold_is_inclusive() {
        let df = df!(
            corruption::LEVEL => ["Moderate"],
            corruption::SCORE => [480.0],
        )
        .unwrap();
        let out = df.lazy().select([corruption_flag()]).collect().unwrap();
        let v = out.get_columns()[0].i32().unwrap().get(0);
        assert_eq!(v, Some(0));
    }

    #[test]
    fn test_first_treatment_and_cohorts() {
        let df = prepared();
        let cities = df.column(ids::CITY).unwrap().str().unwrap();
        let first = i32_values(&df, derived::FIRST_TREATMENT);
        let cohort = df.column(derived::COHORT).unwrap().str().unwrap();
        let ever = i32_values(&df, derived::EVER_TREATED);

        for i in 0..df.height() {
            let (expected_first, expected_cohort) = match cities.get(i).unwrap() {
                "Agra" => (Some(1999), "1"),
                "Kanpur" => (Some(2000), "2"),
                _ => (None, derived::CONTROL_COHORT),
            };
            assert_eq!(first[i], expected_first);
            assert_eq!(cohort.get(i), Some(expected_cohort));
            assert_eq!(ever[i], Some(expected_first.is_some() as i32));
        }
    }

    #[test]
    fn test_cohort_ids_are_dense() {
        let first: HashMap<String, i32> = [("a", 1995), ("b", 1993), ("c", 1995), ("d", 2001)]
            .into_iter()
            .map(|(c, y)| (c.to_string(), y))
            .collect();
        let ids = cohort_ids(&first);
        assert_eq!(ids[&1993], 1);
        assert_eq!(ids[&1995], 2);
        assert_eq!(ids[&2001], 3);
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_event_dummies_match_event_time() {
        let df = prepared();
        let years = i32_values(&df, ids::YEAR);
        let first = i32_values(&df, derived::FIRST_TREATMENT);
        let scores = df.column(corruption::SCORE).unwrap().f64().unwrap();

        assert!(df.column(&event::dummy(event::REFERENCE)).is_err());
        assert!(df.column("ev_m1").is_err());

        for offset in event::offsets() {
            let dummy = i32_values(&df, &event::dummy(offset));
            let inter = df
                .column(&event::score_interaction(offset))
                .unwrap()
                .f64()
                .unwrap();
            for i in 0..df.height() {
                let on = matches!((years[i], first[i]), (Some(y), Some(f)) if y - f == offset);
                assert_eq!(dummy[i], Some(on as i32), "offset {offset} row {i}");
                let expected = if on { scores.get(i).unwrap() } else { 0.0 };
                assert_eq!(inter.get(i), Some(expected));
            }
        }
    }

    #[test]
    fn test_interactions_are_products() {
        let df = prepared();
        let nrcp = df.column(treatment::NRCP).unwrap().f64().unwrap();
        let post = i32_values(&df, derived::POST);
        let corr = i32_values(&df, derived::CORRUPTION);
        let np = df.column(derived::NRCP_POST).unwrap().f64().unwrap();
        let npc = df
            .column(derived::NRCP_POST_CORRUPTION)
            .unwrap()
            .f64()
            .unwrap();
        for i in 0..df.height() {
            let expected = nrcp.get(i).unwrap() * post[i].unwrap() as f64;
            assert_eq!(np.get(i), Some(expected));
            assert_eq!(npc.get(i), Some(expected * corr[i].unwrap() as f64));
        }
    }

    #[test]
    fn test_construction_is_deterministic() {
        let a = prepared();
        let b = prepared();
        assert!(a.equals_missing(&b));
    }
}
