use std::collections::HashMap;

use polars::prelude::*;
use tracing::debug;

use crate::error::PanelError;
use crate::loader::require_columns;
use crate::spec::{Factor, Specification};

/// Numeric design extracted from the panel for one specification.
///
/// Only rows with every referenced column present enter the design.
#[derive(Debug, Clone)]
pub struct Design {
    /// Column names, intercept first when present.
    pub names: Vec<String>,
    /// Row-major regressors, `n_obs × names.len()`.
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    /// Dense cluster ids in first-appearance order.
    pub clusters: Vec<usize>,
    /// Dense group ids per fixed-effect dimension.
    pub fixed_effects: Vec<Vec<usize>>,
    /// Non-zero entries per regressor column.
    pub support: Vec<usize>,
    /// Terms removed because they were identically zero.
    pub dropped: Vec<String>,
}

pub const INTERCEPT: &str = "Intercept";

impl Design {
    pub fn n_obs(&self) -> usize {
        self.y.len()
    }

    pub fn n_cols(&self) -> usize {
        self.names.len()
    }

    pub fn column(&self, j: usize) -> Vec<f64> {
        let p = self.n_cols();
        (0..self.n_obs()).map(|i| self.x[i * p + j]).collect()
    }
}

enum Values {
    Numeric(Vec<Option<f64>>),
    Key(Vec<Option<String>>),
}

impl Values {
    fn is_present(&self, i: usize) -> bool {
        match self {
            Self::Numeric(v) => v[i].is_some_and(f64::is_finite),
            Self::Key(v) => v[i].is_some(),
        }
    }
}

pub fn build_design(df: &DataFrame, spec: &Specification) -> Result<Design, PanelError> {
    let columns = spec.columns();
    let names: Vec<&str> = columns.iter().map(|c| c.as_str()).collect();
    require_columns(df, &names)?;

    // Columns read as keys: fixed effects, cluster and level factors.
    let mut keyed: Vec<&str> = spec.fixed_effects.iter().map(|s| s.as_str()).collect();
    keyed.push(&spec.cluster);
    for term in &spec.terms {
        for factor in &term.factors {
            if let Factor::Level { column, .. } = factor {
                keyed.push(column);
            }
        }
    }

    let mut values: HashMap<&str, Values> = HashMap::new();
    for &name in &names {
        let v = if keyed.contains(&name) {
            Values::Key(key_values(df, name)?)
        } else {
            Values::Numeric(numeric_values(df, name)?)
        };
        values.insert(name, v);
    }

    let rows: Vec<usize> = (0..df.height())
        .filter(|&i| values.values().all(|v| v.is_present(i)))
        .collect();
    debug!(
        spec = %spec.name,
        outcome = %spec.outcome,
        rows = rows.len(),
        dropped = df.height() - rows.len(),
        "estimation sample"
    );

    let numeric = |name: &str, i: usize| match &values[name] {
        Values::Numeric(v) => v[i].unwrap_or(f64::NAN),
        Values::Key(_) => f64::NAN,
    };
    let key = |name: &str, i: usize| -> String {
        match &values[name] {
            Values::Key(v) => v[i].clone().unwrap_or_default(),
            Values::Numeric(v) => v[i].map(|x| x.to_string()).unwrap_or_default(),
        }
    };

    let y: Vec<f64> = rows.iter().map(|&i| numeric(&spec.outcome, i)).collect();

    // Column-major first so empty terms can be dropped cheaply.
    let mut col_names = Vec::new();
    let mut col_values: Vec<Vec<f64>> = Vec::new();
    if spec.intercept {
        col_names.push(INTERCEPT.to_string());
        col_values.push(vec![1.0; rows.len()]);
    }
    let mut dropped = Vec::new();
    for term in &spec.terms {
        let column: Vec<f64> = rows
            .iter()
            .map(|&i| {
                term.factors
                    .iter()
                    .map(|f| match f {
                        Factor::Var(c) => numeric(c, i),
                        Factor::Level { column, level } => (key(column, i) == *level) as i32 as f64,
                    })
                    .product::<f64>()
            })
            .collect();
        if spec.drop_empty_terms && column.iter().all(|v| *v == 0.0) {
            dropped.push(term.name());
            continue;
        }
        col_names.push(term.name());
        col_values.push(column);
    }
    if !dropped.is_empty() {
        debug!(spec = %spec.name, dropped = dropped.len(), "dropped empty terms");
    }

    let p = col_names.len();
    let mut x = vec![0.0; rows.len() * p];
    for (j, column) in col_values.iter().enumerate() {
        for (i, v) in column.iter().enumerate() {
            x[i * p + j] = *v;
        }
    }
    let support = col_values
        .iter()
        .map(|c| c.iter().filter(|v| **v != 0.0).count())
        .collect();

    let clusters = dense_ids(rows.iter().map(|&i| key(&spec.cluster, i)));
    let fixed_effects = spec
        .fixed_effects
        .iter()
        .map(|fe| dense_ids(rows.iter().map(|&i| key(fe, i))))
        .collect();

    Ok(Design {
        names: col_names,
        x,
        y,
        clusters,
        fixed_effects,
        support,
        dropped,
    })
}

/// Map keys to 0-based ids in order of first appearance.
pub fn dense_ids(keys: impl Iterator<Item = String>) -> Vec<usize> {
    let mut ids: HashMap<String, usize> = HashMap::new();
    keys.map(|k| {
        let next = ids.len();
        *ids.entry(k).or_insert(next)
    })
    .collect()
}

fn numeric_values(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>, PanelError> {
    let column = df.column(name)?.cast(&DataType::Float64)?;
    Ok(column.f64()?.into_iter().collect())
}

fn key_values(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>, PanelError> {
    let column = df.column(name)?.cast(&DataType::String)?;
    Ok(column
        .str()?
        .into_iter()
        .map(|v| v.map(|s| s.to_string()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::spec::Term;

    fn spec(terms: Vec<Term>) -> Specification {
        Specification {
            name: "test".into(),
            outcome: "y".into(),
            terms,
            intercept: true,
            fixed_effects: vec!["year".into()],
            cluster: "city".into(),
            reported: None,
            event_terms: Vec::new(),
            drop_empty_terms: false,
        }
    }

    fn frame() -> DataFrame {
        df!(
            "city" => ["a", "a", "b", "b", "c"],
            "year" => [2000i32, 2001, 2000, 2001, 2000],
            "y" => [Some(1.0), Some(2.0), None, Some(4.0), Some(5.0)],
            "x" => [1.0, 2.0, 3.0, 4.0, 5.0],
            "level" => [Some("High"), Some("Moderate"), Some("High"), None, Some("High")],
        )
        .unwrap()
    }

    #[test]
    fn test_listwise_deletion_is_local() {
        let d = build_design(&frame(), &spec(vec![Term::var("x")])).unwrap();
        assert_eq!(d.n_obs(), 4);
        assert_eq!(d.names, vec![INTERCEPT, "x"]);
        assert_eq!(d.column(1), vec![1.0, 2.0, 4.0, 5.0]);
        assert_eq!(d.clusters, vec![0, 0, 1, 2]);
        assert_eq!(d.fixed_effects, vec![vec![0, 1, 1, 0]]);

        // Referencing `level` also drops the row where it is missing.
        let d = build_design(
            &frame(),
            &spec(vec![Term::by_level("x", "level", "High")]),
        )
        .unwrap();
        assert_eq!(d.n_obs(), 3);
        assert_eq!(d.names[1], "x:level[T.High]");
        assert_eq!(d.column(1), vec![1.0, 0.0, 5.0]);
        assert_eq!(d.support, vec![3, 2]);
    }

    #[test]
    fn test_products_and_empty_terms() {
        let mut s = spec(vec![
            Term::product(&["x", "x"]),
            Term::by_level("x", "level", "Alarming"),
        ]);
        let d = build_design(&frame(), &s).unwrap();
        assert_eq!(d.column(1), vec![1.0, 4.0, 25.0]);
        assert_eq!(d.column(2), vec![0.0, 0.0, 0.0]);

        s.drop_empty_terms = true;
        let d = build_design(&frame(), &s).unwrap();
        assert_eq!(d.n_cols(), 2);
        assert_eq!(d.dropped, vec!["x:level[T.Alarming]"]);
    }

    #[test]
    fn test_missing_column() {
        let err = build_design(&frame(), &spec(vec![Term::var("pce")])).unwrap_err();
        assert!(matches!(err, PanelError::MissingColumn(c) if c == "pce"));
    }

    #[test]
    fn test_dense_ids_first_appearance() {
        let ids = dense_ids(["k", "b", "k", "a"].iter().map(|s| s.to_string()));
        assert_eq!(ids, vec![0, 1, 0, 2]);
    }
}
