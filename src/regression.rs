//! Fitting a [`Specification`] on a prepared panel.

use std::collections::{BTreeMap, HashMap};

use nalgebra::{DMatrix, DVector};
use polars::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::design::{build_design, Design};
use crate::error::PanelError;
use crate::hdfe::FixedEffects;
use crate::ols::{self, OlsFit};
use crate::schema::event;
use crate::spec::Specification;

/// A regressor whose norm shrinks below this fraction after absorbing the
/// fixed effects is treated as collinear with them.
const FE_COLLINEARITY_RTOL: f64 = 1e-8;

#[derive(Debug, Clone, Serialize)]
pub struct Coefficient {
    pub term: String,
    pub estimate: f64,
    pub std_error: f64,
    pub z: f64,
    pub p_value: f64,
    pub ci_low: f64,
    pub ci_high: f64,
}

/// One point of an event-time profile.
#[derive(Debug, Clone, Serialize)]
pub struct EventPoint {
    pub offset: i32,
    pub estimate: f64,
    pub std_error: f64,
    pub ci_low: f64,
    pub ci_high: f64,
    /// The omitted period, fixed at zero.
    pub reference: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegressionResult {
    pub specification: String,
    pub outcome: String,
    pub formula: String,
    /// Reported coefficients only.
    pub coefficients: Vec<Coefficient>,
    pub n_obs: usize,
    pub n_clusters: usize,
    pub df_absorbed: usize,
    pub r_squared: f64,
    pub dropped_terms: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub event_profile: Vec<EventPoint>,
}

impl RegressionResult {
    pub fn coefficient(&self, term: &str) -> Option<&Coefficient> {
        self.coefficients.iter().find(|c| c.term == term)
    }

    /// Reported coefficients as a DataFrame, one row per term.
    pub fn to_frame(&self) -> Result<DataFrame, PanelError> {
        let pick = |f: fn(&Coefficient) -> f64| -> Vec<f64> { self.coefficients.iter().map(f).collect() };
        Ok(df!(
            "term" => self.coefficients.iter().map(|c| c.term.as_str()).collect::<Vec<_>>(),
            "estimate" => pick(|c| c.estimate),
            "std_error" => pick(|c| c.std_error),
            "z" => pick(|c| c.z),
            "p_value" => pick(|c| c.p_value),
            "ci_low" => pick(|c| c.ci_low),
            "ci_high" => pick(|c| c.ci_high),
        )?)
    }
}

/// Fit `spec` on `df` with city-clustered standard errors.
///
/// Failure order: fewer than two clusters, a regressor absorbed by the fixed
/// effects, too few observations, then a rank-deficient design.
pub fn fit_specification(
    df: &DataFrame,
    spec: &Specification,
) -> Result<RegressionResult, PanelError> {
    let label = format!("{}/{}", spec.name, spec.outcome);
    let design = build_design(df, spec)?;
    ols::require_clusters(&label, ols::count_clusters(&design.clusters))?;
    if design.n_cols() == 0 {
        return Err(PanelError::Validation(format!("{label}: no regressors")));
    }

    let (columns, y, df_absorbed) = absorb(&label, &design)?;
    let (n, p) = (design.n_obs(), design.n_cols());
    let x = DMatrix::from_fn(n, p, |i, j| columns[j][i]);
    let fit = ols::fit_clustered(&label, &x, &DVector::from_vec(y), &design.clusters, df_absorbed)?;

    let mean = design.y.iter().sum::<f64>() / n as f64;
    let tss: f64 = design.y.iter().map(|v| (v - mean).powi(2)).sum();
    let r_squared = if tss > 0.0 { 1.0 - fit.rss / tss } else { f64::NAN };

    let mut coefficients = Vec::with_capacity(p);
    for (j, name) in design.names.iter().enumerate() {
        let reported = spec
            .reported
            .as_ref()
            .map_or(true, |r| r.iter().any(|t| t == name));
        if !reported {
            continue;
        }
        let (estimate, std_error) = (fit.coefficients[j], fit.std_errors[j]);
        let inf = ols::normal_inference(estimate, std_error)?;
        coefficients.push(Coefficient {
            term: name.clone(),
            estimate,
            std_error,
            z: inf.z,
            p_value: inf.p_value,
            ci_low: inf.ci_low,
            ci_high: inf.ci_high,
        });
    }

    let event_profile = event_profile(spec, &design, &fit)?;

    info!(
        spec = %spec.name,
        outcome = %spec.outcome,
        n_obs = fit.n_obs,
        clusters = fit.n_clusters,
        r_squared,
        "fitted model"
    );

    Ok(RegressionResult {
        specification: spec.name.clone(),
        outcome: spec.outcome.clone(),
        formula: spec.formula(),
        coefficients,
        n_obs: fit.n_obs,
        n_clusters: fit.n_clusters,
        df_absorbed,
        r_squared,
        dropped_terms: design.dropped.clone(),
        event_profile,
    })
}

/// Partial the fixed effects out of every regressor and the outcome.
fn absorb(label: &str, design: &Design) -> Result<(Vec<Vec<f64>>, Vec<f64>, usize), PanelError> {
    let raw: Vec<Vec<f64>> = (0..design.n_cols()).map(|j| design.column(j)).collect();
    if design.fixed_effects.is_empty() {
        return Ok((raw, design.y.clone(), 0));
    }

    let fe = FixedEffects::new(design.fixed_effects.clone())?;
    let y = fe.partial_out(&design.y)?;
    let mut columns = Vec::with_capacity(raw.len());
    for (j, column) in raw.iter().enumerate() {
        let demeaned = fe.partial_out(column)?;
        if norm(&demeaned) <= FE_COLLINEARITY_RTOL * norm(column) {
            return Err(PanelError::CollinearWithFixedEffects {
                spec: label.to_string(),
                term: design.names[j].clone(),
            });
        }
        columns.push(demeaned);
    }
    let df_absorbed = fe.degrees_of_freedom_absorbed();
    debug!(spec = label, levels = ?fe.levels(), df_absorbed, "absorbed fixed effects");
    Ok((columns, y, df_absorbed))
}

fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Per-offset estimates from the event terms.
///
/// Terms sharing an offset are combined with weights proportional to their
/// number of non-zero observations; the variance is `w'Vw`. The reference
/// period is added at zero.
fn event_profile(
    spec: &Specification,
    design: &Design,
    fit: &OlsFit,
) -> Result<Vec<EventPoint>, PanelError> {
    if spec.event_terms.is_empty() {
        return Ok(Vec::new());
    }
    let index: HashMap<&str, usize> = design
        .names
        .iter()
        .enumerate()
        .map(|(j, name)| (name.as_str(), j))
        .collect();

    let mut by_offset: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
    for et in &spec.event_terms {
        if let Some(&j) = index.get(et.term.as_str()) {
            by_offset.entry(et.offset).or_default().push(j);
        }
    }

    let mut points = Vec::with_capacity(by_offset.len() + 1);
    for (offset, cols) in by_offset {
        let total: usize = cols.iter().map(|&j| design.support[j]).sum();
        if total == 0 {
            continue;
        }
        let weights: Vec<f64> = cols
            .iter()
            .map(|&j| design.support[j] as f64 / total as f64)
            .collect();
        let estimate: f64 = cols
            .iter()
            .zip(&weights)
            .map(|(&j, w)| w * fit.coefficients[j])
            .sum();
        let mut variance = 0.0;
        for (&a, wa) in cols.iter().zip(&weights) {
            for (&b, wb) in cols.iter().zip(&weights) {
                variance += wa * wb * fit.vcov[(a, b)];
            }
        }
        let std_error = variance.max(0.0).sqrt();
        let inf = ols::normal_inference(estimate, std_error)?;
        points.push(EventPoint {
            offset,
            estimate,
            std_error,
            ci_low: inf.ci_low,
            ci_high: inf.ci_high,
            reference: false,
        });
    }

    points.push(EventPoint {
        offset: event::REFERENCE,
        estimate: 0.0,
        std_error: 0.0,
        ci_low: 0.0,
        ci_high: 0.0,
        reference: true,
    });
    points.sort_by_key(|p| p.offset);
    Ok(points)
}
