//! Least squares with Liang–Zeger cluster-robust covariance.
//!
//! `V = c · (X'X)⁻¹ (Σ_g X_g' e_g e_g' X_g) (X'X)⁻¹` with the small-sample
//! factor `c = G/(G−1) · (N−1)/(N−K)`, where `K` counts the regressors plus
//! the degrees of freedom absorbed by fixed effects. Inference uses the
//! normal distribution.

use nalgebra::{DMatrix, DVector};
use statrs::distribution::{ContinuousCDF, Normal};

use crate::error::PanelError;

/// Singular values below this fraction of the largest (after scaling every
/// column to unit norm) count as zero.
const RANK_RTOL: f64 = 1e-10;

#[derive(Debug, Clone)]
pub struct OlsFit {
    pub coefficients: Vec<f64>,
    pub std_errors: Vec<f64>,
    pub vcov: DMatrix<f64>,
    pub rss: f64,
    pub n_obs: usize,
    pub n_clusters: usize,
    /// Regressors plus absorbed fixed-effect degrees of freedom.
    pub n_params: usize,
}

/// Normal-theory inference for one coefficient.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Inference {
    pub z: f64,
    pub p_value: f64,
    pub ci_low: f64,
    pub ci_high: f64,
}

/// Number of distinct clusters in a dense 0-based id vector.
pub fn count_clusters(clusters: &[usize]) -> usize {
    let mut seen = vec![false; clusters.iter().copied().max().map_or(0, |m| m + 1)];
    for &g in clusters {
        seen[g] = true;
    }
    seen.into_iter().filter(|s| *s).count()
}

pub fn require_clusters(spec: &str, n_clusters: usize) -> Result<(), PanelError> {
    if n_clusters < 2 {
        return Err(PanelError::DegenerateClusters {
            spec: spec.to_string(),
            clusters: n_clusters,
        });
    }
    Ok(())
}

/// Fit `y = Xβ + e` and cluster the covariance on `clusters`.
///
/// `x` and `y` are expected to have fixed effects already partialled out;
/// `df_absorbed` enters the small-sample correction.
pub fn fit_clustered(
    spec: &str,
    x: &DMatrix<f64>,
    y: &DVector<f64>,
    clusters: &[usize],
    df_absorbed: usize,
) -> Result<OlsFit, PanelError> {
    let (n, p) = x.shape();
    if y.len() != n || clusters.len() != n {
        return Err(PanelError::Validation(format!(
            "{spec}: design has {n} rows, outcome {} and clusters {}",
            y.len(),
            clusters.len()
        )));
    }
    let n_clusters = count_clusters(clusters);
    require_clusters(spec, n_clusters)?;

    let n_params = p + df_absorbed;
    if n <= n_params {
        return Err(PanelError::InsufficientObservations {
            spec: spec.to_string(),
            n_obs: n,
            n_params,
        });
    }

    let rank = numerical_rank(x);
    if rank < p {
        return Err(PanelError::RankDeficient {
            spec: spec.to_string(),
            rank,
            columns: p,
        });
    }

    let xt = x.transpose();
    let chol = (&xt * x)
        .cholesky()
        .ok_or_else(|| PanelError::RankDeficient {
            spec: spec.to_string(),
            rank,
            columns: p,
        })?;
    let beta = chol.solve(&(&xt * y));
    let xtx_inv = chol.inverse();

    let resid = y - x * &beta;
    let rss = resid.norm_squared();
    let vcov = cluster_robust_vcov(x, &resid, &xtx_inv, clusters, n_clusters, n_params);
    let std_errors = (0..p).map(|j| vcov[(j, j)].max(0.0).sqrt()).collect();

    Ok(OlsFit {
        coefficients: beta.iter().copied().collect(),
        std_errors,
        vcov,
        rss,
        n_obs: n,
        n_clusters,
        n_params,
    })
}

/// Rank of `x` after scaling each column to unit norm. A zero column
/// contributes nothing.
pub fn numerical_rank(x: &DMatrix<f64>) -> usize {
    let mut scaled = x.clone();
    for mut column in scaled.column_iter_mut() {
        let norm = column.norm();
        if norm > 0.0 {
            column /= norm;
        }
    }
    let sv = scaled.svd(false, false).singular_values;
    let max = sv.iter().fold(0.0_f64, |m, s| m.max(*s));
    if max == 0.0 {
        return 0;
    }
    sv.iter().filter(|s| **s > RANK_RTOL * max).count()
}

/// Sandwich covariance clustered on dense ids `0..n_clusters`.
pub fn cluster_robust_vcov(
    x: &DMatrix<f64>,
    residuals: &DVector<f64>,
    xtx_inv: &DMatrix<f64>,
    clusters: &[usize],
    n_clusters: usize,
    n_params: usize,
) -> DMatrix<f64> {
    let (n, p) = x.shape();
    let mut scores = DMatrix::<f64>::zeros(n_clusters, p);
    for (i, &g) in clusters.iter().enumerate() {
        let e = residuals[i];
        for j in 0..p {
            scores[(g, j)] += x[(i, j)] * e;
        }
    }
    let meat = scores.transpose() * &scores;

    let g = n_clusters as f64;
    let n_f = n as f64;
    let k = n_params as f64;
    let correction = if g > 1.0 && n_f > k {
        (g / (g - 1.0)) * ((n_f - 1.0) / (n_f - k))
    } else {
        1.0
    };
    xtx_inv * meat * xtx_inv * correction
}

/// z statistic, two-sided p-value and 95% interval.
///
/// A zero standard error yields NaN statistics instead of infinities.
pub fn normal_inference(estimate: f64, std_error: f64) -> Result<Inference, PanelError> {
    let normal = Normal::new(0.0, 1.0).map_err(|e| PanelError::Validation(e.to_string()))?;
    let crit = normal.inverse_cdf(0.975);
    let (z, p_value) = if std_error > 0.0 && std_error.is_finite() {
        let z = estimate / std_error;
        (z, 2.0 * (1.0 - normal.cdf(z.abs())))
    } else {
        (f64::NAN, f64::NAN)
    };
    Ok(Inference {
        z,
        p_value,
        ci_low: estimate - crit * std_error,
        ci_high: estimate + crit * std_error,
    })
}
