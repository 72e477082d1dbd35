//! Absorption of city and year fixed effects by alternating projections.
//!
//! Each fixed-effect dimension is a vector mapping observation index to a
//! 0-based group. One demeaning pass is exact for a single dimension; with
//! two or more the solver sweeps over the dimensions until every group mean
//! of the residual is negligible relative to the scale of the input.

use std::collections::HashSet;

use tracing::warn;

use crate::error::PanelError;

/// Group means below `tol × (1 + max|v|)` count as converged.
const DEFAULT_TOL: f64 = 1e-12;

const DEFAULT_MAX_ITER: usize = 10_000;

#[derive(Debug, Clone)]
pub struct FixedEffects {
    n: usize,
    group_of: Vec<Vec<usize>>,
    n_levels: Vec<usize>,
    members: Vec<Vec<Vec<usize>>>,
    tol: f64,
    max_iter: usize,
}

impl FixedEffects {
    /// `groups` holds one vector per dimension, each of length `n`.
    pub fn new(groups: Vec<Vec<usize>>) -> Result<Self, PanelError> {
        let Some(first) = groups.first() else {
            return Err(PanelError::Validation(
                "at least one fixed-effect dimension required".into(),
            ));
        };
        let n = first.len();
        if n == 0 {
            return Err(PanelError::Validation(
                "fixed effects need at least one observation".into(),
            ));
        }
        if let Some((d, g)) = groups.iter().enumerate().find(|(_, g)| g.len() != n) {
            return Err(PanelError::Validation(format!(
                "fixed-effect dimension {d} has length {}, expected {n}",
                g.len()
            )));
        }

        let mut n_levels = Vec::with_capacity(groups.len());
        let mut members = Vec::with_capacity(groups.len());
        for g in &groups {
            let levels = g.iter().copied().max().unwrap_or(0) + 1;
            let mut idx: Vec<Vec<usize>> = vec![Vec::new(); levels];
            for (i, &gi) in g.iter().enumerate() {
                idx[gi].push(i);
            }
            n_levels.push(levels);
            members.push(idx);
        }

        Ok(Self {
            n,
            group_of: groups,
            n_levels,
            members,
            tol: DEFAULT_TOL,
            max_iter: DEFAULT_MAX_ITER,
        })
    }

    pub fn levels(&self) -> &[usize] {
        &self.n_levels
    }

    /// Residual of `v` after removing every fixed effect.
    pub fn partial_out(&self, v: &[f64]) -> Result<Vec<f64>, PanelError> {
        if v.len() != self.n {
            return Err(PanelError::Validation(format!(
                "vector length {} != {} observations",
                v.len(),
                self.n
            )));
        }
        let mut resid = v.to_vec();
        if self.group_of.len() == 1 {
            self.demean(&mut resid, 0);
            return Ok(resid);
        }

        let scale = 1.0 + v.iter().fold(0.0_f64, |m, x| m.max(x.abs()));
        let threshold = self.tol * scale;
        for _ in 0..self.max_iter {
            for d in 0..self.group_of.len() {
                self.demean(&mut resid, d);
            }
            if self.max_group_mean(&resid) < threshold {
                return Ok(resid);
            }
        }
        warn!(
            max_iter = self.max_iter,
            residual_mean = self.max_group_mean(&resid),
            "fixed-effect projections did not converge"
        );
        Ok(resid)
    }

    /// Degrees of freedom absorbed by the fixed effects.
    ///
    /// One dimension absorbs `levels − 1`. Two dimensions absorb
    /// `levels₀ + levels₁ − components`, where components are counted on the
    /// bipartite graph linking the groups that share an observation. More
    /// dimensions fall back to `Σ levels − 1`.
    pub fn degrees_of_freedom_absorbed(&self) -> usize {
        let total: usize = self.n_levels.iter().sum();
        match self.group_of.len() {
            1 => self.n_levels[0].saturating_sub(1),
            2 => total.saturating_sub(self.connected_components()),
            _ => total.saturating_sub(1),
        }
    }

    fn demean(&self, v: &mut [f64], d: usize) {
        for obs in &self.members[d] {
            if obs.is_empty() {
                continue;
            }
            let mean = obs.iter().map(|&i| v[i]).sum::<f64>() / obs.len() as f64;
            for &i in obs {
                v[i] -= mean;
            }
        }
    }

    fn max_group_mean(&self, v: &[f64]) -> f64 {
        let mut max = 0.0_f64;
        for dim in &self.members {
            for obs in dim.iter().filter(|o| !o.is_empty()) {
                let mean = obs.iter().map(|&i| v[i]).sum::<f64>() / obs.len() as f64;
                max = max.max(mean.abs());
            }
        }
        max
    }

    fn connected_components(&self) -> usize {
        let n0 = self.n_levels[0];
        let total = n0 + self.n_levels[1];
        let mut parent: Vec<usize> = (0..total).collect();
        let mut rank = vec![0u8; total];
        let mut used = vec![false; total];

        for i in 0..self.n {
            let a = self.group_of[0][i];
            let b = n0 + self.group_of[1][i];
            used[a] = true;
            used[b] = true;
            union(&mut parent, &mut rank, a, b);
        }

        let mut roots = HashSet::new();
        for node in (0..total).filter(|&k| used[k]) {
            roots.insert(find(&mut parent, node));
        }
        roots.len()
    }
}

fn find(parent: &mut [usize], mut x: usize) -> usize {
    while parent[x] != x {
        parent[x] = parent[parent[x]];
        x = parent[x];
    }
    x
}

fn union(parent: &mut [usize], rank: &mut [u8], a: usize, b: usize) {
    let ra = find(parent, a);
    let rb = find(parent, b);
    if ra == rb {
        return;
    }
    match rank[ra].cmp(&rank[rb]) {
        std::cmp::Ordering::Less => parent[ra] = rb,
        std::cmp::Ordering::Greater => parent[rb] = ra,
        std::cmp::Ordering::Equal => {
            parent[rb] = ra;
            rank[ra] += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_dimension_is_exact() {
        let fe = FixedEffects::new(vec![vec![0, 0, 0, 1, 1, 1]]).unwrap();
        let r = fe
            .partial_out(&[1.0, 2.0, 3.0, 10.0, 20.0, 30.0])
            .unwrap();
        let expected = [-1.0, 0.0, 1.0, -10.0, 0.0, 10.0];
        for (a, b) in r.iter().zip(expected) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_two_way_additive_effects_vanish() {
        // city effects [5, 10], year effects [1, 2, 3]
        let fe = FixedEffects::new(vec![vec![0, 0, 0, 1, 1, 1], vec![0, 1, 2, 0, 1, 2]]).unwrap();
        let r = fe
            .partial_out(&[6.0, 7.0, 8.0, 11.0, 12.0, 13.0])
            .unwrap();
        assert!(r.iter().all(|v| v.abs() < 1e-10), "{r:?}");
    }

    #[test]
    fn test_two_way_unbalanced_group_means_are_zero() {
        let city = vec![0, 0, 0, 1, 1];
        let year = vec![0, 1, 2, 1, 2];
        let fe = FixedEffects::new(vec![city, year]).unwrap();
        let r = fe.partial_out(&[10.0, 20.0, 30.0, 25.0, 35.0]).unwrap();

        assert!(((r[0] + r[1] + r[2]) / 3.0).abs() < 1e-9);
        assert!(((r[3] + r[4]) / 2.0).abs() < 1e-9);
        assert!(((r[1] + r[3]) / 2.0).abs() < 1e-9);
        assert!(((r[2] + r[4]) / 2.0).abs() < 1e-9);
        // Year 0 is observed only once.
        assert!(r[0].abs() < 1e-9);
    }

    #[test]
    fn test_absorbed_degrees_of_freedom() {
        let one_way = FixedEffects::new(vec![vec![0, 0, 1, 1, 2, 2]]).unwrap();
        assert_eq!(one_way.degrees_of_freedom_absorbed(), 2);

        let city = vec![0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2];
        let year = vec![0, 1, 2, 3, 0, 1, 2, 3, 0, 1, 2, 3];
        let connected = FixedEffects::new(vec![city, year]).unwrap();
        assert_eq!(connected.levels(), &[3, 4]);
        assert_eq!(connected.degrees_of_freedom_absorbed(), 6);

        // Two disconnected city-year blocks.
        let split = FixedEffects::new(vec![vec![0, 0, 1, 1], vec![0, 1, 2, 3]]).unwrap();
        assert_eq!(split.degrees_of_freedom_absorbed(), 4);
    }

    #[test]
    fn test_validation() {
        assert!(FixedEffects::new(vec![]).is_err());
        assert!(FixedEffects::new(vec![vec![]]).is_err());
        assert!(FixedEffects::new(vec![vec![0, 1], vec![0]]).is_err());
        let fe = FixedEffects::new(vec![vec![0, 0, 1, 1]]).unwrap();
        assert!(fe.partial_out(&[1.0, 2.0]).is_err());
    }
}
