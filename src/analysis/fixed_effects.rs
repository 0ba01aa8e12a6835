//! Absorption of categorical fixed effects by alternating projections.
//!
//! Each dimension maps every observation to a group. Demeaning a column
//! subtracts group means dimension by dimension, sweeping until no value
//! moves by more than the tolerance. With a single dimension one sweep is
//! exact.

use std::collections::HashMap;

pub const DEFAULT_TOLERANCE: f64 = 1e-10;
pub const DEFAULT_MAX_SWEEPS: usize = 10_000;

#[derive(Debug, Clone, PartialEq)]
pub struct FixedEffect {
    pub name: String,
    /// Group index of each observation.
    pub groups: Vec<usize>,
    pub n_groups: usize,
}

impl FixedEffect {
    /// Factorizes `keys` in order of first appearance.
    pub fn from_keys(name: &str, keys: &[String]) -> Self {
        let mut ids: HashMap<&str, usize> = HashMap::new();
        let groups = keys
            .iter()
            .map(|k| {
                let next = ids.len();
                *ids.entry(k.as_str()).or_insert(next)
            })
            .collect();
        Self {
            name: name.to_string(),
            groups,
            n_groups: ids.len(),
        }
    }

    fn subtract_means(&self, values: &mut [f64]) -> f64 {
        let mut sums = vec![0.0; self.n_groups];
        let mut counts = vec![0usize; self.n_groups];
        for (&g, &v) in self.groups.iter().zip(values.iter()) {
            sums[g] += v;
            counts[g] += 1;
        }
        let mut max_change: f64 = 0.0;
        for (&g, v) in self.groups.iter().zip(values.iter_mut()) {
            let mean = sums[g] / counts[g] as f64;
            *v -= mean;
            max_change = max_change.max(mean.abs());
        }
        max_change
    }
}

/// Outcome of demeaning one column.
#[derive(Debug, Clone, PartialEq)]
pub struct Demeaned {
    pub values: Vec<f64>,
    pub sweeps: usize,
    pub converged: bool,
}

pub fn demean(column: &[f64], effects: &[FixedEffect], tolerance: f64, max_sweeps: usize) -> Demeaned {
    let mut values = column.to_vec();
    if effects.is_empty() {
        return Demeaned {
            values,
            sweeps: 0,
            converged: true,
        };
    }
    for sweep in 1..=max_sweeps {
        let mut max_change: f64 = 0.0;
        for effect in effects {
            max_change = max_change.max(effect.subtract_means(&mut values));
        }
        if max_change < tolerance || effects.len() == 1 {
            return Demeaned {
                values,
                sweeps: sweep,
                converged: true,
            };
        }
    }
    Demeaned {
        values,
        sweeps: max_sweeps,
        converged: false,
    }
}

fn find(parent: &mut [usize], mut x: usize) -> usize {
    while parent[x] != x {
        parent[x] = parent[parent[x]];
        x = parent[x];
    }
    x
}

/// Connected components of the bipartite graph linking groups of `a`
/// and `b` that share an observation.
fn components(a: &FixedEffect, b: &FixedEffect) -> usize {
    let mut parent: Vec<usize> = (0..a.n_groups + b.n_groups).collect();
    for (&ga, &gb) in a.groups.iter().zip(&b.groups) {
        let (ra, rb) = (find(&mut parent, ga), find(&mut parent, a.n_groups + gb));
        if ra != rb {
            parent[ra] = rb;
        }
    }
    (0..parent.len()).filter(|&i| find(&mut parent, i) == i).count()
}

/// Parameters absorbed by the fixed effects.
///
/// Exact for one or two dimensions; further dimensions are counted with
/// their redundancy against the first one only.
pub fn absorbed_parameters(effects: &[FixedEffect]) -> usize {
    let Some((first, rest)) = effects.split_first() else {
        return 0;
    };
    let mut absorbed = first.n_groups;
    for effect in rest {
        absorbed += effect.n_groups.saturating_sub(components(first, effect));
    }
    absorbed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_factorization_preserves_first_appearance() {
        let fe = FixedEffect::from_keys("country", &keys(&["b", "a", "b", "c"]));
        assert_eq!(fe.groups, vec![0, 1, 0, 2]);
        assert_eq!(fe.n_groups, 3);
    }

    #[test]
    fn test_single_dimension_removes_group_means() {
        let fe = FixedEffect::from_keys("g", &keys(&["a", "a", "b", "b"]));
        let out = demean(&[1.0, 3.0, 10.0, 20.0], &[fe], DEFAULT_TOLERANCE, DEFAULT_MAX_SWEEPS);
        assert_eq!(out.values, vec![-1.0, 1.0, -5.0, 5.0]);
        assert!(out.converged);
    }

    #[test]
    fn test_two_dimensions_converge_to_additive_residual() {
        // y = a_i + b_t exactly, so the residual vanishes
        let rows = [("i1", "t1"), ("i1", "t2"), ("i2", "t1"), ("i2", "t2"), ("i3", "t1")];
        let a = FixedEffect::from_keys("i", &rows.iter().map(|r| r.0.to_string()).collect::<Vec<_>>());
        let b = FixedEffect::from_keys("t", &rows.iter().map(|r| r.1.to_string()).collect::<Vec<_>>());
        let effect_i = [1.0, 1.0, 5.0, 5.0, -2.0];
        let effect_t = [0.0, 3.0, 0.0, 3.0, 0.0];
        let y: Vec<f64> = effect_i.iter().zip(&effect_t).map(|(x, z)| x + z).collect();
        let out = demean(&y, &[a, b], DEFAULT_TOLERANCE, DEFAULT_MAX_SWEEPS);
        assert!(out.converged);
        assert!(out.values.iter().all(|v| v.abs() < 1e-8));
    }

    #[test]
    fn test_absorbed_parameters_account_for_redundancy() {
        let i = FixedEffect::from_keys("i", &keys(&["a", "a", "b", "b"]));
        let t = FixedEffect::from_keys("t", &keys(&["1", "2", "1", "2"]));
        // 2 + 2 groups, one connected component
        assert_eq!(absorbed_parameters(&[i.clone(), t]), 3);
        assert_eq!(absorbed_parameters(&[i]), 2);
        assert_eq!(absorbed_parameters(&[]), 0);
    }
}
