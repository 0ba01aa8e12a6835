//! Linear regression with absorbed fixed effects and clustered errors.

use crate::analysis::fixed_effects::{self, FixedEffect};
use crate::analysis::stats;
use crate::logging::{self, DataSource};
use crate::model::{PipelineError, Result};
use nalgebra::{DMatrix, DVector};
use serde::Serialize;

/// Relative sum of squares below which a demeaned regressor is treated as
/// collinear with the fixed effects and dropped.
const COLLINEARITY_TOLERANCE: f64 = 1e-12;

/// Inputs of one model, aligned by observation.
#[derive(Debug, Clone, Default)]
pub struct ModelData {
    pub dependent: String,
    pub y: Vec<f64>,
    pub regressors: Vec<(String, Vec<f64>)>,
    /// Fixed-effect dimensions as (name, group key per observation).
    pub effects: Vec<(String, Vec<String>)>,
    /// Cluster key per observation; iid errors when `None`.
    pub clusters: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Coefficient {
    pub name: String,
    pub estimate: f64,
    pub std_error: f64,
    pub t_stat: f64,
    pub p_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegressionResult {
    pub dependent: String,
    pub coefficients: Vec<Coefficient>,
    /// Regressors collinear with the fixed effects.
    pub dropped: Vec<String>,
    pub n_obs: usize,
    pub n_clusters: Option<usize>,
    pub fixed_effects: Vec<String>,
    pub absorbed: usize,
    pub df_resid: f64,
    pub r2_within: f64,
    pub sweeps: usize,
    pub converged: bool,
}

impl RegressionResult {
    pub fn coefficient(&self, name: &str) -> Option<&Coefficient> {
        self.coefficients.iter().find(|c| c.name == name)
    }
}

fn select<T: Clone>(values: &[T], keep: &[bool]) -> Vec<T> {
    values
        .iter()
        .zip(keep)
        .filter(|(_, k)| **k)
        .map(|(v, _)| v.clone())
        .collect()
}

fn check_length(name: &str, len: usize, expected: usize) -> Result<()> {
    if len != expected {
        return Err(PipelineError::SingularDesign(format!(
            "{} has {} observations, expected {}",
            name, len, expected
        )));
    }
    Ok(())
}

fn invert_normal_matrix(normal: DMatrix<f64>) -> Option<DMatrix<f64>> {
    if let Some(chol) = normal.clone().cholesky() {
        return Some(chol.inverse());
    }
    normal.lu().try_inverse()
}

/// Estimates `y = X b + fixed effects + e` on the rows where the outcome
/// and every regressor are finite.
pub fn fit(data: &ModelData) -> Result<RegressionResult> {
    let n_all = data.y.len();
    for (name, column) in &data.regressors {
        check_length(name, column.len(), n_all)?;
    }
    for (name, keys) in &data.effects {
        check_length(name, keys.len(), n_all)?;
    }
    if let Some(clusters) = &data.clusters {
        check_length("clusters", clusters.len(), n_all)?;
    }

    let keep: Vec<bool> = (0..n_all)
        .map(|i| data.y[i].is_finite() && data.regressors.iter().all(|(_, c)| c[i].is_finite()))
        .collect();
    let n = keep.iter().filter(|k| **k).count();
    if n == 0 {
        return Err(PipelineError::NoData(format!(
            "no complete observation for {}",
            data.dependent
        )));
    }

    let y = select(&data.y, &keep);
    let mut effects: Vec<FixedEffect> = data
        .effects
        .iter()
        .map(|(name, keys)| FixedEffect::from_keys(name, &select(keys, &keep)))
        .collect();
    if effects.is_empty() {
        // Demeaning by a single group is the intercept.
        effects.push(FixedEffect::from_keys("(intercept)", &vec![String::new(); n]));
    }

    let demean = |column: &[f64]| {
        fixed_effects::demean(
            column,
            &effects,
            fixed_effects::DEFAULT_TOLERANCE,
            fixed_effects::DEFAULT_MAX_SWEEPS,
        )
    };
    let y_tilde = demean(&y);
    let mut sweeps = y_tilde.sweeps;
    let mut converged = y_tilde.converged;

    let mut names = Vec::new();
    let mut columns = Vec::new();
    let mut dropped = Vec::new();
    for (name, column) in &data.regressors {
        let raw = select(column, &keep);
        let out = demean(&raw);
        sweeps = sweeps.max(out.sweeps);
        converged &= out.converged;
        let ss_raw: f64 = raw.iter().map(|v| v * v).sum();
        let ss_tilde: f64 = out.values.iter().map(|v| v * v).sum();
        if ss_tilde <= COLLINEARITY_TOLERANCE * ss_raw || ss_raw == 0.0 {
            logging::warn(
                DataSource::Regression,
                Some(&data.dependent),
                &format!("{} collinear with fixed effects, dropped", name),
            );
            dropped.push(name.clone());
        } else {
            names.push(name.clone());
            columns.push(out.values);
        }
    }
    if !converged {
        logging::warn(
            DataSource::Regression,
            Some(&data.dependent),
            &format!("fixed effects not converged after {} sweeps", sweeps),
        );
    }

    let k = columns.len();
    if k == 0 {
        return Err(PipelineError::SingularDesign(format!(
            "no identifiable regressor for {}",
            data.dependent
        )));
    }
    if n <= k {
        return Err(PipelineError::SingularDesign(format!(
            "{} observations for {} regressors",
            n, k
        )));
    }

    let x = DMatrix::<f64>::from_fn(n, k, |i, j| columns[j][i]);
    let yv = DVector::<f64>::from_vec(y_tilde.values);
    let xt = x.transpose();
    let inverse = invert_normal_matrix(&xt * &x)
        .ok_or_else(|| PipelineError::SingularDesign(format!("X'X not invertible for {}", data.dependent)))?;
    let beta = &inverse * (&xt * &yv);
    let residuals = &yv - &x * &beta;

    let ssr = residuals.norm_squared();
    let sst = yv.norm_squared();
    let r2_within = if sst > 0.0 { 1.0 - ssr / sst } else { f64::NAN };
    let absorbed = fixed_effects::absorbed_parameters(&effects);

    let cluster_ids = data
        .clusters
        .as_ref()
        .map(|keys| FixedEffect::from_keys("cluster", &select(keys, &keep)))
        .filter(|c| c.n_groups >= 2);
    if data.clusters.is_some() && cluster_ids.is_none() {
        logging::warn(
            DataSource::Regression,
            Some(&data.dependent),
            "fewer than 2 clusters, using iid standard errors",
        );
    }

    let (covariance, df_resid, n_clusters) = match &cluster_ids {
        Some(clusters) => {
            let g = clusters.n_groups;
            let mut scores = DMatrix::<f64>::zeros(g, k);
            for i in 0..n {
                let group = clusters.groups[i];
                for j in 0..k {
                    scores[(group, j)] += x[(i, j)] * residuals[i];
                }
            }
            let meat = scores.transpose() * &scores;
            let correction = (g as f64 / (g as f64 - 1.0)) * ((n as f64 - 1.0) / (n as f64 - k as f64));
            (&inverse * meat * &inverse * correction, (g - 1) as f64, Some(g))
        }
        None => {
            let df = n as f64 - k as f64 - absorbed as f64;
            let sigma2 = if df > 0.0 { ssr / df } else { f64::NAN };
            (&inverse * sigma2, df, None)
        }
    };

    let coefficients = names
        .into_iter()
        .enumerate()
        .map(|(j, name)| {
            let estimate = beta[j];
            let std_error = covariance[(j, j)].max(0.0).sqrt();
            let t_stat = estimate / std_error;
            Coefficient {
                name,
                estimate,
                std_error,
                t_stat,
                p_value: stats::two_sided_p_value(t_stat, df_resid),
            }
        })
        .collect();

    Ok(RegressionResult {
        dependent: data.dependent.clone(),
        coefficients,
        dropped,
        n_obs: n,
        n_clusters,
        fixed_effects: data.effects.iter().map(|(name, _)| name.clone()).collect(),
        absorbed,
        df_resid,
        r2_within,
        sweeps,
        converged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const X: [f64; 5] = [1.0, 2.0, 3.0, 4.0, 5.0];
    const Y: [f64; 5] = [3.1, 4.9, 7.2, 8.8, 11.0];

    fn simple() -> ModelData {
        ModelData {
            dependent: "y".to_string(),
            y: Y.to_vec(),
            regressors: vec![("x".to_string(), X.to_vec())],
            ..ModelData::default()
        }
    }

    #[test]
    fn test_ols_with_intercept_matches_closed_form() {
        let result = fit(&simple()).unwrap();
        let slope = result.coefficient("x").unwrap();
        assert!((slope.estimate - 1.97).abs() < 1e-10);
        // sigma^2 = 0.091 / 3, se = sqrt(sigma^2 / Sxx) with Sxx = 10
        assert!((slope.std_error - (0.091_f64 / 3.0 / 10.0).sqrt()).abs() < 1e-9);
        assert_eq!(result.df_resid, 3.0);
        assert_eq!(result.n_obs, 5);
        assert!(result.r2_within > 0.99);
    }

    #[test]
    fn test_clustered_errors_apply_cr1_correction() {
        let mut data = simple();
        data.clusters = Some(vec!["a", "b", "c", "d", "e"].into_iter().map(String::from).collect());
        let result = fit(&data).unwrap();
        let slope = result.coefficient("x").unwrap();

        let residuals: Vec<f64> = X.iter().zip(&Y).map(|(x, y)| y - (7.0 + 1.97 * (x - 3.0))).collect();
        let meat: f64 = X.iter().zip(&residuals).map(|(x, e)| ((x - 3.0) * e).powi(2)).sum();
        let correction = (5.0 / 4.0) * (4.0 / 4.0);
        let expected = (correction * meat / 100.0).sqrt();
        assert!((slope.std_error - expected).abs() < 1e-9);
        assert_eq!(result.n_clusters, Some(5));
        assert_eq!(result.df_resid, 4.0);
    }

    #[test]
    fn test_two_way_fixed_effects_recover_slope() {
        let units = ["i1", "i1", "i1", "i2", "i2", "i2", "i3", "i3"];
        let times = ["t1", "t2", "t3", "t1", "t2", "t3", "t1", "t2"];
        let x = [0.3, 1.1, 2.0, -0.5, 0.7, 0.2, 1.5, -1.0];
        let unit_effect = |u: &str| match u {
            "i1" => 1.0,
            "i2" => -2.0,
            _ => 4.0,
        };
        let time_effect = |t: &str| match t {
            "t1" => 0.0,
            "t2" => 0.5,
            _ => -1.0,
        };
        let y: Vec<f64> = (0..8)
            .map(|i| unit_effect(units[i]) + time_effect(times[i]) + 0.5 * x[i])
            .collect();
        let data = ModelData {
            dependent: "y".to_string(),
            y,
            regressors: vec![("x".to_string(), x.to_vec())],
            effects: vec![
                ("unit".to_string(), units.iter().map(|s| s.to_string()).collect()),
                ("time".to_string(), times.iter().map(|s| s.to_string()).collect()),
            ],
            clusters: None,
        };
        let result = fit(&data).unwrap();
        assert!((result.coefficient("x").unwrap().estimate - 0.5).abs() < 1e-8);
        assert!(result.converged);
        assert_eq!(result.absorbed, 5);
        assert_eq!(result.fixed_effects, vec!["unit", "time"]);
    }

    #[test]
    fn test_non_finite_rows_are_dropped() {
        let mut data = simple();
        data.y.push(f64::NAN);
        data.regressors[0].1.push(6.0);
        data.y.push(13.0);
        data.regressors[0].1.push(f64::INFINITY);
        let result = fit(&data).unwrap();
        assert_eq!(result.n_obs, 5);
    }

    #[test]
    fn test_collinear_regressor_is_dropped() {
        let mut data = simple();
        data.regressors.push(("constant".to_string(), vec![1.0; 5]));
        let result = fit(&data).unwrap();
        assert_eq!(result.dropped, vec!["constant"]);
        assert_eq!(result.coefficients.len(), 1);

        data.regressors.remove(0);
        assert!(matches!(fit(&data), Err(PipelineError::SingularDesign(_))));
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        let mut data = simple();
        data.regressors[0].1.pop();
        assert!(fit(&data).is_err());
    }
}
