//! Significant-event flags and the GeoMet disaster index.
//!
//! Thresholds are computed year by year across countries, so a flag means
//! "among the worst-hit countries of that year" rather than an absolute
//! level. NaN ratios (population zero) never flag.

use crate::model::DisasterRow;
use std::collections::BTreeMap;

pub const ABSOLUTE_DEATHS_THRESHOLD: f64 = 1000.0;

/// Quantile with linear interpolation between closest ranks. NaN values
/// are ignored; `None` when no finite value remains.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let weight = position - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
}

pub fn median(values: &[f64]) -> Option<f64> {
    quantile(values, 0.5)
}

/// Sample standard deviation (n - 1 denominator) of the finite values.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.len() < 2 {
        return None;
    }
    let n = finite.len() as f64;
    let mean = finite.iter().sum::<f64>() / n;
    let ss: f64 = finite.iter().map(|v| (v - mean).powi(2)).sum();
    Some((ss / (n - 1.0)).sqrt())
}

/// Deaths per inhabitant; NaN when population is zero.
pub fn death_ratio(deaths: f64, population: f64) -> f64 {
    if population == 0.0 {
        f64::NAN
    } else {
        deaths / population
    }
}

fn rows_by_year(rows: &[DisasterRow]) -> BTreeMap<i32, Vec<usize>> {
    let mut groups: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
    for (i, row) in rows.iter().enumerate() {
        groups.entry(row.year).or_default().push(i);
    }
    groups
}

/// Sets `sig_median`, `sig_p90`, `sig_abs1000`, `sig_anydeaths` and
/// `geomet_sig_p90` for every type of every row.
pub fn flag_significant_events(rows: &mut [DisasterRow], n_types: usize) {
    for indices in rows_by_year(rows).values() {
        for t in 0..n_types {
            let ratios: Vec<f64> = indices
                .iter()
                .map(|&i| death_ratio(rows[i].by_type[t].deaths, rows[i].population))
                .collect();
            let median_threshold = median(&ratios).unwrap_or(0.0);
            let p90_threshold = quantile(&ratios, 0.9).unwrap_or(0.0);

            let intensities: Vec<f64> = indices
                .iter()
                .filter_map(|&i| rows[i].by_type[t].intensity)
                .collect();
            let intensity_p90 = quantile(&intensities, 0.9);

            for (&i, ratio) in indices.iter().zip(&ratios) {
                let measures = &mut rows[i].by_type[t];
                measures.sig_median = *ratio > median_threshold;
                measures.sig_p90 = *ratio > p90_threshold;
                measures.sig_abs1000 = measures.deaths > ABSOLUTE_DEATHS_THRESHOLD;
                measures.sig_anydeaths = measures.deaths > 0.0;
                measures.geomet_sig_p90 = measures
                    .intensity
                    .map(|value| intensity_p90.is_some_and(|p90| value > p90));
            }
        }
    }
}

/// Sum over types of intensity scaled by its panel-wide standard deviation.
///
/// Types without intensity are skipped; a type whose deviation is zero or
/// undefined enters unscaled. `None` when no type has intensity.
pub fn normalized_disaster_index(rows: &mut [DisasterRow], n_types: usize) {
    let mut scales = Vec::new();
    for t in 0..n_types {
        let values: Vec<f64> = rows.iter().filter_map(|r| r.by_type[t].intensity).collect();
        if values.is_empty() {
            continue;
        }
        let scale = sample_std(&values).filter(|s| *s > 0.0).unwrap_or(1.0);
        scales.push((t, scale));
    }
    for row in rows.iter_mut() {
        row.disaster_index = if scales.is_empty() {
            None
        } else {
            Some(
                scales
                    .iter()
                    .map(|&(t, scale)| row.by_type[t].intensity.unwrap_or(0.0) / scale)
                    .sum(),
            )
        };
    }
}

/// Number of rows with each flag set, per type, for the step summary.
pub fn count_flags(rows: &[DisasterRow], type_keys: &[String]) -> Vec<(String, usize)> {
    let mut counts = Vec::new();
    for (t, key) in type_keys.iter().enumerate() {
        let count = |f: fn(&crate::model::DisasterMeasures) -> bool| {
            rows.iter().filter(|r| f(&r.by_type[t])).count()
        };
        counts.push((format!("{}_sig_median", key), count(|m| m.sig_median)));
        counts.push((format!("{}_sig_p90", key), count(|m| m.sig_p90)));
        counts.push((format!("{}_sig_abs1000", key), count(|m| m.sig_abs1000)));
        counts.push((format!("{}_sig_anydeaths", key), count(|m| m.sig_anydeaths)));
        if rows.iter().any(|r| r.by_type[t].geomet_sig_p90.is_some()) {
            counts.push((
                format!("{}_geomet_sig_p90", key),
                count(|m| m.geomet_sig_p90 == Some(true)),
            ));
        }
    }
    counts
}
