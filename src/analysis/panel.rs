/// Econometric and country datasets (pipeline step 3)
///
/// Exports of one period are merged with its disaster panel at the
/// product-country-year level, derived variables are constructed, and the
/// result is written as `econometric_dataset_<start>_<end>.csv`. A
/// country-year aggregate is written alongside as
/// `country_dataset_<start>_<end>.csv`.
///
/// Differences (`d_ln_*`) are taken against the previous available year of
/// the same country and product, so a missing year does not break the series.

use crate::analysis::significance;
use crate::cache::{self, Cache};
use crate::config::PipelineConfig;
use crate::countries::{self, type_key};
use crate::logging::{self, DataSource};
use crate::model::{
    CountryPanelRow, DisasterDataset, DisasterRow, ExportRecord, ExportsByPeriod, PanelRow, Period,
    PipelineError, Result,
};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Column names
// ---------------------------------------------------------------------------

pub const COL_YEAR: &str = "Year";
pub const COL_COUNTRY: &str = "Country";
pub const COL_ISO: &str = "ISO";
pub const COL_CMD_CODE: &str = "cmdCode";
pub const COL_IS_AGRI: &str = "is_agri";
pub const COL_POPULATION: &str = "Population";
pub const COL_INCOME_GROUP: &str = "Income group";
pub const COL_IS_POOR: &str = "is_poor_country";
pub const COL_IS_SMALL: &str = "is_small_country";
pub const COL_DISASTER_INDEX: &str = "disaster_index";
pub const COL_LN_TOTAL_OCCURRENCE: &str = "ln_total_occurrence";
pub const COL_LN_TOTAL_DEATHS: &str = "ln_total_deaths";
pub const COL_LN_SIG_OCCURRENCE: &str = "ln_sig_occurrence";
pub const COL_D_LN_EXPORTS: &str = "d_ln_exports";
pub const COL_D_LN_POPULATION: &str = "d_ln_population";

/// Columns every econometric dataset must contain.
pub const REQUIRED_COLUMNS: &[&str] = &[
    COL_YEAR,
    COL_COUNTRY,
    COL_ISO,
    COL_CMD_CODE,
    "fobvalue",
    COL_IS_AGRI,
    COL_POPULATION,
    COL_INCOME_GROUP,
    COL_IS_POOR,
    COL_IS_SMALL,
    "sum_events",
    COL_LN_TOTAL_OCCURRENCE,
    "sum_deaths",
    COL_LN_TOTAL_DEATHS,
    "n_sig_events",
    COL_LN_SIG_OCCURRENCE,
    "ln_population",
    COL_D_LN_POPULATION,
    "ln_exports",
    COL_D_LN_EXPORTS,
];

pub fn econometric_path(dir: &Path, period: Period) -> PathBuf {
    dir.join(format!("econometric_dataset_{}.csv", period.label()))
}

pub fn country_path(dir: &Path, period: Period) -> PathBuf {
    dir.join(format!("country_dataset_{}.csv", period.label()))
}

/// Per-type measure columns: deaths, affected, events and, with GeoMet,
/// intensity.
pub fn measure_columns(keys: &[String], has_geomet: bool) -> Vec<String> {
    let mut columns = Vec::new();
    for key in keys {
        columns.push(format!("{}_deaths", key));
        columns.push(format!("{}_affected", key));
        columns.push(format!("{}_events", key));
        if has_geomet {
            columns.push(format!("{}_intensity", key));
        }
    }
    columns
}

/// Per-type flag columns, including the `extreme_*` indicators.
pub fn flag_columns(keys: &[String], has_geomet: bool) -> Vec<String> {
    let mut columns = Vec::new();
    for key in keys {
        columns.push(format!("{}_sig_median", key));
        columns.push(format!("{}_sig_p90", key));
        columns.push(format!("{}_sig_abs1000", key));
        columns.push(format!("{}_sig_anydeaths", key));
        if has_geomet {
            columns.push(format!("{}_geomet_sig_p90", key));
        }
        columns.push(format!("extreme_{}_emdat", key));
        if has_geomet {
            columns.push(format!("extreme_{}_geomet", key));
        }
    }
    columns
}

pub fn econometric_header(keys: &[String], has_geomet: bool) -> Vec<String> {
    let mut header: Vec<String> = [COL_YEAR, COL_COUNTRY, COL_ISO, COL_CMD_CODE, "fobvalue", COL_IS_AGRI]
        .iter()
        .map(|s| s.to_string())
        .collect();
    header.extend(measure_columns(keys, has_geomet));
    header.extend(flag_columns(keys, has_geomet));
    header.extend(
        [COL_IS_POOR, COL_IS_SMALL, COL_POPULATION, COL_INCOME_GROUP, "sum_events", COL_LN_TOTAL_OCCURRENCE, "sum_deaths", COL_LN_TOTAL_DEATHS]
            .iter()
            .map(|s| s.to_string()),
    );
    header.extend(keys.iter().map(|k| format!("ln_{}_count", k)));
    header.extend(
        [
            "n_sig_events",
            COL_LN_SIG_OCCURRENCE,
            "income_group_internal",
            "size_group",
            "ln_population",
            COL_D_LN_POPULATION,
            "ln_exports",
            COL_D_LN_EXPORTS,
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    if has_geomet {
        header.push(COL_DISASTER_INDEX.to_string());
    }
    header
}

pub const COUNTRY_HEADER: &[&str] = &[
    COL_YEAR,
    COL_COUNTRY,
    COL_ISO,
    "total_exports",
    "exports_agriculture",
    "d_ln_total_exports",
    "d_ln_agri_exports",
    "total_deaths",
    "deaths_pop_ratio",
    "is_significant_event",
    COL_POPULATION,
    COL_IS_POOR,
    COL_IS_SMALL,
];

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

fn ln_positive(value: f64) -> Option<f64> {
    (value > 0.0).then(|| value.ln())
}

/// Differences a log series against the previous row of the same group.
///
/// `rows` must be sorted by group then year; `key` identifies the group.
/// The first row of a group, and any row next to a missing value, has no
/// difference.
fn group_diff<T, K: PartialEq>(
    rows: &[T],
    key: impl Fn(&T) -> K,
    value: impl Fn(&T) -> Option<f64>,
) -> Vec<Option<f64>> {
    let mut diffs = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let diff = match i.checked_sub(1).map(|p| &rows[p]) {
            Some(prev) if key(prev) == key(row) => match (value(prev), value(row)) {
                (Some(a), Some(b)) => Some(b - a),
                _ => None,
            },
            _ => None,
        };
        diffs.push(diff);
    }
    diffs
}

fn panel_row(export: &ExportRecord, disaster: &DisasterRow, has_geomet: bool) -> PanelRow {
    let sum_events: f64 = disaster.by_type.iter().map(|m| m.events).sum();
    let sum_deaths: f64 = disaster.by_type.iter().map(|m| m.deaths).sum();
    let n_sig_events = disaster.by_type.iter().filter(|m| m.sig_p90).count() as f64;
    let disaster_index = has_geomet.then(|| {
        disaster
            .by_type
            .iter()
            .filter_map(|m| m.intensity)
            .sum::<f64>()
    });
    PanelRow {
        iso: export.iso.clone(),
        country: if disaster.country.is_empty() {
            export.country.clone()
        } else {
            disaster.country.clone()
        },
        year: export.year,
        cmd_code: export.cmd_code.clone(),
        fobvalue: export.fobvalue,
        is_agri: export.is_agri,
        by_type: disaster.by_type.clone(),
        population: disaster.population,
        income_group: disaster.income_group.clone(),
        is_poor_country: disaster.is_poor_country,
        is_small_country: disaster.is_small_country,
        sum_events,
        ln_total_occurrence: sum_events.ln_1p(),
        sum_deaths,
        ln_total_deaths: sum_deaths.ln_1p(),
        n_sig_events,
        ln_sig_occurrence: n_sig_events.ln_1p(),
        disaster_index,
        income_group_internal: countries::income_group_internal(&disaster.income_group).to_string(),
        size_group: String::new(),
        ln_population: ln_positive(disaster.population),
        d_ln_population: None,
        ln_exports: export.fobvalue.ln(),
        d_ln_exports: None,
    }
}

/// Merges exports with the disaster panel on (ISO, Year) and derives the
/// regression variables.
pub fn build_econometric_dataset(exports: &[ExportRecord], disasters: &DisasterDataset) -> Result<Vec<PanelRow>> {
    let by_key: HashMap<(&str, i32), &DisasterRow> = disasters
        .rows
        .iter()
        .map(|r| ((r.iso.as_str(), r.year), r))
        .collect();

    let mut rows: Vec<PanelRow> = exports
        .iter()
        .filter(|e| e.fobvalue > 0.0)
        .filter_map(|e| {
            by_key
                .get(&(e.iso.as_str(), e.year))
                .map(|d| panel_row(e, d, disasters.has_geomet))
        })
        .collect();
    if rows.is_empty() {
        return Err(PipelineError::NoData(format!(
            "no export row matches the disaster panel for {}",
            disasters.period
        )));
    }

    let populations: Vec<f64> = rows.iter().map(|r| r.population).collect();
    let population_median = significance::median(&populations).unwrap_or(0.0);
    for row in rows.iter_mut() {
        row.size_group = if row.population > population_median {
            "Large".to_string()
        } else {
            "Small".to_string()
        };
    }

    rows.sort_by(|a, b| (&a.iso, &a.cmd_code, a.year).cmp(&(&b.iso, &b.cmd_code, b.year)));
    let group = |r: &PanelRow| (r.iso.clone(), r.cmd_code.clone());
    let d_population = group_diff(&rows, group, |r| r.ln_population);
    let d_exports = group_diff(&rows, group, |r| Some(r.ln_exports));
    for ((row, dp), de) in rows.iter_mut().zip(d_population).zip(d_exports) {
        row.d_ln_population = dp;
        row.d_ln_exports = de;
    }
    Ok(rows)
}

/// Country-year aggregate: total and agricultural exports with their log
/// growth, deaths relative to population and the significant-event flags.
///
/// A country-year is significant when its deaths/(population + 1) ratio is
/// above the median of the positive ratios. Per-type flags compare each
/// type's ratio with that same median.
pub fn build_country_dataset(exports: &[ExportRecord], disasters: &DisasterDataset) -> Vec<CountryPanelRow> {
    let mut totals: HashMap<(&str, i32), (f64, f64)> = HashMap::new();
    for export in exports {
        let entry = totals.entry((export.iso.as_str(), export.year)).or_default();
        entry.0 += export.fobvalue;
        if export.is_agri {
            entry.1 += export.fobvalue;
        }
    }

    let mut rows: Vec<CountryPanelRow> = disasters
        .rows
        .iter()
        .map(|d| {
            let (total_exports, exports_agriculture) =
                totals.get(&(d.iso.as_str(), d.year)).copied().unwrap_or_default();
            let total_deaths: f64 = d.by_type.iter().map(|m| m.deaths).sum();
            let scale = d.population + 1.0;
            CountryPanelRow {
                iso: d.iso.clone(),
                country: d.country.clone(),
                year: d.year,
                total_exports,
                exports_agriculture,
                d_ln_total_exports: None,
                d_ln_agri_exports: None,
                total_deaths,
                deaths_pop_ratio: total_deaths / scale,
                is_significant_event: false,
                deaths_pop_ratio_by_type: d.by_type.iter().map(|m| m.deaths / scale).collect(),
                is_significant_by_type: vec![false; d.by_type.len()],
                population: d.population,
                is_poor_country: d.is_poor_country,
                is_small_country: d.is_small_country,
            }
        })
        .collect();

    let positive: Vec<f64> = rows
        .iter()
        .filter(|r| r.total_deaths > 0.0)
        .map(|r| r.deaths_pop_ratio)
        .collect();
    if let Some(threshold) = significance::median(&positive) {
        for row in rows.iter_mut() {
            row.is_significant_event = row.total_deaths > 0.0 && row.deaths_pop_ratio > threshold;
            row.is_significant_by_type = row
                .deaths_pop_ratio_by_type
                .iter()
                .map(|ratio| *ratio > 0.0 && *ratio > threshold)
                .collect();
        }
    }

    rows.sort_by(|a, b| (&a.iso, a.year).cmp(&(&b.iso, b.year)));
    let iso = |r: &CountryPanelRow| r.iso.clone();
    let d_total = group_diff(&rows, iso, |r| ln_positive(r.total_exports));
    let d_agri = group_diff(&rows, iso, |r| ln_positive(r.exports_agriculture));
    for ((row, dt), da) in rows.iter_mut().zip(d_total).zip(d_agri) {
        row.d_ln_total_exports = dt;
        row.d_ln_agri_exports = da;
    }
    rows
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn number(value: f64) -> String {
    if value.is_finite() { value.to_string() } else { String::new() }
}

fn optional(value: Option<f64>) -> String {
    value.map(number).unwrap_or_default()
}

fn flag(value: bool) -> String {
    (if value { "1" } else { "0" }).to_string()
}

pub fn write_econometric_dataset(
    path: &Path,
    rows: &[PanelRow],
    disaster_types: &[String],
    has_geomet: bool,
) -> Result<()> {
    let keys: Vec<String> = disaster_types.iter().map(|t| type_key(t)).collect();
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(econometric_header(&keys, has_geomet))?;
    for row in rows {
        let mut record = vec![
            row.year.to_string(),
            row.country.clone(),
            row.iso.clone(),
            row.cmd_code.clone(),
            number(row.fobvalue),
            if row.is_agri { "True" } else { "False" }.to_string(),
        ];
        for m in &row.by_type {
            record.push(number(m.deaths));
            record.push(number(m.affected));
            record.push(number(m.events));
            if has_geomet {
                record.push(optional(m.intensity));
            }
        }
        for m in &row.by_type {
            record.push(flag(m.sig_median));
            record.push(flag(m.sig_p90));
            record.push(flag(m.sig_abs1000));
            record.push(flag(m.sig_anydeaths));
            if has_geomet {
                record.push(flag(m.geomet_sig_p90 == Some(true)));
            }
            record.push(flag(m.extreme_emdat()));
            if has_geomet {
                record.push(flag(m.extreme_geomet() == Some(true)));
            }
        }
        record.extend([
            flag(row.is_poor_country),
            flag(row.is_small_country),
            number(row.population),
            row.income_group.clone(),
            number(row.sum_events),
            number(row.ln_total_occurrence),
            number(row.sum_deaths),
            number(row.ln_total_deaths),
        ]);
        record.extend(row.by_type.iter().map(|m| number(m.events.ln_1p())));
        record.extend([
            number(row.n_sig_events),
            number(row.ln_sig_occurrence),
            row.income_group_internal.clone(),
            row.size_group.clone(),
            optional(row.ln_population),
            optional(row.d_ln_population),
            number(row.ln_exports),
            optional(row.d_ln_exports),
        ]);
        if has_geomet {
            record.push(optional(row.disaster_index));
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// `COUNTRY_HEADER` followed by `<type>_deaths_pop_ratio` and
/// `is_significant_<type>` for each disaster type.
pub fn country_header(type_keys: &[String]) -> Vec<String> {
    let mut header: Vec<String> = COUNTRY_HEADER.iter().map(|s| s.to_string()).collect();
    for key in type_keys {
        header.push(format!("{}_deaths_pop_ratio", key));
        header.push(format!("is_significant_{}", key));
    }
    header
}

pub fn write_country_dataset(path: &Path, rows: &[CountryPanelRow], disaster_types: &[String]) -> Result<()> {
    let keys: Vec<String> = disaster_types.iter().map(|t| type_key(t)).collect();
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(country_header(&keys))?;
    for row in rows {
        let mut record = vec![
            row.year.to_string(),
            row.country.clone(),
            row.iso.clone(),
            number(row.total_exports),
            number(row.exports_agriculture),
            optional(row.d_ln_total_exports),
            optional(row.d_ln_agri_exports),
            number(row.total_deaths),
            number(row.deaths_pop_ratio),
            flag(row.is_significant_event),
            number(row.population),
            flag(row.is_poor_country),
            flag(row.is_small_country),
        ];
        for (ratio, significant) in row.deaths_pop_ratio_by_type.iter().zip(&row.is_significant_by_type) {
            record.push(number(*ratio));
            record.push(flag(*significant));
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

pub fn log_panel_summary(period: Period, rows: &[PanelRow], disaster_types: &[String], reference_year: i32) {
    let context = period.to_string();
    let countries: BTreeSet<&str> = rows.iter().map(|r| r.iso.as_str()).collect();
    let products: BTreeSet<&str> = rows.iter().map(|r| r.cmd_code.as_str()).collect();
    let n_agri = rows.iter().filter(|r| r.is_agri).count();
    let years = match (rows.iter().map(|r| r.year).min(), rows.iter().map(|r| r.year).max()) {
        (Some(first), Some(last)) => format!("{}-{}", first, last),
        _ => "N/A".to_string(),
    };
    let at_reference = |f: fn(&PanelRow) -> bool| {
        rows.iter()
            .filter(|r| r.year == reference_year && f(r))
            .map(|r| r.iso.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    };
    let pct_agri = if rows.is_empty() {
        0.0
    } else {
        n_agri as f64 / rows.len() as f64 * 100.0
    };

    if rows.is_empty() {
        logging::warn(DataSource::Panel, Some(&context), "no observations");
    }
    if n_agri == 0 {
        logging::warn(DataSource::Panel, Some(&context), "no agricultural observation");
    }
    logging::info(
        DataSource::Panel,
        Some(&context),
        &format!(
            "econometric dataset: {} obs, years {}, {} countries, {} products, {:.1}% agri, \
             small countries ({}): {}, poor countries ({}): {}",
            rows.len(),
            years,
            countries.len(),
            products.len(),
            pct_agri,
            reference_year,
            at_reference(|r| r.is_small_country),
            reference_year,
            at_reference(|r| r.is_poor_country)
        ),
    );

    for (t, disaster_type) in disaster_types.iter().enumerate() {
        let key = type_key(disaster_type);
        let flags: [(&str, fn(&crate::model::DisasterMeasures) -> bool); 3] = [
            ("sig_p90", |m| m.sig_p90),
            ("sig_anydeaths", |m| m.sig_anydeaths),
            ("sig_abs1000", |m| m.sig_abs1000),
        ];
        for (name, get) in flags {
            let poor = rows.iter().filter(|r| r.is_poor_country && get(&r.by_type[t])).count();
            let small = rows.iter().filter(|r| r.is_small_country && get(&r.by_type[t])).count();
            logging::debug(
                DataSource::Panel,
                Some(&context),
                &format!("[DIAG] {}_{}: poor {} rows, small {} rows", key, name, poor, small),
            );
        }
    }
}

/// Step 3 for one period: reads both caches and writes the two datasets.
pub fn build_panel_datasets(config: &PipelineConfig, cache: &Cache, period: Period) -> Result<(PathBuf, PathBuf)> {
    let context = period.to_string();
    let exports_entry = cache
        .load::<ExportsByPeriod>(cache::EXPORTS_KEY)
        .ok_or_else(|| PipelineError::MissingFile(cache.path(cache::EXPORTS_KEY)))?;
    let exports = exports_entry
        .value
        .get(period)
        .ok_or_else(|| PipelineError::NoData(format!("period {} not in export cache", period)))?;
    let disasters_key = cache::key_for(cache::DISASTERS_KIND, period);
    let disasters = cache
        .load::<DisasterDataset>(&disasters_key)
        .ok_or_else(|| PipelineError::MissingFile(cache.path(&disasters_key)))?
        .value;

    let rows = build_econometric_dataset(exports, &disasters)?;
    log_panel_summary(period, &rows, &disasters.disaster_types, config.poor_country_year);
    let country_rows = build_country_dataset(exports, &disasters);
    let n_significant = country_rows.iter().filter(|r| r.is_significant_event).count();
    logging::info(
        DataSource::Panel,
        Some(&context),
        &format!(
            "country dataset: {} country-years, {} significant events",
            country_rows.len(),
            n_significant
        ),
    );

    std::fs::create_dir_all(&config.datasets_dir)?;
    let econometric = econometric_path(&config.datasets_dir, period);
    write_econometric_dataset(&econometric, &rows, &disasters.disaster_types, disasters.has_geomet)?;
    logging::info(
        DataSource::Panel,
        Some(&context),
        &format!("saved {} ({} rows)", econometric.display(), rows.len()),
    );
    let country = country_path(&config.datasets_dir, period);
    write_country_dataset(&country, &country_rows, &disasters.disaster_types)?;
    Ok((econometric, country))
}
