/// Formatting of estimated tables into LaTeX and coefficient CSV files.
///
/// One LaTeX `tabular` per table × period × criterion, and one coefficient
/// CSV per period × criterion gathering every column of every table.

use crate::analysis::specs::{Criterion, Sample, TableResult};
use crate::analysis::stats;
use crate::logging::{self, DataSource};
use crate::model::{Period, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub const DECIMALS: usize = 3;

pub fn table_path(dir: &Path, number: u8, period: Period, criterion: Criterion) -> PathBuf {
    dir.join(format!("table{}_{}_{}.tex", number, period.label(), criterion.label()))
}

pub fn coefficients_path(dir: &Path, period: Period, criterion: Criterion) -> PathBuf {
    dir.join(format!("coefficients_{}_{}.csv", period.label(), criterion.label()))
}

/// `0.123***`
pub fn format_coefficient(estimate: f64, p_value: f64) -> String {
    if !estimate.is_finite() {
        return String::new();
    }
    format!("{:.*}{}", DECIMALS, estimate, stats::stars(p_value))
}

/// `(0.045)`
pub fn format_std_error(std_error: f64) -> String {
    if !std_error.is_finite() {
        return String::new();
    }
    format!("({:.*})", DECIMALS, std_error)
}

pub fn escape_latex(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str(r"\textbackslash{}"),
            '&' | '%' | '$' | '#' | '_' | '{' | '}' => {
                out.push('\\');
                out.push(c);
            }
            '~' => out.push_str(r"\textasciitilde{}"),
            '^' => out.push_str(r"\textasciicircum{}"),
            '×' => out.push_str(r"$\times$"),
            'Δ' => out.push_str(r"$\Delta$"),
            _ => out.push(c),
        }
    }
    out
}

/// Display label of a regressor. Interactions `a:b` read `a × b`.
pub fn term_label(name: &str) -> String {
    let base = |n: &str| match n {
        "ln_total_occurrence" => "Ln(1 + occurrences)".to_string(),
        "ln_sig_occurrence" => "Ln(1 + significant occurrences)".to_string(),
        "ln_total_deaths" => "Ln(1 + deaths)".to_string(),
        "disaster_index" => "Disaster index".to_string(),
        "d_ln_population" => "Δ Ln(population)".to_string(),
        "is_poor_country" => "Poor country".to_string(),
        "is_small_country" => "Small country".to_string(),
        other => other.to_string(),
    };
    name.split(':').map(base).collect::<Vec<_>>().join(" × ")
}

fn row(cells: &[String]) -> String {
    format!("{} \\\\\n", cells.join(" & "))
}

/// Regressors of every column in order of first appearance.
fn term_order(table: &TableResult) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for column in &table.columns {
        for coef in &column.result.coefficients {
            if !terms.contains(&coef.name) {
                terms.push(coef.name.clone());
            }
        }
    }
    terms
}

pub fn render_latex(table: &TableResult) -> String {
    let n = table.columns.len();
    let mut out = String::new();
    out.push_str(&format!(
        "% Table {}: {}, {} events\n",
        table.number, table.period, table.criterion
    ));
    out.push_str(&format!("\\begin{{tabular}}{{l{}}}\n\\toprule\n", "c".repeat(n)));

    let mut header = vec![String::new()];
    header.extend((1..=n).map(|i| format!("({})", i)));
    out.push_str(&row(&header));

    if table.columns.iter().any(|c| c.spec.sample != Sample::AllProducts) {
        let mut samples = vec!["Products".to_string()];
        samples.extend(table.columns.iter().map(|c| c.spec.sample.label().to_string()));
        out.push_str(&row(&samples));
    }
    out.push_str("\\midrule\n");

    for term in term_order(table) {
        let mut estimates = vec![escape_latex(&term_label(&term))];
        let mut errors = vec![String::new()];
        for column in &table.columns {
            match column.result.coefficient(&term) {
                Some(c) => {
                    estimates.push(format_coefficient(c.estimate, c.p_value));
                    errors.push(format_std_error(c.std_error));
                }
                None => {
                    estimates.push(String::new());
                    errors.push(String::new());
                }
            }
        }
        out.push_str(&row(&estimates));
        out.push_str(&row(&errors));
    }
    out.push_str("\\midrule\n");

    let mut effects: Vec<String> = Vec::new();
    for column in &table.columns {
        for fe in &column.result.fixed_effects {
            if !effects.contains(fe) {
                effects.push(fe.clone());
            }
        }
    }
    for fe in &effects {
        let mut cells = vec![escape_latex(&format!("{} FE", fe))];
        cells.extend(table.columns.iter().map(|c| {
            (if c.result.fixed_effects.contains(fe) { "Yes" } else { "No" }).to_string()
        }));
        out.push_str(&row(&cells));
    }

    let mut observations = vec!["Observations".to_string()];
    observations.extend(table.columns.iter().map(|c| c.result.n_obs.to_string()));
    out.push_str(&row(&observations));

    let mut r2 = vec!["Within R$^2$".to_string()];
    r2.extend(
        table
            .columns
            .iter()
            .map(|c| format!("{:.*}", DECIMALS, c.result.r2_within)),
    );
    out.push_str(&row(&r2));

    out.push_str("\\bottomrule\n\\end{tabular}\n");
    out.push_str(
        "% Standard errors clustered by country in parentheses. *** p<0.01, ** p<0.05, * p<0.1\n",
    );
    out
}

pub fn write_table(dir: &Path, table: &TableResult) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = table_path(dir, table.number, table.period, table.criterion);
    fs::write(&path, render_latex(table))?;
    logging::info(
        DataSource::Report,
        Some(&table.period.to_string()),
        &format!("Table {} ({}) written to {}", table.number, table.criterion, path.display()),
    );
    Ok(path)
}

pub const COEFFICIENT_HEADER: &[&str] = &[
    "table",
    "column",
    "sample",
    "dependent",
    "term",
    "estimate",
    "std_error",
    "t_stat",
    "p_value",
    "stars",
    "n_obs",
    "n_clusters",
    "r2_within",
];

fn number(value: f64) -> String {
    if value.is_finite() { value.to_string() } else { String::new() }
}

/// Every coefficient of the given tables (same period and criterion).
pub fn write_coefficients(
    dir: &Path,
    period: Period,
    criterion: Criterion,
    tables: &[TableResult],
) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = coefficients_path(dir, period, criterion);
    let mut writer = csv::Writer::from_path(&path)?;
    writer.write_record(COEFFICIENT_HEADER)?;
    for table in tables {
        for (i, column) in table.columns.iter().enumerate() {
            let r = &column.result;
            for c in &r.coefficients {
                writer.write_record([
                    table.number.to_string(),
                    (i + 1).to_string(),
                    column.spec.sample.label().to_string(),
                    r.dependent.clone(),
                    c.name.clone(),
                    number(c.estimate),
                    number(c.std_error),
                    number(c.t_stat),
                    number(c.p_value),
                    stats::stars(c.p_value).to_string(),
                    r.n_obs.to_string(),
                    r.n_clusters.map(|g| g.to_string()).unwrap_or_default(),
                    number(r.r2_within),
                ])?;
            }
        }
    }
    writer.flush()?;
    Ok(path)
}
