//! Output Verification Module
//!
//! Conformity checks run against the files the pipeline produced: the
//! per-period datasets and the result tables. Each check reports a status,
//! and the whole report is written as JSON next to the results.
//!
//! Run this after `analyze` to confirm the outputs are complete before
//! using them.

use crate::analysis::frame::Frame;
use crate::analysis::panel::{self, COL_DISASTER_INDEX, COL_IS_AGRI, COL_ISO, COL_LN_TOTAL_DEATHS, COL_LN_TOTAL_OCCURRENCE};
use crate::analysis::specs::{Criterion, TABLE_NUMBERS};
use crate::config::PipelineConfig;
use crate::countries;
use crate::logging::{self, DataSource};
use crate::model::{Period, Result};
use crate::report;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const REPORT_FILE: &str = "verification_report.json";

/// Suffixes of the per-type disaster variables checked for non-zero counts.
const DISASTER_SUFFIXES: &[&str] = &["_deaths", "_affected", "_events", "_intensity"];

// ============================================================================
// Verification Results
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub timestamp: String,
    pub dataset_results: Vec<DatasetVerification>,
    pub coverage_results: Vec<CoverageVerification>,
    pub disaster_results: Vec<DisasterCountVerification>,
    pub table_results: Vec<TableVerification>,
    pub summary: VerificationSummary,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationSummary {
    pub checks_total: usize,
    pub checks_passed: usize,
    pub checks_partial: usize,
    pub checks_failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum VerificationStatus {
    Success,
    PartialSuccess,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetVerification {
    pub period: String,
    pub path: PathBuf,
    pub status: VerificationStatus,
    pub rows: usize,
    pub obsolete_countries: Vec<String>,
    pub missing_columns: Vec<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableCount {
    pub variable: String,
    pub count: usize,
}

/// Non-missing disaster measures among agricultural observations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageVerification {
    pub period: String,
    pub status: VerificationStatus,
    pub agri_rows: usize,
    pub non_missing: Vec<VariableCount>,
    pub error_message: Option<String>,
}

/// Observations with a strictly positive value per disaster variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisasterCountVerification {
    pub period: String,
    pub status: VerificationStatus,
    pub non_zero: Vec<VariableCount>,
    pub zero_variables: Vec<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableVerification {
    pub period: String,
    pub criterion: String,
    pub status: VerificationStatus,
    pub expected: Vec<PathBuf>,
    pub missing: Vec<PathBuf>,
}

/// Success when every item passes, PartialSuccess when some do.
fn status_of(passed: usize, total: usize) -> VerificationStatus {
    if total > 0 && passed == total {
        VerificationStatus::Success
    } else if passed > 0 {
        VerificationStatus::PartialSuccess
    } else {
        VerificationStatus::Failed
    }
}

// ============================================================================
// Dataset checks
// ============================================================================

pub fn verify_dataset(frame: &Frame, path: &Path, period: Period, required: &[&str]) -> DatasetVerification {
    let mut result = DatasetVerification {
        period: period.to_string(),
        path: path.to_path_buf(),
        status: VerificationStatus::Failed,
        rows: frame.len(),
        obsolete_countries: Vec::new(),
        missing_columns: required
            .iter()
            .filter(|c| !frame.has_column(c))
            .map(|c| c.to_string())
            .collect(),
        error_message: None,
    };

    match frame.text(COL_ISO) {
        Ok(isos) => {
            for iso in isos {
                if result.obsolete_countries.contains(&iso) {
                    continue;
                }
                if let Some(obsolete) = countries::find_obsolete(&iso) {
                    logging::warn(
                        DataSource::Panel,
                        Some(&result.period),
                        &format!("obsolete country in {}: {}", path.display(), obsolete.describe()),
                    );
                    result.obsolete_countries.push(iso);
                }
            }
        }
        Err(e) => result.error_message = Some(e.to_string()),
    }

    if result.rows > 0 && result.error_message.is_none() {
        result.status = if result.missing_columns.is_empty() && result.obsolete_countries.is_empty() {
            VerificationStatus::Success
        } else {
            VerificationStatus::Failed
        };
    }
    if result.rows == 0 && result.error_message.is_none() {
        result.error_message = Some("dataset is empty".to_string());
    }
    result
}

pub fn verify_agri_coverage(frame: &Frame, period: Period) -> CoverageVerification {
    let mut result = CoverageVerification {
        period: period.to_string(),
        status: VerificationStatus::Failed,
        agri_rows: 0,
        non_missing: Vec::new(),
        error_message: None,
    };

    let mask: Vec<bool> = match frame.numeric(COL_IS_AGRI) {
        Ok(values) => values.iter().map(|v| *v == 1.0).collect(),
        Err(e) => {
            result.error_message = Some(e.to_string());
            return result;
        }
    };
    result.agri_rows = mask.iter().filter(|m| **m).count();

    for variable in [COL_LN_TOTAL_OCCURRENCE, COL_LN_TOTAL_DEATHS, COL_DISASTER_INDEX] {
        if !frame.has_column(variable) {
            continue;
        }
        if let Ok(count) = frame.count_finite(variable, &mask) {
            result.non_missing.push(VariableCount {
                variable: variable.to_string(),
                count,
            });
        }
    }

    let covered = result.non_missing.iter().filter(|v| v.count > 0).count();
    result.status = status_of(covered, result.non_missing.len());
    if result.agri_rows == 0 {
        result.status = VerificationStatus::Failed;
        result.error_message = Some("no agricultural observations".to_string());
    }
    result
}

pub fn verify_disaster_counts(frame: &Frame, period: Period) -> DisasterCountVerification {
    let mut result = DisasterCountVerification {
        period: period.to_string(),
        status: VerificationStatus::Failed,
        non_zero: Vec::new(),
        zero_variables: Vec::new(),
        error_message: None,
    };

    let variables: Vec<String> = frame
        .columns()
        .iter()
        .filter(|c| DISASTER_SUFFIXES.iter().any(|s| c.ends_with(s)))
        .cloned()
        .collect();
    if variables.is_empty() {
        result.error_message = Some("no disaster variables in dataset".to_string());
        return result;
    }

    for variable in variables {
        let Ok(values) = frame.numeric(&variable) else {
            continue;
        };
        let count = values.iter().filter(|v| **v > 0.0).count();
        if count == 0 {
            result.zero_variables.push(variable.clone());
        }
        result.non_zero.push(VariableCount { variable, count });
    }

    let positive = result.non_zero.len() - result.zero_variables.len();
    result.status = status_of(positive, result.non_zero.len());
    result
}

// ============================================================================
// Table checks
// ============================================================================

pub fn verify_tables(tables_dir: &Path, results_dir: &Path, period: Period, criterion: Criterion) -> TableVerification {
    let mut expected: Vec<PathBuf> = TABLE_NUMBERS
        .iter()
        .map(|n| report::table_path(tables_dir, *n, period, criterion))
        .collect();
    expected.push(report::coefficients_path(results_dir, period, criterion));
    let missing: Vec<PathBuf> = expected.iter().filter(|p| !p.exists()).cloned().collect();

    TableVerification {
        period: period.to_string(),
        criterion: criterion.label().to_string(),
        status: status_of(expected.len() - missing.len(), expected.len()),
        expected,
        missing,
    }
}

// ============================================================================
// Full verification
// ============================================================================

fn record(summary: &mut VerificationSummary, status: &VerificationStatus) {
    summary.checks_total += 1;
    match status {
        VerificationStatus::Success => summary.checks_passed += 1,
        VerificationStatus::PartialSuccess => summary.checks_partial += 1,
        VerificationStatus::Failed => summary.checks_failed += 1,
    }
}

fn missing_dataset(path: &Path, period: Period, message: String) -> DatasetVerification {
    DatasetVerification {
        period: period.to_string(),
        path: path.to_path_buf(),
        status: VerificationStatus::Failed,
        rows: 0,
        obsolete_countries: Vec::new(),
        missing_columns: Vec::new(),
        error_message: Some(message),
    }
}

pub fn run_verification(config: &PipelineConfig) -> VerificationReport {
    let mut report = VerificationReport {
        timestamp: Utc::now().to_rfc3339(),
        dataset_results: Vec::new(),
        coverage_results: Vec::new(),
        disaster_results: Vec::new(),
        table_results: Vec::new(),
        summary: VerificationSummary::default(),
    };

    for period in config.periods() {
        let econometric = panel::econometric_path(&config.datasets_dir, period);
        match Frame::read(&econometric) {
            Ok(frame) => {
                let dataset = verify_dataset(&frame, &econometric, period, panel::REQUIRED_COLUMNS);
                let coverage = verify_agri_coverage(&frame, period);
                let disasters = verify_disaster_counts(&frame, period);
                for status in [&dataset.status, &coverage.status, &disasters.status] {
                    record(&mut report.summary, status);
                }
                report.dataset_results.push(dataset);
                report.coverage_results.push(coverage);
                report.disaster_results.push(disasters);
            }
            Err(e) => {
                let dataset = missing_dataset(&econometric, period, e.to_string());
                record(&mut report.summary, &dataset.status);
                report.dataset_results.push(dataset);
            }
        }

        let country = panel::country_path(&config.datasets_dir, period);
        let dataset = match Frame::read(&country) {
            Ok(frame) => verify_dataset(&frame, &country, period, panel::COUNTRY_HEADER),
            Err(e) => missing_dataset(&country, period, e.to_string()),
        };
        record(&mut report.summary, &dataset.status);
        report.dataset_results.push(dataset);

        for criterion in Criterion::ALL {
            let tables = verify_tables(&config.tables_dir, &config.results_dir, period, criterion);
            record(&mut report.summary, &tables.status);
            report.table_results.push(tables);
        }
    }

    report
}

pub fn write_report(report: &VerificationReport, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(REPORT_FILE);
    fs::write(&path, serde_json::to_string_pretty(report)?)?;
    logging::info(
        DataSource::System,
        None,
        &format!("Verification report written to {}", path.display()),
    );
    Ok(path)
}

fn mark(status: &VerificationStatus) -> &'static str {
    match status {
        VerificationStatus::Success => "✓",
        VerificationStatus::PartialSuccess => "⚠",
        VerificationStatus::Failed => "✗",
    }
}

pub fn print_summary(report: &VerificationReport) {
    println!("\n═══════════════════════════════════════════════════════════");
    println!("📊 VERIFICATION SUMMARY");
    println!("═══════════════════════════════════════════════════════════");
    for result in &report.dataset_results {
        print!("  {} {} ({} rows)", mark(&result.status), result.path.display(), result.rows);
        if !result.obsolete_countries.is_empty() {
            print!(" obsolete: {:?}", result.obsolete_countries);
        }
        if !result.missing_columns.is_empty() {
            print!(" missing columns: {:?}", result.missing_columns);
        }
        if let Some(error) = &result.error_message {
            print!(" {}", error);
        }
        println!();
    }
    for result in &report.coverage_results {
        let counts: Vec<String> = result
            .non_missing
            .iter()
            .map(|v| format!("{}={}", v.variable, v.count))
            .collect();
        println!(
            "  {} {} agricultural coverage ({} rows): {}",
            mark(&result.status),
            result.period,
            result.agri_rows,
            counts.join(", ")
        );
    }
    for result in &report.disaster_results {
        println!(
            "  {} {} disaster variables: {}/{} non-zero",
            mark(&result.status),
            result.period,
            result.non_zero.len() - result.zero_variables.len(),
            result.non_zero.len()
        );
    }
    for result in &report.table_results {
        println!(
            "  {} {} {} tables: {}/{} present",
            mark(&result.status),
            result.period,
            result.criterion,
            result.expected.len() - result.missing.len(),
            result.expected.len()
        );
    }

    let s = &report.summary;
    let success_rate = if s.checks_total > 0 {
        (s.checks_passed as f64 / s.checks_total as f64) * 100.0
    } else {
        0.0
    };
    println!();
    println!(
        "Checks: {} passed, {} partial, {} failed ({:.1}% passed)",
        s.checks_passed, s.checks_partial, s.checks_failed, success_rate
    );
    println!("═══════════════════════════════════════════════════════════");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Table;

    fn frame(text: &str) -> Frame {
        Frame::from_table(Table::parse(text).unwrap())
    }

    #[test]
    fn test_dataset_flags_obsolete_and_missing_columns() {
        let f = frame("Year,ISO,cmdCode\n1990,FRA,01\n1990,SUN,01\n1991,SUN,84\n");
        let result = verify_dataset(&f, Path::new("x.csv"), Period::new(1979, 2000), &["Year", "ISO", "fobvalue"]);
        assert_eq!(result.status, VerificationStatus::Failed);
        assert_eq!(result.obsolete_countries, vec!["SUN"]);
        assert_eq!(result.missing_columns, vec!["fobvalue"]);

        let clean = frame("Year,ISO\n1990,FRA\n");
        let ok = verify_dataset(&clean, Path::new("x.csv"), Period::new(1979, 2000), &["Year", "ISO"]);
        assert_eq!(ok.status, VerificationStatus::Success);
    }

    #[test]
    fn test_agri_coverage_counts_non_missing() {
        let f = frame(
            "is_agri,ln_total_occurrence,ln_total_deaths\n\
             True,0.69,\n\
             True,0.0,\n\
             False,1.1,2.3\n",
        );
        let result = verify_agri_coverage(&f, Period::new(2000, 2024));
        assert_eq!(result.agri_rows, 2);
        assert_eq!(result.non_missing[0].count, 2);
        assert_eq!(result.non_missing[1].count, 0);
        assert_eq!(result.status, VerificationStatus::PartialSuccess);
    }

    #[test]
    fn test_disaster_counts_report_zero_variables() {
        let f = frame("ISO,flood_deaths,flood_events,storm_deaths\nFRA,0,1,0\nDEU,3,0,0\n");
        let result = verify_disaster_counts(&f, Period::new(2000, 2024));
        assert_eq!(result.zero_variables, vec!["storm_deaths"]);
        assert_eq!(result.status, VerificationStatus::PartialSuccess);
    }

    #[test]
    fn test_tables_check_expected_files() {
        let dir = tempfile::tempdir().unwrap();
        let period = Period::new(1979, 2000);
        let missing = verify_tables(dir.path(), dir.path(), period, Criterion::All);
        assert_eq!(missing.status, VerificationStatus::Failed);
        assert_eq!(missing.expected.len(), 4);

        for n in TABLE_NUMBERS {
            fs::write(report::table_path(dir.path(), n, period, Criterion::All), "").unwrap();
        }
        let partial = verify_tables(dir.path(), dir.path(), period, Criterion::All);
        assert_eq!(partial.status, VerificationStatus::PartialSuccess);
        assert_eq!(partial.missing.len(), 1);
    }

    #[test]
    fn test_missing_datasets_fail() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            datasets_dir: dir.path().join("datasets"),
            results_dir: dir.path().join("results"),
            tables_dir: dir.path().join("results/tables"),
            export_periods: vec![[1979, 2000]],
            ..PipelineConfig::default()
        };
        let report = run_verification(&config);
        assert_eq!(report.dataset_results.len(), 2);
        assert_eq!(report.summary.checks_passed, 0);
        assert_eq!(report.summary.checks_total, 4);
        let path = write_report(&report, &config.results_dir).unwrap();
        assert!(path.ends_with(REPORT_FILE));
    }
}
