/// Year coverage of local Comtrade extracts.
///
/// Extracts are saved one file per year (`1988_exports_plus.csv`) or one
/// file per year range (`1979-1987_exports_S2.csv`). Before loading or
/// downloading, the pipeline works out which years the files on disk
/// already cover so that only genuine gaps are fetched from the API.
///
/// # Determinism
/// Functions take the directory listing as input where possible, so the
/// coverage logic is testable without touching the filesystem.

use crate::model::{Period, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Filename parsing
// ---------------------------------------------------------------------------

fn four_digits(s: &str) -> Option<i32> {
    if s.len() == 4 && s.bytes().all(|b| b.is_ascii_digit()) {
        s.parse().ok()
    } else {
        None
    }
}

/// Years covered by an extract, derived from its file name.
///
/// - `YYYY-YYYY_exports...` → every year of the inclusive range
/// - `YYYY_exports...`      → that single year
/// - anything else          → empty
pub fn years_from_filename(filename: &str) -> Vec<i32> {
    let Some(marker) = filename.find("_exports") else {
        return Vec::new();
    };
    let prefix = &filename[..marker];

    if let Some((first, last)) = prefix.split_once('-') {
        match (four_digits(first), four_digits(last)) {
            (Some(start), Some(end)) if start <= end => (start..=end).collect(),
            _ => Vec::new(),
        }
    } else {
        four_digits(prefix).map(|y| vec![y]).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Directory scanning
// ---------------------------------------------------------------------------

/// Maps every `*exports*.csv` file in `dir` to the years it covers.
/// Files whose name carries no year are ignored. A missing directory is
/// treated as empty.
pub fn scan_export_files(dir: &Path) -> Result<BTreeMap<PathBuf, Vec<i32>>> {
    let mut coverage = BTreeMap::new();
    if !dir.exists() {
        return Ok(coverage);
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.contains("exports") || !name.ends_with(".csv") {
            continue;
        }
        let years = years_from_filename(name);
        if !years.is_empty() {
            coverage.insert(path, years);
        }
    }
    Ok(coverage)
}

/// Files overlapping `period`, and the set of period years they cover.
pub fn select_files(
    coverage: &BTreeMap<PathBuf, Vec<i32>>,
    period: Period,
) -> (Vec<PathBuf>, BTreeSet<i32>) {
    let mut files = Vec::new();
    let mut covered = BTreeSet::new();
    for (path, years) in coverage {
        let overlap: Vec<i32> = years.iter().copied().filter(|y| period.contains(*y)).collect();
        if !overlap.is_empty() {
            files.push(path.clone());
            covered.extend(overlap);
        }
    }
    (files, covered)
}

/// Years of `period` not present in `covered`, ascending.
pub fn missing_years(covered: &BTreeSet<i32>, period: Period) -> Vec<i32> {
    period.years().filter(|y| !covered.contains(y)).collect()
}

/// Compact display of a year set: `1979-1987` or `1990`.
pub fn year_span(years: &BTreeSet<i32>) -> String {
    match (years.first(), years.last()) {
        (Some(first), Some(last)) if first != last => format!("{}-{}", first, last),
        (Some(first), _) => first.to_string(),
        _ => "none".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
