/// Core data types for the disaster/export panel pipeline.
///
/// This module defines the shared domain model imported by all other modules:
/// study periods, export flows, per-type disaster measures, the country-year
/// disaster panel, the product-level econometric panel, and the pipeline
/// error type. It performs no I/O.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Classification codes
// ---------------------------------------------------------------------------

/// Comtrade `classificationSearchCode` for the Harmonized System.
pub const CLASSIFICATION_HS: &str = "HS";

/// Comtrade `classificationSearchCode` for SITC revision 2.
pub const CLASSIFICATION_SITC2: &str = "S2";

/// Placeholder written when a country has no World Bank income group.
pub const INCOME_GROUP_NA: &str = "NA";

// ---------------------------------------------------------------------------
// Study period
// ---------------------------------------------------------------------------

/// An inclusive range of years analysed as one panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Period {
    pub start: i32,
    pub end: i32,
}

impl Period {
    pub fn new(start: i32, end: i32) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, year: i32) -> bool {
        year >= self.start && year <= self.end
    }

    pub fn years(&self) -> RangeInclusive<i32> {
        self.start..=self.end
    }

    /// File/cache label, e.g. `1979_2000`.
    pub fn label(&self) -> String {
        format!("{}_{}", self.start, self.end)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

// ---------------------------------------------------------------------------
// Export flows
// ---------------------------------------------------------------------------

/// One annual export flow of a country to the world for one product code,
/// harmonized from a Comtrade extract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRecord {
    pub year: i32,
    pub iso: String,
    pub country: String,
    pub classification_code: String,
    pub classification_search_code: String,
    pub cmd_code: String,
    pub is_agri: bool,
    /// Free-on-board value in current USD.
    pub fobvalue: f64,
}

/// Cached result of the export collection step, one entry per period label.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportsByPeriod {
    pub periods: Vec<(Period, Vec<ExportRecord>)>,
}

impl ExportsByPeriod {
    pub fn get(&self, period: Period) -> Option<&[ExportRecord]> {
        self.periods
            .iter()
            .find(|(p, _)| *p == period)
            .map(|(_, rows)| rows.as_slice())
    }
}

// ---------------------------------------------------------------------------
// Disaster measures
// ---------------------------------------------------------------------------

/// Disaster measures of a single disaster type for one country-year.
///
/// `deaths`, `affected` and `events` come from EM-DAT; `intensity` from
/// GeoMet and is `None` when GeoMet had no proxy for the type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisasterMeasures {
    pub deaths: f64,
    pub affected: f64,
    pub events: f64,
    pub intensity: Option<f64>,
    pub sig_median: bool,
    pub sig_p90: bool,
    pub sig_abs1000: bool,
    pub sig_anydeaths: bool,
    pub geomet_sig_p90: Option<bool>,
}

impl DisasterMeasures {
    /// Top decile of deaths relative to population (EM-DAT).
    pub fn extreme_emdat(&self) -> bool {
        self.sig_p90
    }

    /// Top decile of physical intensity (GeoMet).
    pub fn extreme_geomet(&self) -> Option<bool> {
        self.geomet_sig_p90
    }
}

/// World Bank / UN DESA indicators for one country-year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryIndicators {
    pub iso: String,
    pub year: i32,
    /// Persons (UN DESA reports thousands; already multiplied).
    pub population: f64,
    pub income_group: Option<String>,
    pub is_poor_country: Option<bool>,
}

/// One row of the country-year disaster panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisasterRow {
    pub iso: String,
    pub country: String,
    pub year: i32,
    /// Aligned with `DisasterDataset::disaster_types`.
    pub by_type: Vec<DisasterMeasures>,
    pub population: f64,
    pub income_group: String,
    pub is_poor_country: bool,
    pub is_small_country: bool,
    pub disaster_index: Option<f64>,
}

/// Country-year disaster panel for one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisasterDataset {
    pub period: Period,
    pub disaster_types: Vec<String>,
    pub has_geomet: bool,
    pub rows: Vec<DisasterRow>,
}

// ---------------------------------------------------------------------------
// Econometric panel
// ---------------------------------------------------------------------------

/// One product-country-year observation of the econometric dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelRow {
    pub iso: String,
    pub country: String,
    pub year: i32,
    pub cmd_code: String,
    pub fobvalue: f64,
    pub is_agri: bool,
    pub by_type: Vec<DisasterMeasures>,
    pub population: f64,
    pub income_group: String,
    pub is_poor_country: bool,
    pub is_small_country: bool,
    pub sum_events: f64,
    pub ln_total_occurrence: f64,
    pub sum_deaths: f64,
    pub ln_total_deaths: f64,
    pub n_sig_events: f64,
    pub ln_sig_occurrence: f64,
    pub disaster_index: Option<f64>,
    pub income_group_internal: String,
    pub size_group: String,
    pub ln_population: Option<f64>,
    pub d_ln_population: Option<f64>,
    pub ln_exports: f64,
    pub d_ln_exports: Option<f64>,
}

/// One country-year observation of the aggregated country dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryPanelRow {
    pub iso: String,
    pub country: String,
    pub year: i32,
    pub total_exports: f64,
    pub exports_agriculture: f64,
    pub d_ln_total_exports: Option<f64>,
    pub d_ln_agri_exports: Option<f64>,
    pub total_deaths: f64,
    pub deaths_pop_ratio: f64,
    pub is_significant_event: bool,
    /// Per disaster type, aligned with the dataset's `disaster_types`.
    pub deaths_pop_ratio_by_type: Vec<f64>,
    pub is_significant_by_type: Vec<bool>,
    pub population: f64,
    pub is_poor_country: bool,
    pub is_small_country: bool,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can arise anywhere in the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// Non-2xx HTTP response from an API.
    #[error("HTTP error: {0}")]
    HttpStatus(u16),
    #[error("API quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("file not found: {}", .0.display())]
    MissingFile(PathBuf),
    #[error("{dataset}: missing columns {columns:?}")]
    MissingColumns { dataset: String, columns: Vec<String> },
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("no data available: {0}")]
    NoData(String),
    #[error("{column}: {count} rows without World Bank coverage (ISO: {isos:?})")]
    MissingCoverage {
        column: String,
        count: usize,
        isos: Vec<String>,
    },
    #[error("singular design matrix: {0}")]
    SingularDesign(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_label_and_display() {
        let period = Period::new(1979, 2000);
        assert_eq!(period.label(), "1979_2000");
        assert_eq!(period.to_string(), "1979-2000");
    }

    #[test]
    fn test_period_bounds_are_inclusive() {
        let period = Period::new(2000, 2024);
        assert!(period.contains(2000));
        assert!(period.contains(2024));
        assert!(!period.contains(1999));
        assert_eq!(period.years().count(), 25);
    }

    #[test]
    fn test_missing_columns_message_lists_columns() {
        let err = PipelineError::MissingColumns {
            dataset: "exports".to_string(),
            columns: vec!["fobvalue".to_string()],
        };
        assert_eq!(err.to_string(), "exports: missing columns [\"fobvalue\"]");
    }
}
