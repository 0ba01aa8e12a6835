/// EM-DAT disaster records
///
/// Two extract layouts are supported:
/// - `emdat_1979_2000.csv`: one row per event, year taken from `Start Year`.
///   Used for periods ending in 2000 or earlier.
/// - `emdat_countries_2000.csv`: one row per country, year and disaster
///   type. Its second line is an HXL tag row (`#date +occurred` under
///   `Year`) that must be skipped.
///
/// Records are filtered to the configured disaster types and aggregated to
/// per-type totals for each country-year.

use crate::countries::IsoFilter;
use crate::logging::{self, DataSource};
use crate::model::{Period, PipelineError, Result};
use crate::table::{self, Table, cell};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const EVENT_FILE: &str = "emdat_1979_2000.csv";
pub const COUNTRY_YEAR_FILE: &str = "emdat_countries_2000.csv";

/// Last year served by the event-per-row extract.
pub const EVENT_LAYOUT_LAST_YEAR: i32 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmdatLayout {
    EventPerRow,
    CountryYear,
}

impl EmdatLayout {
    pub fn for_period(period: Period) -> Self {
        if period.end <= EVENT_LAYOUT_LAST_YEAR {
            EmdatLayout::EventPerRow
        } else {
            EmdatLayout::CountryYear
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            EmdatLayout::EventPerRow => EVENT_FILE,
            EmdatLayout::CountryYear => COUNTRY_YEAR_FILE,
        }
    }

    fn year_columns(&self) -> &'static [&'static str] {
        match self {
            EmdatLayout::EventPerRow => &["Start Year", "Year"],
            EmdatLayout::CountryYear => &["Year"],
        }
    }
}

pub fn source_path(dir: &Path, period: Period) -> PathBuf {
    dir.join(EmdatLayout::for_period(period).file_name())
}

/// Maps EM-DAT subtypes onto the type they are analysed under.
pub fn canonical_type(raw: &str) -> &str {
    match raw.trim() {
        "Drought" | "Heat wave" | "Cold wave" => "Extreme temperature",
        other => other,
    }
}

/// One EM-DAT record after cleaning.
#[derive(Debug, Clone, PartialEq)]
pub struct EmdatRecord {
    pub iso: String,
    pub country: String,
    pub year: i32,
    /// Canonical disaster type (see `canonical_type`).
    pub disaster_type: String,
    pub deaths: f64,
    pub affected: f64,
    /// Always 1: occurrences are the number of rows per country-year and
    /// type in both layouts, `Total Events` is ignored.
    pub events: f64,
}

/// Parses an EM-DAT table.
///
/// Only records whose raw `Disaster Type` is one of `disaster_types` are
/// kept; the filter runs before subtypes are mapped, so a `Drought` row is
/// dropped unless `Drought` itself is configured.
pub fn parse_emdat(
    table: &Table,
    layout: EmdatLayout,
    period: Period,
    iso_filter: &IsoFilter,
    disaster_types: &[String],
) -> Result<Vec<EmdatRecord>> {
    let idx = table.require("EM-DAT", &["ISO", "Country", "Disaster Type"])?;
    let (iso_idx, country_idx, type_idx) = (idx[0], idx[1], idx[2]);
    let year_idx = table.index_any(layout.year_columns()).ok_or_else(|| PipelineError::MissingColumns {
        dataset: "EM-DAT".to_string(),
        columns: vec![layout.year_columns()[0].to_string()],
    })?;
    let deaths_idx = table.index("Total Deaths");
    let affected_idx = table.index("Total Affected");
    if deaths_idx.is_none() || affected_idx.is_none() {
        logging::warn(
            DataSource::EmDat,
            Some(layout.file_name()),
            "Total Deaths/Total Affected missing, counted as 0",
        );
    }

    let number = |row: &csv::StringRecord, idx: Option<usize>| {
        idx.and_then(|i| table::parse_number(cell(row, i))).unwrap_or(0.0)
    };

    let mut records = Vec::new();
    for row in &table.rows {
        // The HXL tag row and blank years fail to parse and are skipped.
        let Some(year) = table::parse_year(cell(row, year_idx)) else {
            continue;
        };
        if !period.contains(year) {
            continue;
        }
        let Some(iso) = iso_filter.accept(cell(row, iso_idx)) else {
            continue;
        };
        let raw_type = cell(row, type_idx).trim();
        if !disaster_types.iter().any(|t| t == raw_type) {
            continue;
        }
        records.push(EmdatRecord {
            iso,
            country: cell(row, country_idx).trim().to_string(),
            year,
            disaster_type: canonical_type(raw_type).to_string(),
            deaths: number(row, deaths_idx),
            affected: number(row, affected_idx),
            events: 1.0,
        });
    }
    Ok(records)
}

/// Loads the EM-DAT extract matching the period's layout.
pub fn load_emdat(
    dir: &Path,
    period: Period,
    iso_filter: &IsoFilter,
    disaster_types: &[String],
) -> Result<Vec<EmdatRecord>> {
    let layout = EmdatLayout::for_period(period);
    let path = source_path(dir, period);
    let context = period.to_string();
    logging::info(
        DataSource::EmDat,
        Some(&context),
        &format!("source {} ({:?})", layout.file_name(), layout),
    );
    let table = Table::read(&path)?;
    logging::debug(
        DataSource::EmDat,
        Some(&context),
        &format!("{} rows read from {}", table.len(), path.display()),
    );
    let records = parse_emdat(&table, layout, period, iso_filter, disaster_types)?;
    logging::info(
        DataSource::EmDat,
        Some(&context),
        &format!("{} records for disaster types of interest", records.len()),
    );
    Ok(records)
}

/// Per-type EM-DAT totals of one country-year.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EmdatTotals {
    pub deaths: f64,
    pub affected: f64,
    pub events: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmdatCountryYear {
    pub iso: String,
    pub country: String,
    pub year: i32,
    /// Aligned with the `disaster_types` passed to `aggregate_emdat`.
    pub by_type: Vec<EmdatTotals>,
}

/// Sums deaths, affected and events per (ISO, Country, Year) and type.
/// Types without records are zero.
pub fn aggregate_emdat(records: &[EmdatRecord], disaster_types: &[String]) -> Vec<EmdatCountryYear> {
    let mut groups: BTreeMap<(String, String, i32), Vec<EmdatTotals>> = BTreeMap::new();
    for record in records {
        let Some(slot) = disaster_types.iter().position(|t| *t == record.disaster_type) else {
            continue;
        };
        let totals = groups
            .entry((record.iso.clone(), record.country.clone(), record.year))
            .or_insert_with(|| vec![EmdatTotals::default(); disaster_types.len()]);
        totals[slot].deaths += record.deaths;
        totals[slot].affected += record.affected;
        totals[slot].events += record.events;
    }
    groups
        .into_iter()
        .map(|((iso, country, year), by_type)| EmdatCountryYear {
            iso,
            country,
            year,
            by_type,
        })
        .collect()
}
