//! GeoMet physical-intensity proxies.
//!
//! `geomet/geomet.csv` carries, per country-year (possibly several rows),
//! the proxies `killed_pop_<s>`, `affected_pop_<s>` and `damage_gdp_<s>`
//! for each hazard suffix `<s>`. The intensity of a type is the sum of
//! its present proxies, summed again over rows of the same (ISO, Year).

use crate::countries::IsoFilter;
use crate::logging::{self, DataSource};
use crate::model::{Period, PipelineError, Result};
use crate::table::{self, Table, cell};
use std::collections::BTreeMap;
use std::path::Path;

pub const GEOMET_FILE: &str = "geomet.csv";

/// GeoMet variable suffix of each disaster type.
pub const TYPE_SUFFIXES: &[(&str, &str)] = &[
    ("Earthquake", "eq"),
    ("Flood", "fld"),
    ("Storm", "str"),
    ("Extreme temperature", "temp"),
];

pub const PROXY_PREFIXES: &[&str] = &["killed_pop", "affected_pop", "damage_gdp"];

pub fn suffix_for(disaster_type: &str) -> Option<&'static str> {
    TYPE_SUFFIXES
        .iter()
        .find(|(name, _)| *name == disaster_type)
        .map(|(_, suffix)| *suffix)
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeometCountryYear {
    pub iso: String,
    pub year: i32,
    /// Aligned with the configured types; `None` where the type has no
    /// proxy column in the file.
    pub intensity: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeometData {
    /// Whether each configured type has at least one proxy column.
    pub available: Vec<bool>,
    pub rows: Vec<GeometCountryYear>,
}

impl GeometData {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_intensity(&self) -> bool {
        self.available.iter().any(|a| *a)
    }
}

pub fn parse_geomet(
    table: &Table,
    period: Period,
    iso_filter: &IsoFilter,
    disaster_types: &[String],
) -> Result<GeometData> {
    let iso_idx = table.index_any(&["iso", "ISO"]);
    let year_idx = table.index_any(&["year", "Year"]);
    let (Some(iso_idx), Some(year_idx)) = (iso_idx, year_idx) else {
        return Err(PipelineError::MissingColumns {
            dataset: "GeoMet".to_string(),
            columns: vec!["iso".to_string(), "year".to_string()],
        });
    };

    let proxies: Vec<Vec<usize>> = disaster_types
        .iter()
        .map(|t| match suffix_for(t) {
            Some(suffix) => PROXY_PREFIXES
                .iter()
                .filter_map(|p| table.index(&format!("{}_{}", p, suffix)))
                .collect(),
            None => Vec::new(),
        })
        .collect();
    let available: Vec<bool> = proxies.iter().map(|p| !p.is_empty()).collect();

    let mut sums: BTreeMap<(String, i32), Vec<f64>> = BTreeMap::new();
    for row in &table.rows {
        let Some(year) = table::parse_year(cell(row, year_idx)) else {
            continue;
        };
        if !period.contains(year) {
            continue;
        }
        let Some(iso) = iso_filter.accept(cell(row, iso_idx)) else {
            continue;
        };
        let totals = sums
            .entry((iso, year))
            .or_insert_with(|| vec![0.0; disaster_types.len()]);
        for (slot, columns) in proxies.iter().enumerate() {
            totals[slot] += columns
                .iter()
                .filter_map(|&i| table::parse_number(cell(row, i)))
                .sum::<f64>();
        }
    }

    let rows = sums
        .into_iter()
        .map(|((iso, year), totals)| GeometCountryYear {
            iso,
            year,
            intensity: totals
                .into_iter()
                .zip(&available)
                .map(|(value, present)| present.then_some(value))
                .collect(),
        })
        .collect();
    Ok(GeometData { available, rows })
}

pub fn load_geomet(
    dir: &Path,
    period: Period,
    iso_filter: &IsoFilter,
    disaster_types: &[String],
) -> Result<GeometData> {
    let context = period.to_string();
    let table = Table::read(&dir.join(GEOMET_FILE))?;
    let data = parse_geomet(&table, period, iso_filter, disaster_types)?;
    if data.is_empty() {
        logging::debug(DataSource::GeoMet, Some(&context), "no rows for period");
    } else {
        let first = data.rows.iter().map(|r| r.year).min().unwrap_or(period.start);
        let last = data.rows.iter().map(|r| r.year).max().unwrap_or(period.end);
        logging::debug(
            DataSource::GeoMet,
            Some(&context),
            &format!("{} country-years, years {}-{}", data.rows.len(), first, last),
        );
    }
    for (disaster_type, present) in disaster_types.iter().zip(&data.available) {
        if !present {
            logging::warn(
                DataSource::GeoMet,
                Some(&context),
                &format!("no intensity proxy for {}", disaster_type),
            );
        }
    }
    Ok(data)
}
