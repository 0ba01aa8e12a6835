/// World Bank income classification and UN DESA population
///
/// Income groups are a single cross-section keyed by ISO; population is a
/// country-year series. The two are joined on ISO to give one
/// `CountryIndicators` per country-year of the population file.

use crate::countries::{self, IsoFilter};
use crate::logging::{self, DataSource};
use crate::model::{CountryIndicators, PipelineError, Result};
use crate::table::{self, Table, cell};
use std::collections::HashMap;
use std::path::Path;

pub const INCOME_FILE: &str = "country_income_classification.csv";
pub const POPULATION_FILE: &str = "total_population.csv";

const POPULATION_COLUMNS: &[&str] = &[
    "Total Population, as of 1 January (thousands)",
    "Total Population, as of 1 July (thousands)",
];
const COUNTRY_AREA: &str = "Country/Area";

/// ISO → income group. A row with a blank group maps to `None`.
pub fn parse_income(table: &Table, iso_filter: &IsoFilter) -> Result<HashMap<String, Option<String>>> {
    let idx = table.require("World Bank income", &["Code", "Income group"])?;
    let mut groups = HashMap::new();
    for row in &table.rows {
        let Some(iso) = iso_filter.accept(cell(row, idx[0])) else {
            continue;
        };
        let group = cell(row, idx[1]).trim();
        let group = (!group.is_empty()).then(|| group.to_string());
        groups.entry(iso).or_insert(group);
    }
    Ok(groups)
}

/// (ISO, Year, persons) rows. Population is reported in thousands.
pub fn parse_population(table: &Table, iso_filter: &IsoFilter) -> Result<Vec<(String, i32, f64)>> {
    let iso_idx = table.index_any(&["ISO3 Alpha-code", "ISO"]);
    let pop_idx = table.index_any(POPULATION_COLUMNS);
    let year_idx = table.index("Year");
    let (Some(iso_idx), Some(pop_idx), Some(year_idx)) = (iso_idx, pop_idx, year_idx) else {
        return Err(PipelineError::MissingColumns {
            dataset: "UN DESA population".to_string(),
            columns: vec![
                "ISO3 Alpha-code".to_string(),
                "Year".to_string(),
                POPULATION_COLUMNS[0].to_string(),
            ],
        });
    };
    let type_idx = table.index("Type");

    let mut rows = Vec::new();
    let mut unparsed = 0usize;
    for row in &table.rows {
        if let Some(i) = type_idx {
            if cell(row, i).trim() != COUNTRY_AREA {
                continue;
            }
        }
        let Some(iso) = iso_filter.accept(cell(row, iso_idx)) else {
            continue;
        };
        let Some(year) = table::parse_year(cell(row, year_idx)) else {
            continue;
        };
        // Thousands may be written with space separators ("1 234.5").
        let raw = cell(row, pop_idx).replace([' ', '\u{a0}'], "");
        match table::parse_number(&raw) {
            Some(thousands) => rows.push((iso, year, thousands * 1000.0)),
            None => unparsed += 1,
        }
    }
    if unparsed > 0 {
        logging::warn(
            DataSource::WorldBank,
            Some("population"),
            &format!("{} country-years without a numeric population dropped", unparsed),
        );
    }
    Ok(rows)
}

/// Joins population and income on ISO.
///
/// `is_poor_country` is `None` for countries absent from the income file,
/// and `Some(false)` for listed countries with a blank group.
pub fn join_indicators(
    population: Vec<(String, i32, f64)>,
    income: &HashMap<String, Option<String>>,
) -> Vec<CountryIndicators> {
    population
        .into_iter()
        .map(|(iso, year, population)| {
            let listed = income.get(&iso);
            let income_group = listed.cloned().flatten();
            let is_poor_country = listed.map(|group| {
                group
                    .as_deref()
                    .map(countries::is_poor_income_group)
                    .unwrap_or(false)
            });
            CountryIndicators {
                iso,
                year,
                population,
                income_group,
                is_poor_country,
            }
        })
        .collect()
}

pub fn load_indicators(
    worldbank_dir: &Path,
    undesa_dir: &Path,
    iso_filter: &IsoFilter,
) -> Result<Vec<CountryIndicators>> {
    let income = parse_income(&Table::read(&worldbank_dir.join(INCOME_FILE))?, iso_filter)?;
    let population = parse_population(&Table::read(&undesa_dir.join(POPULATION_FILE))?, iso_filter)?;
    logging::info(
        DataSource::WorldBank,
        None,
        &format!(
            "{} countries (income), {} country-years (population)",
            income.len(),
            population.len()
        ),
    );
    Ok(join_indicators(population, &income))
}
