/// Country-year disaster panel (pipeline step 2)
///
/// Combines EM-DAT totals and GeoMet intensities, restricts the panel to
/// country-years with disaster or trade data that the World Bank/UN DESA
/// files also cover, attaches population and income classification, and
/// computes the significant-event flags and the disaster index.

use crate::analysis::significance;
use crate::cache::{self, Cache};
use crate::config::PipelineConfig;
use crate::countries::{IsoFilter, type_key};
use crate::ingest::emdat::{self, EmdatCountryYear};
use crate::ingest::geomet::{self, GeometData};
use crate::ingest::worldbank;
use crate::logging::{self, DataSource};
use crate::model::{
    CountryIndicators, DisasterDataset, DisasterMeasures, DisasterRow, ExportRecord, ExportsByPeriod,
    INCOME_GROUP_NA, Period, PipelineError, Result,
};
use serde_json::json;
use std::collections::{BTreeSet, HashMap};

/// ISO codes listed in coverage errors before truncation.
const MAX_LISTED_ISOS: usize = 20;

/// Builds the disaster panel from already-loaded sources.
///
/// `exports` only contributes country-years and country names; it may
/// span other periods.
pub fn assemble_disaster_dataset(
    period: Period,
    disaster_types: &[String],
    emdat: &[EmdatCountryYear],
    geomet: &GeometData,
    indicators: &[CountryIndicators],
    exports: &[ExportRecord],
    small_country_threshold: f64,
) -> Result<DisasterDataset> {
    let context = period.to_string();
    if emdat.is_empty() && geomet.is_empty() {
        return Err(PipelineError::NoData(format!(
            "no EM-DAT or GeoMet records for {}",
            period
        )));
    }
    if indicators.is_empty() {
        return Err(PipelineError::NoData("World Bank/UN DESA indicators".to_string()));
    }
    if emdat.is_empty() {
        logging::warn(DataSource::EmDat, Some(&context), "only GeoMet data used (EM-DAT unavailable)");
    } else if geomet.is_empty() {
        logging::warn(DataSource::GeoMet, Some(&context), "only EM-DAT data used (GeoMet unavailable)");
    }

    let mut emdat_by_key: HashMap<(&str, i32), &EmdatCountryYear> = HashMap::new();
    let mut names: HashMap<&str, &str> = HashMap::new();
    for record in emdat {
        emdat_by_key.entry((record.iso.as_str(), record.year)).or_insert(record);
        if !record.country.is_empty() {
            names.entry(record.iso.as_str()).or_insert(record.country.as_str());
        }
    }
    for record in exports {
        if !record.country.is_empty() {
            names.entry(record.iso.as_str()).or_insert(record.country.as_str());
        }
    }
    let geomet_by_key: HashMap<(&str, i32), &geomet::GeometCountryYear> = geomet
        .rows
        .iter()
        .map(|r| ((r.iso.as_str(), r.year), r))
        .collect();
    let indicators_by_key: HashMap<(&str, i32), &CountryIndicators> = indicators
        .iter()
        .map(|r| ((r.iso.as_str(), r.year), r))
        .collect();

    let candidates: BTreeSet<(&str, i32)> = emdat_by_key
        .keys()
        .chain(geomet_by_key.keys())
        .copied()
        .chain(exports.iter().map(|r| (r.iso.as_str(), r.year)))
        .collect();
    let panel: Vec<(&str, i32)> = candidates
        .into_iter()
        .filter(|key| indicators_by_key.contains_key(key))
        .collect();

    let available = if geomet.available.len() == disaster_types.len() {
        geomet.available.clone()
    } else {
        vec![false; disaster_types.len()]
    };

    let mut rows = Vec::with_capacity(panel.len());
    let mut missing_poor: BTreeSet<String> = BTreeSet::new();
    let mut missing_poor_rows = 0usize;
    let mut missing_income: BTreeSet<String> = BTreeSet::new();
    for key in panel {
        let (iso, year) = key;
        let Some(wb) = indicators_by_key.get(&key) else {
            continue;
        };
        let totals = emdat_by_key.get(&key);
        let intensities = geomet_by_key.get(&key);
        let by_type = (0..disaster_types.len())
            .map(|t| {
                let emdat_totals = totals.map(|r| r.by_type[t]).unwrap_or_default();
                DisasterMeasures {
                    deaths: emdat_totals.deaths,
                    affected: emdat_totals.affected,
                    events: emdat_totals.events,
                    intensity: available[t]
                        .then(|| intensities.and_then(|g| g.intensity[t]).unwrap_or(0.0)),
                    ..DisasterMeasures::default()
                }
            })
            .collect();

        let is_poor_country = match wb.is_poor_country {
            Some(flag) => flag,
            None => {
                missing_poor.insert(iso.to_string());
                missing_poor_rows += 1;
                false
            }
        };
        let income_group = match &wb.income_group {
            Some(group) => group.clone(),
            None => {
                missing_income.insert(iso.to_string());
                INCOME_GROUP_NA.to_string()
            }
        };

        rows.push(DisasterRow {
            iso: iso.to_string(),
            country: names.get(iso).map(|n| n.to_string()).unwrap_or_default(),
            year,
            by_type,
            population: wb.population,
            income_group,
            is_poor_country,
            is_small_country: wb.population < small_country_threshold,
            disaster_index: None,
        });
    }

    if missing_poor_rows > 0 {
        for iso in &missing_poor {
            logging::error(DataSource::WorldBank, Some(iso), "no income classification");
        }
        return Err(PipelineError::MissingCoverage {
            column: "is_poor_country".to_string(),
            count: missing_poor_rows,
            isos: missing_poor.into_iter().take(MAX_LISTED_ISOS).collect(),
        });
    }
    if !missing_income.is_empty() {
        logging::warn(
            DataSource::WorldBank,
            Some(&context),
            &format!(
                "{} ISO without income group: {:?} (NA imputed)",
                missing_income.len(),
                missing_income
            ),
        );
    }

    significance::flag_significant_events(&mut rows, disaster_types.len());

    let before = rows.len();
    rows.retain(|r| period.contains(r.year));
    if rows.len() < before {
        logging::warn(
            DataSource::Panel,
            Some(&context),
            &format!("{} rows outside the period removed", before - rows.len()),
        );
    }
    let before = rows.len();
    rows.retain(|r| !r.country.is_empty());
    if rows.len() < before {
        logging::warn(
            DataSource::Panel,
            Some(&context),
            &format!("{} rows without country name removed", before - rows.len()),
        );
    }

    significance::normalized_disaster_index(&mut rows, disaster_types.len());
    if rows.iter().all(|r| r.disaster_index.is_none()) {
        logging::warn(
            DataSource::GeoMet,
            Some(&context),
            "no intensity available, disaster_index not computed",
        );
    }

    Ok(DisasterDataset {
        period,
        disaster_types: disaster_types.to_vec(),
        has_geomet: available.iter().any(|a| *a),
        rows,
    })
}

pub fn log_disaster_summary(dataset: &DisasterDataset, reference_year: i32) {
    let context = dataset.period.to_string();
    let first = dataset.rows.iter().map(|r| r.year).min();
    let last = dataset.rows.iter().map(|r| r.year).max();
    let countries: BTreeSet<&str> = dataset.rows.iter().map(|r| r.iso.as_str()).collect();
    let reference: Vec<&DisasterRow> = dataset.rows.iter().filter(|r| r.year == reference_year).collect();
    let years = match (first, last) {
        (Some(first), Some(last)) => format!("{}-{}", first, last),
        _ => "N/A".to_string(),
    };
    logging::info(
        DataSource::Panel,
        Some(&context),
        &format!(
            "disasters: {} obs, years {}, {} countries, reference year {}: {} poor, {} small",
            dataset.rows.len(),
            years,
            countries.len(),
            reference_year,
            reference.iter().filter(|r| r.is_poor_country).count(),
            reference.iter().filter(|r| r.is_small_country).count()
        ),
    );
    let keys: Vec<String> = dataset.disaster_types.iter().map(|t| type_key(t)).collect();
    for (column, count) in significance::count_flags(&dataset.rows, &keys) {
        logging::debug(DataSource::Panel, Some(&context), &format!("{}: {}", column, count));
    }
}

/// Step 2 for one period: cached dataset, or a fresh build from the
/// source files (then cached).
pub fn create_disaster_dataset(
    config: &PipelineConfig,
    cache: &Cache,
    period: Period,
    clear_cache: bool,
) -> Result<DisasterDataset> {
    let key = cache::key_for(cache::DISASTERS_KIND, period);
    let context = period.to_string();
    if clear_cache {
        cache.remove(&key)?;
    } else if config.use_cache {
        if let Some(entry) = cache.load::<DisasterDataset>(&key) {
            if entry.value.disaster_types == config.disaster_types {
                log_disaster_summary(&entry.value, config.poor_country_year);
                return Ok(entry.value);
            }
            logging::warn(
                DataSource::Cache,
                Some(&key),
                "cached disaster types differ from configuration, rebuilding",
            );
        }
    }

    logging::info(DataSource::Panel, Some(&context), "creating disaster dataset");
    let iso_filter = IsoFilter::new(&config.excluded_iso_codes);
    let types = &config.disaster_types;

    let emdat = match emdat::load_emdat(&config.emdat_dir(), period, &iso_filter, types) {
        Ok(records) => emdat::aggregate_emdat(&records, types),
        Err(err) => {
            logging::error(DataSource::EmDat, Some(&context), &err.to_string());
            Vec::new()
        }
    };
    let geomet = match geomet::load_geomet(&config.geomet_dir(), period, &iso_filter, types) {
        Ok(data) => data,
        Err(err) => {
            logging::warn(DataSource::GeoMet, Some(&context), &err.to_string());
            GeometData::default()
        }
    };
    if !geomet.is_empty() && !geomet.has_intensity() {
        logging::warn(
            DataSource::GeoMet,
            Some(&context),
            "no intensity proxy for the configured disaster types",
        );
    }
    let indicators = worldbank::load_indicators(&config.worldbank_dir(), &config.undesa_dir(), &iso_filter)?;
    let exports: Vec<ExportRecord> = cache
        .load::<ExportsByPeriod>(cache::EXPORTS_KEY)
        .map(|entry| {
            entry
                .value
                .periods
                .into_iter()
                .flat_map(|(_, rows)| rows)
                .collect()
        })
        .unwrap_or_default();
    if exports.is_empty() {
        logging::debug(
            DataSource::Panel,
            Some(&context),
            "no cached exports, panel restricted to disaster country-years",
        );
    }

    let dataset = assemble_disaster_dataset(
        period,
        types,
        &emdat,
        &geomet,
        &indicators,
        &exports,
        config.small_country_threshold,
    )?;
    log_disaster_summary(&dataset, config.poor_country_year);

    cache.store(
        &key,
        json!({
            "start": period.start,
            "end": period.end,
            "disaster_types": types,
            "small_country_threshold": config.small_country_threshold,
        }),
        &dataset,
    )?;
    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::emdat::EmdatTotals;
    use crate::ingest::geomet::GeometCountryYear;

    fn types() -> Vec<String> {
        vec!["Earthquake".to_string(), "Flood".to_string()]
    }

    fn emdat_row(iso: &str, year: i32, eq_deaths: f64, flood_events: f64) -> EmdatCountryYear {
        EmdatCountryYear {
            iso: iso.to_string(),
            country: format!("Country {}", iso),
            year,
            by_type: vec![
                EmdatTotals {
                    deaths: eq_deaths,
                    affected: 0.0,
                    events: 1.0,
                },
                EmdatTotals {
                    deaths: 0.0,
                    affected: 10.0,
                    events: flood_events,
                },
            ],
        }
    }

    fn indicator(iso: &str, year: i32, population: f64, group: Option<&str>, poor: Option<bool>) -> CountryIndicators {
        CountryIndicators {
            iso: iso.to_string(),
            year,
            population,
            income_group: group.map(String::from),
            is_poor_country: poor,
        }
    }

    fn export(iso: &str, year: i32) -> ExportRecord {
        ExportRecord {
            year,
            iso: iso.to_string(),
            country: format!("Exporter {}", iso),
            classification_code: "H1".to_string(),
            classification_search_code: "HS".to_string(),
            cmd_code: "01".to_string(),
            is_agri: true,
            fobvalue: 10.0,
        }
    }

    #[test]
    fn test_panel_is_restricted_to_world_bank_coverage() {
        let emdat = vec![emdat_row("AAA", 1990, 10.0, 1.0), emdat_row("BBB", 1990, 0.0, 2.0)];
        let indicators = vec![
            indicator("AAA", 1990, 30e6, Some("High income"), Some(false)),
            indicator("CCC", 1991, 5e6, Some("Low income"), Some(true)),
        ];
        let exports = vec![export("CCC", 1991), export("DDD", 1991)];
        let dataset = assemble_disaster_dataset(
            Period::new(1990, 1991),
            &types(),
            &emdat,
            &GeometData::default(),
            &indicators,
            &exports,
            20e6,
        )
        .unwrap();

        assert_eq!(dataset.rows.len(), 2);
        let aaa = &dataset.rows[0];
        assert_eq!(aaa.iso, "AAA");
        assert_eq!(aaa.country, "Country AAA");
        assert_eq!(aaa.by_type[0].deaths, 10.0);
        assert!(!aaa.is_small_country);
        assert_eq!(aaa.disaster_index, None);

        let ccc = &dataset.rows[1];
        assert_eq!(ccc.country, "Exporter CCC");
        assert_eq!(ccc.by_type[1], DisasterMeasures::default());
        assert!(ccc.is_poor_country);
        assert!(ccc.is_small_country);
        assert!(!dataset.has_geomet);
    }

    #[test]
    fn test_missing_income_classification_is_fatal() {
        let emdat = vec![emdat_row("AAA", 1990, 1.0, 0.0)];
        let indicators = vec![indicator("AAA", 1990, 1e6, None, None)];
        let err = assemble_disaster_dataset(
            Period::new(1990, 1990),
            &types(),
            &emdat,
            &GeometData::default(),
            &indicators,
            &[],
            20e6,
        )
        .unwrap_err();
        match err {
            PipelineError::MissingCoverage { column, count, isos } => {
                assert_eq!(column, "is_poor_country");
                assert_eq!(count, 1);
                assert_eq!(isos, vec!["AAA".to_string()]);
            }
            other => panic!("expected MissingCoverage, got {:?}", other),
        }
    }

    #[test]
    fn test_blank_income_group_becomes_na() {
        let emdat = vec![emdat_row("AAA", 1990, 1.0, 0.0)];
        let indicators = vec![indicator("AAA", 1990, 1e6, None, Some(false))];
        let dataset = assemble_disaster_dataset(
            Period::new(1990, 1990),
            &types(),
            &emdat,
            &GeometData::default(),
            &indicators,
            &[],
            20e6,
        )
        .unwrap();
        assert_eq!(dataset.rows[0].income_group, INCOME_GROUP_NA);
    }

    #[test]
    fn test_geomet_only_rows_need_a_name_and_get_zero_intensity_fill() {
        let geomet = GeometData {
            available: vec![true, false],
            rows: vec![GeometCountryYear {
                iso: "AAA".to_string(),
                year: 1991,
                intensity: vec![Some(4.0), None],
            }],
        };
        let emdat = vec![emdat_row("AAA", 1990, 0.0, 0.0), emdat_row("ZZZ", 1990, 0.0, 0.0)];
        let indicators = vec![
            indicator("AAA", 1990, 1e6, Some("Low income"), Some(true)),
            indicator("AAA", 1991, 1e6, Some("Low income"), Some(true)),
            indicator("ZZZ", 1990, 1e6, Some("Low income"), Some(true)),
        ];
        let dataset =
            assemble_disaster_dataset(Period::new(1990, 1991), &types(), &emdat, &geomet, &indicators, &[], 20e6)
                .unwrap();

        assert!(dataset.has_geomet);
        let aaa_1990 = dataset.rows.iter().find(|r| r.iso == "AAA" && r.year == 1990).unwrap();
        assert_eq!(aaa_1990.by_type[0].intensity, Some(0.0));
        assert_eq!(aaa_1990.by_type[1].intensity, None);
        let aaa_1991 = dataset.rows.iter().find(|r| r.year == 1991).unwrap();
        assert_eq!(aaa_1991.country, "Country AAA");
        assert!(aaa_1991.disaster_index.unwrap() > 0.0);
    }

    #[test]
    fn test_no_disaster_source_is_an_error() {
        let result = assemble_disaster_dataset(
            Period::new(1990, 1991),
            &types(),
            &[],
            &GeometData::default(),
            &[indicator("AAA", 1990, 1.0, None, Some(false))],
            &[],
            20e6,
        );
        assert!(matches!(result, Err(PipelineError::NoData(_))));
    }
}
