//! Pipeline Integration Tests
//!
//! Runs every step against a small synthetic data directory: six countries,
//! three products and five years of exports, EM-DAT events, GeoMet
//! intensities and World Bank / UN DESA indicators. Checks the files each
//! step hands to the next one.

use disaster_trade::analysis::frame::Frame;
use disaster_trade::analysis::panel::{self, REQUIRED_COLUMNS};
use disaster_trade::analysis::specs::Criterion;
use disaster_trade::cache;
use disaster_trade::config::PipelineConfig;
use disaster_trade::model::Period;
use disaster_trade::pipeline::Pipeline;
use disaster_trade::report;
use disaster_trade::verify::VerificationStatus;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

const PERIOD: Period = Period { start: 1990, end: 1994 };

/// (ISO, name, income group, population in thousands in 1990)
const COUNTRIES: &[(&str, &str, &str, f64)] = &[
    ("MLI", "Mali", "Low income", 8_000.0),
    ("PHL", "Philippines", "Lower middle income", 61_000.0),
    ("IND", "India", "Lower middle income", 870_000.0),
    ("BRA", "Brazil", "Upper middle income", 150_000.0),
    ("FRA", "France", "High income", 56_700.0),
    ("BEL", "Belgium", "High income", 9_950.0),
];

/// SITC2 codes: two agricultural, one manufactured.
const PRODUCTS: &[(&str, &str)] = &[("0", "Live animals"), ("4", "Oils and fats"), ("71", "Machinery")];

const TYPES: &[&str] = &["Earthquake", "Flood", "Storm", "Extreme temperature"];

fn years() -> impl Iterator<Item = i32> {
    PERIOD.start..=PERIOD.end
}

fn write_exports(dir: &Path) {
    let mut csv = String::from(
        "refYear,reporterISO,reporterDesc,classificationCode,classificationSearchCode,cmdCode,cmdDesc,fobvalue\n",
    );
    for (c, (iso, name, _, _)) in COUNTRIES.iter().enumerate() {
        for (p, (code, desc)) in PRODUCTS.iter().enumerate() {
            for year in years() {
                let wobble = ((c * 7 + p * 5 + year as usize * 13) % 11) as f64 / 10.0;
                let value = 1_000.0 * (c + 1) as f64 * (p + 2) as f64 * (1.0 + wobble);
                writeln!(csv, "{},{},{},S2,S2,{},{},{:.1}", year, iso, name, code, desc, value).unwrap();
            }
        }
    }
    // Obsolete countries never reach the datasets
    writeln!(csv, "1990,SUN,USSR,S2,S2,0,Live animals,5000.0").unwrap();
    fs::write(dir.join("1990-1994_exports_S2.csv"), csv).unwrap();
}

fn write_emdat(dir: &Path) {
    let mut csv = String::from("Dis No,ISO,Country,Start Year,Disaster Type,Total Deaths,Total Affected\n");
    let mut id = 0;
    for (c, (iso, name, _, _)) in COUNTRIES.iter().enumerate() {
        for year in years() {
            let n_events = (c * 3 + year as usize * 7) % 4;
            for k in 0..n_events {
                id += 1;
                let disaster_type = TYPES[(c + k + year as usize) % TYPES.len()];
                let deaths = 10 * (c + 1) * (k + 1) + (year as usize % 5) * 3;
                writeln!(csv, "{},{},{},{},{},{},{}", id, iso, name, year, disaster_type, deaths, deaths * 40).unwrap();
            }
        }
    }
    writeln!(csv, "{},PHL,Philippines,1991,Storm,1500,250000", id + 1).unwrap();
    writeln!(csv, "{},SUN,USSR,1990,Earthquake,2000,1000", id + 2).unwrap();
    fs::write(dir.join("emdat_1979_2000.csv"), csv).unwrap();
}

fn write_geomet(dir: &Path) {
    let mut csv = String::from("iso,year,killed_pop_eq,affected_pop_fld,damage_gdp_str\n");
    for (c, (iso, _, _, _)) in COUNTRIES.iter().enumerate() {
        for year in years() {
            let base = ((c * 5 + year as usize * 3) % 7) as f64;
            writeln!(csv, "{},{},{:.3},{:.3},{:.3}", iso, year, base * 0.01, base * 0.2, (6.0 - base) * 0.05).unwrap();
        }
    }
    fs::write(dir.join("geomet.csv"), csv).unwrap();
}

fn write_indicators(worldbank: &Path, undesa: &Path) {
    let mut income = String::from("Economy,Code,Income group\n");
    for (iso, name, group, _) in COUNTRIES {
        writeln!(income, "{},{},{}", name, iso, group).unwrap();
    }
    fs::write(worldbank.join("country_income_classification.csv"), income).unwrap();

    let mut population = String::from(
        "\"Region, subregion, country or area *\",ISO3 Alpha-code,Type,Year,\"Total Population, as of 1 January (thousands)\"\n",
    );
    for year in years() {
        writeln!(population, "World,,World,{},5300000", year).unwrap();
    }
    for (c, (iso, name, _, base)) in COUNTRIES.iter().enumerate() {
        for year in years() {
            let t = (year - PERIOD.start) as f64;
            let growth = 0.005 * (c + 1) as f64 + 0.002 * ((c + year as usize) % 3) as f64;
            writeln!(population, "{},{},Country/Area,{},{:.1}", name, iso, year, base * (1.0 + growth).powf(t)).unwrap();
        }
    }
    fs::write(undesa.join("total_population.csv"), population).unwrap();
}

fn fixture(root: &Path) -> PipelineConfig {
    let config = PipelineConfig {
        data_dir: root.join("data"),
        cache_dir: root.join("cache"),
        datasets_dir: root.join("datasets"),
        results_dir: root.join("results"),
        tables_dir: root.join("results/tables"),
        export_periods: vec![[PERIOD.start, PERIOD.end]],
        ..PipelineConfig::default()
    };
    config.ensure_directories().unwrap();
    for dir in [config.emdat_dir(), config.geomet_dir(), config.worldbank_dir(), config.undesa_dir()] {
        fs::create_dir_all(dir).unwrap();
    }
    write_exports(&config.exports_dir());
    write_emdat(&config.emdat_dir());
    write_geomet(&config.geomet_dir());
    write_indicators(&config.worldbank_dir(), &config.undesa_dir());
    config
}

#[test]
fn test_steps_hand_over_through_cache_and_files() {
    let root = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(fixture(root.path()));
    let config = pipeline.config().clone();

    // Step 1
    let exports = pipeline.collect_exports(false, false).unwrap();
    let rows = exports.get(PERIOD).unwrap();
    assert_eq!(rows.len(), COUNTRIES.len() * PRODUCTS.len() * 5);
    assert!(rows.iter().all(|r| r.iso != "SUN"));
    assert_eq!(rows.iter().filter(|r| r.is_agri).count(), COUNTRIES.len() * 2 * 5);
    assert!(pipeline.cache().contains(cache::EXPORTS_KEY));

    // Step 2
    let datasets = pipeline.collect_disasters(false).unwrap();
    assert_eq!(datasets.len(), 1);
    let disasters = &datasets[0];
    assert!(disasters.has_geomet);
    assert_eq!(disasters.rows.len(), COUNTRIES.len() * 5);
    let mali = disasters.rows.iter().find(|r| r.iso == "MLI").unwrap();
    assert!(mali.is_poor_country && mali.is_small_country);
    let france = disasters.rows.iter().find(|r| r.iso == "FRA").unwrap();
    assert!(!france.is_poor_country && !france.is_small_country);
    assert_eq!(france.population, 56_700_000.0);
    let storm = TYPES.iter().position(|t| *t == "Storm").unwrap();
    let phl_1991 = disasters.rows.iter().find(|r| r.iso == "PHL" && r.year == 1991).unwrap();
    assert!(phl_1991.by_type[storm].sig_abs1000);
    assert!(pipeline.cache().contains(&cache::key_for(cache::DISASTERS_KIND, PERIOD)));

    // Step 3
    let written = pipeline.build_panels().unwrap();
    assert_eq!(written.len(), 2);
    let frame = Frame::read(&panel::econometric_path(&config.datasets_dir, PERIOD)).unwrap();
    assert_eq!(frame.len(), COUNTRIES.len() * PRODUCTS.len() * 5);
    for column in REQUIRED_COLUMNS {
        assert!(frame.has_column(column), "missing {}", column);
    }
    assert!(frame.has_column("disaster_index"));
    let d_ln = frame.numeric("d_ln_exports").unwrap();
    assert_eq!(d_ln.iter().filter(|v| v.is_finite()).count(), COUNTRIES.len() * PRODUCTS.len() * 4);
    let country = Frame::read(&panel::country_path(&config.datasets_dir, PERIOD)).unwrap();
    assert_eq!(country.len(), COUNTRIES.len() * 5);

    // Step 4
    let outputs = pipeline.analyze().unwrap();
    for criterion in Criterion::ALL {
        let table1 = report::table_path(&config.tables_dir, 1, PERIOD, criterion);
        assert!(outputs.contains(&table1), "{} not written", table1.display());
        let tex = fs::read_to_string(&table1).unwrap();
        assert!(tex.contains("\\begin{tabular}"));
        assert!(tex.contains("Observations"));
        assert!(report::coefficients_path(&config.results_dir, PERIOD, criterion).exists());
    }

    let coefficients = Frame::read(&report::coefficients_path(&config.results_dir, PERIOD, Criterion::All)).unwrap();
    let terms = coefficients.text("term").unwrap();
    assert!(terms.iter().any(|t| t == "ln_total_occurrence"));
    assert!(terms.iter().any(|t| t == "d_ln_population"));
    let clusters = coefficients.numeric("n_clusters").unwrap();
    assert!(clusters.iter().all(|g| *g == COUNTRIES.len() as f64));

    // Verification
    let (report, path) = pipeline.verify().unwrap();
    assert!(path.exists());
    assert!(
        report
            .dataset_results
            .iter()
            .all(|d| d.status == VerificationStatus::Success && d.obsolete_countries.is_empty())
    );
    assert!(report.table_results.iter().all(|t| t.status == VerificationStatus::Success));
    assert_eq!(report.coverage_results[0].agri_rows, COUNTRIES.len() * 2 * 5);
}

#[test]
fn test_run_succeeds_and_reuses_cache() {
    let root = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(fixture(root.path()));

    let first = pipeline.run(false, false);
    for step in &first.steps {
        println!("{}: {:?}", step.name, step.error);
    }
    assert_eq!(first.successful_steps(), 4);
    assert!(first.succeeded());

    // Source files gone: cached steps still succeed, the panel is rebuilt
    // from the cache alone.
    fs::remove_dir_all(pipeline.config().exports_dir()).unwrap();
    fs::remove_dir_all(pipeline.config().emdat_dir()).unwrap();
    let second = pipeline.run(false, false);
    assert_eq!(second.successful_steps(), 4);

    // Forcing a refresh without export extracts fails the export step and
    // the panel step that needs its cache.
    let forced = pipeline.run(true, false);
    assert!(forced.steps[0].error.is_some());
    assert!(forced.steps[2].error.is_some());
    assert!(!forced.succeeded());
}

#[test]
fn test_missing_world_bank_coverage_stops_disaster_step() {
    let root = tempfile::tempdir().unwrap();
    let config = fixture(root.path());
    fs::write(
        config.worldbank_dir().join("country_income_classification.csv"),
        "Economy,Code,Income group\nFrance,FRA,High income\n",
    )
    .unwrap();
    let pipeline = Pipeline::new(config);
    pipeline.collect_exports(false, false).unwrap();
    assert!(pipeline.collect_disasters(false).is_err());
}
