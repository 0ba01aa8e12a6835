/// Step orchestration: exports, disasters, panel, analysis and the full run.
///
/// Steps communicate only through the cache and the files they write, so
/// each can be run on its own from the command line.

use crate::analysis::disasters;
use crate::analysis::frame::Frame;
use crate::analysis::panel;
use crate::analysis::specs::{self, Criterion, PreparedData, TABLE_NUMBERS};
use crate::cache::{self, Cache, CacheInfo};
use crate::config::PipelineConfig;
use crate::countries::IsoFilter;
use crate::ingest::comtrade::{self, ComtradeClient};
use crate::logging::{self, DataSource};
use crate::model::{DisasterDataset, ExportsByPeriod, PipelineError, Result};
use crate::report;
use crate::verify::{self, VerificationReport};
use serde_json::json;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Share of steps that must succeed for `run` to succeed.
pub const SUCCESS_RATIO: f64 = 0.75;

pub struct Pipeline {
    config: PipelineConfig,
    cache: Cache,
}

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub name: &'static str,
    pub error: Option<String>,
    pub duration: Duration,
    pub outputs: Vec<PathBuf>,
}

impl StepOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub steps: Vec<StepOutcome>,
    pub duration: Duration,
}

impl RunSummary {
    pub fn successful_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.succeeded()).count()
    }

    pub fn success_rate(&self) -> f64 {
        if self.steps.is_empty() {
            0.0
        } else {
            self.successful_steps() as f64 / self.steps.len() as f64
        }
    }

    pub fn succeeded(&self) -> bool {
        self.success_rate() >= SUCCESS_RATIO
    }

    pub fn generated_files(&self) -> Vec<&PathBuf> {
        self.steps.iter().flat_map(|s| s.outputs.iter()).collect()
    }
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let cache = Cache::new(config.cache_dir.clone());
        Self { config, cache }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    // ------------------------------------------------------------------
    // Step 1: exports
    // ------------------------------------------------------------------

    fn download_missing_years(&self) -> Result<()> {
        let api_key = PipelineConfig::comtrade_api_key();
        if api_key.is_none() {
            logging::warn(
                DataSource::Comtrade,
                None,
                "COMTRADE_API_KEY not set, using the rate-limited preview endpoint",
            );
        }
        let client = ComtradeClient::new(&self.config.comtrade, api_key)?;
        for period in self.config.periods() {
            let summary = comtrade::fetch_missing_years(&client, &self.config.exports_dir(), period)?;
            if summary.quota_exceeded {
                break;
            }
        }
        Ok(())
    }

    /// Loads every configured period from local extracts (downloading the
    /// missing years first when asked) and caches the result.
    pub fn collect_exports(&self, clear_cache: bool, fetch_missing: bool) -> Result<ExportsByPeriod> {
        let periods = self.config.periods();
        if clear_cache {
            self.cache.remove(cache::EXPORTS_KEY)?;
        } else if self.config.use_cache {
            if let Some(entry) = self.cache.load::<ExportsByPeriod>(cache::EXPORTS_KEY) {
                if periods.iter().all(|p| entry.value.get(*p).is_some()) {
                    logging::info(DataSource::Cache, Some(cache::EXPORTS_KEY), "using cached exports");
                    for (period, rows) in &entry.value.periods {
                        comtrade::log_export_summary(*period, &comtrade::summarize_exports(rows));
                    }
                    return Ok(entry.value);
                }
                logging::info(
                    DataSource::Cache,
                    Some(cache::EXPORTS_KEY),
                    "cached exports do not cover every period, reloading",
                );
            }
        }

        if fetch_missing && self.config.comtrade.use_api {
            if let Err(err) = self.download_missing_years() {
                logging::error(DataSource::Comtrade, None, &format!("download failed: {}", err));
            }
        }

        let iso_filter = IsoFilter::new(&self.config.excluded_iso_codes);
        let mut exports = ExportsByPeriod::default();
        let mut failed = 0;
        for period in &periods {
            match comtrade::load_exports(&self.config.exports_dir(), *period, &iso_filter) {
                Ok(rows) => {
                    comtrade::log_export_summary(*period, &comtrade::summarize_exports(&rows));
                    exports.periods.push((*period, rows));
                }
                Err(err) => {
                    logging::error(DataSource::Exports, Some(&period.to_string()), &err.to_string());
                    failed += 1;
                }
            }
        }
        logging::log_step_summary(DataSource::Exports, periods.len(), exports.periods.len(), failed);
        if exports.periods.is_empty() {
            return Err(PipelineError::NoData("no export data for any period".to_string()));
        }

        let parameters = json!({
            "periods": periods,
            "excluded_iso_codes": self.config.excluded_iso_codes,
        });
        self.cache.store(cache::EXPORTS_KEY, parameters, &exports)?;
        Ok(exports)
    }

    // ------------------------------------------------------------------
    // Step 2: disasters
    // ------------------------------------------------------------------

    pub fn collect_disasters(&self, clear_cache: bool) -> Result<Vec<DisasterDataset>> {
        let periods = self.config.periods();
        let mut datasets = Vec::new();
        for period in &periods {
            match disasters::create_disaster_dataset(&self.config, &self.cache, *period, clear_cache) {
                Ok(dataset) => datasets.push(dataset),
                Err(err) => logging::error(DataSource::Panel, Some(&period.to_string()), &err.to_string()),
            }
        }
        logging::log_step_summary(DataSource::Panel, periods.len(), datasets.len(), periods.len() - datasets.len());
        if datasets.is_empty() {
            return Err(PipelineError::NoData("no disaster dataset for any period".to_string()));
        }
        Ok(datasets)
    }

    // ------------------------------------------------------------------
    // Step 3: panel
    // ------------------------------------------------------------------

    pub fn build_panels(&self) -> Result<Vec<PathBuf>> {
        let periods = self.config.periods();
        let mut written = Vec::new();
        let mut failed = 0;
        for period in &periods {
            match panel::build_panel_datasets(&self.config, &self.cache, *period) {
                Ok((econometric, country)) => {
                    written.push(econometric);
                    written.push(country);
                }
                Err(err) => {
                    logging::error(DataSource::Panel, Some(&period.to_string()), &err.to_string());
                    failed += 1;
                }
            }
        }
        logging::log_step_summary(DataSource::Panel, periods.len(), periods.len() - failed, failed);
        if written.is_empty() {
            return Err(PipelineError::NoData("no econometric dataset written".to_string()));
        }
        Ok(written)
    }

    // ------------------------------------------------------------------
    // Step 4: analysis
    // ------------------------------------------------------------------

    /// Estimates every table for every period and criterion found on disk.
    pub fn analyze(&self) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        for period in self.config.periods() {
            let context = period.to_string();
            let path = panel::econometric_path(&self.config.datasets_dir, period);
            let frame = match Frame::read(&path) {
                Ok(frame) => frame,
                Err(err) => {
                    logging::error(DataSource::Regression, Some(&context), &err.to_string());
                    continue;
                }
            };
            let data = match PreparedData::from_frame(&frame) {
                Ok(data) => data,
                Err(err) => {
                    logging::error(DataSource::Regression, Some(&context), &err.to_string());
                    continue;
                }
            };
            logging::info(
                DataSource::Regression,
                Some(&context),
                &format!("{} observations loaded from {}", frame.len(), path.display()),
            );

            for criterion in Criterion::ALL {
                let missing: Vec<&str> = specs::required_columns(criterion)
                    .into_iter()
                    .filter(|c| !frame.has_column(c))
                    .collect();
                if !missing.is_empty() {
                    logging::error(
                        DataSource::Regression,
                        Some(&context),
                        &format!("{} criterion skipped, missing columns {:?}", criterion, missing),
                    );
                    continue;
                }
                let tables: Vec<_> = TABLE_NUMBERS
                    .iter()
                    .map(|n| specs::estimate_table(&frame, &data, period, criterion, *n))
                    .filter(|t| !t.columns.is_empty())
                    .collect();
                for table in &tables {
                    written.push(report::write_table(&self.config.tables_dir, table)?);
                }
                if !tables.is_empty() {
                    written.push(report::write_coefficients(&self.config.results_dir, period, criterion, &tables)?);
                }
            }
        }
        if written.is_empty() {
            return Err(PipelineError::NoData("no table could be estimated".to_string()));
        }
        Ok(written)
    }

    // ------------------------------------------------------------------
    // Verification and cache
    // ------------------------------------------------------------------

    pub fn verify(&self) -> Result<(VerificationReport, PathBuf)> {
        let report = verify::run_verification(&self.config);
        let path = verify::write_report(&report, &self.config.results_dir)?;
        Ok((report, path))
    }

    pub fn list_cache(&self) -> Result<Vec<CacheInfo>> {
        self.cache.list()
    }

    pub fn clear_cache(&self) -> Result<usize> {
        self.cache.clear()
    }

    // ------------------------------------------------------------------
    // Full run
    // ------------------------------------------------------------------

    fn step<F>(name: &'static str, f: F) -> StepOutcome
    where
        F: FnOnce() -> Result<Vec<PathBuf>>,
    {
        logging::info(DataSource::System, Some(name), "starting");
        let started = Instant::now();
        let result = f();
        let duration = started.elapsed();
        match result {
            Ok(outputs) => {
                logging::info(
                    DataSource::System,
                    Some(name),
                    &format!("done in {:.1}s", duration.as_secs_f64()),
                );
                StepOutcome {
                    name,
                    error: None,
                    duration,
                    outputs,
                }
            }
            Err(err) => {
                logging::error(DataSource::System, Some(name), &format!("failed: {}", err));
                StepOutcome {
                    name,
                    error: Some(err.to_string()),
                    duration,
                    outputs: Vec::new(),
                }
            }
        }
    }

    /// Runs the four steps in order. A failing step does not stop the run.
    pub fn run(&self, force_refresh: bool, fetch_missing: bool) -> RunSummary {
        let started = Instant::now();
        let clear = force_refresh || self.config.clear_cache;
        let steps = vec![
            Self::step("exports", || self.collect_exports(clear, fetch_missing).map(|_| Vec::new())),
            Self::step("disasters", || self.collect_disasters(clear).map(|_| Vec::new())),
            Self::step("panel", || self.build_panels()),
            Self::step("analyze", || self.analyze()),
        ];
        let summary = RunSummary {
            steps,
            duration: started.elapsed(),
        };
        logging::log_step_summary(
            DataSource::System,
            summary.steps.len(),
            summary.successful_steps(),
            summary.steps.len() - summary.successful_steps(),
        );
        summary
    }
}
