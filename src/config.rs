/// Pipeline configuration loaded from `pipeline.toml`.
///
/// Every field has a default, so a missing or empty file yields the
/// reference methodology: two study periods, the four disaster types of the
/// reference article, and the standard list of obsolete countries.

use crate::countries::DEFAULT_EXCLUDED_ISO_CODES;
use crate::logging::{self, DataSource, LogLevel};
use crate::model::{Period, PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable holding the Comtrade subscription key.
pub const COMTRADE_KEY_ENV: &str = "COMTRADE_API_KEY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub datasets_dir: PathBuf,
    pub results_dir: PathBuf,
    pub tables_dir: PathBuf,
    pub log_level: String,
    pub log_file: Option<String>,
    pub clear_cache: bool,
    pub use_cache: bool,
    pub export_periods: Vec<[i32; 2]>,
    pub excluded_iso_codes: Vec<String>,
    pub disaster_types: Vec<String>,
    /// Countries below this population (persons) are "small".
    pub small_country_threshold: f64,
    /// Reference year for poor/small country counts in summaries.
    pub poor_country_year: i32,
    pub comtrade: ComtradeConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComtradeConfig {
    pub use_api: bool,
    pub breakdown_mode: String,
    pub max_records: usize,
    pub probe_records: usize,
    pub first_chapter: u32,
    pub last_chapter: u32,
    pub timeout_secs: u64,
}

impl Default for ComtradeConfig {
    fn default() -> Self {
        Self {
            use_api: true,
            breakdown_mode: "plus".to_string(),
            max_records: 5000,
            probe_records: 100,
            first_chapter: 1,
            last_chapter: 99,
            timeout_secs: 60,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            cache_dir: PathBuf::from("cache"),
            datasets_dir: PathBuf::from("datasets"),
            results_dir: PathBuf::from("results"),
            tables_dir: PathBuf::from("results/tables"),
            log_level: "info".to_string(),
            log_file: None,
            clear_cache: false,
            use_cache: true,
            export_periods: vec![[1979, 2000], [2000, 2024]],
            excluded_iso_codes: DEFAULT_EXCLUDED_ISO_CODES
                .iter()
                .map(|c| c.to_string())
                .collect(),
            disaster_types: vec![
                "Earthquake".to_string(),
                "Flood".to_string(),
                "Storm".to_string(),
                "Extreme temperature".to_string(),
            ],
            small_country_threshold: 20_000_000.0,
            poor_country_year: 2016,
            comtrade: ComtradeConfig::default(),
        }
    }
}

/// Where the effective configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    /// The file was missing and defaults are in use.
    Defaults(PathBuf),
}

impl ConfigSource {
    /// Report the source once the logger is initialized.
    pub fn log(&self) {
        match self {
            ConfigSource::File(path) => logging::info(
                DataSource::System,
                Some("config"),
                &format!("loaded {}", path.display()),
            ),
            ConfigSource::Defaults(path) => logging::warn(
                DataSource::System,
                Some("config"),
                &format!("{} not found, using default configuration", path.display()),
            ),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file.
    ///
    /// A missing file is not an error: defaults are returned with
    /// `ConfigSource::Defaults`. A file that exists but does not parse is an
    /// error. `log_level` overrides the file's level before validation.
    pub fn load(path: &Path, log_level: Option<&str>) -> Result<(Self, ConfigSource)> {
        let (mut config, source) = if path.exists() {
            let content = fs::read_to_string(path)?;
            let config: PipelineConfig = toml::from_str(&content)?;
            (config, ConfigSource::File(path.to_path_buf()))
        } else {
            (Self::default(), ConfigSource::Defaults(path.to_path_buf()))
        };

        if let Some(level) = log_level {
            config.log_level = level.to_string();
        }
        config.validate()?;
        Ok((config, source))
    }

    pub fn validate(&self) -> Result<()> {
        if self.export_periods.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "export_periods must not be empty".to_string(),
            ));
        }
        for [start, end] in &self.export_periods {
            if start > end {
                return Err(PipelineError::InvalidConfig(format!(
                    "export period {}-{} ends before it starts",
                    start, end
                )));
            }
        }
        if self.disaster_types.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "disaster_types must not be empty".to_string(),
            ));
        }
        if !(self.small_country_threshold > 0.0) {
            return Err(PipelineError::InvalidConfig(
                "small_country_threshold must be positive".to_string(),
            ));
        }
        if self.comtrade.max_records == 0 {
            return Err(PipelineError::InvalidConfig(
                "comtrade.max_records must be greater than zero".to_string(),
            ));
        }
        if self.comtrade.first_chapter == 0
            || self.comtrade.first_chapter > self.comtrade.last_chapter
            || self.comtrade.last_chapter > 99
        {
            return Err(PipelineError::InvalidConfig(format!(
                "comtrade chapters {}..{} must satisfy 1 <= first <= last <= 99",
                self.comtrade.first_chapter, self.comtrade.last_chapter
            )));
        }
        self.min_log_level()
            .map_err(PipelineError::InvalidConfig)?;
        Ok(())
    }

    pub fn periods(&self) -> Vec<Period> {
        self.export_periods
            .iter()
            .map(|[start, end]| Period::new(*start, *end))
            .collect()
    }

    pub fn min_log_level(&self) -> std::result::Result<LogLevel, String> {
        self.log_level.parse()
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.data_dir.join("exports")
    }

    pub fn emdat_dir(&self) -> PathBuf {
        self.data_dir.join("emdat")
    }

    pub fn geomet_dir(&self) -> PathBuf {
        self.data_dir.join("geomet")
    }

    pub fn worldbank_dir(&self) -> PathBuf {
        self.data_dir.join("world_bank")
    }

    pub fn undesa_dir(&self) -> PathBuf {
        self.data_dir.join("undesa")
    }

    /// Create every directory the pipeline writes into.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            self.cache_dir.clone(),
            self.exports_dir(),
            self.datasets_dir.clone(),
            self.results_dir.clone(),
            self.tables_dir.clone(),
        ] {
            fs::create_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Comtrade subscription key from the environment (after `.env` loading).
    pub fn comtrade_api_key() -> Option<String> {
        std::env::var(COMTRADE_KEY_ENV)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }

    /// Log the effective configuration at startup.
    pub fn log_summary(&self) {
        let lines = [
            format!("use_cache: {}", self.use_cache),
            format!("clear_cache: {}", self.clear_cache),
            format!("data_dir: {}", self.data_dir.display()),
            format!("cache_dir: {}", self.cache_dir.display()),
            format!("datasets_dir: {}", self.datasets_dir.display()),
            format!("results_dir: {}", self.results_dir.display()),
            format!("tables_dir: {}", self.tables_dir.display()),
            format!(
                "periods: {}",
                self.periods()
                    .iter()
                    .map(|p| p.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            format!("disaster types: {}", self.disaster_types.join(", ")),
            format!(
                "excluded ISO codes ({}): {}",
                self.excluded_iso_codes.len(),
                self.excluded_iso_codes.join(", ")
            ),
        ];
        for line in &lines {
            logging::info(DataSource::System, Some("config"), line);
        }
    }
}
