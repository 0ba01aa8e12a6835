/// UN Comtrade export data: local extracts and API client
///
/// Annual exports of every reporter to the world (partner `0`), by HS
/// chapter, are downloaded once and saved as CSV extracts under
/// `data/exports/`. Subsequent runs read the extracts only; the API is
/// queried just for years that no local file covers.
///
/// API Documentation: https://comtradedeveloper.un.org/
/// Public preview endpoint: https://comtradeapi.un.org/public/v1/preview/C/A/HS

use crate::config::ComtradeConfig;
use crate::countries::IsoFilter;
use crate::ingest::coverage::{self, year_span};
use crate::logging::{self, DataSource, FailureType};
use crate::model::{ExportRecord, Period, PipelineError, Result};
use crate::products::{self, Classification};
use crate::table::{self, Table, cell};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const COMTRADE_PREVIEW_URL: &str = "https://comtradeapi.un.org/public/v1/preview/C/A/HS";
const COMTRADE_DATA_URL: &str = "https://comtradeapi.un.org/data/v1/get/C/A/HS";
const SUBSCRIPTION_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Columns every extract must provide, in their harmonized names.
pub const KEY_COLUMNS: &[&str] = &[
    "Year",
    "Country",
    "ISO",
    "classificationCode",
    "classificationSearchCode",
    "cmdCode",
    "fobvalue",
];

// ============================================================================
// Comtrade API Response Structures
// ============================================================================

/// Envelope returned by both the preview and the authenticated endpoints.
#[derive(Debug, Deserialize)]
pub struct ComtradeResponse {
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub data: Vec<ComtradeRow>,
    #[serde(default)]
    pub error: Option<String>,
}

/// One record as returned by the API and as written to extract files.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ComtradeRow {
    #[serde(rename = "refYear")]
    pub ref_year: i32,
    #[serde(rename = "reporterISO", default)]
    pub reporter_iso: Option<String>,
    #[serde(rename = "reporterDesc", default)]
    pub reporter_desc: Option<String>,
    #[serde(rename = "classificationCode", default)]
    pub classification_code: Option<String>,
    #[serde(rename = "classificationSearchCode", default)]
    pub classification_search_code: Option<String>,
    #[serde(rename = "cmdCode")]
    pub cmd_code: String,
    #[serde(rename = "cmdDesc", default)]
    pub cmd_desc: Option<String>,
    #[serde(rename = "flowCode", default)]
    pub flow_code: Option<String>,
    #[serde(default)]
    pub fobvalue: Option<f64>,
}

/// Parses an API body, surfacing quota errors reported inside a 200 response.
pub fn parse_response(body: &str) -> Result<Vec<ComtradeRow>> {
    let response: ComtradeResponse = serde_json::from_str(body)?;
    if let Some(message) = response.error.as_deref().filter(|m| !m.trim().is_empty()) {
        if logging::is_quota_message(message) {
            return Err(PipelineError::QuotaExceeded(message.to_string()));
        }
        return Err(PipelineError::NoData(message.to_string()));
    }
    Ok(response.data)
}

// ============================================================================
// API Client
// ============================================================================

pub struct ComtradeClient {
    http: reqwest::blocking::Client,
    api_key: Option<String>,
    breakdown_mode: String,
    max_records: usize,
    probe_records: usize,
    chapters: std::ops::RangeInclusive<u32>,
}

impl ComtradeClient {
    pub fn new(config: &ComtradeConfig, api_key: Option<String>) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            api_key,
            breakdown_mode: config.breakdown_mode.clone(),
            max_records: config.max_records,
            probe_records: config.probe_records,
            chapters: config.first_chapter..=config.last_chapter,
        })
    }

    pub fn breakdown_mode(&self) -> &str {
        &self.breakdown_mode
    }

    /// Builds a request URL for annual HS exports to the world.
    ///
    /// `cmd_code = None` requests all commodities (used for probing).
    pub fn build_url(&self, year: i32, cmd_code: Option<&str>, max_records: usize) -> String {
        let base = if self.api_key.is_some() {
            COMTRADE_DATA_URL
        } else {
            COMTRADE_PREVIEW_URL
        };
        let mut url = format!(
            "{}?period={}&flowCode=X&partnerCode=0&maxRecords={}&format=JSON&breakdownMode={}&includeDesc=true",
            base, year, max_records, self.breakdown_mode
        );
        if let Some(code) = cmd_code {
            url.push_str(&format!("&cmdCode={}", code));
        }
        url
    }

    fn request(&self, url: &str) -> Result<Vec<ComtradeRow>> {
        let mut request = self.http.get(url).header("Accept", "application/json");
        if let Some(key) = &self.api_key {
            request = request.header(SUBSCRIPTION_HEADER, key);
        }
        let response = request.send()?;
        let status = response.status();
        if status.as_u16() == 403 || status.as_u16() == 429 {
            return Err(PipelineError::QuotaExceeded(format!("HTTP {}", status.as_u16())));
        }
        if !status.is_success() {
            return Err(PipelineError::HttpStatus(status.as_u16()));
        }
        let body = response.text()?;
        parse_response(&body)
    }

    /// Quick probe: does Comtrade publish anything for `year`?
    ///
    /// Quota exhaustion is propagated; other failures count as "no data".
    pub fn check_year_has_data(&self, year: i32) -> Result<bool> {
        let url = self.build_url(year, None, self.probe_records);
        let context = year.to_string();
        match self.request(&url) {
            Ok(rows) if !rows.is_empty() => {
                logging::debug(
                    DataSource::Comtrade,
                    Some(&context),
                    &format!("data available ({} probe records)", rows.len()),
                );
                Ok(true)
            }
            Ok(_) => {
                logging::warn(DataSource::Comtrade, Some(&context), "no data available");
                Ok(false)
            }
            Err(err @ PipelineError::QuotaExceeded(_)) => Err(err),
            Err(err) => {
                logging::log_comtrade_failure(&context, "probe", &err);
                Ok(false)
            }
        }
    }

    /// Downloads every configured HS chapter for one year.
    ///
    /// Chunks that hit `max_records` are truncated by the API and skipped.
    /// On quota exhaustion the rows gathered so far are returned with
    /// `quota_exceeded = true`.
    pub fn fetch_year(&self, year: i32) -> YearFetch {
        let mut fetch = YearFetch::default();
        for chapter in self.chapters.clone() {
            let code = products::chapter_code(chapter);
            let context = format!("{}/{}", year, code);
            let url = self.build_url(year, Some(&code), self.max_records);
            match self.request(&url) {
                Ok(rows) if rows.is_empty() => continue,
                Ok(rows) if rows.len() >= self.max_records => {
                    logging::warn(
                        DataSource::Comtrade,
                        Some(&context),
                        &format!("max records reached ({}), chunk skipped", self.max_records),
                    );
                }
                Ok(rows) => fetch.rows.extend(rows),
                Err(err) => {
                    if logging::log_comtrade_failure(&context, "download", &err)
                        == FailureType::QuotaExceeded
                    {
                        fetch.quota_exceeded = true;
                        break;
                    }
                }
            }
        }
        fetch
    }
}

#[derive(Debug, Default)]
pub struct YearFetch {
    pub rows: Vec<ComtradeRow>,
    pub quota_exceeded: bool,
}

/// Outcome of `fetch_missing_years`.
#[derive(Debug, Default, PartialEq)]
pub struct FetchSummary {
    pub downloaded: Vec<i32>,
    pub skipped: Vec<i32>,
    pub rows: usize,
    pub quota_exceeded: bool,
}

/// Writes API rows as a `<year>_exports_<mode>.csv` extract.
pub fn write_extract(path: &Path, rows: &[ComtradeRow]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn extract_path(dir: &Path, year: i32, breakdown_mode: &str) -> PathBuf {
    dir.join(format!("{}_exports_{}.csv", year, breakdown_mode))
}

/// Downloads the years of `period` that no local extract covers.
///
/// Existing files are never overwritten. Downloading stops at the first
/// quota error; whatever was saved until then stays on disk.
pub fn fetch_missing_years(
    client: &ComtradeClient,
    dir: &Path,
    period: Period,
) -> Result<FetchSummary> {
    std::fs::create_dir_all(dir)?;
    let started = Instant::now();
    let files = coverage::scan_export_files(dir)?;
    let (_, covered) = coverage::select_files(&files, period);
    let missing = coverage::missing_years(&covered, period);
    let mut summary = FetchSummary::default();
    let context = period.to_string();

    if missing.is_empty() {
        logging::debug(DataSource::Comtrade, Some(&context), "no missing years");
        return Ok(summary);
    }
    logging::info(
        DataSource::Comtrade,
        Some(&context),
        &format!("years to download: {:?}", missing),
    );

    for year in missing {
        let path = extract_path(dir, year, client.breakdown_mode());
        if path.exists() {
            summary.skipped.push(year);
            continue;
        }
        match client.check_year_has_data(year) {
            Ok(true) => {}
            Ok(false) => {
                summary.skipped.push(year);
                continue;
            }
            Err(_) => {
                summary.quota_exceeded = true;
                break;
            }
        }

        logging::info(DataSource::Comtrade, Some(&year.to_string()), "downloading");
        let fetch = client.fetch_year(year);
        if fetch.rows.is_empty() {
            summary.skipped.push(year);
        } else if fetch.quota_exceeded {
            // A partial year would later be mistaken for full coverage.
            summary.skipped.push(year);
        } else {
            write_extract(&path, &fetch.rows)?;
            logging::info(
                DataSource::Comtrade,
                Some(&year.to_string()),
                &format!("{} records saved to {}", fetch.rows.len(), path.display()),
            );
            summary.rows += fetch.rows.len();
            summary.downloaded.push(year);
        }
        if fetch.quota_exceeded {
            summary.quota_exceeded = true;
            break;
        }
    }

    if summary.quota_exceeded {
        logging::warn(
            DataSource::Comtrade,
            Some(&context),
            "INCOMPLETE DATA - API quota exhausted",
        );
    }
    logging::info(
        DataSource::Comtrade,
        Some(&context),
        &format!(
            "downloaded {:?}, skipped {:?} in {:.2} min",
            summary.downloaded,
            summary.skipped,
            started.elapsed().as_secs_f64() / 60.0
        ),
    );
    Ok(summary)
}

// ============================================================================
// Local Extracts
// ============================================================================

/// Header aliases: raw Comtrade name first, harmonized name second.
fn column(table: &Table, raw: &str, harmonized: &str) -> Option<usize> {
    table.index_any(&[raw, harmonized])
}

/// Parses one extract into export records for `period`.
///
/// Rows with a missing key value, a non-positive `fobvalue`, a year
/// outside the period, or an invalid/excluded ISO code are dropped.
pub fn parse_extract(
    table: &Table,
    period: Period,
    iso_filter: &IsoFilter,
    source: &str,
) -> Result<Vec<ExportRecord>> {
    let lookups = [
        ("refYear", "Year"),
        ("reporterDesc", "Country"),
        ("reporterISO", "ISO"),
        ("classificationCode", "classificationCode"),
        ("classificationSearchCode", "classificationSearchCode"),
        ("cmdCode", "cmdCode"),
        ("fobvalue", "fobvalue"),
    ];
    let mut idx = Vec::with_capacity(lookups.len());
    let mut missing = Vec::new();
    for ((raw, harmonized), key) in lookups.iter().zip(KEY_COLUMNS) {
        match column(table, raw, harmonized) {
            Some(i) => idx.push(i),
            None => missing.push(key.to_string()),
        }
    }
    if !missing.is_empty() {
        return Err(PipelineError::MissingColumns {
            dataset: source.to_string(),
            columns: missing,
        });
    }

    let mut records = Vec::with_capacity(table.len());
    let mut unknown_classifications = 0usize;
    for row in &table.rows {
        let text: Vec<&str> = idx.iter().map(|&i| cell(row, i).trim()).collect();
        if text.iter().any(|t| t.is_empty()) {
            continue;
        }
        let Some(year) = table::parse_year(text[0]) else {
            continue;
        };
        if !period.contains(year) {
            continue;
        }
        let Some(iso) = iso_filter.accept(text[2]) else {
            continue;
        };
        let Some(fobvalue) = table::parse_number(text[6]).filter(|v| *v > 0.0) else {
            continue;
        };
        let classification = Classification::from_search_code(text[4]);
        let is_agri = match products::is_agricultural(classification, text[5]) {
            Some(flag) => flag,
            None => {
                unknown_classifications += 1;
                false
            }
        };
        records.push(ExportRecord {
            year,
            iso,
            country: text[1].to_string(),
            classification_code: text[3].to_string(),
            classification_search_code: text[4].to_string(),
            cmd_code: text[5].to_string(),
            is_agri,
            fobvalue,
        });
    }

    if unknown_classifications > 0 {
        logging::warn(
            DataSource::Exports,
            Some(source),
            &format!(
                "{} rows with unexpected classification or code counted as non-agricultural",
                unknown_classifications
            ),
        );
    }
    Ok(records)
}

/// Loads every local extract overlapping `period`.
pub fn load_exports(dir: &Path, period: Period, iso_filter: &IsoFilter) -> Result<Vec<ExportRecord>> {
    let context = period.to_string();
    let files = coverage::scan_export_files(dir)?;
    for (path, years) in &files {
        logging::trace(
            DataSource::Exports,
            Some(&context),
            &format!(
                "{} -> {}",
                path.display(),
                year_span(&years.iter().copied().collect::<BTreeSet<_>>())
            ),
        );
    }
    let (selected, covered) = coverage::select_files(&files, period);
    let missing = coverage::missing_years(&covered, period);
    logging::debug(
        DataSource::Exports,
        Some(&context),
        &format!("{} files selected, years covered: {}", selected.len(), year_span(&covered)),
    );
    if !missing.is_empty() {
        logging::warn(
            DataSource::Exports,
            Some(&context),
            &format!("missing years: {:?}", missing),
        );
    }
    if selected.is_empty() {
        return Err(PipelineError::NoData(format!("no export extracts for {}", period)));
    }

    let mut records = Vec::new();
    for path in &selected {
        let name = path.display().to_string();
        let parsed = Table::read(path).and_then(|table| parse_extract(&table, period, iso_filter, &name));
        match parsed {
            Ok(rows) => {
                logging::trace(
                    DataSource::Exports,
                    Some(&context),
                    &format!("loaded {} ({} rows)", name, rows.len()),
                );
                records.extend(rows);
            }
            Err(err) => logging::warn(
                DataSource::Exports,
                Some(&context),
                &format!("could not read {}: {}", name, err),
            ),
        }
    }

    if records.is_empty() {
        return Err(PipelineError::NoData(format!("no valid export rows for {}", period)));
    }
    records.sort_by(|a, b| (a.year, &a.country, &a.cmd_code).cmp(&(b.year, &b.country, &b.cmd_code)));
    Ok(records)
}

// ============================================================================
// Summaries
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ExportSummary {
    pub observations: usize,
    pub first_year: Option<i32>,
    pub last_year: Option<i32>,
    pub countries: usize,
    pub products: usize,
    pub agricultural: usize,
}

impl ExportSummary {
    pub fn agri_share_pct(&self) -> f64 {
        if self.observations == 0 {
            0.0
        } else {
            self.agricultural as f64 / self.observations as f64 * 100.0
        }
    }
}

pub fn summarize_exports(records: &[ExportRecord]) -> ExportSummary {
    let countries: HashSet<&str> = records.iter().map(|r| r.iso.as_str()).collect();
    let products: HashSet<&str> = records.iter().map(|r| r.cmd_code.as_str()).collect();
    ExportSummary {
        observations: records.len(),
        first_year: records.iter().map(|r| r.year).min(),
        last_year: records.iter().map(|r| r.year).max(),
        countries: countries.len(),
        products: products.len(),
        agricultural: records.iter().filter(|r| r.is_agri).count(),
    }
}

pub fn log_export_summary(period: Period, summary: &ExportSummary) {
    let context = period.to_string();
    let years = match (summary.first_year, summary.last_year) {
        (Some(first), Some(last)) => format!("{}-{}", first, last),
        _ => "N/A".to_string(),
    };
    logging::info(
        DataSource::Exports,
        Some(&context),
        &format!(
            "{} obs, years {}, {} countries, {} products, agricultural {} ({:.1}%)",
            summary.observations,
            years,
            summary.countries,
            summary.products,
            summary.agricultural,
            summary.agri_share_pct()
        ),
    );
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::countries::DEFAULT_EXCLUDED_ISO_CODES;

    fn filter() -> IsoFilter {
        IsoFilter::new(DEFAULT_EXCLUDED_ISO_CODES)
    }

    const RAW_EXTRACT: &str = "\
refYear,reporterISO,reporterDesc,classificationCode,classificationSearchCode,cmdCode,cmdDesc,fobvalue
1990,FRA,France,S2,S2,0,Live animals,1000.0
1990,FRA,France,S2,S2,71,Machinery,5000.0
1990,DDR,German Democratic Republic,S2,S2,0,Live animals,300.0
1990,deu,Germany,S2,S2,0,Live animals,0
1991,DEU,Germany,S2,S2,4,Cereals,
1995,DEU,Germany,S2,S2,4,Cereals,250.0
2001,DEU,Germany,H1,HS,10,Cereals,250.0
";

    #[test]
    fn test_extract_rows_are_cleaned_and_labelled() {
        let table = Table::parse(RAW_EXTRACT).unwrap();
        let rows = parse_extract(&table, Period::new(1979, 2000), &filter(), "test").unwrap();

        // DDR excluded, zero fobvalue dropped, blank fobvalue dropped, 2001 out of period
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.iso != "DDR"));
        let machinery = rows.iter().find(|r| r.cmd_code == "71").unwrap();
        assert!(!machinery.is_agri);
        let animals = rows.iter().find(|r| r.cmd_code == "0").unwrap();
        assert!(animals.is_agri);
        assert_eq!(animals.country, "France");
    }

    #[test]
    fn test_harmonized_headers_are_accepted() {
        let table = Table::parse(
            "Year,ISO,Country,classificationCode,classificationSearchCode,cmdCode,fobvalue\n\
             2005,BRA,Brazil,H2,HS,09,1200\n",
        )
        .unwrap();
        let rows = parse_extract(&table, Period::new(2000, 2024), &filter(), "test").unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].is_agri, "HS chapter 09 is agricultural");
    }

    #[test]
    fn test_missing_key_column_is_an_error() {
        let table = Table::parse("refYear,reporterISO,cmdCode\n1990,FRA,01\n").unwrap();
        let err = parse_extract(&table, Period::new(1979, 2000), &filter(), "bad.csv").unwrap_err();
        match err {
            PipelineError::MissingColumns { columns, .. } => {
                assert!(columns.contains(&"fobvalue".to_string()));
                assert!(columns.contains(&"Country".to_string()));
            }
            other => panic!("expected MissingColumns, got {:?}", other),
        }
    }

    #[test]
    fn test_load_exports_reads_covering_files_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("1979-1995_exports_S2.csv"), RAW_EXTRACT).unwrap();
        std::fs::write(dir.path().join("2010_exports_plus.csv"), RAW_EXTRACT).unwrap();
        let rows = load_exports(dir.path(), Period::new(1979, 2000), &filter()).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.windows(2).all(|w| w[0].year <= w[1].year));
    }

    #[test]
    fn test_load_exports_without_files_is_no_data() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_exports(dir.path(), Period::new(1979, 2000), &filter()).unwrap_err();
        assert!(matches!(err, PipelineError::NoData(_)));
    }

    #[test]
    fn test_summary_counts() {
        let table = Table::parse(RAW_EXTRACT).unwrap();
        let rows = parse_extract(&table, Period::new(1979, 2000), &filter(), "test").unwrap();
        let summary = summarize_exports(&rows);
        assert_eq!(summary.observations, 3);
        assert_eq!(summary.countries, 2);
        assert_eq!(summary.first_year, Some(1990));
        assert_eq!(summary.last_year, Some(1995));
        assert_eq!(summary.agricultural, 2);
        assert!((summary.agri_share_pct() - 66.666).abs() < 0.01);
    }

    #[test]
    fn test_parse_response_reads_records() {
        let body = r#"{"elapsedTime":"0.1 secs","count":1,"data":[
            {"refYear":2005,"reporterISO":"BRA","reporterDesc":"Brazil","classificationCode":"H2",
             "classificationSearchCode":"HS","cmdCode":"09","cmdDesc":"Coffee","flowCode":"X",
             "fobvalue":12.5,"primaryValue":12.5}],"error":""}"#;
        let rows = parse_response(body).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].reporter_iso.as_deref(), Some("BRA"));
        assert_eq!(rows[0].fobvalue, Some(12.5));
    }

    #[test]
    fn test_parse_response_detects_quota() {
        let body = r#"{"data":[],"error":"Out of call volume quota. Quota will be replenished in 01:00:00."}"#;
        assert!(matches!(parse_response(body), Err(PipelineError::QuotaExceeded(_))));
    }

    #[test]
    fn test_build_url_uses_preview_without_key() {
        let client = ComtradeClient::new(&ComtradeConfig::default(), None).unwrap();
        let url = client.build_url(1995, Some("01"), 5000);
        assert!(url.starts_with(COMTRADE_PREVIEW_URL));
        assert!(url.contains("period=1995"));
        assert!(url.contains("cmdCode=01"));
        assert!(url.contains("partnerCode=0"));
        assert!(url.contains("flowCode=X"));
        assert!(url.contains("breakdownMode=plus"));

        let keyed = ComtradeClient::new(&ComtradeConfig::default(), Some("k".into())).unwrap();
        let probe = keyed.build_url(1995, None, 100);
        assert!(probe.starts_with(COMTRADE_DATA_URL));
        assert!(!probe.contains("cmdCode"));
    }

    #[test]
    fn test_written_extract_round_trips_through_loader() {
        let dir = tempfile::tempdir().unwrap();
        let rows = vec![ComtradeRow {
            ref_year: 2003,
            reporter_iso: Some("KEN".into()),
            reporter_desc: Some("Kenya".into()),
            classification_code: Some("H1".into()),
            classification_search_code: Some("HS".into()),
            cmd_code: "09".into(),
            cmd_desc: Some("Coffee, tea".into()),
            flow_code: Some("X".into()),
            fobvalue: Some(42.0),
        }];
        let path = extract_path(dir.path(), 2003, "plus");
        write_extract(&path, &rows).unwrap();
        let loaded = load_exports(dir.path(), Period::new(2000, 2005), &filter()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].iso, "KEN");
        assert!(loaded[0].is_agri);
    }
}
