/// Structured logging for the disaster/export pipeline
///
/// Provides context-rich logging with data-source tags, period or country
/// identifiers, timestamps, and severity levels. Supports both console
/// output and file-based logging for long unattended runs.

use chrono::Utc;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::str::FromStr;
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "TRACE"),
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Data Source Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Comtrade,
    Exports,
    EmDat,
    GeoMet,
    WorldBank,
    Cache,
    Panel,
    Regression,
    Report,
    System,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Comtrade => write!(f, "COMTRADE"),
            DataSource::Exports => write!(f, "EXPORTS"),
            DataSource::EmDat => write!(f, "EMDAT"),
            DataSource::GeoMet => write!(f, "GEOMET"),
            DataSource::WorldBank => write!(f, "WB"),
            DataSource::Cache => write!(f, "CACHE"),
            DataSource::Panel => write!(f, "PANEL"),
            DataSource::Regression => write!(f, "REG"),
            DataSource::Report => write!(f, "REPORT"),
            DataSource::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - the year or chapter simply has no data
    Expected,
    /// API quota exhausted - downloading must stop for this run
    QuotaExceeded,
    /// Unexpected failure - indicates service degradation or an API change
    Unexpected,
    /// Unknown - cannot determine if this is expected or not
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::QuotaExceeded => write!(f, "QUOTA"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logger Configuration
// ---------------------------------------------------------------------------

/// Global logger instance
static LOGGER: Mutex<Option<Logger>> = Mutex::new(None);

pub struct Logger {
    /// Minimum log level to display
    min_level: LogLevel,
    /// Optional file path for logging
    log_file: Option<String>,
    /// Whether to include timestamps in console output
    console_timestamps: bool,
}

impl Logger {
    /// Initialize the global logger
    pub fn init(min_level: LogLevel, log_file: Option<String>, console_timestamps: bool) {
        let logger = Logger {
            min_level,
            log_file,
            console_timestamps,
        };

        if let Ok(mut slot) = LOGGER.lock() {
            *slot = Some(logger);
        }
    }

    fn log(&self, level: LogLevel, source: &DataSource, context: Option<&str>, message: &str) {
        if level < self.min_level {
            return;
        }

        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");

        let context_part = context.map(|c| format!(" [{}]", c)).unwrap_or_default();
        let log_entry = format!(
            "{} {} {}{}: {}",
            timestamp, level, source, context_part, message
        );

        if self.console_timestamps {
            match level {
                LogLevel::Error | LogLevel::Warning => eprintln!("{}", log_entry),
                _ => println!("{}", log_entry),
            }
        } else {
            match level {
                LogLevel::Error => eprintln!("   ✗ {}{}: {}", source, context_part, message),
                LogLevel::Warning => eprintln!("   ⚠ {}{}: {}", source, context_part, message),
                LogLevel::Info => println!("   {}{}: {}", source, context_part, message),
                LogLevel::Debug => println!("   [DEBUG] {}{}: {}", source, context_part, message),
                LogLevel::Trace => println!("   [TRACE] {}{}: {}", source, context_part, message),
            }
        }

        if let Some(ref path) = self.log_file {
            if let Err(e) = Self::append_to_file(path, &log_entry) {
                eprintln!("Failed to write to log file {}: {}", path, e);
            }
        }
    }

    fn append_to_file(path: &str, entry: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", entry)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

/// Initialize the global logger
pub fn init_logger(min_level: LogLevel, log_file: Option<&str>, console_timestamps: bool) {
    Logger::init(min_level, log_file.map(String::from), console_timestamps);
}

fn emit(level: LogLevel, source: DataSource, context: Option<&str>, message: &str) {
    if let Ok(guard) = LOGGER.lock() {
        if let Some(logger) = guard.as_ref() {
            logger.log(level, &source, context, message);
        }
    }
}

/// Log a fine-grained trace message (per-file, per-row diagnostics)
pub fn trace(source: DataSource, context: Option<&str>, message: &str) {
    emit(LogLevel::Trace, source, context, message);
}

/// Log a debug message
pub fn debug(source: DataSource, context: Option<&str>, message: &str) {
    emit(LogLevel::Debug, source, context, message);
}

/// Log a general informational message
pub fn info(source: DataSource, context: Option<&str>, message: &str) {
    emit(LogLevel::Info, source, context, message);
}

/// Log a warning message
pub fn warn(source: DataSource, context: Option<&str>, message: &str) {
    emit(LogLevel::Warning, source, context, message);
}

/// Log an error message
pub fn error(source: DataSource, context: Option<&str>, message: &str) {
    emit(LogLevel::Error, source, context, message);
}

// ---------------------------------------------------------------------------
// Failure Classification Helpers
// ---------------------------------------------------------------------------

const QUOTA_STATUS_CODES: [&str; 2] = ["403", "429"];

/// Returns `true` when an API response body or error text signals an
/// exhausted quota.
///
/// Status codes only count right after an `HTTP`, `error` or `status` word,
/// so row counts and years that happen to contain 403 or 429 do not match.
pub fn is_quota_message(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    if lower.contains("quota") || lower.contains("too many requests") {
        return true;
    }
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    words.windows(2).any(|pair| {
        matches!(pair[0], "http" | "error" | "status") && QUOTA_STATUS_CODES.contains(&pair[1])
    })
}

/// Classify a Comtrade request failure based on the error text
pub fn classify_comtrade_failure(error_message: &str) -> FailureType {
    if is_quota_message(error_message) {
        FailureType::QuotaExceeded
    } else if error_message.contains("No data") || error_message.contains("no data") {
        FailureType::Expected
    } else if error_message.contains("HTTP") || error_message.contains("timed out") {
        FailureType::Unexpected
    } else if error_message.contains("json error") || error_message.contains("Parse error") {
        FailureType::Unexpected
    } else {
        FailureType::Unknown
    }
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Log a Comtrade failure with automatic classification and return the
/// classification so callers can stop on quota exhaustion.
pub fn log_comtrade_failure(
    context: &str,
    operation: &str,
    err: &dyn std::error::Error,
) -> FailureType {
    let error_msg = err.to_string();
    let failure_type = classify_comtrade_failure(&error_msg);

    let message = format!("{} failed [{}]: {}", operation, failure_type, error_msg);

    match failure_type {
        FailureType::Expected => debug(DataSource::Comtrade, Some(context), &message),
        FailureType::QuotaExceeded | FailureType::Unexpected => {
            error(DataSource::Comtrade, Some(context), &message)
        }
        FailureType::Unknown => warn(DataSource::Comtrade, Some(context), &message),
    }

    failure_type
}

// ---------------------------------------------------------------------------
// Step Summary Logging
// ---------------------------------------------------------------------------

/// Log a summary of a multi-part step (periods processed, years downloaded)
pub fn log_step_summary(source: DataSource, total: usize, successful: usize, failed: usize) {
    let message = format!(
        "Step complete: {}/{} successful, {} failed",
        successful, total, failed
    );

    if failed == 0 {
        info(source, None, &message);
    } else if successful == 0 {
        error(source, None, &message);
    } else {
        warn(source, None, &message);
    }
}
