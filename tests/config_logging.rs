/// Startup logging of the configuration source
///
/// Runs in its own test binary because it initializes the global logger.

use disaster_trade::config::{ConfigSource, PipelineConfig};
use disaster_trade::logging::{self, LogLevel};
use std::fs;

#[test]
fn test_missing_config_warning_reaches_the_log() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("pipeline.log");
    let config_path = dir.path().join("absent.toml");

    let (config, source) = PipelineConfig::load(&config_path, None).unwrap();
    assert_eq!(config, PipelineConfig::default());
    assert!(matches!(source, ConfigSource::Defaults(_)));

    logging::init_logger(LogLevel::Info, log_path.to_str(), false);
    source.log();

    let log = fs::read_to_string(&log_path).expect("log file should be written");
    assert!(log.contains("WARN"), "got: {}", log);
    assert!(
        log.contains("absent.toml not found, using default configuration"),
        "got: {}",
        log
    );
}
