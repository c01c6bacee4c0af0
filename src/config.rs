//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every field has a default, so an empty file is a valid configuration.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, VeError};
use crate::summary::SummaryOptions;
use crate::vedirect::reader::ReaderOptions;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub summary: SummaryConfig,
    #[serde(default)]
    pub registers: RegistersConfig,
    #[serde(default)]
    pub transmit: TransmitConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Byte source configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    /// Serial device, or a regular file to replay (empty = auto-detect)
    #[serde(default)]
    pub port: String,

    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,

    /// Stamp records with the time they were decoded
    #[serde(default = "default_stamp_time")]
    pub stamp_time: bool,

    /// Capacity of the decoder output queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Rolling history configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SummaryConfig {
    #[serde(default = "default_bin_seconds")]
    pub bin_seconds: u64,

    #[serde(default = "default_keep_count")]
    pub keep_count: usize,

    #[serde(default = "default_summary_chunk_size")]
    pub summary_chunk_size: usize,

    #[serde(default = "default_raw_cache")]
    pub raw_cache: usize,

    /// Queries return raw records for this many recent seconds
    #[serde(default = "default_raw_window_s")]
    pub raw_window_s: u64,

    #[serde(default = "default_status_interval_records")]
    pub status_interval_records: u64,
}

/// Register tables beyond the built-in device families
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RegistersConfig {
    #[serde(default)]
    pub extra_tables: Vec<PathBuf>,
}

/// Upload configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TransmitConfig {
    #[serde(default)]
    pub enabled: bool,

    /// `-` for stdout
    #[serde(default = "default_target")]
    pub target: String,

    /// Records per upload batch
    #[serde(default = "default_send_period")]
    pub send_period: usize,

    #[serde(default = "default_retry_period_s")]
    pub retry_period_s: u64,

    /// Defaults to `send_period`
    #[serde(default)]
    pub keyframe_period: Option<usize>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_read_chunk_size() -> usize { 4096 }
fn default_stamp_time() -> bool { true }
fn default_queue_capacity() -> usize { 10 }

fn default_bin_seconds() -> u64 { 60 }
fn default_keep_count() -> usize { 20_000 }
fn default_summary_chunk_size() -> usize { 500 }
fn default_raw_cache() -> usize { 10 }
fn default_raw_window_s() -> u64 { 600 }
fn default_status_interval_records() -> u64 { 1000 }

fn default_target() -> String { "-".to_string() }
fn default_send_period() -> usize { 1000 }
fn default_retry_period_s() -> u64 { 60 }

fn default_log_level() -> String { "info".to_string() }

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            read_chunk_size: default_read_chunk_size(),
            stamp_time: default_stamp_time(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            bin_seconds: default_bin_seconds(),
            keep_count: default_keep_count(),
            summary_chunk_size: default_summary_chunk_size(),
            raw_cache: default_raw_cache(),
            raw_window_s: default_raw_window_s(),
            status_interval_records: default_status_interval_records(),
        }
    }
}

impl Default for TransmitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            target: default_target(),
            send_period: default_send_period(),
            retry_period_s: default_retry_period_s(),
            keyframe_period: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

impl SerialConfig {
    pub fn reader_options(&self) -> ReaderOptions {
        ReaderOptions {
            chunk_size: self.read_chunk_size,
            stamp_time: self.stamp_time,
        }
    }
}

impl SummaryConfig {
    pub fn options(&self) -> SummaryOptions {
        SummaryOptions {
            bin_seconds: self.bin_seconds,
            keep_count: self.keep_count,
            summary_chunk_size: self.summary_chunk_size,
            raw_cache: self.raw_cache,
        }
    }

    pub fn raw_window(&self) -> Duration {
        Duration::from_secs(self.raw_window_s)
    }
}

impl TransmitConfig {
    pub fn keyframe_period(&self) -> usize {
        self.keyframe_period.unwrap_or(self.send_period)
    }

    pub fn retry_period(&self) -> Duration {
        Duration::from_secs(self.retry_period_s)
    }
}

fn invalid(msg: &str) -> VeError {
    VeError::Config(toml::de::Error::custom(msg))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use ve_telemetry::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration text
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        // Serial port can be empty (auto-detect)

        if self.serial.read_chunk_size == 0 || self.serial.read_chunk_size > 65_536 {
            return Err(invalid("read_chunk_size must be between 1 and 65536"));
        }

        if self.serial.queue_capacity == 0 {
            return Err(invalid("queue_capacity must be greater than 0"));
        }

        let summary = &self.summary;
        if summary.bin_seconds == 0 {
            return Err(invalid("bin_seconds must be greater than 0"));
        }
        if summary.keep_count == 0 {
            return Err(invalid("keep_count must be greater than 0"));
        }
        if summary.summary_chunk_size == 0 {
            return Err(invalid("summary_chunk_size must be greater than 0"));
        }
        if summary.raw_cache == 0 {
            return Err(invalid("raw_cache must be at least 1"));
        }
        if summary.status_interval_records == 0 {
            return Err(invalid("status_interval_records must be greater than 0"));
        }

        let transmit = &self.transmit;
        if transmit.target.is_empty() {
            return Err(invalid("transmit target cannot be empty"));
        }
        if transmit.send_period == 0 {
            return Err(invalid("send_period must be greater than 0"));
        }
        if transmit.retry_period_s == 0 || transmit.retry_period_s > 3600 {
            return Err(invalid("retry_period_s must be between 1 and 3600"));
        }

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(invalid("logging level must be one of: trace, debug, info, warn, error"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_valid_config() -> Config {
        Config::default()
    }

    #[test]
    fn test_default_config() {
        let config = create_valid_config();
        assert!(config.validate().is_ok());
        assert!(config.serial.port.is_empty());
        assert_eq!(config.summary.keep_count, 20_000);
        assert_eq!(config.transmit.keyframe_period(), 1000);
        assert!(!config.transmit.enabled);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.summary.options(), SummaryOptions::default());
        assert_eq!(config.serial.reader_options().chunk_size, 4096);
        assert_eq!(config.summary.raw_window(), Duration::from_secs(600));
    }

    #[test]
    fn test_load_config_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let toml_content = r#"
[serial]
port = "capture.bin"
stamp_time = false

[summary]
bin_seconds = 30

[registers]
extra_tables = ["/etc/ve/bmv.csv"]

[transmit]
enabled = true
send_period = 50
keyframe_period = 10

[logging]
level = "debug"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.serial.port, "capture.bin");
        assert!(!config.serial.reader_options().stamp_time);
        assert_eq!(config.summary.bin_seconds, 30);
        assert_eq!(config.summary.keep_count, 20_000);
        assert_eq!(config.registers.extra_tables, vec![PathBuf::from("/etc/ve/bmv.csv")]);
        assert_eq!(config.transmit.send_period, 50);
        assert_eq!(config.transmit.keyframe_period(), 10);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            Config::load("/nonexistent/ve-telemetry.toml"),
            Err(VeError::Io(_))
        ));
    }

    #[test]
    fn test_bad_toml() {
        assert!(matches!(Config::parse("[serial\nport ="), Err(VeError::Config(_))));
    }

    #[test]
    fn test_empty_serial_port_is_auto_detect() {
        let mut config = create_valid_config();
        config.serial.port = String::new();
        assert!(config.validate().is_ok());

        let config = Config::parse("[serial]\nport = \"/dev/ttyUSB1\"").unwrap();
        assert_eq!(config.serial.port, "/dev/ttyUSB1");
    }

    #[test]
    fn test_read_chunk_size_bounds() {
        let mut config = create_valid_config();
        config.serial.read_chunk_size = 0;
        assert!(config.validate().is_err());
        config.serial.read_chunk_size = 65_537;
        assert!(config.validate().is_err());
        config.serial.read_chunk_size = 65_536;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_queue_capacity_zero() {
        let mut config = create_valid_config();
        config.serial.queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_summary_sizes_zero() {
        let cases: [fn(&mut SummaryConfig); 5] = [
            |s| s.bin_seconds = 0,
            |s| s.keep_count = 0,
            |s| s.summary_chunk_size = 0,
            |s| s.raw_cache = 0,
            |s| s.status_interval_records = 0,
        ];
        for (i, case) in cases.iter().enumerate() {
            let mut config = create_valid_config();
            case(&mut config.summary);
            assert!(config.validate().is_err(), "case {}", i);
        }
    }

    #[test]
    fn test_send_period_zero() {
        let mut config = create_valid_config();
        config.transmit.send_period = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_period_bounds() {
        let mut config = create_valid_config();
        config.transmit.retry_period_s = 0;
        assert!(config.validate().is_err());
        config.transmit.retry_period_s = 3601;
        assert!(config.validate().is_err());
        config.transmit.retry_period_s = 3600;
        assert!(config.validate().is_ok());
        assert_eq!(config.transmit.retry_period(), Duration::from_secs(3600));
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = create_valid_config();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_toml_file_is_valid() {
        let config = Config::parse(include_str!("../config/default.toml")).unwrap();
        assert_eq!(config.summary.options(), SummaryOptions::default());
    }
}
