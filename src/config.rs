//! Configuration System using Figment
//!
//! Strongly-typed settings for the station. Values are layered:
//! 1. built-in defaults ([`Settings::default`])
//! 2. an optional TOML file
//! 3. environment variables prefixed with `WX_DAQ_` (nested keys split on `__`)
//!
//! # Example
//! ```no_run
//! use wx_daq::config::Settings;
//!
//! // WX_DAQ_NETWORK__CONTROL_PORT=9000 overrides the control port
//! let settings = Settings::load_from("config/wx_daq.toml")?;
//! settings.validate()?;
//! println!("logging into {}", settings.storage.log_dir.display());
//! # Ok::<(), wx_daq::error::DaqError>(())
//! ```

use crate::error::{AppResult, DaqError};
use crate::record::LogRow;
use chrono::format::{Item, StrftimeItems};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "WX_DAQ_";

/// Shortest sampling or output interval accepted.
pub const MIN_INTERVAL_SECS: f64 = 0.001;

/// Longest sampling or output interval accepted (one day).
pub const MAX_INTERVAL_SECS: f64 = 86_400.0;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Anemometer serial link
    #[serde(default)]
    pub serial: SerialConfig,
    /// Rotating CSV output
    #[serde(default)]
    pub storage: StorageConfig,
    /// Control, status and visualization sockets
    #[serde(default)]
    pub network: NetworkConfig,
    /// Sampling cadences and queue sizes
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Console format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Serial transport configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Try the serial port at all; `false` forces the simulated source
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Serial port path
    #[serde(default = "default_serial_port")]
    pub port: String,
    /// Baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Frame read timeout in milliseconds
    #[serde(default = "default_serial_timeout")]
    pub timeout_ms: u64,
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for rotated log files and the stable links
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// chrono format pattern used as the rotation key
    #[serde(default = "default_rotation_format")]
    pub rotation_format: String,
    /// File name suffix appended after `<key>_`
    #[serde(default = "default_file_suffix")]
    pub file_suffix: String,
    /// Name of the link to the active file
    #[serde(default = "default_current_link")]
    pub current_link: String,
    /// Name of the link to the previously active file
    #[serde(default = "default_previous_link")]
    pub previous_link: String,
    /// Flush after every row (useful with `tail -f`)
    #[serde(default = "default_true")]
    pub flush_each_row: bool,
    /// Rotation key poll interval in seconds
    #[serde(default = "default_rotation_check_secs")]
    pub rotation_check_secs: u64,
    /// CSV header, must match the row schema
    #[serde(default = "default_fieldnames")]
    pub fieldnames: Vec<String>,
}

/// Network configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Host the control socket binds to and the status reply is sent to
    #[serde(default = "default_host")]
    pub host: String,
    /// Control port (mode-set and STATUS datagrams)
    #[serde(default = "default_control_port")]
    pub control_port: u16,
    /// Status reply port
    #[serde(default = "default_status_port")]
    pub status_port: u16,
    /// Visualization peer address
    #[serde(default = "default_viz_ip")]
    pub viz_ip: String,
    /// Visualization peer port
    #[serde(default = "default_viz_port")]
    pub viz_port: u16,
    /// Send the visualization feed as broadcast
    #[serde(default)]
    pub viz_broadcast: bool,
    /// Minimum spacing between visualization datagrams in milliseconds
    #[serde(default = "default_viz_min_interval_ms")]
    pub viz_min_interval_ms: u64,
    /// Control socket poll timeout in milliseconds
    #[serde(default = "default_control_poll_ms")]
    pub control_poll_ms: u64,
}

/// Acquisition configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// High-frequency sample and write rate in Hz
    #[serde(default = "default_high_freq_hz")]
    pub high_freq_hz: f64,
    /// Standard output period in seconds
    #[serde(default = "default_standard_period_secs")]
    pub standard_period_secs: f64,
    /// Sampling is this many times faster than the standard output
    #[serde(default = "default_oversample_factor")]
    pub oversample_factor: u32,
    /// Downsample window length
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,
    /// High-frequency queue capacity
    #[serde(default = "default_hf_queue_capacity")]
    pub hf_queue_capacity: usize,
    /// Standard queue capacity
    #[serde(default = "default_standard_queue_capacity")]
    pub standard_queue_capacity: usize,
    /// Visualization queue capacity
    #[serde(default = "default_viz_queue_capacity")]
    pub viz_queue_capacity: usize,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

fn default_serial_port() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud_rate() -> u32 {
    38400
}

fn default_serial_timeout() -> u64 {
    1000
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/tmp/wx")
}

fn default_rotation_format() -> String {
    "%Y_%m_%d".to_string()
}

fn default_file_suffix() -> String {
    "weather_station_data.csv".to_string()
}

fn default_current_link() -> String {
    "current_weather_data_logfile.csv".to_string()
}

fn default_previous_link() -> String {
    "previous_weather_data_logfile.csv".to_string()
}

fn default_rotation_check_secs() -> u64 {
    10
}

fn default_fieldnames() -> Vec<String> {
    LogRow::COLUMNS.iter().map(|c| c.to_string()).collect()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_control_port() -> u16 {
    8250
}

fn default_status_port() -> u16 {
    8251
}

fn default_viz_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_viz_port() -> u16 {
    5555
}

fn default_viz_min_interval_ms() -> u64 {
    100
}

fn default_control_poll_ms() -> u64 {
    5
}

fn default_high_freq_hz() -> f64 {
    32.0
}

fn default_standard_period_secs() -> f64 {
    1.0
}

fn default_oversample_factor() -> u32 {
    10
}

fn default_window_capacity() -> usize {
    32
}

fn default_hf_queue_capacity() -> usize {
    1000
}

fn default_standard_queue_capacity() -> usize {
    500
}

fn default_viz_queue_capacity() -> usize {
    500
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            timeout_ms: default_serial_timeout(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            rotation_format: default_rotation_format(),
            file_suffix: default_file_suffix(),
            current_link: default_current_link(),
            previous_link: default_previous_link(),
            flush_each_row: true,
            rotation_check_secs: default_rotation_check_secs(),
            fieldnames: default_fieldnames(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            control_port: default_control_port(),
            status_port: default_status_port(),
            viz_ip: default_viz_ip(),
            viz_port: default_viz_port(),
            viz_broadcast: false,
            viz_min_interval_ms: default_viz_min_interval_ms(),
            control_poll_ms: default_control_poll_ms(),
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            high_freq_hz: default_high_freq_hz(),
            standard_period_secs: default_standard_period_secs(),
            oversample_factor: default_oversample_factor(),
            window_capacity: default_window_capacity(),
            hf_queue_capacity: default_hf_queue_capacity(),
            standard_queue_capacity: default_standard_queue_capacity(),
            viz_queue_capacity: default_viz_queue_capacity(),
        }
    }
}

impl Settings {
    /// Defaults merged with `WX_DAQ_*` environment variables.
    pub fn load() -> AppResult<Self> {
        Self::figment(None).extract().map_err(DaqError::from)
    }

    /// Defaults, then the TOML file at `path` (missing file is allowed), then environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Self::figment(Some(path.as_ref()))
            .extract()
            .map_err(DaqError::from)
    }

    fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        let acq = &self.acquisition;
        for (name, value) in [
            ("high_freq_hz", acq.high_freq_hz),
            ("standard_period_secs", acq.standard_period_secs),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(DaqError::Configuration(format!(
                    "{name} must be positive and finite, got {value}"
                )));
            }
        }
        for (name, interval_secs) in [
            ("high_freq_hz", 1.0 / acq.high_freq_hz),
            ("standard_period_secs", acq.standard_period_secs),
        ] {
            if !(MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS).contains(&interval_secs) {
                return Err(DaqError::Configuration(format!(
                    "{name} gives a {interval_secs}s interval, must be between \
                     {MIN_INTERVAL_SECS}s and {MAX_INTERVAL_SECS}s"
                )));
            }
        }
        if acq.oversample_factor == 0 {
            return Err(DaqError::Configuration(
                "oversample_factor must be at least 1".into(),
            ));
        }
        for (name, value) in [
            ("window_capacity", acq.window_capacity),
            ("hf_queue_capacity", acq.hf_queue_capacity),
            ("standard_queue_capacity", acq.standard_queue_capacity),
            ("viz_queue_capacity", acq.viz_queue_capacity),
        ] {
            if value == 0 {
                return Err(DaqError::Configuration(format!("{name} must be non-zero")));
            }
        }

        check_rotation_format(&self.storage.rotation_format)?;
        if self.storage.rotation_check_secs == 0 {
            return Err(DaqError::Configuration(
                "rotation_check_secs must be non-zero".into(),
            ));
        }
        if self.storage.current_link == self.storage.previous_link {
            return Err(DaqError::Configuration(
                "current_link and previous_link must differ".into(),
            ));
        }
        LogRow::check_schema(&self.storage.fieldnames)?;

        self.control_addr()?;
        self.status_addr()?;
        self.viz_addr()?;
        Ok(())
    }

    /// Address the control socket binds to.
    pub fn control_addr(&self) -> AppResult<SocketAddr> {
        parse_addr(&self.network.host, self.network.control_port)
    }

    /// Address STATUS replies are sent to.
    pub fn status_addr(&self) -> AppResult<SocketAddr> {
        parse_addr(&self.network.host, self.network.status_port)
    }

    /// Visualization peer address.
    pub fn viz_addr(&self) -> AppResult<SocketAddr> {
        parse_addr(&self.network.viz_ip, self.network.viz_port)
    }

    /// Sampling interval while in high-frequency mode.
    pub fn high_freq_interval(&self) -> Duration {
        bounded_interval(1.0 / self.acquisition.high_freq_hz)
    }

    /// Standard output period.
    pub fn standard_period(&self) -> Duration {
        bounded_interval(self.acquisition.standard_period_secs)
    }
}

/// `secs` clamped to the accepted interval range; [`Settings::validate`]
/// reports out-of-range values instead.
fn bounded_interval(secs: f64) -> Duration {
    if secs.is_nan() {
        return Duration::from_secs_f64(MIN_INTERVAL_SECS);
    }
    Duration::from_secs_f64(secs.clamp(MIN_INTERVAL_SECS, MAX_INTERVAL_SECS))
}

/// Reject rotation patterns chrono cannot format.
///
/// An empty pattern would put every row in one file forever, and an unknown
/// specifier (`%Q`) makes formatting fail at runtime.
pub fn check_rotation_format(pattern: &str) -> AppResult<()> {
    if pattern.trim().is_empty() {
        return Err(DaqError::Configuration(
            "rotation_format must not be empty".into(),
        ));
    }
    if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
        return Err(DaqError::Configuration(format!(
            "rotation_format '{pattern}' is not a valid chrono format"
        )));
    }
    Ok(())
}

fn parse_addr(host: &str, port: u16) -> AppResult<SocketAddr> {
    let host = if host.eq_ignore_ascii_case("localhost") {
        "127.0.0.1"
    } else {
        host
    };
    format!("{host}:{port}")
        .parse()
        .map_err(|e| DaqError::Configuration(format!("Invalid address '{host}:{port}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.network.control_port, 8250);
        assert_eq!(settings.network.status_port, 8251);
        assert_eq!(settings.acquisition.window_capacity, 32);
        assert_eq!(settings.storage.fieldnames.len(), 13);
    }

    #[test]
    fn test_intervals() {
        let settings = Settings::default();
        assert_eq!(settings.high_freq_interval(), Duration::from_secs_f64(1.0 / 32.0));
        assert_eq!(settings.standard_period(), Duration::from_secs(1));
    }

    #[test]
    fn test_invalid_log_level() {
        let mut settings = Settings::default();
        settings.application.log_level = "verbose".into();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_rejects_non_positive_rate() {
        let mut settings = Settings::default();
        settings.acquisition.high_freq_hz = 0.0;
        let err = settings.validate().unwrap_err().to_string();
        assert!(err.contains("high_freq_hz must be positive and finite"));

        settings.acquisition.high_freq_hz = f64::NAN;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_rejects_unformattable_rotation_pattern() {
        let mut settings = Settings::default();
        settings.storage.rotation_format = "%Y_%Q".into();
        let err = settings.validate().unwrap_err();
        assert!(matches!(err, DaqError::Configuration(_)));
        assert_eq!(err.exit_code(), 5);

        settings.storage.rotation_format = "%Y_%m_%d__%H_%M_%S".into();
        assert!(settings.validate().is_ok());
        assert!(check_rotation_format("  ").is_err());
    }

    #[test]
    fn test_rejects_intervals_that_cannot_be_durations() {
        let mut settings = Settings::default();
        settings.acquisition.standard_period_secs = 1e20;
        assert!(matches!(
            settings.validate(),
            Err(DaqError::Configuration(_))
        ));

        assert_eq!(settings.standard_period(), Duration::from_secs(86_400));

        settings = Settings::default();
        settings.acquisition.high_freq_hz = 1e-300;
        assert!(settings.validate().is_err());
        assert_eq!(settings.high_freq_interval(), Duration::from_secs(86_400));

        settings = Settings::default();
        settings.acquisition.high_freq_hz = 1e9;
        assert!(settings.validate().is_err());

        settings = Settings::default();
        settings.acquisition.high_freq_hz = 1000.0;
        settings.acquisition.standard_period_secs = 86_400.0;
        assert!(settings.validate().is_ok());
        assert_eq!(settings.standard_period(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_rejects_mismatched_fieldnames() {
        let mut settings = Settings::default();
        settings.storage.fieldnames.pop();
        assert!(matches!(
            settings.validate(),
            Err(DaqError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_localhost_resolves() {
        let mut settings = Settings::default();
        settings.network.host = "localhost".into();
        assert_eq!(
            settings.control_addr().unwrap(),
            "127.0.0.1:8250".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wx_daq.toml");
        std::fs::write(
            &path,
            r#"
            [storage]
            log_dir = "/tmp/wx-test"
            rotation_format = "%Y_%m_%d__%H_%M"

            [network]
            viz_port = 6000
            "#,
        )
        .unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.storage.log_dir, PathBuf::from("/tmp/wx-test"));
        assert_eq!(settings.storage.rotation_format, "%Y_%m_%d__%H_%M");
        assert_eq!(settings.network.viz_port, 6000);
        // untouched sections keep their defaults
        assert_eq!(settings.network.control_port, 8250);
        assert!(settings.validate().is_ok());
    }
}
