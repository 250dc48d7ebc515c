//! Configuration management for the parking monitor.
//!
//! This module handles loading and validating configuration from environment
//! variables and configuration files. Validation runs once at startup; every
//! value the acquisition loop depends on is checked before the camera is opened.

use config::{Config, ConfigError, Environment, File};
use reqwest::Url;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the monitor service.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MonitorConfig {
    /// Camera stream configuration
    #[serde(default)]
    pub camera: CameraConfig,

    /// Plate recognition service configuration
    #[serde(default)]
    pub recognition: RecognitionConfig,

    /// Gate display notification configuration
    #[serde(default)]
    pub notifier: NotifierConfig,

    /// Database and snapshot storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Payment registry lookup configuration
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Acquisition loop timing
    #[serde(default)]
    pub acquisition: AcquisitionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Health and metrics configuration
    #[serde(default)]
    pub health: HealthConfig,
}

/// Camera stream connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    /// MJPEG stream URL (e.g., "http://192.168.1.40/stream"), or a bare host
    /// which expands to `http://<host>/stream`
    #[serde(default)]
    pub stream_url: String,

    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Maximum time to wait for one complete frame in seconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Delay before the single reopen attempt after a read failure
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,

    /// Largest buffered frame accepted before the stream is considered corrupt
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

/// Plate recognition service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RecognitionConfig {
    /// Plate reader endpoint
    #[serde(default = "default_recognition_url")]
    pub api_url: String,

    /// API credential, with or without the scheme prefix
    #[serde(default)]
    pub api_token: String,

    /// Scheme token expected at the start of the Authorization header
    #[serde(default = "default_token_scheme")]
    pub token_scheme: String,

    /// Request timeout in seconds
    #[serde(default = "default_recognition_timeout")]
    pub timeout_secs: u64,

    /// Minimum score for a candidate to be reconciled
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Optional region hints forwarded to the plate reader
    #[serde(default)]
    pub regions: Vec<String>,
}

/// Gate display notification configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NotifierConfig {
    /// Display update endpoint, or a bare host which expands to
    /// `http://<host>/update`
    #[serde(default)]
    pub endpoint: String,

    /// Request timeout in seconds
    #[serde(default = "default_notifier_timeout")]
    pub timeout_secs: u64,
}

/// Database and snapshot storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// SQLite connection URL
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Directory where snapshots are written
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: PathBuf,

    /// Insert the demo plates into PAID_VEHICLES on startup
    #[serde(default = "default_seed_demo_registry")]
    pub seed_demo_registry: bool,

    /// Connection timeout in seconds
    #[serde(default = "default_db_connect_timeout")]
    pub connect_timeout_secs: u64,
}

/// How recognized plates are compared against registry keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlateMatchMode {
    /// Byte-for-byte comparison of the recognized string
    #[default]
    Exact,
    /// ASCII case-insensitive comparison
    CaseInsensitive,
}

/// Payment registry lookup configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub match_mode: PlateMatchMode,
}

/// Acquisition loop timing.
#[derive(Debug, Clone, Deserialize)]
pub struct AcquisitionConfig {
    /// Length of one cadence window in seconds
    #[serde(default = "default_cadence_secs")]
    pub cadence_secs: u64,

    /// Sleep between ticks in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Whether to include source code location
    #[serde(default)]
    pub include_location: bool,
}

/// Health and metrics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    /// Interval between loop statistics log lines in seconds
    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,

    /// Port for the Prometheus exporter
    #[serde(default = "default_health_port")]
    pub port: u16,

    /// Enable Prometheus metrics export
    #[serde(default)]
    pub enable_metrics: bool,
}

// Default value functions
fn default_connection_timeout() -> u64 {
    10
}
fn default_read_timeout() -> u64 {
    10
}
fn default_reconnect_delay() -> u64 {
    5
}
fn default_max_frame_bytes() -> usize {
    2 * 1024 * 1024
}
fn default_recognition_url() -> String {
    "https://api.platerecognizer.com/v1/plate-reader/".to_string()
}
fn default_token_scheme() -> String {
    "Token".to_string()
}
fn default_recognition_timeout() -> u64 {
    10
}
fn default_min_confidence() -> f64 {
    0.8
}
fn default_notifier_timeout() -> u64 {
    5
}
fn default_database_url() -> String {
    "sqlite://PARKING_MANAGEMENT.db?mode=rwc".to_string()
}
fn default_snapshot_dir() -> PathBuf {
    PathBuf::from("./photo")
}
fn default_seed_demo_registry() -> bool {
    true
}
fn default_db_connect_timeout() -> u64 {
    5
}
fn default_cadence_secs() -> u64 {
    10
}
fn default_poll_interval_ms() -> u64 {
    50
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}
fn default_health_interval() -> u64 {
    60
}
fn default_health_port() -> u16 {
    9090
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            stream_url: String::new(),
            connection_timeout_secs: default_connection_timeout(),
            read_timeout_secs: default_read_timeout(),
            reconnect_delay_secs: default_reconnect_delay(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            api_url: default_recognition_url(),
            api_token: String::new(),
            token_scheme: default_token_scheme(),
            timeout_secs: default_recognition_timeout(),
            min_confidence: default_min_confidence(),
            regions: Vec::new(),
        }
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            timeout_secs: default_notifier_timeout(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            snapshot_dir: default_snapshot_dir(),
            seed_demo_registry: default_seed_demo_registry(),
            connect_timeout_secs: default_db_connect_timeout(),
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            cadence_secs: default_cadence_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            include_location: false,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_health_interval(),
            port: default_health_port(),
            enable_metrics: false,
        }
    }
}

impl MonitorConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default config file (config/default.toml)
    /// 2. Environment-specific config (config/{env}.toml)
    /// 3. Environment variables (prefixed with PARKWATCH_)
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // e.g. PARKWATCH_CAMERA__STREAM_URL
            .add_source(env_source())
            .build()?;

        config.try_deserialize()
    }

    /// Create configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Config::builder().add_source(env_source()).build()?;

        config.try_deserialize()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        self.camera.stream_url()?;
        self.notifier.endpoint_url()?;
        self.recognition.api_url()?;
        self.recognition.authorization()?;

        if !(0.0..=1.0).contains(&self.recognition.min_confidence) {
            return Err(ConfigValidationError::InvalidValue {
                field: "recognition.min_confidence".to_string(),
                message: "Threshold must be within [0, 1]".to_string(),
            });
        }

        if self.acquisition.cadence_secs == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "acquisition.cadence_secs".to_string(),
                message: "Cadence must be greater than 0".to_string(),
            });
        }

        for (field, secs) in [
            ("camera.connection_timeout_secs", self.camera.connection_timeout_secs),
            ("camera.read_timeout_secs", self.camera.read_timeout_secs),
            ("recognition.timeout_secs", self.recognition.timeout_secs),
            ("notifier.timeout_secs", self.notifier.timeout_secs),
        ] {
            if secs == 0 {
                return Err(ConfigValidationError::InvalidValue {
                    field: field.to_string(),
                    message: "Timeout must be greater than 0".to_string(),
                });
            }
        }

        if self.camera.max_frame_bytes == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "camera.max_frame_bytes".to_string(),
                message: "Frame limit must be greater than 0".to_string(),
            });
        }

        if self.storage.database_url.trim().is_empty() {
            return Err(ConfigValidationError::MissingField(
                "storage.database_url".to_string(),
            ));
        }

        if self.storage.snapshot_dir.as_os_str().is_empty() {
            return Err(ConfigValidationError::MissingField(
                "storage.snapshot_dir".to_string(),
            ));
        }

        Ok(())
    }
}

fn env_source() -> Environment {
    Environment::with_prefix("PARKWATCH")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("recognition.regions")
}

impl CameraConfig {
    /// Resolve the configured stream address into a URL.
    pub fn stream_url(&self) -> Result<Url, ConfigValidationError> {
        resolve_endpoint("camera.stream_url", &self.stream_url, "/stream")
    }

    /// Get connection timeout as Duration.
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Get frame read timeout as Duration.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Get reconnection delay as Duration.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

impl RecognitionConfig {
    pub fn api_url(&self) -> Result<Url, ConfigValidationError> {
        resolve_endpoint("recognition.api_url", &self.api_url, "/")
    }

    /// Build the Authorization header value, prepending the scheme token when
    /// the stored credential lacks it.
    pub fn authorization(&self) -> Result<String, ConfigValidationError> {
        normalize_credential(&self.api_token, &self.token_scheme)
            .ok_or_else(|| ConfigValidationError::MissingField("recognition.api_token".to_string()))
    }

    /// Get request timeout as Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl NotifierConfig {
    pub fn endpoint_url(&self) -> Result<Url, ConfigValidationError> {
        resolve_endpoint("notifier.endpoint", &self.endpoint, "/update")
    }

    /// Get request timeout as Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl StorageConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl AcquisitionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Prefix `raw` with `"<scheme> "` unless it already starts with it
/// (case-insensitive). Returns `None` for a blank credential.
pub fn normalize_credential(raw: &str, scheme: &str) -> Option<String> {
    let token = raw.trim();
    if token.is_empty() {
        return None;
    }

    let prefix = format!("{} ", scheme.trim());
    let has_prefix = token
        .get(..prefix.len())
        .map(|head| head.eq_ignore_ascii_case(&prefix))
        .unwrap_or(false);

    if has_prefix {
        Some(token.to_string())
    } else {
        Some(format!("{}{}", prefix, token))
    }
}

/// Parse an HTTP(S) endpoint. Values without a scheme are treated as a bare
/// device host and expanded to `http://<host><default_path>`.
pub fn resolve_endpoint(
    field: &str,
    raw: &str,
    default_path: &str,
) -> Result<Url, ConfigValidationError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ConfigValidationError::MissingField(field.to_string()));
    }

    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{}{}", raw.trim_end_matches('/'), default_path)
    };

    let url = Url::parse(&candidate).map_err(|e| ConfigValidationError::InvalidValue {
        field: field.to_string(),
        message: e.to_string(),
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigValidationError::InvalidValue {
            field: field.to_string(),
            message: "URL must start with http:// or https://".to_string(),
        });
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(ConfigValidationError::InvalidValue {
            field: field.to_string(),
            message: "URL has no host".to_string(),
        });
    }

    Ok(url)
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
