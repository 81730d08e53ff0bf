use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::ConfigError;

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Environment variable that overrides `cwa.api_key`.
pub const API_KEY_ENV: &str = "CWA_API_KEY";

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a single-line message summarizing all errors
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// CWA OpenData endpoint settings
    #[serde(default)]
    pub cwa: CwaConfig,

    /// Fetch timing and retry settings
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Local SQLite store settings
    #[serde(default)]
    pub storage: StorageConfig,
}

/// CWA OpenData datasets the pipeline knows how to consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CwaDataset {
    /// Automatic weather station observations (O-A0003-001)
    #[default]
    StationObservation,
    /// One-week county/city forecast with coordinates (F-D0047-091)
    WeeklyForecast,
}

impl CwaDataset {
    /// Dataset identifier used in the datastore URL path
    pub fn id(&self) -> &'static str {
        match self {
            Self::StationObservation => "O-A0003-001",
            Self::WeeklyForecast => "F-D0047-091",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CwaConfig {
    /// Datastore base URL, without the dataset id
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Authorization key issued by the CWA OpenData platform.
    /// `CWA_API_KEY` in the environment takes precedence.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub dataset: CwaDataset,
}

fn default_base_url() -> String {
    "https://opendata.cwa.gov.tw/api/v1/rest/datastore".to_string()
}

impl Default for CwaConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            dataset: CwaDataset::default(),
        }
    }
}

impl CwaConfig {
    /// Effective API key: environment first, then the config file.
    pub fn resolved_api_key(&self) -> Option<String> {
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.api_key.clone().filter(|k| !k.trim().is_empty()))
    }

    /// Full endpoint URL for the configured dataset
    pub fn endpoint(&self) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), self.dataset.id())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Minimum spacing between network fetches in seconds
    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: u64,

    /// Retries after the initial attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay in seconds (doubles each retry)
    #[serde(default = "default_initial_backoff_secs")]
    pub initial_backoff_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_min_interval_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_secs() -> u64 {
    2
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            min_interval_secs: default_min_interval_secs(),
            max_retries: default_max_retries(),
            initial_backoff_secs: default_initial_backoff_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Records older than this many days are removed by cleanup
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// How long a writer waits on a locked database before giving up
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("twmap")
        .join("weather.db")
}

fn default_retention_days() -> u32 {
    30
}

fn default_busy_timeout_secs() -> u64 {
    30
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            retention_days: default_retention_days(),
            busy_timeout_secs: default_busy_timeout_secs(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path, writing defaults if the file doesn't exist
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let contents = std::fs::read_to_string(config_path)?;

        let config: Config = toml::from_str(&contents).map_err(|e| {
            ConfigError::ParseError(format!("{}: {}", config_path.display(), e.message()))
        })?;

        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Warnings are logged; errors abort.
    pub fn load_validated() -> Result<(Self, ValidationResult)> {
        let config = Self::load()?;
        let validation = config.validate();

        if !validation.is_valid() {
            return Err(ConfigError::Invalid(validation.error_summary()));
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        self.validate_url(&self.cwa.base_url, "cwa.base_url", &mut result);

        if self.cwa.resolved_api_key().is_none() {
            result.add_warning(
                "cwa.api_key",
                format!("No API key configured (set {} or cwa.api_key)", API_KEY_ENV),
            );
        }

        if self.fetch.timeout_secs == 0 {
            result.add_error("fetch.timeout_secs", "Timeout must be greater than 0");
        } else if self.fetch.timeout_secs > 120 {
            result.add_warning("fetch.timeout_secs", "Timeout is unusually long (>120s)");
        }

        if self.fetch.min_interval_secs == 0 {
            result.add_warning(
                "fetch.min_interval_secs",
                "Minimum fetch interval disabled; the endpoint may be hammered",
            );
        }

        if self.fetch.max_retries > 10 {
            result.add_warning("fetch.max_retries", "More than 10 retries configured");
        }

        if self.fetch.initial_backoff_secs == 0 && self.fetch.max_retries > 0 {
            result.add_warning("fetch.initial_backoff_secs", "Retries will not back off");
        }

        if self.storage.db_path.as_os_str().is_empty() {
            result.add_error("storage.db_path", "Database path must not be empty");
        }

        if self.storage.retention_days == 0 {
            result.add_warning(
                "storage.retention_days",
                "Retention of 0 days removes every record on cleanup",
            );
        }

        result
    }

    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }

                if url.scheme() == "http" {
                    result.add_warning(field_name, "Endpoint is not using https");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(config_path, contents)?;

        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| ConfigError::NotFound("no user config directory".to_string()))?
            .join("twmap");

        Ok(config_dir.join("config.toml"))
    }
}
