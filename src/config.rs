use crate::error::{AppError, Result};
use crate::models::{Location, Pollutant, SeverityPolicy};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default = "default_locations")]
    pub locations: Vec<Location>,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub transform: TransformConfig,
    pub sink: SinkConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_pollutants")]
    pub pollutants: Vec<String>,
    #[serde(default = "default_forecast_days")]
    pub forecast_days: u32,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            pollutants: default_pollutants(),
            forecast_days: default_forecast_days(),
            timeout_seconds: default_timeout_seconds(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_base_url() -> String {
    "https://air-quality-api.open-meteo.com/v1/air-quality".to_string()
}

fn default_pollutants() -> Vec<String> {
    Pollutant::ALL.iter().map(|p| p.field().to_string()).collect()
}

fn default_forecast_days() -> u32 {
    1
}

fn default_timeout_seconds() -> u64 {
    15
}

fn default_locations() -> Vec<Location> {
    vec![
        Location::new("Delhi", 28.7041, 77.1025),
        Location::new("Mumbai", 19.0760, 72.8777),
        Location::new("Bengaluru", 12.9716, 77.5946),
        Location::new("Hyderabad", 17.3850, 78.4867),
        Location::new("Kolkata", 22.5726, 88.3639),
    ]
}

/// Retry ceiling and backoff shape for one kind of remote call.
#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000 // 2s, 4s, ...
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_raw_dir")]
    pub raw_dir: PathBuf,
    #[serde(default = "default_staged_file")]
    pub staged_file: PathBuf,
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            raw_dir: default_raw_dir(),
            staged_file: default_staged_file(),
            report_dir: default_report_dir(),
        }
    }
}

fn default_raw_dir() -> PathBuf {
    PathBuf::from("data/raw")
}

fn default_staged_file() -> PathBuf {
    PathBuf::from("data/staged/air_quality_transformed.csv")
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("data/processed")
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TransformConfig {
    #[serde(default)]
    pub severity_policy: SeverityPolicy,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Postgres,
    Rest,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SinkConfig {
    pub kind: SinkKind,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub retry: RetryConfig,
    pub database: Option<DatabaseConfig>,
    pub rest: Option<RestConfig>,
}

fn default_table() -> String {
    "air_quality_data".to_string()
}

fn default_batch_size() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    #[serde(default = "default_db_port", deserialize_with = "deserialize_port")]
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_port() -> u16 {
    5432
}

fn default_max_connections() -> u32 {
    5
}

/// Custom deserializer that handles port as both number and string
///
/// Accepts:
/// - `port: 5432` (number)
/// - `port: "5432"` (string that parses to number)
/// - `port: ${DB_PORT}` (env var substituted to either)
fn deserialize_port<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortValue {
        Number(u16),
        String(String),
    }

    match PortValue::deserialize(deserializer)? {
        PortValue::Number(n) => Ok(n),
        PortValue::String(s) => s
            .parse::<u16>()
            .map_err(|_| serde::de::Error::custom(format!("Invalid port number: '{}'", s))),
    }
}

impl DatabaseConfig {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.name
        )
    }
}

/// PostgREST-compatible endpoint (e.g. a hosted Supabase project).
#[derive(Debug, Deserialize, Clone)]
pub struct RestConfig {
    pub url: String,
    pub api_key: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| AppError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        // Substitute environment variables
        let expanded = expand_env_vars(content)?;

        let config: Config = serde_yaml::from_str(&expanded)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    ///
    /// Checks for:
    /// - Unique, non-empty location names with in-range coordinates
    /// - Valid HTTPS URLs for the source and REST sink
    /// - A pollutant list covering the staged schema
    /// - Positive batch size and retry ceilings
    /// - Sink sub-config matching the selected kind
    fn validate(&self) -> Result<()> {
        if self.locations.is_empty() {
            return Err(AppError::Config(
                "At least one location must be configured".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for location in &self.locations {
            let name = location.name.trim();
            if name.is_empty() {
                return Err(AppError::Config(
                    "Location name cannot be empty".to_string(),
                ));
            }
            if !seen.insert(name.to_lowercase()) {
                return Err(AppError::Config(format!(
                    "Duplicate location name '{}'",
                    name
                )));
            }
            if !(-90.0..=90.0).contains(&location.latitude) {
                return Err(AppError::Config(format!(
                    "Latitude {} for '{}' out of range (-90..90)",
                    location.latitude, name
                )));
            }
            if !(-180.0..=180.0).contains(&location.longitude) {
                return Err(AppError::Config(format!(
                    "Longitude {} for '{}' out of range (-180..180)",
                    location.longitude, name
                )));
            }
        }

        validate_https_url("source base_url", &self.source.base_url)?;

        for pollutant in Pollutant::ALL {
            if !self.source.pollutants.iter().any(|p| p == pollutant.field()) {
                return Err(AppError::Config(format!(
                    "Pollutant list must include '{}'",
                    pollutant.field()
                )));
            }
        }

        if self.source.forecast_days == 0 {
            return Err(AppError::Config(
                "Source forecast_days must be at least 1".to_string(),
            ));
        }

        if self.source.timeout_seconds == 0 {
            return Err(AppError::Config(
                "Source timeout_seconds must be greater than 0".to_string(),
            ));
        }

        validate_retry("source", &self.source.retry)?;
        validate_retry("sink", &self.sink.retry)?;

        if self.sink.batch_size == 0 {
            return Err(AppError::Config(
                "Sink batch_size must be at least 1".to_string(),
            ));
        }

        let identifier = regex_lite::Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$")
            .map_err(|e| AppError::Config(format!("Identifier pattern error: {}", e)))?;
        if !identifier.is_match(&self.sink.table) {
            return Err(AppError::Config(format!(
                "Sink table '{}' must be a plain identifier (letters, digits, underscores)",
                self.sink.table
            )));
        }

        match self.sink.kind {
            SinkKind::Postgres => {
                let database = self.sink.database.as_ref().ok_or_else(|| {
                    AppError::Config(
                        "sink.database is required when sink.kind is 'postgres'".to_string(),
                    )
                })?;
                validate_database(database)?;
            }
            SinkKind::Rest => {
                let rest = self.sink.rest.as_ref().ok_or_else(|| {
                    AppError::Config("sink.rest is required when sink.kind is 'rest'".to_string())
                })?;
                validate_https_url("sink rest url", &rest.url)?;
                if rest.api_key.contains("${") || rest.api_key.is_empty() {
                    return Err(AppError::Config(
                        "SUPABASE_KEY environment variable is not set. \
                         Please set it or create a .env file."
                            .to_string(),
                    ));
                }
            }
        }

        Ok(())
    }
}

fn validate_https_url(what: &str, value: &str) -> Result<()> {
    let parsed = url::Url::parse(value)
        .map_err(|e| AppError::Config(format!("Invalid {} '{}': {}", what, value, e)))?;

    if parsed.scheme() != "https" {
        return Err(AppError::Config(format!(
            "{} must use HTTPS, got: {}",
            what,
            parsed.scheme()
        )));
    }

    Ok(())
}

fn validate_retry(what: &str, retry: &RetryConfig) -> Result<()> {
    if retry.max_attempts == 0 {
        return Err(AppError::Config(format!(
            "{} retry max_attempts must be at least 1",
            what
        )));
    }
    if retry.max_delay_ms < retry.base_delay_ms {
        return Err(AppError::Config(format!(
            "{} retry max_delay_ms ({}) is smaller than base_delay_ms ({})",
            what, retry.max_delay_ms, retry.base_delay_ms
        )));
    }
    Ok(())
}

fn validate_database(database: &DatabaseConfig) -> Result<()> {
    // Check if any database field contains unexpanded environment variables
    let fields_to_check = [
        ("DB_HOST", &database.host),
        ("DB_NAME", &database.name),
        ("DB_USER", &database.user),
        ("DB_PASSWORD", &database.password),
    ];

    for (field_name, value) in &fields_to_check {
        if value.contains("${") {
            return Err(AppError::Config(format!(
                "{} environment variable is not set. \
                 Please set it or create a .env file. \
                 See .env.example for required variables.",
                field_name
            )));
        }
    }

    if database.host.is_empty() {
        return Err(AppError::Config(
            "Database host cannot be empty".to_string(),
        ));
    }

    if database.name.is_empty() {
        return Err(AppError::Config(
            "Database name cannot be empty".to_string(),
        ));
    }

    if database.user.is_empty() {
        return Err(AppError::Config(
            "Database user cannot be empty".to_string(),
        ));
    }

    if database.port == 0 {
        return Err(AppError::Config("Database port cannot be 0".to_string()));
    }

    if database.max_connections == 0 {
        return Err(AppError::Config(
            "Database max_connections must be at least 1".to_string(),
        ));
    }

    Ok(())
}

fn expand_env_vars(content: &str) -> Result<String> {
    let mut result = content.to_string();
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| AppError::Config(format!("Env pattern error: {}", e)))?;

    let mut missing_vars = Vec::new();

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        match std::env::var(var_name) {
            Ok(value) => {
                result = result.replace(&cap[0], &value);
            }
            Err(_) => {
                missing_vars.push(var_name.to_string());
            }
        }
    }

    if !missing_vars.is_empty() {
        return Err(AppError::Config(format!(
            "Missing required environment variable{}: {}\n\n\
             To fix this:\n\
             1. Create a .env file in the project root (copy .env.example)\n\
             2. Set the missing variable{}: export {}=<value>\n\
             3. Or set {} in your environment before running",
            if missing_vars.len() > 1 { "s" } else { "" },
            missing_vars.join(", "),
            if missing_vars.len() > 1 { "s" } else { "" },
            missing_vars[0],
            missing_vars.join(", ")
        )));
    }

    Ok(result)
}
