//! Configuration management
//!
//! Configuration is loaded from:
//! - config.yml file
//! - Environment variables (override file settings)
//!
//! Missing optional values are filled with sensible defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration as StdDuration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Device-linking configuration
    #[serde(default)]
    pub link: LinkConfig,
    /// Account/token configuration
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS allowed origin (`*` allows any)
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: default_cors_origin(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_cors_origin() -> String {
    "*".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database driver (sqlite or mysql)
    #[serde(default)]
    pub driver: DatabaseDriver,
    /// Database connection URL
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: DatabaseDriver::default(),
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "data/qrlink.db".to_string()
}

/// Database driver type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseDriver {
    /// SQLite (default)
    #[default]
    Sqlite,
    /// MySQL
    Mysql,
}

/// Device-linking configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// How long a freshly issued session can be claimed
    #[serde(default = "default_session_ttl")]
    pub session_ttl_seconds: u64,
    /// How long consumed/expired sessions are kept past `expires_at`
    #[serde(default = "default_sweep_grace")]
    pub sweep_grace_seconds: u64,
    /// Interval between reaper runs
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    /// Upper bound on any single store operation
    #[serde(default = "default_store_timeout")]
    pub store_timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            session_ttl_seconds: default_session_ttl(),
            sweep_grace_seconds: default_sweep_grace(),
            sweep_interval_seconds: default_sweep_interval(),
            store_timeout_ms: default_store_timeout(),
        }
    }
}

fn default_session_ttl() -> u64 {
    120
}

fn default_sweep_grace() -> u64 {
    600
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_store_timeout() -> u64 {
    5000
}

impl LinkConfig {
    /// Session time-to-live
    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_ttl_seconds as i64)
    }

    /// Retention window after `expires_at`
    pub fn sweep_grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.sweep_grace_seconds as i64)
    }

    /// Reaper tick interval
    pub fn sweep_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.sweep_interval_seconds.max(1))
    }

    /// Store operation timeout
    pub fn store_timeout(&self) -> StdDuration {
        StdDuration::from_millis(self.store_timeout_ms)
    }
}

/// Account/token configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Access token lifetime in hours
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_ttl_hours: default_token_ttl_hours(),
        }
    }
}

fn default_token_ttl_hours() -> i64 {
    7 * 24
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError { path: String, message: String },
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl Config {
    /// Load configuration from file
    ///
    /// If the file doesn't exist, returns default configuration.
    /// If the file exists but is invalid YAML, returns an error with details.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError {
                path: path.display().to_string(),
                message: format_yaml_error(&e),
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file with environment variable overrides
    ///
    /// Environment variables follow the pattern:
    /// - QRLINK_SERVER_HOST
    /// - QRLINK_SERVER_PORT
    /// - QRLINK_SERVER_CORS_ORIGIN
    /// - QRLINK_DATABASE_DRIVER
    /// - QRLINK_DATABASE_URL
    /// - QRLINK_LINK_SESSION_TTL_SECONDS
    /// - QRLINK_LINK_SWEEP_GRACE_SECONDS
    /// - QRLINK_LINK_SWEEP_INTERVAL_SECONDS
    /// - QRLINK_LINK_STORE_TIMEOUT_MS
    /// - QRLINK_AUTH_TOKEN_TTL_HOURS
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would break the session lifecycle
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.link.session_ttl_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "link.session_ttl_seconds must be greater than 0".to_string(),
            ));
        }
        if self.link.sweep_interval_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "link.sweep_interval_seconds must be greater than 0".to_string(),
            ));
        }
        if self.link.store_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "link.store_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.auth.token_ttl_hours <= 0 {
            return Err(ConfigError::ValidationError(
                "auth.token_ttl_hours must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply environment variable overrides to the configuration
    fn apply_env_overrides(&mut self) {
        // Server configuration
        if let Ok(host) = std::env::var("QRLINK_SERVER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = env_parse::<u16>("QRLINK_SERVER_PORT") {
            self.server.port = port;
        }
        if let Ok(cors_origin) = std::env::var("QRLINK_SERVER_CORS_ORIGIN") {
            self.server.cors_origin = cors_origin;
        }

        // Database configuration
        if let Ok(driver) = std::env::var("QRLINK_DATABASE_DRIVER") {
            match driver.to_lowercase().as_str() {
                "sqlite" => self.database.driver = DatabaseDriver::Sqlite,
                "mysql" => self.database.driver = DatabaseDriver::Mysql,
                _ => {} // Ignore invalid values
            }
        }
        if let Ok(url) = std::env::var("QRLINK_DATABASE_URL") {
            self.database.url = url;
        }

        // Link configuration
        if let Some(ttl) = env_parse::<u64>("QRLINK_LINK_SESSION_TTL_SECONDS") {
            self.link.session_ttl_seconds = ttl;
        }
        if let Some(grace) = env_parse::<u64>("QRLINK_LINK_SWEEP_GRACE_SECONDS") {
            self.link.sweep_grace_seconds = grace;
        }
        if let Some(interval) = env_parse::<u64>("QRLINK_LINK_SWEEP_INTERVAL_SECONDS") {
            self.link.sweep_interval_seconds = interval;
        }
        if let Some(timeout) = env_parse::<u64>("QRLINK_LINK_STORE_TIMEOUT_MS") {
            self.link.store_timeout_ms = timeout;
        }

        // Auth configuration
        if let Some(hours) = env_parse::<i64>("QRLINK_AUTH_TOKEN_TTL_HOURS") {
            self.auth.token_ttl_hours = hours;
        }
    }
}

/// Read and parse an environment variable, ignoring unparsable values
fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

// Shared mutex for all config tests that modify environment variables.
#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
const ENV_KEYS: &[&str] = &[
    "QRLINK_SERVER_HOST",
    "QRLINK_SERVER_PORT",
    "QRLINK_SERVER_CORS_ORIGIN",
    "QRLINK_DATABASE_DRIVER",
    "QRLINK_DATABASE_URL",
    "QRLINK_LINK_SESSION_TTL_SECONDS",
    "QRLINK_LINK_SWEEP_GRACE_SECONDS",
    "QRLINK_LINK_SWEEP_INTERVAL_SECONDS",
    "QRLINK_LINK_STORE_TIMEOUT_MS",
    "QRLINK_AUTH_TOKEN_TTL_HOURS",
];


/// Property-based tests for configuration parsing
#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        /// Serializing a config and parsing it back preserves every field.
        #[test]
        fn config_yaml_roundtrip(
            port in 1u16..,
            ttl in 1u64..86_400,
            grace in 0u64..86_400,
            timeout in 1u64..60_000,
            hours in 1i64..10_000,
        ) {
            let mut config = Config::default();
            config.server.port = port;
            config.link.session_ttl_seconds = ttl;
            config.link.sweep_grace_seconds = grace;
            config.link.store_timeout_ms = timeout;
            config.auth.token_ttl_hours = hours;

            let yaml = serde_yaml::to_string(&config).unwrap();
            let parsed: Config = serde_yaml::from_str(&yaml).unwrap();

            prop_assert_eq!(parsed.server.port, port);
            prop_assert_eq!(parsed.link, config.link);
            prop_assert_eq!(parsed.auth, config.auth);
        }
    }
}
