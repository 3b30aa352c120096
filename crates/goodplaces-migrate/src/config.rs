//! Configuration loading from file and environment variables.

use goodplaces_db::DbRuntimeSettings;
use goodplaces_ledger::{RunOptions, TransactionMode};
use serde::Deserialize;
use thiserror::Error;

/// Config file used when neither `--config` nor `GOODPLACES_CONFIG_PATH`
/// is given.
pub const DEFAULT_CONFIG_PATH: &str = "goodplaces.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Migration run settings.
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum pooled connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Migration run configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LedgerConfig {
    /// `per-unit` commits after every revision; `per-run` commits once.
    #[serde(default)]
    pub transaction_mode: TransactionMode,

    /// Name recorded in the lock table. A random one is generated per
    /// process when unset.
    #[serde(default)]
    pub lock_owner: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "goodplaces_ledger=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_db_path() -> String {
    "goodplaces.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    DbRuntimeSettings::default().busy_timeout_ms
}

fn default_pool_max_size() -> u32 {
    DbRuntimeSettings::default().pool_max_size
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl DatabaseConfig {
    /// Pool settings for [`goodplaces_db::create_pool`].
    pub fn runtime_settings(&self) -> DbRuntimeSettings {
        DbRuntimeSettings {
            busy_timeout_ms: self.busy_timeout_ms,
            pool_max_size: self.pool_max_size,
        }
    }
}

impl LedgerConfig {
    /// Runner options, generating a lock owner when none is configured.
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            transaction_mode: self.transaction_mode,
            lock_owner: self
                .lock_owner
                .clone()
                .unwrap_or_else(|| format!("goodplaces-migrate-{}", uuid::Uuid::new_v4())),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// An environment override holds a value the setting does not accept.
    #[error("invalid value '{value}' for {variable}")]
    InvalidOverride {
        /// The environment variable.
        variable: &'static str,
        /// Its value.
        value: String,
    },
}

/// Picks the config path: the `--config` flag, then
/// `GOODPLACES_CONFIG_PATH`, then [`DEFAULT_CONFIG_PATH`]. Also returns
/// where the path came from, for logging.
pub fn resolve_config_path(flag: Option<&str>) -> (String, &'static str) {
    if let Some(path) = flag.filter(|value| !value.trim().is_empty()) {
        return (path.to_string(), "cli-arg");
    }

    if let Ok(path) = std::env::var("GOODPLACES_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (path, "env-var");
        }
    }

    (DEFAULT_CONFIG_PATH.to_string(), "default")
}

/// Loads configuration from a TOML file, falling back to defaults when the
/// file does not exist.
///
/// Environment variable overrides:
/// - `GOODPLACES_DB_PATH` overrides `database.path`
/// - `GOODPLACES_TRANSACTION_MODE` overrides `ledger.transaction_mode`
/// - `GOODPLACES_LOCK_OWNER` overrides `ledger.lock_owner`
/// - `GOODPLACES_LOG_LEVEL` overrides `logging.level`
/// - `GOODPLACES_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed,
/// or an override is malformed.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let config = match std::fs::read_to_string(path) {
        Ok(contents) => toml::from_str(&contents)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
        Err(e) => return Err(ConfigError::FileRead(e)),
    };
    apply_overrides(config, |name| std::env::var(name).ok())
}

/// Applies environment overrides read through `lookup`.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidOverride`] for an unknown transaction mode.
pub fn apply_overrides<F>(mut config: Config, lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(db_path) = lookup("GOODPLACES_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(mode) = lookup("GOODPLACES_TRANSACTION_MODE") {
        config.ledger.transaction_mode = match mode.trim() {
            "per-unit" => TransactionMode::PerUnit,
            "per-run" => TransactionMode::PerRun,
            _ => {
                return Err(ConfigError::InvalidOverride {
                    variable: "GOODPLACES_TRANSACTION_MODE",
                    value: mode,
                })
            }
        };
    }
    if let Some(owner) = lookup("GOODPLACES_LOCK_OWNER") {
        config.ledger.lock_owner = Some(owner);
    }
    if let Some(level) = lookup("GOODPLACES_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("GOODPLACES_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    Ok(config)
}
