//! Server configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tally_core::{Bucketing, DEFAULT_VACUUM_EVERY, RegistryOptions};

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server settings.
    pub server: ServerConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Sync cycle settings.
    pub sync: SyncConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return any errors.
    ///
    /// This checks:
    /// - Server bind address is valid (host:port format)
    /// - Storage path is not empty
    /// - Sync interval, vacuum cadence and bucket size are within bounds
    ///
    /// # Example
    ///
    /// ```
    /// use tally_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.sync.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError::new(
                "server.bind",
                "bind address cannot be empty",
            ));
            return errors;
        }

        let Some((host, port)) = self.bind.rsplit_once(':') else {
            errors.push(ValidationError::new(
                "server.bind",
                format!(
                    "invalid bind address '{}': expected format 'host:port'",
                    self.bind
                ),
            ));
            return errors;
        };

        if host.is_empty() {
            errors.push(ValidationError::new("server.bind", "host cannot be empty"));
        }
        match port.parse::<u16>() {
            Ok(0) => errors.push(ValidationError::new("server.bind", "port cannot be 0")),
            Err(_) => errors.push(ValidationError::new(
                "server.bind",
                format!("invalid port '{}': must be a number 1-65535", port),
            )),
            Ok(_) => {}
        }

        errors
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: tally_store::default_db_path(),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.path",
                "database path cannot be empty",
            ));
        }

        errors
    }
}

/// Minimum sync interval in seconds.
pub const MIN_SYNC_INTERVAL: u64 = 1;
/// Maximum sync interval in seconds (1 hour).
pub const MAX_SYNC_INTERVAL: u64 = 3600;
/// Seconds in a day; bucket sizes must divide it.
const SECS_PER_DAY: u64 = 86_400;

/// Sync cycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between sync cycles.
    pub interval_secs: u64,
    /// Compact flushed series every this many cycles.
    pub vacuum_every: u32,
    /// Bucket size in seconds for aggregated rows.
    pub bucket_secs: u64,
    /// Run one last cycle when the service shuts down.
    pub flush_on_shutdown: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            vacuum_every: DEFAULT_VACUUM_EVERY,
            bucket_secs: 3600,
            flush_on_shutdown: true,
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Registry options derived from this configuration.
    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            vacuum_every: self.vacuum_every,
            bucketing: Bucketing::new(Duration::from_secs(self.bucket_secs)),
        }
    }

    /// Validate sync configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !(MIN_SYNC_INTERVAL..=MAX_SYNC_INTERVAL).contains(&self.interval_secs) {
            errors.push(ValidationError::new(
                "sync.interval_secs",
                format!(
                    "interval {} is out of range ({}-{} seconds)",
                    self.interval_secs, MIN_SYNC_INTERVAL, MAX_SYNC_INTERVAL
                ),
            ));
        }

        if self.vacuum_every == 0 {
            errors.push(ValidationError::new(
                "sync.vacuum_every",
                "vacuum_every must be at least 1",
            ));
        }

        if self.bucket_secs == 0 || self.bucket_secs > SECS_PER_DAY {
            errors.push(ValidationError::new(
                "sync.bucket_secs",
                format!(
                    "bucket size {} is out of range (1-{} seconds)",
                    self.bucket_secs, SECS_PER_DAY
                ),
            ));
        } else if SECS_PER_DAY % self.bucket_secs != 0 {
            errors.push(ValidationError::new(
                "sync.bucket_secs",
                format!("bucket size {} does not divide a day", self.bucket_secs),
            ));
        }

        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind` or `sync.bucket_secs`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tally")
        .join("server.toml")
}
