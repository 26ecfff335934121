//! # Configuration Management
//!
//! Settings for the relay hub: listen address, shutdown behaviour, whitelist and logging.
//!
//! ## Configuration Sources
//! - TOML files via [`RelayConfig::from_file`]
//! - Environment variables via [`RelayConfig::from_env`]
//! - Direct instantiation with defaults
//!
//! ## Environment Variables
//! | Variable | Meaning |
//! |----------|---------|
//! | `RELAY_ADDRESS` | full listen address, e.g. `0.0.0.0:27200` |
//! | `HOST` or `IP`, `PORT` | listen host and port, used when `RELAY_ADDRESS` is unset |
//! | `WHITELIST` | `ip:port,ip:port` list of admitted public peers |
//! | `WHITELIST_FILE` | JSON file holding `[{"ip": "...", "port": ...}]` |
//! | `LOG_LEVEL` | `trace`, `debug`, `info`, `warn` or `error` |
//! | `LOG_FORMAT` | `text` or `json` |
//! | `RELAY_SHUTDOWN_TIMEOUT_MS` | graceful shutdown budget in milliseconds |

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::error::{RelayError, Result};
use crate::transport::whitelist::{Whitelist, WhitelistEntry};

/// Listen address used when nothing else is configured
pub const DEFAULT_ADDRESS: &str = "0.0.0.0:27200";

/// Default graceful shutdown budget
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 27200;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub whitelist: WhitelistConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RelayConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(&path).map_err(|e| {
            RelayError::ConfigError(format!(
                "Failed to read config file {}: {e}",
                path.as_ref().display()
            ))
        })?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| RelayError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables, starting from defaults.
    ///
    /// Unparseable numeric values are reported rather than silently ignored.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("RELAY_ADDRESS") {
            config.server.address = addr;
        } else {
            let host = std::env::var("HOST")
                .or_else(|_| std::env::var("IP"))
                .unwrap_or_else(|_| DEFAULT_HOST.to_string());
            let port = match std::env::var("PORT") {
                Ok(port) => port
                    .trim()
                    .parse::<u16>()
                    .map_err(|_| RelayError::ConfigError(format!("Invalid PORT: {port}")))?,
                Err(_) => DEFAULT_PORT,
            };
            config.server.address = join_host_port(&host, port);
        }

        if let Ok(timeout) = std::env::var("RELAY_SHUTDOWN_TIMEOUT_MS") {
            let millis = timeout.trim().parse::<u64>().map_err(|_| {
                RelayError::ConfigError(format!("Invalid RELAY_SHUTDOWN_TIMEOUT_MS: {timeout}"))
            })?;
            config.server.shutdown_timeout = Duration::from_millis(millis);
        }

        if let Ok(list) = std::env::var("WHITELIST") {
            config.whitelist.entries = Whitelist::parse_list(&list)?;
        }

        if let Ok(file) = std::env::var("WHITELIST_FILE") {
            if !file.trim().is_empty() {
                config.whitelist.file = Some(PathBuf::from(file));
            }
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.logging.log_level = Level::from_str(level.trim())
                .map_err(|_| RelayError::ConfigError(format!("Invalid LOG_LEVEL: {level}")))?;
        }

        if let Ok(format) = std::env::var("LOG_FORMAT") {
            config.logging.json_format = match format.trim().to_ascii_lowercase().as_str() {
                "json" => true,
                "text" | "" => false,
                other => {
                    return Err(RelayError::ConfigError(format!(
                        "Invalid LOG_FORMAT: {other} (expected 'text' or 'json')"
                    )))
                }
            };
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Validate the configuration.
    ///
    /// Returns a list of problems. Empty list means the configuration is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.whitelist.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(RelayError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }

    /// Build the whitelist from inline entries plus the optional JSON file.
    pub fn load_whitelist(&self) -> Result<Whitelist> {
        let mut entries: Vec<WhitelistEntry> = self
            .whitelist
            .entries
            .iter()
            .map(|entry| WhitelistEntry::new(entry.ip, entry.port))
            .collect();

        if let Some(file) = &self.whitelist.file {
            for entry in Whitelist::load_json_file(file)? {
                if !entries.contains(&entry) {
                    entries.push(entry);
                }
            }
        }

        Ok(Whitelist::new(entries))
    }
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Server listen address (e.g., "0.0.0.0:27200")
    pub address: String,

    /// Time allowed for open connections to wind down after a shutdown request
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from(DEFAULT_ADDRESS),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:27200')",
                self.address
            ));
        }

        if self.shutdown_timeout.is_zero() {
            errors.push("Shutdown timeout must be greater than 0".to_string());
        } else if self.shutdown_timeout.as_secs() > 300 {
            errors.push("Shutdown timeout too long (maximum: 300s)".to_string());
        }

        errors
    }
}

/// Admitted public peers
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct WhitelistConfig {
    /// Inline `(ip, port)` pairs
    pub entries: Vec<WhitelistEntry>,

    /// JSON file with additional entries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl WhitelistConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if let Some(file) = &self.file {
            if !file.is_file() {
                errors.push(format!("Whitelist file does not exist: {}", file.display()));
            }
        }

        for entry in &self.entries {
            if entry.port == 0 {
                errors.push(format!("Whitelist entry {} has port 0", entry.ip));
            }
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level, overridden by `RUST_LOG` when set
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

fn join_host_port(host: &str, port: u16) -> String {
    let host = host.trim();
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
