//! Server configuration module.
//!
//! Provides the top-level configuration for the gateway process and the
//! loader that reads it from YAML, TOML or JSON files.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use tradewire_gateway::GatewayConfig;

use crate::logging::LogConfig;

/// Server configuration.
///
/// Contains all settings needed to start and run the gateway process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listener configuration.
    #[serde(default)]
    pub server: ListenConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LogConfig,

    /// Gateway configuration.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Shutdown configuration.
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

impl ServerConfig {
    /// Applies environment variable overrides.
    ///
    /// Recognized variables:
    /// - `TRADEWIRE_HOST`
    /// - `TRADEWIRE_PORT`, falling back to `PORT`
    /// - `TRADEWIRE_JWT_SECRET`, falling back to `JWT_SECRET`
    /// - `TRADEWIRE_LOG_LEVEL`
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let first = |keys: &[&str]| keys.iter().find_map(|key| lookup(key));

        if let Some(host) = first(&["TRADEWIRE_HOST"]) {
            self.server.host = host;
        }
        if let Some(port) = first(&["TRADEWIRE_PORT", "PORT"]).and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Some(secret) = first(&["TRADEWIRE_JWT_SECRET", "JWT_SECRET"]) {
            self.gateway.jwt.secret = secret;
        }
        if let Some(level) = first(&["TRADEWIRE_LOG_LEVEL"]) {
            self.logging.level = level;
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "server.host".to_string(),
                reason: "cannot be empty".to_string(),
            });
        }
        if self.logging.level.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "logging.level".to_string(),
                reason: "cannot be empty".to_string(),
            });
        }
        self.gateway
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Returns the socket address string to bind.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Shutdown configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Timeout for graceful shutdown in seconds.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl ShutdownConfig {
    /// Returns the shutdown timeout as a Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigFormat {
    /// YAML format (.yaml, .yml)
    #[default]
    Yaml,
    /// TOML format (.toml)
    Toml,
    /// JSON format (.json)
    Json,
}

impl ConfigFormat {
    /// Detects the format from a file extension.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| match ext.to_lowercase().as_str() {
                "yaml" | "yml" => Some(Self::Yaml),
                "toml" => Some(Self::Toml),
                "json" => Some(Self::Json),
                _ => None,
            })
    }
}

/// Loads configuration files, detecting the format from the extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file format is not recognized
    /// - The file cannot be read
    /// - The content cannot be parsed
    pub fn load_file<T, P>(path: P) -> Result<T, ConfigError>
    where
        T: DeserializeOwned,
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path).ok_or_else(|| ConfigError::InvalidFormat {
            path: path.display().to_string(),
            reason: "Unrecognized file extension. Supported: .yaml, .yml, .toml, .json".to_string(),
        })?;

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Self::load_str(&content, format).map_err(|e| match e {
            ConfigError::InvalidFormat { reason, .. } => ConfigError::InvalidFormat {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }

    /// Loads configuration from a string with the specified format.
    ///
    /// # Errors
    ///
    /// Returns an error if the content cannot be parsed.
    pub fn load_str<T>(content: &str, format: ConfigFormat) -> Result<T, ConfigError>
    where
        T: DeserializeOwned,
    {
        let invalid = |reason: String| ConfigError::InvalidFormat {
            path: "<string>".to_string(),
            reason,
        };

        match format {
            ConfigFormat::Yaml => {
                serde_yaml::from_str(content).map_err(|e| invalid(format!("YAML parse error: {e}")))
            }
            ConfigFormat::Toml => {
                toml::from_str(content).map_err(|e| invalid(format!("TOML parse error: {e}")))
            }
            ConfigFormat::Json => {
                serde_json::from_str(content).map_err(|e| invalid(format!("JSON parse error: {e}")))
            }
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("[Config] Failed to read file '{path}': {reason}")]
    FileReadError {
        /// Path to the configuration file.
        path: String,
        /// Reason for the read failure.
        reason: String,
    },

    /// Configuration content could not be parsed.
    #[error("[Config] Invalid format in '{path}': {reason}")]
    InvalidFormat {
        /// Source of the content.
        path: String,
        /// Parser message.
        reason: String,
    },

    /// Configuration value is invalid.
    #[error("[Config] Invalid value for '{field}': {reason}")]
    InvalidValue {
        /// Field with the invalid value.
        field: String,
        /// Reason why the value is invalid.
        reason: String,
    },

    /// Gateway settings rejected.
    #[error("[Config] {0}")]
    Invalid(String),
}
