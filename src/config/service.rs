//! Service configuration
//!
//! Loads the service configuration from a TOML file. Every field has a
//! default, so a missing file or a partial file is fine.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default configuration file name
pub const CONFIG_FILE: &str = "gaia.toml";

/// Default per-connection outbound queue size
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Errors that can occur during config operations
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Deployment environment name, reported by `/health`
    pub app_env: String,
    /// Address both listeners bind to
    pub bind: String,
    /// Port of the HTTP API
    pub http_port: u16,
    /// Port of the WebSocket endpoint
    pub ws_port: u16,
    /// Request path accepted by the WebSocket handshake
    pub ws_path: String,
    /// Outbound messages buffered per connection before it is dropped
    pub queue_capacity: usize,
    /// Period of the sample scheduled job, in seconds
    pub job_interval_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            app_env: "development".to_string(),
            bind: "127.0.0.1".to_string(),
            http_port: 8000,
            ws_port: 9000,
            ws_path: "/ws".to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            job_interval_secs: 30,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from a file, falling back to defaults if it does not exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: ServiceConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Check values that would make the service unusable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.ws_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "ws_path must start with '/', got {:?}",
                self.ws_path
            )));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.job_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "job_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.http_port == self.ws_port && self.http_port != 0 {
            return Err(ConfigError::Invalid(format!(
                "http_port and ws_port are both {}",
                self.http_port
            )));
        }
        Ok(())
    }

    /// Socket address of the HTTP API
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.bind, self.http_port)
    }

    /// Period of the sample scheduled job
    pub fn job_interval(&self) -> Duration {
        Duration::from_secs(self.job_interval_secs)
    }
}

/// Values taken from the environment or the command line
///
/// Anything set here wins over the configuration file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub app_env: Option<String>,
    pub bind: Option<String>,
    pub http_port: Option<u16>,
    pub ws_port: Option<u16>,
}

impl ConfigOverrides {
    /// Apply the overrides to a loaded configuration
    pub fn apply(self, mut config: ServiceConfig) -> ServiceConfig {
        if let Some(app_env) = self.app_env {
            config.app_env = app_env;
        }
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(port) = self.http_port {
            config.http_port = port;
        }
        if let Some(port) = self.ws_port {
            config.ws_port = port;
        }
        config
    }
}
