//! Configuration structures for Wampline
//!
//! This module defines the configuration shared by callers and the master.
//! Configurations are loaded from YAML files or from `WAMPLINE_*` environment
//! variables.

use crate::error::{Result, WampError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable prefix for [`WamplineConfig::from_env`]
pub const ENV_PREFIX: &str = "WAMPLINE";

/// Top-level configuration for Wampline components
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WamplineConfig {
    /// Caller configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Master configuration
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Caller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Time to wait for an RPC response before failing the call
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Master configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Opaque configuration forwarded verbatim to every joining worker
    #[serde(default)]
    pub worker_config: Map<String, Value>,

    /// Number of in-process workers started by the demo binary
    #[serde(default = "default_workers")]
    pub workers: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            worker_config: Map::new(),
            workers: default_workers(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable Prometheus metrics
    #[serde(default = "default_metrics")]
    pub enable_metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            enable_metrics: default_metrics(),
        }
    }
}

/// Default value functions
fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_workers() -> u32 {
    2
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics() -> bool {
    true
}

impl WamplineConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| WampError::Config(format!("Failed to read config file {}: {}", path.display(), e)))?;

        let config: WamplineConfig = serde_yaml::from_str(&content)
            .map_err(|e| WampError::Config(format!("Failed to parse config file {}: {}", path.display(), e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    ///
    /// Nested keys use a double underscore, e.g.
    /// `WAMPLINE_CLIENT__REQUEST_TIMEOUT_MS=5000`.
    pub fn from_env() -> Result<Self> {
        let config: WamplineConfig = config::Config::builder()
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.client.request_timeout_ms == 0 {
            return Err(WampError::config("client.request_timeout_ms must be greater than zero"));
        }

        match self.observability.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(WampError::config(format!("Invalid log level: {}", other)));
            }
        }

        Ok(())
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.client.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_are_valid() {
        let config = WamplineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert!(config.coordinator.worker_config.is_empty());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
client:
  request_timeout_ms: 2500
coordinator:
  workers: 4
  worker_config:
    network: testnet
    peers: [1, 2]
"#;
        let config: WamplineConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.request_timeout(), Duration::from_millis(2500));
        assert_eq!(config.coordinator.workers, 4);
        assert_eq!(config.coordinator.worker_config["network"], json!("testnet"));
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = WamplineConfig::default();
        config.client.request_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let mut config = WamplineConfig::default();
        config.observability.log_level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = WamplineConfig::from_file("/nonexistent/wampline.yaml").unwrap_err();
        assert_eq!(err.code(), "config");
    }
}
