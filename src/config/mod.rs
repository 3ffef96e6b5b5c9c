//! # Configuration Management Module
//!
//! Centralized configuration for the sliplink engine: typed sections with
//! serde, sensible defaults, validation on load, and persistence of a
//! starter file for `sliplink init`.
//!
//! ## Configuration Structure
//!
//! - [`LinkConfig`] - Serial device and reassembly engine settings
//! - [`LoggingConfig`] - Logging and debugging settings
//!
//! ## Configuration File Format
//!
//! Sliplink uses TOML for human-readable configuration:
//!
//! ```toml
//! [link]
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//! ring_capacity = 2048
//! flow_control = "none"        # or "xon-xoff"
//! read_timeout_ms = 50
//! stats_interval_secs = 0      # 0 disables the periodic counter summary
//!
//! [logging]
//! level = "info"
//! file = "sliplink.log"
//! ```
//!
//! CLI arguments override file values, which override the built-in defaults.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::slip::ring::MIN_CAPACITY;
use crate::slip::FlowControl;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Serial device path, e.g. `/dev/ttyUSB0`. May be left empty and given
    /// on the command line instead.
    #[serde(default)]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Reassembly ring size in bytes. Must be large enough for the biggest
    /// expected frame after escaping, plus its delimiter, plus one reserved
    /// slot.
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,
    #[serde(default)]
    pub flow_control: FlowControl,
    /// Serial read timeout in milliseconds. Short values keep shutdown and
    /// transmit responsive; long values waste less CPU on idle links.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Seconds between counter summary log lines while attached. 0 disables.
    #[serde(default)]
    pub stats_interval_secs: u64,
}

fn default_baud_rate() -> u32 {
    115200
}

fn default_ring_capacity() -> usize {
    2048
}

fn default_read_timeout_ms() -> u64 {
    50
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            port: String::new(),
            baud_rate: default_baud_rate(),
            ring_capacity: default_ring_capacity(),
            flow_control: FlowControl::None,
            read_timeout_ms: default_read_timeout_ms(),
            stats_interval_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            file: Some("sliplink.log".to_string()),
        }
    }
}

impl Config {
    /// Load configuration from a file and validate it.
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file.
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.link.baud_rate == 0 {
            return Err(anyhow!("link.baud_rate must be non-zero"));
        }
        if self.link.ring_capacity < MIN_CAPACITY {
            return Err(anyhow!(
                "link.ring_capacity {} is below the minimum of {}",
                self.link.ring_capacity,
                MIN_CAPACITY
            ));
        }
        if self.link.read_timeout_ms == 0 || self.link.read_timeout_ms > 5000 {
            return Err(anyhow!(
                "link.read_timeout_ms must be between 1 and 5000, got {}",
                self.link.read_timeout_ms
            ));
        }
        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => Ok(()),
            other => Err(anyhow!("logging.level '{}' is not a log level", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.link.baud_rate, 115200);
        assert_eq!(config.link.ring_capacity, 2048);
        assert_eq!(config.link.flow_control, FlowControl::None);
    }

    #[test]
    fn flow_control_uses_kebab_case() {
        let toml = "[link]\nflow_control = \"xon-xoff\"\n";
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.link.flow_control, FlowControl::XonXoff);

        let out = toml::to_string(&config).unwrap();
        assert!(out.contains("xon-xoff"));
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn undersized_ring_is_rejected() {
        let mut config = Config::default();
        config.link.ring_capacity = 4;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("ring_capacity"));
    }

    #[test]
    fn bad_log_level_is_rejected() {
        let mut config = Config::default();
        config.logging.level = "chatty".to_string();
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn create_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let path = path.to_str().unwrap();

        Config::create_default(path).await.unwrap();
        let loaded = Config::load(path).await.unwrap();
        assert_eq!(loaded.link.ring_capacity, 2048);
    }

    #[tokio::test]
    async fn load_reports_missing_file() {
        let err = Config::load("/nonexistent/sliplink.toml")
            .await
            .unwrap_err()
            .to_string();
        assert!(err.contains("Failed to read config file"));
    }
}
