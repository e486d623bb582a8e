//! Main application configuration
//!
//! This module defines the primary configuration structures for the duel-room
//! matchmaking service, including environment and file loading and validation.

use crate::error::MatchmakingError;
use crate::store::DEFAULT_QUEUE_TIMEOUT_MS;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceSettings,
    pub matchmaking: MatchmakingSettings,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name for logging and metrics
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Interface the WebSocket listener binds to
    pub ws_host: String,
    /// Port for client WebSocket connections
    pub ws_port: u16,
    /// Port for health and metrics endpoints
    pub metrics_port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
}

/// Matchmaking-specific settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakingSettings {
    /// Maximum time a user stays in the waiting queue, in milliseconds
    pub queue_timeout_ms: u64,
    /// How often matchmaker stats are pushed into the gauges
    pub stats_interval_seconds: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "duel-room".to_string(),
            log_level: "info".to_string(),
            ws_host: "0.0.0.0".to_string(),
            ws_port: 6000,
            metrics_port: 8080,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl Default for MatchmakingSettings {
    fn default() -> Self {
        Self {
            queue_timeout_ms: DEFAULT_QUEUE_TIMEOUT_MS as u64,
            stats_interval_seconds: 30,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let mut config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.apply_env()?;

        validate_config(&config)?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        // Service settings
        if let Ok(name) = env::var("SERVICE_NAME") {
            self.service.name = name;
        }
        if let Ok(log_level) = env::var("LOG_LEVEL") {
            self.service.log_level = log_level;
        }
        if let Ok(host) = env::var("WS_HOST") {
            self.service.ws_host = host;
        }
        if let Ok(port) = env::var("WS_PORT") {
            self.service.ws_port = port
                .parse()
                .map_err(|_| invalid(format!("Invalid WS_PORT value: {}", port)))?;
        }
        if let Ok(port) = env::var("METRICS_PORT") {
            self.service.metrics_port = port
                .parse()
                .map_err(|_| invalid(format!("Invalid METRICS_PORT value: {}", port)))?;
        }
        if let Ok(timeout) = env::var("SHUTDOWN_TIMEOUT_SECONDS") {
            self.service.shutdown_timeout_seconds = timeout
                .parse()
                .map_err(|_| {
                    invalid(format!("Invalid SHUTDOWN_TIMEOUT_SECONDS value: {}", timeout))
                })?;
        }

        // Matchmaking settings
        if let Ok(timeout) = env::var("QUEUE_TIMEOUT_MS") {
            self.matchmaking.queue_timeout_ms = timeout
                .parse()
                .map_err(|_| {
                    invalid(format!("Invalid QUEUE_TIMEOUT_MS value: {}", timeout))
                })?;
        }
        if let Ok(interval) = env::var("STATS_INTERVAL_SECONDS") {
            self.matchmaking.stats_interval_seconds = interval
                .parse()
                .map_err(|_| {
                    invalid(format!("Invalid STATS_INTERVAL_SECONDS value: {}", interval))
                })?;
        }

        Ok(())
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.service.shutdown_timeout_seconds)
    }

    /// Get queue timeout as Duration
    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.matchmaking.queue_timeout_ms)
    }

    /// Get stats interval as Duration
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.matchmaking.stats_interval_seconds)
    }

    /// Address the WebSocket listener binds to
    pub fn ws_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.service.ws_host, self.service.ws_port)
            .parse()
            .map_err(|_| {
                anyhow!(
                    "Invalid WebSocket address: {}:{}",
                    self.service.ws_host,
                    self.service.ws_port
                )
            })
    }

    /// Readiness endpoint of an instance running with this configuration
    pub fn readiness_url(&self) -> String {
        let host = match self.service.ws_host.as_str() {
            "0.0.0.0" => "127.0.0.1",
            "::" => "[::1]",
            host => host,
        };
        format!("http://{}:{}/ready", host, self.service.metrics_port)
    }
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    // Validate log level
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => {
            return Err(invalid(format!(
                "Invalid log level: {}",
                config.service.log_level
            )))
        }
    }

    // Validate ports
    if config.service.ws_port == 0 {
        return Err(invalid("WebSocket port cannot be 0"));
    }
    if config.service.metrics_port == 0 {
        return Err(invalid("Metrics port cannot be 0"));
    }
    if config.service.ws_port == config.service.metrics_port {
        return Err(invalid(format!(
            "WebSocket and metrics ports must differ (both {})",
            config.service.ws_port
        )));
    }
    if let Err(e) = config.ws_addr() {
        return Err(invalid(e.to_string()));
    }

    // Validate timeouts
    if config.service.shutdown_timeout_seconds == 0 {
        return Err(invalid("Shutdown timeout must be greater than 0"));
    }
    if config.matchmaking.queue_timeout_ms == 0 {
        return Err(invalid("Queue timeout must be greater than 0"));
    }
    if config.matchmaking.stats_interval_seconds == 0 {
        return Err(invalid("Stats interval must be greater than 0"));
    }

    Ok(())
}

fn invalid(message: impl Into<String>) -> anyhow::Error {
    MatchmakingError::ConfigurationError {
        message: message.into(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.service.ws_port, 6000);
        assert_eq!(config.queue_timeout(), Duration::from_secs(60));
        assert_eq!(config.ws_addr().unwrap().port(), 6000);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut config = AppConfig::default();
        config.service.log_level = "loud".to_string();
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.matchmaking.queue_timeout_ms = 0;
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.service.metrics_port = config.service.ws_port;
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.service.ws_host = "not a host".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validation_failures_are_configuration_errors() {
        let mut config = AppConfig::default();
        config.service.ws_port = 0;

        let error = validate_config(&config).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<MatchmakingError>(),
            Some(MatchmakingError::ConfigurationError { .. })
        ));
        assert_eq!(error.to_string(), "Configuration error: WebSocket port cannot be 0");
    }

    #[test]
    fn test_readiness_url_targets_local_metrics_port() {
        let mut config = AppConfig::default();
        assert_eq!(config.readiness_url(), "http://127.0.0.1:8080/ready");

        config.service.ws_host = "10.0.0.5".to_string();
        config.service.metrics_port = 9100;
        assert_eq!(config.readiness_url(), "http://10.0.0.5:9100/ready");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [matchmaking]
            queue_timeout_ms = 5000
            "#,
        )
        .unwrap();

        assert_eq!(config.matchmaking.queue_timeout_ms, 5000);
        assert_eq!(config.matchmaking.stats_interval_seconds, 30);
        assert_eq!(config.service.name, "duel-room");
    }
}
