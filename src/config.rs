// Configuration File Support
//
// This module provides configuration file parsing for the codeguard service.
// Supports TOML format with environment variable overrides.
// The file path comes from --config, then CODEGUARD_CONFIG, then ./codeguard.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::codes::CodeConfig;
use crate::delivery::RetryConfig;
use crate::rate_limit::QuotaPolicy;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "CODEGUARD_CONFIG";

/// Config file used when nothing else is given
pub const DEFAULT_CONFIG_FILE: &str = "codeguard.toml";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Quota policy applied to every recipient
    pub policy: QuotaPolicy,

    /// Code generation and validity
    pub codes: CodeConfig,

    /// Delivery channel and retry settings
    pub delivery: DeliveryConfig,

    /// HTTP server
    pub server: ServerConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// Which transport carries codes to recipients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Write codes to the log (development)
    Log,
    /// POST codes to an HTTP endpoint
    Webhook,
}

impl std::str::FromStr for ChannelKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "log" => Ok(ChannelKind::Log),
            "webhook" => Ok(ChannelKind::Webhook),
            other => anyhow::bail!("Invalid delivery channel: {}. Must be 'log' or 'webhook'", other),
        }
    }
}

/// Delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeliveryConfig {
    pub channel: ChannelKind,

    /// Endpoint for the webhook channel
    pub url: Option<String>,

    /// Bearer token for the webhook channel
    pub auth_token: Option<String>,

    /// Base timeout per attempt in seconds
    pub timeout_secs: u64,

    /// Messages buffered between admission and the delivery worker
    pub queue_capacity: usize,

    pub retry: RetryConfig,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            channel: ChannelKind::Log,
            url: None,
            auth_token: None,
            timeout_secs: 10,
            queue_capacity: crate::delivery::dispatcher::DEFAULT_QUEUE_CAPACITY,
            retry: RetryConfig::default(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub bind: String,

    /// Seconds between expired-code and ledger cleanups
    pub housekeeping_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            housekeeping_interval_secs: 300,
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether to register metrics and serve /metrics
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Config {
    /// Load configuration from `explicit`, `CODEGUARD_CONFIG` or the default file
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config_path = Self::config_path(explicit);
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, or if
    /// the result does not validate. A missing file yields defaults (with
    /// environment overrides applied).
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;

            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        let config = config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Resolve the configuration file path
    pub fn config_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - CODEGUARD_LOG_LEVEL, CODEGUARD_LOG_FORMAT
    /// - CODEGUARD_MAX_PER_WINDOW, CODEGUARD_COOLDOWN_SECS, CODEGUARD_WINDOW_SECS
    /// - CODEGUARD_CODE_LENGTH, CODEGUARD_CODE_VALIDITY_SECS
    /// - CODEGUARD_DELIVERY_CHANNEL, CODEGUARD_WEBHOOK_URL, CODEGUARD_WEBHOOK_TOKEN
    /// - CODEGUARD_BIND, CODEGUARD_METRICS_ENABLED
    fn apply_env_overrides(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        // Logging overrides
        if let Some(level) = var("CODEGUARD_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("CODEGUARD_LOG_FORMAT") {
            self.logging.format = format;
        }

        // Policy overrides
        if let Some(max) = var("CODEGUARD_MAX_PER_WINDOW").and_then(|v| v.parse::<u32>().ok()) {
            if max > 0 {
                self.policy.max_per_window = max;
            }
        }
        if let Some(secs) = var("CODEGUARD_COOLDOWN_SECS").and_then(|v| v.parse::<u64>().ok()) {
            if secs > 0 {
                self.policy.cooldown_secs = secs;
            }
        }
        if let Some(secs) = var("CODEGUARD_WINDOW_SECS").and_then(|v| v.parse::<u64>().ok()) {
            if secs > 0 {
                self.policy.window_secs = secs;
            }
        }

        // Code overrides
        if let Some(length) = var("CODEGUARD_CODE_LENGTH").and_then(|v| v.parse::<usize>().ok()) {
            self.codes.length = length;
        }
        if let Some(secs) = var("CODEGUARD_CODE_VALIDITY_SECS").and_then(|v| v.parse::<u64>().ok()) {
            if secs > 0 {
                self.codes.validity_secs = secs;
            }
        }

        // Delivery overrides
        if let Some(channel) = var("CODEGUARD_DELIVERY_CHANNEL").and_then(|v| v.parse().ok()) {
            self.delivery.channel = channel;
        }
        if let Some(url) = var("CODEGUARD_WEBHOOK_URL") {
            self.delivery.url = Some(url);
        }
        if let Some(token) = var("CODEGUARD_WEBHOOK_TOKEN") {
            self.delivery.auth_token = Some(token);
        }

        // Server and metrics overrides
        if let Some(bind) = var("CODEGUARD_BIND") {
            self.server.bind = bind;
        }
        if let Some(enabled) = var("CODEGUARD_METRICS_ENABLED") {
            self.metrics.enabled = enabled.parse().unwrap_or(self.metrics.enabled);
        }

        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        // Validate logging level
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }

        // Validate logging format
        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                self.logging.format
            ),
        }

        self.policy.validate().context("Invalid [policy] section")?;
        self.codes.validate().context("Invalid [codes] section")?;

        // Validate delivery configuration
        if self.delivery.channel == ChannelKind::Webhook {
            match &self.delivery.url {
                None => anyhow::bail!("Webhook delivery requires [delivery] url"),
                Some(url) if !(url.starts_with("http://") || url.starts_with("https://")) => {
                    anyhow::bail!("Webhook url must start with http:// or https://, got {}", url)
                }
                Some(_) => {}
            }
        }
        if self.delivery.queue_capacity == 0 {
            anyhow::bail!("Delivery queue capacity must be > 0");
        }
        if self.delivery.timeout_secs == 0 {
            anyhow::bail!("Delivery timeout must be > 0 seconds");
        }

        // Validate server configuration
        self.bind_addr()?;
        if self.server.housekeeping_interval_secs == 0 {
            anyhow::bail!("Housekeeping interval must be > 0 seconds");
        }

        Ok(())
    }

    /// Parsed listen address
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server
            .bind
            .parse()
            .with_context(|| format!("Invalid bind address: {}", self.server.bind))
    }

    /// Convert log level string to tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.logging
            .level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }
}
