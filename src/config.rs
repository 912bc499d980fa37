// Configuration File Support
//
// TOML configuration for the relay with environment variable overrides.
// Configuration files are loaded from the XDG config directory:
// ~/.config/webhook-relay/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::webhooks::delivery::{
    DeliverySettings, DEFAULT_RESPONSE_BODY_LIMIT, DEFAULT_USER_AGENT,
};
use crate::webhooks::dispatcher::DEFAULT_MAX_IN_FLIGHT;
use crate::webhooks::model::NewWebhook;
use crate::webhooks::retry::{BackoffPolicy, DEFAULT_BACKOFF_UNIT_MS};
use crate::webhooks::validation;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Delivery executor configuration
    pub delivery: DeliveryConfig,

    /// Webhooks registered at startup
    pub webhooks: Vec<NewWebhook>,
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

/// Delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Per-attempt HTTP timeout in seconds
    pub request_timeout_secs: u64,

    /// User-Agent sent with every delivery
    pub user_agent: String,

    /// Backoff unit; the delay before attempt k+1 is unit * 2^k
    pub backoff_unit_ms: u64,

    /// Attempt sequences running at once per trigger
    pub max_in_flight: usize,

    /// Bytes of receiver response kept on the delivery row
    pub response_body_limit: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            backoff_unit_ms: DEFAULT_BACKOFF_UNIT_MS,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            response_body_limit: DEFAULT_RESPONSE_BODY_LIMIT,
        }
    }
}

impl Config {
    /// Load configuration from the default XDG config directory
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed or
    /// fails validation. A missing file yields the default configuration.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed or
    /// fails validation. A missing file yields the default configuration.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            let config = Self::default().apply_env_overrides();
            config.validate()?;
            return Ok(config);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file from {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file from {:?}", path))?;

        let config = config.apply_env_overrides();
        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/webhook-relay/config.toml` on Linux
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "webhook-relay") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home)
                .join(".config")
                .join("webhook-relay")
                .join("config.toml")
        }
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - WEBHOOK_RELAY_LOG_LEVEL
    /// - WEBHOOK_RELAY_LOG_FORMAT
    /// - WEBHOOK_RELAY_REQUEST_TIMEOUT_SECS
    /// - WEBHOOK_RELAY_BACKOFF_UNIT_MS
    /// - WEBHOOK_RELAY_MAX_IN_FLIGHT
    ///
    /// Unparseable or zero numeric values are ignored.
    fn apply_env_overrides(mut self) -> Self {
        if let Ok(level) = std::env::var("WEBHOOK_RELAY_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("WEBHOOK_RELAY_LOG_FORMAT") {
            self.logging.format = format;
        }

        if let Some(secs) = positive_env::<u64>("WEBHOOK_RELAY_REQUEST_TIMEOUT_SECS") {
            self.delivery.request_timeout_secs = secs;
        }
        if let Some(unit) = positive_env::<u64>("WEBHOOK_RELAY_BACKOFF_UNIT_MS") {
            self.delivery.backoff_unit_ms = unit;
        }
        if let Some(limit) = positive_env::<usize>("WEBHOOK_RELAY_MAX_IN_FLIGHT") {
            self.delivery.max_in_flight = limit;
        }

        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                self.logging.format
            ),
        }

        if self.delivery.request_timeout_secs == 0 {
            anyhow::bail!("Request timeout must be > 0");
        }
        if self.delivery.backoff_unit_ms == 0 {
            anyhow::bail!("Backoff unit must be > 0");
        }
        if self.delivery.max_in_flight == 0 {
            anyhow::bail!("max_in_flight must be > 0");
        }
        if self.delivery.user_agent.trim().is_empty() {
            anyhow::bail!("User agent must not be empty");
        }

        for (index, webhook) in self.webhooks.iter().enumerate() {
            validation::validate_new(webhook)
                .with_context(|| format!("Invalid webhook #{} ('{}')", index + 1, webhook.name))?;
        }

        Ok(())
    }

    /// Convert log level string to tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.logging
            .level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }

    /// Executor settings derived from the `[delivery]` section
    pub fn delivery_settings(&self) -> DeliverySettings {
        DeliverySettings {
            request_timeout: Duration::from_secs(self.delivery.request_timeout_secs),
            user_agent: self.delivery.user_agent.clone(),
            backoff: BackoffPolicy::from_millis(self.delivery.backoff_unit_ms),
            response_body_limit: self.delivery.response_body_limit,
        }
    }

    /// Copy of the configuration with webhook secrets masked, for display
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        for webhook in &mut config.webhooks {
            if webhook.secret_key.is_some() {
                webhook.secret_key = Some("********".to_string());
            }
        }
        config
    }
}

fn positive_env<T>(name: &str) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse::<T>().ok())
        .filter(|value| *value > T::default())
}
