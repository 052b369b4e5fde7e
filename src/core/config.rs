//! Configuration management for the collector.
//!
//! This module provides configuration handling with:
//! - YAML file support
//! - Environment variable and CLI overrides (applied by the CLI layer)
//! - Validation and defaults

use crate::core::{CollectorError, Result};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// Complete configuration for the collector
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Sample store configuration
    pub store: StoreConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Debug mode
    #[serde(skip)]
    pub debug: bool,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address for the HTTP listener
    pub bind_address: IpAddr,
    /// HTTP port
    pub port: u16,
    /// Enable permissive CORS headers
    pub enable_cors: bool,
}

/// Sample store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// How long an entry lives without being refreshed
    #[serde(with = "humantime_serde")]
    pub eviction_timeout: Duration,
    /// Which operations refresh an entry
    pub expiry: ExpiryPolicy,
    /// How often expired entries are swept
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
    /// Include targets, thread ids and line numbers
    pub structured: bool,
}

/// Expiry policy for store entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryPolicy {
    /// The clock resets on every write.
    AfterWrite,
    /// The clock resets on every write and every read of the key.
    #[default]
    AfterAccess,
}

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Everything
    Trace,
    /// Diagnostics
    Debug,
    /// Lifecycle events
    Info,
    /// Recoverable problems
    Warn,
    /// Failures only
    Error,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_address: "0.0.0.0".parse().expect("Valid default IP address"),
            port: 8080,
            enable_cors: true,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            eviction_timeout: Duration::from_secs(30),
            expiry: ExpiryPolicy::AfterAccess,
            cleanup_interval: Duration::from_secs(1),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
            structured: false,
        }
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Result<Self> {
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(CollectorError::config("server port must be greater than 0"));
        }

        if self.store.eviction_timeout.is_zero() {
            return Err(CollectorError::config("eviction_timeout must be greater than 0"));
        }

        if self.store.cleanup_interval.is_zero() {
            return Err(CollectorError::config("cleanup_interval must be greater than 0"));
        }

        Ok(())
    }
}

impl LogLevel {
    /// Convert to tracing filter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Configuration builder for programmatic construction
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = serde_yaml::from_str(yaml)
            .map_err(|e| CollectorError::config(format!("Failed to parse YAML config: {}", e)))?;
        Ok(self)
    }

    /// Set HTTP port
    pub fn port(mut self, port: u16) -> Self {
        self.config.server.port = port;
        self
    }

    /// Set bind address
    pub fn bind_address(mut self, address: IpAddr) -> Self {
        self.config.server.bind_address = address;
        self
    }

    /// Set eviction timeout
    pub fn eviction_timeout(mut self, timeout: Duration) -> Self {
        self.config.store.eviction_timeout = timeout;
        self
    }

    /// Set expiry policy
    pub fn expiry(mut self, policy: ExpiryPolicy) -> Self {
        self.config.store.expiry = policy;
        self
    }

    /// Set cleanup interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.config.store.cleanup_interval = interval;
        self
    }

    /// Set debug mode
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
