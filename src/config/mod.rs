//! Configuration system for Keyrelay
//!
//! Loads configuration from TOML files and environment variables.

mod types;

pub use types::*;

use crate::auth::{HeaderStyle, InjectError};
use crate::storage::EvictionPolicy;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tracing::Level;

/// Environment variable overriding the authority base URL
pub const DASHBOARD_URL_ENV: &str = "DASHBOARD_URL";

/// Default authority endpoint
pub const DEFAULT_AUTHORITY_URL: &str = "https://dashboard.geniusagents.nl/api/mcp";

/// Default name the service is registered under at the authority
pub const DEFAULT_SERVICE_NAME: &str = "NS";

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<InjectError> for ConfigError {
    fn from(err: InjectError) -> Self {
        ConfigError::Invalid(err.to_string())
    }
}

/// Main Keyrelay configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Credential authority configuration
    pub authority: AuthorityConfig,
    /// Session store configuration
    pub sessions: SessionConfig,
    /// Upstream header configuration
    pub upstream: UpstreamConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// Load configuration from a string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        Self::from_raw(raw)
    }

    /// Convert from raw TOML config to validated config
    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            server: raw.server.unwrap_or_default().into(),
            authority: raw.authority.unwrap_or_default().try_into()?,
            sessions: raw.sessions.unwrap_or_default().try_into()?,
            upstream: raw.upstream.unwrap_or_default().try_into()?,
            logging: raw.logging.unwrap_or_default().try_into()?,
        })
    }

    /// Apply overrides from the process environment
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup(DASHBOARD_URL_ENV).filter(|u| !u.is_empty()) {
            self.authority.base_url = url;
        }
        self
    }

    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("keyrelay")
            .join("config.toml")
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3003".to_string(),
        }
    }
}

/// Credential authority configuration
#[derive(Debug, Clone)]
pub struct AuthorityConfig {
    /// Lookup endpoint
    pub base_url: String,
    /// Name this service is registered under
    pub service_name: String,
    /// Timeout for a single lookup
    pub timeout: Duration,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_AUTHORITY_URL.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Session store configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Eviction bounds
    pub eviction: EvictionPolicy,
    /// How often the sweeper runs when a ttl is set
    pub sweep_interval: Duration,
    /// Share one authority call between concurrent resolutions of a session
    pub single_flight: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            eviction: EvictionPolicy::unbounded(),
            sweep_interval: Duration::from_secs(60),
            single_flight: false,
        }
    }
}

/// Upstream header configuration
#[derive(Debug, Clone, Default)]
pub struct UpstreamConfig {
    /// How API keys are presented upstream
    pub header_style: HeaderStyle,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level
    pub level: Level,
    /// Format: "json" or "pretty"
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format
    Pretty,
    /// JSON format
    Json,
}

/// Commented configuration written by `keyrelay init`
pub const DEFAULT_CONFIG_TOML: &str = r#"# Keyrelay configuration

[server]
bind = "127.0.0.1:3003"

[authority]
# Overridden by the DASHBOARD_URL environment variable
base_url = "https://dashboard.geniusagents.nl/api/mcp"
service_name = "NS"
timeout_secs = 10

[sessions]
# Drop sessions this long after their last resolution (disabled by default)
# ttl_secs = 86400
# Maximum number of sessions kept in memory (disabled by default)
# max_sessions = 10000
sweep_interval_secs = 60
single_flight = false

[upstream]
api_key_header = "Authorization"
api_key_prefix = "Bearer "

[logging]
level = "info"
format = "pretty"
"#;
