//! Raw configuration types for TOML parsing

use super::*;
use serde::Deserialize;

/// Raw configuration as parsed from TOML
#[derive(Debug, Deserialize)]
pub struct RawConfig {
    pub server: Option<RawServerConfig>,
    pub authority: Option<RawAuthorityConfig>,
    pub sessions: Option<RawSessionConfig>,
    pub upstream: Option<RawUpstreamConfig>,
    pub logging: Option<RawLoggingConfig>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RawServerConfig {
    pub bind: Option<String>,
}

impl From<RawServerConfig> for ServerConfig {
    fn from(raw: RawServerConfig) -> Self {
        Self {
            bind: raw.bind.unwrap_or_else(|| ServerConfig::default().bind),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct RawAuthorityConfig {
    pub base_url: Option<String>,
    pub service_name: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl TryFrom<RawAuthorityConfig> for AuthorityConfig {
    type Error = ConfigError;

    fn try_from(raw: RawAuthorityConfig) -> Result<Self, Self::Error> {
        let defaults = AuthorityConfig::default();

        let service_name = raw.service_name.unwrap_or(defaults.service_name);
        if service_name.is_empty() {
            return Err(ConfigError::Invalid(
                "authority.service_name must not be empty".to_string(),
            ));
        }

        let timeout = match raw.timeout_secs {
            Some(0) => {
                return Err(ConfigError::Invalid(
                    "authority.timeout_secs must be greater than zero".to_string(),
                ))
            }
            Some(secs) => Duration::from_secs(secs),
            None => defaults.timeout,
        };

        Ok(Self {
            base_url: raw.base_url.unwrap_or(defaults.base_url),
            service_name,
            timeout,
        })
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct RawSessionConfig {
    pub ttl_secs: Option<u64>,
    pub max_sessions: Option<usize>,
    pub sweep_interval_secs: Option<u64>,
    pub single_flight: Option<bool>,
}

impl TryFrom<RawSessionConfig> for SessionConfig {
    type Error = ConfigError;

    fn try_from(raw: RawSessionConfig) -> Result<Self, Self::Error> {
        if raw.max_sessions == Some(0) {
            return Err(ConfigError::Invalid(
                "sessions.max_sessions must be greater than zero".to_string(),
            ));
        }
        if raw.sweep_interval_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "sessions.sweep_interval_secs must be greater than zero".to_string(),
            ));
        }

        let ttl = raw
            .ttl_secs
            .map(|secs| {
                i64::try_from(secs)
                    .ok()
                    .and_then(chrono::Duration::try_seconds)
                    .ok_or_else(|| {
                        ConfigError::Invalid(format!("sessions.ttl_secs out of range: {}", secs))
                    })
            })
            .transpose()?;

        let defaults = SessionConfig::default();
        Ok(Self {
            eviction: EvictionPolicy {
                ttl,
                max_sessions: raw.max_sessions,
            },
            sweep_interval: raw
                .sweep_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            single_flight: raw.single_flight.unwrap_or(defaults.single_flight),
        })
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct RawUpstreamConfig {
    pub api_key_header: Option<String>,
    pub api_key_prefix: Option<String>,
}

impl TryFrom<RawUpstreamConfig> for UpstreamConfig {
    type Error = ConfigError;

    fn try_from(raw: RawUpstreamConfig) -> Result<Self, Self::Error> {
        let defaults = HeaderStyle::default();
        let header_style = match raw.api_key_header {
            Some(name) => HeaderStyle::new(
                &name,
                raw.api_key_prefix.unwrap_or(defaults.api_key_prefix),
            )?,
            None => HeaderStyle {
                api_key_prefix: raw.api_key_prefix.unwrap_or(defaults.api_key_prefix),
                ..defaults
            },
        };

        Ok(Self { header_style })
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct RawLoggingConfig {
    pub level: Option<String>,
    pub format: Option<String>,
}

impl TryFrom<RawLoggingConfig> for LoggingConfig {
    type Error = ConfigError;

    fn try_from(raw: RawLoggingConfig) -> Result<Self, Self::Error> {
        let format = match raw.format.as_deref() {
            Some("pretty") | None => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid(format!(
                    "Unknown log format: {}",
                    other
                )))
            }
        };

        let level = match raw.level {
            Some(level) => level
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("Unknown log level: {}", level)))?,
            None => LoggingConfig::default().level,
        };

        Ok(Self { level, format })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
bind = "0.0.0.0:3003"

[authority]
base_url = "https://authority.example.com/api/mcp"
service_name = "NS"
timeout_secs = 3

[sessions]
ttl_secs = 3600
max_sessions = 500
sweep_interval_secs = 30
single_flight = true

[upstream]
api_key_header = "Ocp-Apim-Subscription-Key"
api_key_prefix = ""

[logging]
level = "debug"
format = "json"
"#;

        let config = Config::parse(toml).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:3003");
        assert_eq!(config.authority.base_url, "https://authority.example.com/api/mcp");
        assert_eq!(config.authority.timeout, Duration::from_secs(3));
        assert_eq!(
            config.sessions.eviction.ttl,
            Some(chrono::Duration::hours(1))
        );
        assert_eq!(config.sessions.eviction.max_sessions, Some(500));
        assert_eq!(config.sessions.sweep_interval, Duration::from_secs(30));
        assert!(config.sessions.single_flight);
        assert_eq!(
            config.upstream.header_style.api_key_header.as_str(),
            "ocp-apim-subscription-key"
        );
        assert_eq!(config.upstream.header_style.api_key_prefix, "");
        assert_eq!(config.logging.level, Level::DEBUG);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_minimal_config() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:3003");
        assert_eq!(config.authority.base_url, DEFAULT_AUTHORITY_URL);
        assert_eq!(config.authority.service_name, "NS");
        assert!(!config.sessions.eviction.is_bounded());
        assert!(!config.sessions.single_flight);
        assert_eq!(config.upstream.header_style.api_key_header, header::AUTHORIZATION);
        assert_eq!(config.upstream.header_style.api_key_prefix, "Bearer ");
        assert_eq!(config.logging.level, Level::INFO);
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_log_level_is_case_insensitive() {
        let config = Config::parse("[logging]\nlevel = \"WARN\"").unwrap();
        assert_eq!(config.logging.level, Level::WARN);
    }

    #[test]
    fn test_default_template_parses() {
        let config = Config::parse(DEFAULT_CONFIG_TOML).unwrap();
        assert_eq!(config.authority.service_name, DEFAULT_SERVICE_NAME);
        assert_eq!(config.sessions.sweep_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            Config::parse("[logging]\nformat = \"xml\""),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::parse("[logging]\nlevel = \"loud\""),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::parse("[sessions]\nmax_sessions = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::parse("[authority]\ntimeout_secs = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::parse("[upstream]\napi_key_header = \"bad header\""),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::parse("[server"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_dashboard_url_override() {
        let config = Config::default().with_overrides(|name| match name {
            DASHBOARD_URL_ENV => Some("http://localhost:8080/api/mcp".to_string()),
            _ => None,
        });
        assert_eq!(config.authority.base_url, "http://localhost:8080/api/mcp");

        let config = Config::default().with_overrides(|_| Some(String::new()));
        assert_eq!(config.authority.base_url, DEFAULT_AUTHORITY_URL);
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(&path, "[authority]\nservice_name = \"OV\"\n")
            .await
            .unwrap();

        let config = Config::load(&path).await.unwrap();
        assert_eq!(config.authority.service_name, "OV");

        let missing = Config::load(dir.path().join("missing.toml")).await;
        assert!(matches!(missing, Err(ConfigError::NotFound(_))));
    }
}
