//! Configuration loading and validation.
//!
//! Settings come from three layers, later layers win:
//! 1. optional YAML file
//! 2. environment variables
//! 3. command-line flags
//!
//! The merged `Settings` are validated once into an immutable `ProducerConfig`.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_TOPIC: &str = "weather-events";
pub const DEFAULT_LANG: &str = "en";
pub const DEFAULT_POLLING_PERIOD_SECS: i64 = 3;
pub const DEFAULT_FLUSH_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_API_URL: &str = "https://api.weatherapi.com/v1";

pub const ENV_ENDPOINT: &str = "ZENOH_ENDPOINT";
pub const ENV_TOPIC: &str = "WEATHER_TOPIC";
pub const ENV_API_KEY: &str = "WEATHER_API_KEY";
pub const ENV_CITY: &str = "WEATHER_CITY";
pub const ENV_LANG: &str = "WEATHER_LANG";
pub const ENV_POLLING_PERIOD: &str = "WEATHER_POLLING_PERIOD";
pub const ENV_API_URL: &str = "WEATHER_API_URL";

/// Fatal configuration problems. Any of these prevents the loop from starting.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    MissingField(&'static str),

    #[error("polling period must be a positive number of seconds, got {0}")]
    InvalidInterval(i64),

    #[error("invalid value '{value}' for {field}")]
    InvalidValue { field: &'static str, value: String },

    #[error("invalid topic '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: String },

    #[error("failed to read config '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// One layer of unvalidated settings. Every field is optional so layers can be merged.
#[derive(Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Zenoh endpoint, e.g. `tcp/127.0.0.1:7447`
    pub endpoint: Option<String>,
    pub topic: Option<String>,
    pub api_key: Option<String>,
    /// Location query: city name, postcode, IP address or "lat,lon"
    pub city_name: Option<String>,
    pub lang: Option<String>,
    /// Seconds between fetches
    pub polling_period: Option<i64>,
    /// Seconds to wait for a flush before giving up
    pub flush_timeout: Option<u64>,
    pub api_url: Option<String>,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("endpoint", &self.endpoint)
            .field("topic", &self.topic)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("city_name", &self.city_name)
            .field("lang", &self.lang)
            .field("polling_period", &self.polling_period)
            .field("flush_timeout", &self.flush_timeout)
            .field("api_url", &self.api_url)
            .finish()
    }
}

impl Settings {
    /// Load a settings layer from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Settings layer from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Settings layer from an arbitrary variable lookup (the environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let polling_period = match lookup(ENV_POLLING_PERIOD) {
            Some(raw) => Some(raw.trim().parse::<i64>().map_err(|_| {
                ConfigError::InvalidValue {
                    field: "polling_period",
                    value: raw.clone(),
                }
            })?),
            None => None,
        };

        Ok(Self {
            endpoint: lookup(ENV_ENDPOINT),
            topic: lookup(ENV_TOPIC),
            api_key: lookup(ENV_API_KEY),
            city_name: lookup(ENV_CITY),
            lang: lookup(ENV_LANG),
            polling_period,
            flush_timeout: None,
            api_url: lookup(ENV_API_URL),
        })
    }

    /// Overlay `other` on top of `self`; fields set in `other` win.
    pub fn merge(self, other: Settings) -> Settings {
        Settings {
            endpoint: other.endpoint.or(self.endpoint),
            topic: other.topic.or(self.topic),
            api_key: other.api_key.or(self.api_key),
            city_name: other.city_name.or(self.city_name),
            lang: other.lang.or(self.lang),
            polling_period: other.polling_period.or(self.polling_period),
            flush_timeout: other.flush_timeout.or(self.flush_timeout),
            api_url: other.api_url.or(self.api_url),
        }
    }

    /// Apply defaults, check required fields and validate values.
    pub fn build(self) -> Result<ProducerConfig, ConfigError> {
        let endpoint = required(self.endpoint, "endpoint")?;
        let api_key = required(self.api_key, "api_key")?;
        let city_name = required(self.city_name, "city_name")?;

        let loop_config = LoopConfig::new(
            city_name,
            non_empty(self.lang).unwrap_or_else(|| DEFAULT_LANG.to_string()),
            self.polling_period.unwrap_or(DEFAULT_POLLING_PERIOD_SECS),
        )?
        .with_topic(non_empty(self.topic).unwrap_or_else(|| DEFAULT_TOPIC.to_string()))?
        .with_flush_timeout(Duration::from_secs(
            self.flush_timeout.unwrap_or(DEFAULT_FLUSH_TIMEOUT_SECS),
        ));

        Ok(ProducerConfig {
            endpoint,
            api_key,
            api_url: non_empty(self.api_url)
                .unwrap_or_else(|| DEFAULT_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            loop_config,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ConfigError> {
    non_empty(value).ok_or(ConfigError::MissingField(field))
}

/// Check that `topic` is usable as a Zenoh key expression.
pub fn validate_topic(topic: &str) -> Result<(), ConfigError> {
    zenoh::key_expr::KeyExpr::try_from(topic.to_string())
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidTopic {
            topic: topic.to_string(),
            reason: e.to_string(),
        })
}

/// What the polling loop needs. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    query: String,
    lang: String,
    interval: Duration,
    topic: String,
    flush_timeout: Option<Duration>,
}

impl LoopConfig {
    /// `interval_secs` must be strictly positive.
    pub fn new(
        query: impl Into<String>,
        lang: impl Into<String>,
        interval_secs: i64,
    ) -> Result<Self, ConfigError> {
        if interval_secs <= 0 {
            return Err(ConfigError::InvalidInterval(interval_secs));
        }
        let query = query.into();
        if query.trim().is_empty() {
            return Err(ConfigError::MissingField("city_name"));
        }

        Ok(Self {
            query,
            lang: lang.into(),
            interval: Duration::from_secs(interval_secs as u64),
            topic: DEFAULT_TOPIC.to_string(),
            flush_timeout: Some(Duration::from_secs(DEFAULT_FLUSH_TIMEOUT_SECS)),
        })
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Result<Self, ConfigError> {
        let topic = topic.into();
        validate_topic(&topic)?;
        self.topic = topic;
        Ok(self)
    }

    pub fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = Some(timeout);
        self
    }

    /// Location query, also used as the message key.
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn lang(&self) -> &str {
        &self.lang
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn flush_timeout(&self) -> Option<Duration> {
        self.flush_timeout
    }
}

/// Validated process configuration.
#[derive(Clone)]
pub struct ProducerConfig {
    pub endpoint: String,
    pub api_key: String,
    pub api_url: String,
    pub loop_config: LoopConfig,
}

impl std::fmt::Debug for ProducerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("api_url", &self.api_url)
            .field("loop_config", &self.loop_config)
            .finish()
    }
}
