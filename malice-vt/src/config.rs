//! Configuration management for the VirusTotal plugin
//!
//! Settings come in layers, lowest precedence first: built-in defaults, an
//! optional TOML file, `MALICE_*` environment variables, and command-line
//! flags applied by the binary.

use std::fmt;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::reports::OutputMode;

/// Public v2 API base URL
pub const DEFAULT_BASE_URL: &str = "https://www.virustotal.com/vtapi/v2";

/// Default HTTP request timeout
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Public tier quota: 4 requests per minute
const DEFAULT_REQUESTS_PER_WINDOW: usize = 4;
const DEFAULT_WINDOW_SECS: u64 = 60;

/// Configuration errors, raised before any network call
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing VirusTotal API key: supply it with '--api' or MALICE_VT_API")]
    MissingApiKey,

    #[error("malformed VirusTotal API key: expected 64 hexadecimal characters")]
    MalformedApiKey,

    #[error("invalid {field} URL '{value}': {source}")]
    InvalidUrl {
        field: &'static str,
        value: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Validated VirusTotal API key
///
/// `Debug` is redacted so the key never ends up in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Validate a raw key. Public API keys are 64 hex characters.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        if raw.len() != 64 || !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ConfigError::MalformedApiKey);
        }
        Ok(Self(raw.to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(****)")
    }
}

/// Plugin configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Remote service configuration
    pub service: ServiceConfig,
    /// Client-side quota
    pub rate_limit: RateLimitConfig,
    /// Report polling budget
    pub polling: PollingConfig,
    /// Output configuration
    pub output: OutputConfig,
    /// Downstream collaborators
    pub sinks: SinkConfig,
}

/// Remote service configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// API base URL
    pub base_url: String,
    /// API key; usually supplied through the environment instead
    pub api_key: Option<String>,
    /// Per-request HTTP timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

/// Client-side quota configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests allowed per window
    pub requests_per_window: usize,
    /// Rolling window length in seconds
    pub window_secs: u64,
    /// Extra wait added per service-side exhaustion signal
    pub backoff_step_secs: u64,
    /// Ceiling for the accumulated extra wait
    pub max_backoff_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: DEFAULT_REQUESTS_PER_WINDOW,
            window_secs: DEFAULT_WINDOW_SECS,
            backoff_step_secs: DEFAULT_WINDOW_SECS,
            max_backoff_secs: 5 * DEFAULT_WINDOW_SECS,
        }
    }
}

/// Report polling configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// First delay after a pending answer
    pub initial_delay_secs: u64,
    /// Ceiling for the doubling delay
    pub max_delay_secs: u64,
    /// Total polling budget for one report
    pub max_wait_secs: u64,
    /// Consecutive rate-limited answers tolerated before giving up
    pub max_rate_limited_retries: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: 15,
            max_delay_secs: 120,
            max_wait_secs: 600,
            max_rate_limited_retries: 3,
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Presentation mode
    pub mode: OutputMode,
    /// Wall-clock bound for a whole resolution, in seconds
    pub total_timeout_secs: Option<u64>,
}

/// Storage and webhook collaborators
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Elasticsearch base URL
    pub elasticsearch: Option<String>,
    /// Webhook endpoint
    pub webhook: Option<String>,
    /// Outbound proxy for the webhook
    pub proxy: Option<String>,
    /// Identifier used for stored/posted results
    pub scan_id: Option<String>,
}

impl Config {
    /// Parse configuration from a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from an optional TOML file
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                Self::from_toml_str(&content)
            }
            None => Ok(Self::default()),
        }
    }

    /// Overlay the `MALICE_*` environment variables.
    ///
    /// Unset or empty variables leave the current value alone. An unparsable
    /// `MALICE_TIMEOUT` is ignored with a warning.
    pub fn apply_env(&mut self) {
        if let Some(key) = env_value("MALICE_VT_API") {
            self.service.api_key = Some(key);
        }
        if let Some(url) = env_value("MALICE_ELASTICSEARCH") {
            self.sinks.elasticsearch = Some(url);
        }
        if let Some(url) = env_value("MALICE_ENDPOINT") {
            self.sinks.webhook = Some(url);
        }
        if let Some(url) = env_value("MALICE_PROXY") {
            self.sinks.proxy = Some(url);
        }
        if let Some(id) = env_value("MALICE_SCANID") {
            self.sinks.scan_id = Some(id);
        }
        if let Some(raw) = env_value("MALICE_TIMEOUT") {
            match raw.parse() {
                Ok(secs) => self.output.total_timeout_secs = Some(secs),
                Err(e) => tracing::warn!("Ignoring MALICE_TIMEOUT={}: {}", raw, e),
            }
        }
    }

    /// Resolve and validate the API key
    pub fn api_key(&self) -> Result<ApiKey, ConfigError> {
        match &self.service.api_key {
            Some(raw) => ApiKey::parse(raw),
            None => Err(ConfigError::MissingApiKey),
        }
    }

    /// Check every configured URL before any client is built
    pub fn validate_urls(&self) -> Result<(), ConfigError> {
        check_url("service", &self.service.base_url)?;
        if let Some(url) = &self.sinks.elasticsearch {
            check_url("elasticsearch", url)?;
        }
        if let Some(url) = &self.sinks.webhook {
            check_url("webhook", url)?;
        }
        if let Some(url) = &self.sinks.proxy {
            check_url("proxy", url)?;
        }
        Ok(())
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn check_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    Url::parse(value)
        .map(|_| ())
        .map_err(|source| ConfigError::InvalidUrl {
            field,
            value: value.to_string(),
            source,
        })
}
