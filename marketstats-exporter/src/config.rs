//! Configuration for the marketstats exporter.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Prometheus exporter settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// Upstream HTTP client settings.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Response cache settings shared by all sources.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Golem network statistics sources.
    #[serde(default)]
    pub golem: GolemConfig,

    /// CoinMarketCap quotes source.
    #[serde(default)]
    pub coinmarketcap: CoinMarketCapConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Prometheus HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Address to listen on (default: "0.0.0.0:9101").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,

    /// Attach the upstream capture time to every sample.
    #[serde(default = "default_true")]
    pub timestamps: bool,
}

fn default_listen() -> String {
    "0.0.0.0:9101".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
            timestamps: true,
        }
    }
}

/// Upstream HTTP client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Total request timeout (seconds).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Connection establishment timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// User-Agent header sent upstream.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_timeout() -> u64 {
    10
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_user_agent() -> String {
    concat!("marketstats-exporter/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum distinct sources held per cache (memory protection).
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_max_entries() -> usize {
    10_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
        }
    }
}

/// Golem network statistics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GolemConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Online provider list endpoint.
    #[serde(default = "default_online_url")]
    pub online_url: String,

    /// Network utilization endpoint.
    #[serde(default = "default_utilization_url")]
    pub utilization_url: String,

    /// How long a fetched payload is reused (seconds).
    #[serde(default = "default_golem_ttl")]
    pub cache_ttl_secs: u64,

    /// Runtime capabilities exposed as states of the capabilities state-set.
    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<String>,
}

fn default_online_url() -> String {
    "https://api.stats.golem.network/v1/network/online".to_string()
}

fn default_utilization_url() -> String {
    "https://api.stats.golem.network/v1/network/utilization".to_string()
}

fn default_golem_ttl() -> u64 {
    30
}

fn default_capabilities() -> Vec<String> {
    ["vpn", "inet", "manifest-support", "start-entrypoint"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for GolemConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            online_url: default_online_url(),
            utilization_url: default_utilization_url(),
            cache_ttl_secs: default_golem_ttl(),
            capabilities: default_capabilities(),
        }
    }
}

/// CoinMarketCap quotes configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoinMarketCapConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Quotes endpoint.
    #[serde(default = "default_cmc_url")]
    pub url: String,

    /// API key sent as `X-CMC_PRO_API_KEY`.
    #[serde(default)]
    pub api_key: String,

    /// Coin symbols to quote, e.g. `["BTC", "GLM"]`.
    #[serde(default)]
    pub symbols: Vec<String>,

    /// Currencies to convert into, e.g. `["USD", "EUR"]`.
    #[serde(default)]
    pub currencies: Vec<String>,

    /// How long a fetched payload is reused (seconds).
    #[serde(default = "default_cmc_ttl")]
    pub cache_ttl_secs: u64,
}

fn default_cmc_url() -> String {
    "https://pro-api.coinmarketcap.com/v1/cryptocurrency/quotes/latest".to_string()
}

fn default_cmc_ttl() -> u64 {
    300 // 5 minutes
}

impl Default for CoinMarketCapConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_cmc_url(),
            api_key: String::new(),
            symbols: Vec::new(),
            currencies: Vec::new(),
            cache_ttl_secs: default_cmc_ttl(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Split a comma separated list, dropping empty entries.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream.timeout_secs == 0 || self.upstream.connect_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "upstream timeouts must be > 0".to_string(),
            ));
        }

        if self.cache.max_entries == 0 {
            return Err(ConfigError::Validation(
                "max_entries must be > 0".to_string(),
            ));
        }

        if self.golem.enabled && self.golem.cache_ttl_secs == 0 {
            return Err(ConfigError::Validation(
                "golem.cache_ttl_secs must be > 0".to_string(),
            ));
        }

        if self.coinmarketcap.enabled {
            let cmc = &self.coinmarketcap;
            if cmc.cache_ttl_secs == 0 {
                return Err(ConfigError::Validation(
                    "coinmarketcap.cache_ttl_secs must be > 0".to_string(),
                ));
            }
            if cmc.api_key.is_empty() {
                return Err(ConfigError::Validation(
                    "coinmarketcap.api_key is required".to_string(),
                ));
            }
            if cmc.symbols.is_empty() || cmc.currencies.is_empty() {
                return Err(ConfigError::Validation(
                    "coinmarketcap needs at least one symbol and one currency".to_string(),
                ));
            }
        }

        // Validate listen address format
        if self
            .prometheus
            .listen
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.prometheus.listen
            )));
        }

        // Validate path starts with /
        if !self.prometheus.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        Ok(())
    }
}
