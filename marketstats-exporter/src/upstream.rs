//! HTTP client for the upstream JSON APIs.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::UpstreamConfig;
use crate::source::DataSource;

/// Upstream fetch failures. Any of these aborts the collection that needed
/// the payload.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UpstreamError {
    #[error("request to {url} failed: {message}")]
    Network { url: String, message: String },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("{url} returned invalid JSON: {message}")]
    Decode { url: String, message: String },

    #[error("{url} returned an unexpected payload: {reason}")]
    Schema { url: String, reason: String },
}

impl UpstreamError {
    /// Short error class, used as a metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::Network { .. } => "network",
            UpstreamError::Status { .. } => "status",
            UpstreamError::Decode { .. } => "decode",
            UpstreamError::Schema { .. } => "schema",
        }
    }
}

/// Something that can turn a [`DataSource`] into a decoded payload.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, source: &DataSource) -> Result<Value, UpstreamError>;
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ApiLabels {
    api: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ErrorLabels {
    api: String,
    kind: String,
}

type HistogramFamily = Family<ApiLabels, Histogram, fn() -> Histogram>;

fn latency_histogram() -> Histogram {
    Histogram::new(exponential_buckets(0.05, 2.0, 10))
}

fn size_histogram() -> Histogram {
    Histogram::new(exponential_buckets(1024.0, 4.0, 10))
}

/// Request instrumentation, keyed by source URL.
#[derive(Clone, Debug)]
pub struct UpstreamMetrics {
    request_seconds: HistogramFamily,
    response_size_bytes: HistogramFamily,
    errors: Family<ErrorLabels, Counter>,
}

impl UpstreamMetrics {
    pub fn new() -> Self {
        Self {
            request_seconds: Family::new_with_constructor(latency_histogram as fn() -> Histogram),
            response_size_bytes: Family::new_with_constructor(size_histogram as fn() -> Histogram),
            errors: Family::default(),
        }
    }

    /// Register the instrumentation with `registry`.
    pub fn register(&self, registry: &mut Registry) {
        registry.register(
            "upstream_api_request_seconds",
            "Time spent requesting upstream API data",
            self.request_seconds.clone(),
        );
        registry.register(
            "upstream_api_response_size_bytes",
            "Size of the upstream API data returned",
            self.response_size_bytes.clone(),
        );
        registry.register(
            "upstream_api_errors",
            "Failed upstream API requests by error class",
            self.errors.clone(),
        );
    }

    fn observe_latency(&self, api: &str, elapsed: Duration) {
        self.request_seconds
            .get_or_create(&ApiLabels {
                api: api.to_string(),
            })
            .observe(elapsed.as_secs_f64());
    }

    fn observe_size(&self, api: &str, bytes: usize) {
        self.response_size_bytes
            .get_or_create(&ApiLabels {
                api: api.to_string(),
            })
            .observe(bytes as f64);
    }

    fn record_error(&self, api: &str, error: &UpstreamError) {
        self.errors
            .get_or_create(&ErrorLabels {
                api: api.to_string(),
                kind: error.kind().to_string(),
            })
            .inc();
    }
}

impl Default for UpstreamMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Issues one GET per fetch, with the source's headers and query.
pub struct UpstreamClient {
    client: reqwest::Client,
    metrics: UpstreamMetrics,
}

impl UpstreamClient {
    /// Create a client with the configured timeouts.
    pub fn new(config: &UpstreamConfig, metrics: UpstreamMetrics) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self { client, metrics })
    }

    async fn request(&self, source: &DataSource) -> Result<Value, UpstreamError> {
        let url = source.url();
        let network = |e: reqwest::Error| UpstreamError::Network {
            url: url.to_string(),
            message: e.to_string(),
        };

        let mut request = self.client.get(url).query(source.query());
        for (name, value) in source.headers() {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(network)?;
        let status = response.status();
        let body = response.bytes().await.map_err(network)?;
        self.metrics.observe_size(url, body.len());

        if !status.is_success() {
            return Err(UpstreamError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let payload: Value =
            serde_json::from_slice(&body).map_err(|e| UpstreamError::Decode {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        source
            .envelope()
            .check(&payload)
            .map_err(|reason| UpstreamError::Schema {
                url: url.to_string(),
                reason,
            })?;

        Ok(payload)
    }
}

#[async_trait]
impl Fetcher for UpstreamClient {
    async fn fetch(&self, source: &DataSource) -> Result<Value, UpstreamError> {
        let started = Instant::now();
        let result = self.request(source).await;
        let elapsed = started.elapsed();
        self.metrics.observe_latency(source.url(), elapsed);

        match &result {
            Ok(_) => debug!(
                source = %source,
                elapsed_ms = elapsed.as_millis() as u64,
                "Fetched upstream payload"
            ),
            Err(e) => {
                self.metrics.record_error(source.url(), e);
                warn!(source = %source, error = %e, "Upstream fetch failed");
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::encoding::text::encode;

    #[test]
    fn test_error_kind() {
        let err = UpstreamError::Schema {
            url: "https://example.com".to_string(),
            reason: "missing `data` field".to_string(),
        };

        assert_eq!(err.kind(), "schema");
        assert!(err.to_string().contains("missing `data` field"));
    }

    #[test]
    fn test_metrics_keyed_by_source() {
        let metrics = UpstreamMetrics::new();
        let mut registry = Registry::default();
        metrics.register(&mut registry);

        metrics.observe_latency("https://a.example", Duration::from_millis(120));
        metrics.observe_size("https://a.example", 2048);
        metrics.record_error(
            "https://b.example",
            &UpstreamError::Status {
                url: "https://b.example".to_string(),
                status: 502,
            },
        );

        let mut output = String::new();
        encode(&mut output, &registry).unwrap();

        assert!(output.contains("upstream_api_request_seconds_count{api=\"https://a.example\"} 1"));
        assert!(output.contains("upstream_api_response_size_bytes_sum{api=\"https://a.example\"} 2048"));
        assert!(output.contains("upstream_api_errors_total{api=\"https://b.example\",kind=\"status\"} 1"));
    }
}
