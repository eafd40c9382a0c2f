//! Scrape assembly and text exposition.

use std::fmt::Write;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::{Duration, Instant};

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::cache::ResponseCache;
use crate::collector::{
    CoinMarketCapCollector, CollectError, Collector, GolemOnlineCollector,
    GolemUtilizationCollector,
};
use crate::config::ExporterConfig;
use crate::family::{MetricFamily, MetricKind, SampleValue};
use crate::upstream::{UpstreamClient, UpstreamMetrics};

const OPENMETRICS_EOF: &str = "# EOF\n";

/// A scrape that could not produce a consistent snapshot.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("collector `{collector}` failed: {source}")]
    Collect {
        collector: &'static str,
        #[source]
        source: CollectError,
    },

    #[error("collector task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("failed to encode metrics: {0}")]
    Encode(#[from] std::fmt::Error),
}

/// Exporter statistics.
#[derive(Debug, Clone, Default)]
pub struct ScrapeStats {
    /// Scrapes served.
    pub scrapes: u64,
    /// Scrapes that failed.
    pub failures: u64,
}

/// Runs every registered collector on each scrape.
pub struct Exporter {
    collectors: Vec<Arc<dyn Collector>>,
    registry: Registry,
    scrapes: Counter,
    failures: Counter,
    duration: Gauge<f64, AtomicU64>,
}

impl Exporter {
    /// Create an exporter around `registry`, which carries instrumentation
    /// rendered after the collected families.
    pub fn new(mut registry: Registry) -> Self {
        let scrapes = Counter::default();
        let failures = Counter::default();
        let duration = Gauge::<f64, AtomicU64>::default();

        registry.register(
            "exporter_scrapes",
            "Scrapes served by the exporter",
            scrapes.clone(),
        );
        registry.register(
            "exporter_scrape_failures",
            "Scrapes that failed because a collector failed",
            failures.clone(),
        );
        registry.register(
            "exporter_scrape_duration_seconds",
            "Duration of the last scrape",
            duration.clone(),
        );

        Self {
            collectors: Vec::new(),
            registry,
            scrapes,
            failures,
            duration,
        }
    }

    /// Add a collector. Families are emitted in registration order.
    pub fn register(&mut self, collector: Arc<dyn Collector>) {
        self.collectors.push(collector);
    }

    pub fn collector_count(&self) -> usize {
        self.collectors.len()
    }

    /// Run all collectors concurrently and return their families in
    /// registration order. Fails if any collector fails.
    pub async fn collect(&self) -> Result<Vec<MetricFamily>, ScrapeError> {
        let mut tasks = JoinSet::new();
        for (index, collector) in self.collectors.iter().enumerate() {
            let collector = collector.clone();
            tasks.spawn(async move { (index, collector.name(), collector.collect().await) });
        }

        let mut results: Vec<Option<Vec<MetricFamily>>> = vec![None; self.collectors.len()];
        while let Some(joined) = tasks.join_next().await {
            let (index, name, result) = joined?;
            match result {
                Ok(families) => results[index] = Some(families),
                Err(source) => {
                    return Err(ScrapeError::Collect {
                        collector: name,
                        source,
                    });
                }
            }
        }

        Ok(results.into_iter().flatten().flatten().collect())
    }

    /// Collect and render everything in the text exposition format.
    pub async fn gather(&self) -> Result<String, ScrapeError> {
        let started = Instant::now();
        self.scrapes.inc();

        let result = match self.collect().await {
            Ok(families) => self.render(&families),
            Err(e) => Err(e),
        };

        self.duration.set(started.elapsed().as_secs_f64());
        match &result {
            Ok(_) => debug!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Scrape completed"
            ),
            Err(e) => {
                self.failures.inc();
                error!(error = %e, "Scrape failed");
            }
        }

        result
    }

    fn render(&self, families: &[MetricFamily]) -> Result<String, ScrapeError> {
        let mut output = render_families(families);

        // The registry encodes OpenMetrics text. Its sample lines parse as
        // 0.0.4 but the trailing `# EOF` marker does not belong in this body.
        let mut instrumentation = String::new();
        encode(&mut instrumentation, &self.registry)?;
        output.push_str(
            instrumentation
                .strip_suffix(OPENMETRICS_EOF)
                .unwrap_or(instrumentation.as_str()),
        );
        Ok(output)
    }

    /// Get exporter statistics.
    pub fn stats(&self) -> ScrapeStats {
        ScrapeStats {
            scrapes: self.scrapes.get(),
            failures: self.failures.get(),
        }
    }
}

/// Create a shareable exporter handle.
pub type SharedExporter = Arc<Exporter>;

/// An exporter wired to the configured sources, with its caches.
pub struct Pipeline {
    pub exporter: SharedExporter,
    /// One cache per upstream API, by name.
    pub caches: Vec<(&'static str, Arc<ResponseCache>)>,
}

/// Build the client, caches and collectors the configuration enables.
///
/// Each upstream API gets its own cache so it keeps its own TTL.
pub fn build_pipeline(config: &ExporterConfig) -> Result<Pipeline, reqwest::Error> {
    let mut registry = Registry::default();
    let metrics = UpstreamMetrics::new();
    metrics.register(&mut registry);

    let client = Arc::new(UpstreamClient::new(&config.upstream, metrics)?);
    let timestamps = config.prometheus.timestamps;
    let mut caches = Vec::new();
    let mut collectors: Vec<Arc<dyn Collector>> = Vec::new();

    if config.golem.enabled {
        let golem = &config.golem;
        let cache = Arc::new(ResponseCache::new(
            client.clone(),
            Duration::from_secs(golem.cache_ttl_secs),
            config.cache.max_entries,
        ));
        collectors.push(Arc::new(GolemOnlineCollector::new(
            cache.clone(),
            &golem.online_url,
            golem.capabilities.clone(),
            timestamps,
        )));
        collectors.push(Arc::new(GolemUtilizationCollector::new(
            cache.clone(),
            &golem.utilization_url,
            timestamps,
        )));
        caches.push(("golem", cache));
    }

    if config.coinmarketcap.enabled {
        let cmc = &config.coinmarketcap;
        let cache = Arc::new(ResponseCache::new(
            client.clone(),
            Duration::from_secs(cmc.cache_ttl_secs),
            config.cache.max_entries,
        ));
        collectors.push(Arc::new(CoinMarketCapCollector::new(
            cache.clone(),
            &cmc.url,
            &cmc.api_key,
            &cmc.symbols,
            &cmc.currencies,
            timestamps,
        )));
        caches.push(("coinmarketcap", cache));
    }

    let mut exporter = Exporter::new(registry);
    for collector in collectors {
        exporter.register(collector);
    }

    Ok(Pipeline {
        exporter: Arc::new(exporter),
        caches,
    })
}

/// Render families in Prometheus text format 0.0.4.
///
/// State-sets have no type of their own in this format; they are written as
/// gauges with one series per state, labelled with the family name.
pub fn render_families(families: &[MetricFamily]) -> String {
    let mut output = String::with_capacity(families.len() * 256);

    for family in families {
        let name = family.name();
        let type_name = match family.kind() {
            MetricKind::StateSet => "gauge",
            kind => kind.as_str(),
        };

        writeln!(output, "# HELP {} {}", name, escape_help(family.help())).ok();
        writeln!(output, "# TYPE {} {}", name, type_name).ok();

        for sample in family.samples() {
            let mut labels: Vec<(&str, &str)> = family
                .label_names()
                .iter()
                .map(String::as_str)
                .zip(sample.label_values.iter().map(String::as_str))
                .collect();

            let timestamp = sample
                .timestamp_ms
                .map(|ts| format!(" {}", ts))
                .unwrap_or_default();

            match &sample.value {
                SampleValue::Number(value) => {
                    writeln!(
                        output,
                        "{}{} {}{}",
                        name,
                        format_labels(&labels),
                        format_value(*value),
                        timestamp
                    )
                    .ok();
                }
                SampleValue::States(states) => {
                    for (state, set) in states {
                        labels.push((name, state));
                        writeln!(
                            output,
                            "{}{} {}{}",
                            name,
                            format_labels(&labels),
                            if *set { 1 } else { 0 },
                            timestamp
                        )
                        .ok();
                        labels.pop();
                    }
                }
            }
        }
    }

    output
}

/// Escape special characters in label values.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Escape special characters in HELP text.
fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

/// Format a floating point value for Prometheus.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

/// Format labels for Prometheus exposition format.
fn format_labels(labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return String::new();
    }

    let parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    format!("{{{}}}", parts.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::UpstreamError;
    use async_trait::async_trait;

    fn labels(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn rank_family() -> MetricFamily {
        let mut family = MetricFamily::new(
            "coinmarketcap_rank",
            "CoinMarketCap rank of the coin",
            MetricKind::Gauge,
            labels(&["symbol"]),
            "",
        )
        .unwrap();
        family
            .add_value(labels(&["BTC"]), 1.0, Some(1_700_000_000_000))
            .unwrap();
        family
    }

    struct FixedCollector {
        name: &'static str,
        result: Result<Vec<MetricFamily>, CollectError>,
    }

    #[async_trait]
    impl Collector for FixedCollector {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn collect(&self) -> Result<Vec<MetricFamily>, CollectError> {
            self.result.clone()
        }
    }

    #[test]
    fn test_render_gauge_with_timestamp() {
        let output = render_families(&[rank_family()]);

        assert!(output.contains("# HELP coinmarketcap_rank CoinMarketCap rank of the coin\n"));
        assert!(output.contains("# TYPE coinmarketcap_rank gauge\n"));
        assert!(output.contains("coinmarketcap_rank{symbol=\"BTC\"} 1 1700000000000\n"));
    }

    #[test]
    fn test_render_empty_family_keeps_header() {
        let family =
            MetricFamily::new("golem_provider_price_start", "", MetricKind::Gauge, Vec::new(), "")
                .unwrap();
        let output = render_families(&[family]);

        assert!(output.contains("# TYPE golem_provider_price_start gauge"));
        assert_eq!(output.lines().count(), 2);
    }

    #[test]
    fn test_render_state_set() {
        let mut family = MetricFamily::new(
            "golem_provider_runtime_capabilities",
            "",
            MetricKind::StateSet,
            labels(&["node_id"]),
            "",
        )
        .unwrap();
        let states = vec![("vpn".to_string(), true), ("gpu".to_string(), false)];
        family
            .add_sample(labels(&["0x1"]), SampleValue::States(states), None)
            .unwrap();

        let output = render_families(&[family]);
        assert!(output.contains("# TYPE golem_provider_runtime_capabilities gauge"));

        let vpn = output
            .find(
                "golem_provider_runtime_capabilities{node_id=\"0x1\",golem_provider_runtime_capabilities=\"vpn\"} 1\n",
            )
            .unwrap();
        let gpu = output
            .find(
                "golem_provider_runtime_capabilities{node_id=\"0x1\",golem_provider_runtime_capabilities=\"gpu\"} 0\n",
            )
            .unwrap();
        assert!(vpn < gpu, "states render in declared order");
    }

    #[test]
    fn test_render_counter_without_labels() {
        let mut family = MetricFamily::new(
            "golem_provider_earnings_total",
            "",
            MetricKind::Counter,
            Vec::new(),
            "",
        )
        .unwrap();
        family.add_value(Vec::new(), 12.5, None).unwrap();

        let output = render_families(&[family]);
        assert!(output.contains("# TYPE golem_provider_earnings_total counter"));
        assert!(output.contains("golem_provider_earnings_total 12.5\n"));
    }

    #[test]
    fn test_escape_label_value() {
        assert_eq!(escape_label_value("simple"), "simple");
        assert_eq!(escape_label_value("with\"quote"), "with\\\"quote");
        assert_eq!(escape_label_value("with\\backslash"), "with\\\\backslash");
        assert_eq!(escape_label_value("with\nnewline"), "with\\nnewline");
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(42.0), "42");
        assert_eq!(format_value(1_073_741_824.0), "1073741824");
        assert_eq!(format_value(0.0002), "0.0002");
        assert_eq!(format_value(f64::NAN), "NaN");
        assert_eq!(format_value(f64::INFINITY), "+Inf");
        assert_eq!(format_value(f64::NEG_INFINITY), "-Inf");
    }

    #[tokio::test]
    async fn test_gather_includes_families_and_instrumentation() {
        let mut exporter = Exporter::new(Registry::default());
        exporter.register(Arc::new(FixedCollector {
            name: "fixed",
            result: Ok(vec![rank_family()]),
        }));

        let output = exporter.gather().await.unwrap();
        assert!(output.contains("coinmarketcap_rank{symbol=\"BTC\"} 1"));
        assert!(output.contains("exporter_scrapes_total 1"));
        assert!(!output.contains("# EOF"));
        assert!(output.ends_with('\n'));
        assert_eq!(exporter.stats().scrapes, 1);
        assert_eq!(exporter.stats().failures, 0);
    }

    #[tokio::test]
    async fn test_gather_fails_when_any_collector_fails() {
        let mut exporter = Exporter::new(Registry::default());
        exporter.register(Arc::new(FixedCollector {
            name: "healthy",
            result: Ok(vec![rank_family()]),
        }));
        exporter.register(Arc::new(FixedCollector {
            name: "broken",
            result: Err(CollectError::Upstream(UpstreamError::Network {
                url: "https://a.example".to_string(),
                message: "timed out".to_string(),
            })),
        }));

        let err = exporter.gather().await.unwrap_err();
        assert!(err.to_string().contains("broken"));
        assert_eq!(exporter.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_collect_preserves_registration_order() {
        let mut exporter = Exporter::new(Registry::default());
        exporter.register(Arc::new(FixedCollector {
            name: "first",
            result: Ok(vec![rank_family()]),
        }));
        exporter.register(Arc::new(FixedCollector {
            name: "second",
            result: Ok(vec![
                MetricFamily::new("coinmarketcap_pairs", "", MetricKind::Gauge, Vec::new(), "")
                    .unwrap(),
            ]),
        }));

        let families = exporter.collect().await.unwrap();
        let names: Vec<&str> = families.iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["coinmarketcap_rank", "coinmarketcap_pairs"]);
    }
}
