//! CoinMarketCap latest quotes collector.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{CollectError, Collector, LabeledFamily};
use crate::cache::ResponseCache;
use crate::extract::ExtractOpts;
use crate::family::{FamilyError, MetricFamily, MetricKind};
use crate::json::{FieldPath, Record};
use crate::labels::{LabelMap, field};
use crate::source::{DataSource, Envelope};

/// `(family name, field, help)` for values reported once per coin.
const COIN_METRICS: &[(&str, &str, &str)] = &[
    ("coinmarketcap_rank", "cmc_rank", "CoinMarketCap rank of the coin"),
    (
        "coinmarketcap_pairs",
        "num_market_pairs",
        "Number of market pairs the coin trades on",
    ),
    (
        "coinmarketcap_circulating_supply",
        "circulating_supply",
        "Coins currently circulating",
    ),
    (
        "coinmarketcap_total_supply",
        "total_supply",
        "Coins in existence minus burned coins",
    ),
    (
        "coinmarketcap_max_supply",
        "max_supply",
        "Maximum number of coins that will ever exist",
    ),
];

/// `(family name, field, help)` for values reported per coin and currency.
const QUOTE_METRICS: &[(&str, &str, &str)] = &[
    ("coinmarketcap_price", "price", "Coin price in the quote currency"),
    (
        "coinmarketcap_volume_24h",
        "volume_24h",
        "Trading volume over the last 24 hours",
    ),
    ("coinmarketcap_marketcap", "market_cap", "Market capitalization"),
    (
        "coinmarketcap_marketcap_dominance",
        "market_cap_dominance",
        "Share of the total market capitalization, in percent",
    ),
    (
        "coinmarketcap_percent_change_1h",
        "percent_change_1h",
        "Price change over the last hour, in percent",
    ),
    (
        "coinmarketcap_percent_change_24h",
        "percent_change_24h",
        "Price change over the last 24 hours, in percent",
    ),
    (
        "coinmarketcap_percent_change_7d",
        "percent_change_7d",
        "Price change over the last 7 days, in percent",
    ),
];

fn coin_labels() -> LabelMap {
    LabelMap::new().with("symbol", field("symbol"))
}

fn quote_labels() -> LabelMap {
    coin_labels().overlay(&LabelMap::new().with("currency", field("currency")))
}

fn gauges(
    metrics: &[(&str, &str, &str)],
    labels: &LabelMap,
) -> Result<Vec<(FieldPath, LabeledFamily)>, FamilyError> {
    metrics
        .iter()
        .map(|(name, key, help)| {
            let family = LabeledFamily::new(name, help, MetricKind::Gauge, "", labels.clone())?;
            Ok::<_, FamilyError>((FieldPath::key(*key), family))
        })
        .collect()
}

/// Copy `record`, setting string fields the label map reads.
fn with_fields(record: &Record, fields: &[(&str, &str)]) -> Record {
    let mut record = record.clone();
    for (key, value) in fields {
        record.insert(key.to_string(), Value::String(value.to_string()));
    }
    record
}

/// Collects quotes for a fixed list of symbols and currencies.
pub struct CoinMarketCapCollector {
    cache: Arc<ResponseCache>,
    source: DataSource,
    timestamps: bool,
}

impl CoinMarketCapCollector {
    pub fn new(
        cache: Arc<ResponseCache>,
        url: &str,
        api_key: &str,
        symbols: &[String],
        currencies: &[String],
        timestamps: bool,
    ) -> Self {
        let source = DataSource::new(url, Envelope::StatusCode)
            .with_header("Accepts", "application/json")
            .with_header("X-CMC_PRO_API_KEY", api_key)
            .with_query("symbol", symbols.join(","))
            .with_query("convert", currencies.join(","));

        Self {
            cache,
            source,
            timestamps,
        }
    }
}

#[async_trait]
impl Collector for CoinMarketCapCollector {
    fn name(&self) -> &'static str {
        "coinmarketcap"
    }

    async fn collect(&self) -> Result<Vec<MetricFamily>, CollectError> {
        let response = self.cache.get_or_fetch(&self.source).await?;
        let timestamp = self.timestamps.then(|| response.timestamp_ms());

        let mut coin_families = gauges(COIN_METRICS, &coin_labels())?;
        let mut quote_families = gauges(QUOTE_METRICS, &quote_labels())?;
        let opts = ExtractOpts::default();

        let coins = response.payload.get("data").and_then(Value::as_object);

        for (symbol, coin) in coins.into_iter().flatten() {
            let Some(coin) = coin.as_object() else {
                debug!(symbol = %symbol, "Skipping non-object coin entry");
                continue;
            };

            // The map key is the symbol that was asked for.
            let coin_record = with_fields(coin, &[("symbol", symbol.as_str())]);
            for (path, family) in coin_families.iter_mut() {
                family.try_add(&coin_record, path, &opts, timestamp)?;
            }

            let quotes = coin.get("quote").and_then(Value::as_object);
            for (currency, quote) in quotes.into_iter().flatten() {
                let Some(quote) = quote.as_object() else {
                    continue;
                };

                let quote_record = with_fields(
                    quote,
                    &[("symbol", symbol.as_str()), ("currency", currency.as_str())],
                );
                for (path, family) in quote_families.iter_mut() {
                    family.try_add(&quote_record, path, &opts, timestamp)?;
                }
            }
        }

        Ok(coin_families
            .into_iter()
            .chain(quote_families)
            .map(|(_, family)| family.into_family())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::family::SampleValue;
    use crate::upstream::{Fetcher, UpstreamError};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct StaticFetcher {
        payload: Value,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Fetcher for StaticFetcher {
        async fn fetch(&self, source: &DataSource) -> Result<Value, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            source
                .envelope()
                .check(&self.payload)
                .map_err(|reason| UpstreamError::Schema {
                    url: source.url().to_string(),
                    reason,
                })?;
            Ok(self.payload.clone())
        }
    }

    fn collector(payload: Value) -> (CoinMarketCapCollector, Arc<StaticFetcher>) {
        let fetcher = Arc::new(StaticFetcher {
            payload,
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(ResponseCache::new(
            fetcher.clone(),
            Duration::from_secs(300),
            16,
        ));
        let collector = CoinMarketCapCollector::new(
            cache,
            "https://cmc.example/quotes",
            "key",
            &["BTC".to_string()],
            &["USD".to_string()],
            true,
        );
        (collector, fetcher)
    }

    fn btc_payload() -> Value {
        json!({
            "data": {
                "BTC": {
                    "cmc_rank": 1,
                    "num_market_pairs": 500,
                    "quote": {
                        "USD": {
                            "price": 50000.0,
                            "volume_24h": 1e9,
                            "market_cap": 1e12,
                            "market_cap_dominance": 40.0
                        }
                    }
                }
            },
            "status": {"error_code": 0}
        })
    }

    fn by_name<'a>(families: &'a [MetricFamily], name: &str) -> &'a MetricFamily {
        families.iter().find(|f| f.name() == name).unwrap()
    }

    #[tokio::test]
    async fn test_btc_quote() {
        let (collector, _) = collector(btc_payload());
        let families = collector.collect().await.unwrap();

        assert_eq!(families.len(), COIN_METRICS.len() + QUOTE_METRICS.len());

        let rank = by_name(&families, "coinmarketcap_rank");
        assert_eq!(rank.samples().len(), 1);
        assert_eq!(rank.samples()[0].label_values, ["BTC"]);
        assert_eq!(rank.samples()[0].value, SampleValue::Number(1.0));

        let price = by_name(&families, "coinmarketcap_price");
        assert_eq!(price.label_names(), ["symbol", "currency"]);
        assert_eq!(price.samples().len(), 1);
        assert_eq!(price.samples()[0].label_values, ["BTC", "USD"]);
        assert_eq!(price.samples()[0].value, SampleValue::Number(50000.0));

        let dominance = by_name(&families, "coinmarketcap_marketcap_dominance");
        assert_eq!(dominance.samples()[0].value, SampleValue::Number(40.0));
    }

    #[tokio::test]
    async fn test_absent_fields_emit_empty_families() {
        let (collector, _) = collector(btc_payload());
        let families = collector.collect().await.unwrap();

        assert!(by_name(&families, "coinmarketcap_max_supply").is_empty());
        assert!(by_name(&families, "coinmarketcap_percent_change_7d").is_empty());
    }

    #[tokio::test]
    async fn test_null_supply_becomes_zero() {
        let mut payload = btc_payload();
        payload["data"]["BTC"]["max_supply"] = Value::Null;
        let (collector, _) = collector(payload);

        let families = collector.collect().await.unwrap();
        let max_supply = by_name(&families, "coinmarketcap_max_supply");
        assert_eq!(max_supply.samples()[0].value, SampleValue::Number(0.0));
    }

    #[tokio::test]
    async fn test_api_error_fails_collection() {
        let payload = json!({
            "data": {},
            "status": {"error_code": 1002, "error_message": "API key missing."}
        });
        let (collector, _) = collector(payload);

        let err = collector.collect().await.unwrap_err();
        assert!(matches!(
            err,
            CollectError::Upstream(UpstreamError::Schema { .. })
        ));
    }

    #[tokio::test]
    async fn test_repeat_collect_uses_cache() {
        let (collector, fetcher) = collector(btc_payload());

        let first = collector.collect().await.unwrap();
        let second = collector.collect().await.unwrap();

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        let ts = |families: &[MetricFamily]| {
            by_name(families, "coinmarketcap_price").samples()[0].timestamp_ms
        };
        assert_eq!(ts(&first), ts(&second));
    }

    #[test]
    fn test_request_parameters() {
        let (collector, _) = collector(btc_payload());
        let source = &collector.source;

        assert_eq!(
            source.query(),
            [
                ("symbol".to_string(), "BTC".to_string()),
                ("convert".to_string(), "USD".to_string()),
            ]
        );
        assert!(source
            .headers()
            .iter()
            .any(|(name, value)| name == "X-CMC_PRO_API_KEY" && value == "key"));
    }
}
