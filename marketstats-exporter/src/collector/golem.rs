//! Golem network statistics collectors.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{CollectError, Collector, LabeledFamily};
use crate::cache::ResponseCache;
use crate::extract::{ExtractOpts, GIB, flatten};
use crate::family::{FamilyError, MetricFamily, MetricKind};
use crate::json::{FieldPath, JsonExt, as_number, get_indexed, get_last};
use crate::labels::{LabelMap, constant, field, field_or};
use crate::source::{DataSource, Envelope};

const PRICING_MODEL: &str = "golem.com.pricing.model";
const LINEAR_COEFFS: &str = "golem.com.pricing.model.linear.coeffs";
const CAPABILITIES: &str = "golem.runtime.capabilities";

/// Labels shared by every provider family.
fn provider_labels() -> LabelMap {
    LabelMap::new()
        .with("node_id", field("node_id"))
        .with("subnet", field("golem.node.debug.subnet"))
        .with("runtime", field("golem.runtime.name"))
}

fn no_labels() -> LabelMap {
    LabelMap::new()
}

fn glm_labels() -> LabelMap {
    LabelMap::new().with("currency", constant("GLM"))
}

fn cpu_labels() -> LabelMap {
    LabelMap::new()
        .with("cpu_vendor", field_or("golem.inf.cpu.vendor", "unknown"))
        .with("cpu_architecture", field("golem.inf.cpu.architecture"))
}

/// Declaration of one per-provider metric.
struct ProviderMetric {
    name: &'static str,
    help: &'static str,
    kind: MetricKind,
    unit: &'static str,
    field: &'static str,
    opts: ExtractOpts,
    extra_labels: fn() -> LabelMap,
    /// Only emitted for providers using the linear pricing model.
    linear_only: bool,
}

const fn coeff(index: usize) -> ExtractOpts {
    ExtractOpts {
        subkey: Some(index),
        multiplier: None,
    }
}

const RAW: ExtractOpts = ExtractOpts {
    subkey: None,
    multiplier: None,
};

const GIB_TO_BYTES: ExtractOpts = ExtractOpts {
    subkey: None,
    multiplier: Some(GIB),
};

static PROVIDER_METRICS: [ProviderMetric; 8] = [
    ProviderMetric {
        name: "online",
        help: "Whether the provider is online",
        kind: MetricKind::Gauge,
        unit: "bool",
        field: "online",
        opts: RAW,
        extra_labels: no_labels,
        linear_only: false,
    },
    ProviderMetric {
        name: "earnings_total",
        help: "Total earnings reported for the provider",
        kind: MetricKind::Counter,
        unit: "",
        field: "earnings_total",
        opts: RAW,
        extra_labels: glm_labels,
        linear_only: false,
    },
    ProviderMetric {
        name: "mem",
        help: "Memory offered by the provider",
        kind: MetricKind::Gauge,
        unit: "bytes",
        field: "golem.inf.mem.gib",
        opts: GIB_TO_BYTES,
        extra_labels: no_labels,
        linear_only: false,
    },
    ProviderMetric {
        name: "cpu_threads",
        help: "CPU threads offered by the provider",
        kind: MetricKind::Gauge,
        unit: "",
        field: "golem.inf.cpu.threads",
        opts: RAW,
        extra_labels: cpu_labels,
        linear_only: false,
    },
    ProviderMetric {
        name: "storage",
        help: "Storage offered by the provider",
        kind: MetricKind::Gauge,
        unit: "bytes",
        field: "golem.inf.storage.gib",
        opts: GIB_TO_BYTES,
        extra_labels: no_labels,
        linear_only: false,
    },
    ProviderMetric {
        name: "price_start",
        help: "Fixed start price of the linear pricing model",
        kind: MetricKind::Gauge,
        unit: "",
        field: LINEAR_COEFFS,
        opts: coeff(0),
        extra_labels: glm_labels,
        linear_only: true,
    },
    ProviderMetric {
        name: "price_per_second",
        help: "Price per second of the linear pricing model",
        kind: MetricKind::Gauge,
        unit: "",
        field: LINEAR_COEFFS,
        opts: coeff(1),
        extra_labels: glm_labels,
        linear_only: true,
    },
    ProviderMetric {
        name: "price_per_cpu_second",
        help: "Price per CPU second of the linear pricing model",
        kind: MetricKind::Gauge,
        unit: "",
        field: LINEAR_COEFFS,
        opts: coeff(2),
        extra_labels: glm_labels,
        linear_only: true,
    },
];

/// Collects per-provider metrics from the online provider list.
pub struct GolemOnlineCollector {
    cache: Arc<ResponseCache>,
    source: DataSource,
    capabilities: Vec<String>,
    timestamps: bool,
}

impl GolemOnlineCollector {
    pub fn new(
        cache: Arc<ResponseCache>,
        url: &str,
        capabilities: Vec<String>,
        timestamps: bool,
    ) -> Self {
        Self {
            cache,
            source: DataSource::new(url, Envelope::RecordArray),
            capabilities,
            timestamps,
        }
    }

    fn build_families(&self) -> Result<ProviderFamilies, FamilyError> {
        let base = provider_labels();

        let metrics = PROVIDER_METRICS
            .iter()
            .map(|metric| {
                let family = LabeledFamily::new(
                    &format!("golem_provider_{}", metric.name),
                    metric.help,
                    metric.kind,
                    metric.unit,
                    base.overlay(&(metric.extra_labels)()),
                )?;
                Ok::<_, FamilyError>((metric, FieldPath::key(metric.field), family))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let capabilities = LabeledFamily::new(
            "golem_provider_runtime_capabilities",
            "Runtime capabilities advertised by the provider",
            MetricKind::StateSet,
            "",
            base,
        )?;

        Ok(ProviderFamilies {
            metrics,
            capabilities,
        })
    }
}

struct ProviderFamilies {
    metrics: Vec<(&'static ProviderMetric, FieldPath, LabeledFamily)>,
    capabilities: LabeledFamily,
}

impl ProviderFamilies {
    fn into_families(self) -> Vec<MetricFamily> {
        self.metrics
            .into_iter()
            .map(|(_, _, family)| family.into_family())
            .chain(std::iter::once(self.capabilities.into_family()))
            .collect()
    }
}

#[async_trait]
impl Collector for GolemOnlineCollector {
    fn name(&self) -> &'static str {
        "golem_online"
    }

    async fn collect(&self) -> Result<Vec<MetricFamily>, CollectError> {
        let response = self.cache.get_or_fetch(&self.source).await?;
        let timestamp = self.timestamps.then(|| response.timestamp_ms());
        let mut families = self.build_families()?;

        let providers = response
            .payload
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or_default();

        let pricing_model = FieldPath::key(PRICING_MODEL);
        let capabilities = FieldPath::key(CAPABILITIES);

        for provider in providers {
            let Some(provider) = provider.as_object() else {
                debug!(source = %self.source, "Skipping non-object provider entry");
                continue;
            };
            let provider = flatten(provider.clone(), "data");

            let linear = provider
                .get_optional(&pricing_model)
                .and_then(Value::as_str)
                == Some("linear");

            for (metric, path, family) in families.metrics.iter_mut() {
                if metric.linear_only && !linear {
                    continue;
                }
                family.try_add(&provider, path, &metric.opts, timestamp)?;
            }

            families.capabilities.try_add_states(
                &provider,
                &capabilities,
                &self.capabilities,
                timestamp,
            )?;
        }

        debug!(
            source = %self.source,
            providers = providers.len(),
            "Collected Golem provider metrics"
        );

        Ok(families.into_families())
    }
}

/// Collects the number of providers currently computing.
pub struct GolemUtilizationCollector {
    cache: Arc<ResponseCache>,
    source: DataSource,
    timestamps: bool,
}

impl GolemUtilizationCollector {
    pub fn new(cache: Arc<ResponseCache>, url: &str, timestamps: bool) -> Self {
        Self {
            cache,
            source: DataSource::new(url, Envelope::RequiredField("data".to_string())),
            timestamps,
        }
    }
}

#[async_trait]
impl Collector for GolemUtilizationCollector {
    fn name(&self) -> &'static str {
        "golem_utilization"
    }

    async fn collect(&self) -> Result<Vec<MetricFamily>, CollectError> {
        let response = self.cache.get_or_fetch(&self.source).await?;
        let mut computing = MetricFamily::new(
            "golem_providers_computing_count",
            "Number of providers currently computing",
            MetricKind::Gauge,
            Vec::new(),
            "",
        )?;

        // data.result[0].values is a series of [unix_seconds, "value"] pairs.
        let result = response
            .payload
            .require(&FieldPath::nested(["data", "result"]))?;
        let values = get_indexed(result, 0, "data/result")?.require(&FieldPath::key("values"))?;
        let latest = get_last(values, "data/result/0/values")?;

        let observed_at = as_number(get_indexed(latest, 0, "values[-1]")?, "values[-1][0]")?;
        let value = as_number(get_indexed(latest, 1, "values[-1]")?, "values[-1][1]")?;

        let timestamp = self.timestamps.then(|| (observed_at * 1000.0) as i64);
        computing.add_value(Vec::new(), value, timestamp)?;

        Ok(vec![computing])
    }
}
