//! Collectors turn cached upstream payloads into metric families.
//!
//! Every [`Collector::collect`] call is independent: families are built from
//! scratch, filled from one cache-checked fetch per source, and handed back
//! whole. Any error aborts the call so a scrape never sees a partial
//! snapshot of a source.

pub mod coinmarketcap;
pub mod golem;

use async_trait::async_trait;
use thiserror::Error;

use crate::extract::{ExtractError, ExtractOpts, extract, extract_states};
use crate::family::{FamilyError, MetricFamily, MetricKind, SampleValue};
use crate::json::{FieldPath, Record};
use crate::labels::{LabelError, LabelMap};
use crate::upstream::UpstreamError;

pub use coinmarketcap::CoinMarketCapCollector;
pub use golem::{GolemOnlineCollector, GolemUtilizationCollector};

/// Errors that abort a collect() call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CollectError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Label(#[from] LabelError),

    #[error(transparent)]
    Family(#[from] FamilyError),

    #[error("malformed record: {0}")]
    Extract(#[from] ExtractError),
}

/// A source of metric families, invoked on every scrape.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Short name used in logs and scrape errors.
    fn name(&self) -> &'static str;

    /// Fetch (through the cache) and build every family this collector owns.
    ///
    /// Families are returned in a fixed order, including empty ones.
    async fn collect(&self) -> Result<Vec<MetricFamily>, CollectError>;
}

/// A metric family paired with the label schema its samples derive from.
#[derive(Debug)]
pub struct LabeledFamily {
    family: MetricFamily,
    labels: LabelMap,
}

impl LabeledFamily {
    pub fn new(
        name: &str,
        help: &str,
        kind: MetricKind,
        unit: &str,
        labels: LabelMap,
    ) -> Result<Self, FamilyError> {
        let family = MetricFamily::new(name, help, kind, labels.names(), unit)?;
        Ok(Self { family, labels })
    }

    /// Add a sample from `path` if the record carries it.
    ///
    /// Returns whether a sample was added. Labels are only derived for
    /// records that have the value.
    pub fn try_add(
        &mut self,
        record: &Record,
        path: &FieldPath,
        opts: &ExtractOpts,
        timestamp_ms: Option<i64>,
    ) -> Result<bool, CollectError> {
        let Some(value) = extract(record, path, opts)? else {
            return Ok(false);
        };

        let labels = self.labels.derive(record)?;
        self.family.add_value(labels, value, timestamp_ms)?;
        Ok(true)
    }

    /// Add a state-set sample from the list at `path` if the record carries it.
    pub fn try_add_states(
        &mut self,
        record: &Record,
        path: &FieldPath,
        states: &[String],
        timestamp_ms: Option<i64>,
    ) -> Result<bool, CollectError> {
        let Some(states) = extract_states(record, path, states)? else {
            return Ok(false);
        };

        let labels = self.labels.derive(record)?;
        self.family
            .add_sample(labels, SampleValue::States(states), timestamp_ms)?;
        Ok(true)
    }

    pub fn family(&self) -> &MetricFamily {
        &self.family
    }

    pub fn into_family(self) -> MetricFamily {
        self.family
    }
}
