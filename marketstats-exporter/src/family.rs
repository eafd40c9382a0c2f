//! Metric families assembled fresh on every scrape.

use std::collections::HashSet;

use thiserror::Error;

use crate::naming::{family_name, is_valid_label_name};

/// Errors raised by inconsistent family declarations or samples.
///
/// These indicate that a label schema and a metric declaration disagree;
/// they never occur for well-formed collectors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FamilyError {
    #[error("family `{family}` declares label `{label}` more than once")]
    DuplicateLabel { family: String, label: String },

    #[error("family `{family}` declares invalid label name `{label}`")]
    InvalidLabelName { family: String, label: String },

    #[error("family `{family}` expects {expected} label values, got {got}")]
    LabelArityMismatch {
        family: String,
        expected: usize,
        got: usize,
    },

    #[error("family `{family}` of kind {kind} cannot hold this sample value")]
    KindMismatch { family: String, kind: &'static str },

    #[error("counter `{family}` received negative value {value}")]
    NegativeCounter { family: String, value: f64 },
}

/// The Prometheus type of a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Gauge,
    Counter,
    /// Membership across a fixed set of named states.
    StateSet,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
            MetricKind::StateSet => "stateset",
        }
    }
}

/// State-set membership, in the order the states were declared.
pub type States = Vec<(String, bool)>;

/// The value of one sample.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleValue {
    Number(f64),
    States(States),
}

/// One observation within a family.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Label values, in the family's label name order.
    pub label_values: Vec<String>,
    pub value: SampleValue,
    /// Capture time of the upstream response, in milliseconds since epoch.
    pub timestamp_ms: Option<i64>,
}

/// A named, typed group of samples sharing one label schema.
#[derive(Debug, Clone)]
pub struct MetricFamily {
    name: String,
    help: String,
    kind: MetricKind,
    label_names: Vec<String>,
    unit: String,
    samples: Vec<Sample>,
}

impl MetricFamily {
    /// Declare a family. The exposed name gets `unit` as a suffix.
    pub fn new(
        name: &str,
        help: impl Into<String>,
        kind: MetricKind,
        label_names: Vec<String>,
        unit: &str,
    ) -> Result<Self, FamilyError> {
        let name = family_name(name, unit);

        let mut seen = HashSet::with_capacity(label_names.len());
        for label in label_names.iter() {
            if !is_valid_label_name(label) || (kind == MetricKind::StateSet && *label == name) {
                return Err(FamilyError::InvalidLabelName {
                    family: name,
                    label: label.clone(),
                });
            }
            if !seen.insert(label.clone()) {
                return Err(FamilyError::DuplicateLabel {
                    family: name,
                    label: label.clone(),
                });
            }
        }

        Ok(Self {
            name,
            help: help.into(),
            kind,
            label_names,
            unit: unit.to_string(),
            samples: Vec::new(),
        })
    }

    /// Append a sample after checking its arity and value against the family.
    pub fn add_sample(
        &mut self,
        label_values: Vec<String>,
        value: SampleValue,
        timestamp_ms: Option<i64>,
    ) -> Result<(), FamilyError> {
        if label_values.len() != self.label_names.len() {
            return Err(FamilyError::LabelArityMismatch {
                family: self.name.clone(),
                expected: self.label_names.len(),
                got: label_values.len(),
            });
        }

        match (&value, self.kind) {
            (SampleValue::Number(v), MetricKind::Counter) if *v < 0.0 => {
                return Err(FamilyError::NegativeCounter {
                    family: self.name.clone(),
                    value: *v,
                });
            }
            (SampleValue::Number(_), MetricKind::Gauge | MetricKind::Counter)
            | (SampleValue::States(_), MetricKind::StateSet) => {}
            _ => {
                return Err(FamilyError::KindMismatch {
                    family: self.name.clone(),
                    kind: self.kind.as_str(),
                });
            }
        }

        self.samples.push(Sample {
            label_values,
            value,
            timestamp_ms,
        });
        Ok(())
    }

    pub fn add_value(
        &mut self,
        label_values: Vec<String>,
        value: f64,
        timestamp_ms: Option<i64>,
    ) -> Result<(), FamilyError> {
        self.add_sample(label_values, SampleValue::Number(value), timestamp_ms)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn help(&self) -> &str {
        &self.help
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn label_names(&self) -> &[String] {
        &self.label_names
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
