//! Label schemas and label value derivation.
//!
//! A [`LabelMap`] is an ordered list of `(label name, extractor)` pairs. Every
//! sample in a family derives its label values from the same map, so the
//! label arity of a family never varies between records.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::json::{FieldPath, JsonExt, Record, as_label};

/// Derives one label value from a record, or names the field it is missing.
pub type LabelFn = Arc<dyn Fn(&Record) -> Result<String, FieldPath> + Send + Sync>;

/// Label derivation errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LabelError {
    #[error("label `{label}` requires field `{field}`, which is missing")]
    MissingLabelField { label: String, field: String },
}

/// Label value read from a field that every record must carry.
pub fn field(path: impl Into<FieldPath>) -> LabelFn {
    let path = path.into();
    Arc::new(move |record| {
        record
            .get_optional(&path)
            .map(as_label)
            .ok_or_else(|| path.clone())
    })
}

/// Label value read from an optional field, with a fallback.
pub fn field_or(path: impl Into<FieldPath>, default: impl Into<String>) -> LabelFn {
    let path = path.into();
    let default = default.into();
    Arc::new(move |record| {
        Ok(record
            .get_optional(&path)
            .map(as_label)
            .unwrap_or_else(|| default.clone()))
    })
}

/// Label value that is the same for every record.
pub fn constant(value: impl Into<String>) -> LabelFn {
    let value = value.into();
    Arc::new(move |_| Ok(value.clone()))
}

/// Ordered label schema for one metric family.
#[derive(Clone, Default)]
pub struct LabelMap {
    entries: Vec<(String, LabelFn)>,
}

impl LabelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a label, replacing an existing label of the same name in place.
    pub fn with(mut self, name: impl Into<String>, derive: LabelFn) -> Self {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = derive,
            None => self.entries.push((name, derive)),
        }
        self
    }

    /// Overlay `extra` onto this map.
    ///
    /// Base labels keep their positions; an extra label with a base name
    /// replaces that entry's extractor. Remaining extra labels follow in
    /// their own order.
    pub fn overlay(&self, extra: &LabelMap) -> LabelMap {
        extra
            .entries
            .iter()
            .fold(self.clone(), |map, (name, derive)| {
                map.with(name.clone(), derive.clone())
            })
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Derive label values for `record`, in declaration order.
    pub fn derive(&self, record: &Record) -> Result<Vec<String>, LabelError> {
        self.entries
            .iter()
            .map(|(label, derive)| {
                derive(record).map_err(|field| LabelError::MissingLabelField {
                    label: label.clone(),
                    field: field.to_string(),
                })
            })
            .collect()
    }
}

impl fmt::Debug for LabelMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LabelMap")
            .field("names", &self.names())
            .finish()
    }
}
