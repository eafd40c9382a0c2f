//! Field extraction from raw upstream records.

use serde_json::Value;

use crate::family::States;
use crate::json::{FieldPath, JsonExt, Record, as_label, as_number, get_indexed};

pub use crate::json::ExtractError;

/// Bytes per GiB, for fields reported in GiB.
pub const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Options applied to an extracted value.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExtractOpts {
    /// Select this element when the field holds an array.
    pub subkey: Option<usize>,
    /// Multiply the numeric result by this constant.
    pub multiplier: Option<f64>,
}

impl ExtractOpts {
    pub fn subkey(index: usize) -> Self {
        Self {
            subkey: Some(index),
            multiplier: None,
        }
    }

    pub fn multiplier(multiplier: f64) -> Self {
        Self {
            subkey: None,
            multiplier: Some(multiplier),
        }
    }
}

/// Extract a numeric value from `record`.
///
/// Returns `Ok(None)` when the field is absent, and treats a `null` value as
/// zero. Selecting a subkey from something that is not an array, or past the
/// end of one, is an error.
pub fn extract(
    record: &Record,
    path: &FieldPath,
    opts: &ExtractOpts,
) -> Result<Option<f64>, ExtractError> {
    let Some(value) = record.get_optional(path) else {
        return Ok(None);
    };

    let field = path.to_string();
    let value = match opts.subkey {
        Some(index) => get_indexed(value, index, &field)?,
        None => value,
    };

    let mut number = as_number(value, &field)?;
    if let Some(multiplier) = opts.multiplier {
        number *= multiplier;
    }

    Ok(Some(number))
}

/// Extract state-set membership from a list-valued field.
///
/// Every name in `states` is present in the result, in declaration order
/// and once, set when the field's list contains it. A scalar string counts
/// as a one-element list.
pub fn extract_states(
    record: &Record,
    path: &FieldPath,
    states: &[String],
) -> Result<Option<States>, ExtractError> {
    let Some(value) = record.get_optional(path) else {
        return Ok(None);
    };

    let members: Vec<String> = match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().map(as_label).collect(),
        Value::String(s) => vec![s.clone()],
        _ => {
            return Err(ExtractError::NotAnArray {
                field: path.to_string(),
                index: 0,
            });
        }
    };

    let mut result = States::with_capacity(states.len());
    for state in states {
        if !result.iter().any(|(name, _)| name == state) {
            result.push((state.clone(), members.contains(state)));
        }
    }
    Ok(Some(result))
}

/// Merge the object stored under `key` into the record's top level.
///
/// Nested entries win over top-level entries of the same name. A missing or
/// non-object value leaves the record untouched.
pub fn flatten(mut record: Record, key: &str) -> Record {
    if !matches!(record.get(key), Some(Value::Object(_))) {
        return record;
    }
    if let Some(Value::Object(nested)) = record.remove(key) {
        record.extend(nested);
    }
    record
}
