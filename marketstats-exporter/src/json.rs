//! Typed accessors over loosely structured upstream JSON.
//!
//! Upstream payloads are irregular: fields come and go between providers,
//! values are sometimes `null`, and numbers are occasionally encoded as
//! strings. Every access here has an explicit contract:
//!
//! - [`JsonExt::get_optional`]: absence is `None`, never an error.
//! - [`JsonExt::require`]: absence is [`ExtractError::MissingField`].
//! - [`get_indexed`] / [`get_last`]: a non-array or out-of-range index is a
//!   schema violation.

use std::fmt;

use serde_json::{Map, Value};
use thiserror::Error;

/// One raw upstream record (a provider, a coin, a quote).
pub type Record = Map<String, Value>;

/// Errors raised while reading fields that must be present and well formed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractError {
    #[error("required field `{0}` is missing")]
    MissingField(String),

    #[error("field `{field}` is not an array, cannot select element {index}")]
    NotAnArray { field: String, index: usize },

    #[error("field `{field}` has {len} elements, element {index} is out of range")]
    IndexOutOfRange {
        field: String,
        index: usize,
        len: usize,
    },

    #[error("field `{field}` is not numeric: {value}")]
    NotNumeric { field: String, value: String },
}

/// Address of a field inside a record.
///
/// Golem keys contain dots themselves (`golem.inf.mem.gib`), so a path is a
/// list of literal keys and a single key is never split.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    /// A single top-level key, taken literally.
    pub fn key(key: impl Into<String>) -> Self {
        Self {
            segments: vec![key.into()],
        }
    }

    /// A path through nested objects, outermost key first.
    pub fn nested<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

impl From<&str> for FieldPath {
    fn from(key: &str) -> Self {
        Self::key(key)
    }
}

/// Field lookups on JSON objects.
pub trait JsonExt {
    /// Resolve `path`, returning `None` when any segment is absent.
    ///
    /// A `null` leaf is returned as `Some(Value::Null)`; a `null` or
    /// non-object intermediate counts as absent.
    fn get_optional(&self, path: &FieldPath) -> Option<&Value>;

    /// Resolve `path`, failing with [`ExtractError::MissingField`] if absent.
    fn require(&self, path: &FieldPath) -> Result<&Value, ExtractError> {
        self.get_optional(path)
            .ok_or_else(|| ExtractError::MissingField(path.to_string()))
    }
}

impl JsonExt for Record {
    fn get_optional(&self, path: &FieldPath) -> Option<&Value> {
        let (first, rest) = path.segments.split_first()?;
        let mut current = self.get(first)?;
        for segment in rest {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }
}

impl JsonExt for Value {
    fn get_optional(&self, path: &FieldPath) -> Option<&Value> {
        self.as_object()?.get_optional(path)
    }
}

/// Select element `index` of an array value.
pub fn get_indexed<'a>(
    value: &'a Value,
    index: usize,
    field: &str,
) -> Result<&'a Value, ExtractError> {
    let items = value.as_array().ok_or_else(|| ExtractError::NotAnArray {
        field: field.to_string(),
        index,
    })?;

    items.get(index).ok_or_else(|| ExtractError::IndexOutOfRange {
        field: field.to_string(),
        index,
        len: items.len(),
    })
}

/// Select the last element of a non-empty array value.
pub fn get_last<'a>(value: &'a Value, field: &str) -> Result<&'a Value, ExtractError> {
    let items = value.as_array().ok_or_else(|| ExtractError::NotAnArray {
        field: field.to_string(),
        index: 0,
    })?;

    items.last().ok_or_else(|| ExtractError::IndexOutOfRange {
        field: field.to_string(),
        index: 0,
        len: 0,
    })
}

/// Coerce a JSON value into a sample value.
///
/// `null` becomes 0, booleans become 0/1, and numeric strings are parsed.
pub fn as_number(value: &Value, field: &str) -> Result<f64, ExtractError> {
    let not_numeric = || ExtractError::NotNumeric {
        field: field.to_string(),
        value: value.to_string(),
    };

    match value {
        Value::Null => Ok(0.0),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => n.as_f64().ok_or_else(not_numeric),
        Value::String(s) => s.trim().parse::<f64>().map_err(|_| not_numeric()),
        Value::Array(_) | Value::Object(_) => Err(not_numeric()),
    }
}

/// Render a JSON value as a label value.
pub fn as_label(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_dotted_key_is_literal() {
        let r = record(json!({"golem.inf.mem.gib": 8.0}));
        let path = FieldPath::key("golem.inf.mem.gib");

        assert_eq!(r.get_optional(&path), Some(&json!(8.0)));
    }

    #[test]
    fn test_nested_lookup() {
        let r = record(json!({"status": {"error_code": 0}}));
        let path = FieldPath::nested(["status", "error_code"]);

        assert_eq!(r.get_optional(&path), Some(&json!(0)));
        assert_eq!(path.to_string(), "status/error_code");
    }

    #[test]
    fn test_absent_and_null_intermediate() {
        let r = record(json!({"status": null}));

        assert!(r.get_optional(&FieldPath::key("missing")).is_none());
        assert!(
            r.get_optional(&FieldPath::nested(["status", "error_code"]))
                .is_none()
        );
    }

    #[test]
    fn test_null_leaf_is_present() {
        let r = record(json!({"earnings_total": null}));

        assert_eq!(
            r.get_optional(&FieldPath::key("earnings_total")),
            Some(&Value::Null)
        );
    }

    #[test]
    fn test_require_missing() {
        let r = record(json!({}));
        let err = r.require(&FieldPath::key("node_id")).unwrap_err();

        assert_eq!(err, ExtractError::MissingField("node_id".to_string()));
    }

    #[test]
    fn test_get_indexed() {
        let coeffs = json!([0.0, 0.5, 1.5]);

        assert_eq!(get_indexed(&coeffs, 2, "coeffs").unwrap(), &json!(1.5));
        assert!(matches!(
            get_indexed(&coeffs, 3, "coeffs"),
            Err(ExtractError::IndexOutOfRange { len: 3, .. })
        ));
        assert!(matches!(
            get_indexed(&json!(1.0), 0, "coeffs"),
            Err(ExtractError::NotAnArray { .. })
        ));
    }

    #[test]
    fn test_get_last() {
        assert_eq!(get_last(&json!([1, 2, 3]), "v").unwrap(), &json!(3));
        assert!(get_last(&json!([]), "v").is_err());
    }

    #[test]
    fn test_as_number() {
        assert_eq!(as_number(&Value::Null, "f").unwrap(), 0.0);
        assert_eq!(as_number(&json!(true), "f").unwrap(), 1.0);
        assert_eq!(as_number(&json!(false), "f").unwrap(), 0.0);
        assert_eq!(as_number(&json!(4), "f").unwrap(), 4.0);
        assert_eq!(as_number(&json!("12.5"), "f").unwrap(), 12.5);
        assert!(as_number(&json!("abc"), "f").is_err());
        assert!(as_number(&json!([1]), "f").is_err());
    }

    #[test]
    fn test_as_label() {
        assert_eq!(as_label(&json!("vm")), "vm");
        assert_eq!(as_label(&json!(3)), "3");
        assert_eq!(as_label(&Value::Null), "");
    }
}
