//! Upstream data source identity.

use std::fmt;

use serde_json::Value;

use crate::json::{FieldPath, JsonExt};

/// Top-level shape a response must have before any metric reads it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Envelope {
    /// The payload is a bare array of records.
    RecordArray,
    /// `{"status": {"error_code": 0, ...}, "data": ...}`
    StatusCode,
    /// An object carrying the named top-level field.
    RequiredField(String),
}

impl Envelope {
    /// Check `payload` against this envelope, describing the violation.
    pub fn check(&self, payload: &Value) -> Result<(), String> {
        match self {
            Envelope::RecordArray => {
                if payload.is_array() {
                    Ok(())
                } else {
                    Err(format!("expected an array of records, got {}", kind_of(payload)))
                }
            }
            Envelope::StatusCode => {
                if payload.get_optional(&FieldPath::key("data")).is_none() {
                    return Err("missing `data` field".to_string());
                }

                let code = payload
                    .get_optional(&FieldPath::nested(["status", "error_code"]))
                    .ok_or_else(|| "missing `status.error_code` field".to_string())?;

                if code.as_i64() == Some(0) {
                    return Ok(());
                }

                let message = payload
                    .get_optional(&FieldPath::nested(["status", "error_message"]))
                    .and_then(Value::as_str)
                    .unwrap_or("no error message");
                Err(format!("API reported error {}: {}", code, message))
            }
            Envelope::RequiredField(field) => {
                if payload.get_optional(&FieldPath::key(field.as_str())).is_some() {
                    Ok(())
                } else {
                    Err(format!("missing `{}` field", field))
                }
            }
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// One upstream JSON endpoint with fixed request parameters.
///
/// The full value is the cache key, so two sources that differ only in a
/// header or query parameter are cached independently.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DataSource {
    url: String,
    headers: Vec<(String, String)>,
    query: Vec<(String, String)>,
    envelope: Envelope,
}

impl DataSource {
    pub fn new(url: impl Into<String>, envelope: Envelope) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            envelope,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

// Header values carry API keys.
impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<&str> = self.headers.iter().map(|(name, _)| name.as_str()).collect();
        f.debug_struct("DataSource")
            .field("url", &self.url)
            .field("headers", &headers)
            .field("query", &self.query)
            .field("envelope", &self.envelope)
            .finish()
    }
}
