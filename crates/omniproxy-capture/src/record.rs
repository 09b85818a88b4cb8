//! The captured transaction model and its JSON wire format.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Placeholder stored in place of binary bodies.
pub const BINARY_SENTINEL: &str = "[binary content]";

/// A captured body: decoded JSON, text, or the binary sentinel.
///
/// Serializes by variant: `Parsed` as the JSON value, `Text` as a string,
/// `Binary` as the literal sentinel string.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyValue {
    /// Body decoded as structured JSON.
    Parsed(serde_json::Value),
    /// Body retained as UTF-8 text.
    Text(String),
    /// Binary body; the original bytes were discarded.
    Binary,
}

impl BodyValue {
    /// Renders the body as text for exports; `Parsed` is re-serialized.
    pub fn as_text(&self) -> String {
        match self {
            BodyValue::Parsed(v) => serde_json::to_string(v).unwrap_or_default(),
            BodyValue::Text(s) => s.clone(),
            BodyValue::Binary => BINARY_SENTINEL.to_string(),
        }
    }

    /// True if this is the binary sentinel.
    pub fn is_binary(&self) -> bool {
        matches!(self, BodyValue::Binary)
    }
}

impl Serialize for BodyValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            BodyValue::Parsed(v) => v.serialize(serializer),
            BodyValue::Text(s) => serializer.serialize_str(s),
            BodyValue::Binary => serializer.serialize_str(BINARY_SENTINEL),
        }
    }
}

impl<'de> Deserialize<'de> for BodyValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(match value {
            serde_json::Value::String(s) if s == BINARY_SENTINEL => BodyValue::Binary,
            serde_json::Value::String(s) => BodyValue::Text(s),
            serde_json::Value::Null => {
                return Err(D::Error::custom("body must not be null"));
            }
            other => BodyValue::Parsed(other),
        })
    }
}

/// The request half of a captured transaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    /// Uppercase HTTP method.
    pub method: String,
    /// Absolute URL.
    pub url: String,
    pub host: String,
    pub path: String,
    pub scheme: String,
    /// Lowercase-keyed headers with sensitive entries removed.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Query parameters, first value per key.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<BodyValue>,
    /// Size of the original body in bytes, regardless of retention.
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub body_size: i64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_binary: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content_type: String,
}

/// The response half of a captured transaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRecord {
    pub status: u16,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status_text: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<BodyValue>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_binary: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content_type: String,
    /// Size of the retained response body in bytes.
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub size: i64,
}

/// A captured HTTP transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub request: RequestRecord,
    #[serde(default)]
    pub response: ResponseRecord,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Wall-clock duration, microsecond resolution expressed in milliseconds.
    #[serde(default, skip_serializing_if = "is_zero_f64")]
    pub duration_ms: f64,
    /// Short error code when the exchange failed (e.g. "client_closed").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Record {
    /// Creates a record with the given request, stamped with the current
    /// time.
    pub fn started(request: RequestRecord) -> Self {
        Self {
            request,
            response: ResponseRecord::default(),
            start_time: Utc::now(),
            end_time: None,
            duration_ms: 0.0,
            error: None,
        }
    }

    /// Stamps the end time and derives `duration_ms` from the wall clock.
    /// May be 0 on coarse clocks.
    pub fn finish_timing(&mut self) {
        let end = Utc::now();
        self.end_time = Some(end);
        let micros = (end - self.start_time).num_microseconds().unwrap_or(0).max(0);
        self.duration_ms = micros as f64 / 1000.0;
    }
}

fn is_false(v: &bool) -> bool {
    !*v
}

fn is_zero_i64(v: &i64) -> bool {
    *v == 0
}

fn is_zero_f64(v: &f64) -> bool {
    *v == 0.0
}
