//! The record data model and InfluxDB v2 Line Protocol encoding.
//!
//! A [`Record`] is the unit of work flowing through the bridge: the
//! measurement name, a set of tag dimensions, and the measured field values.
//! Records carry no timestamp — the sink always receives the wall clock at
//! forward time, assigned by the egestion worker.
//!
//! Line Protocol format:
//! ```text
//! measurement,tag1=val1,tag2=val2 field1=val1,field2=val2 timestamp_ns
//! ```
//!
//! See: <https://docs.influxdata.com/influxdb/v2/reference/syntax/line-protocol/>

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A value that can be stored in an InfluxDB field.
///
/// Deserialization is untagged, so queue-persisted records round-trip through
/// plain JSON values. Integers are tried before floats so `3` stays `3i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit floating point.
    Float(f64),
    /// Boolean value.
    Boolean(bool),
    /// UTF-8 string.
    Text(String),
}

impl FieldValue {
    /// Format this value for InfluxDB Line Protocol.
    ///
    /// - Integer: suffixed with `i` (e.g., `42i`)
    /// - Float: written as-is (e.g., `3.14`)
    /// - Boolean: `true` or `false`
    /// - Text: quoted with double quotes, inner quotes escaped (e.g., `"hello"`)
    pub fn to_line_protocol(&self) -> String {
        match self {
            FieldValue::Integer(v) => format!("{}i", v),
            FieldValue::Float(v) => format!("{}", v),
            FieldValue::Boolean(v) => v.to_string(),
            FieldValue::Text(v) => {
                let escaped = v.replace('\\', "\\\\").replace('"', "\\\"");
                format!("\"{}\"", escaped)
            }
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_line_protocol())
    }
}

/// The structured unit moving through the bridge pipeline.
///
/// Well-formed only when decoded via [`Record::from_payload`]: the payload
/// must be a JSON object with a string `measurement`, a string-to-string
/// `tags` object, and a non-empty `fields` object of number, string, or
/// boolean values. Extra keys are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Metric family identifier.
    pub measurement: String,

    /// Dimensional labels, sorted by key.
    pub tags: BTreeMap<String, String>,

    /// Measured quantities. Never empty.
    pub fields: BTreeMap<String, FieldValue>,
}

impl Record {
    /// Decode a raw inbound payload into a record.
    ///
    /// This is the single well-formedness gate of the pipeline: anything that
    /// fails here is discarded at ingestion and never enqueued.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(payload)?;
        Self::from_json(&value)
    }

    /// Decode an already-parsed JSON value into a record.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let object = value.as_object().ok_or(Error::NotAnObject)?;

        let measurement = object
            .get("measurement")
            .ok_or(Error::MissingField {
                field: "measurement",
            })?
            .as_str()
            .ok_or_else(|| Error::InvalidField {
                field: "measurement",
                reason: "not a string".to_string(),
            })?
            .to_string();

        let raw_tags = object
            .get("tags")
            .ok_or(Error::MissingField { field: "tags" })?
            .as_object()
            .ok_or_else(|| Error::InvalidField {
                field: "tags",
                reason: "not an object".to_string(),
            })?;

        let mut tags = BTreeMap::new();
        for (key, tag_value) in raw_tags {
            let tag_value = tag_value.as_str().ok_or_else(|| Error::InvalidField {
                field: "tags",
                reason: format!("value for '{}' is not a string", key),
            })?;
            tags.insert(key.clone(), tag_value.to_string());
        }

        let raw_fields = object
            .get("fields")
            .ok_or(Error::MissingField { field: "fields" })?
            .as_object()
            .ok_or_else(|| Error::InvalidField {
                field: "fields",
                reason: "not an object".to_string(),
            })?;

        if raw_fields.is_empty() {
            return Err(Error::InvalidField {
                field: "fields",
                reason: "must contain at least one field".to_string(),
            });
        }

        let mut fields = BTreeMap::new();
        for (key, field_value) in raw_fields {
            fields.insert(key.clone(), decode_field_value(key, field_value)?);
        }

        Ok(Self {
            measurement,
            tags,
            fields,
        })
    }

    /// Encode this record as a single Line Protocol point.
    ///
    /// Tags are emitted in key order (`BTreeMap` iteration), which is the
    /// canonical form InfluxDB recommends.
    pub fn to_line_protocol(&self, timestamp_ns: u64) -> String {
        let mut line = escape_measurement(&self.measurement);

        for (key, value) in &self.tags {
            line.push(',');
            line.push_str(&escape_tag_part(key));
            line.push('=');
            line.push_str(&escape_tag_part(value));
        }

        line.push(' ');

        for (i, (key, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                line.push(',');
            }
            line.push_str(&escape_tag_part(key));
            line.push('=');
            line.push_str(&value.to_line_protocol());
        }

        line.push(' ');
        line.push_str(&timestamp_ns.to_string());

        line
    }
}

/// Decode a JSON field value into a [`FieldValue`].
///
/// Accepts numbers, strings, and booleans; everything else (nested objects,
/// arrays, null) makes the whole payload malformed.
fn decode_field_value(key: &str, value: &serde_json::Value) -> Result<FieldValue> {
    match value {
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(FieldValue::Integer(i))
            } else if let Some(f) = n.as_f64() {
                Ok(FieldValue::Float(f))
            } else {
                Err(Error::InvalidField {
                    field: "fields",
                    reason: format!("value for '{}' is out of range", key),
                })
            }
        }
        serde_json::Value::String(s) => Ok(FieldValue::Text(s.clone())),
        serde_json::Value::Bool(b) => Ok(FieldValue::Boolean(*b)),
        other => Err(Error::InvalidField {
            field: "fields",
            reason: format!("value for '{}' is not a number, string, or bool: {}", key, other),
        }),
    }
}

/// Escape a measurement name per Line Protocol spec.
/// Spaces and commas must be escaped with backslash.
fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

/// Escape a tag key, tag value, or field key per Line Protocol spec.
/// Commas, equals signs, and spaces must be escaped.
fn escape_tag_part(s: &str) -> String {
    s.replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(payload: &str) -> Record {
        Record::from_payload(payload.as_bytes()).expect("well-formed payload")
    }

    // =========================================================================
    // Payload decoding
    // =========================================================================

    #[test]
    fn test_decode_simple_payload() {
        let rec = record(r#"{"measurement":"temp","tags":{"room":"a"},"fields":{"value":21.5}}"#);
        assert_eq!(rec.measurement, "temp");
        assert_eq!(rec.tags.get("room").map(String::as_str), Some("a"));
        assert_eq!(rec.fields.get("value"), Some(&FieldValue::Float(21.5)));
    }

    #[test]
    fn test_decode_mixed_field_types() {
        let rec = record(
            r#"{"measurement":"env","tags":{},"fields":{"count":3,"ratio":0.5,"state":"ok","on":true}}"#,
        );
        assert_eq!(rec.fields.get("count"), Some(&FieldValue::Integer(3)));
        assert_eq!(rec.fields.get("ratio"), Some(&FieldValue::Float(0.5)));
        assert_eq!(
            rec.fields.get("state"),
            Some(&FieldValue::Text("ok".to_string()))
        );
        assert_eq!(rec.fields.get("on"), Some(&FieldValue::Boolean(true)));
    }

    #[test]
    fn test_decode_ignores_extra_keys() {
        let rec = record(
            r#"{"measurement":"temp","tags":{},"fields":{"v":1},"timestamp":12345,"meta":{}}"#,
        );
        assert_eq!(rec.measurement, "temp");
        assert_eq!(rec.fields.len(), 1);
    }

    #[test]
    fn test_decode_rejects_non_json() {
        let err = Record::from_payload(b"not-json").unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_decode_rejects_non_object() {
        let err = Record::from_payload(b"[1,2,3]").unwrap_err();
        assert!(matches!(err, Error::NotAnObject));
    }

    #[test]
    fn test_decode_rejects_missing_keys() {
        let err = Record::from_payload(br#"{"tags":{},"fields":{"v":1}}"#).unwrap_err();
        assert!(matches!(
            err,
            Error::MissingField {
                field: "measurement"
            }
        ));

        let err = Record::from_payload(br#"{"measurement":"m","fields":{"v":1}}"#).unwrap_err();
        assert!(matches!(err, Error::MissingField { field: "tags" }));

        let err = Record::from_payload(br#"{"measurement":"m","tags":{}}"#).unwrap_err();
        assert!(matches!(err, Error::MissingField { field: "fields" }));
    }

    #[test]
    fn test_decode_rejects_non_string_tag() {
        let err =
            Record::from_payload(br#"{"measurement":"m","tags":{"n":7},"fields":{"v":1}}"#)
                .unwrap_err();
        assert!(matches!(err, Error::InvalidField { field: "tags", .. }));
    }

    #[test]
    fn test_decode_rejects_empty_fields() {
        let err =
            Record::from_payload(br#"{"measurement":"m","tags":{},"fields":{}}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidField { field: "fields", .. }));
    }

    #[test]
    fn test_decode_rejects_nested_field_value() {
        let err = Record::from_payload(
            br#"{"measurement":"m","tags":{},"fields":{"v":{"nested":1}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidField { field: "fields", .. }));
    }

    #[test]
    fn test_queue_encoding_roundtrip() {
        let rec = record(
            r#"{"measurement":"temp","tags":{"room":"a"},"fields":{"value":21.5,"n":2,"s":"x"}}"#,
        );
        let bytes = serde_json::to_vec(&rec).unwrap();
        let back: Record = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, rec);
    }

    // =========================================================================
    // Field value formatting
    // =========================================================================

    #[test]
    fn test_field_value_float() {
        assert_eq!(FieldValue::Float(3.15).to_line_protocol(), "3.15");
    }

    #[test]
    fn test_field_value_integer() {
        assert_eq!(FieldValue::Integer(42).to_line_protocol(), "42i");
    }

    #[test]
    fn test_field_value_string_with_quotes() {
        let v = FieldValue::Text("say \"hi\"".to_string());
        assert_eq!(v.to_line_protocol(), "\"say \\\"hi\\\"\"");
    }

    #[test]
    fn test_field_value_boolean() {
        assert_eq!(FieldValue::Boolean(true).to_line_protocol(), "true");
        assert_eq!(FieldValue::Boolean(false).to_line_protocol(), "false");
    }

    // =========================================================================
    // Line Protocol encoding
    // =========================================================================

    #[test]
    fn test_line_protocol_simple_point() {
        let rec = record(r#"{"measurement":"temperature","tags":{},"fields":{"value":23.5}}"#);
        assert_eq!(
            rec.to_line_protocol(1_000_000_000),
            "temperature value=23.5 1000000000"
        );
    }

    #[test]
    fn test_line_protocol_tags_sorted_by_key() {
        let rec = record(
            r#"{"measurement":"temperature","tags":{"sensor":"A1","location":"room1"},"fields":{"value":23.5}}"#,
        );
        assert_eq!(
            rec.to_line_protocol(1_000_000_000),
            "temperature,location=room1,sensor=A1 value=23.5 1000000000"
        );
    }

    #[test]
    fn test_line_protocol_multiple_fields() {
        let rec = record(
            r#"{"measurement":"weather","tags":{"station":"north"},"fields":{"humidity":65,"ok":true,"temp":22.1}}"#,
        );
        // BTreeMap order: humidity, ok, temp
        assert_eq!(
            rec.to_line_protocol(2_000_000_000),
            "weather,station=north humidity=65i,ok=true,temp=22.1 2000000000"
        );
    }

    #[test]
    fn test_line_protocol_escapes_special_chars() {
        let rec = record(
            r#"{"measurement":"my measurement","tags":{"tag key":"tag,value"},"fields":{"field=key":"hello \"world\""}}"#,
        );
        assert_eq!(
            rec.to_line_protocol(3_000_000_000),
            "my\\ measurement,tag\\ key=tag\\,value field\\=key=\"hello \\\"world\\\"\" 3000000000"
        );
    }
}
