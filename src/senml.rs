//! SenML-style record-list wire codec (RFC 8428 subset).
//!
//! Every channel in the system shares this shape: an ordered JSON array
//! whose first element carries the base name/time/unit and whose following
//! elements each carry one named measurement, numeric or string, with an
//! optional unit override and a time offset added to the base time.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One element of the wire array. Field names follow the SenML short names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SenmlRecord {
    #[serde(rename = "bn", skip_serializing_if = "Option::is_none")]
    pub base_name: Option<String>,
    #[serde(rename = "bt", skip_serializing_if = "Option::is_none")]
    pub base_time: Option<f64>,
    #[serde(rename = "bu", skip_serializing_if = "Option::is_none")]
    pub base_unit: Option<String>,
    #[serde(rename = "n", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "v", skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(rename = "vs", skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
    #[serde(rename = "u", skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(rename = "t", skip_serializing_if = "Option::is_none")]
    pub time_offset: Option<f64>,
}

/// A decoded field value: numeric (`v`) or string (`vs`).
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(v) => Some(*v),
            FieldValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Number(_) => None,
            FieldValue::Text(s) => Some(s.as_str()),
        }
    }
}

/// A decoded field with its resolved unit and absolute timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub value: FieldValue,
    /// Field unit override if present, else the message base unit.
    pub unit: Option<String>,
    /// `base_time + time_offset`.
    pub timestamp: f64,
}

/// A fully decoded wire message.
#[derive(Debug, Clone, PartialEq)]
pub struct SenmlMessage {
    pub base_name: String,
    pub base_time: f64,
    pub base_unit: Option<String>,
    pub fields: BTreeMap<String, Field>,
}

impl SenmlMessage {
    pub fn number(&self, name: &str) -> Option<f64> {
        self.fields.get(name).and_then(|f| f.value.as_number())
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|f| f.value.as_text())
    }

    pub fn timestamp(&self, name: &str) -> Option<f64> {
        self.fields.get(name).map(|f| f.timestamp)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed message: {0}")]
    MalformedMessage(&'static str),
    #[error("malformed message: invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Incremental encoder for one wire message.
///
/// ```rust
/// use glucobus::senml::SenmlEncoder;
///
/// let payload = SenmlEncoder::new("urn:patient:p1:glucose:", 1_700_000_000.0)
///     .base_unit("mg/dL")
///     .number("level", 118.5)
///     .string("trend", "stable")
///     .encode()
///     .unwrap();
/// assert!(payload.starts_with('['));
/// ```
#[derive(Debug)]
pub struct SenmlEncoder {
    records: Vec<SenmlRecord>,
}

impl SenmlEncoder {
    pub fn new(base_name: &str, base_time: f64) -> Self {
        let head = SenmlRecord {
            base_name: Some(base_name.to_string()),
            base_time: Some(base_time),
            ..SenmlRecord::default()
        };
        Self { records: vec![head] }
    }

    #[must_use]
    pub fn base_unit(mut self, unit: &str) -> Self {
        self.records[0].base_unit = Some(unit.to_string());
        self
    }

    #[must_use]
    pub fn number(self, name: &str, value: f64) -> Self {
        self.push(name, FieldValue::Number(value), None, None)
    }

    #[must_use]
    pub fn number_with_unit(self, name: &str, value: f64, unit: &str) -> Self {
        self.push(name, FieldValue::Number(value), Some(unit), None)
    }

    #[must_use]
    pub fn string(self, name: &str, value: &str) -> Self {
        self.push(name, FieldValue::Text(value.to_string()), None, None)
    }

    /// Add a numeric field whose timestamp is `base_time + offset_s`.
    #[must_use]
    pub fn number_at_offset(self, name: &str, value: f64, offset_s: f64) -> Self {
        self.push(name, FieldValue::Number(value), None, Some(offset_s))
    }

    fn push(
        mut self,
        name: &str,
        value: FieldValue,
        unit: Option<&str>,
        offset: Option<f64>,
    ) -> Self {
        let (v, vs) = match value {
            FieldValue::Number(n) => (Some(n), None),
            FieldValue::Text(s) => (None, Some(s)),
        };
        self.records.push(SenmlRecord {
            name: Some(name.to_string()),
            value: v,
            string_value: vs,
            unit: unit.map(ToString::to_string),
            time_offset: offset,
            ..SenmlRecord::default()
        });
        self
    }

    /// Serialize to the wire representation.
    pub fn encode(self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(&self.records)?)
    }
}

/// Decode a wire payload into a [`SenmlMessage`].
///
/// Tolerant of missing optional fields (`u`, `t`, `bu`); fails with
/// [`CodecError::MalformedMessage`] when the payload is not a non-empty
/// array, when the first element is missing its base fields, or when a
/// field record is missing its name or carries neither `v` nor `vs`.
pub fn decode(payload: &str) -> Result<SenmlMessage, CodecError> {
    let records: Vec<SenmlRecord> = serde_json::from_str(payload)?;

    let head = records
        .first()
        .ok_or(CodecError::MalformedMessage("empty record list"))?;
    let base_name = head
        .base_name
        .clone()
        .ok_or(CodecError::MalformedMessage("first record missing base name"))?;
    let base_time = head
        .base_time
        .ok_or(CodecError::MalformedMessage("first record missing base time"))?;
    let base_unit = head.base_unit.clone();

    let mut fields = BTreeMap::new();
    for record in &records[1..] {
        let name = record
            .name
            .clone()
            .ok_or(CodecError::MalformedMessage("field record missing name"))?;
        let value = match (record.value, &record.string_value) {
            (Some(v), None) => FieldValue::Number(v),
            (None, Some(s)) => FieldValue::Text(s.clone()),
            (Some(_), Some(_)) => {
                return Err(CodecError::MalformedMessage(
                    "field record carries both v and vs",
                ))
            }
            (None, None) => {
                return Err(CodecError::MalformedMessage(
                    "field record carries neither v nor vs",
                ))
            }
        };
        let unit = record.unit.clone().or_else(|| base_unit.clone());
        let timestamp = base_time + record.time_offset.unwrap_or(0.0);
        fields.insert(name, Field { value, unit, timestamp });
    }

    Ok(SenmlMessage {
        base_name,
        base_time,
        base_unit,
        fields,
    })
}
