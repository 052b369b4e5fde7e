//! Decoding of application metrics payloads into [`Sample`]s.
//!
//! Two JSON shapes are accepted. The flat shape carries plain
//! `{name, value, timestamp}` metrics; the tagged shape carries dimensional
//! meters (`{id: {name, tags, type}, count, mean, ...}`) which are flattened
//! into dotted metric names.

use crate::core::types::{
    APPLICATION_GUID, APPLICATION_NAME, APPLICATION_TYPE, INSTANCE_INDEX, SERVER_NAME, STREAM_NAME,
};
use crate::core::{CollectorError, Result, Sample};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Media type of the flat metrics payload.
pub const METRICS_V1_JSON: &str = "application/vnd.spring.cloud.stream.metrics.v1+json";

/// Meter name of channel send counters in the tagged shape.
const CHANNEL_SEND_METER: &str = "spring.integration.send";

const IDENTITY_PROPERTIES: [&str; 4] = [STREAM_NAME, APPLICATION_NAME, APPLICATION_GUID, INSTANCE_INDEX];

/// Payload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    /// `{name, value, timestamp}` metrics
    Flat,
    /// Dimensional meters with an `id`
    Tagged,
}

impl PayloadFormat {
    /// Format implied by a content type, if it names one.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        if content_type.contains(METRICS_V1_JSON) {
            Some(Self::Flat)
        } else {
            None
        }
    }

    /// Guesses the format from the first metric of a parsed payload.
    pub fn sniff(payload: &Value) -> Self {
        let tagged = payload
            .get("metrics")
            .and_then(Value::as_array)
            .and_then(|metrics| metrics.first())
            .is_some_and(|metric| metric.get("id").is_some());

        if tagged {
            Self::Tagged
        } else {
            Self::Flat
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Timestamp {
    Millis(i64),
    Text(String),
}

impl Timestamp {
    fn millis(&self) -> Result<i64> {
        match self {
            Self::Millis(ms) => Ok(*ms),
            Self::Text(text) => parse_timestamp(text),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FlatPayload {
    #[serde(default)]
    metrics: Vec<FlatMetric>,
    #[serde(default)]
    properties: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct FlatMetric {
    name: String,
    value: f64,
    timestamp: Option<Timestamp>,
}

#[derive(Debug, Deserialize)]
struct TaggedPayload {
    #[serde(default)]
    metrics: Vec<TaggedMetric>,
    #[serde(default)]
    properties: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct TaggedMetric {
    id: MeterId,
    timestamp: Option<Timestamp>,
    #[serde(default)]
    count: f64,
    #[serde(default)]
    mean: f64,
}

#[derive(Debug, Deserialize)]
struct MeterId {
    name: String,
    #[serde(default)]
    tags: Vec<Tag>,
    #[serde(rename = "type", default)]
    meter_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Tag {
    key: String,
    value: String,
}

impl TaggedMetric {
    fn tag(&self, key: &str) -> Option<&str> {
        self.id.tags.iter().find(|t| t.key == key).map(|t| t.value.as_str())
    }

    /// Flattened metric name.
    fn flat_name(&self) -> String {
        if self.id.name == CHANNEL_SEND_METER && self.tag("type") == Some("channel") {
            if let Some(channel) = self.tag("name") {
                return format!("integration.channel.{channel}.sendCount");
            }
        }

        let mut tags: Vec<&Tag> = self
            .id
            .tags
            .iter()
            .filter(|t| !is_routing_property(&t.key))
            .collect();
        tags.sort_by(|a, b| a.key.cmp(&b.key));

        let mut name = self.id.name.clone();
        for tag in tags {
            name.push('.');
            name.push_str(&tag.value);
        }
        name
    }

    fn value(&self) -> f64 {
        match self.id.meter_type.as_deref() {
            Some("COUNTER" | "TIMER" | "DISTRIBUTION_SUMMARY") => self.count,
            _ => self.mean,
        }
    }
}

fn is_routing_property(key: &str) -> bool {
    IDENTITY_PROPERTIES.contains(&key) || key == APPLICATION_TYPE || key == SERVER_NAME
}

/// Parses `yyyy-MM-ddTHH:mm:ss.SSSZ` (any RFC 3339 form) or epoch milliseconds.
pub fn parse_timestamp(text: &str) -> Result<i64> {
    if let Ok(ms) = text.trim().parse::<i64>() {
        return Ok(ms);
    }
    DateTime::parse_from_rfc3339(text.trim())
        .map(|dt| dt.timestamp_millis())
        .map_err(|e| CollectorError::parse(format!("invalid timestamp '{text}': {e}")))
}

/// Decodes one payload. `content_type` picks the shape when it names one;
/// otherwise the shape is sniffed from the body.
pub fn decode(body: &[u8], content_type: Option<&str>) -> Result<Sample> {
    let payload: Value =
        serde_json::from_slice(body).map_err(|e| CollectorError::parse(format!("invalid JSON: {e}")))?;

    let format = content_type
        .and_then(PayloadFormat::from_content_type)
        .unwrap_or_else(|| PayloadFormat::sniff(&payload));

    match format {
        PayloadFormat::Flat => decode_flat(payload),
        PayloadFormat::Tagged => decode_tagged(payload),
    }
}

fn decode_flat(payload: Value) -> Result<Sample> {
    let payload: FlatPayload = serde_json::from_value(payload)
        .map_err(|e| CollectorError::parse(format!("invalid metrics payload: {e}")))?;

    let mut metrics = BTreeMap::new();
    let mut newest: Option<i64> = None;
    for metric in payload.metrics {
        if let Some(ts) = &metric.timestamp {
            let ts = ts.millis()?;
            newest = Some(newest.map_or(ts, |n| n.max(ts)));
        }
        metrics.insert(metric.name, metric.value);
    }

    Ok(build_sample(stringify(payload.properties), metrics, newest))
}

fn decode_tagged(payload: Value) -> Result<Sample> {
    let payload: TaggedPayload = serde_json::from_value(payload)
        .map_err(|e| CollectorError::parse(format!("invalid meter payload: {e}")))?;

    let mut properties = stringify(payload.properties);
    if let Some(first) = payload.metrics.first() {
        for property in IDENTITY_PROPERTIES {
            if !properties.contains_key(property) {
                if let Some(value) = first.tag(property) {
                    properties.insert(property.to_string(), value.to_string());
                }
            }
        }
    }

    let mut metrics = BTreeMap::new();
    let mut newest: Option<i64> = None;
    for metric in &payload.metrics {
        if let Some(ts) = &metric.timestamp {
            let ts = ts.millis()?;
            newest = Some(newest.map_or(ts, |n| n.max(ts)));
        }
        metrics.insert(metric.flat_name(), metric.value());
    }

    Ok(build_sample(properties, metrics, newest))
}

fn stringify(properties: BTreeMap<String, Value>) -> BTreeMap<String, String> {
    properties
        .into_iter()
        .filter_map(|(key, value)| {
            let value = match value {
                Value::Null => return None,
                Value::String(s) => s,
                other => other.to_string(),
            };
            Some((key, value))
        })
        .collect()
}

fn build_sample(
    mut properties: BTreeMap<String, String>,
    metrics: BTreeMap<String, f64>,
    timestamp: Option<i64>,
) -> Sample {
    let mut builder = Sample::builder().timestamp(timestamp.unwrap_or_else(|| Utc::now().timestamp_millis()));

    if let Some(stream) = properties.remove(STREAM_NAME) {
        builder = builder.stream_name(stream);
    }
    if let Some(app) = properties.remove(APPLICATION_NAME) {
        builder = builder.application_name(app);
    }
    if let Some(guid) = properties.remove(APPLICATION_GUID) {
        builder = builder.instance_guid(guid);
    }
    if let Some(index) = properties.remove(INSTANCE_INDEX) {
        match index.trim().parse::<u32>() {
            Ok(index) => builder = builder.instance_index(index),
            Err(_) => tracing::debug!(index = %index, "Ignoring non-numeric instance index"),
        }
    }

    for (name, value) in metrics {
        builder = builder.metric(name, value);
    }
    for (key, value) in properties {
        builder = builder.property(key, value);
    }
    builder.build()
}
