//! Sample and identity types shared by the store and the receivers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Property carrying the stream an instance belongs to.
pub const STREAM_NAME: &str = "spring.cloud.dataflow.stream.name";
/// Property carrying the application label within the stream.
pub const APPLICATION_NAME: &str = "spring.cloud.dataflow.stream.app.label";
/// Property carrying the unique instance guid.
pub const APPLICATION_GUID: &str = "spring.cloud.application.guid";
/// Property carrying the instance index.
pub const INSTANCE_INDEX: &str = "spring.cloud.stream.instanceIndex";
/// Property carrying the application type (source, processor, sink).
pub const APPLICATION_TYPE: &str = "spring.cloud.dataflow.stream.app.type";
/// Property carrying the name of the server that deployed the stream.
pub const SERVER_NAME: &str = "spring.cloud.dataflow.server.name";

/// Borrowed view of the three properties that route a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity<'a> {
    /// Stream name
    pub stream_name: &'a str,
    /// Application label
    pub application_name: &'a str,
    /// Instance guid
    pub instance_guid: &'a str,
}

impl Identity<'_> {
    /// Cache key for this identity: `stream.app.guid`.
    pub fn key(&self) -> String {
        format!("{}.{}.{}", self.stream_name, self.application_name, self.instance_guid)
    }
}

impl fmt::Display for Identity<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.stream_name, self.application_name, self.instance_guid)
    }
}

/// One metric reading from one application instance.
///
/// Identity fields are optional because samples arrive from an untrusted
/// telemetry channel; the store refuses samples without them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Cache key, normally `stream.app.guid`
    pub key: String,
    /// Stream the instance belongs to
    pub stream_name: Option<String>,
    /// Application label within the stream
    pub application_name: Option<String>,
    /// Unique instance guid
    pub instance_guid: Option<String>,
    /// Instance index, when the platform assigns one
    pub instance_index: Option<u32>,
    /// Reading time in milliseconds since the epoch
    pub timestamp: i64,
    /// Metric values by name
    pub metrics: BTreeMap<String, f64>,
    /// Remaining payload properties
    pub properties: BTreeMap<String, String>,
}

impl Sample {
    /// Creates a sample with a full identity and no metrics.
    pub fn new<S, A, G>(stream_name: S, application_name: A, instance_guid: G, timestamp: i64) -> Self
    where
        S: Into<String>,
        A: Into<String>,
        G: Into<String>,
    {
        Sample::builder()
            .stream_name(stream_name)
            .application_name(application_name)
            .instance_guid(instance_guid)
            .timestamp(timestamp)
            .build()
    }

    /// Creates a new builder.
    pub fn builder() -> SampleBuilder {
        SampleBuilder::default()
    }

    /// Adds or replaces a metric value.
    pub fn with_metric<N: Into<String>>(mut self, name: N, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    /// Sets the instance index.
    pub fn with_index(mut self, index: u32) -> Self {
        self.instance_index = Some(index);
        self
    }

    /// Returns the value of a metric by name.
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    /// Returns the routing identity, or the name of the first absent property.
    ///
    /// Empty strings count as absent.
    pub fn identity(&self) -> std::result::Result<Identity<'_>, &'static str> {
        fn present<'a>(value: &'a Option<String>, property: &'static str) -> std::result::Result<&'a str, &'static str> {
            value.as_deref().filter(|v| !v.is_empty()).ok_or(property)
        }

        Ok(Identity {
            stream_name: present(&self.stream_name, STREAM_NAME)?,
            application_name: present(&self.application_name, APPLICATION_NAME)?,
            instance_guid: present(&self.instance_guid, APPLICATION_GUID)?,
        })
    }
}

/// Builder for [`Sample`].
#[derive(Debug, Default)]
pub struct SampleBuilder {
    key: Option<String>,
    stream_name: Option<String>,
    application_name: Option<String>,
    instance_guid: Option<String>,
    instance_index: Option<u32>,
    timestamp: Option<i64>,
    metrics: BTreeMap<String, f64>,
    properties: BTreeMap<String, String>,
}

impl SampleBuilder {
    /// Overrides the derived store key.
    pub fn key<S: Into<String>>(mut self, key: S) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Sets the stream name.
    pub fn stream_name<S: Into<String>>(mut self, stream_name: S) -> Self {
        self.stream_name = Some(stream_name.into());
        self
    }

    /// Sets the application label.
    pub fn application_name<S: Into<String>>(mut self, application_name: S) -> Self {
        self.application_name = Some(application_name.into());
        self
    }

    /// Sets the instance guid.
    pub fn instance_guid<S: Into<String>>(mut self, instance_guid: S) -> Self {
        self.instance_guid = Some(instance_guid.into());
        self
    }

    /// Sets the instance index.
    pub fn instance_index(mut self, index: u32) -> Self {
        self.instance_index = Some(index);
        self
    }

    /// Sets the reading time in epoch milliseconds.
    pub fn timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Adds one metric reading.
    pub fn metric<N: Into<String>>(mut self, name: N, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    /// Adds one non-metric property.
    pub fn property<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Builds the sample. Without an explicit key, the key is derived from
    /// whichever identity parts are present.
    pub fn build(self) -> Sample {
        let key = self.key.unwrap_or_else(|| {
            [&self.stream_name, &self.application_name, &self.instance_guid]
                .into_iter()
                .flatten()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(".")
        });

        Sample {
            key,
            stream_name: self.stream_name,
            application_name: self.application_name,
            instance_guid: self.instance_guid,
            instance_index: self.instance_index,
            timestamp: self
                .timestamp
                .unwrap_or_else(|| chrono::Utc::now().timestamp_millis()),
            metrics: self.metrics,
            properties: self.properties,
        }
    }
}
