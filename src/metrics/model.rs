//! Hierarchical stream → application → instance view of the samples.
//!
//! Applications are identified by name and instances by guid only; inserting
//! a node that is already present replaces it in place.

use crate::metrics::rate::{self, RateMetric};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

/// One running instance of an application.
#[derive(Debug, Clone)]
pub struct Instance {
    /// Unique instance guid
    pub guid: String,
    /// Instance index, when known
    pub index: Option<u32>,
    /// Store key of the history this instance was built from
    pub key: String,
    /// Time of the reading the instance reflects, in epoch milliseconds
    pub timestamp: i64,
    /// Non-metric properties of the latest reading
    pub properties: BTreeMap<String, String>,
    /// Rates derived from counters
    pub rate_metrics: Vec<RateMetric>,
    /// Metrics passed through as reported
    pub raw_metrics: BTreeMap<String, f64>,
}

impl Instance {
    /// Instance with no metrics yet.
    pub fn new<G: Into<String>>(guid: G) -> Self {
        Self {
            guid: guid.into(),
            index: None,
            key: String::new(),
            timestamp: 0,
            properties: BTreeMap::new(),
            rate_metrics: Vec::new(),
            raw_metrics: BTreeMap::new(),
        }
    }

    /// Looks a metric up by name, derived rates first.
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.rate_metrics
            .iter()
            .find(|m| m.name == name)
            .map(|m| m.value)
            .or_else(|| self.raw_metrics.get(name).copied())
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.guid == other.guid
    }
}

impl Eq for Instance {}

/// An application of a stream and its instances.
#[derive(Debug, Clone)]
pub struct Application {
    /// Application label
    pub name: String,
    /// Instances, unique by guid
    pub instances: Vec<Instance>,
}

impl Application {
    /// Application with no instances.
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self {
            name: name.into(),
            instances: Vec::new(),
        }
    }

    /// Sum of each derived rate across all instances, by rate name.
    ///
    /// Computed on every call from the current instances.
    pub fn aggregate_metrics(&self) -> Vec<RateMetric> {
        let mut sums: BTreeMap<&str, f64> = BTreeMap::new();
        for metric in self.instances.iter().flat_map(|i| &i.rate_metrics) {
            if rate::is_rate_name(&metric.name) {
                *sums.entry(metric.name.as_str()).or_default() += metric.value;
            }
        }
        sums.into_iter()
            .map(|(name, value)| RateMetric::new(name, value))
            .collect()
    }

    /// Instance with `guid`, if present.
    pub fn instance(&self, guid: &str) -> Option<&Instance> {
        self.instances.iter().find(|i| i.guid == guid)
    }

    /// Inserts an instance, replacing any instance with the same guid.
    pub fn upsert(&mut self, instance: Instance) {
        match self.instances.iter_mut().find(|i| **i == instance) {
            Some(existing) => *existing = instance,
            None => self.instances.push(instance),
        }
    }

    /// Removes the instance with `guid`. Returns whether it was present.
    pub fn remove(&mut self, guid: &str) -> bool {
        let before = self.instances.len();
        self.instances.retain(|i| i.guid != guid);
        self.instances.len() != before
    }
}

impl PartialEq for Application {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Application {}

/// A stream and the applications deployed in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stream {
    /// Stream name
    pub name: String,
    /// Applications, unique by name
    pub applications: Vec<Application>,
}

impl Stream {
    /// Stream with no applications.
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self {
            name: name.into(),
            applications: Vec::new(),
        }
    }

    /// Application named `name`, if present.
    pub fn application(&self, name: &str) -> Option<&Application> {
        self.applications.iter().find(|a| a.name == name)
    }

    /// Inserts an instance under `application`, creating the application on
    /// first use.
    pub fn upsert_instance(&mut self, application: &str, instance: Instance) {
        match self.applications.iter_mut().find(|a| a.name == application) {
            Some(existing) => existing.upsert(instance),
            None => {
                let mut created = Application::new(application);
                created.upsert(instance);
                self.applications.push(created);
            },
        }
    }

    /// Removes one instance, dropping its application once empty. Returns
    /// whether an instance was removed.
    pub fn remove_instance(&mut self, application: &str, guid: &str) -> bool {
        let Some(pos) = self.applications.iter().position(|a| a.name == application) else {
            return false;
        };

        let removed = self.applications[pos].remove(guid);
        if self.applications[pos].instances.is_empty() {
            self.applications.remove(pos);
        }
        removed
    }

    /// Whether the stream has no applications left.
    pub fn is_empty(&self) -> bool {
        self.applications.is_empty()
    }

    /// Orders applications by name and instances by guid.
    pub fn sort(&mut self) {
        self.applications.sort_by(|a, b| a.name.cmp(&b.name));
        for app in &mut self.applications {
            app.instances.sort_by(|a, b| a.guid.cmp(&b.guid));
        }
    }
}

/// Rounds to two decimals for presentation.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Serialize)]
struct MetricValue<'a> {
    name: &'a str,
    value: f64,
}

impl<'a> MetricValue<'a> {
    fn new(name: &'a str, value: f64) -> Self {
        Self {
            name,
            value: round2(value),
        }
    }
}

impl Serialize for Instance {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let metrics: Vec<MetricValue<'_>> = self
            .raw_metrics
            .iter()
            .map(|(name, value)| MetricValue::new(name, *value))
            .chain(self.rate_metrics.iter().map(|m| MetricValue::new(&m.name, m.value)))
            .collect();

        let mut state = serializer.serialize_struct("Instance", 6)?;
        state.serialize_field("guid", &self.guid)?;
        state.serialize_field("index", &self.index)?;
        state.serialize_field("key", &self.key)?;
        state.serialize_field("timestamp", &self.timestamp)?;
        state.serialize_field("properties", &self.properties)?;
        state.serialize_field("metrics", &metrics)?;
        state.end()
    }
}

impl Serialize for Application {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let aggregates = self.aggregate_metrics();
        let aggregate_values: Vec<MetricValue<'_>> = aggregates
            .iter()
            .map(|m| MetricValue::new(&m.name, m.value))
            .collect();

        let mut state = serializer.serialize_struct("Application", 3)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("instances", &self.instances)?;
        state.serialize_field("aggregateMetrics", &aggregate_values)?;
        state.end()
    }
}
