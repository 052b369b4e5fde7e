//! Pre-materialized stream hierarchy, kept current on ingest and pruned by
//! the eviction cascade.

use crate::core::Result;
use crate::metrics::history::SampleHistory;
use crate::metrics::model::Stream;
use crate::metrics::projector::{parse_filter, project_history};
use dashmap::DashMap;

/// Concurrent map of stream name to its materialized [`Stream`].
#[derive(Debug, Default)]
pub struct StreamCache {
    streams: DashMap<String, Stream>,
}

impl StreamCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Projects `history` and inserts or replaces its instance.
    ///
    /// Returns whether anything was written; an empty history writes nothing.
    pub fn upsert(&self, history: &SampleHistory) -> Result<bool> {
        let Some(projected) = project_history(history)? else {
            return Ok(false);
        };

        self.streams
            .entry(projected.stream_name.to_string())
            .or_insert_with(|| Stream::new(projected.stream_name))
            .upsert_instance(projected.application_name, projected.instance);
        Ok(true)
    }

    /// Removes one instance, pruning its application and stream once empty.
    pub fn remove(&self, stream: &str, application: &str, guid: &str) -> bool {
        let removed = self
            .streams
            .get_mut(stream)
            .is_some_and(|mut entry| entry.remove_instance(application, guid));

        if removed {
            self.streams.remove_if(stream, |_, s| s.is_empty());
        }
        removed
    }

    /// Timestamp of the cached instance, if any.
    pub fn instance_timestamp(&self, stream: &str, application: &str, guid: &str) -> Option<i64> {
        let entry = self.streams.get(stream)?;
        entry
            .application(application)
            .and_then(|app| app.instance(guid))
            .map(|instance| instance.timestamp)
    }

    /// Copies of the selected streams, ordered like a projection.
    pub fn streams(&self, filter: Option<&str>) -> Vec<Stream> {
        let names = match parse_filter(filter) {
            Some(names) => names,
            None => {
                let mut names: Vec<String> = self.streams.iter().map(|e| e.key().clone()).collect();
                names.sort();
                names
            },
        };

        names
            .iter()
            .filter_map(|name| self.streams.get(name).map(|entry| entry.value().clone()))
            .map(|mut stream| {
                stream.sort();
                stream
            })
            .collect()
    }

    /// Number of cached streams.
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Whether no stream is cached.
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Drops every cached stream.
    pub fn clear(&self) {
        self.streams.clear();
    }
}
