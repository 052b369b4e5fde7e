//! Builds the stream hierarchy from the live contents of the sample store.

use crate::core::{CollectorError, Result};
use crate::metrics::history::SampleHistory;
use crate::metrics::model::{Instance, Stream};
use crate::metrics::rate;
use crate::metrics::store::SampleStore;
use std::collections::HashMap;
use std::sync::Arc;

/// One history turned into an instance, with the names that place it.
#[derive(Debug, Clone)]
pub struct ProjectedInstance<'a> {
    /// Stream the instance belongs to
    pub stream_name: &'a str,
    /// Application the instance belongs to
    pub application_name: &'a str,
    /// The projected instance
    pub instance: Instance,
}

/// Projects a single history into an instance.
///
/// Returns `Ok(None)` for an empty history. A latest sample without a full
/// identity is a broken store invariant and fails with
/// [`CollectorError::MissingIdentity`].
pub fn project_history(history: &SampleHistory) -> Result<Option<ProjectedInstance<'_>>> {
    let Some(latest) = history.latest() else {
        return Ok(None);
    };
    let identity = latest
        .identity()
        .map_err(|property| CollectorError::MissingIdentity { property })?;

    let mut instance = Instance::new(identity.instance_guid);
    instance.index = latest.instance_index;
    instance.key = latest.key.clone();
    instance.timestamp = latest.timestamp;
    instance.properties = latest.properties.clone();
    instance.raw_metrics = latest
        .metrics
        .iter()
        .filter(|(name, _)| !rate::is_rate_name(name))
        .map(|(name, value)| (name.clone(), *value))
        .collect();
    instance.rate_metrics = rate::compute_all(latest, history.previous());

    Ok(Some(ProjectedInstance {
        stream_name: identity.stream_name,
        application_name: identity.application_name,
        instance,
    }))
}

/// Splits a stream filter on commas.
///
/// `None`, empty and blank filters select every stream. Any other delimiter
/// is not recognised, so `"a;b"` is one stream name.
pub fn parse_filter(filter: Option<&str>) -> Option<Vec<String>> {
    let filter = filter.map(str::trim).filter(|f| !f.is_empty())?;

    let mut names: Vec<String> = Vec::new();
    for name in filter.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        if !names.iter().any(|existing| existing == name) {
            names.push(name.to_string());
        }
    }
    Some(names)
}

/// Builds [`Stream`] trees from a [`SampleStore`] on demand.
#[derive(Debug, Clone)]
pub struct HierarchyProjector {
    store: Arc<SampleStore>,
}

impl HierarchyProjector {
    /// Projects the contents of `store`.
    pub fn new(store: Arc<SampleStore>) -> Self {
        Self { store }
    }

    /// Builds the streams selected by `filter` (see [`parse_filter`]).
    ///
    /// Runs under the store lock. Unknown stream names are skipped. Streams
    /// come back in filter order, or sorted by name when unfiltered.
    pub fn build(&self, filter: Option<&str>) -> Result<Vec<Stream>> {
        let wanted = parse_filter(filter);

        let mut streams = self.store.scan(|live| -> Result<HashMap<String, Stream>> {
            let mut streams: HashMap<String, Stream> = HashMap::new();
            for (_, history) in live {
                let Some(projected) = project_history(history)? else {
                    continue;
                };
                if let Some(names) = &wanted {
                    if !names.iter().any(|n| n == projected.stream_name) {
                        continue;
                    }
                }
                streams
                    .entry(projected.stream_name.to_string())
                    .or_insert_with(|| Stream::new(projected.stream_name))
                    .upsert_instance(projected.application_name, projected.instance);
            }
            Ok(streams)
        })?;

        let order: Vec<String> = match wanted {
            Some(names) => names,
            None => {
                let mut names: Vec<String> = streams.keys().cloned().collect();
                names.sort();
                names
            },
        };

        let result: Vec<Stream> = order
            .iter()
            .filter_map(|name| streams.remove(name))
            .map(|mut stream| {
                stream.sort();
                stream
            })
            .collect();

        tracing::trace!(streams = result.len(), "Projected stream hierarchy");
        Ok(result)
    }
}
