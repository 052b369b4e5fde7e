//! Store listener that mirrors changes into the stream cache.

use crate::core::{CollectorError, Result, Sample};
use crate::metrics::history::SampleHistory;
use crate::metrics::store::{RemovalCause, StoreListener};
use crate::metrics::stream_cache::StreamCache;
use std::sync::Arc;

/// Keeps the [`StreamCache`] in step with the sample store.
///
/// Writes refresh the instance and removals prune it. Both arrive in store
/// order, so the last change seen for a key always wins.
#[derive(Debug, Clone)]
pub struct EvictionCoordinator {
    cache: Arc<StreamCache>,
}

impl EvictionCoordinator {
    /// Creates a coordinator that maintains `cache`.
    pub fn new(cache: Arc<StreamCache>) -> Self {
        Self { cache }
    }
}

impl StoreListener for EvictionCoordinator {
    fn on_write(&self, key: &str, history: &SampleHistory) -> Result<()> {
        let written = self.cache.upsert(history)?;
        tracing::trace!(key, written, "Refreshed cached instance");
        Ok(())
    }

    fn on_evict(&self, key: &str, sample: &Sample, cause: RemovalCause) -> Result<()> {
        let identity = sample
            .identity()
            .map_err(|property| CollectorError::listener(format!("cannot route eviction of {key}: missing {property}")))?;

        let removed = self
            .cache
            .remove(identity.stream_name, identity.application_name, identity.instance_guid);

        tracing::debug!(key, ?cause, removed, "Processed eviction");
        Ok(())
    }
}
