//! Entry point wiring the sample store, the projector and the materialized
//! stream cache together.

use crate::core::config::StoreConfig;
use crate::core::{Config, Result, Sample};
use crate::metrics::clock::Clock;
use crate::metrics::eviction::EvictionCoordinator;
use crate::metrics::model::Stream;
use crate::metrics::projector::HierarchyProjector;
use crate::metrics::store::{CacheStats, SampleStore};
use crate::metrics::stream_cache::StreamCache;
use std::sync::Arc;

/// The metrics collector shared by the ingestion and query surfaces.
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    store: Arc<SampleStore>,
    streams: Arc<StreamCache>,
    projector: HierarchyProjector,
}

impl MetricsCollector {
    /// Creates a collector from the store section of `config`.
    pub fn new(config: &Config) -> Result<Self> {
        let store = SampleStore::new(&config.store)?;
        Ok(Self::from_store(store))
    }

    /// Creates a collector whose expiry runs on `clock`.
    pub fn with_clock(config: &StoreConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let store = SampleStore::with_clock(config, clock)?;
        Ok(Self::from_store(store))
    }

    fn from_store(store: SampleStore) -> Self {
        let store = Arc::new(store);
        let streams = Arc::new(StreamCache::new());
        store.add_listener(Arc::new(EvictionCoordinator::new(Arc::clone(&streams))));

        tracing::info!(
            timeout = ?store.timeout(),
            policy = ?store.policy(),
            "Metrics collector ready"
        );

        Self {
            projector: HierarchyProjector::new(Arc::clone(&store)),
            store,
            streams,
        }
    }

    /// Stores one sample.
    ///
    /// The stream cache picks the write up on the store's notifier thread,
    /// ordered against any invalidation or expiry of the same key.
    pub fn ingest(&self, sample: Sample) -> Result<()> {
        let key = sample.key.clone();
        if let Err(e) = self.store.put(sample) {
            tracing::warn!(key = %key, error = %e, "Dropping invalid sample");
            return Err(e);
        }

        tracing::trace!(key = %key, "Sample ingested");
        Ok(())
    }

    /// Fresh projection of the store, with rates.
    pub fn query(&self, filter: Option<&str>) -> Result<Vec<Stream>> {
        self.projector.build(filter)
    }

    /// Current contents of the materialized stream cache.
    pub fn materialized_view(&self, filter: Option<&str>) -> Vec<Stream> {
        self.streams.streams(filter)
    }

    /// Store statistics.
    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }

    /// Sweeps expired entries. Returns how many were evicted.
    pub fn run_pending_tasks(&self) -> usize {
        self.store.run_pending_tasks()
    }

    /// Removes one history; the stream cache follows asynchronously.
    pub fn invalidate(&self, key: &str) -> bool {
        self.store.invalidate(key)
    }

    /// Waits until the stream cache reflects every change made so far.
    pub fn flush(&self) {
        self.store.flush();
    }

    /// The underlying sample store.
    pub fn store(&self) -> &SampleStore {
        &self.store
    }

    /// The materialized stream cache.
    pub fn stream_cache(&self) -> &StreamCache {
        &self.streams
    }
}
