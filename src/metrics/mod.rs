//! In-memory metrics store and stream hierarchy.
//!
//! Samples land in a [`SampleStore`] keyed by `stream.app.guid`, each key
//! holding its last two readings. Queries project those histories into a
//! stream → application → instance tree, deriving per-second channel rates
//! from consecutive counter readings. A second, materialized copy of the tree
//! lives in a [`StreamCache`], which follows the store's writes and removals
//! in the order the store applied them.

pub mod clock;
pub mod collector;
pub mod eviction;
pub mod history;
pub mod model;
pub mod projector;
pub mod rate;
pub mod store;
pub mod stream_cache;

pub use clock::{Clock, ManualClock, SystemClock};
pub use collector::MetricsCollector;
pub use eviction::EvictionCoordinator;
pub use history::{SampleHistory, HISTORY_DEPTH};
pub use model::{Application, Instance, Stream};
pub use projector::HierarchyProjector;
pub use rate::RateMetric;
pub use store::{CacheStats, RemovalCause, SampleStore, StoreListener};
pub use stream_cache::StreamCache;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Sample;
    use pretty_assertions::assert_eq;

    const SEND_COUNT: &str = "integration.channel.input.sendCount";
    const SEND_MEAN: &str = "integration.channel.input.send.mean";

    fn collector() -> MetricsCollector {
        MetricsCollector::new(&crate::core::Config::default()).unwrap()
    }

    #[test]
    fn test_rate_between_two_readings() {
        let collector = collector();
        collector
            .ingest(Sample::new("httpIngest", "http", "foo", 1_000).with_metric(SEND_COUNT, 10.0))
            .unwrap();
        collector
            .ingest(Sample::new("httpIngest", "http", "foo", 6_000).with_metric(SEND_COUNT, 110.0))
            .unwrap();

        let streams = collector.query(Some("httpIngest")).unwrap();
        let instance = streams[0].application("http").unwrap().instance("foo").unwrap();
        assert_eq!(instance.metric(SEND_MEAN), Some(20.0));
        assert_eq!(instance.raw_metrics.get(SEND_COUNT), Some(&110.0));
    }

    #[test]
    fn test_aggregate_across_instances() {
        let collector = collector();
        for guid in ["foo", "bar"] {
            collector
                .ingest(Sample::new("s", "http", guid, 0).with_metric(SEND_COUNT, 0.0))
                .unwrap();
            collector
                .ingest(Sample::new("s", "http", guid, 5_000).with_metric(SEND_COUNT, 10.0))
                .unwrap();
        }

        let streams = collector.query(None).unwrap();
        let app = streams[0].application("http").unwrap();
        assert_eq!(app.aggregate_metrics(), vec![RateMetric::new(SEND_MEAN, 4.0)]);
    }
}
