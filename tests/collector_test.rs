//! End-to-end behaviour of the metrics collector.

mod common;

use common::{manual_collector, wait_until, TestSampleBuilder, INPUT_SEND_COUNT, INPUT_SEND_MEAN};
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;
use std::time::Duration;
use stream_collector::core::{CollectorError, Config, ExpiryPolicy, Sample};
use stream_collector::metrics::{MetricsCollector, RateMetric, HISTORY_DEPTH};

fn collector() -> MetricsCollector {
    MetricsCollector::new(&Config::default()).unwrap()
}

#[test]
fn test_single_sample_has_zero_rate() {
    let collector = collector();
    collector
        .ingest(TestSampleBuilder::new("foo").send_count(10.0).build())
        .unwrap();

    let streams = collector.query(None).unwrap();
    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0].name, "httpIngest");
    assert_eq!(streams[0].applications.len(), 1);

    let app = &streams[0].applications[0];
    assert_eq!(app.name, "http");
    assert_eq!(app.instances.len(), 1);
    assert_eq!(app.instances[0].guid, "foo");
    assert_eq!(app.instances[0].metric(INPUT_SEND_MEAN), Some(0.0));
}

#[test]
fn test_second_sample_gives_rate() {
    let collector = collector();
    collector
        .ingest(TestSampleBuilder::new("foo").at(1_000).send_count(10.0).build())
        .unwrap();
    collector
        .ingest(TestSampleBuilder::new("foo").at(6_000).send_count(110.0).build())
        .unwrap();

    let streams = collector.query(Some("httpIngest")).unwrap();
    let instance = streams[0].application("http").unwrap().instance("foo").unwrap();
    assert_eq!(instance.metric(INPUT_SEND_MEAN), Some(20.0));
    assert_eq!(instance.metric(INPUT_SEND_COUNT), Some(110.0));
}

#[test]
fn test_history_is_bounded() {
    let collector = collector();
    for i in 0..5 {
        collector
            .ingest(TestSampleBuilder::new("foo").at(i * 1_000).send_count(i as f64).build())
            .unwrap();
    }

    let history = collector.store().get("httpIngest.http.foo").unwrap();
    assert_eq!(history.len(), HISTORY_DEPTH);
    assert_eq!(history.latest().unwrap().timestamp, 4_000);
    assert_eq!(history.previous().unwrap().timestamp, 3_000);
}

#[test]
fn test_instances_keep_their_indices() {
    let collector = collector();
    collector
        .ingest(TestSampleBuilder::new("foo").index(0).build())
        .unwrap();
    collector
        .ingest(TestSampleBuilder::new("bar").index(1).build())
        .unwrap();

    let streams = collector.query(None).unwrap();
    let app = streams[0].application("http").unwrap();
    assert_eq!(app.instances.len(), 2);
    assert_eq!(app.instance("foo").unwrap().index, Some(0));
    assert_eq!(app.instance("bar").unwrap().index, Some(1));
}

#[test]
fn test_reingest_updates_in_place() {
    let collector = collector();
    for ts in [1_000, 2_000, 3_000] {
        collector
            .ingest(TestSampleBuilder::new("foo").at(ts).build())
            .unwrap();
    }

    let streams = collector.query(None).unwrap();
    assert_eq!(streams[0].applications[0].instances.len(), 1);

    collector.flush();
    let view = collector.materialized_view(None);
    assert_eq!(view[0].applications[0].instances.len(), 1);
    assert_eq!(view[0].applications[0].instances[0].timestamp, 3_000);
}

#[test]
fn test_invalidate_leaves_one_instance() {
    let collector = collector();
    collector.ingest(TestSampleBuilder::new("foo").build()).unwrap();
    collector.ingest(TestSampleBuilder::new("bar").build()).unwrap();

    assert!(collector.invalidate("httpIngest.http.foo"));

    let streams = collector.query(None).unwrap();
    let app = streams[0].application("http").unwrap();
    assert_eq!(app.instances.len(), 1);
    assert_eq!(app.instances[0].guid, "bar");

    let cascaded = wait_until(Duration::from_secs(5), || {
        collector
            .materialized_view(None)
            .first()
            .and_then(|s| s.application("http"))
            .is_some_and(|a| a.instances.len() == 1 && a.instance("foo").is_none())
    });
    assert!(cascaded, "stream cache still holds the invalidated instance");
}

#[test]
fn test_stream_filter() {
    let collector = collector();
    for stream in ["streamA", "streamB", "streamC"] {
        collector
            .ingest(TestSampleBuilder::new("foo").stream(stream).build())
            .unwrap();
    }

    let names: Vec<String> = collector
        .query(Some("streamA,streamB"))
        .unwrap()
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(names, vec!["streamA".to_string(), "streamB".to_string()]);

    assert!(collector.query(Some("streamA;streamB")).unwrap().is_empty());
    assert!(collector.query(Some("unknown")).unwrap().is_empty());
}

#[test]
fn test_aggregate_rate() {
    let collector = collector();
    for guid in ["foo", "bar"] {
        collector
            .ingest(TestSampleBuilder::new(guid).at(0).send_count(0.0).build())
            .unwrap();
        collector
            .ingest(TestSampleBuilder::new(guid).at(5_000).send_count(10.0).build())
            .unwrap();
    }

    let streams = collector.query(None).unwrap();
    let app = streams[0].application("http").unwrap();
    assert_eq!(app.aggregate_metrics(), vec![RateMetric::new(INPUT_SEND_MEAN, 4.0)]);

    let json = serde_json::to_value(&streams).unwrap();
    assert_eq!(json[0]["applications"][0]["aggregateMetrics"][0]["value"], 4.0);
}

#[test]
fn test_invalid_sample_never_stored() {
    let collector = collector();
    let sample = Sample::builder()
        .stream_name("httpIngest")
        .instance_guid("foo")
        .timestamp(0)
        .build();

    let err = collector.ingest(sample).unwrap_err();
    assert!(matches!(err, CollectorError::InvalidSample { .. }));
    assert!(err.to_string().contains("spring.cloud.dataflow.stream.app.label"));
    assert!(collector.query(None).unwrap().is_empty());
    assert_eq!(collector.stats().rejected_count, 1);
}

#[test]
fn test_expired_instance_cascades_out() {
    let (collector, clock) = manual_collector(Duration::from_secs(30), ExpiryPolicy::AfterWrite);
    collector.ingest(TestSampleBuilder::new("foo").build()).unwrap();
    collector.ingest(TestSampleBuilder::new("bar").build()).unwrap();

    clock.advance(Duration::from_secs(20));
    collector
        .ingest(TestSampleBuilder::new("bar").at(2_000).build())
        .unwrap();
    clock.advance(Duration::from_secs(15));

    assert!(!collector.store().keys().contains("httpIngest.http.foo"));
    assert_eq!(collector.run_pending_tasks(), 1);
    assert_eq!(collector.stats().eviction_count, 1);

    let cascaded = wait_until(Duration::from_secs(5), || {
        collector
            .materialized_view(None)
            .first()
            .and_then(|s| s.application("http"))
            .is_some_and(|a| a.instance("foo").is_none())
    });
    assert!(cascaded);
    assert!(collector.materialized_view(None)[0]
        .application("http")
        .unwrap()
        .instance("bar")
        .is_some());
}

#[test]
fn test_access_keeps_entry_alive() {
    let (collector, clock) = manual_collector(Duration::from_secs(30), ExpiryPolicy::AfterAccess);
    collector.ingest(TestSampleBuilder::new("foo").build()).unwrap();

    for _ in 0..4 {
        clock.advance(Duration::from_secs(20));
        assert!(collector.store().get("httpIngest.http.foo").is_some());
    }
    assert_eq!(collector.run_pending_tasks(), 0);

    clock.advance(Duration::from_secs(30));
    assert!(collector.store().get("httpIngest.http.foo").is_none());
    assert_eq!(collector.stats().eviction_count, 1);
}

#[test]
fn test_reingest_after_expiry_survives_cascade() {
    let (collector, clock) = manual_collector(Duration::from_secs(30), ExpiryPolicy::AfterWrite);
    collector
        .ingest(TestSampleBuilder::new("foo").at(1_000).build())
        .unwrap();

    clock.advance(Duration::from_secs(31));
    assert_eq!(collector.run_pending_tasks(), 1);
    collector
        .ingest(TestSampleBuilder::new("foo").at(40_000).build())
        .unwrap();
    collector.flush();

    assert_eq!(collector.stats().eviction_count, 1);
    let view = collector.materialized_view(None);
    let instance = view[0].application("http").unwrap().instance("foo").unwrap();
    assert_eq!(instance.timestamp, 40_000);
}

#[test]
fn test_extreme_timestamps_yield_zero_rate() {
    let collector = collector();
    collector
        .ingest(TestSampleBuilder::new("foo").at(i64::MIN).send_count(0.0).build())
        .unwrap();
    collector
        .ingest(TestSampleBuilder::new("foo").at(1).send_count(10.0).build())
        .unwrap();

    let streams = collector.query(None).unwrap();
    let instance = streams[0].application("http").unwrap().instance("foo").unwrap();
    assert_eq!(instance.metric(INPUT_SEND_MEAN), Some(0.0));

    collector.flush();
    let view = collector.materialized_view(None);
    assert_eq!(view[0].application("http").unwrap().instance("foo").unwrap().timestamp, 1);
}

fn cached_keys(collector: &MetricsCollector) -> BTreeSet<String> {
    collector
        .materialized_view(None)
        .iter()
        .flat_map(|stream| &stream.applications)
        .flat_map(|app| &app.instances)
        .map(|instance| instance.key.clone())
        .collect()
}

#[test]
fn test_concurrent_ingest_query_and_invalidate_converge() {
    const WRITERS: i64 = 4;
    const GUIDS: i64 = 6;
    const ROUNDS: i64 = 300;

    let collector = collector();

    std::thread::scope(|scope| {
        for writer in 0..WRITERS {
            let collector = &collector;
            scope.spawn(move || {
                for round in 0..ROUNDS {
                    let guid = format!("g{}", (writer + round) % GUIDS);
                    let app = if writer % 2 == 0 { "http" } else { "log" };
                    // Count is tied to the timestamp so a torn instance shows up.
                    let sample = TestSampleBuilder::new(&guid)
                        .app(app)
                        .at(round * 1_000)
                        .send_count((round * 10) as f64)
                        .build();
                    collector.ingest(sample).unwrap();
                }
            });
        }

        for _ in 0..2 {
            let collector = &collector;
            scope.spawn(move || {
                for _ in 0..ROUNDS {
                    for stream in collector.query(None).unwrap() {
                        for app in &stream.applications {
                            for instance in &app.instances {
                                assert_eq!(instance.key, format!("{}.{}.{}", stream.name, app.name, instance.guid));
                                let count = instance.metric(INPUT_SEND_COUNT).unwrap();
                                assert_eq!(count, (instance.timestamp / 100) as f64);

                                if let Some(history) = collector.store().get(&instance.key) {
                                    assert!(history.len() <= HISTORY_DEPTH);
                                }
                            }
                        }
                    }
                }
            });
        }

        let collector = &collector;
        scope.spawn(move || {
            for round in 0..ROUNDS {
                let app = if round % 2 == 0 { "http" } else { "log" };
                collector.invalidate(&format!("httpIngest.{app}.g{}", round % GUIDS));
            }
        });
    });

    let converged = wait_until(Duration::from_secs(5), || cached_keys(&collector) == collector.store().keys());
    assert!(converged, "stream cache diverged from the store");

    collector.flush();
    assert_eq!(cached_keys(&collector), collector.store().keys());
}
