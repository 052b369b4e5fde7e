//! Common test utilities and fixtures.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};
use stream_collector::core::config::StoreConfig;
use stream_collector::core::{ExpiryPolicy, Sample};
use stream_collector::metrics::{Clock, ManualClock, MetricsCollector};

/// Raw counter metric of the `input` channel.
pub const INPUT_SEND_COUNT: &str = "integration.channel.input.sendCount";
/// Rate derived from [`INPUT_SEND_COUNT`].
pub const INPUT_SEND_MEAN: &str = "integration.channel.input.send.mean";

/// Test fixture builder for samples with sensible defaults.
pub struct TestSampleBuilder {
    stream: String,
    app: String,
    guid: String,
    index: Option<u32>,
    timestamp: i64,
    send_count: Option<f64>,
}

impl TestSampleBuilder {
    pub fn new(guid: &str) -> Self {
        Self {
            stream: "httpIngest".to_string(),
            app: "http".to_string(),
            guid: guid.to_string(),
            index: None,
            timestamp: 1_000,
            send_count: None,
        }
    }

    pub fn stream(mut self, stream: &str) -> Self {
        self.stream = stream.to_string();
        self
    }

    pub fn app(mut self, app: &str) -> Self {
        self.app = app.to_string();
        self
    }

    pub fn index(mut self, index: u32) -> Self {
        self.index = Some(index);
        self
    }

    pub fn at(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn send_count(mut self, value: f64) -> Self {
        self.send_count = Some(value);
        self
    }

    pub fn build(self) -> Sample {
        let mut sample = Sample::new(self.stream, self.app, self.guid, self.timestamp);
        if let Some(index) = self.index {
            sample = sample.with_index(index);
        }
        if let Some(count) = self.send_count {
            sample = sample.with_metric(INPUT_SEND_COUNT, count);
        }
        sample
    }
}

/// Collector on a manual clock, with sweeps only when asked for.
pub fn manual_collector(timeout: Duration, expiry: ExpiryPolicy) -> (MetricsCollector, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let config = StoreConfig {
        eviction_timeout: timeout,
        expiry,
        cleanup_interval: Duration::from_secs(24 * 3600),
    };
    let collector = MetricsCollector::with_clock(&config, Arc::clone(&clock) as Arc<dyn Clock>).unwrap();
    (collector, clock)
}

/// Polls `check` until it holds or `timeout` passes.
pub fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut check: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    check()
}
