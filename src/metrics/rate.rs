//! Throughput rates derived from pairs of counter readings.
//!
//! Channel send counters (`integration.channel.<channel>.sendCount`) are
//! monotonically increasing. Two consecutive readings of the same counter give
//! a per-second rate, published as `integration.channel.<channel>.send.mean`.

use crate::core::Sample;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static SEND_COUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^integration\.channel\.(\w*)\.sendCount$").expect("valid send count pattern")
});

static SEND_MEAN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^integration\.channel\.(\w*)\.send\.mean$").expect("valid send mean pattern")
});

/// A derived per-second rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateMetric {
    /// Derived metric name
    pub name: String,
    /// Value per second
    pub value: f64,
}

impl RateMetric {
    /// Creates a rate metric.
    pub fn new<N: Into<String>>(name: N, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Maps a rate-eligible counter name to its derived rate name.
pub fn rate_name(raw_metric_name: &str) -> Option<String> {
    SEND_COUNT
        .captures(raw_metric_name)
        .map(|caps| format!("integration.channel.{}.send.mean", &caps[1]))
}

/// True when `name` has the shape of a derived rate metric.
pub fn is_rate_name(name: &str) -> bool {
    SEND_MEAN.is_match(name)
}

/// Computes the rate for one counter of `current` against `previous`.
///
/// Returns `None` when the metric is not rate-eligible or absent from
/// `current`. A missing previous reading, a zero or unrepresentable time
/// delta and a non-finite result all yield a rate of `0.0`.
pub fn compute(current: &Sample, previous: Option<&Sample>, raw_metric_name: &str) -> Option<RateMetric> {
    let name = rate_name(raw_metric_name)?;
    let current_value = current.metric(raw_metric_name)?;

    let value = previous
        .and_then(|prev| prev.metric(raw_metric_name).map(|v| (prev.timestamp, v)))
        .and_then(|(prev_ts, prev_value)| {
            let elapsed_ms = current.timestamp.checked_sub(prev_ts)?;
            Some(per_second(current_value - prev_value, elapsed_ms))
        })
        .unwrap_or(0.0);

    Some(RateMetric::new(name, value))
}

/// Computes every rate metric of `current`, in metric-name order.
pub fn compute_all(current: &Sample, previous: Option<&Sample>) -> Vec<RateMetric> {
    current
        .metrics
        .keys()
        .filter_map(|name| compute(current, previous, name))
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn per_second(delta: f64, elapsed_ms: i64) -> f64 {
    if elapsed_ms == 0 {
        return 0.0;
    }

    let rate = delta / elapsed_ms as f64 * 1000.0;
    if rate.is_finite() {
        rate
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INPUT: &str = "integration.channel.input.sendCount";

    fn reading(value: f64, timestamp: i64) -> Sample {
        Sample::new("httpIngest", "http", "foo", timestamp).with_metric(INPUT, value)
    }

    #[test]
    fn test_rate_name_convention() {
        assert_eq!(rate_name(INPUT).as_deref(), Some("integration.channel.input.send.mean"));
        assert_eq!(
            rate_name("integration.channel.errorChannel.sendCount").as_deref(),
            Some("integration.channel.errorChannel.send.mean")
        );
        assert_eq!(rate_name("integration.channel.input.sendRate.mean"), None);
        assert_eq!(rate_name("mem.free"), None);
    }

    #[test]
    fn test_is_rate_name() {
        assert!(is_rate_name("integration.channel.output.send.mean"));
        assert!(!is_rate_name(INPUT));
    }

    #[test]
    fn test_first_reading_is_zero() {
        let rate = compute(&reading(10.0, 1_000), None, INPUT).unwrap();
        assert_eq!(rate.name, "integration.channel.input.send.mean");
        assert_eq!(rate.value, 0.0);
    }

    #[test]
    fn test_rate_per_second() {
        let previous = reading(10.0, 1_000);
        let current = reading(110.0, 6_000);
        let rate = compute(&current, Some(&previous), INPUT).unwrap();
        assert_eq!(rate.value, 20.0);
    }

    #[test]
    fn test_equal_timestamps_yield_zero() {
        let previous = reading(10.0, 1_000);
        let current = reading(50.0, 1_000);
        let rate = compute(&current, Some(&previous), INPUT).unwrap();
        assert_eq!(rate.value, 0.0);
    }

    #[test]
    fn test_overflowing_time_delta_yields_zero() {
        let rate = compute(&reading(10.0, 1), Some(&reading(0.0, i64::MIN)), INPUT).unwrap();
        assert_eq!(rate.value, 0.0);

        let rate = compute(&reading(10.0, i64::MIN), Some(&reading(0.0, i64::MAX)), INPUT).unwrap();
        assert_eq!(rate.value, 0.0);
    }

    #[test]
    fn test_previous_without_metric_yields_zero() {
        let previous = Sample::new("httpIngest", "http", "foo", 1_000);
        let current = reading(50.0, 2_000);
        assert_eq!(compute(&current, Some(&previous), INPUT).unwrap().value, 0.0);
    }

    #[test]
    fn test_non_eligible_metric() {
        let current = reading(1.0, 0).with_metric("mem.free", 3.0);
        assert!(compute(&current, None, "mem.free").is_none());
    }

    #[test]
    fn test_non_decreasing_counter_gives_non_negative_rate() {
        for (v1, v2, t1, t2) in [(0.0, 0.0, 0, 1), (5.0, 7.5, 100, 350), (1e9, 1e9 + 1.0, 0, 1_000_000)] {
            let rate = compute(&reading(v2, t2), Some(&reading(v1, t1)), INPUT).unwrap();
            assert!(rate.value >= 0.0, "rate {} for {}->{}", rate.value, v1, v2);
        }
    }

    #[test]
    fn test_compute_all_skips_plain_metrics() {
        let current = reading(30.0, 2_000)
            .with_metric("integration.channel.output.sendCount", 8.0)
            .with_metric("mem.free", 1.0);
        let previous = reading(10.0, 1_000).with_metric("integration.channel.output.sendCount", 4.0);

        let rates = compute_all(&current, Some(&previous));
        assert_eq!(
            rates,
            vec![
                RateMetric::new("integration.channel.input.send.mean", 20.0),
                RateMetric::new("integration.channel.output.send.mean", 4.0),
            ]
        );
    }
}
