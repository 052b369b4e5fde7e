//! Metrics payload receiver.
//!
//! Turns posted application metrics payloads into [`Sample`](crate::core::Sample)s
//! and hands them to the [`MetricsCollector`](crate::metrics::MetricsCollector).

pub mod http;
pub mod payload;

pub use http::{create_ingest_router, HttpError, INGEST_PATH};
pub use payload::{decode, PayloadFormat, METRICS_V1_JSON};
