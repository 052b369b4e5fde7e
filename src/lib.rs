//! Stream metrics collector.
//!
//! Collects periodic metric samples from the instances of stream-processing
//! applications, keeps the last two readings per instance, derives
//! per-second channel rates and serves the result as a
//! stream → application → instance hierarchy.
//!
//! # Architecture
//!
//! - `core`: configuration, errors and the [`Sample`](crate::core::Sample) type
//! - `metrics`: sample store, rate derivation, projection and the
//!   materialized stream cache
//! - `receiver`: payload decoding and the HTTP ingestion endpoint
//! - `api`: HTTP query and health endpoints
//! - `cli`: command-line interface
//!
//! # Example
//!
//! ```no_run
//! use stream_collector::core::{Config, Sample};
//! use stream_collector::metrics::MetricsCollector;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let collector = MetricsCollector::new(&Config::default())?;
//!     collector.ingest(
//!         Sample::new("httpIngest", "http", "foo", 1_000)
//!             .with_metric("integration.channel.output.sendCount", 10.0),
//!     )?;
//!     let streams = collector.query(Some("httpIngest"))?;
//!     println!("{}", serde_json::to_string_pretty(&streams)?);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod api;
pub mod cli;
pub mod core;
pub mod metrics;
pub mod receiver;

// Re-export core types for convenience
pub use crate::core::{CollectorError, Config, Result};
pub use crate::metrics::MetricsCollector;
