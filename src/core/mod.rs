//! Core domain types, configuration and errors for the collector.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{Config, ConfigBuilder, ExpiryPolicy, LogLevel};
pub use error::{CollectorError, Result};
pub use types::{Identity, Sample, SampleBuilder};
