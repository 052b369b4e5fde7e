//! Error types for the collector.

use thiserror::Error;

/// Main error type for collector operations.
#[derive(Error, Debug)]
pub enum CollectorError {
    /// A sample arrived without one of its identity properties.
    #[error("Invalid sample: missing required property '{property}'")]
    InvalidSample {
        /// Name of the missing property
        property: &'static str,
    },

    /// A stored sample lost its identity; the store should have refused it.
    #[error("Stored sample is missing identity property '{property}'")]
    MissingIdentity {
        /// Name of the missing property
        property: &'static str,
    },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A payload could not be decoded.
    #[error("Parse error: {message}")]
    Parse {
        /// What went wrong
        message: String,
    },

    /// A store listener failed to handle a change.
    #[error("Store listener failed: {0}")]
    Listener(String),

    /// I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Listener or server failure.
    #[error("Network error: {0}")]
    Network(String),

    /// A background task failed.
    #[error("Async task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result type alias for collector operations
pub type Result<T> = std::result::Result<T, CollectorError>;

impl CollectorError {
    /// Creates a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new parse error
    pub fn parse<S: Into<String>>(msg: S) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Creates a new network error
    pub fn network<S: Into<String>>(msg: S) -> Self {
        Self::Network(msg.into())
    }

    /// Creates a new listener error
    pub fn listener<S: Into<String>>(msg: S) -> Self {
        Self::Listener(msg.into())
    }

    /// Returns true if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Listener(_) => true,
            // Bad telemetry is dropped and the next sample is processed as usual.
            Self::InvalidSample { .. } | Self::Parse { .. } => true,
            _ => false,
        }
    }

    /// Returns the error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidSample { .. } => "validation",
            Self::MissingIdentity { .. } => "invariant",
            Self::Config(_) => "config",
            Self::Parse { .. } | Self::Serialization(_) => "serialization",
            Self::Listener(_) => "eviction",
            Self::Io(_) => "io",
            Self::Network(_) => "network",
            Self::Join(_) => "async",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = CollectorError::parse("unexpected token");
        assert_eq!(err.to_string(), "Parse error: unexpected token");
        assert_eq!(err.category(), "serialization");
    }

    #[test]
    fn test_error_recoverability() {
        assert!(CollectorError::network("connection reset").is_recoverable());
        assert!(CollectorError::InvalidSample { property: "x" }.is_recoverable());
        assert!(!CollectorError::config("bad timeout").is_recoverable());
        assert!(!CollectorError::MissingIdentity { property: "x" }.is_recoverable());
    }

    #[test]
    fn test_identity_errors_name_the_property() {
        let err = CollectorError::InvalidSample {
            property: "spring.cloud.application.guid",
        };
        assert_eq!(
            err.to_string(),
            "Invalid sample: missing required property 'spring.cloud.application.guid'"
        );

        let err = CollectorError::MissingIdentity {
            property: "spring.cloud.dataflow.stream.name",
        };
        assert_eq!(err.category(), "invariant");
        assert!(err.to_string().contains("spring.cloud.dataflow.stream.name"));
    }
}
