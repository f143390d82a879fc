//! Error types for the registry

use thiserror::Error;

/// Errors reported by a [`Transport`](crate::transport::Transport)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// A query or response could not be put on the wire
    #[error("Failed to send {kind}: {reason}")]
    Send { kind: &'static str, reason: String },

    /// The transport has been shut down, or the runtime driving it stopped
    /// before the send finished
    #[error("Transport is closed")]
    Closed,
}

/// Invalid configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid service '{name}': {reason}")]
    InvalidService { name: String, reason: String },

    #[error("Invalid timing configuration: {0}")]
    InvalidTiming(String),
}
