//! Common error types for Wampline
//!
//! This module defines all error types used across callers, workers and the
//! master. Every error has a stable code so it can be labelled in metrics and
//! carried inside failed RPC responses.

use thiserror::Error;

/// Main error type for Wampline
#[derive(Error, Debug)]
pub enum WampError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Pending-call ceiling reached or signature space exhausted
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// No response within the request window
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// A response matched no pending call
    #[error("Unable to find resolving function for procedure {procedure} with signature {signature}")]
    CorrelationFault { procedure: String, signature: String },

    /// The peer answered with `success: false`
    #[error("Remote procedure failed: {0}")]
    Remote(serde_json::Value),

    /// Unicast to a dead or unknown worker
    #[error("Worker unavailable: {0}")]
    WorkerUnavailable(String),

    /// A socket or channel endpoint went away
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// A message did not conform to the expected schema
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for WampError {
    fn from(err: config::ConfigError) -> Self {
        WampError::Config(err.to_string())
    }
}

impl WampError {
    /// Stable short code for this error kind
    pub fn code(&self) -> &'static str {
        match self {
            WampError::Config(_) => "config",
            WampError::ResourceExhausted(_) => "resource_exhausted",
            WampError::Timeout(_) => "timeout",
            WampError::CorrelationFault { .. } => "correlation_fault",
            WampError::Remote(_) => "remote",
            WampError::WorkerUnavailable(_) => "worker_unavailable",
            WampError::ChannelClosed(_) => "channel_closed",
            WampError::InvalidMessage(_) => "invalid_message",
            WampError::Serialization(_) => "serialization",
            WampError::Io(_) => "io",
        }
    }

    /// Error payload to carry in a failed RPC response.
    ///
    /// Remote errors are forwarded untouched, everything else becomes its
    /// display string.
    pub fn to_payload(&self) -> serde_json::Value {
        match self {
            WampError::Remote(value) => value.clone(),
            other => serde_json::Value::String(other.to_string()),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        WampError::Config(msg.into())
    }

    /// Create a resource exhausted error
    pub fn resource_exhausted(msg: impl Into<String>) -> Self {
        WampError::ResourceExhausted(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        WampError::Timeout(msg.into())
    }

    /// Create a correlation fault
    pub fn correlation_fault(procedure: impl Into<String>, signature: impl Into<String>) -> Self {
        WampError::CorrelationFault {
            procedure: procedure.into(),
            signature: signature.into(),
        }
    }

    /// Create a worker unavailable error
    pub fn worker_unavailable(msg: impl Into<String>) -> Self {
        WampError::WorkerUnavailable(msg.into())
    }

    /// Create a channel closed error
    pub fn channel_closed(msg: impl Into<String>) -> Self {
        WampError::ChannelClosed(msg.into())
    }

    /// Create an invalid message error
    pub fn invalid_message(msg: impl Into<String>) -> Self {
        WampError::InvalidMessage(msg.into())
    }
}

/// Result type alias for Wampline operations
pub type Result<T> = std::result::Result<T, WampError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_correlation_fault_message() {
        let err = WampError::correlation_fault("blocks.get", "17_3");
        assert_eq!(err.code(), "correlation_fault");
        assert_eq!(
            err.to_string(),
            "Unable to find resolving function for procedure blocks.get with signature 17_3"
        );
    }

    #[test]
    fn test_payload_keeps_remote_errors() {
        let remote = WampError::Remote(json!({"reason": "bad height"}));
        assert_eq!(remote.to_payload(), json!({"reason": "bad height"}));

        let timeout = WampError::timeout("RPC response timeout exceeded");
        assert_eq!(
            timeout.to_payload(),
            json!("Operation timed out: RPC response timeout exceeded")
        );
    }
}
