//! Error types for the transport, correlation and client layers.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Error object carried by a JSON-RPC error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("RPC error {code}: {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Decode an `error` member, tolerating servers that send a bare string.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(message) => Self {
                code: 0,
                message,
                data: None,
            },
            other => serde_json::from_value(other.clone()).unwrap_or_else(|_| Self {
                code: 0,
                message: other.to_string(),
                data: None,
            }),
        }
    }
}

/// An inbound frame that could not be classified.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unrecognised frame: {0}")]
    Shape(String),
}

/// Errors opening or using a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("No endpoint announced within {0:?}")]
    NoEndpoint(Duration),
    #[error("Connection closed")]
    Closed,
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors surfaced to callers of the client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Not connected")]
    NotConnected,
    #[error("Connection lost before a response arrived")]
    ConnectionLost,
    #[error("Request '{method}' timed out after {after:?}")]
    Timeout { method: String, after: Duration },
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),
    #[error("Discovery failed: {0}")]
    Discovery(String),
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_rpc_error_from_value() {
        let err = RpcError::from_value(json!({"code": -1, "message": "bad", "data": {"x": 1}}));
        assert_eq!(err.code, -1);
        assert_eq!(err.data, Some(json!({"x": 1})));

        let err = RpcError::from_value(json!("plain"));
        assert_eq!(err.message, "plain");

        let err = RpcError::from_value(json!(42));
        assert_eq!(err.message, "42");
    }
}
