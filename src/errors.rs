//! MCP Error Types
//!
//! This module defines the error type shared by every layer of the crate:
//! transports, message framing, request correlation, the server dispatch
//! engine and the client proxy.

use serde_json::Value;
use thiserror::Error;

/// The main Error type for the MCP engine
#[derive(Error, Debug)]
pub enum Error {
    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Failed to spawn a child process
    #[error("Failed to spawn process: {0}")]
    Spawn(String),

    /// Transport-related errors
    #[error("Transport error: {0}")]
    Transport(String),

    /// Protocol errors (e.g., invalid message format)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Method not found
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Invalid parameters
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// Error object returned by the peer in a JSON-RPC response
    #[error("RPC error {code}: {message}")]
    Rpc {
        code: i32,
        message: String,
        data: Option<Value>,
    },

    /// The connection closed before a response arrived
    #[error("Connection closed")]
    ConnectionClosed,

    /// Request timeout
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// A request arrived before the handshake completed
    #[error("Not initialized: {0}")]
    NotInitialized(String),

    /// Invalid state for requested operation
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Standard JSON-RPC 2.0 error codes
pub mod error_codes {
    /// Parse error
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid request
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid params
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Server received a request before `initialize`
    pub const SERVER_NOT_INITIALIZED: i32 = -32002;
}

impl Error {
    /// Convert an error to a JSON-RPC error code
    pub fn to_code(&self) -> i32 {
        use error_codes::*;
        match self {
            Error::Json(_) => PARSE_ERROR,
            Error::Protocol(_) => INVALID_REQUEST,
            Error::InvalidState(_) => INVALID_REQUEST,
            Error::MethodNotFound(_) => METHOD_NOT_FOUND,
            Error::InvalidParams(_) => INVALID_PARAMS,
            Error::NotInitialized(_) => SERVER_NOT_INITIALIZED,
            Error::Rpc { code, .. } => *code,
            Error::Io(_)
            | Error::Http(_)
            | Error::Spawn(_)
            | Error::Transport(_)
            | Error::ConnectionClosed
            | Error::Timeout(_) => INTERNAL_ERROR,
        }
    }

    /// Whether this error means the underlying connection is gone
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            Error::ConnectionClosed | Error::Transport(_) | Error::Io(_) | Error::Http(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_json_rpc() {
        assert_eq!(Error::MethodNotFound("x".into()).to_code(), -32601);
        assert_eq!(Error::InvalidParams("x".into()).to_code(), -32602);
        assert_eq!(Error::NotInitialized("x".into()).to_code(), -32002);
        assert_eq!(Error::ConnectionClosed.to_code(), -32603);

        let rpc = Error::Rpc {
            code: -32000,
            message: "boom".to_string(),
            data: None,
        };
        assert_eq!(rpc.to_code(), -32000);
        assert_eq!(rpc.to_string(), "RPC error -32000: boom");
    }

    #[test]
    fn connection_failures() {
        assert!(Error::ConnectionClosed.is_connection_failure());
        assert!(Error::Transport("gone".into()).is_connection_failure());
        assert!(!Error::InvalidParams("bad".into()).is_connection_failure());
    }
}
