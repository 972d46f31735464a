//! Error types for the MCP server.
//!
//! Maps driver errors from every backend to MCP-friendly error responses.

use serde::{Deserialize, Serialize};

/// MCP server errors.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum McpError {
    /// Error raised by one of the database drivers.
    #[error("{backend} error: {message}")]
    Driver {
        /// Backend the error came from (e.g. "postgres")
        backend: String,
        /// Human-readable error message
        message: String,
    },

    /// The backend is enabled but its slot in the session is empty.
    #[error("{0} is not connected")]
    NotConnected(String),

    /// Unknown tool requested.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// Unknown resource URI requested.
    #[error("unknown resource: {0}")]
    UnknownResource(String),

    /// Missing required argument.
    #[error("missing required argument: {0}")]
    MissingArg(String),

    /// Invalid argument value.
    #[error("invalid argument '{name}': {reason}")]
    InvalidArg {
        /// Argument name
        name: String,
        /// Reason why it's invalid
        reason: String,
    },

    /// Invalid startup configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON-RPC protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),

    /// A new session was refused because the registry is full.
    #[error("session limit of {0} reached; close an existing session first")]
    SessionLimit(usize),
}

impl McpError {
    /// Build a driver error for the named backend.
    pub fn driver(backend: &str, message: impl Into<String>) -> Self {
        McpError::Driver {
            backend: backend.to_string(),
            message: message.into(),
        }
    }

    /// Build an invalid-argument error.
    pub fn invalid_arg(name: &str, reason: impl Into<String>) -> Self {
        McpError::InvalidArg {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<sqlx::Error> for McpError {
    fn from(err: sqlx::Error) -> Self {
        McpError::driver("postgres", err.to_string())
    }
}

impl From<redis::RedisError> for McpError {
    fn from(err: redis::RedisError) -> Self {
        McpError::driver("redis", err.to_string())
    }
}

impl From<mongodb::error::Error> for McpError {
    fn from(err: mongodb::error::Error) -> Self {
        McpError::driver("mongodb", err.to_string())
    }
}

// reqwest only backs the InfluxDB adapter.
impl From<reqwest::Error> for McpError {
    fn from(err: reqwest::Error) -> Self {
        McpError::driver("influxdb", err.to_string())
    }
}

impl From<std::io::Error> for McpError {
    fn from(err: std::io::Error) -> Self {
        McpError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for McpError {
    fn from(err: serde_json::Error) -> Self {
        McpError::Protocol(format!("JSON error: {}", err))
    }
}

/// JSON-RPC error codes.
pub mod rpc_codes {
    /// Parse error - Invalid JSON was received.
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid Request - The JSON sent is not a valid Request object.
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found - The method does not exist / is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid params - Invalid method parameter(s).
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error - Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Server-defined: request lacked a valid shared secret.
    pub const UNAUTHORIZED: i32 = -32001;
}

impl McpError {
    /// Convert to JSON-RPC error code.
    pub fn rpc_code(&self) -> i32 {
        match self {
            McpError::UnknownTool(_) => rpc_codes::METHOD_NOT_FOUND,
            McpError::UnknownResource(_)
            | McpError::MissingArg(_)
            | McpError::InvalidArg { .. } => rpc_codes::INVALID_PARAMS,
            McpError::Protocol(_) => rpc_codes::INVALID_REQUEST,
            _ => rpc_codes::INTERNAL_ERROR,
        }
    }
}

/// Result type for MCP operations.
pub type Result<T> = std::result::Result<T, McpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_message_names_backend() {
        let err = McpError::driver("redis", "connection refused");
        assert_eq!(err.to_string(), "redis error: connection refused");
        assert_eq!(err.rpc_code(), rpc_codes::INTERNAL_ERROR);
    }

    #[test]
    fn test_argument_errors_map_to_invalid_params() {
        assert_eq!(McpError::MissingArg("sql".into()).rpc_code(), rpc_codes::INVALID_PARAMS);
        assert_eq!(
            McpError::invalid_arg("limit", "must be an integer").rpc_code(),
            rpc_codes::INVALID_PARAMS
        );
        assert_eq!(McpError::UnknownTool("x".into()).rpc_code(), rpc_codes::METHOD_NOT_FOUND);
    }

    #[test]
    fn test_session_limit_message() {
        let err = McpError::SessionLimit(2);
        assert_eq!(
            err.to_string(),
            "session limit of 2 reached; close an existing session first"
        );
        assert_eq!(err.rpc_code(), rpc_codes::INTERNAL_ERROR);
    }
}
