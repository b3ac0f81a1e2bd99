//! Error types for the plugin function server.
//!
//! Every error kind here is local to a single request: the server keeps
//! serving after any of them. Only bind failures and the shutdown signal end
//! the process.

use std::net::SocketAddr;
use thiserror::Error;

/// Main error type for the plugin library.
#[derive(Debug, Error)]
pub enum PluginError {
    // Dispatch errors
    #[error("Function {name} not registered!")]
    NotRegistered { name: String },

    #[error("Malformed call arguments: {message}")]
    MalformedArguments { message: String },

    #[error("Function {name} expects {expected} arguments, but got {got}")]
    ArityMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("Function {name} argument {index} has the wrong type: {message}")]
    ArgumentType {
        name: String,
        index: usize,
        message: String,
    },

    #[error("Function {name} failed: {message}")]
    InvocationFailed { name: String, message: String },

    #[error("Function return type {type_name} not supported!")]
    UnsupportedReturnType { type_name: String },

    // Connection setup errors
    #[error("No available port in range {start}-{end}")]
    PortExhausted { start: u16, end: u16 },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid handshake line: {message}")]
    Handshake { message: String },

    // Transport errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    #[error("Invalid params: {message}")]
    InvalidParams { message: String },

    #[error("Connection to plugin at {addr} lost")]
    ConnectionLost { addr: SocketAddr },

    #[error("Remote error {code}: {message}")]
    Remote { code: i32, message: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for plugin operations.
pub type Result<T> = std::result::Result<T, PluginError>;

impl From<std::io::Error> for PluginError {
    fn from(err: std::io::Error) -> Self {
        PluginError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for PluginError {
    fn from(err: serde_json::Error) -> Self {
        PluginError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl PluginError {
    /// Convert to a JSON-RPC error code.
    ///
    /// Standard JSON-RPC error codes:
    /// - -32700: Parse error
    /// - -32600: Invalid Request
    /// - -32601: Method not found
    /// - -32602: Invalid params
    /// - -32603: Internal error
    ///
    /// Custom error codes (application-defined, -32000 to -32099):
    /// - -32001: Function not registered
    /// - -32002: Function invocation failed
    /// - -32003: Unsupported return type
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            PluginError::Json { .. } => -32700,

            PluginError::InvalidRequest { .. } => -32600,

            PluginError::MethodNotFound { .. } => -32601,

            PluginError::InvalidParams { .. }
            | PluginError::MalformedArguments { .. }
            | PluginError::ArityMismatch { .. }
            | PluginError::ArgumentType { .. } => -32602,

            PluginError::NotRegistered { .. } => -32001,

            PluginError::InvocationFailed { .. } => -32002,

            PluginError::UnsupportedReturnType { .. } => -32003,

            PluginError::Remote { code, .. } => *code,

            // All other errors are internal errors
            _ => -32603,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PluginError::NotRegistered {
            name: "nonexistent".into(),
        };
        assert_eq!(err.to_string(), "Function nonexistent not registered!");

        let err = PluginError::UnsupportedReturnType {
            type_name: "null".into(),
        };
        assert_eq!(err.to_string(), "Function return type null not supported!");
    }

    #[test]
    fn test_rpc_error_codes() {
        assert_eq!(
            PluginError::NotRegistered {
                name: "f".into()
            }
            .to_rpc_error_code(),
            -32001
        );
        assert_eq!(
            PluginError::MalformedArguments {
                message: "bad".into()
            }
            .to_rpc_error_code(),
            -32602
        );
        assert_eq!(
            PluginError::Remote {
                code: -32002,
                message: "boom".into()
            }
            .to_rpc_error_code(),
            -32002
        );
        assert_eq!(PluginError::Other("x".into()).to_rpc_error_code(), -32603);
    }
}
