//! Error types for the Skyhook tunnel
//!
//! This module defines the error kinds shared by the server and agent, with
//! a focus on clear failure modes and operational visibility. Every tunnel
//! failure maps to exactly one variant; none of them are fatal to the
//! process.

use thiserror::Error;

/// Result alias for tunnel operations
pub type TunnelResult<T> = Result<T, TunnelError>;

/// Main error type for Skyhook operations
#[derive(Error, Debug)]
pub enum TunnelError {
    /// Configuration errors (fatal at startup only)
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The target agent has no live connection
    #[error("Client not connected: {client_id}")]
    NotConnected { client_id: String },

    /// The connection's bounded send queue rejected the frame
    #[error("Send queue full for client: {client_id}")]
    QueueFull { client_id: String },

    /// A pending request expired before a response arrived
    #[error("Timeout: {operation} after {duration_ms}ms")]
    Timeout {
        operation: String,
        duration_ms: u64,
        msg_id: Option<String>,
    },

    /// Register rejected: token mismatch or missing credentials
    #[error("Authentication failed for client {client_id}: {reason}")]
    AuthFailed { client_id: String, reason: String },

    /// The client record exists but is administratively disabled
    #[error("Client is disabled: {client_id}")]
    ClientDisabled { client_id: String },

    /// No client record for the presented id
    #[error("Client not found: {client_id}")]
    ClientNotFound { client_id: String },

    /// No route record matches the requested path
    #[error("No route matches path: {path}")]
    RouteNotFound { path: String },

    /// Routes matched but none has a live, enabled client
    #[error("No available backend for path: {path}")]
    NoAvailableBackend { path: String },

    /// A url_pattern failed validation
    #[error("Invalid route pattern: {pattern}")]
    InvalidPattern { pattern: String },

    /// Frame-level protocol violation
    #[error("Protocol error: {message}")]
    Protocol {
        message: String,
        client_id: Option<String>,
    },

    /// Store read/write failure
    #[error("Store error: {message}")]
    Store {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Duplicate msg_id presented to the pending-request table
    #[error("Duplicate msg_id: {msg_id}")]
    DuplicateMsgId { msg_id: String },

    /// IO errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl TunnelError {
    /// Build a config error from anything printable
    pub fn config(message: impl Into<String>) -> Self {
        TunnelError::Config {
            message: message.into(),
        }
    }

    /// Build a store error without a source
    pub fn store(message: impl Into<String>) -> Self {
        TunnelError::Store {
            message: message.into(),
            source: None,
        }
    }

    /// Build an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        TunnelError::Internal {
            message: message.into(),
        }
    }

    /// The HTTP status the proxy front door surfaces for this error
    pub fn http_status(&self) -> u16 {
        match self {
            TunnelError::RouteNotFound { .. } => 404,
            TunnelError::NoAvailableBackend { .. } => 503,
            TunnelError::Timeout { .. } => 504,
            TunnelError::NotConnected { .. } | TunnelError::QueueFull { .. } => 502,
            TunnelError::AuthFailed { .. } => 401,
            TunnelError::ClientDisabled { .. } => 403,
            TunnelError::ClientNotFound { .. } => 404,
            TunnelError::InvalidPattern { .. } => 400,
            _ => 500,
        }
    }
}

impl From<std::io::Error> for TunnelError {
    fn from(err: std::io::Error) -> Self {
        TunnelError::Io {
            message: err.to_string(),
            source: err,
        }
    }
}
