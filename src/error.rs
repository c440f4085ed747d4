//! Error types for netwire-server.
//!
//! [`NetwireError`] covers failures that belong to the server, a connection or
//! startup. Failures that belong to a single request never show up here: they
//! travel back to the caller inside a [`Response`](crate::protocol::Response)
//! with an [`ErrorKind`](crate::protocol::ErrorKind).

use thiserror::Error;

/// Main error type for all netwire operations.
#[derive(Debug, Error)]
pub enum NetwireError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol error (oversized frame, truncated stream, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration could not be read or is invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Bind address is not a valid `host:port`.
    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress {
        /// The address as configured.
        address: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Worker runtime could not be created.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Discovery backend rejected or failed a call.
    #[error("Registry error: {0}")]
    Registry(String),

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Result type alias using NetwireError.
pub type Result<T> = std::result::Result<T, NetwireError>;
