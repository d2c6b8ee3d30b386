//! Error types for the tailhub client.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::io;
use thiserror::Error;

// ============================================================================
// Client Error Type
// ============================================================================

/// Errors talking to the daemon.
///
/// Connection errors suggest checking whether the daemon is running;
/// `Daemon` errors carry the daemon's machine-readable code so callers can
/// tell "no such log" apart from transport failures.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Failed to connect to the daemon.
    #[error("Failed to connect to daemon: {0}")]
    DaemonConnection(String),

    /// Protocol version mismatch with daemon
    #[error("Protocol version mismatch (client: {client_version}, daemon: {daemon_version})")]
    VersionMismatch {
        /// The protocol version the client supports.
        client_version: String,
        /// The protocol version the daemon is running.
        daemon_version: String,
    },

    /// The daemon sent something this client did not expect.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// The daemon answered a request with an error.
    #[error("{message}")]
    Daemon {
        message: String,
        code: Option<String>,
    },

    /// The daemon closed the connection.
    #[error("Daemon closed the connection")]
    Closed,

    /// I/O error passthrough.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON parse error passthrough.
    #[error("Failed to parse message: {0}")]
    ParseError(#[from] serde_json::Error),
}

impl ClientError {
    /// The daemon's error code, if this is a daemon-side error.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Daemon { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Convenience Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
