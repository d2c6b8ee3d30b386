//! Unix socket server for the tailhub daemon.
//!
//! The server:
//! - Listens on a Unix socket for client connections
//! - Spawns a ConnectionHandler for each client
//! - Caps the number of concurrent clients
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   DaemonServer  │
//! │                 │
//! │  UnixListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ConnectionHandler│────▶│  RegistryHandle │
//! │   (per client)  │     │                 │
//! └───────┬─────────┘     └─────────────────┘
//!         │ spawn per subscribed log
//!         ▼
//! ┌─────────────────┐
//! │ Forwarder tasks │
//! │ (Subscription)  │
//! └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Server errors are logged and allow continued operation

mod connection;

pub use connection::{event_message, write_message, ConnectionError, ConnectionHandler, SharedWriter};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::registry::RegistryHandle;

/// Maximum number of concurrent clients
pub const MAX_CLIENTS: usize = 64;

/// Unix socket server for the tailhub daemon.
pub struct DaemonServer {
    /// Path to the Unix socket
    socket_path: PathBuf,

    /// Bridge to the log registry
    registry: RegistryHandle,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Connection counter for generating client IDs
    connection_counter: AtomicU64,

    /// Currently connected clients
    active_clients: Arc<AtomicUsize>,
}

impl DaemonServer {
    /// Creates a new daemon server.
    ///
    /// # Arguments
    ///
    /// * `socket_path` - Path where the Unix socket will be created
    /// * `registry` - Bridge to the log registry
    /// * `cancel_token` - Token for graceful shutdown
    pub fn new(
        socket_path: impl Into<PathBuf>,
        registry: RegistryHandle,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            socket_path: socket_path.into(),
            registry,
            cancel_token,
            connection_counter: AtomicU64::new(0),
            active_clients: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns the socket path.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Returns the number of connected clients.
    pub fn client_count(&self) -> usize {
        self.active_clients.load(Ordering::Relaxed)
    }

    /// Runs the server.
    ///
    /// Listens for connections until the cancellation token is triggered.
    /// This method does not return until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self.bind()?;

        info!(
            socket = %self.socket_path.display(),
            "Daemon server listening"
        );

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let conn_num = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            self.handle_connection(stream, conn_num);
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        self.cleanup();
        Ok(())
    }

    fn bind(&self) -> Result<UnixListener, ServerError> {
        let setup_error = |e: std::io::Error| ServerError::SocketSetup {
            path: self.socket_path.clone(),
            error: e.to_string(),
        };

        // Stale socket from a previous run
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(setup_error)?;
        }

        if let Some(parent) = self.socket_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(setup_error)?;
            }
        }

        UnixListener::bind(&self.socket_path).map_err(setup_error)
    }

    /// Handles a new client connection by spawning a handler task.
    fn handle_connection(&self, stream: UnixStream, connection_number: u64) {
        let active = self.active_clients.fetch_add(1, Ordering::AcqRel);
        if active >= MAX_CLIENTS {
            self.active_clients.fetch_sub(1, Ordering::AcqRel);
            let err = ServerError::TooManyClients { max: MAX_CLIENTS };
            warn!(connection = connection_number, error = %err, "Refusing connection");
            return;
        }

        let (reader, writer) = stream.into_split();
        let handler = ConnectionHandler::new(
            reader,
            writer,
            self.registry.clone(),
            &self.cancel_token,
            connection_number,
        );
        let active_clients = Arc::clone(&self.active_clients);

        tokio::spawn(async move {
            let client_id = handler.run().await;
            active_clients.fetch_sub(1, Ordering::AcqRel);
            debug!(client_id = ?client_id, "Connection task finished");
        });
    }

    /// Removes the socket file.
    fn cleanup(&self) {
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(
                    socket = %self.socket_path.display(),
                    error = %e,
                    "Failed to remove socket file"
                );
            }
        }

        info!("Server cleanup complete");
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to setup socket at {path}: {error}")]
    SocketSetup { path: PathBuf, error: String },

    #[error("Too many clients (max: {max})")]
    TooManyClients { max: usize },

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_display() {
        let err = ServerError::SocketSetup {
            path: PathBuf::from("/tmp/test.sock"),
            error: "permission denied".to_string(),
        };
        assert!(err.to_string().contains("/tmp/test.sock"));
        assert!(err.to_string().contains("permission denied"));
    }

    #[test]
    fn test_max_clients_error() {
        let err = ServerError::TooManyClients { max: MAX_CLIENTS };
        assert!(err.to_string().contains(&MAX_CLIENTS.to_string()));
    }
}
