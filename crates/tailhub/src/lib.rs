//! tailhub client library
//!
//! Used by the `tailhub` command-line tool:
//! - `client` - Socket connection to the daemon with typed requests
//! - `render` - Plain-text output for lists, lines, search hits and follow streams
//! - `error` - Client error type
//!
//! Requests are answered in order. While subscribed, streamed events may
//! arrive between responses; [`DaemonClient`] queues them until
//! [`DaemonClient::next_event`] is called.

pub mod client;
pub mod error;
pub mod render;

// Re-export commonly used types
pub use client::DaemonClient;
pub use error::{ClientError, Result};
