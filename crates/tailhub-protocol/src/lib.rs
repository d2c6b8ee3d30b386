//! tailhub Protocol - Wire protocol for daemon communication
//!
//! Newline-delimited JSON over a local Unix socket. Every client message
//! carries the protocol version; the first one must be `connect`.

pub mod message;
pub mod version;

pub use message::{ClientMessage, DaemonMessage, MessageType};
pub use version::{ProtocolVersion, VersionError};
