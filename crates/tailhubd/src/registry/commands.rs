//! Registry bridge commands, errors, and events.
//!
//! This module defines the message types for the query bridge:
//! - `RegistryCommand`: A pending query sent to the registry actor
//! - `RegistryError`: Typed failures returned across the bridge
//! - `LogEvent`: Per-log events delivered to subscribers
//! - `RegistryEvent`: Changes to the tracked set
//!
//! All types are designed for async message passing and follow the panic-free policy.

use std::path::PathBuf;

use thiserror::Error;
use tokio::sync::oneshot;

use tailhub_core::{
    DomainError, LogId, LogLine, LogMetadata, LogSource, LogSummary, RotationReason,
    SearchQuery, SearchResults, SourceStatus,
};

use super::fanout::Subscription;

// ============================================================================
// Registry Commands
// ============================================================================

/// A pending query for the registry actor.
///
/// Each command carries a oneshot channel for its result, so the caller's
/// runtime can await it without occupying a monitor thread. `log` fields
/// take a friendly id or a full log id.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Enumerate tracked logs.
    ListLogs {
        respond_to: oneshot::Sender<Vec<LogSummary>>,
    },

    /// Most recent lines of one log.
    ///
    /// # Errors
    /// - `RegistryError::NotFound` if no such log is tracked
    ReadLog {
        log: String,
        /// `None` returns the whole buffer
        max_lines: Option<usize>,
        respond_to: oneshot::Sender<Result<(LogId, Vec<LogLine>), RegistryError>>,
    },

    /// Search one log, or all logs when `log` is `None`.
    ///
    /// # Errors
    /// - `RegistryError::NotFound` for an unknown log
    /// - `RegistryError::QueryFailed` for an empty or malformed pattern
    Search {
        log: Option<String>,
        query: SearchQuery,
        respond_to: oneshot::Sender<Result<SearchResults, RegistryError>>,
    },

    /// Start following a source. Idempotent.
    ///
    /// # Errors
    /// - `RegistryError::InvalidSource` for a malformed pattern
    /// - `RegistryError::DuplicateId` if the friendly id is taken
    /// - `RegistryError::RegistryFull` if at maximum capacity
    Track {
        source: LogSource,
        metadata: LogMetadata,
        respond_to: oneshot::Sender<Result<LogSummary, RegistryError>>,
    },

    /// Stop following a log. Responds `false` if it was not tracked.
    Untrack {
        log: String,
        respond_to: oneshot::Sender<bool>,
    },

    /// Replace a log's friendly id and description.
    SetMetadata {
        log: String,
        metadata: LogMetadata,
        respond_to: oneshot::Sender<Result<LogSummary, RegistryError>>,
    },

    /// Drop a log's buffered lines.
    ClearLog {
        log: String,
        respond_to: oneshot::Sender<Result<LogSummary, RegistryError>>,
    },

    /// Subscribe to a log, optionally replaying buffered lines first.
    ///
    /// The backlog and the subscription are captured atomically: the first
    /// event delivered is the first line appended after the backlog.
    Subscribe {
        log: String,
        backlog: usize,
        respond_to: oneshot::Sender<Result<(Vec<LogLine>, Subscription), RegistryError>>,
    },

    /// Untrack everything and stop the actor.
    Shutdown { respond_to: oneshot::Sender<()> },
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
///
/// Uses `thiserror` for ergonomic error handling and Display implementations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The requested log is not tracked.
    #[error("log not found: {0}")]
    NotFound(String),

    /// Malformed search predicate.
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Path or pattern cannot be tracked.
    #[error("invalid source: {0}")]
    InvalidSource(String),

    /// Friendly id or description rejected.
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    /// The registry has reached its maximum log capacity.
    #[error("registry is full (max: {max} logs)")]
    RegistryFull {
        /// Maximum number of logs allowed
        max: usize,
    },

    /// Another log already uses this friendly id.
    #[error("friendly id already in use: {0}")]
    DuplicateId(String),

    /// The monitor thread could not be started.
    #[error("failed to start monitor: {0}")]
    MonitorStart(String),

    /// The registry did not answer in time.
    #[error("query timed out after {ms} ms")]
    Timeout {
        /// Timeout that elapsed
        ms: u64,
    },

    /// The actor was shut down.
    #[error("registry channel closed")]
    ChannelClosed,
}

impl RegistryError {
    /// Stable machine-readable code for the wire protocol.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::QueryFailed(_) => "query_failed",
            Self::InvalidSource(_) => "invalid_source",
            Self::InvalidMetadata(_) => "invalid_metadata",
            Self::RegistryFull { .. } => "registry_full",
            Self::DuplicateId(_) => "duplicate_id",
            Self::MonitorStart(_) => "monitor_failed",
            Self::Timeout { .. } => "timeout",
            Self::ChannelClosed => "unavailable",
        }
    }
}

impl From<DomainError> for RegistryError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InvalidSource { .. } => Self::InvalidSource(err.to_string()),
            DomainError::InvalidMetadata { .. } => Self::InvalidMetadata(err.to_string()),
            DomainError::InvalidQuery { reason } => Self::QueryFailed(reason),
        }
    }
}

// ============================================================================
// Events
// ============================================================================

/// Events delivered to subscribers of one log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    /// A line was appended to the buffer.
    Line(LogLine),

    /// Source health changed.
    Status(SourceStatus),

    /// A wildcard group switched files.
    SourceChanged {
        from: Option<PathBuf>,
        to: Option<PathBuf>,
    },

    /// The file was truncated or replaced and is reread from the start.
    Rotated(RotationReason),

    /// The buffer was cleared.
    Cleared,

    /// The log was untracked. No further events follow.
    Removed,
}

/// Changes to the set of tracked logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Tracked { log: LogId },
    Untracked { log: LogId },
    MetadataChanged { log: LogId },
}
