//! Protocol message types for daemon communication.

use std::path::PathBuf;

use crate::version::ProtocolVersion;
use serde::{Deserialize, Serialize};
use tailhub_core::{LogId, LogLine, LogSummary, RotationReason, SearchHit, SourceStatus};

/// Message types that can be sent by clients to the daemon.
///
/// `log` fields accept either a friendly id or a full log id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageType {
    /// Client handshake/connection request
    Connect {
        /// Client identifier (optional)
        #[serde(skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },

    /// Enumerate tracked logs
    ListLogs,

    /// Fetch the most recent lines of one log
    ReadLog {
        log: String,
        /// Defaults to the daemon's whole buffer when absent
        #[serde(skip_serializing_if = "Option::is_none")]
        max_lines: Option<usize>,
    },

    /// Search buffered lines of one or all logs
    Search {
        pattern: String,
        #[serde(default)]
        case_sensitive: bool,
        #[serde(default)]
        regex: bool,
        /// Restrict to one log (None = all logs)
        #[serde(skip_serializing_if = "Option::is_none")]
        log: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        limit: Option<usize>,
    },

    /// Start following a path or glob pattern
    Track {
        /// Absolute path or pattern; relative input is resolved by the client
        source: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        friendly_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },

    /// Stop following a log
    Untrack { log: String },

    /// Replace a log's friendly id and description
    SetMetadata {
        log: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        friendly_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },

    /// Drop a log's buffered lines
    ClearLog { log: String },

    /// Stream a log's new lines to this connection
    Subscribe {
        log: String,
        /// Replay up to this many buffered lines first
        #[serde(default)]
        backlog: usize,
    },

    /// Stop streaming a log
    Unsubscribe { log: String },

    /// Ping to check connection
    Ping {
        /// Sequence number for matching pong response
        seq: u64,
    },

    /// Client disconnecting gracefully
    Disconnect,
}

/// Messages sent from client to daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Protocol version
    pub protocol_version: ProtocolVersion,

    /// Message payload
    #[serde(flatten)]
    pub message: MessageType,
}

impl ClientMessage {
    /// Creates a new client message with current protocol version.
    pub fn new(message: MessageType) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            message,
        }
    }

    /// Creates a connect message.
    pub fn connect(client_id: Option<String>) -> Self {
        Self::new(MessageType::Connect { client_id })
    }

    pub fn list_logs() -> Self {
        Self::new(MessageType::ListLogs)
    }

    pub fn read_log(log: impl Into<String>, max_lines: Option<usize>) -> Self {
        Self::new(MessageType::ReadLog {
            log: log.into(),
            max_lines,
        })
    }

    /// Creates a literal, case-insensitive search across all logs.
    pub fn search(pattern: impl Into<String>) -> Self {
        Self::new(MessageType::Search {
            pattern: pattern.into(),
            case_sensitive: false,
            regex: false,
            log: None,
            limit: None,
        })
    }

    pub fn track(
        source: impl Into<String>,
        friendly_id: Option<String>,
        description: Option<String>,
    ) -> Self {
        Self::new(MessageType::Track {
            source: source.into(),
            friendly_id,
            description,
        })
    }

    pub fn untrack(log: impl Into<String>) -> Self {
        Self::new(MessageType::Untrack { log: log.into() })
    }

    pub fn set_metadata(
        log: impl Into<String>,
        friendly_id: Option<String>,
        description: Option<String>,
    ) -> Self {
        Self::new(MessageType::SetMetadata {
            log: log.into(),
            friendly_id,
            description,
        })
    }

    pub fn clear_log(log: impl Into<String>) -> Self {
        Self::new(MessageType::ClearLog { log: log.into() })
    }

    pub fn subscribe(log: impl Into<String>, backlog: usize) -> Self {
        Self::new(MessageType::Subscribe {
            log: log.into(),
            backlog,
        })
    }

    pub fn unsubscribe(log: impl Into<String>) -> Self {
        Self::new(MessageType::Unsubscribe { log: log.into() })
    }

    /// Creates a ping message.
    pub fn ping(seq: u64) -> Self {
        Self::new(MessageType::Ping { seq })
    }

    /// Creates a disconnect message.
    pub fn disconnect() -> Self {
        Self::new(MessageType::Disconnect)
    }
}

/// Messages sent from daemon to clients.
///
/// Responses arrive in request order. Streamed events (`line`,
/// `status_changed`, ...) for subscribed logs may be interleaved between
/// responses and always carry the log id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonMessage {
    /// Connection accepted
    Connected {
        /// Daemon's protocol version
        protocol_version: ProtocolVersion,
        /// Assigned client ID
        client_id: String,
    },

    /// Connection rejected (version mismatch, etc.)
    Rejected {
        /// Reason for rejection
        reason: String,
        /// Daemon's protocol version (for client to upgrade)
        protocol_version: ProtocolVersion,
    },

    /// Tracked log list response
    LogList { logs: Vec<LogSummary> },

    /// Buffered lines of one log, oldest first
    Lines { log: LogId, lines: Vec<LogLine> },

    /// Search response
    SearchResults { hits: Vec<SearchHit>, truncated: bool },

    /// A log is tracked (newly or already)
    Tracked { log: Box<LogSummary> },

    /// Untrack response
    Untracked { log: String, existed: bool },

    /// Metadata or clear acknowledged
    Updated { log: Box<LogSummary> },

    /// Subscription accepted; `backlog` lines follow as `line` events
    Subscribed { log: LogId, backlog: usize },

    /// Subscription removed
    Unsubscribed { log: String },

    /// New line on a subscribed log
    Line { log: LogId, line: LogLine },

    /// Source status changed on a subscribed log
    StatusChanged { log: LogId, status: SourceStatus },

    /// A wildcard group switched to another file
    SourceChanged {
        log: LogId,
        #[serde(skip_serializing_if = "Option::is_none")]
        from: Option<PathBuf>,
        #[serde(skip_serializing_if = "Option::is_none")]
        to: Option<PathBuf>,
    },

    /// The followed file was truncated or replaced and is reread from the start
    Rotated { log: LogId, reason: RotationReason },

    /// The log's buffer was cleared
    Cleared { log: LogId },

    /// This connection fell behind and lost `count` events
    Missed { log: LogId, count: u64 },

    /// A subscribed log was untracked
    LogRemoved { log: LogId },

    /// Pong response to ping
    Pong {
        /// Sequence number from ping
        seq: u64,
    },

    /// Error response
    Error {
        /// Error message
        message: String,
        /// Error code (optional)
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl DaemonMessage {
    /// Creates a connected response.
    pub fn connected(client_id: String) -> Self {
        Self::Connected {
            protocol_version: ProtocolVersion::CURRENT,
            client_id,
        }
    }

    /// Creates a rejected response.
    pub fn rejected(reason: &str) -> Self {
        Self::Rejected {
            reason: reason.to_string(),
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    pub fn log_list(logs: Vec<LogSummary>) -> Self {
        Self::LogList { logs }
    }

    pub fn lines(log: LogId, lines: Vec<LogLine>) -> Self {
        Self::Lines { log, lines }
    }

    pub fn search_results(hits: Vec<SearchHit>, truncated: bool) -> Self {
        Self::SearchResults { hits, truncated }
    }

    pub fn tracked(log: LogSummary) -> Self {
        Self::Tracked { log: Box::new(log) }
    }

    pub fn updated(log: LogSummary) -> Self {
        Self::Updated { log: Box::new(log) }
    }

    /// Creates a pong response.
    pub fn pong(seq: u64) -> Self {
        Self::Pong { seq }
    }

    /// Creates an error response.
    pub fn error(message: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: None,
        }
    }

    /// Creates an error response with code.
    pub fn error_with_code(message: &str, code: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: Some(code.to_string()),
        }
    }

    /// Returns true for unsolicited events on subscribed logs.
    pub fn is_stream_event(&self) -> bool {
        matches!(
            self,
            Self::Line { .. }
                | Self::StatusChanged { .. }
                | Self::SourceChanged { .. }
                | Self::Rotated { .. }
                | Self::Cleared { .. }
                | Self::Missed { .. }
                | Self::LogRemoved { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_serialization() {
        let msg = ClientMessage::ping(42);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"ping\""));
        assert!(json.contains("\"seq\":42"));
        assert!(json.contains("\"protocol_version\""));
    }

    #[test]
    fn test_search_defaults_when_fields_missing() {
        let json = r#"{"protocol_version":{"major":1,"minor":0},"type":"search","pattern":"boom"}"#;
        let parsed: ClientMessage = serde_json::from_str(json).unwrap();
        match parsed.message {
            MessageType::Search {
                pattern,
                case_sensitive,
                regex,
                log,
                limit,
            } => {
                assert_eq!(pattern, "boom");
                assert!(!case_sensitive);
                assert!(!regex);
                assert!(log.is_none());
                assert!(limit.is_none());
            }
            other => panic!("Expected Search message, got {other:?}"),
        }
    }

    #[test]
    fn test_daemon_line_event_shape() {
        let msg = DaemonMessage::Line {
            log: LogId::new("/tmp/app.log"),
            line: LogLine {
                seq: 3,
                text: "hello".to_string(),
            },
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"line\""));
        assert!(json.contains("\"seq\":3"));
        assert!(msg.is_stream_event());
        assert!(!DaemonMessage::pong(1).is_stream_event());
    }

    #[test]
    fn test_subscribe_roundtrip() {
        let original = ClientMessage::subscribe("app", 50);
        let json = serde_json::to_string(&original).unwrap();
        let parsed: ClientMessage = serde_json::from_str(&json).unwrap();

        match parsed.message {
            MessageType::Subscribe { log, backlog } => {
                assert_eq!(log, "app");
                assert_eq!(backlog, 50);
            }
            _ => panic!("Expected Subscribe message"),
        }
    }
}
