//! Source health as seen by consumers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Current state of the file behind a tracked log.
///
/// Monitor failures never surface as errors; they land here instead, so a
/// viewer can keep showing buffered lines next to an indicator.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SourceStatus {
    /// The file does not exist yet.
    #[default]
    Waiting,

    /// The file is open and being followed.
    Tailing,

    /// A wildcard group with no matching file. Not an error.
    Unmatched,

    /// The file disappeared or cannot be read. Cleared automatically once
    /// the file is readable again.
    Unavailable { reason: String },
}

impl SourceStatus {
    /// Creates an unavailable status.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Returns true while content is flowing.
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Tailing)
    }

    /// Short label for list output.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Tailing => "tailing",
            Self::Unmatched => "unmatched",
            Self::Unavailable { .. } => "unavailable",
        }
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { reason } => write!(f, "unavailable ({reason})"),
            other => write!(f, "{}", other.label()),
        }
    }
}

/// Why a followed file was reread from the start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationReason {
    /// Size dropped below the read cursor.
    Truncated,
    /// A different file now lives under the same name.
    Replaced,
}

impl fmt::Display for RotationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "file truncated"),
            Self::Replaced => write!(f, "file replaced"),
        }
    }
}
