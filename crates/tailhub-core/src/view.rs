//! Read-only snapshot of a tracked log for list output.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::source::{LogId, LogSource};
use crate::status::SourceStatus;

/// Everything a client needs to show one row of the log list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogSummary {
    pub id: LogId,
    pub source: LogSource,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friendly_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub status: SourceStatus,

    /// File currently followed. For wildcard groups this is the active
    /// candidate; `None` when nothing is attached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_path: Option<PathBuf>,

    /// Lines currently buffered.
    pub line_count: usize,

    /// Lines received since tracking began.
    pub total_lines: u64,

    pub subscribers: usize,

    /// Matching files, wildcard groups only.
    #[serde(default)]
    pub candidates: usize,

    pub tracked_at: DateTime<Utc>,
}

impl LogSummary {
    /// Friendly id when set, otherwise the full id.
    pub fn display_name(&self) -> &str {
        self.friendly_id.as_deref().unwrap_or(self.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_prefers_friendly_id() {
        let mut summary = LogSummary {
            id: LogId::new("/var/log/app.log"),
            source: LogSource::Path(PathBuf::from("/var/log/app.log")),
            friendly_id: None,
            description: None,
            status: SourceStatus::Tailing,
            resolved_path: None,
            line_count: 0,
            total_lines: 0,
            subscribers: 0,
            candidates: 0,
            tracked_at: Utc::now(),
        };
        assert_eq!(summary.display_name(), "/var/log/app.log");
        summary.friendly_id = Some("app".to_string());
        assert_eq!(summary.display_name(), "app");
    }
}
