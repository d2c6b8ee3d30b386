//! Plain-text rendering for CLI output.
//!
//! Every function returns a `String` so commands can print it and tests can
//! assert on it without a terminal.

use chrono::{DateTime, Local, Utc};
use tailhub_core::{LogLine, LogSummary, SearchResults};
use tailhub_protocol::DaemonMessage;

/// Column width for log names in the list table.
const NAME_WIDTH: usize = 24;

/// Column width for sources in the list table.
const SOURCE_WIDTH: usize = 40;

// ============================================================================
// Log list
// ============================================================================

/// Renders the tracked-log table.
pub fn log_table(logs: &[LogSummary], now: DateTime<Utc>) -> String {
    if logs.is_empty() {
        return "No logs tracked. Use `tailhub track <path>` to add one.\n".to_string();
    }

    let (nw, sw) = (NAME_WIDTH, SOURCE_WIDTH);
    let mut out = format!(
        "{:<nw$}  {:<11}  {:>7}  {:>5}  {:<9}  {:<sw$}\n",
        "NAME", "STATUS", "LINES", "SUBS", "TRACKED", "SOURCE"
    );
    for log in logs {
        out.push_str(&format!(
            "{:<nw$}  {:<11}  {:>7}  {:>5}  {:<9}  {:<sw$}\n",
            truncate_string(log.display_name(), NAME_WIDTH),
            log.status.label(),
            log.line_count,
            log.subscribers,
            format_age(now - log.tracked_at),
            truncate_string(&log.source.to_string(), SOURCE_WIDTH),
        ));
    }
    out
}

/// Renders every field of one log.
pub fn describe(log: &LogSummary, now: DateTime<Utc>) -> String {
    let mut out = String::new();
    out.push_str(&format!("id:          {}\n", log.id));
    if let Some(friendly) = &log.friendly_id {
        out.push_str(&format!("friendly id: {friendly}\n"));
    }
    if let Some(description) = &log.description {
        out.push_str(&format!("description: {description}\n"));
    }
    out.push_str(&format!("kind:        {}\n", log.source.kind_label()));
    out.push_str(&format!("status:      {}\n", log.status));
    match &log.resolved_path {
        Some(path) => out.push_str(&format!("following:   {}\n", path.display())),
        None => out.push_str("following:   -\n"),
    }
    if log.source.is_pattern() {
        out.push_str(&format!("candidates:  {}\n", log.candidates));
    }
    out.push_str(&format!(
        "lines:       {} buffered, {} received\n",
        log.line_count, log.total_lines
    ));
    out.push_str(&format!("subscribers: {}\n", log.subscribers));
    out.push_str(&format!(
        "tracked:     {} ({})\n",
        log.tracked_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S"),
        format_age(now - log.tracked_at)
    ));
    out
}

// ============================================================================
// Lines and search
// ============================================================================

/// Renders buffered lines, optionally prefixed with their sequence numbers.
pub fn lines(lines: &[LogLine], numbered: bool) -> String {
    let mut out = String::new();
    for line in lines {
        if numbered {
            out.push_str(&format!("{:>6}  {}\n", line.seq, line.text));
        } else {
            out.push_str(&line.text);
            out.push('\n');
        }
    }
    out
}

/// Renders search hits as `name:seq: text`.
pub fn hits(results: &SearchResults) -> String {
    let mut out = String::new();
    for hit in &results.hits {
        let name = hit.friendly_id.as_deref().unwrap_or(hit.log.as_str());
        out.push_str(&format!("{name}:{}: {}\n", hit.seq, hit.text));
    }
    if results.truncated {
        out.push_str(&format!(
            "-- stopped after {} matches (raise --limit for more)\n",
            results.hits.len()
        ));
    }
    out
}

// ============================================================================
// Follow stream
// ============================================================================

/// Renders one streamed event for `tailhub follow`.
///
/// Lines print as-is; everything else becomes a `--` marker line. Responses
/// that are not stream events render as `None`.
pub fn event(msg: &DaemonMessage) -> Option<String> {
    let rendered = match msg {
        DaemonMessage::Line { line, .. } => line.text.clone(),
        DaemonMessage::StatusChanged { status, .. } => format!("-- {status}"),
        DaemonMessage::SourceChanged { to, .. } => match to {
            Some(path) => format!("-- now following {}", path.display()),
            None => "-- no matching file".to_string(),
        },
        DaemonMessage::Rotated { reason, .. } => format!("-- {reason}, reading from start"),
        DaemonMessage::Cleared { .. } => "-- buffer cleared".to_string(),
        DaemonMessage::Missed { count, .. } => format!("-- skipped {count} events (too slow)"),
        DaemonMessage::LogRemoved { log } => format!("-- {log} untracked"),
        _ => return None,
    };
    Some(rendered)
}

// ============================================================================
// Helpers
// ============================================================================

/// Formats a duration for human-readable display.
fn format_age(duration: chrono::Duration) -> String {
    let secs = duration.num_seconds();
    if secs < 0 {
        return "now".to_string();
    }
    if secs < 60 {
        format!("{secs}s ago")
    } else if secs < 3600 {
        format!("{}m ago", secs / 60)
    } else if secs < 86400 {
        format!("{}h ago", secs / 3600)
    } else {
        format!("{}d ago", secs / 86400)
    }
}

/// Truncates to `max_len` characters including any ellipsis.
fn truncate_string(s: &str, max_len: usize) -> String {
    let char_count = s.chars().count();
    if char_count <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}
