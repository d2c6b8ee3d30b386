//! A tracked log: buffer, status and subscriber table behind one lock.
//!
//! Appends, snapshots and subscriptions on the same log serialize on the
//! log's own mutex. Different logs never contend with each other.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info};

use tailhub_core::{
    LineBuffer, LineMatcher, LogId, LogLine, LogMetadata, LogSource, LogSummary, SearchHit,
    SourceStatus,
};

use super::commands::LogEvent;
use super::fanout::{SubscriberId, Subscription};
use crate::monitor::{Delta, DeltaSink};

struct LogState {
    buffer: LineBuffer,
    status: SourceStatus,
    resolved_path: Option<PathBuf>,
    candidates: Vec<PathBuf>,
    metadata: LogMetadata,
    /// Registration time per live subscriber.
    subscribers: HashMap<SubscriberId, DateTime<Utc>>,
    closed: bool,
}

/// One followed source and everything the registry keeps for it.
pub struct TrackedLog {
    id: LogId,
    source: LogSource,
    tracked_at: DateTime<Utc>,
    /// Insertion order within the registry.
    position: u64,
    state: Mutex<LogState>,
    events: broadcast::Sender<LogEvent>,
    next_subscriber: AtomicU64,
}

impl std::fmt::Debug for TrackedLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedLog")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

impl TrackedLog {
    pub(crate) fn new(
        source: LogSource,
        metadata: LogMetadata,
        position: u64,
        buffer_lines: usize,
        subscriber_queue: usize,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(subscriber_queue.max(1));
        let resolved_path = match &source {
            LogSource::Path(path) => Some(path.clone()),
            LogSource::Pattern(_) => None,
        };
        Arc::new(Self {
            id: source.id(),
            source,
            tracked_at: Utc::now(),
            position,
            state: Mutex::new(LogState {
                buffer: LineBuffer::new(buffer_lines),
                status: SourceStatus::Waiting,
                resolved_path,
                candidates: Vec::new(),
                metadata,
                subscribers: HashMap::new(),
                closed: false,
            }),
            events,
            next_subscriber: AtomicU64::new(1),
        })
    }

    pub fn id(&self) -> &LogId {
        &self.id
    }

    pub fn source(&self) -> &LogSource {
        &self.source
    }

    pub(crate) fn position(&self) -> u64 {
        self.position
    }

    pub fn metadata(&self) -> LogMetadata {
        self.state.lock().metadata.clone()
    }

    pub fn status(&self) -> SourceStatus {
        self.state.lock().status.clone()
    }

    /// Appends one line and notifies current subscribers.
    ///
    /// Returns `None` if the log has been untracked.
    pub fn append(&self, text: impl Into<String>) -> Option<LogLine> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        let line = state.buffer.push(text.into());
        self.publish(LogEvent::Line(line.clone()));
        Some(line)
    }

    /// Point-in-time copy of the most recent `max_lines` lines, or all of
    /// them when `None`.
    pub fn snapshot(&self, max_lines: Option<usize>) -> Vec<LogLine> {
        let state = self.state.lock();
        match max_lines {
            Some(n) => state.buffer.tail(n),
            None => state.buffer.iter().cloned().collect(),
        }
    }

    /// Appends matching lines to `hits` until it holds `limit` entries.
    ///
    /// Returns `true` if a further match had to be left out.
    pub(crate) fn search_into(
        &self,
        matcher: &LineMatcher,
        limit: usize,
        hits: &mut Vec<SearchHit>,
    ) -> bool {
        let state = self.state.lock();
        for line in state.buffer.iter() {
            if !matcher.is_match(&line.text) {
                continue;
            }
            if hits.len() >= limit {
                return true;
            }
            hits.push(SearchHit {
                log: self.id.clone(),
                friendly_id: state.metadata.friendly_id.clone(),
                seq: line.seq,
                text: line.text.clone(),
            });
        }
        false
    }

    pub fn summary(&self) -> LogSummary {
        let state = self.state.lock();
        LogSummary {
            id: self.id.clone(),
            source: self.source.clone(),
            friendly_id: state.metadata.friendly_id.clone(),
            description: state.metadata.description.clone(),
            status: state.status.clone(),
            resolved_path: state.resolved_path.clone(),
            line_count: state.buffer.len(),
            total_lines: state.buffer.total_received(),
            subscribers: state.subscribers.len(),
            candidates: state.candidates.len(),
            tracked_at: self.tracked_at,
        }
    }

    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let (_, subscription) = self.subscribe_with_backlog(0);
        subscription
    }

    /// Captures up to `backlog` buffered lines and registers a subscriber in
    /// one step, so no line is both in the backlog and delivered, and none
    /// falls between the two.
    pub fn subscribe_with_backlog(self: &Arc<Self>, backlog: usize) -> (Vec<LogLine>, Subscription) {
        let mut state = self.state.lock();
        let lines = if backlog == 0 {
            Vec::new()
        } else {
            state.buffer.tail(backlog)
        };
        let id = SubscriberId(self.next_subscriber.fetch_add(1, Ordering::Relaxed));
        let receiver = self.events.subscribe();
        if !state.closed {
            state.subscribers.insert(id, Utc::now());
        }
        debug!(log = %self.id, subscriber = %id, backlog = lines.len(), "Subscriber added");

        let subscription = Subscription::new(
            id,
            self.id.clone(),
            receiver,
            Arc::downgrade(self),
            state.closed,
        );
        (lines, subscription)
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    pub(crate) fn remove_subscriber(&self, id: SubscriberId) {
        if self.state.lock().subscribers.remove(&id).is_some() {
            debug!(log = %self.id, subscriber = %id, "Subscriber removed");
        }
    }

    pub(crate) fn set_metadata(&self, metadata: LogMetadata) {
        self.state.lock().metadata = metadata;
    }

    /// Drops buffered lines. Sequence numbering continues.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.buffer.clear();
        self.publish(LogEvent::Cleared);
    }

    /// Marks the log untracked and tells subscribers. Later deltas are ignored.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.subscribers.clear();
        self.publish(LogEvent::Removed);
    }

    fn publish(&self, event: LogEvent) {
        // Err only means nobody is subscribed.
        let _ = self.events.send(event);
    }
}

impl DeltaSink for TrackedLog {
    fn apply(&self, delta: Delta) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        match delta {
            Delta::Lines(lines) => {
                for text in lines {
                    let line = state.buffer.push(text);
                    self.publish(LogEvent::Line(line));
                }
            }
            Delta::Status(status) => {
                if state.status != status {
                    info!(log = %self.id, status = %status, "Source status changed");
                    state.status = status.clone();
                    self.publish(LogEvent::Status(status));
                }
            }
            Delta::SourceChanged { from, to } => {
                state.resolved_path = to.clone();
                self.publish(LogEvent::SourceChanged { from, to });
            }
            Delta::Rotated(reason) => {
                info!(log = %self.id, reason = %reason, "Source rotated");
                self.publish(LogEvent::Rotated(reason));
            }
            Delta::Candidates(candidates) => {
                state.candidates = candidates;
            }
        }
    }
}
