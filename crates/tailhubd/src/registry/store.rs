//! The log registry: owner of every tracked log and its monitor.
//!
//! # Locking
//!
//! The registry map sits behind an `RwLock` that is held only for lookups
//! and membership changes. Per-log work (append, snapshot, search,
//! subscribe) takes the log's own mutex after the map lock is released, so
//! one busy log never stalls another.
//!
//! Stopping a monitor joins its thread, which can take up to one read. That
//! always happens after the map lock is dropped.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use tailhub_core::{
    LogId, LogLine, LogMetadata, LogSource, LogSummary, SearchQuery, SearchResults,
};

use super::commands::{RegistryError, RegistryEvent};
use super::fanout::Subscription;
use super::tracked::TrackedLog;
use crate::config::{MonitorConfig, RegistryConfig};
use crate::monitor::{spawn_path_monitor, spawn_wildcard_monitor, MonitorError, MonitorHandle};

/// Capacity of the registry-level event channel.
const REGISTRY_EVENT_BUFFER: usize = 64;

struct Entry {
    log: Arc<TrackedLog>,
    monitor: Option<MonitorHandle>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<LogId, Entry>,
    /// Friendly id to log id.
    aliases: HashMap<String, LogId>,
    next_position: u64,
}

impl Inner {
    /// Friendly ids win over log ids.
    fn resolve(&self, log_ref: &str) -> Option<LogId> {
        if let Some(id) = self.aliases.get(log_ref) {
            return Some(id.clone());
        }
        let id = LogId::new(log_ref);
        self.entries.contains_key(&id).then_some(id)
    }

    fn get(&self, log_ref: &str) -> Option<Arc<TrackedLog>> {
        let id = self.resolve(log_ref)?;
        self.entries.get(&id).map(|e| Arc::clone(&e.log))
    }

    fn check_alias(&self, metadata: &LogMetadata, owner: Option<&LogId>) -> Result<(), RegistryError> {
        let Some(friendly) = metadata.friendly_id.as_deref() else {
            return Ok(());
        };
        match self.aliases.get(friendly) {
            Some(existing) if Some(existing) != owner => {
                Err(RegistryError::DuplicateId(friendly.to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// Synchronous registry surface shared by the bridge actor and in-process
/// consumers.
pub struct LogRegistry {
    inner: RwLock<Inner>,
    events: broadcast::Sender<RegistryEvent>,
    config: RegistryConfig,
    monitor_config: MonitorConfig,
}

impl LogRegistry {
    pub fn new(config: RegistryConfig, monitor_config: MonitorConfig) -> Self {
        let (events, _) = broadcast::channel(REGISTRY_EVENT_BUFFER);
        Self {
            inner: RwLock::new(Inner::default()),
            events,
            config,
            monitor_config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Starts following `source`, or returns the log already following it.
    ///
    /// Tracking an already-tracked source leaves it untouched, including its
    /// metadata.
    ///
    /// # Errors
    /// - `RegistryError::InvalidSource` for a malformed glob
    /// - `RegistryError::DuplicateId` if the friendly id is taken
    /// - `RegistryError::RegistryFull` at `max_logs`
    /// - `RegistryError::MonitorStart` if the monitor thread cannot start
    pub fn track(
        &self,
        source: LogSource,
        metadata: LogMetadata,
    ) -> Result<Arc<TrackedLog>, RegistryError> {
        let id = source.id();
        let mut inner = self.inner.write();

        if let Some(entry) = inner.entries.get(&id) {
            debug!(log = %id, "Already tracked");
            return Ok(Arc::clone(&entry.log));
        }
        if inner.entries.len() >= self.config.max_logs {
            warn!(max = self.config.max_logs, "Registry full, rejecting track");
            return Err(RegistryError::RegistryFull {
                max: self.config.max_logs,
            });
        }
        inner.check_alias(&metadata, None)?;

        let position = inner.next_position;
        let log = TrackedLog::new(
            source.clone(),
            metadata.clone(),
            position,
            self.config.buffer_lines,
            self.config.subscriber_queue,
        );
        let sink = Arc::clone(&log);
        let monitor = match &source {
            LogSource::Path(path) => spawn_path_monitor(
                id.as_str(),
                Some(path.clone()),
                sink,
                self.monitor_config.clone(),
            ),
            LogSource::Pattern(pattern) => spawn_wildcard_monitor(
                id.as_str(),
                pattern.clone(),
                sink,
                self.monitor_config.clone(),
            ),
        }
        .map_err(|e| match e {
            MonitorError::InvalidPattern { .. } => RegistryError::InvalidSource(e.to_string()),
            MonitorError::Spawn(_) => RegistryError::MonitorStart(e.to_string()),
        })?;

        inner.next_position += 1;
        if let Some(friendly) = metadata.friendly_id {
            inner.aliases.insert(friendly, id.clone());
        }
        inner.entries.insert(
            id.clone(),
            Entry {
                log: Arc::clone(&log),
                monitor: Some(monitor),
            },
        );
        drop(inner);

        info!(log = %id, kind = source.kind_label(), "Tracking log");
        self.notify(RegistryEvent::Tracked { log: id });
        Ok(log)
    }

    /// Stops following a log and drops its subscribers.
    ///
    /// The monitor has exited by the time this returns. Returns `false` if
    /// the log was not tracked.
    pub fn untrack(&self, log_ref: &str) -> bool {
        let removed = {
            let mut inner = self.inner.write();
            let Some(id) = inner.resolve(log_ref) else {
                return false;
            };
            inner.aliases.retain(|_, target| *target != id);
            inner.entries.remove(&id)
        };

        let Some(entry) = removed else {
            return false;
        };
        let id = entry.log.id().clone();
        Self::retire(entry);
        info!(log = %id, "Untracked log");
        self.notify(RegistryEvent::Untracked { log: id });
        true
    }

    /// Untracks everything. Returns how many logs were removed.
    pub fn untrack_all(&self) -> usize {
        let entries: Vec<Entry> = {
            let mut inner = self.inner.write();
            inner.aliases.clear();
            inner.entries.drain().map(|(_, entry)| entry).collect()
        };

        let count = entries.len();
        for entry in entries {
            let id = entry.log.id().clone();
            Self::retire(entry);
            self.notify(RegistryEvent::Untracked { log: id });
        }
        if count > 0 {
            info!(count, "Untracked all logs");
        }
        count
    }

    fn retire(mut entry: Entry) {
        if let Some(monitor) = entry.monitor.take() {
            monitor.stop();
        }
        entry.log.close();
    }

    /// Looks up a log by friendly id or log id.
    pub fn get(&self, log_ref: &str) -> Option<Arc<TrackedLog>> {
        self.inner.read().get(log_ref)
    }

    fn require(&self, log_ref: &str) -> Result<Arc<TrackedLog>, RegistryError> {
        self.get(log_ref)
            .ok_or_else(|| RegistryError::NotFound(log_ref.to_string()))
    }

    /// Tracked logs in the order they were added.
    fn logs(&self) -> Vec<Arc<TrackedLog>> {
        let mut logs: Vec<Arc<TrackedLog>> = self
            .inner
            .read()
            .entries
            .values()
            .map(|e| Arc::clone(&e.log))
            .collect();
        logs.sort_by_key(|log| log.position());
        logs
    }

    pub fn list(&self) -> Vec<LogSummary> {
        self.logs().iter().map(|log| log.summary()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Most recent `max_lines` lines of one log (all when `None`).
    pub fn snapshot(
        &self,
        log_ref: &str,
        max_lines: Option<usize>,
    ) -> Result<(LogId, Vec<LogLine>), RegistryError> {
        let log = self.require(log_ref)?;
        Ok((log.id().clone(), log.snapshot(max_lines)))
    }

    /// Scans one log, or every log in insertion order.
    ///
    /// # Errors
    /// - `RegistryError::QueryFailed` for an empty or malformed pattern
    /// - `RegistryError::NotFound` for an unknown log
    pub fn search(
        &self,
        log_ref: Option<&str>,
        query: &SearchQuery,
    ) -> Result<SearchResults, RegistryError> {
        let matcher = query.compile()?;
        let logs = match log_ref {
            Some(log_ref) => vec![self.require(log_ref)?],
            None => self.logs(),
        };

        let limit = query.effective_limit();
        let mut hits = Vec::new();
        let mut truncated = false;
        for log in &logs {
            if log.search_into(&matcher, limit, &mut hits) {
                truncated = true;
                break;
            }
        }
        debug!(pattern = %query.pattern, hits = hits.len(), truncated, "Search complete");
        Ok(SearchResults { hits, truncated })
    }

    pub fn subscribe(&self, log_ref: &str) -> Result<Subscription, RegistryError> {
        Ok(self.require(log_ref)?.subscribe())
    }

    /// Buffered backlog plus a subscription, captured atomically.
    pub fn subscribe_with_backlog(
        &self,
        log_ref: &str,
        backlog: usize,
    ) -> Result<(Vec<LogLine>, Subscription), RegistryError> {
        Ok(self.require(log_ref)?.subscribe_with_backlog(backlog))
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        debug!(log = %subscription.log(), subscriber = %subscription.id(), "Unsubscribing");
        drop(subscription);
    }

    /// Replaces a log's friendly id and description.
    ///
    /// # Errors
    /// - `RegistryError::NotFound` for an unknown log
    /// - `RegistryError::DuplicateId` if another log uses the friendly id
    pub fn set_metadata(
        &self,
        log_ref: &str,
        metadata: LogMetadata,
    ) -> Result<LogSummary, RegistryError> {
        let log = {
            let mut inner = self.inner.write();
            let id = inner
                .resolve(log_ref)
                .ok_or_else(|| RegistryError::NotFound(log_ref.to_string()))?;
            inner.check_alias(&metadata, Some(&id))?;

            inner.aliases.retain(|_, target| *target != id);
            if let Some(friendly) = &metadata.friendly_id {
                inner.aliases.insert(friendly.clone(), id.clone());
            }
            let log = inner
                .entries
                .get(&id)
                .map(|e| Arc::clone(&e.log))
                .ok_or_else(|| RegistryError::NotFound(log_ref.to_string()))?;
            log.set_metadata(metadata);
            log
        };

        info!(log = %log.id(), "Metadata updated");
        self.notify(RegistryEvent::MetadataChanged {
            log: log.id().clone(),
        });
        Ok(log.summary())
    }

    pub fn clear(&self, log_ref: &str) -> Result<LogSummary, RegistryError> {
        let log = self.require(log_ref)?;
        log.clear();
        info!(log = %log.id(), "Buffer cleared");
        Ok(log.summary())
    }

    /// Receiver of tracked-set changes.
    pub fn watch(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<RegistryEvent> {
        self.events.clone()
    }

    fn notify(&self, event: RegistryEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn registry() -> LogRegistry {
        registry_with(RegistryConfig::default())
    }

    fn registry_with(config: RegistryConfig) -> LogRegistry {
        let monitor = MonitorConfig {
            resync_interval_ms: 20,
            rescan_interval_ms: 30,
            ..MonitorConfig::default()
        };
        LogRegistry::new(config, monitor)
    }

    fn missing(dir: &tempfile::TempDir, name: &str) -> LogSource {
        LogSource::Path(dir.path().join(name))
    }

    fn named(friendly: &str) -> LogMetadata {
        LogMetadata::new(Some(friendly.to_string()), None).unwrap()
    }

    #[test]
    fn test_track_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry();

        let first = registry.track(missing(&dir, "a.log"), named("a")).unwrap();
        let second = registry
            .track(missing(&dir, "a.log"), LogMetadata::default())
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
        assert_eq!(second.metadata().friendly_id.as_deref(), Some("a"));
    }

    #[test]
    fn test_friendly_id_resolves_before_log_id() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry();
        let log = registry.track(missing(&dir, "a.log"), named("app")).unwrap();

        assert!(registry.get("app").is_some());
        assert!(registry.get(log.id().as_str()).is_some());
        assert!(registry.get("nope").is_none());
    }

    #[test]
    fn test_duplicate_friendly_id_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry();
        registry.track(missing(&dir, "a.log"), named("app")).unwrap();

        let err = registry
            .track(missing(&dir, "b.log"), named("app"))
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateId("app".to_string()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_full() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_with(RegistryConfig {
            max_logs: 1,
            ..RegistryConfig::default()
        });
        registry
            .track(missing(&dir, "a.log"), LogMetadata::default())
            .unwrap();
        let err = registry
            .track(missing(&dir, "b.log"), LogMetadata::default())
            .unwrap_err();
        assert_eq!(err, RegistryError::RegistryFull { max: 1 });
    }

    #[test]
    fn test_invalid_pattern_is_invalid_source() {
        let registry = registry();
        let err = registry
            .track(
                LogSource::Pattern("/tmp/[".to_string()),
                LogMetadata::default(),
            )
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidSource(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_untrack_is_quiet_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry();
        registry.track(missing(&dir, "a.log"), named("a")).unwrap();

        assert!(registry.untrack("a"));
        assert!(!registry.untrack("a"));
        assert!(registry.get("a").is_none());
    }

    #[test]
    fn test_untrack_ends_subscriptions() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry();
        registry.track(missing(&dir, "a.log"), named("a")).unwrap();
        let mut sub = registry.subscribe("a").unwrap();

        registry.untrack("a");

        let mut saw_removed = false;
        while let Some(delivery) = sub.try_recv() {
            if delivery == crate::registry::Delivery::Event(crate::registry::LogEvent::Removed) {
                saw_removed = true;
            }
        }
        assert!(saw_removed);
    }

    #[test]
    fn test_list_keeps_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry();
        for name in ["c.log", "a.log", "b.log"] {
            registry
                .track(missing(&dir, name), LogMetadata::default())
                .unwrap();
        }
        let names: Vec<PathBuf> = registry
            .list()
            .into_iter()
            .filter_map(|s| s.resolved_path)
            .map(|p| PathBuf::from(p.file_name().unwrap()))
            .collect();
        assert_eq!(
            names,
            [PathBuf::from("c.log"), PathBuf::from("a.log"), PathBuf::from("b.log")]
        );
    }

    #[test]
    fn test_search_across_logs() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry();
        let a = registry.track(missing(&dir, "a.log"), named("a")).unwrap();
        let b = registry.track(missing(&dir, "b.log"), named("b")).unwrap();
        a.append("GET /health 200");
        a.append("GET /api 500");
        b.append("worker error 500");

        let results = registry
            .search(None, &SearchQuery::literal("500"))
            .unwrap();
        let found: Vec<(Option<&str>, u64)> = results
            .hits
            .iter()
            .map(|h| (h.friendly_id.as_deref(), h.seq))
            .collect();
        assert_eq!(found, [(Some("a"), 2), (Some("b"), 1)]);
        assert!(!results.truncated);

        let limited = registry
            .search(None, &SearchQuery::literal("500").limit(1))
            .unwrap();
        assert_eq!(limited.hits.len(), 1);
        assert!(limited.truncated);
    }

    #[test]
    fn test_search_errors() {
        let registry = registry();
        assert!(matches!(
            registry.search(None, &SearchQuery::literal("")),
            Err(RegistryError::QueryFailed(_))
        ));
        assert!(matches!(
            registry.search(Some("ghost"), &SearchQuery::literal("x")),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn test_set_metadata_moves_alias() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry();
        registry.track(missing(&dir, "a.log"), named("old")).unwrap();
        registry.track(missing(&dir, "b.log"), named("taken")).unwrap();

        let summary = registry
            .set_metadata(
                "old",
                LogMetadata::new(Some("new".into()), Some("API server".into())).unwrap(),
            )
            .unwrap();
        assert_eq!(summary.friendly_id.as_deref(), Some("new"));
        assert_eq!(summary.description.as_deref(), Some("API server"));
        assert!(registry.get("old").is_none());
        assert!(registry.get("new").is_some());

        assert_eq!(
            registry.set_metadata("new", named("taken")).unwrap_err(),
            RegistryError::DuplicateId("taken".to_string())
        );
        // keeping its own id is fine
        assert!(registry.set_metadata("new", named("new")).is_ok());
    }

    #[test]
    fn test_watch_reports_membership_changes() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry();
        let mut events = registry.watch();

        let log = registry.track(missing(&dir, "a.log"), named("a")).unwrap();
        registry.set_metadata("a", named("b")).unwrap();
        registry.untrack("b");

        let id = log.id().clone();
        assert_eq!(events.try_recv().unwrap(), RegistryEvent::Tracked { log: id.clone() });
        assert_eq!(
            events.try_recv().unwrap(),
            RegistryEvent::MetadataChanged { log: id.clone() }
        );
        assert_eq!(events.try_recv().unwrap(), RegistryEvent::Untracked { log: id });
    }

    #[test]
    fn test_untrack_all() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry();
        registry.track(missing(&dir, "a.log"), named("a")).unwrap();
        registry.track(missing(&dir, "b.log"), named("b")).unwrap();

        assert_eq!(registry.untrack_all(), 2);
        assert!(registry.is_empty());
        assert!(registry.get("a").is_none());
    }
}
