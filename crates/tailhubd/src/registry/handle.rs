//! Client interface for interacting with the RegistryActor.
//!
//! The `RegistryHandle` provides a cheap-to-clone interface for sending commands
//! to the registry actor from async code. Every call hands a command across the
//! thread boundary and awaits the reply, so the calling runtime keeps serving
//! other connections while the actor works.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `RegistryError::ChannelClosed`
//! - Slow replies are mapped to `RegistryError::Timeout`

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};

use tailhub_core::{LogId, LogLine, LogMetadata, LogSource, LogSummary, SearchQuery, SearchResults};

use super::commands::{RegistryCommand, RegistryError, RegistryEvent};
use super::fanout::Subscription;

// ============================================================================
// Registry Handle
// ============================================================================

/// Handle for interacting with the registry actor.
///
/// # Usage
///
/// ```ignore
/// let handle = registry_handle.clone();
///
/// let logs = handle.list_logs().await?;
/// let (id, lines) = handle.read_log("api", Some(50)).await?;
/// ```
#[derive(Clone)]
pub struct RegistryHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<RegistryCommand>,

    /// Tracked-set change notifications
    event_sender: broadcast::Sender<RegistryEvent>,

    /// Upper bound on any single round trip
    timeout: Duration,
}

impl RegistryHandle {
    pub fn new(
        sender: mpsc::Sender<RegistryCommand>,
        event_sender: broadcast::Sender<RegistryEvent>,
        timeout: Duration,
    ) -> Self {
        Self {
            sender,
            event_sender,
            timeout,
        }
    }

    /// Sends a command and waits for its reply.
    ///
    /// A timeout abandons the wait only; a command already queued still runs.
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> Result<T, RegistryError> {
        let (tx, rx) = oneshot::channel();
        let exchange = async {
            self.sender
                .send(build(tx))
                .await
                .map_err(|_| RegistryError::ChannelClosed)?;
            rx.await.map_err(|_| RegistryError::ChannelClosed)
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| RegistryError::Timeout {
                ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            })?
    }

    /// Enumerates tracked logs in the order they were added.
    pub async fn list_logs(&self) -> Result<Vec<LogSummary>, RegistryError> {
        self.request(|respond_to| RegistryCommand::ListLogs { respond_to })
            .await
    }

    /// Fetches the most recent `max_lines` lines (all when `None`).
    ///
    /// # Errors
    ///
    /// - `RegistryError::NotFound` if the log is not tracked
    /// - `RegistryError::Timeout` / `RegistryError::ChannelClosed` on bridge failure
    pub async fn read_log(
        &self,
        log: impl Into<String>,
        max_lines: Option<usize>,
    ) -> Result<(LogId, Vec<LogLine>), RegistryError> {
        let log = log.into();
        self.request(|respond_to| RegistryCommand::ReadLog {
            log,
            max_lines,
            respond_to,
        })
        .await?
    }

    /// Searches one log, or all logs when `log` is `None`.
    ///
    /// # Errors
    ///
    /// - `RegistryError::QueryFailed` for an empty or malformed pattern
    /// - `RegistryError::NotFound` if the named log is not tracked
    pub async fn search(
        &self,
        log: Option<String>,
        query: SearchQuery,
    ) -> Result<SearchResults, RegistryError> {
        self.request(|respond_to| RegistryCommand::Search {
            log,
            query,
            respond_to,
        })
        .await?
    }

    /// Starts following a source. Returns the existing log if already tracked.
    pub async fn track(
        &self,
        source: LogSource,
        metadata: LogMetadata,
    ) -> Result<LogSummary, RegistryError> {
        self.request(|respond_to| RegistryCommand::Track {
            source,
            metadata,
            respond_to,
        })
        .await?
    }

    /// Stops following a log. `Ok(false)` if it was not tracked.
    pub async fn untrack(&self, log: impl Into<String>) -> Result<bool, RegistryError> {
        let log = log.into();
        self.request(|respond_to| RegistryCommand::Untrack { log, respond_to })
            .await
    }

    pub async fn set_metadata(
        &self,
        log: impl Into<String>,
        metadata: LogMetadata,
    ) -> Result<LogSummary, RegistryError> {
        let log = log.into();
        self.request(|respond_to| RegistryCommand::SetMetadata {
            log,
            metadata,
            respond_to,
        })
        .await?
    }

    pub async fn clear_log(&self, log: impl Into<String>) -> Result<LogSummary, RegistryError> {
        let log = log.into();
        self.request(|respond_to| RegistryCommand::ClearLog { log, respond_to })
            .await?
    }

    /// Subscribes to a log, returning up to `backlog` buffered lines first.
    pub async fn subscribe(
        &self,
        log: impl Into<String>,
        backlog: usize,
    ) -> Result<(Vec<LogLine>, Subscription), RegistryError> {
        let log = log.into();
        self.request(|respond_to| RegistryCommand::Subscribe {
            log,
            backlog,
            respond_to,
        })
        .await?
    }

    /// Untracks everything and stops the actor.
    pub async fn shutdown(&self) -> Result<(), RegistryError> {
        self.request(|respond_to| RegistryCommand::Shutdown { respond_to })
            .await
    }

    /// Receiver of tracked-set changes.
    pub fn watch(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_sender.subscribe()
    }

    /// Returns true while the actor is accepting commands.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tailhub_core::LogSummary;

    fn create_test_handle() -> (RegistryHandle, mpsc::Receiver<RegistryCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(10);
        let (event_tx, _) = broadcast::channel(10);
        let handle = RegistryHandle::new(cmd_tx, event_tx, Duration::from_millis(200));
        (handle, cmd_rx)
    }

    fn summary(path: &str) -> LogSummary {
        let source = LogSource::Path(PathBuf::from(path));
        LogSummary {
            id: source.id(),
            source,
            friendly_id: None,
            description: None,
            status: Default::default(),
            resolved_path: None,
            line_count: 0,
            total_lines: 0,
            subscribers: 0,
            candidates: 0,
            tracked_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_list_logs_sends_command() {
        let (handle, mut rx) = create_test_handle();

        let cmd_handler = tokio::spawn(async move {
            if let Some(RegistryCommand::ListLogs { respond_to }) = rx.recv().await {
                let _ = respond_to.send(vec![summary("/var/log/a.log")]);
                return true;
            }
            false
        });

        let logs = handle.list_logs().await.unwrap();
        assert_eq!(logs.len(), 1);
        assert!(cmd_handler.await.unwrap());
    }

    #[tokio::test]
    async fn test_read_log_passes_arguments() {
        let (handle, mut rx) = create_test_handle();

        let cmd_handler = tokio::spawn(async move {
            if let Some(RegistryCommand::ReadLog {
                log,
                max_lines,
                respond_to,
            }) = rx.recv().await
            {
                assert_eq!(log, "api");
                assert_eq!(max_lines, Some(5));
                let _ = respond_to.send(Err(RegistryError::NotFound(log)));
                return true;
            }
            false
        });

        let err = handle.read_log("api", Some(5)).await.unwrap_err();
        assert_eq!(err, RegistryError::NotFound("api".to_string()));
        assert!(cmd_handler.await.unwrap());
    }

    #[tokio::test]
    async fn test_search_passes_query() {
        let (handle, mut rx) = create_test_handle();

        let cmd_handler = tokio::spawn(async move {
            if let Some(RegistryCommand::Search {
                log,
                query,
                respond_to,
            }) = rx.recv().await
            {
                assert_eq!(log, None);
                assert_eq!(query.pattern, "timeout");
                assert!(query.regex);
                let _ = respond_to.send(Ok(SearchResults::default()));
                return true;
            }
            false
        });

        let results = handle
            .search(None, SearchQuery::literal("timeout").regex(true))
            .await
            .unwrap();
        assert!(results.hits.is_empty());
        assert!(cmd_handler.await.unwrap());
    }

    #[tokio::test]
    async fn test_channel_closed_error() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        let result = handle.list_logs().await;
        assert_eq!(result.unwrap_err(), RegistryError::ChannelClosed);
        assert!(!handle.is_connected());
    }

    #[tokio::test]
    async fn test_dropped_responder_is_channel_closed() {
        let (handle, mut rx) = create_test_handle();

        tokio::spawn(async move {
            // Drop the responder without answering
            let _ = rx.recv().await;
        });

        let result = handle.untrack("api").await;
        assert_eq!(result.unwrap_err(), RegistryError::ChannelClosed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_query_times_out() {
        let (handle, mut rx) = create_test_handle();

        let holder = tokio::spawn(async move {
            let cmd = rx.recv().await;
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(cmd);
        });

        let result = handle.list_logs().await;
        assert_eq!(result.unwrap_err(), RegistryError::Timeout { ms: 200 });
        holder.abort();
    }

    #[tokio::test]
    async fn test_watch_returns_receiver() {
        let (handle, _rx) = create_test_handle();
        let mut events = handle.watch();
        assert!(events.try_recv().is_err());
    }
}
