//! Connection handler for individual client connections.
//!
//! Each client connection gets its own `ConnectionHandler` that:
//! - Performs protocol version negotiation
//! - Parses incoming messages
//! - Routes queries to the registry bridge
//! - Streams events for the logs the client subscribed to
//!
//! Every subscribed log gets a forwarder task that drains its
//! [`Subscription`] and writes events through the shared writer, so a slow
//! socket only ever backs up its own subscriptions.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Connection errors are logged and result in graceful disconnect

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tailhub_core::{LogId, LogMetadata, LogSource, LogSummary, SearchQuery};
use tailhub_protocol::{ClientMessage, DaemonMessage, MessageType, ProtocolVersion};

use crate::registry::{Delivery, LogEvent, RegistryError, RegistryHandle, Subscription};

/// Writer half shared between the request loop and forwarder tasks.
pub type SharedWriter = Arc<Mutex<BufWriter<OwnedWriteHalf>>>;

/// Maximum message size (1 MB)
const MAX_MESSAGE_SIZE: usize = 1_048_576;

/// Read timeout for idle connections without subscriptions (5 minutes)
const READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Write timeout (10 seconds)
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Unique identifier for this connection
type ClientId = String;

struct Forwarder {
    /// Name the client subscribed with, so it can unsubscribe by it
    alias: String,
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// Connection handler for a single client.
pub struct ConnectionHandler {
    /// Buffered reader for incoming messages
    reader: BufReader<OwnedReadHalf>,

    /// Buffered writer for outgoing messages (shared with forwarders)
    writer: SharedWriter,

    /// Bridge to the log registry
    registry: RegistryHandle,

    /// Unique client identifier (assigned after handshake)
    client_id: Option<ClientId>,

    /// Active log subscriptions keyed by log id
    forwarders: HashMap<LogId, Forwarder>,

    /// Cancelled when the connection or the server shuts down
    cancel_token: CancellationToken,

    /// Counter for generating client IDs
    connection_number: u64,
}

impl ConnectionHandler {
    /// Creates a new connection handler.
    ///
    /// # Arguments
    ///
    /// * `reader` - Read half of the Unix stream
    /// * `writer` - Write half of the Unix stream
    /// * `registry` - Bridge to the log registry
    /// * `cancel_token` - Server shutdown token (a child token is derived)
    /// * `connection_number` - Unique number for this connection
    pub fn new(
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        registry: RegistryHandle,
        cancel_token: &CancellationToken,
        connection_number: u64,
    ) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: Arc::new(Mutex::new(BufWriter::new(writer))),
            registry,
            client_id: None,
            forwarders: HashMap::new(),
            cancel_token: cancel_token.child_token(),
            connection_number,
        }
    }

    /// Runs the connection handler.
    ///
    /// Performs the handshake then processes messages until the client
    /// disconnects or the server shuts down.
    pub async fn run(mut self) -> Option<ClientId> {
        debug!(connection = self.connection_number, "New client connected");

        match self.handle_handshake().await {
            Ok(()) => {
                info!(client_id = ?self.client_id, "Client handshake completed");
            }
            Err(e) => {
                warn!(
                    connection = self.connection_number,
                    error = %e,
                    "Handshake failed"
                );
                return None;
            }
        }

        if let Err(e) = self.process_messages().await {
            debug!(client_id = ?self.client_id, error = %e, "Connection closed");
        }

        self.shutdown_forwarders().await;
        info!(client_id = ?self.client_id, "Client disconnected");
        self.client_id
    }

    /// Expects a `Connect` message and answers `Connected` or `Rejected`.
    async fn handle_handshake(&mut self) -> Result<(), ConnectionError> {
        let msg = timeout(READ_TIMEOUT, self.read_message())
            .await
            .map_err(|_| ConnectionError::Timeout)??;

        let client_version = msg.protocol_version;
        if !client_version.is_compatible_with(&ProtocolVersion::CURRENT) {
            warn!(
                client_version = %client_version,
                server_version = %ProtocolVersion::CURRENT,
                "Protocol version mismatch"
            );

            self.send_message(DaemonMessage::rejected(&format!(
                "Protocol version {} not compatible with server version {}",
                client_version,
                ProtocolVersion::CURRENT
            )))
            .await?;

            return Err(ConnectionError::VersionMismatch {
                client: client_version,
                server: ProtocolVersion::CURRENT,
            });
        }

        match msg.message {
            MessageType::Connect { client_id } => {
                let assigned_id =
                    client_id.unwrap_or_else(|| format!("client-{}", self.connection_number));
                self.client_id = Some(assigned_id.clone());
                self.send_message(DaemonMessage::connected(assigned_id)).await
            }
            other => {
                self.send_message(DaemonMessage::error(
                    "Expected Connect message for handshake",
                ))
                .await?;

                Err(ConnectionError::UnexpectedMessage(format!("{other:?}")))
            }
        }
    }

    /// Main message processing loop.
    ///
    /// The idle timeout only applies while nothing is subscribed; a client
    /// following a log may stay silent indefinitely.
    async fn process_messages(&mut self) -> Result<(), ConnectionError> {
        let cancel = self.cancel_token.clone();
        loop {
            let idle = self.forwarders.is_empty();
            let next = async {
                if idle {
                    match timeout(READ_TIMEOUT, self.read_message()).await {
                        Ok(result) => result,
                        Err(_) => Err(ConnectionError::Timeout),
                    }
                } else {
                    self.read_message().await
                }
            };

            let result = tokio::select! {
                _ = cancel.cancelled() => None,
                result = next => Some(result),
            };
            let Some(result) = result else {
                debug!(client_id = ?self.client_id, "Server shutting down, closing connection");
                return Ok(());
            };

            let msg = match result {
                Ok(msg) => msg,
                Err(ConnectionError::Eof) => {
                    debug!(client_id = ?self.client_id, "Client sent EOF");
                    return Ok(());
                }
                Err(ConnectionError::ParseError(reason)) => {
                    warn!(client_id = ?self.client_id, error = %reason, "Malformed message");
                    self.send_message(DaemonMessage::error_with_code(
                        &format!("Parse error: {reason}"),
                        "parse_error",
                    ))
                    .await?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            match self.handle_message(msg).await {
                Ok(()) => {}
                Err(ConnectionError::Eof) => return Ok(()),
                Err(e) => {
                    error!(client_id = ?self.client_id, error = %e, "Error handling message");
                    return Err(e);
                }
            }
        }
    }

    /// Handles a single client message.
    async fn handle_message(&mut self, msg: ClientMessage) -> Result<(), ConnectionError> {
        match msg.message {
            MessageType::Connect { .. } => {
                self.send_message(DaemonMessage::error("Already connected"))
                    .await?;
            }

            MessageType::ListLogs => {
                let result = self.registry.list_logs().await;
                self.reply(result, DaemonMessage::log_list).await?;
            }

            MessageType::ReadLog { log, max_lines } => {
                let result = self.registry.read_log(log, max_lines).await;
                self.reply(result, |(id, lines)| DaemonMessage::lines(id, lines))
                    .await?;
            }

            MessageType::Search {
                pattern,
                case_sensitive,
                regex,
                log,
                limit,
            } => {
                let query = SearchQuery {
                    pattern,
                    case_sensitive,
                    regex,
                    limit,
                };
                let result = self.registry.search(log, query).await;
                self.reply(result, |r| DaemonMessage::search_results(r.hits, r.truncated))
                    .await?;
            }

            MessageType::Track {
                source,
                friendly_id,
                description,
            } => {
                let result = self.handle_track(&source, friendly_id, description).await;
                self.reply(result, DaemonMessage::tracked).await?;
            }

            MessageType::Untrack { log } => {
                self.drop_forwarder(&log).await;
                let result = self.registry.untrack(log.clone()).await;
                self.reply(result, |existed| DaemonMessage::Untracked { log, existed })
                    .await?;
            }

            MessageType::SetMetadata {
                log,
                friendly_id,
                description,
            } => {
                let result = match LogMetadata::new(friendly_id, description) {
                    Ok(metadata) => self.registry.set_metadata(log, metadata).await,
                    Err(e) => Err(e.into()),
                };
                self.reply(result, DaemonMessage::updated).await?;
            }

            MessageType::ClearLog { log } => {
                let result = self.registry.clear_log(log).await;
                self.reply(result, DaemonMessage::updated).await?;
            }

            MessageType::Subscribe { log, backlog } => {
                self.handle_subscribe(log, backlog).await?;
            }

            MessageType::Unsubscribe { log } => {
                self.drop_forwarder(&log).await;
                self.send_message(DaemonMessage::Unsubscribed { log }).await?;
            }

            MessageType::Ping { seq } => {
                self.send_message(DaemonMessage::pong(seq)).await?;
            }

            MessageType::Disconnect => {
                debug!(client_id = ?self.client_id, "Client requested disconnect");
                return Err(ConnectionError::Eof);
            }
        }

        Ok(())
    }

    /// Sends either the mapped success message or a coded error.
    async fn reply<T>(
        &self,
        result: Result<T, RegistryError>,
        on_ok: impl FnOnce(T) -> DaemonMessage,
    ) -> Result<(), ConnectionError> {
        match result {
            Ok(value) => self.send_message(on_ok(value)).await,
            Err(e) => self.send_error(&e).await,
        }
    }

    async fn send_error(&self, e: &RegistryError) -> Result<(), ConnectionError> {
        debug!(client_id = ?self.client_id, error = %e, "Request failed");
        self.send_message(DaemonMessage::error_with_code(&e.to_string(), e.code()))
            .await
    }

    /// Tracks a path or pattern. Relative sources are rejected because the
    /// daemon's working directory means nothing to the client.
    async fn handle_track(
        &self,
        source: &str,
        friendly_id: Option<String>,
        description: Option<String>,
    ) -> Result<LogSummary, RegistryError> {
        if !Path::new(source.trim()).is_absolute() {
            return Err(RegistryError::InvalidSource(format!(
                "source must be an absolute path or pattern: {source}"
            )));
        }
        let source = LogSource::from_input(source, Path::new("/"))?;
        let metadata = LogMetadata::new(friendly_id, description)?;
        self.registry.track(source, metadata).await
    }

    /// Subscribes this connection to a log.
    ///
    /// `Subscribed` and the backlog are written before the forwarder starts,
    /// so the client sees them ahead of any live event.
    async fn handle_subscribe(&mut self, log: String, backlog: usize) -> Result<(), ConnectionError> {
        let (lines, subscription) = match self.registry.subscribe(log.clone(), backlog).await {
            Ok(pair) => pair,
            Err(e) => return self.send_error(&e).await,
        };
        let id = subscription.log().clone();

        if let Some(old) = self.forwarders.remove(&id) {
            stop_forwarder(old).await;
        }

        {
            let mut writer = self.writer.lock().await;
            write_locked(
                &mut writer,
                &DaemonMessage::Subscribed {
                    log: id.clone(),
                    backlog: lines.len(),
                },
            )
            .await?;
            for line in lines {
                write_locked(
                    &mut writer,
                    &DaemonMessage::Line {
                        log: id.clone(),
                        line,
                    },
                )
                .await?;
            }
        }

        let token = self.cancel_token.child_token();
        let task = tokio::spawn(forward(
            subscription,
            Arc::clone(&self.writer),
            token.clone(),
        ));
        debug!(client_id = ?self.client_id, log = %id, "Client subscribed");
        self.forwarders.insert(
            id,
            Forwarder {
                alias: log,
                token,
                task,
            },
        );
        Ok(())
    }

    /// Stops the forwarder for `log` (friendly id or log id), if any.
    async fn drop_forwarder(&mut self, log: &str) {
        let key = self
            .forwarders
            .iter()
            .find(|(id, f)| id.as_str() == log || f.alias == log)
            .map(|(id, _)| id.clone());
        if let Some(forwarder) = key.and_then(|id| self.forwarders.remove(&id)) {
            stop_forwarder(forwarder).await;
            debug!(client_id = ?self.client_id, log, "Client unsubscribed");
        }
    }

    async fn shutdown_forwarders(&mut self) {
        self.cancel_token.cancel();
        for (_, forwarder) in self.forwarders.drain() {
            stop_forwarder(forwarder).await;
        }
    }

    /// Reads a single message from the client.
    async fn read_message(&mut self) -> Result<ClientMessage, ConnectionError> {
        let mut line = String::new();

        let bytes_read = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        if bytes_read == 0 {
            return Err(ConnectionError::Eof);
        }

        if line.len() > MAX_MESSAGE_SIZE {
            return Err(ConnectionError::MessageTooLarge {
                size: line.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        let msg: ClientMessage = serde_json::from_str(&line)
            .map_err(|e| ConnectionError::ParseError(e.to_string()))?;

        debug!(
            client_id = ?self.client_id,
            message_type = ?std::mem::discriminant(&msg.message),
            "Received message"
        );

        Ok(msg)
    }

    /// Sends a message to the client.
    async fn send_message(&self, msg: DaemonMessage) -> Result<(), ConnectionError> {
        write_message(&self.writer, &msg).await
    }

    /// Returns the client ID (if connected).
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }
}

async fn stop_forwarder(forwarder: Forwarder) {
    forwarder.token.cancel();
    if let Err(e) = forwarder.task.await {
        warn!(error = %e, "Forwarder task failed");
    }
}

/// Drains a subscription onto the socket until cancelled or the log goes away.
async fn forward(mut subscription: Subscription, writer: SharedWriter, token: CancellationToken) {
    let log = subscription.log().clone();
    loop {
        let delivery = tokio::select! {
            _ = token.cancelled() => break,
            delivery = subscription.recv() => delivery,
        };
        let Some(delivery) = delivery else {
            break;
        };

        let msg = event_message(&log, delivery);
        let last = matches!(msg, DaemonMessage::LogRemoved { .. });
        if let Err(e) = write_message(&writer, &msg).await {
            debug!(log = %log, error = %e, "Stopping forwarder, write failed");
            break;
        }
        if last {
            break;
        }
    }
    debug!(log = %log, missed = subscription.missed(), "Forwarder stopped");
}

/// Converts a subscription delivery into its wire form.
pub fn event_message(log: &LogId, delivery: Delivery) -> DaemonMessage {
    let log = log.clone();
    match delivery {
        Delivery::Missed(count) => DaemonMessage::Missed { log, count },
        Delivery::Event(LogEvent::Line(line)) => DaemonMessage::Line { log, line },
        Delivery::Event(LogEvent::Status(status)) => DaemonMessage::StatusChanged { log, status },
        Delivery::Event(LogEvent::SourceChanged { from, to }) => {
            DaemonMessage::SourceChanged { log, from, to }
        }
        Delivery::Event(LogEvent::Rotated(reason)) => DaemonMessage::Rotated { log, reason },
        Delivery::Event(LogEvent::Cleared) => DaemonMessage::Cleared { log },
        Delivery::Event(LogEvent::Removed) => DaemonMessage::LogRemoved { log },
    }
}

/// Writes one newline-terminated message under the writer lock.
pub async fn write_message(writer: &SharedWriter, msg: &DaemonMessage) -> Result<(), ConnectionError> {
    let mut writer = writer.lock().await;
    write_locked(&mut writer, msg).await
}

async fn write_locked(
    writer: &mut BufWriter<OwnedWriteHalf>,
    msg: &DaemonMessage,
) -> Result<(), ConnectionError> {
    let json =
        serde_json::to_string(msg).map_err(|e| ConnectionError::ParseError(e.to_string()))?;

    match timeout(WRITE_TIMEOUT, async {
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok::<(), std::io::Error>(())
    })
    .await
    {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ConnectionError::Io(e.to_string())),
        Err(_) => Err(ConnectionError::WriteTimeout),
    }
}

/// Errors that can occur during connection handling.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Protocol version mismatch: client {client}, server {server}")]
    VersionMismatch {
        client: ProtocolVersion,
        server: ProtocolVersion,
    },

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed")]
    Eof,

    #[error("Read timeout")]
    Timeout,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tailhub_core::{LogLine, RotationReason, SourceStatus};

    #[test]
    fn test_connection_error_display() {
        let err = ConnectionError::VersionMismatch {
            client: ProtocolVersion::new(2, 0),
            server: ProtocolVersion::new(1, 0),
        };
        assert!(err.to_string().contains("2.0"));
        assert!(err.to_string().contains("1.0"));
    }

    #[test]
    fn test_message_size_error() {
        let err = ConnectionError::MessageTooLarge {
            size: 2_000_000,
            max: MAX_MESSAGE_SIZE,
        };
        assert!(err.to_string().contains("2000000"));
    }

    #[test]
    fn test_event_message_mapping() {
        let log = LogId::new("/var/log/app.log");
        let line = LogLine {
            seq: 3,
            text: "hello".to_string(),
        };

        assert!(matches!(
            event_message(&log, Delivery::Event(LogEvent::Line(line.clone()))),
            DaemonMessage::Line { line: l, .. } if l == line
        ));
        assert!(matches!(
            event_message(&log, Delivery::Missed(7)),
            DaemonMessage::Missed { count: 7, .. }
        ));
        assert!(matches!(
            event_message(&log, Delivery::Event(LogEvent::Status(SourceStatus::Tailing))),
            DaemonMessage::StatusChanged { status: SourceStatus::Tailing, .. }
        ));
        assert!(matches!(
            event_message(
                &log,
                Delivery::Event(LogEvent::SourceChanged {
                    from: None,
                    to: Some(PathBuf::from("/var/log/app-2.log")),
                })
            ),
            DaemonMessage::SourceChanged { from: None, to: Some(_), .. }
        ));
        assert!(matches!(
            event_message(&log, Delivery::Event(LogEvent::Rotated(RotationReason::Replaced))),
            DaemonMessage::Rotated { reason: RotationReason::Replaced, .. }
        ));
        let removed = event_message(&log, Delivery::Event(LogEvent::Removed));
        assert!(matches!(removed, DaemonMessage::LogRemoved { .. }));
        assert!(removed.is_stream_event());
    }
}
