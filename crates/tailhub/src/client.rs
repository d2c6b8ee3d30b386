//! Daemon connection client.
//!
//! `DaemonClient` owns one socket connection. Requests are answered in
//! order; stream events for subscribed logs can arrive in between and are
//! queued until [`DaemonClient::next_event`] asks for them.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::collections::VecDeque;
use std::path::Path;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tracing::{debug, info};

use tailhub_core::{LogId, LogLine, LogSummary, SearchQuery, SearchResults};
use tailhub_protocol::{ClientMessage, DaemonMessage, MessageType, ProtocolVersion};

use crate::error::{ClientError, Result};

/// A connected, handshaken client.
pub struct DaemonClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,

    /// Stream events read while waiting for a response
    pending: VecDeque<DaemonMessage>,

    client_id: String,
    next_ping: u64,
}

impl DaemonClient {
    /// Connects to the daemon socket and performs the version handshake.
    ///
    /// # Errors
    ///
    /// - `ClientError::DaemonConnection` if the socket is missing or refuses
    /// - `ClientError::VersionMismatch` if the daemon speaks another major version
    pub async fn connect(socket_path: &Path) -> Result<Self> {
        if !socket_path.exists() {
            return Err(ClientError::DaemonConnection(format!(
                "socket {} not found (is tailhubd running?)",
                socket_path.display()
            )));
        }

        let stream = UnixStream::connect(socket_path).await.map_err(|e| {
            ClientError::DaemonConnection(format!("{}: {e}", socket_path.display()))
        })?;
        let (reader, writer) = stream.into_split();

        let mut client = Self {
            reader: BufReader::new(reader),
            writer,
            pending: VecDeque::new(),
            client_id: String::new(),
            next_ping: 1,
        };
        client.handshake().await?;
        Ok(client)
    }

    async fn handshake(&mut self) -> Result<()> {
        self.send(&ClientMessage::connect(None)).await?;

        match self.read().await? {
            DaemonMessage::Connected {
                protocol_version,
                client_id,
            } => {
                if !ProtocolVersion::CURRENT.is_compatible_with(&protocol_version) {
                    return Err(ClientError::VersionMismatch {
                        client_version: ProtocolVersion::CURRENT.to_string(),
                        daemon_version: protocol_version.to_string(),
                    });
                }
                info!(client_id, protocol_version = %protocol_version, "Handshake complete");
                self.client_id = client_id;
                Ok(())
            }
            DaemonMessage::Rejected {
                protocol_version, ..
            } => Err(ClientError::VersionMismatch {
                client_version: ProtocolVersion::CURRENT.to_string(),
                daemon_version: protocol_version.to_string(),
            }),
            other => Err(unexpected(other)),
        }
    }

    /// Identifier assigned by the daemon.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    // ------------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------------

    pub async fn list_logs(&mut self) -> Result<Vec<LogSummary>> {
        match self.request(ClientMessage::list_logs()).await? {
            DaemonMessage::LogList { logs } => Ok(logs),
            other => Err(unexpected(other)),
        }
    }

    /// Most recent `max_lines` lines of a log (the whole buffer when `None`).
    pub async fn read_log(
        &mut self,
        log: &str,
        max_lines: Option<usize>,
    ) -> Result<(LogId, Vec<LogLine>)> {
        match self.request(ClientMessage::read_log(log, max_lines)).await? {
            DaemonMessage::Lines { log, lines } => Ok((log, lines)),
            other => Err(unexpected(other)),
        }
    }

    /// Searches one log, or every log when `log` is `None`.
    pub async fn search(&mut self, query: SearchQuery, log: Option<String>) -> Result<SearchResults> {
        let msg = ClientMessage::new(MessageType::Search {
            pattern: query.pattern,
            case_sensitive: query.case_sensitive,
            regex: query.regex,
            log,
            limit: query.limit,
        });
        match self.request(msg).await? {
            DaemonMessage::SearchResults { hits, truncated } => Ok(SearchResults { hits, truncated }),
            other => Err(unexpected(other)),
        }
    }

    /// Tracks an absolute path or pattern.
    pub async fn track(
        &mut self,
        source: &str,
        friendly_id: Option<String>,
        description: Option<String>,
    ) -> Result<LogSummary> {
        match self
            .request(ClientMessage::track(source, friendly_id, description))
            .await?
        {
            DaemonMessage::Tracked { log } => Ok(*log),
            other => Err(unexpected(other)),
        }
    }

    /// Returns whether the log was tracked.
    pub async fn untrack(&mut self, log: &str) -> Result<bool> {
        match self.request(ClientMessage::untrack(log)).await? {
            DaemonMessage::Untracked { existed, .. } => Ok(existed),
            other => Err(unexpected(other)),
        }
    }

    pub async fn set_metadata(
        &mut self,
        log: &str,
        friendly_id: Option<String>,
        description: Option<String>,
    ) -> Result<LogSummary> {
        match self
            .request(ClientMessage::set_metadata(log, friendly_id, description))
            .await?
        {
            DaemonMessage::Updated { log } => Ok(*log),
            other => Err(unexpected(other)),
        }
    }

    pub async fn clear_log(&mut self, log: &str) -> Result<LogSummary> {
        match self.request(ClientMessage::clear_log(log)).await? {
            DaemonMessage::Updated { log } => Ok(*log),
            other => Err(unexpected(other)),
        }
    }

    /// Subscribes to a log. Returns its id and how many backlog lines follow
    /// as `line` events.
    pub async fn subscribe(&mut self, log: &str, backlog: usize) -> Result<(LogId, usize)> {
        match self.request(ClientMessage::subscribe(log, backlog)).await? {
            DaemonMessage::Subscribed { log, backlog } => Ok((log, backlog)),
            other => Err(unexpected(other)),
        }
    }

    pub async fn unsubscribe(&mut self, log: &str) -> Result<()> {
        match self.request(ClientMessage::unsubscribe(log)).await? {
            DaemonMessage::Unsubscribed { .. } => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Round-trip time of one ping.
    pub async fn ping(&mut self) -> Result<Duration> {
        let seq = self.next_ping;
        self.next_ping = self.next_ping.wrapping_add(1);
        let started = Instant::now();

        match self.request(ClientMessage::ping(seq)).await? {
            DaemonMessage::Pong { seq: got } if got == seq => Ok(started.elapsed()),
            other => Err(unexpected(other)),
        }
    }

    /// Next stream event for a subscribed log.
    pub async fn next_event(&mut self) -> Result<DaemonMessage> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(event);
        }
        self.read().await
    }

    /// Says goodbye and closes the connection.
    pub async fn disconnect(mut self) -> Result<()> {
        self.send(&ClientMessage::disconnect()).await?;
        self.writer.shutdown().await?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Transport
    // ------------------------------------------------------------------------

    /// Sends a request and returns its response, queueing stream events that
    /// arrive first. Daemon errors become `ClientError::Daemon`.
    async fn request(&mut self, msg: ClientMessage) -> Result<DaemonMessage> {
        self.send(&msg).await?;
        loop {
            let response = self.read().await?;
            if response.is_stream_event() {
                self.pending.push_back(response);
                continue;
            }
            return match response {
                DaemonMessage::Error { message, code } => Err(ClientError::Daemon { message, code }),
                other => Ok(other),
            };
        }
    }

    async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let json = serde_json::to_string(message)?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        debug!(message_type = ?message.message, "Sent message to daemon");
        Ok(())
    }

    async fn read(&mut self) -> Result<DaemonMessage> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Err(ClientError::Closed);
        }
        Ok(serde_json::from_str(line.trim())?)
    }
}

fn unexpected(msg: DaemonMessage) -> ClientError {
    ClientError::ProtocolError(format!("Unexpected response: {msg:?}"))
}
