//! Registry actor - executes bridge commands against the log registry.
//!
//! The actor runs on a dedicated OS thread rather than a tokio task. Several
//! commands stop monitor threads, which joins them; doing that on a runtime
//! worker would stall unrelated connections.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Response send failures are ignored (the caller gave up or timed out)

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use super::commands::RegistryCommand;
use super::store::LogRegistry;

/// Consumes [`RegistryCommand`]s one at a time.
pub struct RegistryActor {
    receiver: mpsc::Receiver<RegistryCommand>,
    registry: Arc<LogRegistry>,
}

impl RegistryActor {
    pub fn new(receiver: mpsc::Receiver<RegistryCommand>, registry: Arc<LogRegistry>) -> Self {
        Self { receiver, registry }
    }

    /// Runs until a `Shutdown` command arrives or every handle is dropped.
    ///
    /// Must be called from a plain thread, not from inside a runtime.
    pub fn run(mut self) {
        info!("Registry actor starting");

        while let Some(cmd) = self.receiver.blocking_recv() {
            if let RegistryCommand::Shutdown { respond_to } = cmd {
                let removed = self.registry.untrack_all();
                info!(removed, "Registry actor shutting down");
                let _ = respond_to.send(());
                return;
            }
            self.handle_command(cmd);
        }

        let removed = self.registry.untrack_all();
        info!(removed, "Registry actor stopped: all handles dropped");
    }

    fn handle_command(&self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::ListLogs { respond_to } => {
                let _ = respond_to.send(self.registry.list());
            }
            RegistryCommand::ReadLog {
                log,
                max_lines,
                respond_to,
            } => {
                let _ = respond_to.send(self.registry.snapshot(&log, max_lines));
            }
            RegistryCommand::Search {
                log,
                query,
                respond_to,
            } => {
                let _ = respond_to.send(self.registry.search(log.as_deref(), &query));
            }
            RegistryCommand::Track {
                source,
                metadata,
                respond_to,
            } => {
                let result = self
                    .registry
                    .track(source, metadata)
                    .map(|log| log.summary());
                let _ = respond_to.send(result);
            }
            RegistryCommand::Untrack { log, respond_to } => {
                let _ = respond_to.send(self.registry.untrack(&log));
            }
            RegistryCommand::SetMetadata {
                log,
                metadata,
                respond_to,
            } => {
                let _ = respond_to.send(self.registry.set_metadata(&log, metadata));
            }
            RegistryCommand::ClearLog { log, respond_to } => {
                let _ = respond_to.send(self.registry.clear(&log));
            }
            RegistryCommand::Subscribe {
                log,
                backlog,
                respond_to,
            } => {
                let result = self.registry.subscribe_with_backlog(&log, backlog);
                if respond_to.send(result).is_err() {
                    debug!(log = %log, "Subscriber went away before the reply");
                }
            }
            RegistryCommand::Shutdown { respond_to } => {
                let _ = respond_to.send(());
            }
        }
    }
}
