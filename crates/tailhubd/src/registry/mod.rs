//! Log registry, subscription fan-out and the cross-domain query bridge.
//!
//! The registry is the single owner of every tracked log's buffer and
//! subscriber set. Monitor threads push deltas straight into each log under
//! that log's own lock. The async socket server never touches that memory
//! directly: it sends commands to a registry actor thread and awaits replies.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐  Delta   ┌──────────────┐  LogEvent   ┌──────────────┐
//! │ Monitor threads│─────────▶│  TrackedLog  │────────────▶│ Subscriptions│
//! └────────────────┘          │(per-log lock)│ (broadcast)  └──────────────┘
//!                             └──────▲───────┘
//!                                    │ owned by
//! ┌────────────────┐ Registry ┌──────┴───────┐
//! │ RegistryHandle │─Command─▶│ RegistryActor│──▶ LogRegistry
//! │ (tokio tasks)  │◀─oneshot─│  (OS thread) │
//! └────────────────┘          └──────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use std::io;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::{MonitorConfig, RegistryConfig};

mod actor;
mod commands;
mod fanout;
mod handle;
mod store;
mod tracked;

pub use actor::RegistryActor;
pub use commands::{LogEvent, RegistryCommand, RegistryError, RegistryEvent};
pub use fanout::{Delivery, SubscriberId, Subscription};
pub use handle::RegistryHandle;
pub use store::LogRegistry;
pub use tracked::TrackedLog;

/// Command channel capacity.
const COMMAND_BUFFER: usize = 100;

/// Creates a registry and starts its bridge actor.
///
/// # Example
///
/// ```no_run
/// use tailhubd::config::{MonitorConfig, RegistryConfig};
/// use tailhubd::registry::spawn_registry;
///
/// #[tokio::main]
/// async fn main() -> std::io::Result<()> {
///     let handle = spawn_registry(RegistryConfig::default(), MonitorConfig::default())?;
///     let logs = handle.list_logs().await;
///     Ok(())
/// }
/// ```
pub fn spawn_registry(
    config: RegistryConfig,
    monitor_config: MonitorConfig,
) -> io::Result<RegistryHandle> {
    spawn_bridge(Arc::new(LogRegistry::new(config, monitor_config)))
}

/// Starts a bridge actor over an existing registry.
///
/// The registry stays usable in-process through the `Arc`; the returned
/// handle is for async callers.
pub fn spawn_bridge(registry: Arc<LogRegistry>) -> io::Result<RegistryHandle> {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let handle = RegistryHandle::new(
        cmd_tx,
        registry.event_sender(),
        registry.config().query_timeout(),
    );

    let actor = RegistryActor::new(cmd_rx, registry);
    std::thread::Builder::new()
        .name("registry".to_string())
        .spawn(move || actor.run())?;

    Ok(handle)
}
