//! File monitors: one worker thread per tracked log.
//!
//! A [`path`] monitor follows one concrete file through creation, appends,
//! truncation, replacement and deletion. A [`wildcard`] resolver owns a glob
//! pattern and re-points an inner path monitor at the newest match.
//!
//! # Architecture
//!
//! ```text
//!   notify watcher ──┐
//!   resync timer  ───┼──▶ MonitorInput ──▶ PathMonitor thread ──▶ Delta ──▶ DeltaSink
//!   redirect/stop ───┘    (std mpsc)        (owns the File)                 (TrackedLog)
//! ```
//!
//! Monitors never return errors to their sink. Read and permission failures
//! become [`SourceStatus::Unavailable`] and are retried on the next event.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - I/O errors are absorbed into status deltas
//! - Watcher failures degrade to timer-driven resync

use std::path::PathBuf;
use std::sync::mpsc;
use std::thread::JoinHandle;

use thiserror::Error;
use tracing::{debug, warn};

use tailhub_core::{RotationReason, SourceStatus};

pub mod path;
pub mod tail;
pub mod wildcard;

pub use path::spawn_path_monitor;
pub use wildcard::{select_active, spawn_wildcard_monitor, Candidate};

// ============================================================================
// Deltas
// ============================================================================

/// A change observed by a monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delta {
    /// Complete lines, in file order.
    Lines(Vec<String>),

    /// Source health changed.
    Status(SourceStatus),

    /// The monitor now follows a different file (wildcard switch).
    SourceChanged {
        from: Option<PathBuf>,
        to: Option<PathBuf>,
    },

    /// Same name, new content; reading restarted at offset 0.
    Rotated(RotationReason),

    /// Current wildcard matches, sorted by path.
    Candidates(Vec<PathBuf>),
}

/// Receiver of monitor output.
///
/// Called from monitor threads. Implementations must not block for long.
pub trait DeltaSink: Send + Sync + 'static {
    fn apply(&self, delta: Delta);
}

/// Inputs multiplexed onto a monitor thread.
#[derive(Debug)]
pub enum MonitorInput {
    Fs(notify::Result<notify::Event>),
    /// Follow another file. `backfill` replays its last lines instead of
    /// reading from the start.
    Redirect {
        target: Option<PathBuf>,
        backfill: bool,
    },
    Stop,
}

// ============================================================================
// Handle
// ============================================================================

/// Owner of a running monitor thread.
///
/// Stopping is synchronous: once [`MonitorHandle::stop`] returns (or the
/// handle is dropped) the thread has exited, its file handle is closed and
/// no further deltas reach the sink.
#[derive(Debug)]
pub struct MonitorHandle {
    name: String,
    sender: mpsc::Sender<MonitorInput>,
    thread: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    pub(crate) fn new(name: String, sender: mpsc::Sender<MonitorInput>, thread: JoinHandle<()>) -> Self {
        Self {
            name,
            sender,
            thread: Some(thread),
        }
    }

    /// Points the monitor at another file.
    pub fn redirect(&self, target: Option<PathBuf>, backfill: bool) {
        if self.sender.send(MonitorInput::Redirect { target, backfill }).is_err() {
            debug!(monitor = %self.name, "Redirect dropped, monitor already stopped");
        }
    }

    /// Stops the thread and waits for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.sender.send(MonitorInput::Stop);
        if thread.join().is_err() {
            warn!(monitor = %self.name, "Monitor thread panicked");
        } else {
            debug!(monitor = %self.name, "Monitor stopped");
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors starting a monitor. Runtime failures never surface here.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Failed to spawn monitor thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Builds a watcher that forwards events onto a monitor's input channel.
pub(crate) fn build_watcher(
    sender: mpsc::Sender<MonitorInput>,
) -> notify::Result<notify::RecommendedWatcher> {
    notify::recommended_watcher(move |event| {
        if sender.send(MonitorInput::Fs(event)).is_err() {
            debug!("Watch event dropped because monitor channel is closed");
        }
    })
}
