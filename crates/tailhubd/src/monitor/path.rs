//! Path monitor: follows one concrete file.
//!
//! ```text
//!             create                    delete
//!   Absent ──────────────▶ Tailing ─────────────▶ Absent
//!                           │   ▲
//!                           └───┘ truncate / replace (cursor = 0)
//! ```
//!
//! The parent directory is watched rather than the file, so creation and
//! replacement are seen even when the file does not exist yet. A resync on
//! every idle `resync_interval` catches anything the watcher missed.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use tailhub_core::{RotationReason, SourceStatus};

use super::tail::{
    backfill_start, extend_fingerprint, read_chunk, read_fingerprint, FileIdentity, LineAssembler,
};
use super::{build_watcher, Delta, DeltaSink, MonitorError, MonitorHandle, MonitorInput};
use crate::config::MonitorConfig;

/// Reason reported while a followed file is missing.
pub const DELETED_REASON: &str = "file deleted";

/// Starts a monitor thread for `target`.
///
/// If the file exists, its last `initial_lines` lines are emitted first and
/// tailing continues from its end. A file that appears later is read from
/// offset 0. `None` starts detached with status `Unmatched`.
pub fn spawn_path_monitor(
    name: impl Into<String>,
    target: Option<PathBuf>,
    sink: Arc<dyn DeltaSink>,
    config: MonitorConfig,
) -> Result<MonitorHandle, MonitorError> {
    let name = name.into();
    let (sender, receiver) = mpsc::channel();
    let watcher_sender = sender.clone();
    let thread_name = name.clone();

    let thread = std::thread::Builder::new()
        .name(format!("tail:{}", short_name(&name)))
        .spawn(move || {
            let watcher = match build_watcher(watcher_sender) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    warn!(monitor = %thread_name, error = %e, "File watcher unavailable, polling only");
                    None
                }
            };
            PathMonitor::new(thread_name, target, sink, config, watcher).run(receiver);
        })?;

    Ok(MonitorHandle::new(name, sender, thread))
}

fn short_name(name: &str) -> &str {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(name)
}

// ============================================================================
// Monitor State
// ============================================================================

enum TailState {
    Absent,
    Tailing(OpenFile),
}

struct OpenFile {
    file: File,
    identity: FileIdentity,
    cursor: u64,
    /// Last bytes read before `cursor`.
    fingerprint: Vec<u8>,
}

impl OpenFile {
    /// Whether the content before the cursor is no longer what was read,
    /// either because the file shrank or because it was rewritten in place.
    fn rewound(&mut self, len: u64) -> io::Result<bool> {
        if len < self.cursor {
            return Ok(true);
        }
        if self.fingerprint.is_empty() {
            return Ok(false);
        }
        Ok(read_fingerprint(&mut self.file, self.cursor)? != self.fingerprint)
    }
}

struct PathMonitor {
    name: String,
    target: Option<PathBuf>,
    sink: Arc<dyn DeltaSink>,
    config: MonitorConfig,
    state: TailState,
    assembler: LineAssembler,
    /// Last status sent to the sink.
    status: Option<SourceStatus>,
    /// Replay the last lines on the next attach instead of reading from 0.
    backfill: bool,
    watcher: Option<RecommendedWatcher>,
    watched_dir: Option<PathBuf>,
}

impl PathMonitor {
    fn new(
        name: String,
        target: Option<PathBuf>,
        sink: Arc<dyn DeltaSink>,
        config: MonitorConfig,
        watcher: Option<RecommendedWatcher>,
    ) -> Self {
        let assembler = LineAssembler::new(config.max_line_bytes);
        Self {
            name,
            target,
            sink,
            config,
            state: TailState::Absent,
            assembler,
            status: None,
            backfill: true,
            watcher,
            watched_dir: None,
        }
    }

    fn run(mut self, receiver: mpsc::Receiver<MonitorInput>) {
        debug!(monitor = %self.name, target = ?self.target, "Path monitor starting");

        self.ensure_watch();
        if self.target.is_some() {
            self.sync();
        } else {
            self.set_status(SourceStatus::Unmatched);
        }

        let resync = self.config.resync_interval();
        loop {
            match receiver.recv_timeout(resync) {
                Ok(MonitorInput::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(MonitorInput::Redirect { target, backfill }) => self.redirect(target, backfill),
                Ok(MonitorInput::Fs(Ok(event))) => {
                    if self.concerns_target(&event) {
                        self.sync();
                    }
                }
                Ok(MonitorInput::Fs(Err(e))) => {
                    debug!(monitor = %self.name, error = %e, "Watcher error, resyncing");
                    self.sync();
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.ensure_watch();
                    self.sync();
                }
            }
        }

        debug!(monitor = %self.name, "Path monitor stopped");
    }

    fn concerns_target(&self, event: &notify::Event) -> bool {
        let Some(name) = self.target.as_deref().and_then(Path::file_name) else {
            return false;
        };
        event.need_rescan() || event.paths.iter().any(|p| p.file_name() == Some(name))
    }

    /// Watches the target's parent directory. Retried from the resync tick
    /// while the directory does not exist.
    fn ensure_watch(&mut self) {
        let wanted = self
            .target
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf);
        if wanted == self.watched_dir {
            return;
        }
        let Some(watcher) = self.watcher.as_mut() else {
            return;
        };

        if let Some(old) = self.watched_dir.take() {
            let _ = watcher.unwatch(&old);
        }
        if let Some(dir) = wanted {
            match watcher.watch(&dir, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    debug!(monitor = %self.name, dir = %dir.display(), "Watching directory");
                    self.watched_dir = Some(dir);
                }
                Err(e) => {
                    debug!(monitor = %self.name, dir = %dir.display(), error = %e, "Cannot watch directory yet");
                }
            }
        }
    }

    fn redirect(&mut self, target: Option<PathBuf>, backfill: bool) {
        if target == self.target {
            return;
        }
        info!(
            monitor = %self.name,
            from = ?self.target,
            to = ?target,
            "Switching followed file"
        );

        self.detach();
        let from = std::mem::replace(&mut self.target, target.clone());
        self.sink.apply(Delta::SourceChanged { from, to: target });
        self.backfill = backfill;
        self.ensure_watch();

        if self.target.is_some() {
            self.sync();
        } else {
            self.set_status(SourceStatus::Unmatched);
        }
    }

    fn detach(&mut self) {
        self.state = TailState::Absent;
        self.assembler.reset();
    }

    // ========================================================================
    // State Machine
    // ========================================================================

    /// Reconciles internal state with the file on disk and emits whatever
    /// changed.
    fn sync(&mut self) {
        let Some(target) = self.target.clone() else {
            return;
        };

        let meta = match fs::metadata(&target) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.backfill = false;
                self.on_missing();
                return;
            }
            Err(e) => {
                self.backfill = false;
                self.on_error(&target, &e);
                return;
            }
        };

        if !meta.is_file() {
            self.backfill = false;
            self.set_status(SourceStatus::unavailable("not a regular file"));
            return;
        }

        let identity = FileIdentity::of(&meta);
        let replaced = match &self.state {
            TailState::Absent => None,
            TailState::Tailing(open) => Some(open.identity != identity),
        };
        let Some(replaced) = replaced else {
            self.attach(&target);
            return;
        };

        if replaced {
            // finish what was written to the old file before it was swapped out
            if let Err(e) = self.read_appended() {
                debug!(monitor = %self.name, error = %e, "Could not drain replaced file");
            }
            info!(monitor = %self.name, path = %target.display(), "File replaced, reading from start");
            self.detach();
            self.sink.apply(Delta::Rotated(RotationReason::Replaced));
            self.attach(&target);
            return;
        }

        if let TailState::Tailing(open) = &mut self.state {
            let rewound = match open.rewound(meta.len()) {
                Ok(rewound) => rewound,
                Err(e) => {
                    self.on_error(&target, &e);
                    return;
                }
            };
            if rewound {
                info!(
                    monitor = %self.name,
                    path = %target.display(),
                    old_cursor = open.cursor,
                    new_size = meta.len(),
                    "File truncated, reading from start"
                );
                open.cursor = 0;
                open.fingerprint.clear();
                self.assembler.reset();
                self.sink.apply(Delta::Rotated(RotationReason::Truncated));
            }
        }

        match self.read_appended() {
            Ok(()) => self.set_status(SourceStatus::Tailing),
            Err(e) => self.on_error(&target, &e),
        }
    }

    /// Opens the target and starts tailing it.
    fn attach(&mut self, target: &Path) {
        let backfill = std::mem::replace(&mut self.backfill, false);

        let opened = File::open(target).and_then(|file| {
            let meta = file.metadata()?;
            Ok((file, meta))
        });
        let (mut file, meta) = match opened {
            Ok(pair) => pair,
            Err(e) => {
                self.on_error(target, &e);
                return;
            }
        };

        let mut cursor = 0;
        if backfill {
            let max_bytes = self.config.max_read_bytes as u64;
            match backfill_start(&mut file, meta.len(), self.config.initial_lines, max_bytes) {
                Ok((start, mid_line)) => {
                    cursor = start;
                    if mid_line {
                        self.assembler.skip_to_newline();
                    }
                }
                Err(e) => {
                    debug!(monitor = %self.name, error = %e, "Backfill failed, starting at end");
                    cursor = meta.len();
                }
            }
        }

        let fingerprint = match read_fingerprint(&mut file, cursor) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.on_error(target, &e);
                return;
            }
        };

        debug!(
            monitor = %self.name,
            path = %target.display(),
            cursor,
            "Attached to file"
        );
        self.state = TailState::Tailing(OpenFile {
            file,
            identity: FileIdentity::of(&meta),
            cursor,
            fingerprint,
        });

        match self.read_appended() {
            Ok(()) => self.set_status(SourceStatus::Tailing),
            Err(e) => self.on_error(target, &e),
        }
    }

    /// Reads everything appended since the cursor and emits complete lines.
    fn read_appended(&mut self) -> io::Result<()> {
        let TailState::Tailing(open) = &mut self.state else {
            return Ok(());
        };
        let end = open.file.metadata()?.len();
        let max_bytes = self.config.max_read_bytes;

        while open.cursor < end {
            let bytes = read_chunk(&mut open.file, open.cursor, max_bytes)?;
            if bytes.is_empty() {
                break;
            }
            open.cursor += bytes.len() as u64;
            extend_fingerprint(&mut open.fingerprint, &bytes);

            let lines = self.assembler.push(&bytes);
            if !lines.is_empty() {
                self.sink.apply(Delta::Lines(lines));
            }
        }
        Ok(())
    }

    fn on_missing(&mut self) {
        match self.state {
            TailState::Tailing(_) => {
                info!(monitor = %self.name, "File deleted, waiting for it to reappear");
                self.detach();
                self.set_status(SourceStatus::unavailable(DELETED_REASON));
            }
            TailState::Absent => {
                let reported = matches!(
                    self.status,
                    Some(SourceStatus::Waiting) | Some(SourceStatus::Unavailable { .. })
                );
                if !reported {
                    self.set_status(SourceStatus::Waiting);
                }
            }
        }
    }

    fn on_error(&mut self, target: &Path, error: &io::Error) {
        if !matches!(self.status, Some(SourceStatus::Unavailable { .. })) {
            warn!(
                monitor = %self.name,
                path = %target.display(),
                error = %error,
                "Source unavailable, will retry"
            );
        }
        self.set_status(SourceStatus::unavailable(error.to_string()));
    }

    fn set_status(&mut self, status: SourceStatus) {
        if self.status.as_ref() == Some(&status) {
            return;
        }
        self.status = Some(status.clone());
        self.sink.apply(Delta::Status(status));
    }
}
