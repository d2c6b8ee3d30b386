//! Wildcard resolver: follows the newest file matching a glob pattern.
//!
//! The resolver thread owns a path monitor and re-points it whenever the
//! active candidate changes. Candidates are re-evaluated on directory
//! membership events (create, remove, rename) under the pattern's literal
//! base directory, and on a fixed rescan timer so that a sibling file that
//! merely grows newer is picked up too.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use notify::event::ModifyKind;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use tailhub_core::SourceStatus;

use super::path::spawn_path_monitor;
use super::{build_watcher, Delta, DeltaSink, MonitorError, MonitorHandle, MonitorInput};
use crate::config::MonitorConfig;

const WILDCARD_CHARS: [char; 3] = ['*', '?', '['];

/// A file matching the pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// Picks the active candidate: newest modification time, ties broken by the
/// lexically smallest path.
pub fn select_active(candidates: &[Candidate]) -> Option<PathBuf> {
    candidates
        .iter()
        .min_by(|a, b| {
            b.modified
                .cmp(&a.modified)
                .then_with(|| a.path.cmp(&b.path))
        })
        .map(|c| c.path.clone())
}

/// Starts a resolver thread for `pattern`.
///
/// The first pick is backfilled like a literal path. Later switches read the
/// new file from the start, since its content postdates tracking.
pub fn spawn_wildcard_monitor(
    name: impl Into<String>,
    pattern: String,
    sink: Arc<dyn DeltaSink>,
    config: MonitorConfig,
) -> Result<MonitorHandle, MonitorError> {
    glob::Pattern::new(&pattern).map_err(|e| MonitorError::InvalidPattern {
        pattern: pattern.clone(),
        reason: e.to_string(),
    })?;

    let name = name.into();
    let (sender, receiver) = mpsc::channel();
    let watcher_sender = sender.clone();
    let thread_name = name.clone();

    let thread = std::thread::Builder::new()
        .name("tail:glob".to_string())
        .spawn(move || {
            let watcher = match build_watcher(watcher_sender) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    warn!(monitor = %thread_name, error = %e, "Directory watcher unavailable, rescanning on timer only");
                    None
                }
            };
            WildcardResolver::new(thread_name, pattern, sink, config, watcher).run(receiver);
        })?;

    Ok(MonitorHandle::new(name, sender, thread))
}

/// Splits a pattern into its wildcard-free leading directory and whether
/// matching must descend below it.
fn literal_base(pattern: &str) -> (PathBuf, bool) {
    let components: Vec<Component<'_>> = Path::new(pattern).components().collect();
    let mut base = PathBuf::new();
    let mut remaining = 0;

    for (i, component) in components.iter().enumerate() {
        let is_last = i + 1 == components.len();
        let wild = component
            .as_os_str()
            .to_string_lossy()
            .contains(WILDCARD_CHARS);
        if wild || is_last {
            remaining = components.len() - i;
            break;
        }
        base.push(component);
    }

    (base, remaining > 1)
}

/// Lists regular files matching `pattern`, sorted by path.
fn scan(pattern: &str) -> Vec<Candidate> {
    let entries = match glob::glob(pattern) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(pattern, error = %e, "Pattern rejected during scan");
            return Vec::new();
        }
    };

    let mut found: Vec<Candidate> = entries
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                debug!(pattern, error = %e, "Skipping unreadable match");
                None
            }
        })
        .filter_map(|path| {
            let meta = fs::metadata(&path).ok()?;
            if !meta.is_file() {
                return None;
            }
            Some(Candidate {
                modified: meta.modified().unwrap_or(UNIX_EPOCH),
                path,
            })
        })
        .collect();
    found.sort_by(|a, b| a.path.cmp(&b.path));
    found
}

// ============================================================================
// Resolver
// ============================================================================

struct WildcardResolver {
    name: String,
    pattern: String,
    base_dir: PathBuf,
    recursive: bool,
    sink: Arc<dyn DeltaSink>,
    config: MonitorConfig,
    candidates: Vec<PathBuf>,
    active: Option<PathBuf>,
    inner: Option<MonitorHandle>,
    watcher: Option<RecommendedWatcher>,
    watching: bool,
}

impl WildcardResolver {
    fn new(
        name: String,
        pattern: String,
        sink: Arc<dyn DeltaSink>,
        config: MonitorConfig,
        watcher: Option<RecommendedWatcher>,
    ) -> Self {
        let (base_dir, recursive) = literal_base(&pattern);
        Self {
            name,
            pattern,
            base_dir,
            recursive,
            sink,
            config,
            candidates: Vec::new(),
            active: None,
            inner: None,
            watcher,
            watching: false,
        }
    }

    fn run(mut self, receiver: mpsc::Receiver<MonitorInput>) {
        debug!(
            monitor = %self.name,
            base = %self.base_dir.display(),
            recursive = self.recursive,
            "Wildcard resolver starting"
        );

        self.ensure_watch();
        let found = scan(&self.pattern);
        self.publish_candidates(&found);
        self.active = select_active(&found);
        if let Some(first) = &self.active {
            info!(monitor = %self.name, path = %first.display(), "Following newest match");
            self.sink.apply(Delta::SourceChanged {
                from: None,
                to: Some(first.clone()),
            });
        }

        match spawn_path_monitor(
            self.name.clone(),
            self.active.clone(),
            Arc::clone(&self.sink),
            self.config.clone(),
        ) {
            Ok(inner) => self.inner = Some(inner),
            Err(e) => {
                warn!(monitor = %self.name, error = %e, "Failed to start file monitor");
                self.sink
                    .apply(Delta::Status(SourceStatus::unavailable(e.to_string())));
                return;
            }
        }

        let rescan = self.config.rescan_interval();
        loop {
            match receiver.recv_timeout(rescan) {
                Ok(MonitorInput::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(MonitorInput::Redirect { .. }) => {}
                Ok(MonitorInput::Fs(Ok(event))) => {
                    if changes_membership(&event) {
                        self.rescan();
                    }
                }
                Ok(MonitorInput::Fs(Err(e))) => {
                    debug!(monitor = %self.name, error = %e, "Watcher error, rescanning");
                    self.rescan();
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.ensure_watch();
                    self.rescan();
                }
            }
        }

        if let Some(inner) = self.inner.take() {
            inner.stop();
        }
        debug!(monitor = %self.name, "Wildcard resolver stopped");
    }

    fn ensure_watch(&mut self) {
        if self.watching {
            return;
        }
        let Some(watcher) = self.watcher.as_mut() else {
            return;
        };
        let mode = if self.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        match watcher.watch(&self.base_dir, mode) {
            Ok(()) => self.watching = true,
            Err(e) => {
                debug!(
                    monitor = %self.name,
                    base = %self.base_dir.display(),
                    error = %e,
                    "Cannot watch pattern base yet"
                );
            }
        }
    }

    fn rescan(&mut self) {
        let found = scan(&self.pattern);
        self.publish_candidates(&found);

        let next = select_active(&found);
        if next == self.active {
            return;
        }

        match &next {
            Some(path) => info!(monitor = %self.name, path = %path.display(), "Newer match, switching"),
            None => info!(monitor = %self.name, "No file matches pattern"),
        }
        if let Some(inner) = &self.inner {
            inner.redirect(next.clone(), false);
        }
        self.active = next;
    }

    fn publish_candidates(&mut self, found: &[Candidate]) {
        let paths: Vec<PathBuf> = found.iter().map(|c| c.path.clone()).collect();
        if paths != self.candidates {
            self.candidates = paths.clone();
            self.sink.apply(Delta::Candidates(paths));
        }
    }
}

fn changes_membership(event: &notify::Event) -> bool {
    event.need_rescan()
        || matches!(
            event.kind,
            EventKind::Create(_)
                | EventKind::Remove(_)
                | EventKind::Modify(ModifyKind::Name(_))
                | EventKind::Any
                | EventKind::Other
        )
}
