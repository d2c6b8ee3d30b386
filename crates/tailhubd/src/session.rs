//! Session persistence: which logs were tracked, across daemon restarts.
//!
//! The session file is a small JSON document:
//!
//! ```json
//! {
//!   "version": 1,
//!   "logs": [
//!     { "source": { "kind": "path", "value": "/var/log/app.log" }, "friendly_id": "app" },
//!     { "source": { "kind": "pattern", "value": "/var/log/api-*.log" }, "description": "API" }
//!   ]
//! }
//! ```
//!
//! Only identities and metadata are stored. Buffers are rebuilt by the
//! monitors on restore.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tailhub_core::{LogMetadata, LogSource, LogSummary};

use crate::registry::{RegistryError, RegistryHandle};

/// Current session file format.
pub const SESSION_VERSION: u32 = 1;

/// Quiet period before an autosave, so bursts of changes write once.
const AUTOSAVE_DEBOUNCE: Duration = Duration::from_millis(200);

/// One remembered log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEntry {
    pub source: LogSource,
    #[serde(flatten)]
    pub metadata: LogMetadata,
}

/// The persisted set of tracked logs, in tracking order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFile {
    pub version: u32,
    #[serde(default)]
    pub logs: Vec<SessionEntry>,
}

impl Default for SessionFile {
    fn default() -> Self {
        Self {
            version: SESSION_VERSION,
            logs: Vec::new(),
        }
    }
}

impl SessionFile {
    pub fn from_summaries(summaries: &[LogSummary]) -> Self {
        Self {
            version: SESSION_VERSION,
            logs: summaries
                .iter()
                .map(|s| SessionEntry {
                    source: s.source.clone(),
                    metadata: LogMetadata {
                        friendly_id: s.friendly_id.clone(),
                        description: s.description.clone(),
                    },
                })
                .collect(),
        }
    }

    /// Reads a session file. A missing file is an empty session.
    pub fn load(path: &Path) -> Result<Self, SessionError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No session file, starting empty");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(SessionError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let session: Self = serde_json::from_str(&content).map_err(|source| SessionError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if session.version > SESSION_VERSION {
            return Err(SessionError::UnsupportedVersion(session.version));
        }
        Ok(session)
    }

    /// Loads the session for daemon startup.
    ///
    /// A file that cannot be used is renamed to `<path>.bad` and an empty
    /// session is returned, so later saves do not overwrite it. Returns
    /// `None` when the file could not be moved aside either; the caller
    /// must then not save over it.
    pub fn load_or_set_aside(path: &Path) -> Option<Self> {
        let error = match Self::load(path) {
            Ok(session) => return Some(session),
            Err(e) => e,
        };

        let aside = with_suffix(path, ".bad");
        match std::fs::rename(path, &aside) {
            Ok(()) => {
                warn!(
                    error = %error,
                    moved_to = %aside.display(),
                    "Unusable session file moved aside, starting empty"
                );
                Some(Self::default())
            }
            Err(e) => {
                error!(
                    error = %error,
                    rename_error = %e,
                    path = %path.display(),
                    "Unusable session file left in place, session saving disabled"
                );
                None
            }
        }
    }

    /// Writes the session file atomically: temp file, then rename.
    pub fn save(&self, path: &Path) -> Result<(), SessionError> {
        let write_error = |source: io::Error| SessionError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(write_error)?;
            }
        }

        let json = serde_json::to_string_pretty(self).map_err(SessionError::Serialize)?;
        let tmp = with_suffix(path, ".tmp");

        std::fs::write(&tmp, json).map_err(write_error)?;
        std::fs::rename(&tmp, path).map_err(write_error)?;
        Ok(())
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Tracks every entry of a saved session. Entries that fail are logged and
/// skipped. Returns how many logs were restored.
pub async fn restore(handle: &RegistryHandle, session: &SessionFile) -> usize {
    let mut restored = 0;
    for entry in &session.logs {
        let metadata = match LogMetadata::new(
            entry.metadata.friendly_id.clone(),
            entry.metadata.description.clone(),
        ) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(
                    source = %entry.source,
                    error = %e,
                    "Saved id/description rejected, restoring source only"
                );
                LogMetadata::default()
            }
        };

        match handle.track(entry.source.clone(), metadata).await {
            Ok(summary) => {
                debug!(log = %summary.id, "Restored log");
                restored += 1;
            }
            Err(e) => {
                warn!(source = %entry.source, error = %e, "Could not restore log");
            }
        }
    }
    if restored > 0 {
        info!(restored, "Session restored");
    }
    restored
}

/// Saves the registry's current tracked set. Returns the number of entries.
pub async fn save_current(handle: &RegistryHandle, path: &Path) -> Result<usize, SessionError> {
    let logs = handle.list_logs().await?;
    let session = SessionFile::from_summaries(&logs);
    session.save(path)?;
    debug!(path = %path.display(), logs = logs.len(), "Session saved");
    Ok(logs.len())
}

/// Saves the session whenever the tracked set or metadata changes.
pub fn spawn_autosave(
    handle: RegistryHandle,
    path: PathBuf,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    let mut events = handle.watch();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,

                result = events.recv() => {
                    match result {
                        Ok(_) | Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => break,
                    }
                }
            }

            tokio::time::sleep(AUTOSAVE_DEBOUNCE).await;
            while events.try_recv().is_ok() {}

            if let Err(e) = save_current(&handle, &path).await {
                warn!(path = %path.display(), error = %e, "Autosave failed");
            }
        }
        debug!("Autosave task stopped");
    })
}

/// Errors reading or writing the session file.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to read session file {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("Failed to write session file {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("Malformed session file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to serialize session: {0}")]
    Serialize(serde_json::Error),

    #[error("Unsupported session file version {0}")]
    UnsupportedVersion(u32),

    #[error("Registry unavailable: {0}")]
    Registry(#[from] RegistryError),
}
