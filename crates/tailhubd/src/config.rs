//! Daemon configuration.
//!
//! Loaded from TOML, then overridden by `TAILHUB_*` environment variables.
//! Every section is optional; a missing file means defaults.
//!
//! ```toml
//! [daemon]
//! socket_path = "/tmp/tailhub.sock"
//! log_format = "json"
//!
//! [registry]
//! buffer_lines = 20000
//!
//! [monitor]
//! resync_interval_ms = 500
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use tailhub_core::DEFAULT_BUFFER_LINES;

/// Default socket path
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/tailhub.sock";

/// Environment variable names
pub const ENV_SOCKET: &str = "TAILHUB_SOCKET";
pub const ENV_SESSION_FILE: &str = "TAILHUB_SESSION_FILE";
pub const ENV_BUFFER_LINES: &str = "TAILHUB_BUFFER_LINES";
pub const ENV_LOG_FORMAT: &str = "TAILHUB_LOG_FORMAT";

/// Returns `<state dir>/tailhub`, falling back to `/tmp/tailhub`.
pub fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("tailhub")
}

// ============================================================================
// Sections
// ============================================================================

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub daemon: DaemonSection,
    pub registry: RegistryConfig,
    pub monitor: MonitorConfig,
}

/// Process-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSection {
    pub socket_path: PathBuf,

    /// Where tracked logs are remembered between runs.
    /// `None` means `<state dir>/tailhub/session.json`.
    pub session_file: Option<PathBuf>,

    pub log_format: LogFormat,

    /// Save the session file whenever the tracked set changes.
    pub autosave: bool,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            session_file: None,
            log_format: LogFormat::Text,
            autosave: true,
        }
    }
}

/// Output format of the daemon's own logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Invalid(format!(
                "log format must be 'text' or 'json', got '{other}'"
            ))),
        }
    }
}

/// Registry limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Lines kept per log.
    pub buffer_lines: usize,

    /// Undelivered events a subscriber may fall behind before it starts
    /// missing the oldest ones.
    pub subscriber_queue: usize,

    /// How long a socket request waits for the registry.
    pub query_timeout_ms: u64,

    pub max_logs: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            buffer_lines: DEFAULT_BUFFER_LINES,
            subscriber_queue: 1024,
            query_timeout_ms: 5_000,
            max_logs: 256,
        }
    }
}

impl RegistryConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

/// File monitor tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Fallback re-check of file state when no notification arrives.
    pub resync_interval_ms: u64,

    /// Re-evaluation period of wildcard patterns.
    pub rescan_interval_ms: u64,

    /// Lines replayed from a file that already exists when tracking starts.
    pub initial_lines: usize,

    /// Bytes read per chunk.
    pub max_read_bytes: usize,

    /// Longer unterminated runs are emitted as a line of their own.
    pub max_line_bytes: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            resync_interval_ms: 1_000,
            rescan_interval_ms: 2_000,
            initial_lines: 200,
            max_read_bytes: 1_048_576,
            max_line_bytes: 1_048_576,
        }
    }
}

impl MonitorConfig {
    pub fn resync_interval(&self) -> Duration {
        Duration::from_millis(self.resync_interval_ms)
    }

    pub fn rescan_interval(&self) -> Duration {
        Duration::from_millis(self.rescan_interval_ms)
    }
}

// ============================================================================
// Loading
// ============================================================================

impl DaemonConfig {
    /// `<config dir>/tailhub/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("tailhub").join("config.toml"))
    }

    /// Loads configuration from `path`, or from the default location.
    ///
    /// An explicit path must exist. The default path is optional.
    /// Environment overrides are applied last, then the result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(default) if default.exists() => Self::from_file(&default)?,
                _ => Self::default(),
            },
        };
        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies `TAILHUB_*` overrides from an environment snapshot.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            match key.as_str() {
                ENV_SOCKET => self.daemon.socket_path = PathBuf::from(value),
                ENV_SESSION_FILE => self.daemon.session_file = Some(PathBuf::from(value)),
                ENV_BUFFER_LINES => {
                    self.registry.buffer_lines = value.trim().parse().map_err(|_| {
                        ConfigError::Invalid(format!("{ENV_BUFFER_LINES} must be a number, got '{value}'"))
                    })?;
                }
                ENV_LOG_FORMAT => self.daemon.log_format = value.parse()?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Rejects values that would make the daemon spin or drop everything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.registry.buffer_lines, "registry.buffer_lines"),
            (self.registry.subscriber_queue, "registry.subscriber_queue"),
            (self.registry.max_logs, "registry.max_logs"),
            (self.monitor.max_read_bytes, "monitor.max_read_bytes"),
            (self.monitor.max_line_bytes, "monitor.max_line_bytes"),
        ];
        if let Some((_, name)) = checks.iter().find(|(value, _)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
        }

        let intervals = [
            (self.registry.query_timeout_ms, "registry.query_timeout_ms"),
            (self.monitor.resync_interval_ms, "monitor.resync_interval_ms"),
            (self.monitor.rescan_interval_ms, "monitor.rescan_interval_ms"),
        ];
        if let Some((_, name)) = intervals.iter().find(|(value, _)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
        }

        Ok(())
    }

    /// Resolved session file location.
    pub fn session_file(&self) -> PathBuf {
        self.daemon
            .session_file
            .clone()
            .unwrap_or_else(|| state_dir().join("session.json"))
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
