//! Log identities: what the user asked to follow and how it is keyed.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Characters that turn a user-supplied path into a wildcard pattern.
const WILDCARD_CHARS: [char; 3] = ['*', '?', '['];

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Canonical key of a tracked log.
///
/// The absolute path for literal sources, the absolute pattern text for
/// wildcard groups. Two `track` calls for the same source always produce
/// the same `LogId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogId(String);

impl LogId {
    /// Creates a new LogId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for LogId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for LogId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for LogId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Log Source
// ============================================================================

/// What a tracked log follows.
///
/// Serialized as `{"kind": "path", "value": "/var/log/app.log"}` so session
/// files stay readable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum LogSource {
    /// A single concrete file.
    Path(PathBuf),
    /// A glob pattern; the newest matching file is followed.
    Pattern(String),
}

impl LogSource {
    /// Classifies raw user input.
    ///
    /// Input containing `*`, `?` or `[` becomes a [`LogSource::Pattern`].
    /// Relative input is resolved against `cwd`. `.` components are dropped
    /// but `..` is kept, since the target may not exist yet and symlinks
    /// make lexical `..` removal unsound.
    pub fn from_input(input: &str, cwd: &Path) -> DomainResult<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(DomainError::InvalidSource {
                input: input.to_string(),
                reason: "empty path".to_string(),
            });
        }

        let raw = Path::new(trimmed);
        let absolute = if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            cwd.join(raw)
        };
        let absolute: PathBuf = absolute
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect();

        if absolute.file_name().is_none() {
            return Err(DomainError::InvalidSource {
                input: input.to_string(),
                reason: "path does not name a file".to_string(),
            });
        }

        if trimmed.contains(WILDCARD_CHARS) {
            Ok(Self::Pattern(absolute.to_string_lossy().into_owned()))
        } else {
            Ok(Self::Path(absolute))
        }
    }

    /// Returns the canonical registry key for this source.
    pub fn id(&self) -> LogId {
        match self {
            Self::Path(path) => LogId(path.to_string_lossy().into_owned()),
            Self::Pattern(pattern) => LogId(pattern.clone()),
        }
    }

    /// Returns true for wildcard groups.
    pub fn is_pattern(&self) -> bool {
        matches!(self, Self::Pattern(_))
    }

    /// Short label for list output.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::Path(_) => "file",
            Self::Pattern(_) => "glob",
        }
    }
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{}", path.display()),
            Self::Pattern(pattern) => write!(f, "{pattern}"),
        }
    }
}

// ============================================================================
// Metadata
// ============================================================================

/// User-supplied display metadata for a tracked log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMetadata {
    /// Short unique name usable instead of the full path in lookups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friendly_id: Option<String>,

    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl LogMetadata {
    /// Builds metadata, normalizing blank strings to `None`.
    ///
    /// Friendly ids must not contain whitespace so they stay usable as CLI
    /// arguments.
    pub fn new(friendly_id: Option<String>, description: Option<String>) -> DomainResult<Self> {
        let friendly_id = friendly_id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        if let Some(id) = &friendly_id {
            if id.chars().any(char::is_whitespace) {
                return Err(DomainError::InvalidMetadata {
                    field: "friendly id".to_string(),
                    reason: format!("'{id}' contains whitespace"),
                });
            }
        }
        let description = description
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(Self {
            friendly_id,
            description,
        })
    }

    /// Returns true if neither field is set.
    pub fn is_empty(&self) -> bool {
        self.friendly_id.is_none() && self.description.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_path_is_absolutized() {
        let source = LogSource::from_input("logs/./app.log", Path::new("/srv")).unwrap();
        assert_eq!(source, LogSource::Path(PathBuf::from("/srv/logs/app.log")));
        assert_eq!(source.id().as_str(), "/srv/logs/app.log");
    }

    #[test]
    fn test_wildcards_make_a_pattern() {
        for input in ["/var/log/app-*.log", "/var/log/app-?.log", "/var/log/app-[0-9].log"] {
            let source = LogSource::from_input(input, Path::new("/")).unwrap();
            assert!(source.is_pattern(), "{input} should be a pattern");
            assert_eq!(source.id().as_str(), input);
        }
    }

    #[test]
    fn test_empty_input_rejected() {
        let err = LogSource::from_input("   ", Path::new("/tmp")).unwrap_err();
        assert!(matches!(err, DomainError::InvalidSource { .. }));
    }

    #[test]
    fn test_root_is_not_a_file() {
        assert!(LogSource::from_input("/", Path::new("/")).is_err());
    }

    #[test]
    fn test_source_serde_shape() {
        let source = LogSource::Pattern("/tmp/*.log".to_string());
        let json = serde_json::to_string(&source).unwrap();
        assert_eq!(json, r#"{"kind":"pattern","value":"/tmp/*.log"}"#);
        let back: LogSource = serde_json::from_str(&json).unwrap();
        assert_eq!(back, source);
    }

    #[test]
    fn test_metadata_normalizes_blanks() {
        let meta = LogMetadata::new(Some("  ".to_string()), Some(" web tier ".to_string())).unwrap();
        assert_eq!(meta.friendly_id, None);
        assert_eq!(meta.description.as_deref(), Some("web tier"));
        assert!(!meta.is_empty());
    }

    #[test]
    fn test_metadata_rejects_whitespace_in_id() {
        assert!(LogMetadata::new(Some("my app".to_string()), None).is_err());
    }
}
