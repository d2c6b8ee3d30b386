//! Search predicates over buffered lines.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::source::LogId;

/// Hits returned when the caller gives no limit.
pub const DEFAULT_SEARCH_LIMIT: usize = 500;

/// Upper bound on compiled regex size, guards against pathological input.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// A text search across one or all logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub pattern: String,

    #[serde(default)]
    pub case_sensitive: bool,

    /// Interpret `pattern` as a regular expression instead of a literal.
    #[serde(default)]
    pub regex: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl SearchQuery {
    /// Case-insensitive literal search with the default limit.
    pub fn literal(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            case_sensitive: false,
            regex: false,
            limit: None,
        }
    }

    pub fn case_sensitive(mut self, yes: bool) -> Self {
        self.case_sensitive = yes;
        self
    }

    pub fn regex(mut self, yes: bool) -> Self {
        self.regex = yes;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Effective hit limit, never zero.
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_SEARCH_LIMIT).max(1)
    }

    /// Compiles the query into a matcher.
    ///
    /// Literal and regex modes share one code path: literals are escaped and
    /// case folding is a builder flag.
    pub fn compile(&self) -> DomainResult<LineMatcher> {
        if self.pattern.is_empty() {
            return Err(DomainError::InvalidQuery {
                reason: "empty pattern".to_string(),
            });
        }

        let source = if self.regex {
            self.pattern.clone()
        } else {
            regex::escape(&self.pattern)
        };

        let regex = RegexBuilder::new(&source)
            .case_insensitive(!self.case_sensitive)
            .size_limit(REGEX_SIZE_LIMIT)
            .build()
            .map_err(|e| DomainError::InvalidQuery {
                reason: e.to_string(),
            })?;

        Ok(LineMatcher { regex })
    }
}

/// Compiled search predicate.
#[derive(Debug, Clone)]
pub struct LineMatcher {
    regex: Regex,
}

impl LineMatcher {
    pub fn is_match(&self, line: &str) -> bool {
        self.regex.is_match(line)
    }
}

/// A matching line and where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub log: LogId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friendly_id: Option<String>,

    /// Line sequence number within the log.
    pub seq: u64,

    pub text: String,
}

/// Ordered hits plus whether the limit cut the scan short.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResults {
    pub hits: Vec<SearchHit>,
    pub truncated: bool,
}
