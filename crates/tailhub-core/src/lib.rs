//! tailhub Core - Shared types for live log tailing
//!
//! This crate provides the domain types shared between
//! the daemon (tailhubd) and the client (tailhub).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod buffer;
pub mod error;
pub mod search;
pub mod source;
pub mod status;
pub mod view;

// Re-exports for convenience
pub use buffer::{LineBuffer, LogLine, DEFAULT_BUFFER_LINES};
pub use error::{DomainError, DomainResult};
pub use search::{LineMatcher, SearchHit, SearchQuery, SearchResults, DEFAULT_SEARCH_LIMIT};
pub use source::{LogId, LogMetadata, LogSource};
pub use status::{RotationReason, SourceStatus};
pub use view::LogSummary;
