//! Error types for conformance probing.
//!
//! Only [`DiscoverError::Unreachable`] and [`DiscoverError::BadStatus`] abort
//! a run. Every other failure mode is carried as data into the report:
//! HTTP status surprises, schema violations, rule violations and unsupported
//! versions all become findings, never control flow across components.

use thiserror::Error;

/// Transport-level failures from the HTTP layer.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("failed to reach {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to build HTTP client: {source}")]
    Client {
        #[source]
        source: reqwest::Error,
    },
}

impl FetchError {
    /// Transient failures are worth retrying; everything else is not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout { .. } | FetchError::Transport { .. }
        )
    }
}

/// Failures while discovering the root document.
///
/// `Unreachable` and `BadStatus` are fatal: without a reachable root there is
/// nothing to probe. The remaining variants mean the root responded but its
/// landing page is not a usable STAC document; the runner turns those into a
/// single FAIL finding and finalizes a well-formed report.
#[derive(Debug, Error)]
pub enum DiscoverError {
    #[error("root URL {url} is unreachable: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("root URL {url} returned status {status}")]
    BadStatus { url: String, status: u16 },

    #[error("root document is not JSON: {message}")]
    NotJson { message: String },

    #[error("'conformsTo' must be defined and a non-empty array of strings")]
    MissingConformance,

    #[error("'links' must be defined and a non-empty array")]
    MissingLinks,

    #[error("'conformsTo' contains no recognized STAC API conformance class")]
    NoStacClass,
}

impl DiscoverError {
    /// True when the run cannot produce a report at all.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DiscoverError::Unreachable { .. } | DiscoverError::BadStatus { .. }
        )
    }

    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        if self.is_fatal() {
            3 // network
        } else {
            2 // malformed root document
        }
    }
}

/// A single schema validation error with path context.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ValidationIssue {
    /// JSON Pointer (RFC 6901) to the invalid field.
    pub path: String,
    /// Human-readable error message.
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// An embedded document schema failed to compile.
#[derive(Debug, Error)]
#[error("failed to compile embedded {kind} schema ({version}): {message}")]
pub struct SchemaCompileError {
    pub version: String,
    pub kind: String,
    pub message: String,
}
