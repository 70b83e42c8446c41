//! Error types for Regional Radar.
//!
//! Library crates use [`RadarError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level error type for all pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum RadarError {
    /// Root page of a company website unreachable. Fatal for that company.
    #[error("fetch failed for {url}: {reason}")]
    FetchFailed { url: String, reason: String },

    /// A sub-page could not be fetched. Non-fatal.
    #[error("sub-page {url} skipped: {reason}")]
    PartialFetch { url: String, reason: String },

    /// Model service error or unusable model output after bounded retries.
    #[error("classification failed: {0}")]
    ClassificationFailed(String),

    /// Address could not be resolved. Non-fatal for persistence.
    #[error("geocode failed: {0}")]
    GeocodeFailed(String),

    /// Another writer changed the record between read and conditional write.
    #[error("persist conflict for company {identity}")]
    PersistConflict { identity: String },

    /// Notification transport error. The alert stays pending.
    #[error("dispatch failed: {0}")]
    DispatchFailed(String),

    /// Document could not be rendered from the stored record(s).
    #[error("render failed: {0}")]
    RenderFailed(String),

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error outside of the fetch stage (client construction etc).
    #[error("network error: {0}")]
    Network(String),

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (invalid roster entry, missing field, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, RadarError>;

/// Discriminant of a [`RadarError`], attached to run outcomes and persisted
/// in run summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    FetchFailed,
    PartialFetch,
    ClassificationFailed,
    GeocodeFailed,
    PersistConflict,
    DispatchFailed,
    RenderFailed,
    Config,
    Network,
    Storage,
    Io,
    Validation,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FetchFailed => "fetch_failed",
            Self::PartialFetch => "partial_fetch",
            Self::ClassificationFailed => "classification_failed",
            Self::GeocodeFailed => "geocode_failed",
            Self::PersistConflict => "persist_conflict",
            Self::DispatchFailed => "dispatch_failed",
            Self::RenderFailed => "render_failed",
            Self::Config => "config",
            Self::Network => "network",
            Self::Storage => "storage",
            Self::Io => "io",
            Self::Validation => "validation",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RadarError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a fetch failure for `url`.
    pub fn fetch_failed(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::FetchFailed {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Which error kind this is.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::FetchFailed { .. } => ErrorKind::FetchFailed,
            Self::PartialFetch { .. } => ErrorKind::PartialFetch,
            Self::ClassificationFailed(_) => ErrorKind::ClassificationFailed,
            Self::GeocodeFailed(_) => ErrorKind::GeocodeFailed,
            Self::PersistConflict { .. } => ErrorKind::PersistConflict,
            Self::DispatchFailed(_) => ErrorKind::DispatchFailed,
            Self::RenderFailed(_) => ErrorKind::RenderFailed,
            Self::Config { .. } => ErrorKind::Config,
            Self::Network(_) => ErrorKind::Network,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Io { .. } => ErrorKind::Io,
            Self::Validation { .. } => ErrorKind::Validation,
        }
    }
}
