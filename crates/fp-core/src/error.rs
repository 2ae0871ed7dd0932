//! Unified error type for feedpreview.
//!
//! Per-clip failures ([`Error::CacheIo`], [`Error::Fetch`], [`Error::Engine`])
//! are absorbed by the layer that sees them and only ever surface as a
//! scheduling advance. [`Error::Configuration`] is the one fatal variant and is
//! raised at construction time.

/// Unified error type covering all failure modes in feedpreview.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The on-disk cache could not be opened, read or written.
    #[error("Cache I/O error: {source}")]
    CacheIo {
        /// The underlying storage error.
        #[source]
        source: std::io::Error,
    },

    /// A network retrieval failed.
    #[error("Fetch error [{url}]: {message}")]
    Fetch {
        /// The URL that was requested.
        url: String,
        /// Human-readable error description.
        message: String,
    },

    /// The playback engine failed on the active clip (decode, network).
    #[error("Engine error: {0}")]
    Engine(String),

    /// The viewport reported an inconsistent visible range.
    #[error("Invalid viewport range: first={first:?}, last={last:?}")]
    InvalidRange {
        /// Reported first fully-visible index.
        first: Option<usize>,
        /// Reported last fully-visible index.
        last: Option<usize>,
    },

    /// A play request named a position with no feed item behind it.
    #[error("No feed item at position {0}")]
    UnknownPosition(crate::ids::FeedPosition),

    /// Structurally invalid configuration (e.g. buffer thresholds out of order).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A background worker (playback session or scheduler) is no longer running.
    #[error("Playback session closed")]
    SessionClosed,

    /// A generic I/O operation failed (config files and the like).
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Convenience constructor for [`Error::CacheIo`].
    pub fn cache_io(source: std::io::Error) -> Self {
        Error::CacheIo { source }
    }

    /// Convenience constructor for [`Error::Fetch`].
    pub fn fetch(url: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Error::Fetch {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Engine`].
    pub fn engine(message: impl Into<String>) -> Self {
        Error::Engine(message.into())
    }

    /// Convenience constructor for [`Error::Configuration`].
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration(message.into())
    }
}

/// Result type alias using the unified [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
