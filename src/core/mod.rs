use std::{path::PathBuf, sync::Arc};

use thiserror::Error;

/// Errors raised while a [`Source`](crate::source::Source) loads or watches its value.
///
/// These are the failures of the upstream itself: transport, parsing,
/// watching, and HTTP status validation.
#[derive(Error, Debug)]
pub enum SourceError {
    /// I/O failure while reading the backing resource
    #[error("I/O error on '{path}': {details}")]
    Io {
        /// Path where the I/O error occurred
        path: PathBuf,
        /// I/O error details
        details: String,
    },

    /// The raw content could not be deserialized
    #[error("failed to parse {location}: {details}")]
    Parse {
        /// Location of the content being parsed (file path, URL, "string")
        location: String,
        /// Parse error details
        details: String,
    },

    /// The change watch could not be established
    #[error("failed to watch '{path}': {details}")]
    Watch {
        /// Path being watched
        path: PathBuf,
        /// Watcher error details
        details: String,
    },

    /// The HTTP request could not be built or sent
    #[error("request to '{url}' failed: {details}")]
    Request {
        /// Target URL
        url: String,
        /// Transport error details
        details: String,
    },

    /// The response status was rejected by the status validator
    #[error("invalid status {status} received from '{url}'")]
    Status {
        /// Target URL
        url: String,
        /// Rejected status code
        status: u16,
    },

    /// A session attribute could not be encoded as a request header
    #[error("invalid header '{name}': {details}")]
    InvalidHeader {
        /// Header name
        name: String,
        /// Encoding error details
        details: String,
    },

    /// The server answered 304 before any body was ever cached
    #[error("'{url}' answered 304 Not Modified but no cached value exists")]
    NotModifiedWithoutCache {
        /// Target URL
        url: String,
    },

    /// The source was disposed and can no longer produce values
    #[error("{source_name} source is closed")]
    Closed {
        /// Name of the closed source
        source_name: String,
    },
}

/// Error returned by a subscriber callback.
///
/// Delivery logs it and moves on to the next callback.
#[derive(Error, Debug, Clone)]
#[error("listener failed: {details}")]
pub struct ListenerError {
    /// What went wrong inside the callback
    pub details: String,
}

impl ListenerError {
    /// Creates a listener error from anything displayable.
    pub fn new(details: impl std::fmt::Display) -> Self {
        Self {
            details: details.to_string(),
        }
    }
}

/// Error types for the lifeconfig store.
///
/// This enum covers readiness, explicit loads and disposal of a
/// [`LifeConfig`](crate::life_config::LifeConfig).
#[derive(Error, Debug)]
pub enum LifeConfigError {
    /// The value was read before the first successful load
    #[error("life config is not ready: no value has been loaded yet")]
    NotReady,

    /// An explicit load failed
    #[error(transparent)]
    Load(#[from] SourceError),

    /// The first background load failed, so readiness was never reached
    #[error("initial load failed: {0}")]
    InitialLoad(Arc<SourceError>),

    /// The source failed to release its resources
    #[error("failed to dispose source: {details}")]
    Dispose {
        /// Disposal error details
        details: String,
    },
}

/// A specialized `Result` type for lifeconfig operations.
pub type Result<T> = std::result::Result<T, LifeConfigError>;

impl SourceError {
    /// Creates an I/O error with path context.
    pub fn io(error: impl std::fmt::Display, path: impl Into<PathBuf>) -> Self {
        SourceError::Io {
            path: path.into(),
            details: error.to_string(),
        }
    }

    /// Creates a parse error with location context.
    pub fn parse(error: impl std::fmt::Display, location: impl Into<String>) -> Self {
        SourceError::Parse {
            location: location.into(),
            details: error.to_string(),
        }
    }
}
