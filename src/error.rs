//! Error classification shared by the acquisition and normalization passes.

use std::io;
use std::path::PathBuf;

/// Why a single source template failed to produce a usable document.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The request did not complete within the configured timeout.
    #[error("timed out fetching {url}")]
    Timeout {
        /// Requested URL.
        url: String,
    },
    /// Connection, TLS, or body transfer failure.
    #[error("network error fetching {url}: {message}")]
    Network {
        /// Requested URL.
        url: String,
        /// Underlying transport message.
        message: String,
    },
    /// The mirror answered with a non-success status.
    #[error("{url} answered with HTTP {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },
    /// The body was too small to be a real document.
    #[error("{url} returned {len} bytes (need more than {min})")]
    TooShort {
        /// Requested URL.
        url: String,
        /// Received byte count.
        len: usize,
        /// Configured threshold.
        min: usize,
    },
}

impl FetchError {
    /// Short label used to bucket failures in reports.
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            Self::Timeout { .. } => FetchErrorKind::Timeout,
            Self::Network { .. } => FetchErrorKind::Network,
            Self::Status { .. } => FetchErrorKind::Status,
            Self::TooShort { .. } => FetchErrorKind::TooShort,
        }
    }

    pub(crate) fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else if let Some(status) = err.status() {
            Self::Status {
                url: url.to_string(),
                status: status.as_u16(),
            }
        } else {
            Self::Network {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }
}

/// Coarse failure buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FetchErrorKind {
    /// Request timed out.
    Timeout,
    /// Transport-level failure.
    Network,
    /// Non-success HTTP status.
    Status,
    /// Body below the minimum content size.
    TooShort,
}

/// Failures while reading one catalog page.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// The page request itself failed.
    #[error("catalog page {page} request failed: {source}")]
    Http {
        /// Page number requested.
        page: u32,
        /// Transport error.
        #[source]
        source: reqwest::Error,
    },
    /// The catalog answered with a non-success status.
    #[error("catalog page {page} answered with HTTP {status}")]
    Status {
        /// Page number requested.
        page: u32,
        /// HTTP status code.
        status: u16,
    },
    /// The body was not the expected JSON shape.
    #[error("catalog page {page} is not valid JSON: {source}")]
    Decode {
        /// Page number requested.
        page: u32,
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },
    /// The HTTP client could not be constructed.
    #[error("failed to build catalog client: {source}")]
    Client {
        /// Builder error.
        #[source]
        source: reqwest::Error,
    },
    /// The configured base URL could not be parsed.
    #[error("invalid catalog url {url}: {source}")]
    Url {
        /// Offending URL text.
        url: String,
        /// Parse failure.
        #[source]
        source: url::ParseError,
    },
}

/// Failures touching the storage root.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Filesystem operation failed.
    #[error("{action} {path:?}: {source}")]
    Io {
        /// What was being attempted.
        action: &'static str,
        /// Path involved.
        path: PathBuf,
        /// OS error.
        #[source]
        source: io::Error,
    },
    /// Manifest could not be encoded.
    #[error("failed to encode manifest: {0}")]
    Encode(#[from] serde_json::Error),
    /// A document filename would resolve outside the storage root.
    #[error("refusing document filename {filename:?}: not a plain file name")]
    UnsafeFilename {
        /// Offending filename.
        filename: String,
    },
}

impl StorageError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

/// Per-file failures in the normalization pass.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    /// The manifest record carries no filename.
    #[error("record {id} has no filename")]
    MissingFilename {
        /// Document id.
        id: u64,
    },
    /// The referenced file does not exist.
    #[error("file not found: {filename}")]
    FileNotFound {
        /// Missing filename.
        filename: String,
    },
    /// Reading or writing the file failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}
