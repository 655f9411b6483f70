//! Error types for vulnfeed-sync
//!
//! Errors are split along the line the sync pipeline draws between fatal and
//! recoverable failures:
//! - [`Error`] aborts a run (catalog unreachable, store directory unusable,
//!   invalid configuration, missing credentials)
//! - [`FetchError`] describes why a single artifact could not be downloaded
//! - [`ExpandError`] describes why a downloaded container could not be opened
//!
//! Per-item errors are turned into [`FetchOutcome::Failed`](crate::types::FetchOutcome)
//! entries by the orchestrator and never escape a run.

use crate::feed::FeedFamily;
use crate::types::FailureStage;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for vulnfeed-sync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for vulnfeed-sync
///
/// Every variant is fatal for the current run.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "store_dir")
        key: Option<String>,
    },

    /// The remote catalog could not be produced
    #[error("failed to acquire feed catalog from {url}: {reason}")]
    Catalog {
        /// Listing URL that was requested
        url: String,
        /// Why the listing could not be used
        reason: String,
    },

    /// The destination store could not be created
    #[error("failed to prepare store directory {path}: {source}")]
    StoreDir {
        /// Store directory path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A feed family that requires an API key was configured without one
    #[error("{0} feed requires an API key (use --api-key or set VULNERS_API_KEY)")]
    MissingCredentials(FeedFamily),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error outside of a per-item fetch (client construction, listing)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a configuration error tied to a specific key
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Failure to download a single artifact
#[derive(Debug, Error)]
pub enum FetchError {
    /// Request could not be sent, timed out, or the body stream broke
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// Remote answered with a non-success status code
    #[error("remote returned HTTP {status}")]
    Status {
        /// HTTP status code
        status: u16,
    },

    /// Writing the downloaded bytes to disk failed
    #[error("failed to write {path}: {source}")]
    Write {
        /// File that was being written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Body was delivered with a success status but rejected by the feed's
    /// validation predicate
    #[error("response body of {len} bytes rejected as invalid")]
    InvalidBody {
        /// Body length in bytes
        len: u64,
    },

    /// The run was cancelled while this download was in flight
    #[error("download cancelled")]
    Cancelled,
}

impl FetchError {
    /// Pipeline stage this error is reported under
    pub fn stage(&self) -> FailureStage {
        match self {
            FetchError::Network(_) | FetchError::Status { .. } | FetchError::Cancelled => {
                FailureStage::Fetch
            }
            FetchError::Write { .. } => FailureStage::Write,
            FetchError::InvalidBody { .. } => FailureStage::Validate,
        }
    }
}

/// Failure to expand a downloaded container
#[derive(Debug, Error)]
pub enum ExpandError {
    /// The artifact is not a readable container (corrupt or wrong format)
    #[error("cannot open {archive} as an archive: {reason}")]
    Open {
        /// Archive that could not be opened
        archive: PathBuf,
        /// Reason reported by the archive reader
        reason: String,
    },

    /// The extraction directory could not be prepared
    #[error("failed to prepare extraction directory {path}: {source}")]
    Destination {
        /// Extraction directory
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The blocking extraction task did not complete
    #[error("extraction task failed: {0}")]
    Task(String),
}
