//! Error types for webrisk.

use thiserror::Error;

use crate::client::UrlThreat;
use crate::threat_type::ThreatType;

/// Error type for webrisk operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid snapshot magic bytes
    #[error("invalid magic bytes: expected WEBRISK header")]
    InvalidMagic,

    /// Unsupported snapshot format version
    #[error("unsupported format version: {0}")]
    UnsupportedVersion(u32),

    /// Checksum mismatch
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// Invalid header size
    #[error("invalid header size: expected {expected}, got {actual}")]
    InvalidHeaderSize { expected: usize, actual: usize },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Rice or raw entry decoding failed
    #[error("decode error: {0}")]
    Decode(String),

    /// Hash prefix list violates ordering or length rules
    #[error("invalid hash prefixes: {0}")]
    InvalidHashPrefixes(String),

    /// Removal index outside the current list
    #[error("invalid removal index {index} for list of {len} hashes")]
    InvalidRemovalIndex { index: usize, len: usize },

    /// Server response is inconsistent with the local state
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Transport failure or unexpected HTTP status
    #[error("HTTP error: {0}")]
    Http(String),

    /// Deadline exceeded
    #[error("operation timed out")]
    Timeout,

    /// Local database is not usable
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// URL could not be canonicalized
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Client was closed
    #[error("handler is closed")]
    Closed,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A lookup failed part way. `threats` holds what was resolved before the failure,
    /// one entry per input URL.
    #[error("lookup failed: {source}")]
    PartialLookup {
        threats: Vec<Vec<UrlThreat>>,
        source: Box<Error>,
    },
}

/// Result type alias for webrisk operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Health state of the local threat database.
///
/// Cloneable so the last failure can be handed to every caller of `status()`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DatabaseError {
    /// No successful load or sync yet
    #[error("database not initialized")]
    NotInitialized,

    /// Last successful sync is too old to trust
    #[error("threat list is stale")]
    Stale,

    /// Snapshot on disk does not cover a subscribed list
    #[error("database configuration mismatch: {0} missing from snapshot")]
    ConfigMismatch(ThreatType),

    /// Sync failed at the transport level
    #[error("update failed: {0}")]
    UpdateFailed(String),

    /// Sync response or snapshot was rejected as corrupt
    #[error("database corrupted: {0}")]
    Corrupted(String),
}

impl Error {
    /// True for failures caused by bad data rather than the transport.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::ChecksumMismatch
                | Error::Decode(_)
                | Error::InvalidHashPrefixes(_)
                | Error::InvalidRemovalIndex { .. }
                | Error::MalformedResponse(_)
                | Error::Json(_)
        )
    }
}
