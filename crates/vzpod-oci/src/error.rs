//! Error type for the content store.

use thiserror::Error;
use vzpod_error::CommonError;

/// Errors returned by the content store and its compression helpers.
#[derive(Debug, Error)]
pub enum OciError {
    #[error(transparent)]
    Common(#[from] CommonError),

    /// A descriptor or digest string could not be parsed.
    #[error("malformed digest: {0}")]
    MalformedDigest(String),

    /// The configuration payload could not be encoded or decoded.
    #[error("config payload: {0}")]
    Config(#[from] serde_json::Error),
}

impl OciError {
    /// Returns true if the underlying error is a duplicate-name failure.
    #[must_use]
    pub const fn is_duplicate_name(&self) -> bool {
        matches!(self, Self::Common(CommonError::DuplicateName(_)))
    }

    /// Returns true if the store was already closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Common(err) if err.is_closed())
    }

    /// Returns true if the content failed digest verification.
    #[must_use]
    pub const fn is_digest_mismatch(&self) -> bool {
        matches!(self, Self::Common(CommonError::DigestMismatch { .. }))
    }
}

impl From<std::io::Error> for OciError {
    fn from(err: std::io::Error) -> Self {
        Self::Common(CommonError::Io(err))
    }
}

/// Result type for content store operations.
pub type Result<T> = std::result::Result<T, OciError>;
