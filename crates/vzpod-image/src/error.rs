//! Error type for artifact pulling.

use std::sync::Arc;

use thiserror::Error;
use vzpod_error::CommonError;

/// Errors returned while pulling artifacts.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error(transparent)]
    Common(#[from] CommonError),

    /// Content store failure.
    #[error(transparent)]
    Store(#[from] vzpod_oci::OciError),

    /// Registry transport failure.
    #[error("registry: {0}")]
    Registry(#[from] reqwest::Error),

    /// The registry answered with an unexpected status.
    #[error("registry returned status {status} for {url}")]
    RegistryStatus {
        /// HTTP status code.
        status: u16,
        /// Requested URL.
        url: String,
    },

    /// An image reference could not be parsed.
    #[error("invalid image reference: {0}")]
    InvalidReference(String),

    /// Manifest decoding failure.
    #[error("manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    /// A failure shared between single-flight subscribers.
    #[error("{0}")]
    Shared(Arc<ImageError>),
}

impl ImageError {
    /// Returns true if the error is a cancellation, looking through the
    /// shared wrapper.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Common(err) => err.is_cancelled(),
            Self::Store(err) => matches!(err, vzpod_oci::OciError::Common(c) if c.is_cancelled()),
            Self::Shared(inner) => inner.is_cancelled(),
            _ => false,
        }
    }
}

impl From<std::io::Error> for ImageError {
    fn from(err: std::io::Error) -> Self {
        Self::Common(CommonError::Io(err))
    }
}

/// Result type for artifact pulling.
pub type Result<T> = std::result::Result<T, ImageError>;
