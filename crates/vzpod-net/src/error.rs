//! Error type for networking helpers.

use thiserror::Error;
use vzpod_error::CommonError;

/// Errors returned by the networking helpers.
#[derive(Debug, Error)]
pub enum NetError {
    #[error(transparent)]
    Common(#[from] CommonError),

    /// The capture device could not be opened or filtered.
    #[error("packet capture: {0}")]
    Capture(String),
}

impl From<std::io::Error> for NetError {
    fn from(err: std::io::Error) -> Self {
        Self::Common(CommonError::Io(err))
    }
}

/// Result type for networking helpers.
pub type Result<T> = std::result::Result<T, NetError>;
