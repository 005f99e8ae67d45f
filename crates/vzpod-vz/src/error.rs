//! Error type for the virtualization layer.

use thiserror::Error;
use vzpod_error::CommonError;

/// Errors returned by the virtualization layer.
#[derive(Debug, Error)]
pub enum VzError {
    #[error(transparent)]
    Common(#[from] CommonError),

    /// The substrate rejected an operation.
    #[error("substrate: {0}")]
    Substrate(String),

    /// A VM configuration failed validation.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Guest IP discovery failed.
    #[error("ip discovery: {0}")]
    IpDiscovery(#[from] vzpod_net::NetError),
}

impl VzError {
    /// Returns true if the error is a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Common(err) if err.is_cancelled())
    }
}

impl From<std::io::Error> for VzError {
    fn from(err: std::io::Error) -> Self {
        Self::Common(CommonError::Io(err))
    }
}

/// Result type for the virtualization layer.
pub type Result<T> = std::result::Result<T, VzError>;
