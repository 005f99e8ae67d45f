//! Error type for the container manager.

use thiserror::Error;
use vzpod_error::CommonError;

/// Errors returned by the container manager.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error(transparent)]
    Common(#[from] CommonError),

    /// Container runtime API failure.
    #[error("runtime: {0}")]
    Runtime(#[from] bollard::errors::Error),

    /// Multiple teardown failures joined into one.
    #[error("multiple failures: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Joined(Vec<ContainerError>),
}

impl ContainerError {
    /// Returns true if the error is a not-found.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Common(err) if err.is_not_found())
    }
}

impl From<std::io::Error> for ContainerError {
    fn from(err: std::io::Error) -> Self {
        Self::Common(CommonError::Io(err))
    }
}

/// Result type for the container manager.
pub type Result<T> = std::result::Result<T, ContainerError>;
