//! Error type for the pod engine.

use std::sync::Arc;

use thiserror::Error;
use vzpod_error::CommonError;

/// Errors returned by the pod engine and the VM resource manager.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Common(#[from] CommonError),

    /// Virtualization layer failure.
    #[error(transparent)]
    Vz(#[from] vzpod_vz::VzError),

    /// Image download failure.
    #[error(transparent)]
    Image(#[from] vzpod_image::ImageError),

    /// Container manager failure.
    #[error(transparent)]
    Container(#[from] vzpod_container::ContainerError),

    /// Guest exec channel failure.
    #[error(transparent)]
    Ssh(#[from] vzpod_ssh::SshError),

    /// A failure shared between concurrent deleters.
    #[error("{0}")]
    Shared(Arc<CoreError>),

    /// Multiple branch failures joined into one.
    #[error("multiple failures: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Joined(Vec<CoreError>),
}

impl CoreError {
    /// Returns true if this is (or wraps) a not-found error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Common(err) => err.is_not_found(),
            Self::Vz(vzpod_vz::VzError::Common(err)) => err.is_not_found(),
            Self::Container(err) => err.is_not_found(),
            Self::Image(vzpod_image::ImageError::Common(err)) => err.is_not_found(),
            Self::Ssh(vzpod_ssh::SshError::Common(err)) => err.is_not_found(),
            Self::Shared(inner) => inner.is_not_found(),
            _ => false,
        }
    }

    /// Returns true if this is (or wraps) a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Common(err) => err.is_cancelled(),
            Self::Vz(err) => err.is_cancelled(),
            Self::Image(err) => err.is_cancelled(),
            Self::Ssh(err) => err.is_cancelled(),
            Self::Shared(inner) => inner.is_cancelled(),
            _ => false,
        }
    }

    /// Returns true if this is an invalid-input error.
    #[must_use]
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::Common(err) if err.is_invalid_input())
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Common(CommonError::Io(err))
    }
}

/// Result type for the pod engine.
pub type Result<T> = std::result::Result<T, CoreError>;
