//! Error type for the guest exec channel.

use thiserror::Error;
use vzpod_error::CommonError;

/// Errors returned by the guest exec channel.
#[derive(Debug, Error)]
pub enum SshError {
    #[error(transparent)]
    Common(#[from] CommonError),

    /// Protocol-level SSH failure.
    #[error("ssh: {0}")]
    Protocol(#[from] russh::Error),

    /// Authentication was rejected by the guest.
    #[error("ssh authentication failed for user {0}")]
    AuthenticationFailed(String),

    /// The remote command exited with a non-zero status.
    #[error("command exited with status {0}")]
    ExitStatus(u32),
}

impl SshError {
    /// Returns true if the error is a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Common(err) if err.is_cancelled())
    }
}

impl From<std::io::Error> for SshError {
    fn from(err: std::io::Error) -> Self {
        Self::Common(CommonError::Io(err))
    }
}

/// Result type for the guest exec channel.
pub type Result<T> = std::result::Result<T, SshError>;
