//! Common error types shared across `vzpod` crates.

use thiserror::Error;

/// Common errors that occur across multiple `vzpod` crates.
///
/// This enum provides the unified taxonomy for the whole node: input
/// validation, resource lookup, content addressing, lifecycle and
/// cancellation failures. Crate-specific errors wrap this type using the
/// `#[from]` attribute.
#[derive(Debug, Error)]
pub enum CommonError {
    /// I/O error from the standard library.
    ///
    /// The most common error type, wrapping `std::io::Error` for filesystem
    /// operations, network I/O, and other system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The caller supplied input that can never succeed.
    ///
    /// Non-retriable; surfaced to the caller immediately (e.g. a duplicate
    /// create, missing SSH credentials, an unparsable resource request).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    ///
    /// Used when a requested resource (pod group, virtual machine,
    /// container, stored blob) does not exist. Teardown paths treat this
    /// as "already deleted".
    #[error("not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A second writer attempted to push content under a name that has
    /// already been written.
    #[error("duplicate name: {0}")]
    DuplicateName(String),

    /// The operation or media type is not supported.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Content failed digest verification.
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// The digest declared by the descriptor.
        expected: String,
        /// The digest computed from the content.
        actual: String,
    },

    /// Operation timeout.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The operation was cancelled.
    ///
    /// Cancellation wins over late-arriving errors: callers report this in
    /// preference to substrate errors when both are set.
    #[error("operation cancelled")]
    Cancelled,

    /// The component has been closed and rejects every operation.
    #[error("{0} already closed")]
    Closed(String),

    /// A collaborator (guest, runtime daemon, registry) cannot currently
    /// serve the request.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// A catch-all for unexpected internal errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CommonError {
    /// Creates a new invalid input error.
    #[must_use]
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Creates a new not found error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    /// Creates a new already exists error.
    #[must_use]
    pub fn already_exists(resource: impl Into<String>) -> Self {
        Self::AlreadyExists(resource.into())
    }

    /// Creates a new duplicate name error.
    #[must_use]
    pub fn duplicate_name(name: impl Into<String>) -> Self {
        Self::DuplicateName(name.into())
    }

    /// Creates a new unsupported error.
    #[must_use]
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Creates a new digest mismatch error.
    #[must_use]
    pub fn digest_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::DigestMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates a new timeout error.
    #[must_use]
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Creates a new closed error.
    #[must_use]
    pub fn closed(component: impl Into<String>) -> Self {
        Self::Closed(component.into())
    }

    /// Creates a new unavailable error.
    #[must_use]
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Creates a new internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns true if this is a not found error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns true if this is an invalid input error.
    #[must_use]
    pub const fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }

    /// Returns true if this is a cancellation error.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns true if this is a timeout error.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Returns true if this is a closed error.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}
