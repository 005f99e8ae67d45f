//! Common error types for `vzpod`.
//!
//! This crate provides the unified error taxonomy shared across the `vzpod`
//! crates. Crate-specific error enums wrap [`CommonError`] with
//! `#[error(transparent)]` so the taxonomy stays observable at every layer:
//! the pod engine maps `NotFound` to "already deleted" on teardown and
//! `InvalidInput` to non-retriable create failures, regardless of which
//! component produced the error.

mod common;

pub use common::CommonError;

/// Result type alias using `CommonError`.
pub type Result<T> = std::result::Result<T, CommonError>;
