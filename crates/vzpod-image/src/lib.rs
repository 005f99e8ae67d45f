//! OCI artifact pulling for macOS VM images.
//!
//! A pull walks an artifact manifest (empty config plus titled layers:
//! compressed disk and auxiliary images and a `config.json` payload) into
//! a per-reference content store. The [`DownloadManager`] wraps pulls in a
//! single-flight cell per reference: concurrent subscribers share one
//! fetch, each subscriber can cancel independently, and the fetch itself
//! is cancelled when the last subscriber leaves.

mod backoff;
mod downloader;
mod error;
mod pull;
mod registry;

pub use backoff::BackoffPolicy;
pub use downloader::{ArtifactFetcher, DownloadManager, DownloadResult, OciArtifactFetcher};
pub use error::{ImageError, Result};
pub use pull::{pull_artifact, reference_store_path};
pub use registry::{ArtifactManifest, ImageRef, RegistryClient};
