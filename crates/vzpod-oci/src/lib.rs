//! Content-addressed storage for macOS VM image artifacts.
//!
//! Storage layout, one store per image reference:
//!
//! ```text
//! <cache>/blobs/<ref>/
//! ├── disk.img           # decompressed block-storage image
//! ├── disk.img.digest    # sidecar with the canonical digest string
//! ├── aux.img            # decompressed auxiliary (nvram) image
//! ├── aux.img.digest
//! ├── config.json        # platform configuration payload
//! └── config.json.digest
//! ```
//!
//! The store is append-only and single-writer per name: a second push under
//! a name that has already been written fails with `DuplicateName`. Large
//! media arrive gzip-compressed and are decompressed on the way in with
//! zero blocks skipped, so sparse disk images stay sparse on filesystems
//! that support holes. Manifest-sized objects without a title fall back to
//! an in-memory store that also backs `resolve`/`tag`.

mod compression;
mod config;
mod digest;
mod error;
mod mediatype;
mod memory;
mod store;

pub use compression::{compress_file, decompress_file, CompressionResult, GZIP_BLOCK_SIZE};
pub use config::{StorageItem, VmImageConfig};
pub use digest::{
    compute_and_verify_file_digest, digest_file_path, validate_file_with_digest, Digest, Digester,
};
pub use error::{OciError, Result};
pub use mediatype::{is_media_type_supported, MediaType};
pub use memory::MemoryStore;
pub use store::{ContentStore, Descriptor, ANNOTATION_TITLE, ANNOTATION_UNCOMPRESSED_DIGEST, ANNOTATION_UNCOMPRESSED_SIZE};
