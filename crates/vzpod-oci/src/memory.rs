//! In-memory fallback store for manifest-sized objects.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::digest::Digest;
use crate::error::Result;
use crate::store::Descriptor;
use vzpod_error::CommonError;

/// Small content store keyed by digest, with a reference index for
/// `resolve`/`tag`. Backs everything the on-disk store does not keep:
/// manifests, empty config descriptors, and untitled blobs.
#[derive(Default)]
pub struct MemoryStore {
    content: RwLock<HashMap<Digest, Arc<Vec<u8>>>>,
    refs: RwLock<HashMap<String, Descriptor>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a blob after verifying it against the descriptor's digest.
    ///
    /// # Errors
    ///
    /// Returns `DigestMismatch` when the bytes do not hash to the
    /// descriptor's digest.
    pub fn push(&self, expected: &Descriptor, bytes: Vec<u8>) -> Result<()> {
        let actual = Digest::from_bytes(&bytes);
        if actual != expected.digest {
            return Err(
                CommonError::digest_mismatch(expected.digest.as_str(), actual.as_str()).into(),
            );
        }

        self.content
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(expected.digest.clone(), Arc::new(bytes));
        Ok(())
    }

    /// Fetches a blob by descriptor.
    #[must_use]
    pub fn fetch(&self, target: &Descriptor) -> Option<Arc<Vec<u8>>> {
        self.content
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&target.digest)
            .cloned()
    }

    /// Returns true if a blob with the descriptor's digest is stored.
    #[must_use]
    pub fn exists(&self, target: &Descriptor) -> bool {
        self.content
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains_key(&target.digest)
    }

    /// Resolves a reference to its tagged descriptor.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the reference is unknown.
    pub fn resolve(&self, reference: &str) -> Result<Descriptor> {
        self.refs
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(reference)
            .cloned()
            .ok_or_else(|| CommonError::not_found(format!("reference {reference}")).into())
    }

    /// Tags a descriptor with a reference.
    pub fn tag(&self, desc: Descriptor, reference: &str) {
        self.refs
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(reference.to_string(), desc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor_for(bytes: &[u8], media_type: &str) -> Descriptor {
        Descriptor {
            media_type: media_type.to_string(),
            digest: Digest::from_bytes(bytes),
            size: bytes.len() as u64,
            annotations: HashMap::new(),
        }
    }

    #[test]
    fn test_push_fetch() {
        let store = MemoryStore::new();
        let bytes = br#"{"schemaVersion":2}"#.to_vec();
        let desc = descriptor_for(&bytes, "application/vnd.oci.image.manifest.v1+json");

        store.push(&desc, bytes.clone()).unwrap();
        assert!(store.exists(&desc));
        assert_eq!(*store.fetch(&desc).unwrap(), bytes);
    }

    #[test]
    fn test_push_verifies_digest() {
        let store = MemoryStore::new();
        let mut desc = descriptor_for(b"right", "application/octet-stream");
        desc.digest = Digest::from_bytes(b"wrong");
        assert!(store.push(&desc, b"right".to_vec()).is_err());
    }

    #[test]
    fn test_resolve_tag() {
        let store = MemoryStore::new();
        let bytes = b"manifest".to_vec();
        let desc = descriptor_for(&bytes, "application/vnd.oci.image.manifest.v1+json");
        store.push(&desc, bytes).unwrap();

        assert!(store.resolve("latest").is_err());
        store.tag(desc.clone(), "latest");
        assert_eq!(store.resolve("latest").unwrap().digest, desc.digest);
    }
}
