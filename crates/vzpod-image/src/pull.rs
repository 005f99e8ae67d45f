//! Pulling one artifact reference into a content store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::registry::{ArtifactManifest, ImageRef, RegistryClient};
use vzpod_oci::{ContentStore, Descriptor, Digest};

/// Returns the store directory for a reference under the cache root:
/// `<cache>/blobs/<ref-with-colons-replaced-by-slashes>`.
#[must_use]
pub fn reference_store_path(cache_path: &Path, reference: &str) -> PathBuf {
    cache_path
        .join("blobs")
        .join(reference.replace(':', "/"))
}

/// Pulls the artifact at `reference` into `store`.
///
/// Walks the manifest: the config descriptor and every layer are pushed
/// through `exists`/`push` (already-valid local content is skipped), the
/// manifest itself is stored untitled, and the reference is tagged.
///
/// # Errors
///
/// Returns registry, store, or manifest errors.
pub async fn pull_artifact(reference: &ImageRef, store: &ContentStore) -> Result<Descriptor> {
    let client = RegistryClient::new(&reference.registry)?;

    let (manifest_bytes, manifest_media_type) = client
        .get_manifest(&reference.repository, &reference.reference)
        .await?;
    let manifest: ArtifactManifest = serde_json::from_slice(&manifest_bytes)?;

    let manifest_desc = Descriptor {
        media_type: manifest_media_type,
        digest: Digest::from_bytes(&manifest_bytes),
        size: manifest_bytes.len() as u64,
        annotations: HashMap::new(),
    };

    for desc in std::iter::once(&manifest.config).chain(manifest.layers.iter()) {
        if store.exists(desc).await? {
            tracing::debug!(
                digest = %desc.digest,
                media_type = desc.media_type,
                "Content already present, skipping"
            );
            continue;
        }

        let blob = client
            .get_blob(&reference.repository, desc.digest.as_str())
            .await?;
        store.push(desc, blob).await?;
    }

    store
        .push(&manifest_desc, manifest_bytes.as_slice())
        .await?;
    store.tag(manifest_desc.clone(), &reference.reference).await?;

    Ok(manifest_desc)
}
