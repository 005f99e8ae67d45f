//! The on-disk content store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex as TokioMutex;
use tokio_util::sync::CancellationToken;

use crate::compression::{compress_file, decompress_file};
use crate::config::VmImageConfig;
use crate::digest::{compute_and_verify_file_digest, validate_file_with_digest, Digest, Digester};
use crate::error::{OciError, Result};
use crate::mediatype::{is_media_type_supported, MediaType};
use crate::memory::MemoryStore;
use vzpod_error::CommonError;
use vzpod_event::EventRecorder;

/// Annotation key for the human title (file name) of the content.
pub const ANNOTATION_TITLE: &str = "org.opencontainers.image.title";

/// Annotation key for the size of the uncompressed content.
pub const ANNOTATION_UNCOMPRESSED_SIZE: &str = "com.vzpod.content.uncompressed-size";

/// Annotation key for the digest of the uncompressed content.
pub const ANNOTATION_UNCOMPRESSED_DIGEST: &str = "com.vzpod.content.uncompressed-digest";

/// Copy buffer for streaming pushes.
const COPY_BUF_SIZE: usize = 1 << 20;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// An OCI-style content descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the content.
    pub media_type: String,
    /// Canonical digest of the content as transferred.
    pub digest: Digest,
    /// Size of the content as transferred.
    pub size: u64,
    /// Free-form annotations (title, uncompressed size/digest).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,
}

impl Descriptor {
    /// Returns the content's title annotation, if any.
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.annotations
            .get(ANNOTATION_TITLE)
            .map(String::as_str)
            .filter(|title| !title.is_empty())
    }

    /// Returns the declared uncompressed size, if annotated.
    #[must_use]
    pub fn uncompressed_size(&self) -> Option<&str> {
        self.annotations
            .get(ANNOTATION_UNCOMPRESSED_SIZE)
            .map(String::as_str)
    }

    /// Returns the declared uncompressed digest, if annotated.
    #[must_use]
    pub fn uncompressed_digest(&self) -> Option<&str> {
        self.annotations
            .get(ANNOTATION_UNCOMPRESSED_DIGEST)
            .map(String::as_str)
    }
}

/// Content-addressed on-disk store for image artifacts.
///
/// One store instance manages one working directory (one image reference).
/// Writers are serialized per name; the second push of an already-written
/// name fails with `DuplicateName`. A closed store rejects every operation.
pub struct ContentStore {
    working_dir: PathBuf,
    ignore_existing: bool,
    recorder: Arc<dyn EventRecorder>,
    cancel: CancellationToken,

    closed: AtomicBool,
    digest_to_path: StdRwLock<HashMap<Digest, PathBuf>>,
    media_type_to_path: StdRwLock<HashMap<String, PathBuf>>,
    name_status: StdMutex<HashMap<String, Arc<TokioMutex<bool>>>>,
    tmp_files: StdMutex<Vec<PathBuf>>,

    memory: MemoryStore,
}

impl ContentStore {
    /// Creates a store over `working_dir`.
    ///
    /// With `ignore_existing` set, files already on disk are never adopted
    /// and every artifact is fetched anew.
    pub fn new(
        working_dir: impl Into<PathBuf>,
        ignore_existing: bool,
        recorder: Arc<dyn EventRecorder>,
    ) -> Self {
        Self {
            working_dir: working_dir.into(),
            ignore_existing,
            recorder,
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            digest_to_path: StdRwLock::new(HashMap::new()),
            media_type_to_path: StdRwLock::new(HashMap::new()),
            name_status: StdMutex::new(HashMap::new()),
            tmp_files: StdMutex::new(Vec::new()),
            memory: MemoryStore::new(),
        }
    }

    /// Attaches a cancellation token observed by long decompression runs.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns the store's working directory.
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Saves content under the descriptor's title.
    ///
    /// Untitled descriptors are delegated to the in-memory fallback.
    /// Content annotated with an uncompressed size and digest is treated as
    /// gzip: it is spooled to a temp file (verifying the compressed digest),
    /// then decompressed sparsely to the final path, and the uncompressed
    /// digest must match the annotation. Plain content is verified during
    /// the copy and re-verified from disk after close.
    ///
    /// # Errors
    ///
    /// `Closed` after [`close`](Self::close); `DuplicateName` when the name
    /// was already written; `Unsupported` for unknown media types;
    /// `DigestMismatch` on verification failure. A failed push leaves the
    /// name writable so a retry can proceed.
    pub async fn push<R>(&self, expected: &Descriptor, mut content: R) -> Result<()>
    where
        R: AsyncRead + Send + Unpin,
    {
        self.ensure_open()?;

        let Some(name) = expected.title().map(str::to_string) else {
            let mut bytes = Vec::with_capacity(usize::try_from(expected.size).unwrap_or(0));
            content.read_to_end(&mut bytes).await?;
            return self.memory.push(expected, bytes);
        };

        let status = self.status(&name);
        let mut exists = status.lock().await;
        if *exists {
            return Err(CommonError::duplicate_name(name).into());
        }

        if !is_media_type_supported(&expected.media_type) {
            return Err(CommonError::unsupported(format!(
                "media type: {}",
                expected.media_type
            ))
            .into());
        }

        tracing::debug!(name, "Pulling OCI content");
        tokio::fs::create_dir_all(&self.working_dir).await?;
        let output_path = self.working_dir.join(&name);

        match (expected.uncompressed_size(), expected.uncompressed_digest()) {
            (Some(size), Some(digest)) => {
                let size = size.parse::<u64>().map_err(|err| {
                    CommonError::invalid_input(format!("invalid uncompressed size: {err}"))
                })?;
                let uncompressed_digest = Digest::parse(digest)?;
                self.push_compressed(expected, content, &output_path, size, &uncompressed_digest)
                    .await?;
            }
            _ => self.push_regular(expected, content, &output_path).await?,
        }
        tracing::debug!(name, "Successfully pulled OCI content");

        *exists = true;
        Ok(())
    }

    async fn push_compressed<R>(
        &self,
        expected: &Descriptor,
        content: R,
        output_path: &Path,
        uncompressed_size: u64,
        uncompressed_digest: &Digest,
    ) -> Result<()>
    where
        R: AsyncRead + Send + Unpin,
    {
        let temp_path = self.temp_file();
        self.save_stream(&temp_path, &expected.digest, content)
            .await?;

        // The compressed payload is valid at this point.
        self.index_digest(expected.digest.clone(), temp_path.clone());

        let actual = {
            let temp = temp_path.clone();
            let output = output_path.to_path_buf();
            let cancel = self.cancel.clone();
            spawn_blocking(move || decompress_file(&temp, &output, uncompressed_size, &cancel))
                .await?
        };

        if actual != *uncompressed_digest {
            return Err(CommonError::digest_mismatch(
                uncompressed_digest.as_str(),
                actual.as_str(),
            )
            .into());
        }

        self.index_media_type(&expected.media_type, output_path.to_path_buf());
        Ok(())
    }

    async fn push_regular<R>(
        &self,
        expected: &Descriptor,
        content: R,
        output_path: &Path,
    ) -> Result<()>
    where
        R: AsyncRead + Send + Unpin,
    {
        self.save_stream(output_path, &expected.digest, content)
            .await?;
        self.index_digest(expected.digest.clone(), output_path.to_path_buf());

        // Re-verify from disk after close; this also caches the sidecar.
        {
            let path = output_path.to_path_buf();
            let digest = expected.digest.clone();
            spawn_blocking(move || compute_and_verify_file_digest(&path, &digest)).await?;
        }

        self.index_media_type(&expected.media_type, output_path.to_path_buf());
        Ok(())
    }

    /// Copies a stream to `path` while hashing, then verifies the digest.
    async fn save_stream<R>(&self, path: &Path, expected: &Digest, mut content: R) -> Result<()>
    where
        R: AsyncRead + Send + Unpin,
    {
        let mut file = tokio::fs::File::create(path).await?;
        let mut digester = Digester::new();
        let mut buf = vec![0u8; COPY_BUF_SIZE];

        loop {
            let n = content.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            digester.update(&buf[..n]);
            file.write_all(&buf[..n]).await?;
        }
        file.flush().await?;
        file.sync_all().await?;

        let actual = digester.finalize();
        if actual != *expected {
            return Err(CommonError::digest_mismatch(expected.as_str(), actual.as_str()).into());
        }
        Ok(())
    }

    /// Opens a reader for stored content.
    ///
    /// # Errors
    ///
    /// `Closed` after close, `NotFound` when neither the disk indexes nor
    /// the in-memory fallback hold the digest.
    pub async fn fetch(&self, target: &Descriptor) -> Result<Box<dyn AsyncRead + Send + Unpin>> {
        self.ensure_open()?;

        let path = self
            .digest_to_path
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&target.digest)
            .cloned();

        if let Some(path) = path {
            let file = tokio::fs::File::open(&path).await.map_err(|err| {
                if err.kind() == std::io::ErrorKind::NotFound {
                    OciError::from(CommonError::not_found(format!(
                        "{}: {}",
                        target.digest, target.media_type
                    )))
                } else {
                    err.into()
                }
            })?;
            return Ok(Box::new(file));
        }

        match self.memory.fetch(target) {
            Some(bytes) => Ok(Box::new(std::io::Cursor::new(bytes.to_vec()))),
            None => Err(CommonError::not_found(format!(
                "{}: {}",
                target.digest, target.media_type
            ))
            .into()),
        }
    }

    /// Checks whether content exists, adopting valid on-disk files.
    ///
    /// When the media type is not indexed but a file with the descriptor's
    /// title exists on disk (and `ignore_existing` is off), the file is
    /// validated against the descriptor's uncompressed (or plain) digest;
    /// on success it is adopted into the index. Validation failures are
    /// reported via the event recorder and fall through to non-existence.
    ///
    /// # Errors
    ///
    /// `Closed` after close.
    pub async fn exists(&self, target: &Descriptor) -> Result<bool> {
        self.ensure_open()?;

        if self
            .media_type_to_path
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains_key(&target.media_type)
        {
            return Ok(true);
        }

        if let Some(name) = target.title() {
            let path = self.working_dir.join(name);
            if !self.ignore_existing && tokio::fs::try_exists(&path).await.unwrap_or(false) {
                let digest = match target.uncompressed_digest() {
                    Some(digest) => Digest::parse(digest)?,
                    None => target.digest.clone(),
                };

                let validation = {
                    let path = path.clone();
                    let digest = digest.clone();
                    spawn_blocking(move || validate_file_with_digest(&path, &digest)).await
                };
                match validation {
                    Ok(()) => {
                        self.index_media_type(&target.media_type, path);
                        return Ok(true);
                    }
                    Err(err) => {
                        tracing::debug!(name, error = %err, "On-disk content failed validation");
                        self.recorder.failed_to_validate_oci(name);
                    }
                }
            }
        }

        Ok(self.memory.exists(target))
    }

    /// Resolves a reference through the in-memory fallback.
    ///
    /// # Errors
    ///
    /// `Closed` after close, `InvalidInput` for an empty reference,
    /// `NotFound` for an unknown one.
    pub fn resolve(&self, reference: &str) -> Result<Descriptor> {
        self.ensure_open()?;
        if reference.is_empty() {
            return Err(CommonError::invalid_input("missing reference").into());
        }
        self.memory.resolve(reference)
    }

    /// Tags a descriptor with a reference if its content exists.
    ///
    /// # Errors
    ///
    /// `Closed` after close, `InvalidInput` for an empty reference,
    /// `NotFound` when the content is absent.
    pub async fn tag(&self, desc: Descriptor, reference: &str) -> Result<()> {
        self.ensure_open()?;
        if reference.is_empty() {
            return Err(CommonError::invalid_input("missing reference").into());
        }
        if !self.exists(&desc).await? {
            return Err(
                CommonError::not_found(format!("{}: {}", desc.digest, desc.media_type)).into(),
            );
        }
        self.memory.tag(desc, reference);
        Ok(())
    }

    /// Registers an already-on-disk file, producing its descriptor.
    ///
    /// The file is compressed into a tracked temp file; the descriptor
    /// carries the compressed digest and size plus annotations for the
    /// title and the uncompressed size and digest.
    ///
    /// # Errors
    ///
    /// `Closed` after close, `DuplicateName` when the media type's title was
    /// already registered, an I/O error when the source is missing.
    pub async fn add(&self, media_type: MediaType, path: Option<&Path>) -> Result<Descriptor> {
        self.ensure_open()?;

        let name = media_type.title();
        let status = self.status(name);
        let mut exists = status.lock().await;
        if *exists {
            return Err(CommonError::duplicate_name(name).into());
        }

        let source = match path {
            Some(p) if p.is_absolute() => p.to_path_buf(),
            Some(p) => self.working_dir.join(p),
            None => self.working_dir.join(name),
        };
        tokio::fs::metadata(&source).await?;

        let temp_path = self.temp_file();
        let result = {
            let source = source.clone();
            let temp = temp_path.clone();
            spawn_blocking(move || compress_file(&source, &temp)).await?
        };

        self.index_digest(result.gz_digest.clone(), temp_path);
        self.index_media_type(media_type.as_str(), source);
        *exists = true;

        Ok(Descriptor {
            media_type: media_type.as_str().to_string(),
            digest: result.gz_digest,
            size: result.compressed_size,
            annotations: HashMap::from([
                (ANNOTATION_TITLE.to_string(), name.to_string()),
                (
                    ANNOTATION_UNCOMPRESSED_SIZE.to_string(),
                    result.uncompressed_size.to_string(),
                ),
                (
                    ANNOTATION_UNCOMPRESSED_DIGEST.to_string(),
                    result.uncompressed_digest.as_str().to_string(),
                ),
            ]),
        })
    }

    /// Encodes the configuration payload to a tracked temp file and returns
    /// its descriptor.
    ///
    /// # Errors
    ///
    /// `Closed` after close, `DuplicateName` when the config was already set.
    pub async fn set(&self, cfg: &VmImageConfig) -> Result<Descriptor> {
        self.ensure_open()?;

        let name = MediaType::ConfigV1.title();
        let status = self.status(name);
        let mut exists = status.lock().await;
        if *exists {
            return Err(CommonError::duplicate_name(name).into());
        }

        let bytes = serde_json::to_vec(cfg)?;
        let temp_path = self.temp_file();
        tokio::fs::write(&temp_path, &bytes).await?;

        let digest = Digest::from_bytes(&bytes);
        self.index_digest(digest.clone(), temp_path);
        *exists = true;

        Ok(Descriptor {
            media_type: MediaType::ConfigV1.as_str().to_string(),
            digest,
            size: bytes.len() as u64,
            annotations: HashMap::from([(ANNOTATION_TITLE.to_string(), name.to_string())]),
        })
    }

    /// Returns the on-disk path indexed for a media type.
    ///
    /// # Errors
    ///
    /// `Closed` after close, `NotFound` when the media type is not indexed.
    pub fn file_path_for_media_type(&self, media_type: MediaType) -> Result<PathBuf> {
        self.ensure_open()?;
        self.media_type_to_path
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(media_type.as_str())
            .cloned()
            .ok_or_else(|| CommonError::not_found(format!("media type {media_type}")).into())
    }

    /// Reads and decodes the stored configuration payload.
    ///
    /// # Errors
    ///
    /// `Closed` after close, `NotFound` when no config was stored, a config
    /// error when the payload cannot be decoded.
    pub async fn get_config(&self) -> Result<VmImageConfig> {
        let path = self.file_path_for_media_type(MediaType::ConfigV1)?;
        let bytes = tokio::fs::read(&path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Closes the store, removing tracked temp files.
    ///
    /// Idempotent; after the first call every other operation returns
    /// `Closed`.
    ///
    /// # Errors
    ///
    /// Surfaces the first temp-file removal failure.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let files = std::mem::take(
            &mut *self
                .tmp_files
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        );

        let mut first_err = None;
        for path in files {
            if let Err(err) = std::fs::remove_file(&path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %err, "Failed to remove temp file");
                    first_err.get_or_insert(err);
                }
            }
        }

        match first_err {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CommonError::closed("store").into());
        }
        Ok(())
    }

    /// Allocates a tracked temp file path in the system temp dir.
    fn temp_file(&self) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "vzpod_file_{}_{}",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        self.tmp_files
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(path.clone());
        path
    }

    fn status(&self, name: &str) -> Arc<TokioMutex<bool>> {
        self.name_status
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(TokioMutex::new(false)))
            .clone()
    }

    fn index_digest(&self, digest: Digest, path: PathBuf) {
        self.digest_to_path
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(digest, path);
    }

    fn index_media_type(&self, media_type: &str, path: PathBuf) {
        self.media_type_to_path
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(media_type.to_string(), path);
    }
}

impl Drop for ContentStore {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

async fn spawn_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| OciError::from(CommonError::internal(format!("blocking task: {err}"))))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vzpod_event::LogEventRecorder;

    fn recorder() -> Arc<dyn EventRecorder> {
        Arc::new(LogEventRecorder)
    }

    fn disk_descriptor(bytes: &[u8]) -> Descriptor {
        Descriptor {
            media_type: MediaType::DiskImage.as_str().to_string(),
            digest: Digest::from_bytes(bytes),
            size: bytes.len() as u64,
            annotations: HashMap::from([(
                ANNOTATION_TITLE.to_string(),
                MediaType::DiskImage.title().to_string(),
            )]),
        }
    }

    #[tokio::test]
    async fn test_push_regular_and_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path(), false, recorder());

        let content = b"raw disk image".to_vec();
        let desc = disk_descriptor(&content);
        store.push(&desc, content.as_slice()).await.unwrap();

        let path = store
            .file_path_for_media_type(MediaType::DiskImage)
            .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), content);
        assert!(crate::digest_file_path(&path).exists());

        let mut reader = store.fetch(&desc).await.unwrap();
        let mut fetched = Vec::new();
        reader.read_to_end(&mut fetched).await.unwrap();
        assert_eq!(fetched, content);
    }

    #[tokio::test]
    async fn test_push_duplicate_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path(), false, recorder());

        let content = b"raw disk image".to_vec();
        let desc = disk_descriptor(&content);
        store.push(&desc, content.as_slice()).await.unwrap();

        // Any subsequent push of the same name fails, regardless of content.
        let other = b"different bytes".to_vec();
        let err = store
            .push(&disk_descriptor(&other), other.as_slice())
            .await
            .unwrap_err();
        assert!(err.is_duplicate_name());
    }

    #[tokio::test]
    async fn test_failed_push_allows_retry() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path(), false, recorder());

        let content = b"raw disk image".to_vec();
        let mut bad = disk_descriptor(&content);
        bad.digest = Digest::from_bytes(b"someone else's bytes");
        let err = store.push(&bad, content.as_slice()).await.unwrap_err();
        assert!(err.is_digest_mismatch());

        // The name stays writable after a failed push.
        store
            .push(&disk_descriptor(&content), content.as_slice())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_push_unsupported_media_type() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path(), false, recorder());

        let content = b"layer".to_vec();
        let mut desc = disk_descriptor(&content);
        desc.media_type = "application/vnd.oci.image.layer.v1.tar".to_string();
        let err = store.push(&desc, content.as_slice()).await.unwrap_err();
        assert!(matches!(
            err,
            OciError::Common(CommonError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn test_untitled_push_goes_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path(), false, recorder());

        let manifest = br#"{"schemaVersion":2}"#.to_vec();
        let desc = Descriptor {
            media_type: "application/vnd.oci.image.manifest.v1+json".to_string(),
            digest: Digest::from_bytes(&manifest),
            size: manifest.len() as u64,
            annotations: HashMap::new(),
        };
        store.push(&desc, manifest.as_slice()).await.unwrap();
        assert!(store.exists(&desc).await.unwrap());

        store.tag(desc.clone(), "latest").await.unwrap();
        assert_eq!(store.resolve("latest").unwrap().digest, desc.digest);
    }

    #[tokio::test]
    async fn test_push_compressed_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path(), false, recorder());

        // Sparse-ish payload published through add() on a second store.
        let mut payload = vec![0u8; 400_000];
        payload[..4].copy_from_slice(b"boot");
        payload[250_000..250_004].copy_from_slice(b"tail");

        let publish_dir = tempfile::tempdir().unwrap();
        let src = publish_dir.path().join("disk.img");
        std::fs::write(&src, &payload).unwrap();
        let publisher = ContentStore::new(publish_dir.path(), false, recorder());
        let desc = publisher
            .add(MediaType::DiskImage, Some(&src))
            .await
            .unwrap();

        // The compressed bytes live at the publisher's digest index.
        let mut reader = publisher.fetch(&desc).await.unwrap();
        let mut compressed = Vec::new();
        reader.read_to_end(&mut compressed).await.unwrap();
        assert_eq!(desc.size, compressed.len() as u64);

        store.push(&desc, compressed.as_slice()).await.unwrap();
        let path = store
            .file_path_for_media_type(MediaType::DiskImage)
            .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), payload);
    }

    #[tokio::test]
    async fn test_exists_adopts_valid_on_disk_file() {
        let dir = tempfile::tempdir().unwrap();
        let content = b"previously downloaded".to_vec();
        std::fs::write(dir.path().join("disk.img"), &content).unwrap();

        let store = ContentStore::new(dir.path(), false, recorder());
        let desc = disk_descriptor(&content);
        assert!(store.exists(&desc).await.unwrap());
        // Adoption indexes the media type for later path lookups.
        assert!(store.file_path_for_media_type(MediaType::DiskImage).is_ok());
    }

    #[tokio::test]
    async fn test_exists_ignores_on_disk_file_when_requested() {
        let dir = tempfile::tempdir().unwrap();
        let content = b"previously downloaded".to_vec();
        std::fs::write(dir.path().join("disk.img"), &content).unwrap();

        let store = ContentStore::new(dir.path(), true, recorder());
        let desc = disk_descriptor(&content);
        assert!(!store.exists(&desc).await.unwrap());
    }

    #[tokio::test]
    async fn test_exists_rejects_corrupt_on_disk_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("disk.img"), b"corrupted bytes").unwrap();

        let store = ContentStore::new(dir.path(), false, recorder());
        let desc = disk_descriptor(b"expected bytes");
        assert!(!store.exists(&desc).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_and_get_config() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path(), false, recorder());

        let cfg = VmImageConfig::new_macos("aGFyZHdhcmU=".into(), "bWFjaGluZQ==".into());
        let desc = store.set(&cfg).await.unwrap();
        assert_eq!(desc.media_type, MediaType::ConfigV1.as_str());
        assert_eq!(desc.title(), Some("config.json"));

        let err = store.set(&cfg).await.unwrap_err();
        assert!(err.is_duplicate_name());
    }

    #[tokio::test]
    async fn test_closed_store_rejects_operations() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path(), false, recorder());

        store.close().unwrap();
        // Idempotent.
        store.close().unwrap();

        let content = b"bytes".to_vec();
        let desc = disk_descriptor(&content);
        assert!(store
            .push(&desc, content.as_slice())
            .await
            .unwrap_err()
            .is_closed());
        assert!(store.exists(&desc).await.unwrap_err().is_closed());
        match store.fetch(&desc).await {
            Ok(_) => panic!("expected closed store to reject fetch"),
            Err(e) => assert!(e.is_closed()),
        }
        assert!(store.resolve("latest").unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn test_close_removes_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("disk.img");
        std::fs::write(&src, b"image payload").unwrap();

        let store = ContentStore::new(dir.path(), false, recorder());
        let desc = store.add(MediaType::DiskImage, Some(&src)).await.unwrap();

        let temp_path = store
            .digest_to_path
            .read()
            .unwrap()
            .get(&desc.digest)
            .cloned()
            .unwrap();
        assert!(temp_path.exists());

        store.close().unwrap();
        assert!(!temp_path.exists());
    }
}
