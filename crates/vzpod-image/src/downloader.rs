//! Single-flight download manager.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::backoff::BackoffPolicy;
use crate::error::{ImageError, Result};
use crate::pull::{pull_artifact, reference_store_path};
use crate::registry::ImageRef;
use vzpod_error::CommonError;
use vzpod_event::EventRecorder;
use vzpod_oci::{ContentStore, MediaType};
use vzpod_vz::MacPlatformConfigurationOptions;

/// Outcome of a completed download, shared by all subscribers.
#[derive(Debug, Clone)]
pub struct DownloadResult {
    /// Everything needed to build the VM's platform configuration.
    pub config: MacPlatformConfigurationOptions,
    /// Wall-clock duration of the fetch.
    pub duration: Duration,
}

type SharedOutcome = std::result::Result<DownloadResult, Arc<ImageError>>;

/// Performs the actual artifact fetch for the manager.
///
/// The manager owns single-flight and cancellation; the fetcher owns the
/// store and registry mechanics. The recorder is the first subscriber's,
/// carrying that pod's object reference.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Fetches `reference`, honouring `cancel`.
    async fn fetch(
        &self,
        cancel: CancellationToken,
        recorder: Arc<dyn EventRecorder>,
        reference: &str,
        ignore_existing: bool,
    ) -> Result<MacPlatformConfigurationOptions>;
}

/// Fetcher pulling OCI artifacts into per-reference content stores with
/// exponential-backoff retries.
pub struct OciArtifactFetcher {
    cache_path: PathBuf,
    backoff: BackoffPolicy,
}

impl OciArtifactFetcher {
    /// Creates a fetcher rooted at `cache_path`.
    pub fn new(cache_path: impl Into<PathBuf>) -> Self {
        Self {
            cache_path: cache_path.into(),
            backoff: BackoffPolicy::default(),
        }
    }
}

#[async_trait]
impl ArtifactFetcher for OciArtifactFetcher {
    async fn fetch(
        &self,
        cancel: CancellationToken,
        recorder: Arc<dyn EventRecorder>,
        reference: &str,
        ignore_existing: bool,
    ) -> Result<MacPlatformConfigurationOptions> {
        let image = ImageRef::parse(reference)?;
        let store = ContentStore::new(
            reference_store_path(&self.cache_path, reference),
            ignore_existing,
            Arc::clone(&recorder),
        )
        .with_cancellation(cancel.clone());

        let result = self
            .pull_with_backoff(&cancel, recorder.as_ref(), &image, reference, &store)
            .await;

        // The store is closed whenever the fetch ends, success or not.
        let close_result = store.close();
        let options = result?;
        close_result?;
        Ok(options)
    }
}

impl OciArtifactFetcher {
    async fn pull_with_backoff(
        &self,
        cancel: &CancellationToken,
        recorder: &dyn EventRecorder,
        image: &ImageRef,
        reference: &str,
        store: &ContentStore,
    ) -> Result<MacPlatformConfigurationOptions> {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(CommonError::Cancelled.into());
            }

            match pull_artifact(image, store).await {
                Ok(_) => break,
                Err(err) => {
                    // Reported per attempt; retries continue until the
                    // schedule is exhausted.
                    recorder.failed_to_pull_image(reference, "", &err);

                    attempt += 1;
                    if attempt >= self.backoff.max_attempts {
                        return Err(err);
                    }

                    let delay = self.backoff.delay(attempt - 1);
                    tracing::debug!(
                        reference,
                        attempt,
                        delay_secs = delay.as_secs_f64(),
                        "Pull attempt failed, backing off"
                    );
                    tokio::select! {
                        () = cancel.cancelled() => return Err(CommonError::Cancelled.into()),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        let block_storage_path = store.file_path_for_media_type(MediaType::DiskImage)?;
        let auxiliary_storage_path = store.file_path_for_media_type(MediaType::AuxImage)?;
        let config = store.get_config().await?;

        Ok(MacPlatformConfigurationOptions {
            block_storage_path,
            auxiliary_storage_path,
            hardware_model_data: config.hardware_model_data,
            machine_identifier_data: config.machine_id_data,
        })
    }
}

/// Per-reference single-flight cell.
struct DownloadState {
    subscribers: AtomicI32,
    started: AtomicBool,
    done_tx: watch::Sender<bool>,
    outcome: OnceLock<SharedOutcome>,
    cancel: CancellationToken,
}

impl DownloadState {
    fn new() -> Self {
        let (done_tx, _) = watch::channel(false);
        Self {
            subscribers: AtomicI32::new(0),
            started: AtomicBool::new(false),
            done_tx,
            outcome: OnceLock::new(),
            cancel: CancellationToken::new(),
        }
    }
}

/// Ensures that concurrent subscribers to the same reference share one
/// fetch.
///
/// Exactly one fetch task runs per reference across all subscribers; each
/// subscriber observes either the shared result or its own cancellation.
/// The fetch is cancelled when the last subscriber leaves.
pub struct DownloadManager {
    fetcher: Arc<dyn ArtifactFetcher>,
    downloads: Mutex<HashMap<String, Arc<DownloadState>>>,
}

impl DownloadManager {
    /// Creates a manager pulling into `cache_path`.
    pub fn new(cache_path: impl Into<PathBuf>) -> Self {
        Self::with_fetcher(Arc::new(OciArtifactFetcher::new(cache_path)))
    }

    /// Creates a manager over a custom fetcher.
    pub fn with_fetcher(fetcher: Arc<dyn ArtifactFetcher>) -> Self {
        Self {
            fetcher,
            downloads: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribes to the download of `reference`.
    ///
    /// The first subscriber launches a detached fetch task; later
    /// subscribers attach to it. The call returns when the fetch finishes
    /// (shared result) or `cancel` fires (this subscriber only observes
    /// `Cancelled`). When the last subscriber leaves, the cell is removed
    /// and the fetch cancelled.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` for the subscriber's own cancellation, or the
    /// shared fetch error.
    pub async fn download(
        &self,
        cancel: &CancellationToken,
        recorder: Arc<dyn EventRecorder>,
        reference: &str,
        ignore_existing: bool,
    ) -> Result<DownloadResult> {
        tracing::info!(reference, "Requesting to subscribe to download");

        let state = {
            let mut downloads = self
                .downloads
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            Arc::clone(
                downloads
                    .entry(reference.to_string())
                    .or_insert_with(|| Arc::new(DownloadState::new())),
            )
        };

        state.subscribers.fetch_add(1, Ordering::SeqCst);
        let _guard = SubscriberGuard {
            manager: self,
            reference,
            state: Arc::clone(&state),
        };

        if !state.started.swap(true, Ordering::SeqCst) {
            tracing::info!(reference, "Initiating download per request");
            let fetcher = Arc::clone(&self.fetcher);
            let task_state = Arc::clone(&state);
            let reference = reference.to_string();
            // The fetch runs detached: it outlives any one subscriber and
            // observes only the cell's own cancellation token.
            tokio::spawn(async move {
                let started = Instant::now();
                let result = fetcher
                    .fetch(task_state.cancel.clone(), recorder, &reference, ignore_existing)
                    .await;
                let duration = started.elapsed();

                let outcome = if task_state.cancel.is_cancelled() {
                    // The cell's cancellation wins over any fetch error.
                    Err(Arc::new(ImageError::from(CommonError::Cancelled)))
                } else {
                    result
                        .map(|config| DownloadResult { config, duration })
                        .map_err(Arc::new)
                };

                tracing::debug!(
                    reference,
                    duration_secs = duration.as_secs_f64(),
                    "Download completed"
                );
                let _ = task_state.outcome.set(outcome);
                let _ = task_state.done_tx.send(true);
            });
        }

        let mut done_rx = state.done_tx.subscribe();
        tokio::select! {
            () = cancel.cancelled() => Err(CommonError::Cancelled.into()),
            changed = done_rx.wait_for(|done| *done) => {
                changed.map_err(|_| {
                    ImageError::from(CommonError::internal("download task dropped"))
                })?;
                match state.outcome.get() {
                    Some(Ok(result)) => Ok(result.clone()),
                    Some(Err(err)) => Err(ImageError::Shared(Arc::clone(err))),
                    None => Err(CommonError::internal("download finished without outcome").into()),
                }
            }
        }
    }
}

/// Decrements the subscriber count on scope exit; the last subscriber
/// removes the cell and cancels the fetch.
struct SubscriberGuard<'a> {
    manager: &'a DownloadManager,
    reference: &'a str,
    state: Arc<DownloadState>,
}

impl Drop for SubscriberGuard<'_> {
    fn drop(&mut self) {
        if self.state.subscribers.fetch_sub(1, Ordering::SeqCst) == 1 {
            let mut downloads = self
                .manager
                .downloads
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            // Remove the cell first so no late subscriber attaches to a
            // cancelled download.
            if let Some(current) = downloads.get(self.reference) {
                if Arc::ptr_eq(current, &self.state) {
                    downloads.remove(self.reference);
                }
            }
            drop(downloads);
            self.state.cancel.cancel();
            tracing::info!(reference = self.reference, "No more subscribers left, cleaning up");
        }
    }
}
