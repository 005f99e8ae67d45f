//! macOS platform configuration: storage paths and identity blobs.

use std::path::PathBuf;

use base64::Engine as _;

use crate::clonefile::FileCloner;
use crate::error::{Result, VzError};

/// Inputs for building a platform configuration, as recovered from a
/// pulled image artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacPlatformConfigurationOptions {
    /// Path of the block-storage disk image in the content store.
    pub block_storage_path: PathBuf,
    /// Path of the auxiliary (nvram) image in the content store.
    pub auxiliary_storage_path: PathBuf,
    /// Base64-encoded hardware model data.
    pub hardware_model_data: String,
    /// Base64-encoded machine identifier data.
    pub machine_identifier_data: String,
}

/// The resolved platform configuration a VM boots with.
///
/// When built with overlays, the storage paths point at copy-on-write
/// clones owned by this VM; they are removed when the VM stops.
#[derive(Debug, Clone)]
pub struct PlatformConfiguration {
    /// Path of the block-storage image (overlay clone when `is_overlay`).
    pub block_storage_path: PathBuf,
    /// Path of the auxiliary image (overlay clone when `is_overlay`).
    pub auxiliary_storage_path: PathBuf,
    /// Whether the storage paths are per-VM overlay clones.
    pub is_overlay: bool,
    /// Decoded hardware model data.
    pub hardware_model: Vec<u8>,
    /// Decoded machine identifier data.
    pub machine_identifier: Vec<u8>,
}

impl PlatformConfiguration {
    /// Builds a platform configuration, cloning overlays when requested.
    ///
    /// The clone pattern is the pod UID, so overlays are attributable to
    /// their pod on disk.
    ///
    /// # Errors
    ///
    /// Returns an error when cloning fails or either identity blob is not
    /// valid base64.
    pub fn new(
        opts: &MacPlatformConfigurationOptions,
        use_overlay: bool,
        uid: &str,
    ) -> Result<Self> {
        let (block_storage_path, auxiliary_storage_path) = if use_overlay {
            let cloner = FileCloner::new();
            let block = cloner.clonefile(&opts.block_storage_path, uid)?;
            let aux = cloner.clonefile(&opts.auxiliary_storage_path, uid)?;
            (block, aux)
        } else {
            (
                opts.block_storage_path.clone(),
                opts.auxiliary_storage_path.clone(),
            )
        };

        let engine = base64::engine::general_purpose::STANDARD;
        let hardware_model = engine.decode(&opts.hardware_model_data).map_err(|err| {
            VzError::Configuration(format!("failed to decode hardware model data: {err}"))
        })?;
        let machine_identifier = engine.decode(&opts.machine_identifier_data).map_err(|err| {
            VzError::Configuration(format!("failed to decode machine identifier data: {err}"))
        })?;

        Ok(Self {
            block_storage_path,
            auxiliary_storage_path,
            is_overlay: use_overlay,
            hardware_model,
            machine_identifier,
        })
    }
}
