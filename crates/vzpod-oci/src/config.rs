//! The platform configuration payload stored alongside the images.

use serde::{Deserialize, Serialize};

use crate::mediatype::MediaType;

/// One storage entry of the configuration payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageItem {
    /// Media type of the stored file.
    #[serde(rename = "mediatype")]
    pub media_type: MediaType,
    /// On-disk title of the stored file.
    pub file: String,
}

/// Configuration payload of a macOS VM image artifact.
///
/// Serialized as `config.json`: hardware-model and machine-identifier blobs
/// (base64) plus the ordered list of storage files the artifact carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmImageConfig {
    /// The config media type itself.
    #[serde(rename = "mediatype", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaType>,
    /// Guest operating system, `darwin`.
    pub os: String,
    /// Base64-encoded hardware model data.
    #[serde(rename = "hardwareModelData")]
    pub hardware_model_data: String,
    /// Base64-encoded machine identifier data.
    #[serde(rename = "machineIdData")]
    pub machine_id_data: String,
    /// Ordered storage entries.
    pub storage: Vec<StorageItem>,
}

impl VmImageConfig {
    /// Creates the configuration for a macOS image artifact.
    #[must_use]
    pub fn new_macos(hardware_model_data: String, machine_id_data: String) -> Self {
        Self {
            media_type: Some(MediaType::ConfigV1),
            os: "darwin".to_string(),
            hardware_model_data,
            machine_id_data,
            storage: vec![
                StorageItem {
                    media_type: MediaType::AuxImage,
                    file: MediaType::AuxImage.title().to_string(),
                },
                StorageItem {
                    media_type: MediaType::DiskImage,
                    file: MediaType::DiskImage.title().to_string(),
                },
            ],
        }
    }
}
