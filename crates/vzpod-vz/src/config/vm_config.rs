//! The full virtual machine configuration: devices, network, storage.

use std::path::{Path, PathBuf};

use crate::config::platform::PlatformConfiguration;
use crate::error::{Result, VzError};
use crate::traits::VmCapabilities;

/// Location for all the shared directories inside the macOS guest.
pub const MACOS_SHARED_DIRECTORY_PATH: &str = "/Volumes/My Shared Files";

/// Automount tag for the single directory-sharing device.
pub const MACOS_GUEST_AUTOMOUNT_TAG: &str = "macOSGuestAutomount";

/// A host directory mounted into the guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    /// Volume name from the pod spec.
    pub name: String,
    /// Materialized host path.
    pub host_path: PathBuf,
    /// Path the guest sees the mount under.
    pub container_path: PathBuf,
    /// Whether the guest gets a read-only view.
    pub read_only: bool,
}

/// Display attached to the graphics device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphicsConfiguration {
    /// Width in pixels.
    pub width_pixels: u32,
    /// Height in pixels.
    pub height_pixels: u32,
    /// Pixel density.
    pub pixels_per_inch: u32,
}

/// Network attachment mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkAttachment {
    /// Bridged onto a named host interface; the VM appears on the LAN.
    Bridged {
        /// Host interface identifier (e.g. `en0`).
        interface: String,
    },
    /// NAT behind the host; the VM gets a private address.
    Nat,
}

/// A virtio network device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkDeviceConfiguration {
    /// Attachment mode.
    pub attachment: NetworkAttachment,
    /// MAC address, locally administered.
    pub mac_address: String,
}

/// A virtio block device backed by a disk image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageDeviceConfiguration {
    /// Path of the backing disk image.
    pub disk_image_path: PathBuf,
    /// Whether the attachment is read-only.
    pub read_only: bool,
}

/// A directory shared into the guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedDirectory {
    /// Share name inside the guest's automount volume.
    pub tag: String,
    /// Host directory backing the share.
    pub host_path: PathBuf,
    /// Whether the guest gets a read-only view.
    pub read_only: bool,
}

/// Pointing devices attached to the VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointingDeviceConfiguration {
    /// USB screen-coordinate pointing device.
    UsbScreenCoordinate,
    /// Mac trackpad, when the host supports it.
    MacTrackpad,
}

/// Keyboard devices attached to the VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyboardConfiguration {
    /// USB keyboard.
    Usb,
}

/// A virtio sound device with host streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioDeviceConfiguration {
    /// Host input stream attached.
    pub input_stream: bool,
    /// Host output stream attached.
    pub output_stream: bool,
}

/// Complete description of a virtual machine.
#[derive(Debug, Clone)]
pub struct VirtualMachineConfiguration {
    /// vCPU count.
    pub cpu_count: u32,
    /// Memory size in bytes.
    pub memory_size: u64,
    /// Platform configuration (identity blobs and storage paths).
    pub platform: PlatformConfiguration,
    /// Graphics devices.
    pub graphics: Vec<GraphicsConfiguration>,
    /// Storage devices.
    pub storage: Vec<StorageDeviceConfiguration>,
    /// Network devices.
    pub network: Vec<NetworkDeviceConfiguration>,
    /// Keyboard devices.
    pub keyboards: Vec<KeyboardConfiguration>,
    /// Pointing devices.
    pub pointing: Vec<PointingDeviceConfiguration>,
    /// Audio devices.
    pub audio: Vec<AudioDeviceConfiguration>,
    /// Directory shares exposed under the automount tag.
    pub directory_shares: Vec<SharedDirectory>,
}

impl VirtualMachineConfiguration {
    /// Assembles the standard device set for a macOS pod VM.
    ///
    /// The network device is bridged when `network_interface_identifier`
    /// is non-empty, NAT otherwise; a fresh locally-administered MAC is
    /// generated. One shared directory is added per mount, tagged with the
    /// final component of its container path.
    pub fn new(
        platform: PlatformConfiguration,
        cpu_count: u32,
        memory_size: u64,
        network_interface_identifier: &str,
        mounts: &[Mount],
    ) -> Self {
        let attachment = if network_interface_identifier.is_empty() {
            NetworkAttachment::Nat
        } else {
            NetworkAttachment::Bridged {
                interface: network_interface_identifier.to_string(),
            }
        };

        let directory_shares = mounts
            .iter()
            .map(|mount| SharedDirectory {
                tag: mount
                    .container_path
                    .file_name()
                    .map_or_else(|| mount.name.clone(), |n| n.to_string_lossy().into_owned()),
                host_path: mount.host_path.clone(),
                read_only: mount.read_only,
            })
            .collect();

        Self {
            cpu_count,
            memory_size,
            storage: vec![StorageDeviceConfiguration {
                disk_image_path: platform.block_storage_path.clone(),
                read_only: false,
            }],
            platform,
            graphics: vec![GraphicsConfiguration {
                width_pixels: 1920,
                height_pixels: 1200,
                pixels_per_inch: 80,
            }],
            network: vec![NetworkDeviceConfiguration {
                attachment,
                mac_address: vzpod_net::generate_rand_mac(),
            }],
            keyboards: vec![KeyboardConfiguration::Usb],
            pointing: vec![
                PointingDeviceConfiguration::UsbScreenCoordinate,
                PointingDeviceConfiguration::MacTrackpad,
            ],
            audio: vec![AudioDeviceConfiguration {
                input_stream: true,
                output_stream: true,
            }],
            directory_shares,
        }
    }

    /// Validates the configuration against the substrate's capabilities.
    ///
    /// An invalid configuration fails fast, before any instantiation.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first violated constraint.
    pub fn validate(&self, caps: &VmCapabilities) -> Result<()> {
        if self.cpu_count < caps.min_cpu_count || self.cpu_count > caps.max_cpu_count {
            return Err(VzError::Configuration(format!(
                "cpu count {} outside allowed range {}..={}",
                self.cpu_count, caps.min_cpu_count, caps.max_cpu_count
            )));
        }
        if self.memory_size < caps.min_memory_size || self.memory_size > caps.max_memory_size {
            return Err(VzError::Configuration(format!(
                "memory size {} outside allowed range {}..={}",
                self.memory_size, caps.min_memory_size, caps.max_memory_size
            )));
        }
        if self.storage.is_empty() {
            return Err(VzError::Configuration("no storage device".to_string()));
        }
        for device in &self.storage {
            if !device.disk_image_path.exists() {
                return Err(VzError::Configuration(format!(
                    "disk image {} does not exist",
                    device.disk_image_path.display()
                )));
            }
        }
        if self.network.is_empty() {
            return Err(VzError::Configuration("no network device".to_string()));
        }
        if self.platform.hardware_model.is_empty() {
            return Err(VzError::Configuration("empty hardware model".to_string()));
        }
        if self.platform.machine_identifier.is_empty() {
            return Err(VzError::Configuration("empty machine identifier".to_string()));
        }
        Ok(())
    }

    /// Returns the primary MAC address.
    #[must_use]
    pub fn mac_address(&self) -> &str {
        self.network
            .first()
            .map_or("", |device| device.mac_address.as_str())
    }

    /// Returns the bridged interface identifier, if bridged.
    #[must_use]
    pub fn network_interface(&self) -> Option<&str> {
        self.network.first().and_then(|device| match &device.attachment {
            NetworkAttachment::Bridged { interface } => Some(interface.as_str()),
            NetworkAttachment::Nat => None,
        })
    }

    /// Returns the overlay paths when the platform owns overlay clones.
    #[must_use]
    pub fn overlays(&self) -> Option<(&Path, &Path)> {
        self.platform.is_overlay.then(|| {
            (
                self.platform.block_storage_path.as_path(),
                self.platform.auxiliary_storage_path.as_path(),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MacPlatformConfigurationOptions;
    use base64::Engine as _;

    fn platform(dir: &Path) -> PlatformConfiguration {
        let disk = dir.join("disk.img");
        let aux = dir.join("aux.img");
        std::fs::write(&disk, b"disk").unwrap();
        std::fs::write(&aux, b"aux").unwrap();
        let engine = base64::engine::general_purpose::STANDARD;
        PlatformConfiguration::new(
            &MacPlatformConfigurationOptions {
                block_storage_path: disk,
                auxiliary_storage_path: aux,
                hardware_model_data: engine.encode(b"hw"),
                machine_identifier_data: engine.encode(b"mid"),
            },
            false,
            "U1",
        )
        .unwrap()
    }

    fn caps() -> VmCapabilities {
        VmCapabilities {
            min_cpu_count: 1,
            max_cpu_count: 8,
            min_memory_size: 1 << 30,
            max_memory_size: 64 << 30,
        }
    }

    #[test]
    fn test_new_defaults_to_nat() {
        let dir = tempfile::tempdir().unwrap();
        let config =
            VirtualMachineConfiguration::new(platform(dir.path()), 4, 12 << 30, "", &[]);
        assert_eq!(
            config.network[0].attachment,
            NetworkAttachment::Nat
        );
        assert!(!config.mac_address().is_empty());
        assert_eq!(config.graphics[0].width_pixels, 1920);
        assert_eq!(config.graphics[0].height_pixels, 1200);
    }

    #[test]
    fn test_new_bridged_when_interface_given() {
        let dir = tempfile::tempdir().unwrap();
        let config =
            VirtualMachineConfiguration::new(platform(dir.path()), 4, 12 << 30, "en0", &[]);
        assert_eq!(config.network_interface(), Some("en0"));
    }

    #[test]
    fn test_directory_shares_follow_mounts() {
        let dir = tempfile::tempdir().unwrap();
        let mounts = vec![
            Mount {
                name: "workspace".to_string(),
                host_path: dir.path().join("ws"),
                container_path: PathBuf::from("/mnt/workspace"),
                read_only: false,
            },
            Mount {
                name: "secrets".to_string(),
                host_path: dir.path().join("sec"),
                container_path: PathBuf::from("/var/run/secrets"),
                read_only: true,
            },
        ];
        let config =
            VirtualMachineConfiguration::new(platform(dir.path()), 4, 12 << 30, "", &mounts);

        assert_eq!(config.directory_shares.len(), 2);
        assert_eq!(config.directory_shares[0].tag, "workspace");
        assert!(!config.directory_shares[0].read_only);
        assert_eq!(config.directory_shares[1].tag, "secrets");
        assert!(config.directory_shares[1].read_only);
    }

    #[test]
    fn test_validate_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let config =
            VirtualMachineConfiguration::new(platform(dir.path()), 4, 12 << 30, "", &[]);
        config.validate(&caps()).unwrap();

        let mut too_many_cpus = config.clone();
        too_many_cpus.cpu_count = 64;
        assert!(too_many_cpus.validate(&caps()).is_err());

        let mut too_little_memory = config.clone();
        too_little_memory.memory_size = 1 << 20;
        assert!(too_little_memory.validate(&caps()).is_err());
    }

    #[test]
    fn test_validate_missing_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut config =
            VirtualMachineConfiguration::new(platform(dir.path()), 4, 12 << 30, "", &[]);
        config.storage[0].disk_image_path = dir.path().join("gone.img");
        assert!(config.validate(&caps()).is_err());
    }
}
